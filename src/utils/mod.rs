//! Utility functions for code derivation and URL processing.
//!
//! - [`code_generator`] - Deterministic short code derivation and validation
//! - [`url_normalizer`] - URL canonicalization

pub mod code_generator;
pub mod url_normalizer;
