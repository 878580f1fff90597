//! Core domain entities.
//!
//! - [`UrlMapping`] - A persisted original URL ↔ short code pair
//! - [`Direction`] - Which side of a mapping a lookup starts from
//! - [`MappingSelector`] - Addresses a mapping for rename/delete

pub mod url_mapping;

pub use url_mapping::{Direction, MappingField, MappingSelector, RenamedMapping, UrlMapping};
