//! Domain layer containing business entities and contracts.
//!
//! # Architecture
//!
//! - [`entities`] - Core business data structures
//! - [`repositories`] - Data access trait definitions
//! - [`cache_event`] - Cache mutation events pushed to clients
//!
//! The domain layer has no dependencies on infrastructure or presentation
//! layers. Orchestration lives in [`crate::application`].

pub mod cache_event;
pub mod entities;
pub mod repositories;
