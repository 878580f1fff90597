//! Business logic services for the application layer.

pub mod identifier_generator;
pub mod url_service;

pub use identifier_generator::IdentifierGenerator;
pub use url_service::{ServiceStats, UrlService};
