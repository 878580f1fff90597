//! Repository trait for url mapping persistence.

use crate::domain::entities::{MappingSelector, RenamedMapping, UrlMapping};
use crate::error::AppError;
use async_trait::async_trait;

/// Durable storage of original URL ↔ short code mappings.
///
/// Every operation is atomic for a single mapping. No operation spans
/// more than one mapping except [`UrlRepository::delete_all`].
///
/// # Implementations
///
/// - [`crate::infrastructure::persistence::PgUrlRepository`] - PostgreSQL implementation
/// - [`crate::infrastructure::persistence::MemoryUrlRepository`] - In-process implementation
/// - Test mocks available with `cfg(test)`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UrlRepository: Send + Sync {
    /// Finds the mapping for an original URL.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on database errors.
    async fn find_by_original(&self, original_url: &str) -> Result<Option<UrlMapping>, AppError>;

    /// Finds the mapping for a short code.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on database errors.
    async fn find_by_short(&self, short_code: &str) -> Result<Option<UrlMapping>, AppError>;

    /// Inserts a new mapping.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::DuplicateKey`] naming the conflicting column if
    /// either value is already taken.
    async fn create(&self, original_url: &str, short_code: &str) -> Result<UrlMapping, AppError>;

    /// Replaces the selected field of a mapping with `new_value`.
    ///
    /// Returns `Ok(None)` without changing anything when the mapping does not
    /// exist or `new_value` is already taken. [`MappingSelector::Either`] is
    /// not accepted and also yields `Ok(None)`.
    async fn rename(
        &self,
        selector: MappingSelector,
        new_value: &str,
    ) -> Result<Option<RenamedMapping>, AppError>;

    /// Deletes the selected mapping, returning it if it existed.
    async fn delete(&self, selector: MappingSelector) -> Result<Option<UrlMapping>, AppError>;

    /// Deletes every mapping and returns how many were removed.
    async fn delete_all(&self) -> Result<u64, AppError>;

    /// Lists all mappings, newest first.
    async fn list(&self) -> Result<Vec<UrlMapping>, AppError>;

    /// Counts stored mappings.
    async fn count(&self) -> Result<i64, AppError>;

    /// Checks the store is reachable.
    async fn health_check(&self) -> bool;
}
