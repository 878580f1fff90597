//! Shared cache trait and error types.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::Serialize;

use crate::domain::cache_event::CacheEvent;
use crate::domain::entities::Direction;

/// Name of the publish channel carrying [`CacheEvent`]s.
pub const CACHE_EVENTS_CHANNEL: &str = "cache-updates";

/// Keys scanned per cursor page.
pub const SCAN_PAGE_SIZE: usize = 100;

/// Errors that can occur during cache operations.
///
/// Never propagated past the service layer.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache connection error: {0}")]
    ConnectionError(String),
    #[error("Cache operation error: {0}")]
    OperationError(String),
    #[error("Cache payload error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// A cache entry as reported by [`SharedCache::scan_all`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntrySnapshot {
    pub key: String,
    pub value: Option<String>,
    /// Remaining time to live in seconds; `None` when the key has no expiry
    /// or vanished during the scan.
    pub ttl: Option<i64>,
}

/// Returns `true` for keys under one of the two managed prefixes.
pub fn is_managed_key(key: &str) -> bool {
    [Direction::Original, Direction::Short]
        .iter()
        .any(|d| key.starts_with(d.key_prefix()))
}

/// Cache-aside store holding both directions of every mapping.
///
/// Every mutation writes its keys in one atomic batch and then publishes a
/// [`CacheEvent`] on [`CACHE_EVENTS_CHANNEL`].
///
/// # Implementations
///
/// - [`crate::infrastructure::cache::RedisCache`] - Redis-backed cache with pub/sub
/// - [`crate::infrastructure::cache::MemoryCache`] - In-process cache with broadcast events
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SharedCache: Send + Sync {
    /// Looks up the counterpart of `key` in `direction`.
    ///
    /// Returns `Ok(None)` on miss or expiry.
    async fn get(&self, direction: Direction, key: &str) -> CacheResult<Option<String>>;

    /// Writes `original:{original_url}` and `short:{short_code}` with the
    /// configured TTL, then publishes a `url_updated` event.
    async fn set(&self, original_url: &str, short_code: &str) -> CacheResult<()>;

    /// Deletes both directions, then publishes a `url_deleted` event.
    async fn invalidate(&self, original_url: &str, short_code: &str) -> CacheResult<()>;

    /// Replaces `short:{old_short}` with the new pairing in one batch.
    ///
    /// Idempotent: replaying it leaves the same keys behind.
    async fn rename_short(
        &self,
        original_url: &str,
        old_short: &str,
        new_short: &str,
    ) -> CacheResult<()>;

    /// Replaces `original:{old_original}` with the new pairing in one batch.
    async fn rename_original(
        &self,
        old_original: &str,
        new_original: &str,
        short_code: &str,
    ) -> CacheResult<()>;

    /// Enumerates every managed key with its value and remaining TTL.
    async fn scan_all(&self) -> CacheResult<Vec<CacheEntrySnapshot>>;

    /// Deletes a single managed key. Keys outside the managed prefixes are
    /// left alone and reported as not deleted.
    async fn delete_key(&self, key: &str) -> CacheResult<bool>;

    /// Deletes every managed key, returning how many were removed.
    async fn clear(&self) -> CacheResult<u64>;

    async fn health_check(&self) -> bool;

    /// Opens a stream of published [`CacheEvent`]s.
    ///
    /// The stream ends when the underlying subscription is lost.
    async fn subscribe(&self) -> CacheResult<BoxStream<'static, CacheEvent>>;
}
