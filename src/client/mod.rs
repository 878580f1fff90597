//! Client side of the three-tier cache.
//!
//! - [`LocalCache`] - Capacity-bounded LRU mirrored into a [`LocalStore`]
//! - [`EventSubscriber`] - SSE consumer applying pushed invalidations
//! - [`ShortenerClient`] - HTTP client that consults the local cache first

pub mod api_client;
pub mod events;
pub mod local_cache;
pub mod lru;
pub mod store;

pub use api_client::ShortenerClient;
pub use events::{EventSubscriber, SseFrame, SseParser};
pub use local_cache::{Clock, LocalCache, LocalCacheStats, ManualClock, SystemClock};
pub use lru::LruCache;
pub use store::{FileStore, LocalCacheItem, LocalStore, MemoryStore, StoreError};

/// Errors surfaced by [`ShortenerClient`] and [`EventSubscriber`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("{status} {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),
}
