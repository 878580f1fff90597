//! Shared cache holding both directions of every mapping.
//!
//! Provides a [`SharedCache`] trait with two implementations:
//! - [`RedisCache`] - Production Redis-backed cache with pub/sub events
//! - [`MemoryCache`] - In-process cache, used when Redis is unavailable and in tests

mod memory_cache;
mod redis_cache;
mod service;

pub use memory_cache::MemoryCache;
pub use redis_cache::RedisCache;
pub use service::{
    CACHE_EVENTS_CHANNEL, CacheEntrySnapshot, CacheError, CacheResult, SCAN_PAGE_SIZE,
    SharedCache, is_managed_key,
};

#[cfg(test)]
pub use service::MockSharedCache;
