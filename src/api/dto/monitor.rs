//! DTOs for the shared cache monitor.

use serde::Serialize;

use crate::infrastructure::cache::CacheEntrySnapshot;

/// Shared cache contents as returned by `GET /monitor/cache`.
#[derive(Debug, Serialize)]
pub struct CacheListResponse {
    pub count: usize,
    pub entries: Vec<CacheEntryDto>,
}

/// One cache key with its value and remaining TTL in seconds.
#[derive(Debug, Serialize)]
pub struct CacheEntryDto {
    pub key: String,
    pub value: Option<String>,
    pub ttl: Option<i64>,
}

impl From<CacheEntrySnapshot> for CacheEntryDto {
    fn from(entry: CacheEntrySnapshot) -> Self {
        Self {
            key: entry.key,
            value: entry.value,
            ttl: entry.ttl,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CacheClearedResponse {
    pub message: String,
    pub deleted: u64,
}

#[derive(Debug, Serialize)]
pub struct CacheKeyDeletedResponse {
    pub message: String,
    pub key: String,
}
