//! In-process shared cache.
//!
//! Stands in for Redis when it is not configured or unreachable at startup,
//! and backs the test suite.

use super::service::{
    CacheEntrySnapshot, CacheError, CacheResult, SharedCache, is_managed_key,
};
use crate::domain::cache_event::CacheEvent;
use crate::domain::entities::Direction;
use async_trait::async_trait;
use futures_util::{StreamExt, stream::BoxStream};
use moka::sync::Cache;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

const EVENT_BUFFER: usize = 1024;

/// Upper bound on resident keys; each mapping takes two.
pub const DEFAULT_MAX_CAPACITY: u64 = 100_000;

#[derive(Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// Moka-backed key/value cache with a fixed TTL and broadcast events.
///
/// Expired entries are evicted by moka's housekeeping, not only on access.
/// Multi-key mutations take `write_gate` so readers never see half of a
/// pair rewritten.
pub struct MemoryCache {
    entries: Cache<String, Entry>,
    write_gate: Mutex<()>,
    events: broadcast::Sender<CacheEvent>,
    ttl: Duration,
    unavailable: AtomicBool,
}

impl MemoryCache {
    pub fn new(ttl_seconds: u64) -> Self {
        Self::with_options(Duration::from_secs(ttl_seconds), DEFAULT_MAX_CAPACITY)
    }

    pub fn with_options(ttl: Duration, max_capacity: u64) -> Self {
        debug!(
            ttl_secs = ttl.as_secs(),
            max_capacity, "Using in-memory shared cache"
        );
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            entries: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
            write_gate: Mutex::new(()),
            events,
            ttl,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent operation fail with [`CacheError::ConnectionError`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries still held in memory, live or awaiting eviction.
    pub fn resident_entries(&self) -> u64 {
        self.entries.entry_count()
    }

    /// Runs pending evictions, including expired entries.
    pub fn purge_expired(&self) {
        self.entries.run_pending_tasks();
    }

    /// Number of open event subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    fn ensure_available(&self) -> CacheResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::ConnectionError("cache unavailable".to_string()));
        }
        Ok(())
    }

    fn write_lock(&self) -> CacheResult<MutexGuard<'_, ()>> {
        self.ensure_available()?;
        self.write_gate
            .lock()
            .map_err(|_| CacheError::OperationError("cache lock poisoned".to_string()))
    }

    fn write_pair(&self, original_url: &str, short_code: &str) {
        let expires_at = Instant::now() + self.ttl;
        self.entries.insert(
            Direction::Original.cache_key(original_url),
            Entry {
                value: short_code.to_string(),
                expires_at,
            },
        );
        self.entries.insert(
            Direction::Short.cache_key(short_code),
            Entry {
                value: original_url.to_string(),
                expires_at,
            },
        );
    }

    fn publish(&self, event: CacheEvent) {
        // No receivers is not an error.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl SharedCache for MemoryCache {
    async fn get(&self, direction: Direction, key: &str) -> CacheResult<Option<String>> {
        self.ensure_available()?;
        Ok(self
            .entries
            .get(&direction.cache_key(key))
            .map(|entry| entry.value))
    }

    async fn set(&self, original_url: &str, short_code: &str) -> CacheResult<()> {
        {
            let _gate = self.write_lock()?;
            self.write_pair(original_url, short_code);
        }
        self.publish(CacheEvent::set(original_url, short_code));
        Ok(())
    }

    async fn invalidate(&self, original_url: &str, short_code: &str) -> CacheResult<()> {
        {
            let _gate = self.write_lock()?;
            self.entries
                .invalidate(&Direction::Original.cache_key(original_url));
            self.entries.invalidate(&Direction::Short.cache_key(short_code));
        }
        self.publish(CacheEvent::deleted(original_url, short_code));
        Ok(())
    }

    async fn rename_short(
        &self,
        original_url: &str,
        old_short: &str,
        new_short: &str,
    ) -> CacheResult<()> {
        {
            let _gate = self.write_lock()?;
            self.entries.invalidate(&Direction::Short.cache_key(old_short));
            self.write_pair(original_url, new_short);
        }
        self.publish(CacheEvent::renamed(original_url, old_short, new_short));
        Ok(())
    }

    async fn rename_original(
        &self,
        old_original: &str,
        new_original: &str,
        short_code: &str,
    ) -> CacheResult<()> {
        {
            let _gate = self.write_lock()?;
            self.entries
                .invalidate(&Direction::Original.cache_key(old_original));
            self.write_pair(new_original, short_code);
        }
        self.publish(CacheEvent::deleted(old_original, short_code));
        self.publish(CacheEvent::set(new_original, short_code));
        Ok(())
    }

    async fn scan_all(&self) -> CacheResult<Vec<CacheEntrySnapshot>> {
        self.ensure_available()?;
        let now = Instant::now();

        let mut snapshot: Vec<CacheEntrySnapshot> = self
            .entries
            .iter()
            .filter(|(key, entry)| is_managed_key(key) && entry.expires_at > now)
            .map(|(key, entry)| CacheEntrySnapshot {
                key: key.as_ref().clone(),
                ttl: Some(entry.expires_at.duration_since(now).as_secs() as i64),
                value: Some(entry.value),
            })
            .collect();
        snapshot.sort_by(|a, b| a.key.cmp(&b.key));

        Ok(snapshot)
    }

    async fn delete_key(&self, key: &str) -> CacheResult<bool> {
        if !is_managed_key(key) {
            return Ok(false);
        }
        let _gate = self.write_lock()?;
        Ok(self.entries.remove(key).is_some())
    }

    /// Removes live managed keys, returning how many were removed.
    async fn clear(&self) -> CacheResult<u64> {
        let _gate = self.write_lock()?;
        let keys: Vec<_> = self
            .entries
            .iter()
            .map(|(key, _)| key)
            .filter(|key| is_managed_key(key))
            .collect();

        let mut removed = 0;
        for key in keys {
            if self.entries.remove(key.as_ref()).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn health_check(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }

    async fn subscribe(&self) -> CacheResult<BoxStream<'static, CacheEvent>> {
        self.ensure_available()?;

        let stream = BroadcastStream::new(self.events.subscribe()).filter_map(|item| async move {
            match item {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %e, "Cache event subscriber lagged");
                    None
                }
            }
        });

        Ok(stream.boxed())
    }
}
