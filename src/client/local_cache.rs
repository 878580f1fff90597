//! Client-side LRU cache consulted before any network round trip.
//!
//! Entries exist in both directions, keyed by the original URL (value: short
//! code) and by the short code (value: original URL). The recency structure
//! and the durable store always hold the same key set, bounded by capacity.

use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::lru::LruCache;
use crate::client::store::{LocalCacheItem, LocalStore, StoreResult};
use crate::domain::cache_event::{CacheEvent, UrlUpdate};

pub const DEFAULT_CAPACITY: usize = 5;
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Source of wall-clock milliseconds.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Hand-driven clock.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self(AtomicI64::new(start))
    }

    pub fn advance(&self, by: Duration) {
        self.0.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryStats {
    pub key: String,
    pub access_count: u64,
    pub last_accessed: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalCacheStats {
    pub count: usize,
    pub capacity: usize,
    pub ttl_secs: u64,
    pub most_recent: Option<EntryStats>,
    pub least_recent: Option<EntryStats>,
}

pub struct LocalCache {
    entries: Mutex<LruCache<LocalCacheItem>>,
    store: Arc<dyn LocalStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl LocalCache {
    /// Opens a cache over `store` with the default capacity and TTL.
    pub fn open(store: Arc<dyn LocalStore>) -> Self {
        Self::with_options(store, DEFAULT_CAPACITY, DEFAULT_TTL, Arc::new(SystemClock))
    }

    /// Opens a cache, loading unexpired entries from `store`.
    ///
    /// Expired entries are deleted from the store. When the store holds more
    /// than `capacity` live entries, the least recently accessed ones are
    /// deleted too.
    pub fn with_options(
        store: Arc<dyn LocalStore>,
        capacity: usize,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = Self {
            entries: Mutex::new(LruCache::new(capacity)),
            store,
            clock,
            ttl,
        };
        cache.load();
        cache
    }

    fn load(&self) {
        let mut loaded = match self.store.load_all() {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "Local store unreadable, starting empty");
                return;
            }
        };

        let now = self.clock.now_millis();
        loaded.sort_by_key(|(_, item)| item.last_accessed);

        let mut entries = self.lock();
        for (key, item) in loaded {
            if item.is_expired(now) {
                self.persist(self.store.remove(&key));
                continue;
            }
            if let Some((evicted, _)) = entries.put(key, item) {
                self.persist(self.store.remove(&evicted));
            }
        }
        debug!(count = entries.len(), "Local cache loaded");
    }

    /// Returns the cached value for `key`, updating its access bookkeeping.
    ///
    /// Expired entries are removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now_millis();
        let mut entries = self.lock();

        let expired = entries.peek(key)?.is_expired(now);
        if expired {
            entries.remove(key);
            self.persist(self.store.remove(key));
            return None;
        }

        let item = entries.get_mut(key)?;
        item.last_accessed = now;
        item.access_count += 1;

        let value = item.value.clone();
        let snapshot = item.clone();
        self.persist(self.store.put(key, &snapshot));

        Some(value)
    }

    /// Caches `value` under `key` with a fresh TTL.
    pub fn put(&self, key: &str, value: &str) {
        let item = LocalCacheItem::new(value, self.clock.now_millis(), self.ttl_millis());
        let mut entries = self.lock();
        self.insert(&mut entries, key, item);
    }

    /// Caches both directions of a mapping.
    pub fn put_mapping(&self, original_url: &str, short_code: &str) {
        let now = self.clock.now_millis();
        let mut entries = self.lock();

        self.insert(
            &mut entries,
            original_url,
            LocalCacheItem::new(short_code, now, self.ttl_millis()),
        );
        self.insert(
            &mut entries,
            short_code,
            LocalCacheItem::new(original_url, now, self.ttl_millis()),
        );
    }

    pub fn remove(&self, key: &str) -> bool {
        let removed = self.lock().remove(key).is_some();
        self.persist(self.store.remove(key));
        removed
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
        self.persist(self.store.clear());
    }

    /// Applies a pushed cache mutation to local entries.
    ///
    /// Updates only rewrite mappings this client already holds in either
    /// direction; deletions drop both directions unconditionally.
    pub fn handle_event(&self, event: &CacheEvent) {
        let now = self.clock.now_millis();
        let mut entries = self.lock();

        match event {
            CacheEvent::UrlUpdated(UrlUpdate::Set {
                original_url,
                short_code,
            }) => {
                if entries.contains(original_url) || entries.contains(short_code) {
                    self.drop_stale_partner(&mut entries, short_code, original_url);
                    self.drop_stale_partner(&mut entries, original_url, short_code);
                    self.insert_pair(&mut entries, original_url, short_code, now);
                }
            }
            CacheEvent::UrlUpdated(UrlUpdate::Renamed {
                original_url,
                old_short_code,
                new_short_code,
            }) => {
                let held_old = entries.remove(old_short_code).is_some();
                self.persist(self.store.remove(old_short_code));

                if held_old || entries.contains(original_url) {
                    self.insert_pair(&mut entries, original_url, new_short_code, now);
                }
            }
            CacheEvent::UrlDeleted {
                original_url,
                short_code,
            } => {
                for key in [original_url, short_code] {
                    entries.remove(key);
                    self.persist(self.store.remove(key));
                }
            }
        }

        debug!(event = event.event_type(), url = %event.original_url(), "Local cache updated from push");
    }

    /// Removes every expired entry, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_millis();
        let removed = self.lock().remove_where(|_, item| item.is_expired(now));

        for key in &removed {
            self.persist(self.store.remove(key));
        }
        if !removed.is_empty() {
            debug!(removed = removed.len(), "Expired local entries swept");
        }
        removed.len()
    }

    /// Sweeps expired entries every `interval` until the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else { break };
                cache.sweep();
            }
        })
    }

    pub fn stats(&self) -> LocalCacheStats {
        let entries = self.lock();
        let describe = |(key, item): (&str, &LocalCacheItem)| EntryStats {
            key: key.to_string(),
            access_count: item.access_count,
            last_accessed: item.last_accessed,
        };

        LocalCacheStats {
            count: entries.len(),
            capacity: entries.capacity(),
            ttl_secs: self.ttl.as_secs(),
            most_recent: entries.most_recent().map(describe),
            least_recent: entries.least_recent().map(describe),
        }
    }

    /// When `key` is being rebound to `value`, removes the entry it used to
    /// point at if that entry still points back at `key`.
    fn drop_stale_partner(&self, entries: &mut LruCache<LocalCacheItem>, key: &str, value: &str) {
        let Some(previous) = entries
            .peek(key)
            .map(|item| item.value.clone())
            .filter(|previous| previous != value)
        else {
            return;
        };

        if entries
            .peek(&previous)
            .is_some_and(|partner| partner.value == key)
        {
            entries.remove(&previous);
            self.persist(self.store.remove(&previous));
        }
    }

    fn insert_pair(
        &self,
        entries: &mut LruCache<LocalCacheItem>,
        original_url: &str,
        short_code: &str,
        now: i64,
    ) {
        let ttl = self.ttl_millis();
        self.insert(entries, original_url, LocalCacheItem::new(short_code, now, ttl));
        self.insert(entries, short_code, LocalCacheItem::new(original_url, now, ttl));
    }

    fn insert(&self, entries: &mut LruCache<LocalCacheItem>, key: &str, item: LocalCacheItem) {
        self.persist(self.store.put(key, &item));
        if let Some((evicted, _)) = entries.put(key, item) {
            self.persist(self.store.remove(&evicted));
        }
    }

    fn ttl_millis(&self) -> i64 {
        self.ttl.as_millis() as i64
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<LocalCacheItem>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, result: StoreResult<()>) {
        if let Err(e) = result {
            warn!(error = %e, "Local store write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::store::MemoryStore;

    struct Fixture {
        cache: LocalCache,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
    }

    fn fixture(capacity: usize, ttl: Duration) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(1_000_000));
        let cache = LocalCache::with_options(store.clone(), capacity, ttl, clock.clone());
        Fixture {
            cache,
            store,
            clock,
        }
    }

    #[test]
    fn test_capacity_enforced_in_both_tiers() {
        let f = fixture(5, DEFAULT_TTL);

        for i in 0..8 {
            f.cache.put(&format!("k{}", i), "v");
        }

        assert_eq!(f.cache.len(), 5);
        assert_eq!(f.store.len(), 5);
        assert!(!f.cache.contains("k0"));
        assert!(!f.store.contains_raw("url_cache_k2"));
        assert!(f.store.contains_raw("url_cache_k7"));
    }

    #[test]
    fn test_get_promotes_entry() {
        let f = fixture(2, DEFAULT_TTL);
        f.cache.put("a", "1");
        f.cache.put("b", "2");

        assert_eq!(f.cache.get("a").as_deref(), Some("1"));
        f.cache.put("c", "3");

        assert!(f.cache.contains("a"));
        assert!(!f.cache.contains("b"));
        assert!(!f.store.contains_raw("url_cache_b"));
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let f = fixture(5, Duration::from_secs(60));
        f.cache.put("abc1234", "https://example.com");

        f.clock.advance(Duration::from_secs(60));
        assert!(f.cache.get("abc1234").is_some());

        f.clock.advance(Duration::from_millis(1));
        assert!(f.cache.get("abc1234").is_none());
        assert!(f.store.is_empty());
    }

    #[test]
    fn test_get_tracks_access() {
        let f = fixture(5, DEFAULT_TTL);
        f.cache.put("a", "1");
        f.clock.advance(Duration::from_secs(5));

        f.cache.get("a");
        f.cache.get("a");

        let stats = f.cache.stats();
        let most = stats.most_recent.unwrap();
        assert_eq!(most.key, "a");
        assert_eq!(most.access_count, 3);
        assert_eq!(most.last_accessed, 1_005_000);

        let stored = f.store.load_all().unwrap();
        assert_eq!(stored[0].1.access_count, 3);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let f = fixture(5, Duration::from_secs(10));
        f.cache.put("old", "1");
        f.clock.advance(Duration::from_secs(8));
        f.cache.put("new", "2");
        f.clock.advance(Duration::from_secs(5));

        assert_eq!(f.cache.sweep(), 1);
        assert!(!f.cache.contains("old"));
        assert!(f.cache.contains("new"));
        assert_eq!(f.store.len(), 1);
    }

    #[test]
    fn test_reload_restores_recency_and_drops_expired() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));
        store.put("stale", &LocalCacheItem::new("x", 0, 10)).unwrap();
        store.put("older", &LocalCacheItem::new("1", 90, 1_000)).unwrap();
        store.put("newer", &LocalCacheItem::new("2", 95, 1_000)).unwrap();
        store.put("newest", &LocalCacheItem::new("3", 99, 1_000)).unwrap();
        clock.advance(Duration::from_millis(100));

        let cache = LocalCache::with_options(store.clone(), 2, DEFAULT_TTL, clock);

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains("stale"));
        assert!(!cache.contains("older"));
        assert_eq!(store.len(), 2);
        assert_eq!(cache.stats().least_recent.unwrap().key, "newer");
    }

    #[test]
    fn test_rename_event_rewrites_held_mapping() {
        let f = fixture(5, DEFAULT_TTL);
        f.cache.put_mapping("https://example.com", "abc1234");

        f.cache.handle_event(&CacheEvent::renamed("https://example.com", "abc1234", "promo01"));

        assert!(f.cache.get("abc1234").is_none());
        assert_eq!(f.cache.get("https://example.com").as_deref(), Some("promo01"));
        assert_eq!(f.cache.get("promo01").as_deref(), Some("https://example.com"));
        assert!(!f.store.contains_raw("url_cache_abc1234"));
    }

    #[test]
    fn test_update_for_unknown_mapping_is_ignored() {
        let f = fixture(5, DEFAULT_TTL);
        f.cache.put_mapping("https://mine.example", "mine001");

        f.cache.handle_event(&CacheEvent::set("https://other.example", "oth0001"));
        f.cache.handle_event(&CacheEvent::renamed("https://other.example", "oth0001", "oth0002"));

        assert_eq!(f.cache.len(), 2);
        assert!(!f.cache.contains("oth0002"));
    }

    #[test]
    fn test_set_event_refreshes_held_code() {
        let f = fixture(5, DEFAULT_TTL);
        f.cache.put("abc1234", "https://old.example");

        f.cache.handle_event(&CacheEvent::set("https://new.example", "abc1234"));

        assert_eq!(f.cache.get("abc1234").as_deref(), Some("https://new.example"));
        assert_eq!(f.cache.get("https://new.example").as_deref(), Some("abc1234"));
    }

    #[test]
    fn test_set_event_drops_previous_original() {
        let f = fixture(5, DEFAULT_TTL);
        f.cache.put_mapping("https://old.example", "abc1234");
        f.cache.put_mapping("https://keep.example", "keep001");

        f.cache.handle_event(&CacheEvent::set("https://new.example", "abc1234"));

        assert!(!f.cache.contains("https://old.example"));
        assert!(!f.store.contains_raw("url_cache_https://old.example"));
        assert_eq!(f.cache.get("abc1234").as_deref(), Some("https://new.example"));
        assert_eq!(f.cache.get("https://new.example").as_deref(), Some("abc1234"));
        assert_eq!(f.cache.get("keep001").as_deref(), Some("https://keep.example"));
        assert_eq!(f.cache.len(), 4);
    }

    #[test]
    fn test_set_event_drops_previous_code() {
        let f = fixture(5, DEFAULT_TTL);
        f.cache.put_mapping("https://example.com", "abc1234");

        f.cache.handle_event(&CacheEvent::set("https://example.com", "promo01"));

        assert!(!f.cache.contains("abc1234"));
        assert_eq!(f.cache.get("promo01").as_deref(), Some("https://example.com"));
        assert_eq!(f.store.len(), 2);
    }

    #[test]
    fn test_delete_event_drops_both_directions() {
        let f = fixture(5, DEFAULT_TTL);
        f.cache.put_mapping("https://example.com", "abc1234");
        f.cache.put_mapping("https://keep.example", "keep001");

        f.cache.handle_event(&CacheEvent::deleted("https://example.com", "abc1234"));

        assert!(!f.cache.contains("https://example.com"));
        assert!(!f.cache.contains("abc1234"));
        assert_eq!(f.cache.len(), 2);
        assert_eq!(f.store.len(), 2);
    }

    #[test]
    fn test_clear_empties_both_tiers() {
        let f = fixture(5, DEFAULT_TTL);
        f.cache.put_mapping("https://example.com", "abc1234");

        f.cache.clear();

        assert!(f.cache.is_empty());
        assert!(f.store.is_empty());
        assert!(f.cache.stats().most_recent.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_on_interval() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let cache = Arc::new(LocalCache::with_options(
            store.clone(),
            5,
            Duration::from_secs(1),
            clock.clone(),
        ));
        cache.put("a", "1");
        clock.advance(Duration::from_secs(2));

        let sweeper = cache.spawn_sweeper(SWEEP_INTERVAL);
        tokio::time::sleep(SWEEP_INTERVAL + Duration::from_secs(1)).await;

        assert!(cache.is_empty());
        assert!(store.is_empty());
        sweeper.abort();
    }
}
