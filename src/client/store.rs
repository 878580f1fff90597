//! Durable mirrors for the local cache.
//!
//! Keys are stored under [`STORE_PREFIX`] so a store shared with other data
//! can be enumerated and cleared without touching foreign entries.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const STORE_PREFIX: &str = "url_cache_";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One locally cached value with its bookkeeping. Times are Unix
/// milliseconds, `ttl` is milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalCacheItem {
    pub value: String,
    pub timestamp: i64,
    pub ttl: i64,
    pub last_accessed: i64,
    pub access_count: u64,
}

impl LocalCacheItem {
    pub fn new(value: impl Into<String>, now: i64, ttl: i64) -> Self {
        Self {
            value: value.into(),
            timestamp: now,
            ttl,
            last_accessed: now,
            access_count: 1,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now - self.timestamp > self.ttl
    }
}

/// Key/value persistence behind the local cache.
///
/// Keys passed in are unprefixed; implementations add [`STORE_PREFIX`].
pub trait LocalStore: Send + Sync {
    fn load_all(&self) -> StoreResult<Vec<(String, LocalCacheItem)>>;

    fn put(&self, key: &str, item: &LocalCacheItem) -> StoreResult<()>;

    fn remove(&self, key: &str) -> StoreResult<()>;

    /// Removes every prefixed key.
    fn clear(&self) -> StoreResult<()>;
}

fn prefixed(key: &str) -> String {
    format!("{}{}", STORE_PREFIX, key)
}

fn unprefixed(entries: HashMap<String, String>) -> StoreResult<Vec<(String, LocalCacheItem)>> {
    entries
        .into_iter()
        .filter_map(|(key, raw)| {
            key.strip_prefix(STORE_PREFIX)
                .map(|k| (k.to_string(), raw))
        })
        .map(|(key, raw)| -> StoreResult<(String, LocalCacheItem)> {
            Ok((key, serde_json::from_str(&raw)?))
        })
        .collect()
}

/// Process-local store, for tests and short-lived clients.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of prefixed keys held.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .map(|e| e.keys().filter(|k| k.starts_with(STORE_PREFIX)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw access, for seeding foreign or stale entries.
    pub fn insert_raw(&self, key: &str, raw: &str) -> StoreResult<()> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .insert(key.to_string(), raw.to_string());
        Ok(())
    }

    pub fn contains_raw(&self, key: &str) -> bool {
        self.entries
            .lock()
            .map(|e| e.contains_key(key))
            .unwrap_or(false)
    }
}

impl LocalStore for MemoryStore {
    fn load_all(&self) -> StoreResult<Vec<(String, LocalCacheItem)>> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?.clone();
        unprefixed(entries)
    }

    fn put(&self, key: &str, item: &LocalCacheItem) -> StoreResult<()> {
        let raw = serde_json::to_string(item)?;
        self.entries
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .insert(prefixed(key), raw);
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .remove(&prefixed(key));
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .retain(|k, _| !k.starts_with(STORE_PREFIX));
        Ok(())
    }
}

/// Store persisted as one JSON object in a file.
///
/// The whole file is rewritten on every change, through a temporary file
/// renamed over the original. The cache it mirrors holds a handful of
/// entries.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Opens `path`, starting empty if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or is not a JSON object.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();

        let entries = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => HashMap::new(),
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn mutate(&self, f: impl FnOnce(&mut HashMap<String, String>)) -> StoreResult<()> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        f(&mut entries);

        let raw = serde_json::to_string_pretty(&*entries)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl LocalStore for FileStore {
    fn load_all(&self) -> StoreResult<Vec<(String, LocalCacheItem)>> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?.clone();
        unprefixed(entries)
    }

    fn put(&self, key: &str, item: &LocalCacheItem) -> StoreResult<()> {
        let raw = serde_json::to_string(item)?;
        self.mutate(|entries| {
            entries.insert(prefixed(key), raw);
        })
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.mutate(|entries| {
            entries.remove(&prefixed(key));
        })
    }

    fn clear(&self) -> StoreResult<()> {
        self.mutate(|entries| entries.retain(|k, _| !k.starts_with(STORE_PREFIX)))
    }
}
