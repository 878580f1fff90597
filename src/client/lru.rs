//! Capacity-bounded recency map.

use std::collections::{BTreeMap, HashMap};

/// Least-recently-used map keyed by string.
///
/// Every `get` or `put` promotes the key to most recent. Inserting a new key
/// into a full map evicts the least recent one and hands it back so the
/// caller can mirror the eviction elsewhere.
#[derive(Debug)]
pub struct LruCache<V> {
    capacity: usize,
    entries: HashMap<String, (V, u64)>,
    order: BTreeMap<u64, String>,
    tick: u64,
}

impl<V> LruCache<V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: BTreeMap::new(),
            tick: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns the value and marks it most recently used.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        self.get_mut(key).map(|v| &*v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        let tick = self.next_tick();
        let (value, stamp) = self.entries.get_mut(key)?;

        self.order.remove(stamp);
        *stamp = tick;
        self.order.insert(tick, key.to_string());

        Some(value)
    }

    /// Reads without touching recency.
    pub fn peek(&self, key: &str) -> Option<&V> {
        self.entries.get(key).map(|(value, _)| value)
    }

    /// Inserts or replaces `key` as most recent.
    ///
    /// Returns the evicted entry when a new key pushed the map over capacity.
    pub fn put(&mut self, key: impl Into<String>, value: V) -> Option<(String, V)> {
        let key = key.into();
        let tick = self.next_tick();

        if let Some((_, old_stamp)) = self.entries.remove(&key) {
            self.order.remove(&old_stamp);
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.pop_lru()
        } else {
            None
        };

        self.order.insert(tick, key.clone());
        self.entries.insert(key, (value, tick));

        evicted
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        let (value, stamp) = self.entries.remove(key)?;
        self.order.remove(&stamp);
        Some(value)
    }

    /// Removes and returns the least recently used entry.
    pub fn pop_lru(&mut self) -> Option<(String, V)> {
        let (_, key) = self.order.pop_first()?;
        let (value, _) = self.entries.remove(&key)?;
        Some((key, value))
    }

    /// Keys from least to most recently used.
    pub fn keys_lru(&self) -> impl Iterator<Item = &str> {
        self.order.values().map(String::as_str)
    }

    pub fn least_recent(&self) -> Option<(&str, &V)> {
        let key = self.order.values().next()?;
        self.peek(key).map(|v| (key.as_str(), v))
    }

    pub fn most_recent(&self) -> Option<(&str, &V)> {
        let key = self.order.values().next_back()?;
        self.peek(key).map(|v| (key.as_str(), v))
    }

    /// Removes every entry matching `predicate`, returning their keys.
    pub fn remove_where(&mut self, mut predicate: impl FnMut(&str, &V) -> bool) -> Vec<String> {
        let doomed: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, (value, _))| predicate(key, value))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            self.remove(key);
        }
        doomed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}
