//! Time-based cache with optional capacity bound

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

/// A cached value and when it was written.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    pub value: V,
    pub stored_at: Instant,
}

impl<V> CacheEntry<V> {
    pub fn age(&self) -> Duration {
        self.stored_at.elapsed()
    }
}

/// Map whose entries go stale `ttl` after they were written.
///
/// Stale entries are never returned by [`TtlCache::get`]; they stay until
/// overwritten, purged, or evicted. With `max_entries > 0`, inserting a new
/// key into a full cache first purges stale entries, then evicts the oldest.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    ttl: Duration,
    /// 0 = unbounded
    max_entries: usize,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            max_entries,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh value for `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries
            .get(key)
            .filter(|entry| self.fresh(entry))
            .map(|entry| entry.value.clone())
    }

    /// Entry for `key`, fresh or not.
    pub fn get_entry(&self, key: &K) -> Option<&CacheEntry<V>> {
        self.entries.get(key)
    }

    pub fn is_fresh(&self, key: &K) -> bool {
        self.entries.get(key).is_some_and(|entry| self.fresh(entry))
    }

    pub fn insert(&mut self, key: K, value: V) {
        if self.max_entries > 0
            && self.entries.len() >= self.max_entries
            && !self.entries.contains_key(&key)
        {
            self.purge_expired();
            if self.entries.len() >= self.max_entries {
                self.evict_oldest();
            }
        }
        self.entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|entry| entry.value)
    }

    /// Drop stale entries; returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn fresh(&self, entry: &CacheEntry<V>) -> bool {
        entry.stored_at.elapsed() < self.ttl
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.stored_at)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}
