//! Hot cache: latest value per key, in memory, with TTL staleness.
//!
//! Entries are whole `Arc<T>` values swapped under a short write lock, so a
//! reader always sees either the previous or the new complete value. The cache
//! is a disposable view: losing it costs nothing but a cold read path until the
//! next collection cycle repopulates it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::SharedClock;

/// Default TTL for hot-cache entries.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// A cached value plus freshness information.
#[derive(Debug, Clone)]
pub struct CacheHit<T> {
    pub value: Arc<T>,
    pub stored_at: DateTime<Utc>,
    /// Time since the entry was stored.
    pub age: Duration,
    /// True when `age` exceeds the TTL.
    pub stale: bool,
}

#[derive(Debug)]
struct CacheEntry<T> {
    value: Arc<T>,
    stored_at: DateTime<Utc>,
}

/// Keyed latest-value cache.
pub struct HotCache<T> {
    entries: RwLock<HashMap<String, CacheEntry<T>>>,
    ttl: Duration,
    clock: SharedClock,
}

impl<T> std::fmt::Debug for HotCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotCache")
            .field("ttl", &self.ttl)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl<T> HotCache<T> {
    pub fn new(ttl: Duration, clock: SharedClock) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Latest entry for `key`, fresh or stale.
    pub fn get(&self, key: &str) -> Option<CacheHit<T>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let entry = entries.get(key)?;
        Some(self.hit(entry))
    }

    /// Latest entry for `key` only if it is within the TTL.
    pub fn get_fresh(&self, key: &str) -> Option<Arc<T>> {
        self.get(key).filter(|hit| !hit.stale).map(|hit| hit.value)
    }

    /// Replace the entry for `key`.
    pub fn set(&self, key: &str, value: T) {
        self.set_arc(key, Arc::new(value));
    }

    pub fn set_arc(&self, key: &str, value: Arc<T>) {
        let entry = CacheEntry {
            value,
            stored_at: self.clock.now(),
        };
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), entry);
    }

    pub fn remove(&self, key: &str) -> Option<Arc<T>> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(key).map(|entry| entry.value)
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }

    /// Every entry, sorted by key.
    pub fn entries(&self) -> Vec<(String, CacheHit<T>)> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<(String, CacheHit<T>)> = entries
            .iter()
            .map(|(key, entry)| (key.clone(), self.hit(entry)))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn hit(&self, entry: &CacheEntry<T>) -> CacheHit<T> {
        let age = (self.clock.now() - entry.stored_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        CacheHit {
            value: Arc::clone(&entry.value),
            stored_at: entry.stored_at,
            age,
            stale: age > self.ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::clock::ManualClock;

    fn cache() -> (Arc<ManualClock>, HotCache<u32>) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let cache = HotCache::new(Duration::from_secs(60), clock.clone());
        (clock, cache)
    }

    #[test]
    fn test_get_missing() {
        let (_, cache) = cache();
        assert!(cache.get("devnet").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_fresh_then_stale() {
        let (clock, cache) = cache();
        cache.set("devnet", 7);

        let hit = cache.get("devnet").unwrap();
        assert_eq!(*hit.value, 7);
        assert!(!hit.stale);
        assert_eq!(cache.get_fresh("devnet").as_deref(), Some(&7));

        clock.advance(chrono::Duration::seconds(61));
        let hit = cache.get("devnet").unwrap();
        assert!(hit.stale);
        assert_eq!(hit.age, Duration::from_secs(61));
        assert!(cache.get_fresh("devnet").is_none());
    }

    #[test]
    fn test_set_replaces_whole_entry() {
        let (clock, cache) = cache();
        cache.set("devnet", 1);
        let before = cache.get("devnet").unwrap().value;

        clock.advance(chrono::Duration::seconds(90));
        cache.set("devnet", 2);

        // Readers holding the old Arc still see the old value.
        assert_eq!(*before, 1);
        let hit = cache.get("devnet").unwrap();
        assert_eq!(*hit.value, 2);
        assert!(!hit.stale);
    }

    #[test]
    fn test_entries_sorted_and_clear() {
        let (_, cache) = cache();
        cache.set("mainnet", 2);
        cache.set("devnet", 1);
        let keys: Vec<String> = cache.entries().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["devnet", "mainnet"]);

        assert_eq!(cache.remove("devnet").as_deref(), Some(&1));
        cache.clear();
        assert_eq!(cache.len(), 0);
    }
}
