//! Capacity-bounded, time-expiring cache of paginated collections.

use crate::clock::SharedClock;
use crate::config::CacheConfig;
use lru::LruCache;
use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// A cached snapshot of a collection.
#[derive(Clone, Debug)]
pub struct CachedPage<T> {
    /// Items, unique by id, newest-first.
    pub items: Vec<T>,
    /// Server-side size of the collection.
    pub total: usize,
    /// When the items were last known fresh.
    pub timestamp: Instant,
}

/// LRU cache whose entries also expire after a fixed lifetime.
///
/// Reads of expired entries are misses and drop the entry. Both a read hit
/// and an overwrite move the entry to the most-recently-used position; on
/// overflow the least-recently-used entry is evicted.
pub struct BoundedTimedCache<K: Hash + Eq, T> {
    entries: LruCache<K, CachedPage<T>>,
    ttl: Duration,
    clock: SharedClock,
}

impl<K, T> BoundedTimedCache<K, T>
where
    K: Hash + Eq + Clone + fmt::Debug,
    T: Clone,
{
    /// Create a cache from config.
    pub fn new(config: &CacheConfig, clock: SharedClock) -> Self {
        Self::with_capacity(config.max_entries, config.ttl(), clock)
    }

    /// Create a cache holding at most `max_entries` (at least one) entries.
    pub fn with_capacity(max_entries: usize, ttl: Duration, clock: SharedClock) -> Self {
        let cap = NonZeroUsize::new(max_entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(cap),
            ttl,
            clock,
        }
    }

    fn is_expired(&self, page: &CachedPage<T>, now: Instant) -> bool {
        now.saturating_duration_since(page.timestamp) > self.ttl
    }

    /// Look up a collection, promoting it on hit.
    pub fn get(&mut self, key: &K) -> Option<CachedPage<T>> {
        let now = self.clock.now();
        let expired = self.is_expired(self.entries.peek(key)?, now);

        if expired {
            self.entries.pop(key);
            debug!(?key, "cached collection expired");
            return None;
        }

        self.entries.get(key).cloned()
    }

    /// Look up without promoting. Expired entries read as absent.
    pub fn peek(&self, key: &K) -> Option<&CachedPage<T>> {
        let page = self.entries.peek(key)?;
        if self.is_expired(page, self.clock.now()) {
            None
        } else {
            Some(page)
        }
    }

    /// Store a fresh snapshot.
    pub fn put(&mut self, key: K, items: Vec<T>, total: usize) {
        let timestamp = self.clock.now();
        self.insert(key, items, total, timestamp);
    }

    /// Store a snapshot produced by a local, unconfirmed mutation.
    ///
    /// Keeps the freshness timestamp of the entry it replaces so optimistic
    /// writes never extend the lifetime of data the server has not confirmed.
    pub fn put_preserving_timestamp(&mut self, key: K, items: Vec<T>, total: usize) {
        let now = self.clock.now();
        let timestamp = match self.entries.peek(&key) {
            Some(page) if !self.is_expired(page, now) => page.timestamp,
            _ => now,
        };
        self.insert(key, items, total, timestamp);
    }

    fn insert(&mut self, key: K, items: Vec<T>, total: usize, timestamp: Instant) {
        let total = total.max(items.len());
        let page = CachedPage {
            items,
            total,
            timestamp,
        };

        if let Some((evicted, _)) = self.entries.push(key.clone(), page) {
            if evicted != key {
                trace!(?evicted, "evicted least recently used collection");
            }
        }
    }

    /// Promote an entry to most-recently-used. Returns false if absent.
    pub fn touch(&mut self, key: &K) -> bool {
        if self.entries.contains(key) {
            self.entries.promote(key);
            true
        } else {
            false
        }
    }

    /// Remove an entry whose correctness can no longer be verified.
    pub fn invalidate(&mut self, key: &K) -> Option<CachedPage<T>> {
        self.entries.pop(key)
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let now = self.clock.now();
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, page)| self.is_expired(page, now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.entries.pop(key);
        }
        expired.len()
    }

    /// Keys from most- to least-recently used.
    pub fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|(key, _)| key.clone()).collect()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.peek(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn cache(cap: usize, clock: &Arc<ManualClock>) -> BoundedTimedCache<&'static str, u32> {
        BoundedTimedCache::with_capacity(cap, Duration::from_secs(60), clock.clone())
    }

    #[test]
    fn test_read_promotes_entry() {
        let clock = ManualClock::new();
        let mut cache = cache(2, &clock);

        cache.put("a", vec![1], 1);
        cache.put("b", vec![2], 1);
        assert!(cache.get(&"a").is_some());
        cache.put("c", vec![3], 1);

        assert!(cache.contains(&"a"));
        assert!(!cache.contains(&"b"));
        assert!(cache.contains(&"c"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_overwrite_promotes_entry() {
        let clock = ManualClock::new();
        let mut cache = cache(2, &clock);

        cache.put("a", vec![1], 1);
        cache.put("b", vec![2], 1);
        cache.put("a", vec![1, 4], 2);
        cache.put("c", vec![3], 1);

        assert_eq!(cache.keys(), vec!["c", "a"]);
    }

    #[test]
    fn test_touch_promotes_without_reading() {
        let clock = ManualClock::new();
        let mut cache = cache(2, &clock);

        cache.put("a", vec![1], 1);
        cache.put("b", vec![2], 1);
        assert!(cache.touch(&"a"));
        assert!(!cache.touch(&"missing"));
        cache.put("c", vec![3], 1);

        assert_eq!(cache.keys(), vec!["c", "a"]);
    }

    #[test]
    fn test_expired_read_is_miss_and_removes() {
        let clock = ManualClock::new();
        let mut cache = cache(4, &clock);

        cache.put("a", vec![1], 1);
        clock.advance(Duration::from_secs(60));
        assert!(cache.get(&"a").is_some());

        clock.advance(Duration::from_millis(1));
        assert!(cache.get(&"a").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_optimistic_write_keeps_timestamp() {
        let clock = ManualClock::new();
        let mut cache = cache(4, &clock);

        cache.put("a", vec![1], 1);
        clock.advance(Duration::from_secs(40));
        cache.put_preserving_timestamp("a", vec![2, 1], 2);

        clock.advance(Duration::from_secs(30));
        assert!(cache.get(&"a").is_none());
    }

    #[test]
    fn test_optimistic_write_on_miss_is_fresh() {
        let clock = ManualClock::new();
        let mut cache = cache(4, &clock);

        cache.put_preserving_timestamp("a", vec![1], 1);
        clock.advance(Duration::from_secs(30));
        assert_eq!(cache.get(&"a").unwrap().items, vec![1]);
    }

    #[test]
    fn test_total_never_below_item_count() {
        let clock = ManualClock::new();
        let mut cache = cache(4, &clock);

        cache.put("a", vec![1, 2, 3], 1);
        assert_eq!(cache.get(&"a").unwrap().total, 3);
    }

    #[test]
    fn test_purge_expired() {
        let clock = ManualClock::new();
        let mut cache = cache(4, &clock);

        cache.put("old", vec![1], 1);
        clock.advance(Duration::from_secs(45));
        cache.put("new", vec![2], 1);
        clock.advance(Duration::from_secs(30));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.keys(), vec!["new"]);
    }

    #[test]
    fn test_invalidate() {
        let clock = ManualClock::new();
        let mut cache = cache(4, &clock);

        cache.put("a", vec![1], 1);
        assert!(cache.invalidate(&"a").is_some());
        assert!(cache.get(&"a").is_none());
    }

    #[test]
    fn test_zero_capacity_clamps_to_one() {
        let clock = ManualClock::new();
        let mut cache = cache(0, &clock);

        cache.put("a", vec![1], 1);
        cache.put("b", vec![2], 1);
        assert_eq!(cache.capacity(), 1);
        assert_eq!(cache.keys(), vec!["b"]);
    }
}
