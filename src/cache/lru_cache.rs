use dashmap::DashMap;
use std::{
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::Instant;
use tracing::debug;

/// Cache entry with its own expiry and recency stamp
#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    ttl: Option<Duration>,
    last_used: AtomicU64,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Option<Duration>, stamp: u64) -> Self {
        Self {
            value,
            created_at: Instant::now(),
            ttl,
            last_used: AtomicU64::new(stamp),
        }
    }

    fn is_expired(&self) -> bool {
        self.ttl
            .is_some_and(|ttl| self.created_at.elapsed() >= ttl)
    }
}

#[derive(Debug, Default)]
struct Counters {
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expired_removals: AtomicU64,
}

/// Bounded LRU cache with optional per-entry TTL.
///
/// Cloning shares the underlying storage.
#[derive(Debug)]
pub struct LRUCache<K: Clone + Eq + Hash, V> {
    data: Arc<DashMap<K, CacheEntry<V>>>,
    counters: Arc<Counters>,
    capacity: usize,
    default_ttl: Option<Duration>,
}

impl<K, V> LRUCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            counters: Arc::new(Counters::default()),
            capacity: capacity.max(1),
            default_ttl: None,
        }
    }

    /// Entries inserted with [`insert`](Self::insert) expire after `ttl`.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.insert_with_ttl(key, value, self.default_ttl)
    }

    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Option<Duration>) -> Option<V> {
        if !self.data.contains_key(&key) && self.data.len() >= self.capacity {
            self.cleanup_expired();
            if self.data.len() >= self.capacity {
                self.evict_least_recent();
            }
        }

        let entry = CacheEntry::new(value, ttl, self.tick());
        self.data.insert(key, entry).map(|old| old.value)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let Some(entry) = self.data.get(key) else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if entry.is_expired() {
            drop(entry);
            self.data.remove_if(key, |_, e| e.is_expired());
            self.counters.expired_removals.fetch_add(1, Ordering::Relaxed);
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        entry.last_used.store(self.tick(), Ordering::Relaxed);
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.value.clone())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Removes expired entries and returns how many were dropped
    pub fn cleanup_expired(&self) -> usize {
        let before = self.data.len();
        self.data.retain(|_, entry| !entry.is_expired());
        let removed = before.saturating_sub(self.data.len());

        if removed > 0 {
            self.counters
                .expired_removals
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!("🧹 Removed {} expired cache entries", removed);
        }

        removed
    }

    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expired_removals: self.counters.expired_removals.load(Ordering::Relaxed),
        }
    }

    fn tick(&self) -> u64 {
        self.counters.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn evict_least_recent(&self) {
        let oldest = self
            .data
            .iter()
            .min_by_key(|entry| entry.value().last_used.load(Ordering::Relaxed))
            .map(|entry| entry.key().clone());

        if let Some(key) = oldest {
            if self.data.remove(&key).is_some() {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl<K, V> Clone for LRUCache<K, V>
where
    K: Clone + Eq + Hash,
{
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            counters: self.counters.clone(),
            capacity: self.capacity,
            default_ttl: self.default_ttl,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired_removals: u64,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::time;

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = LRUCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);

        // touch "a" so "b" becomes the oldest
        assert_eq!(cache.get(&"a"), Some(1));
        cache.insert("c", 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"c"), Some(3));
        assert_eq!(cache.metrics().evictions, 1);
    }

    #[test]
    fn test_replacing_key_does_not_evict() {
        let cache = LRUCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);

        assert_eq!(cache.insert("a", 10), Some(1));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"b"), Some(2));
        assert_eq!(cache.metrics().evictions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = LRUCache::new(4).with_ttl(Duration::from_secs(60));
        cache.insert("a", 1);
        cache.insert_with_ttl("forever", 2, None);

        time::advance(Duration::from_secs(61)).await;

        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"forever"), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_expired() {
        let cache = LRUCache::new(4).with_ttl(Duration::from_secs(10));
        cache.insert(1, "x");
        cache.insert(2, "y");
        time::advance(Duration::from_secs(5)).await;
        cache.insert(3, "z");
        time::advance(Duration::from_secs(6)).await;

        assert_eq!(cache.cleanup_expired(), 2);
        assert_eq!(cache.get(&3), Some("z"));
        assert_eq!(cache.metrics().expired_removals, 2);
    }

    #[test]
    fn test_hit_rate() {
        let cache = LRUCache::new(1);
        cache.insert(1, 1);
        cache.get(&1);
        cache.get(&2);

        let metrics = cache.metrics();
        assert_eq!((metrics.hits, metrics.misses), (1, 1));
        assert!((metrics.hit_rate() - 0.5).abs() < f64::EPSILON);
    }
}
