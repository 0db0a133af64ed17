//! Thread-safe LRU cache with a cost budget
//!
//! Entries carry a caller-supplied cost (bytes, KiB, anything additive). When
//! the summed cost exceeds the budget the least recently used entries are
//! evicted until it fits again. Recency order is kept by the `lru` crate; this
//! wrapper owns the cost bookkeeping and the lock.

use parking_lot::Mutex;
use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;

/// A thread-safe LRU cache bounded by total cost rather than entry count
pub struct LruCache<K: Hash + Eq, V> {
    inner: Mutex<LruCacheInner<K, V>>,
}

struct LruCacheInner<K: Hash + Eq, V> {
    entries: lru::LruCache<K, (V, usize)>,
    total_cost: usize,
    max_cost: usize,
}

impl<K: Hash + Eq, V: Clone> LruCache<K, V> {
    /// Create a new LRU cache with the specified cost budget
    pub fn new(max_cost: usize) -> Self {
        Self {
            inner: Mutex::new(LruCacheInner {
                entries: lru::LruCache::unbounded(),
                total_cost: 0,
                max_cost,
            }),
        }
    }

    /// Get a value from the cache, updating its position to most recently used
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut inner = self.inner.lock();
        inner.entries.get(key).map(|(value, _)| value.clone())
    }

    /// Insert a value, evicting least recently used entries while over budget.
    /// Returns the number of evicted entries.
    pub fn insert(&self, key: K, value: V, cost: usize) -> usize {
        let mut inner = self.inner.lock();
        inner.insert(key, value, cost)
    }

    /// Drop a single entry
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut inner = self.inner.lock();
        let (value, cost) = inner.entries.pop(key)?;
        inner.total_cost = inner.total_cost.saturating_sub(cost);
        Some(value)
    }

    /// Get the current summed cost of resident entries
    pub fn total_cost(&self) -> usize {
        self.inner.lock().total_cost
    }

    /// Get the cost budget
    pub fn max_cost(&self) -> usize {
        self.inner.lock().max_cost
    }

    /// Get the number of items in the cache
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all items from the cache
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.total_cost = 0;
    }
}

impl<K: Hash + Eq, V> LruCacheInner<K, V> {
    fn insert(&mut self, key: K, value: V, cost: usize) -> usize {
        if let Some((_, old_cost)) = self.entries.put(key, (value, cost)) {
            self.total_cost = self.total_cost.saturating_sub(old_cost);
        }
        self.total_cost = self.total_cost.saturating_add(cost);

        let mut evicted = 0;
        while self.total_cost > self.max_cost {
            match self.entries.pop_lru() {
                Some((_, (_, evicted_cost))) => {
                    self.total_cost = self.total_cost.saturating_sub(evicted_cost);
                    evicted += 1;
                }
                None => break,
            }
        }
        evicted
    }
}

impl<K: Hash + Eq, V> fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("LruCache")
            .field("len", &inner.entries.len())
            .field("total_cost", &inner.total_cost)
            .field("max_cost", &inner.max_cost)
            .finish()
    }
}
