//! Decoded-thumbnail memory tier
//!
//! Entries are costed in KiB of decoded RGBA pixels. The budget is fixed at
//! construction as one sixth of the configured heap limit.

use crate::key::CacheKey;
use crate::lru::LruCache;
use crate::Thumbnail;

/// Fraction of the heap limit granted to decoded thumbnails
const HEAP_FRACTION: u64 = 6;

pub struct MemoryStore {
    entries: LruCache<CacheKey, Thumbnail>,
}

impl MemoryStore {
    /// Budget is `max_heap_bytes / 6`, in KiB.
    pub fn new(max_heap_bytes: u64) -> Self {
        let budget_kb = (max_heap_bytes / HEAP_FRACTION / 1024) as usize;
        Self::with_budget_kb(budget_kb)
    }

    pub fn with_budget_kb(budget_kb: usize) -> Self {
        Self {
            entries: LruCache::new(budget_kb),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Thumbnail> {
        self.entries.get(key)
    }

    pub fn put(&self, key: CacheKey, thumbnail: Thumbnail) {
        let cost = thumbnail_cost_kb(&thumbnail);
        self.entries.insert(key, thumbnail, cost);
    }

    pub fn remove(&self, key: &CacheKey) -> Option<Thumbnail> {
        self.entries.remove(key)
    }

    pub fn evict_all(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cost_kb(&self) -> usize {
        self.entries.total_cost()
    }

    pub fn budget_kb(&self) -> usize {
        self.entries.max_cost()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("MemoryStore").field(&self.entries).finish()
    }
}

/// Decoded RGBA size rounded up to whole KiB; never zero.
pub fn thumbnail_cost_kb(thumbnail: &Thumbnail) -> usize {
    let bytes = thumbnail.width() as usize * thumbnail.height() as usize * 4;
    bytes.div_ceil(1024).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{local_item, thumbnail_key};
    use image::DynamicImage;
    use std::sync::Arc;

    fn thumb(w: u32, h: u32) -> Thumbnail {
        Arc::new(DynamicImage::new_rgba8(w, h))
    }

    #[test]
    fn test_budget_is_sixth_of_heap() {
        let store = MemoryStore::new(600 * 1024 * 1024);
        assert_eq!(store.budget_kb(), 100 * 1024);
    }

    #[test]
    fn test_cost_accounting() {
        assert_eq!(thumbnail_cost_kb(&thumb(16, 16)), 1);
        assert_eq!(thumbnail_cost_kb(&thumb(16, 17)), 2);
        assert_eq!(thumbnail_cost_kb(&thumb(1, 1)), 1);
        assert_eq!(thumbnail_cost_kb(&thumb(320, 180)), 225);
    }

    #[test]
    fn test_evicts_least_recently_used_within_budget() {
        // Each 32x32 RGBA thumbnail costs 4 KiB
        let store = MemoryStore::with_budget_kb(12);
        let keys: Vec<_> = (0..4)
            .map(|i| thumbnail_key(&local_item(i, "/v.mp4", i as u64), 32, 32))
            .collect();

        store.put(keys[0].clone(), thumb(32, 32));
        store.put(keys[1].clone(), thumb(32, 32));
        store.put(keys[2].clone(), thumb(32, 32));
        assert!(store.get(&keys[0]).is_some());

        store.put(keys[3].clone(), thumb(32, 32));
        assert!(store.get(&keys[1]).is_none());
        assert!(store.get(&keys[0]).is_some());
        assert!(store.get(&keys[2]).is_some());
        assert!(store.get(&keys[3]).is_some());
        assert!(store.cost_kb() <= store.budget_kb());

        store.evict_all();
        assert!(store.is_empty());
        assert_eq!(store.cost_kb(), 0);
    }
}
