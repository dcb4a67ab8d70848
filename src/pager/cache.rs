//! LRU cache of clean page images.
//!
//! Only pages that match the main file are cached. Uncommitted pages live in
//! the pager's dirty set and never enter the cache until their transaction
//! commits.

use super::page::{Page, PageId};
use std::collections::{HashMap, VecDeque};

/// Statistics for cache performance monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Total number of cache lookups
    pub lookups: u64,
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Number of insertions
    pub insertions: u64,
    /// Number of evictions
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.hits as f64 / self.lookups as f64
        }
    }
}

/// Page cache with least-recently-used eviction.
///
/// The pager owns the cache and already runs under the database lock, so the
/// cache itself is not synchronized.
#[derive(Debug)]
pub struct PageCache {
    /// Maximum number of pages held
    capacity: usize,
    entries: HashMap<PageId, Page>,
    /// LRU queue (most recently used at the back)
    lru_queue: VecDeque<PageId>,
    stats: CacheStats,
}

impl PageCache {
    /// Creates a cache holding at most `capacity` pages. 0 disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            lru_queue: VecDeque::new(),
            stats: CacheStats::default(),
        }
    }

    /// Looks up a page, marking it as recently used on a hit.
    pub fn get(&mut self, id: PageId) -> Option<Page> {
        self.stats.lookups += 1;
        match self.entries.get(&id) {
            Some(page) => {
                let page = page.clone();
                self.touch(id);
                self.stats.hits += 1;
                Some(page)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Inserts or replaces a page, evicting the oldest entries if full.
    pub fn insert(&mut self, page: Page) {
        if self.capacity == 0 {
            return;
        }

        let id = page.id();
        if self.entries.insert(id, page).is_some() {
            self.lru_queue.retain(|k| *k != id);
        }
        self.lru_queue.push_back(id);
        self.stats.insertions += 1;

        while self.entries.len() > self.capacity {
            self.evict_one();
        }
    }

    /// Drops a page from the cache.
    pub fn remove(&mut self, id: PageId) {
        if self.entries.remove(&id).is_some() {
            self.lru_queue.retain(|k| *k != id);
        }
    }

    /// Changes the capacity, evicting as needed.
    pub fn resize(&mut self, capacity: usize) {
        self.capacity = capacity;
        while self.entries.len() > self.capacity {
            self.evict_one();
        }
    }

    // O(n) in the queue length; acceptable for the default cache sizes.
    fn touch(&mut self, id: PageId) {
        if let Some(pos) = self.lru_queue.iter().position(|k| *k == id) {
            self.lru_queue.remove(pos);
        }
        self.lru_queue.push_back(id);
    }

    fn evict_one(&mut self) {
        if let Some(id) = self.lru_queue.pop_front() {
            if self.entries.remove(&id).is_some() {
                self.stats.evictions += 1;
            }
        }
    }

    /// Clear all entries from the cache.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.lru_queue.clear();
    }

    /// Get current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.clone()
    }

    /// Get the number of cached pages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get the cache capacity in pages.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::page::PageType;

    fn page(id: PageId) -> Page {
        Page::new(id, 512, PageType::Leaf)
    }

    #[test]
    fn test_cache_basic_operations() {
        let mut cache = PageCache::new(4);

        assert!(cache.get(1).is_none());
        cache.insert(page(1));
        assert_eq!(cache.get(1).map(|p| p.id()), Some(1));

        let stats = cache.stats();
        assert_eq!(stats.lookups, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.insertions, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cache_lru_eviction() {
        let mut cache = PageCache::new(3);
        cache.insert(page(1));
        cache.insert(page(2));
        cache.insert(page(3));

        // Page 1 becomes most recently used, so 2 is evicted next.
        assert!(cache.get(1).is_some());
        cache.insert(page(4));

        assert_eq!(cache.len(), 3);
        assert!(cache.get(2).is_none());
        assert!(cache.get(1).is_some());
        assert!(cache.get(4).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_cache_disabled_and_resize() {
        let mut cache = PageCache::new(0);
        cache.insert(page(1));
        assert!(cache.is_empty());

        let mut cache = PageCache::new(8);
        for id in 1..=8 {
            cache.insert(page(id));
        }
        cache.resize(2);
        assert_eq!(cache.len(), 2);
        assert!(cache.get(8).is_some());

        cache.remove(8);
        assert!(cache.get(8).is_none());
        cache.clear();
        assert!(cache.is_empty());
    }
}
