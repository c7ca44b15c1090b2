//! Fixed-capacity cache with least-recently-used eviction.

use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;

/// A size-bounded map that evicts the least recently used entry on
/// overflow and can be trimmed on demand.
#[derive(Debug)]
pub struct BoundedCache<K: Hash + Eq, V> {
    inner: LruCache<K, V>,
    evicted: u64,
}

impl<K: Hash + Eq, V> BoundedCache<K, V> {
    /// Creates a cache holding at most `capacity` entries (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
            evicted: 0,
        }
    }

    /// Number of entries held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the cache holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.cap().get()
    }

    /// Total entries evicted by overflow or trimming since creation.
    #[must_use]
    pub const fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Inserts or replaces `key`, marking it most recently used.
    ///
    /// Returns the entry evicted to make room, if any. Replacing an existing
    /// key evicts nothing.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if self.inner.contains(&key) {
            self.inner.put(key, value);
            return None;
        }
        let evicted = self.inner.push(key, value);
        if evicted.is_some() {
            self.evicted += 1;
        }
        evicted
    }

    /// Looks up `key`, marking it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    /// Looks up `key` without touching recency.
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.inner.peek(key)
    }

    /// Returns the entry for `key`, inserting `make()` first if absent.
    pub fn get_or_insert_with(&mut self, key: K, make: impl FnOnce() -> V) -> &mut V {
        if !self.inner.contains(&key) && self.inner.len() == self.capacity() {
            self.evicted += 1;
        }
        self.inner.get_or_insert_mut(key, make)
    }

    /// Evicts least recently used entries until at most `target` remain.
    ///
    /// Returns how many entries were evicted.
    pub fn trim_to(&mut self, target: usize) -> usize {
        let mut removed = 0;
        while self.inner.len() > target {
            if self.inner.pop_lru().is_none() {
                break;
            }
            removed += 1;
        }
        self.evicted += removed as u64;
        removed
    }

    /// Iterates entries from most to least recently used.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner.iter()
    }

    /// Mutable iteration, most to least recently used, without touching
    /// recency.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.inner.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used_on_overflow() {
        let mut cache = BoundedCache::new(2);
        assert!(cache.insert("a", 1).is_none());
        assert!(cache.insert("b", 2).is_none());
        assert_eq!(cache.get(&"a"), Some(&1));
        assert_eq!(cache.insert("c", 3), Some(("b", 2)));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.evicted(), 1);
        assert!(cache.peek(&"b").is_none());
    }

    #[test]
    fn replacing_a_key_evicts_nothing() {
        let mut cache = BoundedCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert!(cache.insert("a", 10).is_none());
        assert_eq!(cache.peek(&"a"), Some(&10));
        assert_eq!(cache.evicted(), 0);
    }

    #[test]
    fn trim_removes_oldest_first() {
        let mut cache = BoundedCache::new(10);
        for i in 0..5 {
            cache.insert(i, i * 10);
        }
        assert_eq!(cache.trim_to(2), 3);
        assert_eq!(cache.len(), 2);
        assert!(cache.peek(&3).is_some());
        assert!(cache.peek(&4).is_some());
        assert!(cache.peek(&0).is_none());
        assert_eq!(cache.trim_to(5), 0);
        assert_eq!(cache.evicted(), 3);
    }

    #[test]
    fn peek_does_not_refresh_recency() {
        let mut cache = BoundedCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.peek(&"a"), Some(&1));
        assert_eq!(cache.insert("c", 3), Some(("a", 1)));
    }

    #[test]
    fn get_or_insert_with_counts_overflow() {
        let mut cache: BoundedCache<u32, Vec<u32>> = BoundedCache::new(1);
        cache.get_or_insert_with(1, Vec::new).push(7);
        cache.get_or_insert_with(1, Vec::new).push(8);
        assert_eq!(cache.peek(&1), Some(&vec![7, 8]));
        cache.get_or_insert_with(2, Vec::new);
        assert_eq!(cache.evicted(), 1);
        assert!(cache.peek(&1).is_none());
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let cache: BoundedCache<u8, u8> = BoundedCache::new(0);
        assert_eq!(cache.capacity(), 1);
        assert!(cache.is_empty());
    }
}
