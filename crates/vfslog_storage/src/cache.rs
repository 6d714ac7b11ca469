//! Bounded least-recently-used cache.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// A small bounded LRU cache.
///
/// Recency is tracked in a queue (front = least recently used). The cache is
/// meant for a handful of entries (open blocks, last attribute list, recent
/// file models), so recency updates are linear in the capacity.
///
/// The cache is not synchronized; owners wrap it in a lock.
#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: usize,
    entries: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a cache holding at most `capacity` entries (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// Returns the cached value for `key`, marking it most recently used.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let value = self.entries.get(key)?.clone();
        self.touch(key);
        Some(value)
    }

    /// Inserts a value, returning the entry evicted to make room, if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if self.entries.insert(key.clone(), value).is_some() {
            self.touch(&key);
            return None;
        }
        self.order.push_back(key);

        if self.entries.len() > self.capacity {
            let victim = self.order.pop_front()?;
            let evicted = self.entries.remove(&victim)?;
            return Some((victim, evicted));
        }
        None
    }

    /// Removes `key` from the cache.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let value = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(value)
    }

    /// Removes every entry whose key matches `predicate`.
    pub fn remove_where(&mut self, mut predicate: impl FnMut(&K) -> bool) {
        self.entries.retain(|k, _| !predicate(k));
        let entries = &self.entries;
        self.order.retain(|k| entries.contains_key(k));
    }

    /// Drops all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Returns the number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn touch(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = LruCache::new(2);
        cache.insert(1, "a");
        cache.insert(2, "b");

        // Touch 1 so that 2 becomes the eviction victim.
        assert_eq!(cache.get(&1), Some("a"));

        let evicted = cache.insert(3, "c");
        assert_eq!(evicted, Some((2, "b")));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&2).is_none());
    }

    #[test]
    fn reinsert_replaces_value() {
        let mut cache = LruCache::new(2);
        cache.insert(1, "a");
        assert!(cache.insert(1, "z").is_none());
        assert_eq!(cache.get(&1), Some("z"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn single_slot() {
        let mut cache = LruCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.insert("x", 1);
        cache.insert("y", 2);
        assert!(cache.get(&"x").is_none());
        assert_eq!(cache.get(&"y"), Some(2));
    }

    #[test]
    fn remove_where_filters() {
        let mut cache = LruCache::new(4);
        for i in 0..4 {
            cache.insert(i, i * 10);
        }
        cache.remove_where(|k| k % 2 == 0);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&1), Some(10));
        assert!(cache.get(&2).is_none());

        // Order queue stays consistent with the map.
        cache.insert(5, 50);
        cache.insert(6, 60);
        cache.insert(7, 70);
        assert_eq!(cache.len(), 4);
    }
}
