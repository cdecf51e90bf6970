//! LRU (Least Recently Used) Cache Implementation

use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// LRU Cache - evicts the entry untouched for the longest time.
/// Recency is a monotonically increasing tick; `order` maps tick to key.
pub struct LruCache<K: Hash + Eq + Clone, V: Clone> {
    capacity: usize,
    cache: HashMap<K, (V, u64)>,
    order: BTreeMap<u64, K>,
    tick: u64,
}

impl<K: Hash + Eq + Clone, V: Clone> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            cache: HashMap::new(),
            order: BTreeMap::new(),
            tick: 0,
        }
    }

    fn touch<Q>(&mut self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.tick += 1;
        let tick = self.tick;
        if let Some((_, last)) = self.cache.get_mut(key) {
            if let Some(owned) = self.order.remove(&*last) {
                self.order.insert(tick, owned);
            }
            *last = tick;
        }
    }

    pub fn get<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let value = self.cache.get(key).map(|(value, _)| value.clone())?;
        self.touch(key);
        Some(value)
    }

    /// Insert or update; returns the key evicted to make room, if any
    pub fn insert(&mut self, key: K, value: V) -> Option<K> {
        if let Some((existing, _)) = self.cache.get_mut(&key) {
            *existing = value;
            self.touch(&key);
            return None;
        }

        let evicted = if self.cache.len() >= self.capacity {
            self.order.pop_first().map(|(_, oldest)| {
                self.cache.remove(&oldest);
                oldest
            })
        } else {
            None
        };

        self.tick += 1;
        self.order.insert(self.tick, key.clone());
        self.cache.insert(key, (value, self.tick));
        evicted
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let (value, tick) = self.cache.remove(key)?;
        self.order.remove(&tick);
        Some(value)
    }

    pub fn clear(&mut self) {
        self.cache.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_basic() {
        let mut cache = LruCache::new(3);

        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("c", 3);

        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"b"), Some(2));
        assert_eq!(cache.get(&"c"), Some(3));

        // Insert d, should evict a (least recently used)
        assert_eq!(cache.insert("d", 4), Some("a"));
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"d"), Some(4));
    }

    #[test]
    fn test_lru_read_refreshes_recency() {
        let mut cache = LruCache::new(2);

        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.get(&"a");

        assert_eq!(cache.insert("c", 3), Some("b"));
        assert_eq!(cache.get(&"a"), Some(1));
    }

    #[test]
    fn test_lru_remove_and_clear() {
        let mut cache = LruCache::new(4);

        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.remove(&"a"), Some(1));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
