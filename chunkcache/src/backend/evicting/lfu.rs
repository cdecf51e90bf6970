//! LFU (Least Frequently Used) Cache Implementation

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

/// Entry in LFU cache with frequency counter
struct LfuEntry<V> {
    value: V,
    frequency: u64,
    /// Insertion tick, breaks frequency ties in favour of older entries
    tick: u64,
}

/// LFU Cache - evicts least frequently used items
pub struct LfuCache<K: Hash + Eq + Clone, V: Clone> {
    capacity: usize,
    cache: HashMap<K, LfuEntry<V>>,
    tick: u64,
}

impl<K: Hash + Eq + Clone, V: Clone> LfuCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            cache: HashMap::new(),
            tick: 0,
        }
    }

    pub fn get<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let entry = self.cache.get_mut(key)?;
        entry.frequency += 1;
        Some(entry.value.clone())
    }

    /// Insert or update; returns the key evicted to make room, if any
    pub fn insert(&mut self, key: K, value: V) -> Option<K> {
        self.tick += 1;

        if let Some(entry) = self.cache.get_mut(&key) {
            entry.value = value;
            entry.frequency += 1;
            return None;
        }

        let evicted = if self.cache.len() >= self.capacity {
            self.evict_lfu()
        } else {
            None
        };

        self.cache.insert(
            key,
            LfuEntry {
                value,
                frequency: 1,
                tick: self.tick,
            },
        );
        evicted
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.cache.remove(key).map(|entry| entry.value)
    }

    fn evict_lfu(&mut self) -> Option<K> {
        let key = self
            .cache
            .iter()
            .min_by_key(|(_, entry)| (entry.frequency, entry.tick))
            .map(|(key, _)| key.clone())?;

        self.cache.remove(&key);
        Some(key)
    }

    pub fn clear(&mut self) {
        self.cache.clear();
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
    fn test_lfu_basic() {
        let mut cache = LfuCache::new(3);

        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("c", 3);

        assert_eq!(cache.get(&"a"), Some(1)); // freq=2
        assert_eq!(cache.get(&"a"), Some(1)); // freq=3
        assert_eq!(cache.get(&"b"), Some(2)); // freq=2

        // Insert d, should evict c (freq=1, least frequent)
        assert_eq!(cache.insert("d", 4), Some("c"));

        assert_eq!(cache.get(&"c"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"d"), Some(4));
    }

    #[test]
    fn test_lfu_tie_evicts_oldest() {
        let mut cache = LfuCache::new(2);

        cache.insert("a", 1);
        cache.insert("b", 2);

        assert_eq!(cache.insert("c", 3), Some("a"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_lfu_update_does_not_evict() {
        let mut cache = LfuCache::new(1);

        cache.insert("a", 1);
        assert_eq!(cache.insert("a", 2), None);
        assert_eq!(cache.get(&"a"), Some(2));

        assert_eq!(cache.remove(&"a"), Some(2));
        assert!(cache.is_empty());
    }
}
