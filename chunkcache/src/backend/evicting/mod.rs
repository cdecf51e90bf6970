//! Evicting Store
//!
//! Bounded in-memory cache that makes room for new entries by evicting
//! existing ones:
//! - LRU (Least Recently Used)
//! - LFU (Least Frequently Used)
//!
//! An evicted key simply reads as absent afterwards, which the chunk layer
//! treats like any other missing key.

use super::StorageBackend;
use crate::core::error::{CacheError, Result};
use crate::core::types::{StoreStats, StoredValue};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

pub mod lfu;
pub mod lru;

pub use lfu::LfuCache;
pub use lru::LruCache;

/// Cache eviction policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least Recently Used
    #[default]
    Lru,
    /// Least Frequently Used
    Lfu,
}

/// Configuration for the evicting store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictingStoreConfig {
    /// Maximum number of entries
    pub capacity: usize,
    pub policy: EvictionPolicy,
}

impl Default for EvictingStoreConfig {
    fn default() -> Self {
        Self {
            capacity: 100_000,
            policy: EvictionPolicy::Lru,
        }
    }
}

enum Entries {
    Lru(LruCache<Vec<u8>, StoredValue>),
    Lfu(LfuCache<Vec<u8>, StoredValue>),
}

impl Entries {
    fn new(config: &EvictingStoreConfig) -> Self {
        match config.policy {
            EvictionPolicy::Lru => Self::Lru(LruCache::new(config.capacity)),
            EvictionPolicy::Lfu => Self::Lfu(LfuCache::new(config.capacity)),
        }
    }

    fn get(&mut self, key: &[u8]) -> Option<StoredValue> {
        match self {
            Self::Lru(cache) => cache.get(key),
            Self::Lfu(cache) => cache.get(key),
        }
    }

    fn insert(&mut self, key: Vec<u8>, value: StoredValue) -> Option<Vec<u8>> {
        match self {
            Self::Lru(cache) => cache.insert(key, value),
            Self::Lfu(cache) => cache.insert(key, value),
        }
    }

    fn remove(&mut self, key: &[u8]) -> Option<StoredValue> {
        match self {
            Self::Lru(cache) => cache.remove(key),
            Self::Lfu(cache) => cache.remove(key),
        }
    }

    fn clear(&mut self) {
        match self {
            Self::Lru(cache) => cache.clear(),
            Self::Lfu(cache) => cache.clear(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Lru(cache) => cache.len(),
            Self::Lfu(cache) => cache.len(),
        }
    }
}

struct EvictingState {
    entries: Entries,
    stats: StoreStats,
}

/// Bounded in-memory store with LRU/LFU eviction and per-entry TTL
pub struct EvictingStore {
    config: EvictingStoreConfig,
    state: Mutex<EvictingState>,
    closed: AtomicBool,
}

impl EvictingStore {
    /// Create a new evicting store
    pub fn new(config: EvictingStoreConfig) -> Self {
        info!(
            "Initializing evicting store with capacity={}, policy={:?}",
            config.capacity, config.policy
        );

        Self {
            state: Mutex::new(EvictingState {
                entries: Entries::new(&config),
                stats: StoreStats::default(),
            }),
            config,
            closed: AtomicBool::new(false),
        }
    }

    /// Get statistics
    pub fn stats(&self) -> StoreStats {
        let state = self.state.lock();
        let mut stats = state.stats.clone();
        stats.total_keys = state.entries.len();
        stats
    }

    /// Active eviction policy
    pub fn policy(&self) -> EvictionPolicy {
        self.config.policy
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        Ok(())
    }
}

impl StorageBackend for EvictingStore {
    fn name(&self) -> &'static str {
        "evicting"
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;

        let mut state = self.state.lock();
        state.stats.gets += 1;

        match state.entries.get(key) {
            Some(value) if value.is_expired() => {
                debug!("Key expired: {}", String::from_utf8_lossy(key));
                state.entries.remove(key);
                state.stats.misses += 1;
                Ok(None)
            }
            Some(value) => {
                state.stats.hits += 1;
                Ok(Some(value.data))
            }
            None => {
                state.stats.misses += 1;
                Ok(None)
            }
        }
    }

    fn set(&self, key: &[u8], value: &[u8], ttl_seconds: i64) -> Result<()> {
        self.ensure_open()?;
        debug!(
            "SET key={}, size={}, ttl={}",
            String::from_utf8_lossy(key),
            value.len(),
            ttl_seconds
        );

        let mut state = self.state.lock();
        let evicted = state
            .entries
            .insert(key.to_vec(), StoredValue::new(value.to_vec(), ttl_seconds));
        state.stats.sets += 1;

        if let Some(evicted) = evicted {
            debug!("Evicted key={}", String::from_utf8_lossy(&evicted));
            state.stats.evictions += 1;
        }
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.ensure_open()?;

        let mut state = self.state.lock();
        if state.entries.remove(key).is_some() {
            state.stats.dels += 1;
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.ensure_open()?;
        info!("Clearing evicting store");

        self.state.lock().entries.clear();
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.state.lock().entries.clear();
            info!("Evicting store closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn store(capacity: usize, policy: EvictionPolicy) -> EvictingStore {
        EvictingStore::new(EvictingStoreConfig { capacity, policy })
    }

    #[test]
    fn test_lru_eviction() {
        let store = store(2, EvictionPolicy::Lru);

        store.set(b"a", b"1", 0).unwrap();
        store.set(b"b", b"2", 0).unwrap();
        store.get(b"a").unwrap();
        store.set(b"c", b"3", 0).unwrap();

        assert_eq!(store.get(b"b").unwrap(), None);
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.stats().evictions, 1);
    }

    #[test]
    fn test_lfu_eviction() {
        let store = store(2, EvictionPolicy::Lfu);

        store.set(b"a", b"1", 0).unwrap();
        store.set(b"b", b"2", 0).unwrap();
        store.get(b"b").unwrap();
        store.get(b"b").unwrap();
        store.set(b"c", b"3", 0).unwrap();

        assert_eq!(store.get(b"a").unwrap(), None);
        assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_ttl_expiration() {
        let store = store(10, EvictionPolicy::Lru);

        store.set(b"k", b"v", 1).unwrap();
        assert!(store.get(b"k").unwrap().is_some());

        std::thread::sleep(Duration::from_millis(1100));
        assert_eq!(store.get(b"k").unwrap(), None);
        assert_eq!(store.stats().total_keys, 0);
    }

    #[test]
    fn test_delete_clear_close() {
        let store = store(10, EvictionPolicy::Lfu);

        store.set(b"a", b"1", 0).unwrap();
        store.delete(b"a").unwrap();
        store.delete(b"missing").unwrap();
        assert_eq!(store.get(b"a").unwrap(), None);

        store.set(b"b", b"2", 0).unwrap();
        store.clear().unwrap();
        assert_eq!(store.stats().total_keys, 0);

        store.close().unwrap();
        store.close().unwrap();
        assert!(matches!(store.set(b"c", b"3", 0), Err(CacheError::Closed)));
    }
}
