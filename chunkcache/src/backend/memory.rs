use super::StorageBackend;
use crate::core::error::{CacheError, Result};
use crate::core::types::{StoreStats, StoredValue};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for the in-memory store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStoreConfig {
    /// Memory budget in MB; the oldest entries are evicted once it is exceeded
    pub max_memory_mb: usize,
    /// Background TTL sweep interval in milliseconds (0 disables the sweeper)
    pub ttl_cleanup_interval_ms: u64,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            max_memory_mb: 256,
            ttl_cleanup_interval_ms: 1000,
        }
    }
}

struct Slot {
    value: StoredValue,
    seq: u64,
    size: usize,
}

/// Entries plus their write order. `order` maps write sequence to key so the
/// oldest entry is always the first one.
#[derive(Default)]
struct MemoryData {
    entries: HashMap<Vec<u8>, Slot>,
    order: BTreeMap<u64, Vec<u8>>,
    next_seq: u64,
    bytes: usize,
}

impl MemoryData {
    fn remove(&mut self, key: &[u8]) -> Option<Slot> {
        let slot = self.entries.remove(key)?;
        self.order.remove(&slot.seq);
        self.bytes = self.bytes.saturating_sub(slot.size);
        Some(slot)
    }

    /// Drop every expired entry, returning how many were removed
    fn remove_expired(&mut self) -> usize {
        let expired: Vec<Vec<u8>> = self
            .entries
            .iter()
            .filter(|(_, slot)| slot.value.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        let count = expired.len();
        if count > 0 {
            debug!("Cleaning up {} expired keys", count);
            for key in expired {
                self.remove(&key);
            }
        }
        count
    }

    fn pop_oldest(&mut self) -> Option<Slot> {
        let (_, key) = self.order.pop_first()?;
        let slot = self.entries.remove(&key)?;
        self.bytes = self.bytes.saturating_sub(slot.size);
        Some(slot)
    }
}

/// In-memory byte store with per-entry TTL and a bounded memory budget
#[derive(Clone)]
pub struct MemoryStore {
    data: Arc<RwLock<MemoryData>>,
    stats: Arc<RwLock<StoreStats>>,
    config: MemoryStoreConfig,
    closed: Arc<AtomicBool>,
    sweeper: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl MemoryStore {
    /// Create a new memory store with the given configuration
    pub fn new(config: MemoryStoreConfig) -> Self {
        info!(
            "Initializing memory store with max_memory={}MB",
            config.max_memory_mb
        );

        Self {
            data: Arc::new(RwLock::new(MemoryData::default())),
            stats: Arc::new(RwLock::new(StoreStats::default())),
            config,
            closed: Arc::new(AtomicBool::new(false)),
            sweeper: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the background TTL sweeper. It stops when the store is closed
    /// or when the last handle on the store is dropped.
    /// Calling this twice keeps the first sweeper.
    pub fn start_ttl_cleanup(&self) {
        let interval_ms = self.config.ttl_cleanup_interval_ms;
        if interval_ms == 0 {
            return;
        }

        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            return;
        }

        info!("Starting TTL cleanup thread (interval={}ms)", interval_ms);
        let data = Arc::downgrade(&self.data);
        let closed = Arc::clone(&self.closed);
        *sweeper = Some(std::thread::spawn(move || {
            let interval = Duration::from_millis(interval_ms);
            loop {
                std::thread::park_timeout(interval);
                if closed.load(Ordering::Acquire) {
                    break;
                }
                let Some(data) = data.upgrade() else {
                    break;
                };
                data.write().remove_expired();
            }
            debug!("TTL cleanup thread stopped");
        }));
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn cleanup_expired(&self) -> usize {
        self.data.write().remove_expired()
    }

    /// Remaining TTL for a key; `None` if the key is missing or never expires
    pub fn ttl(&self, key: &[u8]) -> Option<u64> {
        let data = self.data.read();
        data.entries
            .get(key)
            .filter(|slot| !slot.value.is_expired())
            .and_then(|slot| slot.value.remaining_ttl_secs())
    }

    /// Get statistics
    pub fn stats(&self) -> StoreStats {
        let data = self.data.read();
        let mut stats = self.stats.read().clone();
        stats.total_keys = data.entries.len();
        stats.total_bytes = data.bytes;
        stats
    }

    fn max_bytes(&self) -> usize {
        self.config.max_memory_mb * 1024 * 1024
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        Ok(())
    }

    /// Estimate memory size of an entry
    fn estimate_entry_size(key: &[u8], value: &[u8]) -> usize {
        key.len() + value.len() + std::mem::size_of::<StoredValue>()
    }
}

impl StorageBackend for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;

        let mut data = self.data.write();
        let mut stats = self.stats.write();
        stats.gets += 1;

        let expired = match data.entries.get_mut(key) {
            Some(slot) if !slot.value.is_expired() => {
                slot.value.update_access();
                stats.hits += 1;
                return Ok(Some(slot.value.data.clone()));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            debug!("Key expired: {}", String::from_utf8_lossy(key));
            data.remove(key);
        }
        stats.misses += 1;
        Ok(None)
    }

    fn set(&self, key: &[u8], value: &[u8], ttl_seconds: i64) -> Result<()> {
        self.ensure_open()?;
        debug!(
            "SET key={}, size={}, ttl={}",
            String::from_utf8_lossy(key),
            value.len(),
            ttl_seconds
        );

        let entry_size = Self::estimate_entry_size(key, value);
        let max_bytes = self.max_bytes();
        if entry_size > max_bytes {
            warn!("Entry of {} bytes exceeds memory budget {}", entry_size, max_bytes);
            return Err(CacheError::MemoryLimitExceeded);
        }

        let mut data = self.data.write();
        let mut stats = self.stats.write();

        data.remove(key);
        while data.bytes + entry_size > max_bytes {
            match data.pop_oldest() {
                Some(_) => stats.evictions += 1,
                None => break,
            }
        }

        let seq = data.next_seq;
        let slot = Slot {
            value: StoredValue::new(value.to_vec(), ttl_seconds),
            seq,
            size: entry_size,
        };
        data.next_seq += 1;
        data.order.insert(seq, key.to_vec());
        data.entries.insert(key.to_vec(), slot);
        data.bytes += entry_size;
        stats.sets += 1;

        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.ensure_open()?;
        debug!("DELETE key={}", String::from_utf8_lossy(key));

        let mut data = self.data.write();
        if data.remove(key).is_some() {
            self.stats.write().dels += 1;
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.ensure_open()?;
        info!("Clearing memory store");

        *self.data.write() = MemoryData::default();
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(handle) = self.sweeper.lock().take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                warn!("TTL cleanup thread panicked");
            }
        }

        *self.data.write() = MemoryData::default();
        info!("Memory store closed");
        Ok(())
    }
}
