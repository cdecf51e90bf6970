//! Storage Backends
//!
//! Byte-oriented stores the cache facade delegates raw persistence to:
//! - Memory: in-memory store with TTL and a memory budget (oldest entries evicted first)
//! - Disk: embedded log-structured store that survives restarts
//! - Evicting: bounded in-memory cache with LRU/LFU eviction

use crate::core::error::Result;

pub mod disk;
pub mod evicting;
pub mod memory;

pub use disk::{DiskStore, DiskStoreConfig, FsyncMode};
pub use evicting::{EvictingStore, EvictingStoreConfig, EvictionPolicy};
pub use memory::{MemoryStore, MemoryStoreConfig};

/// Contract every storage adapter fulfils.
///
/// Absence of a key is `Ok(None)`, never an error. `ttl_seconds <= 0`
/// means "no expiry". Implementations must be safe to share between
/// threads; every call is blocking.
pub trait StorageBackend: Send + Sync {
    /// Short adapter name used in logs
    fn name(&self) -> &'static str;

    /// Read a value
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Write a value, overwriting unconditionally
    fn set(&self, key: &[u8], value: &[u8], ttl_seconds: i64) -> Result<()>;

    /// Delete a value; deleting a missing key succeeds
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Wipe the entire backend
    fn clear(&self) -> Result<()>;

    /// Release backend resources. Calling it more than once is a no-op.
    fn close(&self) -> Result<()>;
}
