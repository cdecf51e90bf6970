pub mod backend;
pub mod config;
pub mod core;

// Re-export commonly used types
pub use crate::backend::{
    DiskStore, DiskStoreConfig, EvictingStore, EvictingStoreConfig, EvictionPolicy, FsyncMode,
    MemoryStore, MemoryStoreConfig, StorageBackend,
};
pub use crate::config::{BackendKind, CacheConfig};
pub use crate::core::{Cache, CacheError, Chunk, ChunkRecord, DeletePolicy, Result, StoreStats};
