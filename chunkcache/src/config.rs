use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::backend::{
    DiskStore, DiskStoreConfig, EvictingStore, EvictingStoreConfig, MemoryStore,
    MemoryStoreConfig, StorageBackend,
};
use crate::core::{Cache, CacheError, Result};

/// Main cache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: BackendConfig,
    pub memory: MemoryStoreConfig,
    pub disk: DiskStoreConfig,
    pub evicting: EvictingStoreConfig,
    pub chunk: ChunkConfig,
    pub logging: LoggingConfig,
}

/// Which storage adapter to open
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Memory,
    Disk,
    Evicting,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// TTL for chunk writes when the caller does not pass one
    pub default_ttl_seconds: i64,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl CacheConfig {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: CacheConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no backend can work with
    pub fn validate(&self) -> Result<()> {
        if self.memory.max_memory_mb == 0 {
            return Err(CacheError::Config(
                "memory.max_memory_mb must be greater than 0".to_string(),
            ));
        }
        if self.evicting.capacity == 0 {
            return Err(CacheError::Config(
                "evicting.capacity must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.disk.gc_ratio) {
            return Err(CacheError::Config(format!(
                "disk.gc_ratio must be within 0.0..=1.0, got {}",
                self.disk.gc_ratio
            )));
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            return Err(CacheError::Config(format!(
                "logging.format must be 'json' or 'pretty', got '{}'",
                self.logging.format
            )));
        }
        Ok(())
    }

    /// Open the configured storage backend
    pub fn open_backend(&self) -> Result<Arc<dyn StorageBackend>> {
        self.validate()?;
        info!("Opening {:?} backend", self.backend.kind);

        let backend: Arc<dyn StorageBackend> = match self.backend.kind {
            BackendKind::Memory => {
                let store = MemoryStore::new(self.memory.clone());
                store.start_ttl_cleanup();
                Arc::new(store)
            }
            BackendKind::Disk => Arc::new(DiskStore::open(self.disk.clone())?),
            BackendKind::Evicting => Arc::new(EvictingStore::new(self.evicting.clone())),
        };
        Ok(backend)
    }

    /// Open the configured backend wrapped in a [`Cache`]
    pub fn open_cache(&self) -> Result<Cache> {
        Ok(Cache::new(self.open_backend()?))
    }
}
