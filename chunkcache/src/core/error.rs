use thiserror::Error;

/// Main error type for cache and chunk operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt version marker: expected 8 bytes, got {len}")]
    CorruptVersionMarker { len: usize },

    #[error("Corrupt chunk record: {0}")]
    CorruptRecord(String),

    #[error("Chunk conflict on '{name}' - expected version: {expected}, actual: {actual}")]
    ChunkConflict {
        name: String,
        expected: u64,
        actual: u64,
    },

    #[error("Value factory failed: {0}")]
    Factory(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Memory limit exceeded")]
    MemoryLimitExceeded,

    #[error("Backend is closed")]
    Closed,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CacheError {
    /// True for the one error with a defined recovery: discard the chunk
    /// handle, re-open it and reapply the mutations.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ChunkConflict { .. })
    }

    /// True when stored bytes could not be interpreted.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::CorruptVersionMarker { .. } | Self::CorruptRecord(_)
        )
    }

    /// Wrap an arbitrary producer error raised inside `on_set`.
    pub fn factory<E: std::fmt::Display>(err: E) -> Self {
        Self::Factory(err.to_string())
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
