use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Convert a caller supplied TTL into an optional duration.
/// `ttl_seconds <= 0` means the entry never expires.
pub fn ttl_duration(ttl_seconds: i64) -> Option<Duration> {
    if ttl_seconds > 0 {
        Some(Duration::from_secs(ttl_seconds as u64))
    } else {
        None
    }
}

/// Milliseconds since the unix epoch, used where expiry must survive a restart.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Stored value in the in-memory backends with metadata
#[derive(Debug, Clone)]
pub struct StoredValue {
    /// Raw byte data
    pub data: Vec<u8>,
    /// Optional expiration time
    pub expires_at: Option<Instant>,
    /// When the value was written
    pub created_at: Instant,
    /// Last access time (for LRU)
    pub accessed_at: Instant,
}

impl StoredValue {
    /// Create a new stored value. A TTL too large to represent never expires.
    pub fn new(data: Vec<u8>, ttl_seconds: i64) -> Self {
        let now = Instant::now();
        Self {
            data,
            expires_at: ttl_duration(ttl_seconds).and_then(|ttl| now.checked_add(ttl)),
            created_at: now,
            accessed_at: now,
        }
    }

    /// Check if the value has expired
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|expires| Instant::now() >= expires)
    }

    /// Update access time
    pub fn update_access(&mut self) {
        self.accessed_at = Instant::now();
    }

    /// Get remaining TTL in seconds
    pub fn remaining_ttl_secs(&self) -> Option<u64> {
        self.expires_at
            .map(|expires| expires.saturating_duration_since(Instant::now()).as_secs())
    }
}

/// Statistics shared by the backend adapters
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    /// Total number of live keys
    pub total_keys: usize,
    /// Estimated memory (or log) usage in bytes
    pub total_bytes: usize,
    /// Number of GET operations
    pub gets: u64,
    /// Number of SET operations
    pub sets: u64,
    /// Number of DELETE operations
    pub dels: u64,
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Entries dropped to make room for new ones
    pub evictions: u64,
}

impl StoreStats {
    /// Calculate hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
