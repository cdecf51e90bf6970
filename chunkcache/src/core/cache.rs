use super::chunk::Chunk;
use super::codec::{self, ChunkRecord};
use super::error::{CacheError, Result};
use crate::backend::StorageBackend;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn};

/// What `get_and_delete` does when the delete half fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletePolicy {
    /// Log the failure and still return the value
    #[default]
    BestEffort,
    /// Surface the failure to the caller
    Strict,
}

/// Byte-oriented cache facade over one storage backend
#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn StorageBackend>,
}

impl Cache {
    /// Create a cache over the given backend
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        debug!("Cache created over {} backend", backend.name());
        Self { backend }
    }

    /// Underlying backend
    pub fn backend(&self) -> Arc<dyn StorageBackend> {
        Arc::clone(&self.backend)
    }

    /// Get a value; absence is `Ok(None)`
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.backend.get(key)
    }

    /// Set a value; `ttl_seconds <= 0` means no expiry
    pub fn set(&self, key: &[u8], value: &[u8], ttl_seconds: i64) -> Result<()> {
        self.backend.set(key, value, ttl_seconds)
    }

    /// Delete a key
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.backend.delete(key)
    }

    /// Wipe the whole backend, chunks included
    pub fn clear(&self) -> Result<()> {
        self.backend.clear()
    }

    /// Close the backend
    pub fn close(&self) -> Result<()> {
        self.backend.close()
    }

    /// Read a value and delete it if it was present
    pub fn get_and_delete(&self, key: &[u8], policy: DeletePolicy) -> Result<Option<Vec<u8>>> {
        let Some(value) = self.get(key)? else {
            return Ok(None);
        };

        if let Err(e) = self.delete(key) {
            match policy {
                DeletePolicy::Strict => return Err(e),
                DeletePolicy::BestEffort => warn!(
                    "Best-effort delete of key={} failed: {}",
                    String::from_utf8_lossy(key),
                    e
                ),
            }
        }
        Ok(Some(value))
    }

    /// `get_and_delete` with [`DeletePolicy::BestEffort`]
    pub fn get_and_delete_best_effort(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.get_and_delete(key, DeletePolicy::BestEffort)
    }

    /// Return the stored value, or produce, store and return it on a miss.
    /// A factory error propagates and nothing is written.
    pub fn on_set<F>(&self, key: &[u8], factory: F, ttl_seconds: i64) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        if let Some(value) = self.get(key)? {
            return Ok(value);
        }

        let value = factory()?;
        self.set(key, &value, ttl_seconds)?;
        Ok(value)
    }

    /// Typed get; a value that fails to decode is an error
    pub fn get_as<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        self.get(key)?
            .map(|bytes| codec::decode_value(&bytes))
            .transpose()
    }

    /// Typed set
    pub fn set_as<T: Serialize + ?Sized>(
        &self,
        key: &[u8],
        value: &T,
        ttl_seconds: i64,
    ) -> Result<()> {
        self.set(key, &codec::encode_value(value)?, ttl_seconds)
    }

    /// Typed lazy population, see [`Cache::on_set`]
    pub fn on_set_as<T, F>(&self, key: &[u8], factory: F, ttl_seconds: i64) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        let bytes = self.on_set(key, || codec::encode_value(&factory()?), ttl_seconds)?;
        codec::decode_value(&bytes)
    }

    /// Open a chunk, creating an empty one if it does not exist yet.
    /// The returned handle is already loaded.
    pub fn chunk(&self, name: &str, ttl_seconds: i64) -> Result<Chunk> {
        self.on_set(
            &codec::chunk_key(name),
            || ChunkRecord::default().encode(),
            ttl_seconds,
        )?;
        Chunk::open(self.clone(), name, ttl_seconds)
    }

    /// Delete a chunk's record. The version marker is left to expire; until
    /// it does, loads and commits on this name fail with
    /// [`CacheError::ChunkConflict`] because the marker no longer matches.
    pub fn delete_chunk(&self, name: &str) -> Result<()> {
        debug!("Deleting chunk '{}'", name);
        self.delete(&codec::chunk_key(name))
    }

    /// Run an optimistic transaction on a chunk: open it, apply `mutate`,
    /// commit, and on [`CacheError::ChunkConflict`] start over from a fresh
    /// load, up to `max_attempts` times.
    ///
    /// `mutate` is replayed on every attempt, so it must be safe to run more
    /// than once. Factories invoked inside it (for example through
    /// [`Chunk::on_set`]) run again on each attempt, since every attempt starts
    /// from a freshly loaded snapshot. Any error other than a conflict is
    /// returned immediately.
    pub fn update_chunk<F>(
        &self,
        name: &str,
        ttl_seconds: i64,
        max_attempts: usize,
        mut mutate: F,
    ) -> Result<Chunk>
    where
        F: FnMut(&Chunk) -> Result<()>,
    {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let chunk = self.chunk(name, ttl_seconds)?;
            mutate(&chunk)?;

            match chunk.save_changes() {
                Ok(()) => return Ok(chunk),
                Err(e) if e.is_conflict() && attempt < max_attempts => {
                    debug!(
                        "Chunk '{}' update attempt {}/{} conflicted, retrying",
                        name, attempt, max_attempts
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("backend", &self.backend.name())
            .finish()
    }
}
