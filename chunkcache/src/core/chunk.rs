//! Chunk Support Module
//!
//! A chunk is a named group of key/value pairs that lives in the backend as
//! one versioned record. A handle loads the record into memory, lets the
//! caller mutate the snapshot freely and commits it back with optimistic
//! locking.
//!
//! Two backend keys back every chunk:
//! - the record itself (`version` + `data`)
//! - a version marker holding only the version, cheap to re-read
//!
//! Commit order is record first, then marker. A crash between the two leaves
//! the record ahead of the marker, which every later load and commit detects
//! and rejects as a conflict.
//!
//! # Conflicts
//!
//! [`Chunk::save_changes`] fails with [`CacheError::ChunkConflict`] when the
//! chunk changed since the handle was loaded. Nothing is retried internally:
//! discard the handle, re-open the chunk, reapply the mutations against the
//! fresh snapshot and save again. [`Cache::update_chunk`] packages that loop
//! for callers whose mutations are safe to replay.

use super::cache::Cache;
use super::codec::{self, ChunkRecord};
use super::error::{CacheError, Result};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Working copy of a chunk guarded by the handle's lock
#[derive(Debug, Default)]
struct ChunkState {
    snapshot: HashMap<Vec<u8>, Vec<u8>>,
    /// Version observed at load time (CAS reference for commit)
    base_version: u64,
    dirty: bool,
}

/// In-memory handle on a chunk. Safe to share between threads; all
/// operations on one handle serialize on an internal lock.
pub struct Chunk {
    cache: Cache,
    name: String,
    ttl_seconds: i64,
    state: Mutex<ChunkState>,
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Chunk")
            .field("name", &self.name)
            .field("ttl_seconds", &self.ttl_seconds)
            .field("base_version", &state.base_version)
            .field("dirty", &state.dirty)
            .field("keys", &state.snapshot.len())
            .finish()
    }
}

impl Chunk {
    /// Create a handle and load it from the backend
    pub(crate) fn open(cache: Cache, name: &str, ttl_seconds: i64) -> Result<Self> {
        let chunk = Self {
            cache,
            name: name.to_string(),
            ttl_seconds,
            state: Mutex::new(ChunkState::default()),
        };

        {
            let mut state = chunk.state.lock();
            chunk.load(&mut state)?;
        }
        Ok(chunk)
    }

    fn load(&self, state: &mut ChunkState) -> Result<()> {
        let marker = self.read_marker()?;
        let record = self.read_record()?;

        if let Some(marker) = marker.filter(|marker| *marker != record.version) {
            warn!(
                "Chunk '{}' version marker {} disagrees with record version {}",
                self.name, marker, record.version
            );
            return Err(CacheError::ChunkConflict {
                name: self.name.clone(),
                expected: marker,
                actual: record.version,
            });
        }

        if marker.is_none() {
            debug!(
                "Chunk '{}' has no version marker, writing {}",
                self.name, record.version
            );
            self.write_marker(record.version)?;
        }

        debug!(
            "Chunk '{}' loaded: version={}, keys={}",
            self.name,
            record.version,
            record.data.len()
        );
        state.base_version = record.version;
        state.snapshot = record.data;
        state.dirty = false;
        Ok(())
    }

    /// Commit the snapshot if it changed since load or the last commit.
    ///
    /// Fails with [`CacheError::ChunkConflict`] when another writer got there
    /// first; the handle is left untouched and should be discarded.
    pub fn save_changes(&self) -> Result<()> {
        let mut state = self.state.lock();

        if !state.dirty {
            return Ok(());
        }
        let base = state.base_version;

        // Cheap check first: only the 8 byte marker
        let marker = match self.read_marker()? {
            Some(marker) => marker,
            None => {
                let current = self.read_record()?;
                self.write_marker(current.version)?;
                current.version
            }
        };
        if marker != base {
            return Err(self.conflict(base, marker));
        }

        // The marker can match while the record itself moved on
        let current = self.read_record()?;
        if current.version != base {
            return Err(self.conflict(base, current.version));
        }

        let version = base.checked_add(1).ok_or_else(|| {
            CacheError::CorruptRecord(format!(
                "chunk '{}' version {} cannot be advanced",
                self.name, base
            ))
        })?;
        let next = ChunkRecord {
            version,
            data: state.snapshot.clone(),
        };
        self.write_record(&next)?;
        self.write_marker(next.version)?;

        debug!(
            "Chunk '{}' committed: version {} -> {}, keys={}",
            self.name,
            base,
            next.version,
            next.data.len()
        );
        state.base_version = next.version;
        state.dirty = false;
        Ok(())
    }

    fn conflict(&self, expected: u64, actual: u64) -> CacheError {
        warn!(
            "Chunk '{}' conflict: expected version {}, found {}",
            self.name, expected, actual
        );
        CacheError::ChunkConflict {
            name: self.name.clone(),
            expected,
            actual,
        }
    }

    fn read_marker(&self) -> Result<Option<u64>> {
        self.cache
            .get(&codec::chunk_version_key(&self.name))?
            .map(|bytes| codec::decode_version(&bytes))
            .transpose()
    }

    fn write_marker(&self, version: u64) -> Result<()> {
        self.cache.set(
            &codec::chunk_version_key(&self.name),
            &codec::encode_version(version),
            self.ttl_seconds,
        )
    }

    /// Read the record, treating absence as an empty version 0 record
    fn read_record(&self) -> Result<ChunkRecord> {
        match self.cache.get(&codec::chunk_key(&self.name))? {
            Some(bytes) => ChunkRecord::decode(&bytes),
            None => Ok(ChunkRecord::default()),
        }
    }

    fn write_record(&self, record: &ChunkRecord) -> Result<()> {
        self.cache.set(
            &codec::chunk_key(&self.name),
            &record.encode()?,
            self.ttl_seconds,
        )
    }

    /// Get a copy of a value from the snapshot
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.state.lock().snapshot.get(key).cloned()
    }

    /// Store a copy of `value` in the snapshot
    pub fn set(&self, key: &[u8], value: &[u8]) {
        let mut state = self.state.lock();
        state.snapshot.insert(key.to_vec(), value.to_vec());
        state.dirty = true;
    }

    /// Remove a key. Marks the snapshot dirty even if the key was absent.
    pub fn delete(&self, key: &[u8]) {
        let mut state = self.state.lock();
        state.snapshot.remove(key);
        state.dirty = true;
    }

    /// Remove a key and return its value in one critical section
    pub fn get_and_delete(&self, key: &[u8]) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        let value = state.snapshot.remove(key)?;
        state.dirty = true;
        Some(value)
    }

    /// Drop every key from the snapshot
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.snapshot = HashMap::new();
        state.dirty = true;
    }

    /// Return the value for `key`, producing and storing it on a miss.
    ///
    /// `factory` runs at most once and only on a miss, outside the handle's
    /// lock. If another caller stored the key meanwhile, that value wins and
    /// is returned. A factory error leaves the snapshot untouched.
    pub fn on_set<F>(&self, key: &[u8], factory: F) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let produced = factory()?;

        let mut state = self.state.lock();
        if let Some(existing) = state.snapshot.get(key) {
            return Ok(existing.clone());
        }
        state.snapshot.insert(key.to_vec(), produced.clone());
        state.dirty = true;
        Ok(produced)
    }

    /// Typed get; a value that fails to decode is an error
    pub fn get_as<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        self.get(key)
            .map(|bytes| codec::decode_value(&bytes))
            .transpose()
    }

    /// Typed set
    pub fn set_as<T: Serialize + ?Sized>(&self, key: &[u8], value: &T) -> Result<()> {
        let bytes = codec::encode_value(value)?;
        self.set(key, &bytes);
        Ok(())
    }

    /// Typed lazy population, see [`Chunk::on_set`]
    pub fn on_set_as<T, F>(&self, key: &[u8], factory: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        let bytes = self.on_set(key, || codec::encode_value(&factory()?))?;
        codec::decode_value(&bytes)
    }

    /// Chunk name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// TTL applied to every write this handle performs
    pub fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    /// Version the snapshot is based on
    pub fn version(&self) -> u64 {
        self.state.lock().base_version
    }

    /// Whether the snapshot changed since load or the last commit
    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    pub fn len(&self) -> usize {
        self.state.lock().snapshot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().snapshot.is_empty()
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.state.lock().snapshot.contains_key(key)
    }

    /// Copies of all keys currently in the snapshot, in no particular order
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.state.lock().snapshot.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryStore, MemoryStoreConfig, StorageBackend};
    use serde::Deserialize;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestObj {
        a: i64,
        b: String,
    }

    fn cache() -> Cache {
        Cache::new(Arc::new(MemoryStore::new(MemoryStoreConfig::default())))
    }

    #[test]
    fn test_new_chunk_starts_at_version_zero() {
        let cache = cache();
        let chunk = cache.chunk("fresh", 60).unwrap();

        assert_eq!(chunk.version(), 0);
        assert!(chunk.is_empty());
        assert!(!chunk.is_dirty());

        // Load repaired the missing marker
        let marker = cache.get(&codec::chunk_version_key("fresh")).unwrap();
        assert_eq!(marker, Some(codec::encode_version(0).to_vec()));
    }

    #[test]
    fn test_save_without_changes_is_noop() {
        let cache = cache();
        let chunk = cache.chunk("idle", 60).unwrap();

        // Sabotage the marker; a clean handle must not even look at it
        cache
            .set(&codec::chunk_version_key("idle"), b"bad", 60)
            .unwrap();
        chunk.save_changes().unwrap();
        assert_eq!(chunk.version(), 0);
    }

    #[test]
    fn test_commit_advances_version() {
        let cache = cache();
        let chunk = cache.chunk("counter", 60).unwrap();

        chunk.set(b"k", b"v");
        assert!(chunk.is_dirty());
        chunk.save_changes().unwrap();
        assert_eq!(chunk.version(), 1);
        assert!(!chunk.is_dirty());

        chunk.set(b"k", b"v2");
        chunk.save_changes().unwrap();
        assert_eq!(chunk.version(), 2);

        let reopened = cache.chunk("counter", 60).unwrap();
        assert_eq!(reopened.version(), 2);
        assert_eq!(reopened.get(b"k"), Some(b"v2".to_vec()));
    }

    #[test]
    fn test_copy_isolation() {
        let cache = cache();
        let chunk = cache.chunk("copies", 60).unwrap();

        let mut original = b"hello".to_vec();
        chunk.set(b"k", &original);
        original[0] = b'H';
        assert_eq!(chunk.get(b"k"), Some(b"hello".to_vec()));

        let mut read = chunk.get(b"k").unwrap();
        read[0] = b'X';
        assert_eq!(chunk.get(b"k"), Some(b"hello".to_vec()));
    }

    #[test]
    fn test_delete_marks_dirty_even_when_absent() {
        let cache = cache();
        let chunk = cache.chunk("del", 60).unwrap();

        chunk.delete(b"missing");
        assert!(chunk.is_dirty());
        chunk.save_changes().unwrap();
        assert_eq!(chunk.version(), 1);
    }

    #[test]
    fn test_get_and_delete() {
        let cache = cache();
        let chunk = cache.chunk("gad", 60).unwrap();

        assert_eq!(chunk.get_and_delete(b"missing"), None);
        assert!(!chunk.is_dirty());

        chunk.set(b"k", b"value");
        assert_eq!(chunk.get_and_delete(b"k"), Some(b"value".to_vec()));
        assert_eq!(chunk.get(b"k"), None);

        chunk.save_changes().unwrap();
        let reopened = cache.chunk("gad", 60).unwrap();
        assert!(!reopened.contains_key(b"k"));
    }

    #[test]
    fn test_on_set_invokes_factory_once() {
        let cache = cache();
        let chunk = cache.chunk("lazy", 60).unwrap();
        let mut calls = 0;

        let first = chunk
            .on_set(b"k", || {
                calls += 1;
                Ok(b"made".to_vec())
            })
            .unwrap();
        let second = chunk
            .on_set(b"k", || {
                calls += 1;
                Ok(b"must-not-run".to_vec())
            })
            .unwrap();

        assert_eq!(calls, 1);
        assert_eq!(first, b"made".to_vec());
        assert_eq!(second, first);
    }

    #[test]
    fn test_on_set_factory_error_leaves_snapshot_clean() {
        let cache = cache();
        let chunk = cache.chunk("lazy_err", 60).unwrap();

        let result = chunk.on_set(b"k", || Err(CacheError::factory("boom")));
        assert!(matches!(result, Err(CacheError::Factory(_))));
        assert!(!chunk.contains_key(b"k"));
        assert!(!chunk.is_dirty());
    }

    #[test]
    fn test_typed_helpers() {
        let cache = cache();
        let chunk = cache.chunk("typed", 60).unwrap();
        let want = TestObj {
            a: 123,
            b: "hello".to_string(),
        };

        chunk.set_as(b"obj", &want).unwrap();
        assert_eq!(chunk.get_as::<TestObj>(b"obj").unwrap(), Some(want.clone()));
        assert_eq!(chunk.get_as::<TestObj>(b"missing").unwrap(), None);

        let made: TestObj = chunk
            .on_set_as(b"lazy", || {
                Ok(TestObj {
                    a: 7,
                    b: "created".to_string(),
                })
            })
            .unwrap();
        assert_eq!(made.a, 7);

        let again: TestObj = chunk
            .on_set_as(b"lazy", || panic!("factory must not run on a hit"))
            .unwrap();
        assert_eq!(again, made);
    }

    #[test]
    fn test_typed_get_decode_failure_is_error() {
        let cache = cache();
        let chunk = cache.chunk("typed_bad", 60).unwrap();

        chunk.set(b"obj", &[0xff]);
        assert!(matches!(
            chunk.get_as::<TestObj>(b"obj"),
            Err(CacheError::Serialization(_))
        ));
    }

    #[test]
    fn test_conflict_between_handles() {
        let cache = cache();
        let a = cache.chunk("shared", 60).unwrap();
        let b = cache.chunk("shared", 60).unwrap();

        a.set(b"k", b"A");
        a.save_changes().unwrap();

        b.set(b"k", b"B");
        let err = b.save_changes().unwrap_err();
        assert!(err.is_conflict());

        // Loser keeps its state, backend only has the winner's commit
        assert!(b.is_dirty());
        assert_eq!(b.version(), 0);
        let fresh = cache.chunk("shared", 60).unwrap();
        assert_eq!(fresh.version(), 1);
        assert_eq!(fresh.get(b"k"), Some(b"A".to_vec()));
    }

    #[test]
    fn test_record_ahead_of_marker_fails_closed() {
        let cache = cache();
        let chunk = cache.chunk("torn", 60).unwrap();
        chunk.set(b"k", b"v");
        chunk.save_changes().unwrap();

        // Record written, marker write lost
        let record = ChunkRecord {
            version: 2,
            data: HashMap::new(),
        };
        cache
            .set(&codec::chunk_key("torn"), &record.encode().unwrap(), 60)
            .unwrap();

        let err = cache.chunk("torn", 60).unwrap_err();
        assert!(matches!(
            err,
            CacheError::ChunkConflict {
                expected: 1,
                actual: 2,
                ..
            }
        ));

        // The existing handle is also rejected
        chunk.set(b"k", b"v2");
        assert!(chunk.save_changes().unwrap_err().is_conflict());
    }

    #[test]
    fn test_marker_matches_but_record_moved() {
        let cache = cache();
        let chunk = cache.chunk("moved", 60).unwrap();

        let record = ChunkRecord {
            version: 5,
            data: HashMap::new(),
        };
        cache
            .set(&codec::chunk_key("moved"), &record.encode().unwrap(), 60)
            .unwrap();

        chunk.set(b"k", b"v");
        let err = chunk.save_changes().unwrap_err();
        assert!(matches!(
            err,
            CacheError::ChunkConflict {
                expected: 0,
                actual: 5,
                ..
            }
        ));
    }

    #[test]
    fn test_missing_marker_is_repaired_on_commit() {
        let cache = cache();
        let chunk = cache.chunk("repair", 60).unwrap();
        cache.delete(&codec::chunk_version_key("repair")).unwrap();

        chunk.set(b"k", b"v");
        chunk.save_changes().unwrap();

        let marker = cache.get(&codec::chunk_version_key("repair")).unwrap();
        assert_eq!(marker, Some(codec::encode_version(1).to_vec()));
    }

    #[test]
    fn test_repaired_marker_still_checked_against_base() {
        let cache = cache();
        let a = cache.chunk("repair_conflict", 60).unwrap();
        let b = cache.chunk("repair_conflict", 60).unwrap();

        a.set(b"k", b"A");
        a.save_changes().unwrap();
        cache
            .delete(&codec::chunk_version_key("repair_conflict"))
            .unwrap();

        b.set(b"k", b"B");
        assert!(b.save_changes().unwrap_err().is_conflict());

        let marker = cache
            .get(&codec::chunk_version_key("repair_conflict"))
            .unwrap();
        assert_eq!(marker, Some(codec::encode_version(1).to_vec()));
    }

    #[test]
    fn test_corrupt_marker_is_not_absence() {
        let cache = cache();
        cache
            .set(&codec::chunk_version_key("corrupt"), &[1, 2, 3], 60)
            .unwrap();

        let err = cache.chunk("corrupt", 60).unwrap_err();
        assert!(matches!(err, CacheError::CorruptVersionMarker { len: 3 }));
    }

    #[test]
    fn test_corrupt_record_is_error() {
        let cache = cache();
        cache
            .set(&codec::chunk_key("garbage"), &[0xff, 0xff], 60)
            .unwrap();

        let err = cache.chunk("garbage", 60).unwrap_err();
        assert!(matches!(err, CacheError::CorruptRecord(_)));
    }

    #[test]
    fn test_version_at_max_cannot_advance() {
        let cache = cache();
        let record = ChunkRecord {
            version: u64::MAX,
            data: HashMap::new(),
        };
        cache
            .set(&codec::chunk_key("maxed"), &record.encode().unwrap(), 60)
            .unwrap();

        let chunk = cache.chunk("maxed", 60).unwrap();
        assert_eq!(chunk.version(), u64::MAX);

        chunk.set(b"k", b"v");
        let err = chunk.save_changes().unwrap_err();
        assert!(matches!(err, CacheError::CorruptRecord(_)));

        // Nothing was written
        let reopened = cache.chunk("maxed", 60).unwrap();
        assert_eq!(reopened.version(), u64::MAX);
        assert!(reopened.is_empty());
    }

    #[test]
    fn test_clear_then_commit() {
        let cache = cache();
        let chunk = cache.chunk("clear", 60).unwrap();

        chunk.set(b"a", b"1");
        chunk.set(b"b", b"2");
        chunk.save_changes().unwrap();

        chunk.clear();
        assert!(chunk.is_empty());
        chunk.save_changes().unwrap();

        let reopened = cache.chunk("clear", 60).unwrap();
        assert_eq!(reopened.get(b"a"), None);
        assert_eq!(reopened.get(b"b"), None);
    }

    #[test]
    fn test_handle_shared_between_threads() {
        let cache = cache();
        let chunk = Arc::new(cache.chunk("threads", 60).unwrap());

        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let chunk = Arc::clone(&chunk);
                std::thread::spawn(move || chunk.set(&[i], &[i]))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(chunk.len(), 8);
        chunk.save_changes().unwrap();
        assert_eq!(cache.chunk("threads", 60).unwrap().len(), 8);
    }

    #[test]
    fn test_keys_and_debug() {
        let cache = cache();
        let chunk = cache.chunk("keys", 30).unwrap();
        chunk.set(b"x", b"1");
        chunk.set(b"y", b"2");

        let mut keys = chunk.keys();
        keys.sort();
        assert_eq!(keys, vec![b"x".to_vec(), b"y".to_vec()]);
        assert_eq!(chunk.name(), "keys");
        assert_eq!(chunk.ttl_seconds(), 30);
        assert!(format!("{:?}", chunk).contains("keys: 2"));

        let backend: Arc<dyn StorageBackend> = cache.backend();
        assert_eq!(backend.name(), "memory");
    }
}
