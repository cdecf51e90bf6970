//! Disk Store
//!
//! Embedded persistent key/value store built on an append-only log.
//!
//! Every write appends a checksummed record; an in-memory index maps each
//! live key to the position of its latest record and is rebuilt by replaying
//! the log on open. Overwritten and deleted records stay in the log as
//! garbage until `compact()` rewrites the live set.
//!
//! Record framing:
//! - size (u64, big endian)
//! - checksum (u32, crc32 of data)
//! - header checksum (u32, crc32 of size + checksum)
//! - data (bincode encoded `LogRecord`)
//!
//! A frame with a valid header but missing data is a torn tail and gets
//! truncated. A header that fails its checksum is corruption.

use super::StorageBackend;
use crate::core::error::{CacheError, Result};
use crate::core::types::{ttl_duration, unix_millis};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const LOG_FILE: &str = "cache.log";
const COMPACT_FILE: &str = "cache.log.compact";
const HEADER_LEN: u64 = 16;

/// When to fsync the log after a write
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FsyncMode {
    /// Sync after every write
    Always,
    /// Leave flushing to the OS
    #[default]
    Never,
}

/// Disk store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskStoreConfig {
    pub directory: PathBuf,
    pub fsync: FsyncMode,
    /// Garbage share of the log (0.0..=1.0) that triggers compaction on open.
    /// 0 disables it.
    pub gc_ratio: f64,
}

impl Default for DiskStoreConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./data/chunkcache"),
            fsync: FsyncMode::Never,
            gc_ratio: 0.5,
        }
    }
}

/// A single log record
#[derive(Debug, Clone, Serialize, Deserialize)]
enum LogRecord {
    Put {
        key: Vec<u8>,
        value: Vec<u8>,
        /// Absolute expiry in unix milliseconds
        expires_at: Option<u64>,
    },
    Delete {
        key: Vec<u8>,
    },
}

/// Index entry pointing at the payload of the latest `Put` for a key
#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    offset: u64,
    size: u64,
    checksum: u32,
    expires_at: Option<u64>,
}

impl IndexEntry {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|expires| now >= expires)
    }

    fn frame_len(&self) -> u64 {
        HEADER_LEN + self.size
    }
}

struct DiskState {
    file: File,
    index: HashMap<Vec<u8>, IndexEntry>,
    end_offset: u64,
    live_bytes: u64,
}

/// Disk store statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskStoreStats {
    pub entries: usize,
    pub log_bytes: u64,
    pub live_bytes: u64,
    pub garbage_ratio: f64,
}

/// Persistent log-structured store
pub struct DiskStore {
    config: DiskStoreConfig,
    state: Mutex<Option<DiskState>>,
}

fn encode_record(record: &LogRecord) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(record, bincode::config::standard())
        .map_err(|e| CacheError::Serialization(e.to_string()))
}

fn decode_record(data: &[u8]) -> Result<LogRecord> {
    bincode::serde::decode_from_slice::<LogRecord, _>(data, bincode::config::standard())
        .map(|(record, _)| record)
        .map_err(|e| CacheError::CorruptRecord(format!("undecodable log record: {}", e)))
}

fn frame(data: &[u8], checksum: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN as usize + data.len());
    buf.extend_from_slice(&(data.len() as u64).to_be_bytes());
    buf.extend_from_slice(&checksum.to_be_bytes());
    let header_checksum = crc32fast::hash(&buf);
    buf.extend_from_slice(&header_checksum.to_be_bytes());
    buf.extend_from_slice(data);
    buf
}

/// Outcome of reading one frame during replay
enum Frame {
    Record { data: Vec<u8>, checksum: u32 },
    Eof,
    Torn,
}

fn read_frame<R: Read>(reader: &mut R, offset: u64, remaining: u64) -> Result<Frame> {
    let mut header = [0u8; HEADER_LEN as usize];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            return Ok(if remaining == 0 { Frame::Eof } else { Frame::Torn });
        }
        Err(e) => return Err(e.into()),
    }

    let mut size_bytes = [0u8; 8];
    size_bytes.copy_from_slice(&header[..8]);
    let mut checksum_bytes = [0u8; 4];
    checksum_bytes.copy_from_slice(&header[8..12]);
    let mut header_checksum_bytes = [0u8; 4];
    header_checksum_bytes.copy_from_slice(&header[12..]);

    let expected = u32::from_be_bytes(header_checksum_bytes);
    let actual = crc32fast::hash(&header[..12]);
    if actual != expected {
        return Err(CacheError::CorruptRecord(format!(
            "header checksum mismatch at offset {}: expected {}, got {}",
            offset, expected, actual
        )));
    }

    let size = u64::from_be_bytes(size_bytes);
    let checksum = u32::from_be_bytes(checksum_bytes);
    if size > remaining.saturating_sub(HEADER_LEN) {
        return Ok(Frame::Torn);
    }

    let mut data = vec![0u8; size as usize];
    reader.read_exact(&mut data)?;
    Ok(Frame::Record { data, checksum })
}

impl DiskState {
    fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        let mut state = Self {
            file,
            index: HashMap::new(),
            end_offset: 0,
            live_bytes: 0,
        };
        state.replay()?;
        Ok(state)
    }

    /// Rebuild the index from the log, truncating a torn tail record
    fn replay(&mut self) -> Result<()> {
        let file_len = self.file.metadata()?.len();
        self.file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&self.file);
        let mut offset = 0u64;
        let mut records = 0usize;

        let mut index: HashMap<Vec<u8>, IndexEntry> = HashMap::new();
        loop {
            let (data, checksum) = match read_frame(&mut reader, offset, file_len - offset)? {
                Frame::Record { data, checksum } => (data, checksum),
                Frame::Eof => break,
                Frame::Torn => {
                    warn!(
                        "Incomplete log record at offset {}, truncating {} bytes",
                        offset,
                        file_len - offset
                    );
                    break;
                }
            };

            let frame_end = offset + HEADER_LEN + data.len() as u64;
            let actual = crc32fast::hash(&data);
            if actual != checksum {
                if frame_end == file_len {
                    warn!("Checksum mismatch on last log record, truncating");
                    break;
                }
                return Err(CacheError::CorruptRecord(format!(
                    "checksum mismatch at offset {}: expected {}, got {}",
                    offset, checksum, actual
                )));
            }

            match decode_record(&data)? {
                LogRecord::Put {
                    key, expires_at, ..
                } => {
                    index.insert(
                        key,
                        IndexEntry {
                            offset: offset + HEADER_LEN,
                            size: data.len() as u64,
                            checksum,
                            expires_at,
                        },
                    );
                }
                LogRecord::Delete { key } => {
                    index.remove(&key);
                }
            }

            records += 1;
            offset = frame_end;
        }
        drop(reader);

        if offset < file_len {
            self.file.set_len(offset)?;
        }

        self.live_bytes = index.values().map(IndexEntry::frame_len).sum();
        self.index = index;
        self.end_offset = offset;

        debug!(
            "Replayed {} log records, {} live keys",
            records,
            self.index.len()
        );
        Ok(())
    }

    fn append(&mut self, record: &LogRecord, fsync: FsyncMode) -> Result<(u64, u64, u32)> {
        let data = encode_record(record)?;
        let checksum = crc32fast::hash(&data);
        let offset = self.end_offset;

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&frame(&data, checksum))?;
        if fsync == FsyncMode::Always {
            self.file.sync_data()?;
        }

        self.end_offset = offset + HEADER_LEN + data.len() as u64;
        Ok((offset + HEADER_LEN, data.len() as u64, checksum))
    }

    fn read_value(&mut self, entry: &IndexEntry) -> Result<Vec<u8>> {
        let mut data = vec![0u8; entry.size as usize];
        self.file.seek(SeekFrom::Start(entry.offset))?;
        self.file.read_exact(&mut data)?;

        if crc32fast::hash(&data) != entry.checksum {
            return Err(CacheError::CorruptRecord(format!(
                "checksum mismatch at offset {}",
                entry.offset
            )));
        }

        match decode_record(&data)? {
            LogRecord::Put { value, .. } => Ok(value),
            LogRecord::Delete { .. } => Err(CacheError::CorruptRecord(format!(
                "index points at a delete record (offset {})",
                entry.offset
            ))),
        }
    }

    fn forget(&mut self, key: &[u8]) -> Option<IndexEntry> {
        let entry = self.index.remove(key)?;
        self.live_bytes = self.live_bytes.saturating_sub(entry.frame_len());
        Some(entry)
    }

    fn garbage_ratio(&self) -> f64 {
        if self.end_offset == 0 {
            0.0
        } else {
            1.0 - self.live_bytes as f64 / self.end_offset as f64
        }
    }
}

impl DiskStore {
    /// Create or open a store in `config.directory`
    pub fn open(config: DiskStoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.directory)?;

        let state = DiskState::open(&config.directory.join(LOG_FILE))?;
        info!(
            "Disk store opened at {:?}: {} keys, {} log bytes",
            config.directory,
            state.index.len(),
            state.end_offset
        );

        let gc_ratio = config.gc_ratio;
        let needs_gc = gc_ratio > 0.0 && state.garbage_ratio() >= gc_ratio;
        let store = Self {
            config,
            state: Mutex::new(Some(state)),
        };

        if needs_gc {
            store.compact()?;
        }
        Ok(store)
    }

    /// Rewrite the log keeping only live, unexpired entries.
    /// Returns the number of bytes reclaimed.
    pub fn compact(&self) -> Result<u64> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or(CacheError::Closed)?;

        let log_path = self.config.directory.join(LOG_FILE);
        let tmp_path = self.config.directory.join(COMPACT_FILE);
        let before = state.end_offset;
        let now = unix_millis();

        let mut live: Vec<(Vec<u8>, IndexEntry)> = state
            .index
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, entry)| (key.clone(), *entry))
            .collect();
        live.sort_by_key(|(_, entry)| entry.offset);

        {
            let mut out = File::create(&tmp_path)?;
            for (_, entry) in &live {
                let mut data = vec![0u8; entry.size as usize];
                state.file.seek(SeekFrom::Start(entry.offset))?;
                state.file.read_exact(&mut data)?;
                out.write_all(&frame(&data, entry.checksum))?;
            }
            out.sync_all()?;
        }

        // Atomic rename
        fs::rename(&tmp_path, &log_path)?;
        *state = DiskState::open(&log_path)?;

        let reclaimed = before.saturating_sub(state.end_offset);
        info!(
            "Disk store compacted: {} live keys, {} bytes reclaimed",
            state.index.len(),
            reclaimed
        );
        Ok(reclaimed)
    }

    /// Get store statistics
    pub fn stats(&self) -> Result<DiskStoreStats> {
        let guard = self.state.lock();
        let state = guard.as_ref().ok_or(CacheError::Closed)?;

        Ok(DiskStoreStats {
            entries: state.index.len(),
            log_bytes: state.end_offset,
            live_bytes: state.live_bytes,
            garbage_ratio: state.garbage_ratio(),
        })
    }

    /// Directory holding the log
    pub fn directory(&self) -> &Path {
        &self.config.directory
    }
}

impl StorageBackend for DiskStore {
    fn name(&self) -> &'static str {
        "disk"
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or(CacheError::Closed)?;

        let entry = match state.index.get(key) {
            Some(entry) => *entry,
            None => return Ok(None),
        };

        if entry.is_expired(unix_millis()) {
            debug!("Key expired: {}", String::from_utf8_lossy(key));
            state.forget(key);
            return Ok(None);
        }

        state.read_value(&entry).map(Some)
    }

    fn set(&self, key: &[u8], value: &[u8], ttl_seconds: i64) -> Result<()> {
        debug!(
            "SET key={}, size={}, ttl={}",
            String::from_utf8_lossy(key),
            value.len(),
            ttl_seconds
        );

        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or(CacheError::Closed)?;

        let expires_at =
            ttl_duration(ttl_seconds).map(|ttl| {
                unix_millis().saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
            });
        let record = LogRecord::Put {
            key: key.to_vec(),
            value: value.to_vec(),
            expires_at,
        };
        let (offset, size, checksum) = state.append(&record, self.config.fsync)?;

        state.forget(key);
        let entry = IndexEntry {
            offset,
            size,
            checksum,
            expires_at,
        };
        state.live_bytes += entry.frame_len();
        state.index.insert(key.to_vec(), entry);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        debug!("DELETE key={}", String::from_utf8_lossy(key));

        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or(CacheError::Closed)?;

        if !state.index.contains_key(key) {
            return Ok(());
        }

        state.append(&LogRecord::Delete { key: key.to_vec() }, self.config.fsync)?;
        state.forget(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or(CacheError::Closed)?;

        info!("Clearing disk store at {:?}", self.config.directory);
        state.file.set_len(0)?;
        state.file.sync_all()?;
        state.index.clear();
        state.end_offset = 0;
        state.live_bytes = 0;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let state = self.state.lock().take();
        if let Some(state) = state {
            state.file.sync_all()?;
            info!("Disk store closed at {:?}", self.config.directory);
        }
        Ok(())
    }
}

impl Drop for DiskStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close disk store: {}", e);
        }
    }
}
