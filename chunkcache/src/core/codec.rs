//! Key naming and wire formats for chunks
//!
//! Layout shared with existing stores:
//! - payload key: `cache_package_chank_<name>`
//! - version key: `cache_package_chank_<name>_version`
//! - version marker: 8 bytes, u64 little endian
//! - chunk record: bincode (serde, standard config) of [`ChunkRecord`]

use super::error::{CacheError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const CHUNK_KEY_PREFIX: &str = "cache_package_chank_";
const VERSION_KEY_SUFFIX: &str = "_version";

/// Length of an encoded version marker
pub const VERSION_MARKER_LEN: usize = 8;

/// Backend key holding the chunk record
pub fn chunk_key(name: &str) -> Vec<u8> {
    format!("{}{}", CHUNK_KEY_PREFIX, name).into_bytes()
}

/// Backend key holding the version marker
pub fn chunk_version_key(name: &str) -> Vec<u8> {
    format!("{}{}{}", CHUNK_KEY_PREFIX, name, VERSION_KEY_SUFFIX).into_bytes()
}

pub fn encode_version(version: u64) -> [u8; VERSION_MARKER_LEN] {
    version.to_le_bytes()
}

/// Decode a version marker. Any length other than 8 is corruption.
pub fn decode_version(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; VERSION_MARKER_LEN] = bytes
        .try_into()
        .map_err(|_| CacheError::CorruptVersionMarker { len: bytes.len() })?;
    Ok(u64::from_le_bytes(raw))
}

/// Persisted form of a chunk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub version: u64,
    pub data: HashMap<Vec<u8>, Vec<u8>>,
}

impl ChunkRecord {
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| CacheError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::serde::decode_from_slice::<Self, _>(bytes, bincode::config::standard())
            .map(|(record, _)| record)
            .map_err(|e| CacheError::CorruptRecord(e.to_string()))
    }
}

/// Encode a structured value for the typed helpers
pub fn encode_value<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| CacheError::Serialization(e.to_string()))
}

/// Decode a structured value for the typed helpers
pub fn decode_value<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::serde::decode_from_slice::<T, _>(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| CacheError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_naming_is_bit_exact() {
        assert_eq!(chunk_key("users"), b"cache_package_chank_users".to_vec());
        assert_eq!(
            chunk_version_key("users"),
            b"cache_package_chank_users_version".to_vec()
        );
        assert_ne!(chunk_key("a_version"), chunk_version_key("a"));
    }

    #[test]
    fn test_version_marker_is_little_endian() {
        assert_eq!(encode_version(1), [1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(decode_version(&[0, 1, 0, 0, 0, 0, 0, 0]).unwrap(), 256);
        assert_eq!(decode_version(&encode_version(u64::MAX)).unwrap(), u64::MAX);
    }

    #[test]
    fn test_version_marker_wrong_length_is_corruption() {
        let err = decode_version(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, CacheError::CorruptVersionMarker { len: 3 }));

        let err = decode_version(&[]).unwrap_err();
        assert!(matches!(err, CacheError::CorruptVersionMarker { len: 0 }));
    }

    #[test]
    fn test_record_decode_preserves_bytes() {
        let mut record = ChunkRecord {
            version: 7,
            data: HashMap::new(),
        };
        record.data.insert(vec![0, 255], vec![]);
        record.data.insert(b"k".to_vec(), vec![0xde, 0xad, 0xbe, 0xef]);

        let decoded = ChunkRecord::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_garbage_record_is_corruption() {
        let err = ChunkRecord::decode(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_value_decode_type_mismatch() {
        let bytes = encode_value(&"text").unwrap();
        assert!(matches!(
            decode_value::<Vec<u64>>(&bytes[..1]),
            Err(CacheError::Serialization(_))
        ));
    }
}
