//! Key encoding utilities for `RocksDB`.
//!
//! This module provides functions to encode and decode keys for the entity
//! rows, the translation indexes and the deferred queue. All keys are designed
//! to support efficient prefix scans.
//!
//! Table names are separated from the rest of the key by a `0x00` byte so that
//! the prefix of `file` never matches rows of `files`.

use xref_core::{GlobalId, LocalId};

const SEPARATOR: u8 = 0;

/// Encode a table prefix: `table || 0x00`.
#[must_use]
pub fn table_prefix(table: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(table.len() + 1);
    key.extend_from_slice(table.as_bytes());
    key.push(SEPARATOR);
    key
}

/// Encode an entity row key: `table || 0x00 || local_id`.
///
/// Local ids are big-endian so a prefix scan yields rows in id order.
#[must_use]
pub fn entity_key(table: &str, local_id: LocalId) -> Vec<u8> {
    let mut key = table_prefix(table);
    key.extend_from_slice(&local_id.to_be_bytes());
    key
}

/// Encode a global index key: `table || 0x00 || global_id`.
///
/// Also used for tombstones, in their own column family.
#[must_use]
pub fn global_key(table: &str, global_id: &GlobalId) -> Vec<u8> {
    let mut key = table_prefix(table);
    key.extend_from_slice(global_id.as_bytes());
    key
}

/// Encode a sequence key (just the table name).
#[must_use]
pub fn sequence_key(table: &str) -> Vec<u8> {
    table.as_bytes().to_vec()
}

/// Encode a deferred queue key: `missing_id || record_id`.
///
/// This allows efficient prefix scans for every record blocked on one
/// dependency.
#[must_use]
pub fn deferred_key(missing_id: &GlobalId, record_id: &GlobalId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(missing_id.as_bytes());
    key.extend_from_slice(record_id.as_bytes());
    key
}

/// Encode a dependency prefix for scanning all records blocked on it.
#[must_use]
pub fn deferred_prefix(missing_id: &GlobalId) -> Vec<u8> {
    missing_id.as_bytes().to_vec()
}

/// Encode a deferred-by-record index key (just the record id bytes).
#[must_use]
pub fn deferred_record_key(record_id: &GlobalId) -> Vec<u8> {
    record_id.as_bytes().to_vec()
}

/// Extract the record id from a deferred queue key.
#[must_use]
pub fn extract_record_id_from_deferred_key(key: &[u8]) -> Option<GlobalId> {
    key.get(16..32).and_then(|bytes| GlobalId::from_slice(bytes).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_keys_sort_by_local_id() {
        let low = entity_key("locations", LocalId::new(3));
        let high = entity_key("locations", LocalId::new(256));
        assert_eq!(low.len(), "locations".len() + 1 + 8);
        assert!(low < high);
    }

    #[test]
    fn table_prefixes_do_not_overlap() {
        let file_key = entity_key("file", LocalId::new(1));
        let files_key = entity_key("files", LocalId::new(1));

        assert!(file_key.starts_with(&table_prefix("file")));
        assert!(!files_key.starts_with(&table_prefix("file")));
    }

    #[test]
    fn deferred_key_roundtrip() {
        let missing = GlobalId::generate();
        let record = GlobalId::generate();

        let key = deferred_key(&missing, &record);
        assert_eq!(key.len(), 32);
        assert!(key.starts_with(&deferred_prefix(&missing)));
        assert_eq!(extract_record_id_from_deferred_key(&key), Some(record));
    }

    #[test]
    fn short_deferred_key_is_rejected() {
        assert_eq!(extract_record_id_from_deferred_key(&[0u8; 20]), None);
    }
}
