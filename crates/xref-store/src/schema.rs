//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Entity rows, keyed by `table || 0x00 || local_id`.
    pub const ENTITIES: &str = "entities";

    /// Index: local id by global id, keyed by `table || 0x00 || global_id`.
    pub const GLOBAL_INDEX: &str = "global_index";

    /// Last assigned local id per table, keyed by `table`.
    pub const SEQUENCES: &str = "sequences";

    /// Deleted entities, keyed by `table || 0x00 || global_id`.
    pub const TOMBSTONES: &str = "tombstones";

    /// Deferred records, keyed by `missing_id || record_id`.
    pub const DEFERRED: &str = "deferred";

    /// Index: deferred key by record, keyed by `record_id`.
    pub const DEFERRED_BY_RECORD: &str = "deferred_by_record";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ENTITIES,
        cf::GLOBAL_INDEX,
        cf::SEQUENCES,
        cf::TOMBSTONES,
        cf::DEFERRED,
        cf::DEFERRED_BY_RECORD,
    ]
}
