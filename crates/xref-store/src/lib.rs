//! `RocksDB` storage layer for xref.
//!
//! This crate is the local database of one device. It persists synced entity
//! rows and answers the two translation lookups the sync layer needs
//! (local id to global id and back), plus the durable queue of records that
//! are waiting for a dependency to arrive.
//!
//! # Architecture
//!
//! The storage uses the following column families:
//!
//! - `entities`: Entity rows, keyed by `table || local_id`
//! - `global_index`: Index from `table || global_id` to `local_id`
//! - `sequences`: Last assigned local id per table
//! - `tombstones`: Deleted entities, keyed by `table || global_id`
//! - `deferred`: Deferred records, keyed by `missing_id || record_id`
//! - `deferred_by_record`: Index from `record_id` to its deferred key
//!
//! # Example
//!
//! ```no_run
//! use xref_core::{GlobalId, Record};
//! use xref_store::{RocksStore, Store};
//!
//! let store = RocksStore::open("/tmp/xref-db").unwrap();
//!
//! let device = GlobalId::generate();
//! let local = store
//!     .upsert_entity("devices", &device, &Record::new().with("name", "laptop".to_string()))
//!     .unwrap();
//! assert_eq!(store.lookup_local_by_global("devices", &device).unwrap(), Some(local));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;
pub mod types;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;
pub use types::{DeferredRecord, MissingRef, StoredEntity, Tombstone};

use std::collections::{HashMap, HashSet};

use xref_core::{GlobalId, LocalId, Record};

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    // =========================================================================
    // Translation Lookups
    // =========================================================================

    /// Resolve a local id to its global id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn lookup_global_by_local(&self, table: &str, local_id: LocalId) -> Result<Option<GlobalId>>;

    /// Resolve a global id to this device's local id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn lookup_local_by_global(&self, table: &str, global_id: &GlobalId)
        -> Result<Option<LocalId>>;

    /// Resolve many local ids in one read. Misses are omitted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn batch_lookup_global_by_local(
        &self,
        table: &str,
        local_ids: &HashSet<LocalId>,
    ) -> Result<HashMap<LocalId, GlobalId>>;

    /// Resolve many global ids in one read. Misses are omitted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn batch_lookup_local_by_global(
        &self,
        table: &str,
        global_ids: &HashSet<GlobalId>,
    ) -> Result<HashMap<GlobalId, LocalId>>;

    // =========================================================================
    // Entity Operations
    // =========================================================================

    /// Insert or update an entity, keyed by its global id.
    ///
    /// A new entity receives the next local id of its table; an existing one
    /// keeps its local id. `id` and `uuid` fields in `fields` are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn upsert_entity(&self, table: &str, global_id: &GlobalId, fields: &Record)
        -> Result<LocalId>;

    /// Get an entity by local id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_entity(&self, table: &str, local_id: LocalId) -> Result<Option<StoredEntity>>;

    /// Get an entity by global id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_entity_by_global(
        &self,
        table: &str,
        global_id: &GlobalId,
    ) -> Result<Option<StoredEntity>>;

    /// List all entities of a table in local id order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_entities(&self, table: &str) -> Result<Vec<StoredEntity>>;

    /// Delete an entity and record a tombstone for it.
    ///
    /// The tombstone is written even when the entity is absent, so a delete
    /// that overtakes its create still wins. Returns whether a row existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn delete_entity(&self, table: &str, global_id: &GlobalId) -> Result<bool>;

    /// Returns true if the entity has been deleted on this device.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn is_tombstoned(&self, table: &str, global_id: &GlobalId) -> Result<bool>;

    // =========================================================================
    // Deferred Queue Operations
    // =========================================================================

    /// Park a record until its dependency arrives.
    ///
    /// At most one entry is kept per record; a newer deferral of the same
    /// record replaces the older one.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_deferred(&self, record: &DeferredRecord) -> Result<()>;

    /// Get the deferred entry of a record, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_deferred(&self, record_id: &GlobalId) -> Result<Option<DeferredRecord>>;

    /// List every record blocked on `missing_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_deferred_for(&self, missing_id: &GlobalId) -> Result<Vec<DeferredRecord>>;

    /// Remove the deferred entry of a record, returning it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn remove_deferred(&self, record_id: &GlobalId) -> Result<Option<DeferredRecord>>;

    /// List every deferred record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_deferred(&self) -> Result<Vec<DeferredRecord>>;

    /// Count deferred records.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn count_deferred(&self) -> Result<usize>;
}
