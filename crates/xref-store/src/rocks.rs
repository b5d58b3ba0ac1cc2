//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};
use xref_core::{GlobalId, LocalId, Record, ID_FIELD, UUID_FIELD};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::types::{DeferredRecord, StoredEntity, Tombstone};
use crate::Store;

/// RocksDB-backed storage implementation.
///
/// Reads go straight to the database. Writes are serialized through a single
/// writer lock so that local id assignment and the multi-key index updates
/// never interleave.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Collect every key/value pair under `prefix` in a column family.
    fn scan_prefix(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let cf = self.cf(cf_name)?;
        let iter = self.db.iterator_cf(
            &cf,
            IteratorMode::From(prefix, rocksdb::Direction::Forward),
        );

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            // Stop if we're past the prefix
            if !key.starts_with(prefix) {
                break;
            }

            entries.push((key, value));
        }

        Ok(entries)
    }

    /// Last local id handed out for a table (0 if none).
    fn last_sequence(&self, table: &str) -> Result<i64> {
        let cf = self.cf(cf::SEQUENCES)?;
        match self
            .db
            .get_cf(&cf, keys::sequence_key(table))
            .map_err(|e| StoreError::Database(e.to_string()))?
        {
            Some(bytes) => LocalId::from_be_slice(&bytes)
                .map(LocalId::get)
                .map_err(|e| StoreError::Corrupt {
                    cf: cf::SEQUENCES,
                    detail: e.to_string(),
                }),
            None => Ok(0),
        }
    }

    fn decode_local_id(bytes: &[u8]) -> Result<LocalId> {
        LocalId::from_be_slice(bytes).map_err(|e| StoreError::Corrupt {
            cf: cf::GLOBAL_INDEX,
            detail: e.to_string(),
        })
    }

    /// Deferred queue key of a record, via the by-record index.
    fn deferred_key_of(&self, record_id: &GlobalId) -> Result<Option<Vec<u8>>> {
        let cf = self.cf(cf::DEFERRED_BY_RECORD)?;
        self.db
            .get_cf(&cf, keys::deferred_record_key(record_id))
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Translation Lookups
    // =========================================================================

    fn lookup_global_by_local(&self, table: &str, local_id: LocalId) -> Result<Option<GlobalId>> {
        Ok(self.get_entity(table, local_id)?.map(|e| e.global_id))
    }

    fn lookup_local_by_global(
        &self,
        table: &str,
        global_id: &GlobalId,
    ) -> Result<Option<LocalId>> {
        let cf = self.cf(cf::GLOBAL_INDEX)?;

        self.db
            .get_cf(&cf, keys::global_key(table, global_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|bytes| Self::decode_local_id(&bytes))
            .transpose()
    }

    fn batch_lookup_global_by_local(
        &self,
        table: &str,
        local_ids: &HashSet<LocalId>,
    ) -> Result<HashMap<LocalId, GlobalId>> {
        if local_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let cf = self.cf(cf::ENTITIES)?;
        let ids: Vec<LocalId> = local_ids.iter().copied().collect();
        let results = self
            .db
            .multi_get_cf(ids.iter().map(|id| (&cf, keys::entity_key(table, *id))));

        let mut found = HashMap::with_capacity(ids.len());
        for (id, result) in ids.into_iter().zip(results) {
            if let Some(data) = result.map_err(|e| StoreError::Database(e.to_string()))? {
                let entity: StoredEntity = Self::deserialize(&data)?;
                found.insert(id, entity.global_id);
            }
        }

        Ok(found)
    }

    fn batch_lookup_local_by_global(
        &self,
        table: &str,
        global_ids: &HashSet<GlobalId>,
    ) -> Result<HashMap<GlobalId, LocalId>> {
        if global_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let cf = self.cf(cf::GLOBAL_INDEX)?;
        let ids: Vec<GlobalId> = global_ids.iter().copied().collect();
        let results = self
            .db
            .multi_get_cf(ids.iter().map(|id| (&cf, keys::global_key(table, id))));

        let mut found = HashMap::with_capacity(ids.len());
        for (id, result) in ids.into_iter().zip(results) {
            if let Some(bytes) = result.map_err(|e| StoreError::Database(e.to_string()))? {
                found.insert(id, Self::decode_local_id(&bytes)?);
            }
        }

        Ok(found)
    }

    // =========================================================================
    // Entity Operations
    // =========================================================================

    fn upsert_entity(
        &self,
        table: &str,
        global_id: &GlobalId,
        fields: &Record,
    ) -> Result<LocalId> {
        let _writer = self.write_lock.lock();

        let cf_entities = self.cf(cf::ENTITIES)?;
        let cf_index = self.cf(cf::GLOBAL_INDEX)?;
        let cf_sequences = self.cf(cf::SEQUENCES)?;

        // Existing rows keep their local id
        let (local_id, created) = match self.lookup_local_by_global(table, global_id)? {
            Some(local_id) => (local_id, false),
            None => (LocalId::new(self.last_sequence(table)? + 1), true),
        };

        let mut fields = fields.clone();
        fields.remove(ID_FIELD);
        fields.remove(UUID_FIELD);

        let entity = StoredEntity {
            table: table.to_string(),
            local_id,
            global_id: *global_id,
            fields,
        };
        let value = Self::serialize(&entity)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_entities, keys::entity_key(table, local_id), &value);
        batch.put_cf(
            &cf_index,
            keys::global_key(table, global_id),
            local_id.to_be_bytes(),
        );
        if created {
            batch.put_cf(
                &cf_sequences,
                keys::sequence_key(table),
                local_id.to_be_bytes(),
            );
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        tracing::debug!(
            table,
            global_id = %global_id,
            local_id = %local_id,
            created,
            "Upserted entity"
        );

        Ok(local_id)
    }

    fn get_entity(&self, table: &str, local_id: LocalId) -> Result<Option<StoredEntity>> {
        let cf = self.cf(cf::ENTITIES)?;
        let key = keys::entity_key(table, local_id);

        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn get_entity_by_global(
        &self,
        table: &str,
        global_id: &GlobalId,
    ) -> Result<Option<StoredEntity>> {
        match self.lookup_local_by_global(table, global_id)? {
            Some(local_id) => self.get_entity(table, local_id),
            None => Ok(None),
        }
    }

    fn list_entities(&self, table: &str) -> Result<Vec<StoredEntity>> {
        self.scan_prefix(cf::ENTITIES, &keys::table_prefix(table))?
            .into_iter()
            .map(|(_, value)| Self::deserialize(&value))
            .collect()
    }

    fn delete_entity(&self, table: &str, global_id: &GlobalId) -> Result<bool> {
        let _writer = self.write_lock.lock();

        let cf_entities = self.cf(cf::ENTITIES)?;
        let cf_index = self.cf(cf::GLOBAL_INDEX)?;
        let cf_tombstones = self.cf(cf::TOMBSTONES)?;

        let existing = self.lookup_local_by_global(table, global_id)?;
        let tombstone = Tombstone {
            table: table.to_string(),
            global_id: *global_id,
            deleted_at: chrono::Utc::now(),
        };

        let mut batch = WriteBatch::default();
        if let Some(local_id) = existing {
            batch.delete_cf(&cf_entities, keys::entity_key(table, local_id));
            batch.delete_cf(&cf_index, keys::global_key(table, global_id));
        }
        batch.put_cf(
            &cf_tombstones,
            keys::global_key(table, global_id),
            Self::serialize(&tombstone)?,
        );

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(existing.is_some())
    }

    fn is_tombstoned(&self, table: &str, global_id: &GlobalId) -> Result<bool> {
        let cf = self.cf(cf::TOMBSTONES)?;

        Ok(self
            .db
            .get_cf(&cf, keys::global_key(table, global_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some())
    }

    // =========================================================================
    // Deferred Queue Operations
    // =========================================================================

    fn put_deferred(&self, record: &DeferredRecord) -> Result<()> {
        let _writer = self.write_lock.lock();

        let cf_deferred = self.cf(cf::DEFERRED)?;
        let cf_by_record = self.cf(cf::DEFERRED_BY_RECORD)?;

        let key = keys::deferred_key(&record.missing.missing_id, &record.record_id);
        let value = Self::serialize(record)?;

        let mut batch = WriteBatch::default();

        // Replace any older deferral of the same record
        if let Some(old_key) = self.deferred_key_of(&record.record_id)? {
            if old_key != key {
                batch.delete_cf(&cf_deferred, &old_key);
            }
        }

        batch.put_cf(&cf_deferred, &key, &value);
        batch.put_cf(
            &cf_by_record,
            keys::deferred_record_key(&record.record_id),
            &key,
        );

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn get_deferred(&self, record_id: &GlobalId) -> Result<Option<DeferredRecord>> {
        let Some(key) = self.deferred_key_of(record_id)? else {
            return Ok(None);
        };

        let cf = self.cf(cf::DEFERRED)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn list_deferred_for(&self, missing_id: &GlobalId) -> Result<Vec<DeferredRecord>> {
        self.scan_prefix(cf::DEFERRED, &keys::deferred_prefix(missing_id))?
            .into_iter()
            .map(|(_, value)| Self::deserialize(&value))
            .collect()
    }

    fn remove_deferred(&self, record_id: &GlobalId) -> Result<Option<DeferredRecord>> {
        let _writer = self.write_lock.lock();

        let Some(key) = self.deferred_key_of(record_id)? else {
            return Ok(None);
        };

        let cf_deferred = self.cf(cf::DEFERRED)?;
        let cf_by_record = self.cf(cf::DEFERRED_BY_RECORD)?;

        let record = self
            .db
            .get_cf(&cf_deferred, &key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize::<DeferredRecord>(&data))
            .transpose()?;

        if keys::extract_record_id_from_deferred_key(&key) != Some(*record_id) {
            return Err(StoreError::Corrupt {
                cf: cf::DEFERRED_BY_RECORD,
                detail: format!("index entry for {record_id} points at a foreign key"),
            });
        }

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_deferred, &key);
        batch.delete_cf(&cf_by_record, keys::deferred_record_key(record_id));

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(record)
    }

    fn list_deferred(&self) -> Result<Vec<DeferredRecord>> {
        let cf = self.cf(cf::DEFERRED)?;

        let mut records = Vec::new();
        let iter = self.db.iterator_cf(&cf, IteratorMode::Start);

        for item in iter {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            records.push(Self::deserialize(&value)?);
        }

        Ok(records)
    }

    fn count_deferred(&self) -> Result<usize> {
        let cf = self.cf(cf::DEFERRED_BY_RECORD)?;

        let mut count = 0usize;
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            item.map_err(|e| StoreError::Database(e.to_string()))?;
            count += 1;
        }

        Ok(count)
    }
}
