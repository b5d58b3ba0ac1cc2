//! Domain types stored in the database.
//!
//! These types represent the persisted state of synced entities, deletion
//! tombstones and records waiting on a dependency.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use xref_core::{GlobalId, LocalId, LocalRecord, Record, WireRecord, ID_FIELD, UUID_FIELD};

/// An entity row. Both identifiers live on the row itself, which is what
/// makes the row double as its translation table entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntity {
    /// Table the entity belongs to.
    pub table: String,
    /// Key assigned by this device.
    pub local_id: LocalId,
    /// Key shared by all devices.
    pub global_id: GlobalId,
    /// Remaining fields, foreign keys in local form.
    pub fields: Record,
}

impl StoredEntity {
    /// Rebuild the full local record, including `id` and `uuid`.
    #[must_use]
    pub fn to_local_record(&self) -> LocalRecord {
        let mut record = self.fields.clone();
        record.set(ID_FIELD, self.local_id);
        record.set(UUID_FIELD, self.global_id);
        LocalRecord::new(record)
    }
}

/// Marker left behind when an entity is deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tombstone {
    /// Table the entity belonged to.
    pub table: String,
    /// The deleted entity.
    pub global_id: GlobalId,
    /// When the deletion was applied locally.
    pub deleted_at: DateTime<Utc>,
}

/// The unresolved reference that blocks a deferred record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingRef {
    /// Table the referenced entity belongs to.
    pub target_table: String,
    /// The entity that has not arrived yet.
    pub missing_id: GlobalId,
    /// Local field name of the blocked foreign key.
    pub field: String,
}

/// A received record parked until its dependency is applied.
///
/// The record is kept in wire form, never partially mapped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredRecord {
    /// Table of the deferred record.
    pub table: String,
    /// Global id of the deferred record.
    pub record_id: GlobalId,
    /// The record exactly as received.
    pub wire: WireRecord,
    /// What it is waiting for.
    pub missing: MissingRef,
    /// When the record was first deferred.
    pub deferred_at: DateTime<Utc>,
    /// How many times it has been retried and deferred again.
    pub attempts: u32,
}

impl DeferredRecord {
    /// Time spent waiting, as of `now`.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.deferred_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_record_includes_identifiers() {
        let global_id = GlobalId::generate();
        let entity = StoredEntity {
            table: "tags".to_string(),
            local_id: LocalId::new(4),
            global_id,
            fields: Record::new().with("name", "red".to_string()),
        };

        let record = entity.to_local_record();
        assert_eq!(record.local_id().unwrap(), Some(LocalId::new(4)));
        assert_eq!(record.global_id().unwrap(), global_id);
        assert_eq!(
            record.as_record().get_as::<String>("name").unwrap(),
            "red"
        );
    }

    #[test]
    fn deferred_age() {
        let now = Utc::now();
        let record = DeferredRecord {
            table: "locations".to_string(),
            record_id: GlobalId::generate(),
            wire: WireRecord::default(),
            missing: MissingRef {
                target_table: "devices".to_string(),
                missing_id: GlobalId::generate(),
                field: "device_id".to_string(),
            },
            deferred_at: now - chrono::Duration::seconds(90),
            attempts: 0,
        };

        assert_eq!(record.age(now).num_seconds(), 90);
    }
}
