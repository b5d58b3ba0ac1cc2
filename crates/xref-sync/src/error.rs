//! Error types for the sync layer.
//!
//! Mapping and apply errors are one tagged enum so that callers branch on
//! the failure kind instead of parsing messages. Only [`SyncError::MissingDependency`]
//! is transient; everything else either fails the record or is a
//! configuration error caught when the registry is built.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use xref_core::{GlobalId, LocalId, RecordError};
use xref_store::{MissingRef, StoreError};

use crate::lifecycle::RecordState;

/// A result type using `SyncError`.
pub type Result<T> = std::result::Result<T, SyncError>;

/// A referenced entity that has not been synced to this device yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingDependency {
    /// Table of the entity that is missing.
    pub target_type: String,
    /// Global id of the entity that is missing.
    pub missing_uuid: GlobalId,
    /// Local field name of the foreign key that could not be resolved.
    pub blocked_field: String,
}

impl fmt::Display for MissingDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (needed by {})",
            self.target_type, self.missing_uuid, self.blocked_field
        )
    }
}

impl From<&MissingDependency> for MissingRef {
    fn from(missing: &MissingDependency) -> Self {
        Self {
            target_table: missing.target_type.clone(),
            missing_id: missing.missing_uuid,
            field: missing.blocked_field.clone(),
        }
    }
}

impl From<MissingRef> for MissingDependency {
    fn from(missing: MissingRef) -> Self {
        Self {
            target_type: missing.target_table,
            missing_uuid: missing.missing_id,
            blocked_field: missing.field,
        }
    }
}

/// Errors that can occur while mapping or applying synced records.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Outbound: a foreign key points at a local id with no global id.
    #[error("dangling local reference: {field} = {local_id} has no global id in {target_type}")]
    DanglingLocalReference {
        /// Local field holding the reference.
        field: String,
        /// Table the reference points into.
        target_type: String,
        /// The unresolvable local id.
        local_id: LocalId,
    },

    /// Inbound: the referenced entity has not arrived yet.
    #[error("missing dependency: {0}")]
    MissingDependency(MissingDependency),

    /// A foreign key mapping names a table that is not registered.
    #[error("unknown target type {target_type} referenced by {table}.{field}")]
    UnknownTargetType {
        /// Model declaring the mapping.
        table: String,
        /// Field of the mapping.
        field: String,
        /// The unregistered target table.
        target_type: String,
    },

    /// A record names a table that is not registered.
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// A field looks like a foreign key but has no declaration.
    #[error("undeclared foreign key {table}.{field}")]
    UndeclaredForeignKey {
        /// Model owning the field.
        table: String,
        /// The undeclared field.
        field: String,
    },

    /// A foreign key mapping names a field the model does not have.
    #[error("foreign key mapping {table}.{field} names a field that does not exist")]
    UnknownField {
        /// Model declaring the mapping.
        table: String,
        /// The missing field.
        field: String,
    },

    /// The foreign key graph between models contains a cycle.
    #[error("dependency cycle among models: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),

    /// Two models were registered for the same table.
    #[error("model registered twice: {0}")]
    DuplicateModel(String),

    /// Inbound: a wire record carries a device-local field.
    #[error("wire record carries local field {0}")]
    LocalFieldOnWire(String),

    /// The record has no `uuid` field.
    #[error("record has no global id")]
    MissingGlobalId,

    /// The record's `uuid` does not match the id it was delivered under.
    #[error("record id mismatch: message is for {expected}, record carries {found}")]
    GlobalIdMismatch {
        /// Id named by the sync message.
        expected: GlobalId,
        /// Id found in the record.
        found: GlobalId,
    },

    /// A field is missing or has the wrong type.
    #[error("invalid record: {0}")]
    InvalidRecord(#[from] RecordError),

    /// The deferred queue is at capacity.
    #[error("deferred queue full: limit is {limit}")]
    DeferredQueueFull {
        /// Configured capacity.
        limit: usize,
    },

    /// The requested state transition is not valid.
    #[error("invalid state transition for record {record_id}: cannot transition from {from:?} to {to:?}")]
    InvalidTransition {
        /// The record being processed.
        record_id: GlobalId,
        /// The current state.
        from: RecordState,
        /// The requested target state.
        to: RecordState,
    },

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Returns true if the record may succeed later without intervention.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::MissingDependency(_))
    }

    /// Returns true for registry consistency errors, which are fatal at startup.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownTargetType { .. }
                | Self::UndeclaredForeignKey { .. }
                | Self::UnknownField { .. }
                | Self::DependencyCycle(_)
                | Self::DuplicateModel(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing() -> MissingDependency {
        MissingDependency {
            target_type: "devices".to_string(),
            missing_uuid: GlobalId::generate(),
            blocked_field: "device_id".to_string(),
        }
    }

    #[test]
    fn only_missing_dependency_is_transient() {
        assert!(SyncError::MissingDependency(missing()).is_transient());
        assert!(!SyncError::MissingGlobalId.is_transient());
        assert!(!SyncError::DanglingLocalReference {
            field: "device_id".to_string(),
            target_type: "devices".to_string(),
            local_id: LocalId::new(1),
        }
        .is_transient());
        assert!(!SyncError::Store(StoreError::Database("down".into())).is_transient());
    }

    #[test]
    fn configuration_errors() {
        assert!(SyncError::UnknownTargetType {
            table: "locations".to_string(),
            field: "device_id".to_string(),
            target_type: "devicez".to_string(),
        }
        .is_configuration());
        assert!(SyncError::DependencyCycle(vec!["a".into(), "b".into()]).is_configuration());
        assert!(!SyncError::UnknownModel("x".into()).is_configuration());
        assert!(!SyncError::MissingDependency(missing()).is_configuration());
    }

    #[test]
    fn missing_ref_conversion() {
        let dependency = missing();
        let stored = MissingRef::from(&dependency);
        assert_eq!(stored.target_table, "devices");
        assert_eq!(stored.field, "device_id");
        assert_eq!(MissingDependency::from(stored), dependency);
    }

    #[test]
    fn display_names_the_missing_entity() {
        let dependency = missing();
        let message = SyncError::MissingDependency(dependency.clone()).to_string();
        assert!(message.contains("devices"));
        assert!(message.contains(&dependency.missing_uuid.to_string()));
    }
}
