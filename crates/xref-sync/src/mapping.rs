//! Foreign key remapping between the local and wire identifier spaces.
//!
//! Outbound, every declared `<stem>_id` field holding a local id is replaced
//! by `<stem>_uuid` holding the referenced entity's global id, and the local
//! primary key is dropped. Inbound does the reverse against this device's
//! translation table.
//!
//! Both directions are all-or-nothing: every reference is resolved before the
//! output record is assembled, so a failure never leaves a partially mapped
//! record behind and never touches the input.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use xref_core::{
    FieldValue, GlobalId, LocalId, LocalRecord, Record, Value, WireRecord, ID_FIELD, UUID_FIELD,
};
use xref_store::Store;

use crate::error::{MissingDependency, Result, SyncError};
use crate::handle::StorageHandle;
use crate::model::{FkMapping, SyncModel};
use crate::registry::{ModelDescriptor, ModelRegistry};

/// A foreign key value read from a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FkValue<T> {
    Absent,
    Null,
    Set(T),
}

impl<T: Copy> FkValue<T> {
    fn id(&self) -> Option<T> {
        match self {
            Self::Set(id) => Some(*id),
            Self::Absent | Self::Null => None,
        }
    }
}

fn read_fk<T: FieldValue>(record: &Record, field: &str) -> Result<FkValue<T>> {
    match record.get(field) {
        None => Ok(FkValue::Absent),
        Some(Value::Null) => Ok(FkValue::Null),
        Some(value) => Ok(FkValue::Set(T::from_value(field, value)?)),
    }
}

pub(crate) fn require_global_id(record: &Record) -> Result<GlobalId> {
    if !record.contains(UUID_FIELD) {
        return Err(SyncError::MissingGlobalId);
    }
    Ok(record.global_id()?)
}

// =============================================================================
// Outbound
// =============================================================================

fn decode_outbound(record: &LocalRecord, mappings: &[FkMapping]) -> Result<Vec<FkValue<LocalId>>> {
    let fields = record.as_record();
    require_global_id(fields)?;
    mappings
        .iter()
        .map(|mapping| read_fk(fields, mapping.local_field))
        .collect()
}

fn assemble_outbound(
    record: &LocalRecord,
    mappings: &[FkMapping],
    refs: &[FkValue<LocalId>],
    resolve: impl Fn(usize, LocalId) -> Option<GlobalId>,
) -> Result<WireRecord> {
    let mut out = record.as_record().clone();
    out.remove(ID_FIELD);

    for (index, (mapping, value)) in mappings.iter().zip(refs).enumerate() {
        let wire_value = match *value {
            FkValue::Absent => continue,
            FkValue::Null => Value::Null,
            FkValue::Set(local_id) => resolve(index, local_id)
                .ok_or_else(|| SyncError::DanglingLocalReference {
                    field: mapping.local_field.to_string(),
                    target_type: mapping.target_table.to_string(),
                    local_id,
                })?
                .into_value(),
        };
        out.remove(mapping.local_field);
        out.insert(mapping.wire_field(), wire_value);
    }

    Ok(WireRecord::new(out))
}

/// Convert a local record into wire form.
///
/// Absent foreign keys stay absent and `Null` ones become `Null` on the
/// wire. Read-only with respect to storage.
///
/// # Errors
///
/// Returns `SyncError::DanglingLocalReference` if a foreign key points at a
/// local id with no global id, `SyncError::InvalidRecord` if a foreign key
/// is not an integer, and `SyncError::MissingGlobalId` if the record has no
/// `uuid`. Storage errors propagate unchanged.
pub async fn to_wire_form<H: StorageHandle + ?Sized>(
    record: &LocalRecord,
    mappings: &[FkMapping],
    storage: &H,
) -> Result<WireRecord> {
    let refs = decode_outbound(record, mappings)?;

    let mut resolved = Vec::with_capacity(refs.len());
    for (mapping, value) in mappings.iter().zip(&refs) {
        let global_id = match value.id() {
            Some(local_id) => {
                storage
                    .lookup_global_by_local(mapping.target_table, local_id)
                    .await?
            }
            None => None,
        };
        resolved.push(global_id);
    }

    assemble_outbound(record, mappings, &refs, |index, _| {
        resolved.get(index).copied().flatten()
    })
}

/// Convert many local records of one model, one batched lookup per mapping.
///
/// # Errors
///
/// Fails as a whole with the first error [`to_wire_form`] would report for
/// any of the records.
pub async fn to_wire_form_batch<H: StorageHandle + ?Sized>(
    records: &[LocalRecord],
    mappings: &[FkMapping],
    storage: &H,
) -> Result<Vec<WireRecord>> {
    let decoded = records
        .iter()
        .map(|record| decode_outbound(record, mappings))
        .collect::<Result<Vec<_>>>()?;

    let mut resolved: Vec<HashMap<LocalId, GlobalId>> = Vec::with_capacity(mappings.len());
    for (index, mapping) in mappings.iter().enumerate() {
        let ids: HashSet<LocalId> = decoded
            .iter()
            .filter_map(|refs| refs.get(index).and_then(FkValue::id))
            .collect();
        resolved.push(
            storage
                .batch_lookup_global_by_local(mapping.target_table, &ids)
                .await?,
        );
    }

    records
        .iter()
        .zip(&decoded)
        .map(|(record, refs)| {
            assemble_outbound(record, mappings, refs, |index, local_id| {
                resolved
                    .get(index)
                    .and_then(|found| found.get(&local_id))
                    .copied()
            })
        })
        .collect()
}

// =============================================================================
// Inbound
// =============================================================================

fn decode_inbound(wire: &WireRecord, mappings: &[FkMapping]) -> Result<Vec<FkValue<GlobalId>>> {
    let fields = wire.as_record();
    require_global_id(fields)?;

    if fields.contains(ID_FIELD) {
        return Err(SyncError::LocalFieldOnWire(ID_FIELD.to_string()));
    }
    if let Some(mapping) = mappings.iter().find(|m| fields.contains(m.local_field)) {
        return Err(SyncError::LocalFieldOnWire(mapping.local_field.to_string()));
    }

    mappings
        .iter()
        .map(|mapping| read_fk(fields, &mapping.wire_field()))
        .collect()
}

fn assemble_inbound(
    wire: &WireRecord,
    mappings: &[FkMapping],
    refs: &[FkValue<GlobalId>],
    resolve: impl Fn(usize, &GlobalId) -> Option<LocalId>,
) -> Result<LocalRecord> {
    let mut out = wire.as_record().clone();

    for (index, (mapping, value)) in mappings.iter().zip(refs).enumerate() {
        let local_value = match value {
            FkValue::Absent => continue,
            FkValue::Null => Value::Null,
            FkValue::Set(global_id) => match resolve(index, global_id) {
                Some(local_id) => local_id.into_value(),
                None if mapping.nullable => {
                    tracing::debug!(
                        target = %mapping.target_table,
                        missing = %global_id,
                        field = %mapping.local_field,
                        "Dropped unresolved nullable reference"
                    );
                    Value::Null
                }
                None => {
                    return Err(SyncError::MissingDependency(MissingDependency {
                        target_type: mapping.target_table.to_string(),
                        missing_uuid: *global_id,
                        blocked_field: mapping.local_field.to_string(),
                    }))
                }
            },
        };
        out.remove(&mapping.wire_field());
        out.insert(mapping.local_field, local_value);
    }

    Ok(LocalRecord::new(out))
}

/// Convert a wire record into this device's local form.
///
/// # Errors
///
/// Returns `SyncError::MissingDependency` for the first non-nullable
/// reference (in declaration order) whose target has not been synced to this
/// device; nothing is produced in that case. An unresolved nullable
/// reference becomes null. Returns `SyncError::LocalFieldOnWire`
/// if the wire record carries `id` or a local foreign key field,
/// `SyncError::InvalidRecord` for a malformed UUID, and
/// `SyncError::MissingGlobalId` if the record has no `uuid`. Storage errors
/// propagate unchanged.
pub async fn to_local_form<H: StorageHandle + ?Sized>(
    wire: &WireRecord,
    mappings: &[FkMapping],
    storage: &H,
) -> Result<LocalRecord> {
    let refs = decode_inbound(wire, mappings)?;

    let mut resolved = Vec::with_capacity(refs.len());
    for (mapping, value) in mappings.iter().zip(&refs) {
        let local_id = match value.id() {
            Some(global_id) => {
                storage
                    .lookup_local_by_global(mapping.target_table, &global_id)
                    .await?
            }
            None => None,
        };
        resolved.push(local_id);
    }

    assemble_inbound(wire, mappings, &refs, |index, _| {
        resolved.get(index).copied().flatten()
    })
}

/// Convert many wire records of one model, one batched lookup per mapping.
///
/// Each record gets its own result, in input order.
///
/// # Errors
///
/// The outer error is a storage failure; per-record errors are those of
/// [`to_local_form`].
pub async fn to_local_form_batch<H: StorageHandle + ?Sized>(
    records: &[WireRecord],
    mappings: &[FkMapping],
    storage: &H,
) -> Result<Vec<Result<LocalRecord>>> {
    let decoded: Vec<_> = records
        .iter()
        .map(|wire| decode_inbound(wire, mappings))
        .collect();

    let mut resolved: Vec<HashMap<GlobalId, LocalId>> = Vec::with_capacity(mappings.len());
    for (index, mapping) in mappings.iter().enumerate() {
        let ids: HashSet<GlobalId> = decoded
            .iter()
            .filter_map(|refs| refs.as_ref().ok())
            .filter_map(|refs| refs.get(index).and_then(FkValue::id))
            .collect();
        resolved.push(
            storage
                .batch_lookup_local_by_global(mapping.target_table, &ids)
                .await?,
        );
    }

    Ok(records
        .iter()
        .zip(decoded)
        .map(|(wire, refs)| {
            assemble_inbound(wire, mappings, &refs?, |index, global_id| {
                resolved
                    .get(index)
                    .and_then(|found| found.get(global_id))
                    .copied()
            })
        })
        .collect())
}

// =============================================================================
// Registry-aware mapper
// =============================================================================

fn strip_local_only(descriptor: &ModelDescriptor, record: &LocalRecord) -> LocalRecord {
    let mut fields = record.as_record().clone();
    for field in descriptor.local_only() {
        fields.remove(field);
    }
    LocalRecord::new(fields)
}

/// Mapper bound to a model registry and a store.
///
/// Adds the per-model concerns on top of the free functions: looking up the
/// declarations by table, keeping local-only fields on this device and
/// validating mapped records against the typed schema.
pub struct Mapper<S: Store> {
    registry: Arc<ModelRegistry>,
    store: Arc<S>,
}

impl<S: Store> Mapper<S> {
    /// Create a new mapper.
    #[must_use]
    pub fn new(registry: Arc<ModelRegistry>, store: Arc<S>) -> Self {
        Self { registry, store }
    }

    /// Get the registry.
    #[must_use]
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Get a reference to the store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Encode a typed model into wire form.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::UnknownModel` if `M` is not registered, otherwise
    /// the errors of [`to_wire_form`].
    pub async fn encode<M: SyncModel>(&self, model: &M) -> Result<WireRecord> {
        self.to_wire_form(M::TABLE, &model.to_record()).await
    }

    /// Convert a local record of `table` into wire form.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::UnknownModel` for unregistered tables, otherwise
    /// the errors of [`to_wire_form`].
    pub async fn to_wire_form(&self, table: &str, record: &LocalRecord) -> Result<WireRecord> {
        let descriptor = self.registry.descriptor(table)?;
        let record = strip_local_only(descriptor, record);
        to_wire_form(&record, descriptor.mappings(), self.store.as_ref()).await
    }

    /// Convert a wire record of `table` into local form and validate it.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::UnknownModel` for unregistered tables,
    /// `SyncError::LocalFieldOnWire` if a local-only field was transmitted,
    /// `SyncError::InvalidRecord` if the mapped record does not match the
    /// schema, otherwise the errors of [`to_local_form`].
    pub async fn to_local_form(&self, table: &str, wire: &WireRecord) -> Result<LocalRecord> {
        let descriptor = self.registry.descriptor(table)?;

        if let Some(field) = descriptor
            .local_only()
            .iter()
            .find(|field| wire.as_record().contains(field))
        {
            return Err(SyncError::LocalFieldOnWire((*field).to_string()));
        }

        let local = to_local_form(wire, descriptor.mappings(), self.store.as_ref()).await?;
        descriptor.validate(&local)?;
        Ok(local)
    }

    /// Export every stored record of `table` in wire form.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::UnknownModel` for unregistered tables, otherwise
    /// the errors of [`to_wire_form_batch`].
    pub async fn export_table(&self, table: &str) -> Result<Vec<WireRecord>> {
        let descriptor = self.registry.descriptor(table)?;
        let records: Vec<LocalRecord> = self
            .store
            .list_entities(table)?
            .iter()
            .map(|entity| strip_local_only(descriptor, &entity.to_local_record()))
            .collect();

        let wire = to_wire_form_batch(&records, descriptor.mappings(), self.store.as_ref()).await?;

        tracing::debug!(table, records = wire.len(), "Exported table");

        Ok(wire)
    }

    /// Export every registered table in dependency order.
    ///
    /// Replaying the result in order on another device applies every record
    /// on its first attempt.
    ///
    /// # Errors
    ///
    /// Returns the first error of [`Mapper::export_table`].
    pub async fn export_all(&self) -> Result<Vec<(&'static str, Vec<WireRecord>)>> {
        let mut tables = Vec::with_capacity(self.registry.len());
        for table in self.registry.sync_order() {
            tables.push((*table, self.export_table(table).await?));
        }
        Ok(tables)
    }
}
