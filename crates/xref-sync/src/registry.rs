//! Model registry.
//!
//! The registry is built once at startup from explicit registrations and is
//! read-only afterwards. Building it checks that the foreign key declarations
//! are complete and consistent, so that configuration errors surface before
//! the first record is mapped.

use std::collections::{BTreeSet, HashMap, HashSet};

use xref_core::{LocalRecord, RecordError};

use crate::error::{Result, SyncError};
use crate::model::{looks_like_foreign_key, FkMapping, SyncModel};
use crate::models::{Device, File, FileTag, Location, Tag, Volume};

/// Static metadata of one registered model.
#[derive(Debug, Clone, Copy)]
pub struct ModelDescriptor {
    table: &'static str,
    mappings: &'static [FkMapping],
    fields: &'static [&'static str],
    local_only: &'static [&'static str],
    validate: fn(&LocalRecord) -> std::result::Result<(), RecordError>,
}

fn validate_as<M: SyncModel>(record: &LocalRecord) -> std::result::Result<(), RecordError> {
    M::from_record(record).map(|_| ())
}

impl ModelDescriptor {
    /// Describe a model type.
    #[must_use]
    pub fn of<M: SyncModel>() -> Self {
        Self {
            table: M::TABLE,
            mappings: M::foreign_key_mappings(),
            fields: M::field_names(),
            local_only: M::local_only_fields(),
            validate: validate_as::<M>,
        }
    }

    /// Table name.
    #[must_use]
    pub const fn table(&self) -> &'static str {
        self.table
    }

    /// Declared foreign keys.
    #[must_use]
    pub const fn mappings(&self) -> &'static [FkMapping] {
        self.mappings
    }

    /// Schema fields.
    #[must_use]
    pub const fn fields(&self) -> &'static [&'static str] {
        self.fields
    }

    /// Fields that never leave this device.
    #[must_use]
    pub const fn local_only(&self) -> &'static [&'static str] {
        self.local_only
    }

    /// Returns true if the model declares at least one foreign key.
    #[must_use]
    pub const fn has_foreign_keys(&self) -> bool {
        !self.mappings.is_empty()
    }

    /// Tables this model must be applied after.
    ///
    /// Self-references and nullable keys are excluded.
    pub fn dependencies(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.mappings
            .iter()
            .filter(|m| !m.nullable && !m.is_self_reference(self.table))
            .map(|m| m.target_table)
    }

    /// Check a mapped local record against the typed schema.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidRecord` if a field is missing or mistyped.
    pub fn validate(&self, record: &LocalRecord) -> Result<()> {
        (self.validate)(record).map_err(SyncError::from)
    }

    fn check(&self, registered: &HashSet<&'static str>) -> Result<()> {
        for mapping in self.mappings {
            if !self.fields.contains(&mapping.local_field) {
                return Err(SyncError::UnknownField {
                    table: self.table.to_string(),
                    field: mapping.local_field.to_string(),
                });
            }
            if !registered.contains(mapping.target_table) {
                return Err(SyncError::UnknownTargetType {
                    table: self.table.to_string(),
                    field: mapping.local_field.to_string(),
                    target_type: mapping.target_table.to_string(),
                });
            }
        }

        for field in self.fields {
            let declared = self.mappings.iter().any(|m| m.local_field == *field);
            if looks_like_foreign_key(field) && !declared && !self.local_only.contains(field) {
                return Err(SyncError::UndeclaredForeignKey {
                    table: self.table.to_string(),
                    field: (*field).to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Builder collecting model registrations.
#[derive(Debug, Default)]
pub struct ModelRegistryBuilder {
    models: Vec<ModelDescriptor>,
}

impl ModelRegistryBuilder {
    /// Register a model type.
    #[must_use]
    pub fn register<M: SyncModel>(mut self) -> Self {
        self.models.push(ModelDescriptor::of::<M>());
        self
    }

    /// Validate the registrations and build the registry.
    ///
    /// # Errors
    ///
    /// Returns a configuration error (`SyncError::is_configuration`) if a
    /// table is registered twice, a declaration is inconsistent with its
    /// schema or target tables, a foreign key is undeclared, or the
    /// dependency graph has a cycle.
    pub fn build(self) -> Result<ModelRegistry> {
        let mut models = HashMap::with_capacity(self.models.len());
        for descriptor in &self.models {
            if models.insert(descriptor.table, *descriptor).is_some() {
                return Err(SyncError::DuplicateModel(descriptor.table.to_string()));
            }
        }

        let registered: HashSet<&'static str> = models.keys().copied().collect();
        for descriptor in &self.models {
            descriptor.check(&registered)?;
        }

        let order = dependency_order(&self.models)?;

        tracing::debug!(models = order.len(), order = ?order, "Built model registry");

        Ok(ModelRegistry { models, order })
    }
}

/// Topological order of the models, targets before referrers.
///
/// Ties are broken by table name so the order is deterministic.
fn dependency_order(models: &[ModelDescriptor]) -> Result<Vec<&'static str>> {
    let mut pending: HashMap<&'static str, BTreeSet<&'static str>> = models
        .iter()
        .map(|d| (d.table, d.dependencies().collect()))
        .collect();
    let mut order = Vec::with_capacity(models.len());

    loop {
        let next = pending
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(table, _)| *table)
            .min();
        let Some(next) = next else { break };

        pending.remove(next);
        for deps in pending.values_mut() {
            deps.remove(next);
        }
        order.push(next);
    }

    if !pending.is_empty() {
        let mut stuck: Vec<String> = pending.keys().map(ToString::to_string).collect();
        stuck.sort();
        return Err(SyncError::DependencyCycle(stuck));
    }

    Ok(order)
}

/// Read-only registry of syncable models, keyed by table.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: HashMap<&'static str, ModelDescriptor>,
    order: Vec<&'static str>,
}

impl ModelRegistry {
    /// Start registering models.
    #[must_use]
    pub fn builder() -> ModelRegistryBuilder {
        ModelRegistryBuilder::default()
    }

    /// Registry of the built-in models.
    ///
    /// # Errors
    ///
    /// Returns an error if the built-in declarations are inconsistent.
    pub fn standard() -> Result<Self> {
        Self::builder()
            .register::<Device>()
            .register::<Volume>()
            .register::<Location>()
            .register::<File>()
            .register::<Tag>()
            .register::<FileTag>()
            .build()
    }

    /// Look up a model.
    #[must_use]
    pub fn get(&self, table: &str) -> Option<&ModelDescriptor> {
        self.models.get(table)
    }

    /// Look up a model, failing for unknown tables.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::UnknownModel` if the table is not registered.
    pub fn descriptor(&self, table: &str) -> Result<&ModelDescriptor> {
        self.get(table)
            .ok_or_else(|| SyncError::UnknownModel(table.to_string()))
    }

    /// Foreign key declarations of a model.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::UnknownModel` if the table is not registered.
    pub fn mappings(&self, table: &str) -> Result<&'static [FkMapping]> {
        self.descriptor(table).map(ModelDescriptor::mappings)
    }

    /// Tables in dependency order: every table comes after the tables it
    /// references.
    #[must_use]
    pub fn sync_order(&self) -> &[&'static str] {
        &self.order
    }

    /// Returns true if the table is registered.
    #[must_use]
    pub fn contains(&self, table: &str) -> bool {
        self.models.contains_key(table)
    }

    /// Number of registered models.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Returns true if no models are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
