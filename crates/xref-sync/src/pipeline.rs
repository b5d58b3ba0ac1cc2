//! Apply pipeline.
//!
//! This module provides `ApplyPipeline`, which takes sync messages delivered
//! in any order, maps them into local form and stores them. Records whose
//! references have not arrived yet are parked in the durable deferred queue
//! and retried as soon as the referenced entity is applied.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use xref_core::{GlobalId, LocalId, Record, WireRecord};
use xref_store::{DeferredRecord, Store};

use crate::config::SyncConfig;
use crate::error::{MissingDependency, Result, SyncError};
use crate::lifecycle::{RecordState, RecordTracker};
use crate::locks::EntityLocks;
use crate::mapping::{require_global_id, Mapper};
use crate::registry::{ModelDescriptor, ModelRegistry};

/// What a sync message does to its record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    /// Insert or update the record.
    Upsert(WireRecord),
    /// Delete the record.
    Delete,
}

/// A change to one record, as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    /// Table of the record.
    pub table: String,
    /// Global id of the record.
    pub record_id: GlobalId,
    /// The change.
    pub change: Change,
}

impl SyncMessage {
    /// An upsert, addressed by the record's own `uuid`.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::MissingGlobalId` if the record has no `uuid`.
    pub fn upsert(table: impl Into<String>, record: WireRecord) -> Result<Self> {
        let record_id = require_global_id(record.as_record())?;
        Ok(Self {
            table: table.into(),
            record_id,
            change: Change::Upsert(record),
        })
    }

    /// A delete.
    #[must_use]
    pub fn delete(table: impl Into<String>, record_id: GlobalId) -> Self {
        Self {
            table: table.into(),
            record_id,
            change: Change::Delete,
        }
    }
}

/// What happened to a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// Stored under the given local id.
    Applied {
        /// Local id on this device.
        local_id: LocalId,
    },
    /// Deleted, or tombstoned if it never arrived.
    Deleted {
        /// Whether a row existed.
        existed: bool,
    },
    /// Parked until the dependency is applied.
    Deferred(MissingDependency),
    /// Dropped because the entity was already deleted here.
    Discarded,
}

/// A deferred record that was retried while applying another one.
#[derive(Debug, Clone, PartialEq)]
pub struct ReleasedRecord {
    /// Table of the record.
    pub table: String,
    /// Global id of the record.
    pub record_id: GlobalId,
    /// Result of the retry.
    pub outcome: ApplyOutcome,
}

/// A deferred record that was rejected when retried.
#[derive(Debug)]
pub struct RetryFailure {
    /// Table of the record.
    pub table: String,
    /// Global id of the record.
    pub record_id: GlobalId,
    /// Why it was rejected.
    pub error: SyncError,
}

/// Result of applying one sync message.
#[derive(Debug)]
pub struct ApplyReport {
    /// Table of the record.
    pub table: String,
    /// Global id of the record.
    pub record_id: GlobalId,
    /// What happened to the record itself.
    pub outcome: ApplyOutcome,
    /// Deferred records retried as a consequence.
    pub released: Vec<ReleasedRecord>,
    /// Deferred records rejected when retried. They are removed from the queue.
    pub retry_failures: Vec<RetryFailure>,
}

/// Why a deferred record was evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleReason {
    /// Waited longer than the configured limit.
    Expired,
    /// Re-deferred more often than the configured limit.
    TooManyAttempts,
}

/// A deferred record whose dependency never arrived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaleDependency {
    /// Table of the record.
    pub table: String,
    /// Global id of the record.
    pub record_id: GlobalId,
    /// The dependency it was waiting for.
    pub missing: MissingDependency,
    /// When it was first deferred.
    pub deferred_at: DateTime<Utc>,
    /// How often it was retried.
    pub attempts: u32,
    /// Why it was evicted.
    pub reason: StaleReason,
}

/// Applies incoming sync messages to the local store.
pub struct ApplyPipeline<S: Store> {
    mapper: Mapper<S>,
    store: Arc<S>,
    config: SyncConfig,
    locks: EntityLocks,
}

impl<S: Store> ApplyPipeline<S> {
    /// Create a new apply pipeline.
    #[must_use]
    pub fn new(registry: Arc<ModelRegistry>, store: Arc<S>, config: SyncConfig) -> Self {
        Self {
            mapper: Mapper::new(registry, Arc::clone(&store)),
            store,
            config,
            locks: EntityLocks::new(),
        }
    }

    /// Create with default configuration.
    #[must_use]
    pub fn with_defaults(registry: Arc<ModelRegistry>, store: Arc<S>) -> Self {
        Self::new(registry, store, SyncConfig::default())
    }

    /// Get the mapper.
    #[must_use]
    pub const fn mapper(&self) -> &Mapper<S> {
        &self.mapper
    }

    /// Get a reference to the store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    // =========================================================================
    // Apply
    // =========================================================================

    /// Apply one sync message.
    ///
    /// A record with an unresolved reference is not an error: it is deferred
    /// and reported as `ApplyOutcome::Deferred`. Applying a record retries
    /// every deferred record that was waiting for it, transitively.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is rejected (unknown model, malformed
    /// record, full deferred queue) or storage fails. Nothing is stored for
    /// a rejected record.
    pub async fn apply(&self, message: SyncMessage) -> Result<ApplyReport> {
        let SyncMessage {
            table,
            record_id,
            change,
        } = message;

        let tracker = RecordTracker::received(record_id);
        let outcome = self.apply_change(&table, record_id, &change, tracker).await?;

        let release = match &outcome {
            ApplyOutcome::Applied { .. } => Some(record_id),
            // The dependency may have been applied while this record was deferred
            ApplyOutcome::Deferred(missing) if self.dependency_present(missing)? => {
                tracing::debug!(
                    table = %table,
                    record_id = %record_id,
                    missing = %missing.missing_uuid,
                    "Dependency arrived during deferral, retrying"
                );
                Some(missing.missing_uuid)
            }
            ApplyOutcome::Deferred(_) | ApplyOutcome::Deleted { .. } | ApplyOutcome::Discarded => {
                None
            }
        };

        let mut report = ApplyReport {
            table,
            record_id,
            outcome,
            released: Vec::new(),
            retry_failures: Vec::new(),
        };

        if let Some(dependency) = release {
            self.release_dependents(dependency, &mut report).await?;
        }

        Ok(report)
    }

    /// Apply many messages concurrently.
    ///
    /// At most `apply_concurrency` messages are in flight; messages for the
    /// same entity are serialized. Results come back in completion order.
    pub async fn apply_batch(
        &self,
        messages: Vec<SyncMessage>,
    ) -> Vec<(GlobalId, Result<ApplyReport>)> {
        let concurrency = self.config.apply_concurrency.max(1);

        stream::iter(messages)
            .map(|message| async move {
                let record_id = message.record_id;
                (record_id, self.apply(message).await)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await
    }

    async fn apply_change(
        &self,
        table: &str,
        record_id: GlobalId,
        change: &Change,
        mut tracker: RecordTracker,
    ) -> Result<ApplyOutcome> {
        let descriptor = self.mapper.registry().descriptor(table)?;
        let _guard = self.locks.lock(record_id).await;

        match change {
            Change::Delete => self.apply_delete(table, record_id, &mut tracker),
            Change::Upsert(wire) => {
                self.upsert_or_defer(descriptor, record_id, wire, &mut tracker)
                    .await
            }
        }
    }

    /// Retry the deferred version of `record_id` if it is still waiting for
    /// `dependency`.
    ///
    /// The queue entry is read under the entity lock, so a newer version
    /// applied since the queue was listed is never overwritten. Returns
    /// `None` if the entry is gone or now waits for something else. An entry
    /// rejected on retry is removed from the queue.
    async fn retry_deferred(
        &self,
        table: &str,
        record_id: GlobalId,
        dependency: GlobalId,
    ) -> Result<Option<ApplyOutcome>> {
        let _guard = self.locks.lock(record_id).await;

        let Some(current) = self.store.get_deferred(&record_id)? else {
            tracing::debug!(table, record_id = %record_id, "Deferral already resolved");
            return Ok(None);
        };
        if current.missing.missing_id != dependency {
            tracing::debug!(
                table,
                record_id = %record_id,
                waiting_for = %current.missing.missing_id,
                "Deferral moved to another dependency"
            );
            return Ok(None);
        }

        let result = async {
            let descriptor = self.mapper.registry().descriptor(table)?;
            let mut tracker = RecordTracker::deferred(record_id);
            tracker.advance(RecordState::Received)?;
            self.upsert_or_defer(descriptor, record_id, &current.wire, &mut tracker)
                .await
        }
        .await;

        match result {
            Ok(outcome) => Ok(Some(outcome)),
            Err(SyncError::Store(error)) => Err(SyncError::Store(error)),
            Err(error) => {
                self.store.remove_deferred(&record_id)?;
                Err(error)
            }
        }
    }

    async fn upsert_or_defer(
        &self,
        descriptor: &ModelDescriptor,
        record_id: GlobalId,
        wire: &WireRecord,
        tracker: &mut RecordTracker,
    ) -> Result<ApplyOutcome> {
        let table = descriptor.table();

        match self.apply_upsert(descriptor, record_id, wire, tracker).await {
            Ok(outcome) => Ok(outcome),
            Err(SyncError::MissingDependency(missing)) => {
                self.defer(table, record_id, wire, missing, tracker)
            }
            Err(error) => {
                tracker.advance(RecordState::Failed)?;
                tracing::warn!(
                    table,
                    record_id = %record_id,
                    error = %error,
                    "Rejected record"
                );
                Err(error)
            }
        }
    }

    fn apply_delete(
        &self,
        table: &str,
        record_id: GlobalId,
        tracker: &mut RecordTracker,
    ) -> Result<ApplyOutcome> {
        let existed = self.store.delete_entity(table, &record_id)?;

        if self.store.remove_deferred(&record_id)?.is_some() {
            tracing::debug!(table, record_id = %record_id, "Dropped deferred upsert of deleted record");
        }

        tracker.advance(RecordState::Applied)?;

        tracing::info!(table, record_id = %record_id, existed, "Deleted entity");

        Ok(ApplyOutcome::Deleted { existed })
    }

    async fn apply_upsert(
        &self,
        descriptor: &ModelDescriptor,
        record_id: GlobalId,
        wire: &WireRecord,
        tracker: &mut RecordTracker,
    ) -> Result<ApplyOutcome> {
        let table = descriptor.table();

        let found = require_global_id(wire.as_record())?;
        if found != record_id {
            return Err(SyncError::GlobalIdMismatch {
                expected: record_id,
                found,
            });
        }

        // A late upsert must not resurrect a deleted entity
        if self.store.is_tombstoned(table, &record_id)? {
            self.store.remove_deferred(&record_id)?;
            tracker.advance(RecordState::Applied)?;
            tracing::debug!(table, record_id = %record_id, "Discarded upsert of deleted entity");
            return Ok(ApplyOutcome::Discarded);
        }

        let local = self.mapper.to_local_form(table, wire).await?;
        if descriptor.has_foreign_keys() {
            tracker.advance(RecordState::Mapped)?;
        }

        let mut fields = local.into_record();
        self.preserve_local_only(descriptor, &record_id, &mut fields)?;

        let local_id = self.store.upsert_entity(table, &record_id, &fields)?;

        if self.store.remove_deferred(&record_id)?.is_some() {
            tracing::debug!(table, record_id = %record_id, "Removed superseded deferral");
        }

        tracker.advance(RecordState::Applied)?;

        tracing::info!(
            table,
            record_id = %record_id,
            local_id = %local_id,
            "Applied record"
        );

        Ok(ApplyOutcome::Applied { local_id })
    }

    /// Carry this device's local-only values over to the incoming version.
    fn preserve_local_only(
        &self,
        descriptor: &ModelDescriptor,
        record_id: &GlobalId,
        fields: &mut Record,
    ) -> Result<()> {
        if descriptor.local_only().is_empty() {
            return Ok(());
        }

        if let Some(existing) = self.store.get_entity_by_global(descriptor.table(), record_id)? {
            for field in descriptor.local_only() {
                if let Some(value) = existing.fields.get(field) {
                    fields.insert(*field, value.clone());
                }
            }
        }

        Ok(())
    }

    // =========================================================================
    // Deferred Queue
    // =========================================================================

    fn defer(
        &self,
        table: &str,
        record_id: GlobalId,
        wire: &WireRecord,
        missing: MissingDependency,
        tracker: &mut RecordTracker,
    ) -> Result<ApplyOutcome> {
        let previous = self.store.get_deferred(&record_id)?;

        if previous.is_none() {
            let queued = self.store.count_deferred()?;
            if queued >= self.config.max_deferred_records {
                tracker.advance(RecordState::Failed)?;
                tracing::warn!(
                    table,
                    record_id = %record_id,
                    queued,
                    limit = self.config.max_deferred_records,
                    "Deferred queue full, rejecting record"
                );
                return Err(SyncError::DeferredQueueFull {
                    limit: self.config.max_deferred_records,
                });
            }
        }

        tracker.advance(RecordState::Deferred)?;

        let (deferred_at, attempts) = previous.map_or_else(
            || (Utc::now(), 0),
            |p| (p.deferred_at, p.attempts.saturating_add(1)),
        );

        self.store.put_deferred(&DeferredRecord {
            table: table.to_string(),
            record_id,
            wire: wire.clone(),
            missing: (&missing).into(),
            deferred_at,
            attempts,
        })?;

        tracing::warn!(
            table,
            record_id = %record_id,
            target = %missing.target_type,
            missing = %missing.missing_uuid,
            field = %missing.blocked_field,
            attempts,
            "Deferred record until dependency arrives"
        );

        Ok(ApplyOutcome::Deferred(missing))
    }

    fn dependency_present(&self, missing: &MissingDependency) -> Result<bool> {
        Ok(self
            .store
            .lookup_local_by_global(&missing.target_type, &missing.missing_uuid)?
            .is_some())
    }

    /// Retry every record waiting for `applied`, then for whatever those
    /// retries applied in turn.
    async fn release_dependents(&self, applied: GlobalId, report: &mut ApplyReport) -> Result<()> {
        let mut worklist = vec![applied];

        while let Some(dependency) = worklist.pop() {
            for deferred in self.store.list_deferred_for(&dependency)? {
                let DeferredRecord {
                    table, record_id, ..
                } = deferred;

                tracing::debug!(
                    table = %table,
                    record_id = %record_id,
                    dependency = %dependency,
                    "Retrying deferred record"
                );

                match self.retry_deferred(&table, record_id, dependency).await {
                    Ok(None) => {}
                    Ok(Some(outcome)) => {
                        match &outcome {
                            ApplyOutcome::Applied { .. } => worklist.push(record_id),
                            ApplyOutcome::Deferred(next)
                                if next.missing_uuid != dependency
                                    && self.dependency_present(next)? =>
                            {
                                worklist.push(next.missing_uuid);
                            }
                            _ => {}
                        }
                        report.released.push(ReleasedRecord {
                            table,
                            record_id,
                            outcome,
                        });
                    }
                    Err(SyncError::Store(error)) => return Err(SyncError::Store(error)),
                    Err(error) => {
                        tracing::error!(
                            table = %table,
                            record_id = %record_id,
                            error = %error,
                            "Deferred record failed on retry"
                        );
                        report.retry_failures.push(RetryFailure {
                            table,
                            record_id,
                            error,
                        });
                    }
                }
            }
        }

        Ok(())
    }

    /// Evict deferred records whose dependency is overdue.
    ///
    /// A record is stale when it has waited longer than `stale_after_seconds`
    /// or has been re-deferred more than `max_retry_attempts` times.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub async fn evict_stale(&self, now: DateTime<Utc>) -> Result<Vec<StaleDependency>> {
        let stale_after = self.config.stale_after();
        let mut evicted = Vec::new();

        for deferred in self.store.list_deferred()? {
            let reason = if deferred.age(now) > stale_after {
                StaleReason::Expired
            } else if deferred.attempts > self.config.max_retry_attempts {
                StaleReason::TooManyAttempts
            } else {
                continue;
            };

            let _guard = self.locks.lock(deferred.record_id).await;

            // The record may have been applied while waiting for the lock
            let Some(current) = self.store.remove_deferred(&deferred.record_id)? else {
                continue;
            };

            let stale = StaleDependency {
                table: current.table,
                record_id: current.record_id,
                missing: current.missing.into(),
                deferred_at: current.deferred_at,
                attempts: current.attempts,
                reason,
            };

            tracing::warn!(
                table = %stale.table,
                record_id = %stale.record_id,
                missing = %stale.missing,
                attempts = stale.attempts,
                reason = ?stale.reason,
                "Evicted stale deferred record"
            );

            evicted.push(stale);
        }

        Ok(evicted)
    }

    /// Records waiting for a dependency, for a "pending sync" view.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub fn pending(&self) -> Result<Vec<DeferredRecord>> {
        Ok(self.store.list_deferred()?)
    }
}
