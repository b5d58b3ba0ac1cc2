//! Command implementations.
//!
//! Every command writes its report to `out` so the binary can print to
//! stdout and the tests can capture it.

use std::io::Write;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use xref_core::WireRecord;
use xref_store::Store;
use xref_sync::{ApplyOutcome, ApplyPipeline, ModelRegistry, SyncError, SyncMessage};

/// One table of an export file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableExport {
    /// Table name.
    pub table: String,
    /// Records in wire form.
    pub records: Vec<WireRecord>,
}

/// Counts of an import run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    /// Applied on first delivery.
    pub applied: usize,
    /// Applied after waiting in the deferred queue.
    pub released: usize,
    /// Waiting for a dependency once the import finished.
    pub deferred: usize,
    /// Dropped because the entity was deleted here.
    pub discarded: usize,
    /// Rejected.
    pub failed: usize,
}

/// Print the registered models in dependency order.
///
/// Nullable references are marked with a trailing `?`.
pub fn validate(registry: &ModelRegistry, out: &mut impl Write) -> anyhow::Result<()> {
    writeln!(out, "{} models registered, sync order:", registry.len())?;

    for table in registry.sync_order() {
        let descriptor = registry.descriptor(table)?;
        let references: Vec<String> = descriptor
            .mappings()
            .iter()
            .map(|m| {
                let marker = if m.nullable { "?" } else { "" };
                format!("{} -> {}{marker}", m.local_field, m.target_table)
            })
            .collect();

        if references.is_empty() {
            writeln!(out, "  {table}")?;
        } else {
            writeln!(out, "  {table} ({})", references.join(", "))?;
        }
    }

    Ok(())
}

/// Print every record waiting for a dependency.
pub fn pending<S: Store>(
    pipeline: &ApplyPipeline<S>,
    now: DateTime<Utc>,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let pending = pipeline.pending()?;

    if pending.is_empty() {
        writeln!(out, "No pending records")?;
        return Ok(());
    }

    writeln!(out, "{} pending records:", pending.len())?;
    for record in pending {
        writeln!(
            out,
            "  {} {} waiting for {} {} via {} ({}s, {} attempts)",
            record.table,
            record.record_id,
            record.missing.target_table,
            record.missing.missing_id,
            record.missing.field,
            record.age(now).num_seconds(),
            record.attempts,
        )?;
    }

    Ok(())
}

/// Evict overdue deferred records and print them.
pub async fn evict_stale<S: Store>(
    pipeline: &ApplyPipeline<S>,
    now: DateTime<Utc>,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let evicted = pipeline.evict_stale(now).await?;

    writeln!(out, "Evicted {} stale records", evicted.len())?;
    for stale in evicted {
        writeln!(
            out,
            "  {} {} never received {} ({:?})",
            stale.table, stale.record_id, stale.missing, stale.reason
        )?;
    }

    Ok(())
}

/// Export stored records in wire form, all tables in dependency order or
/// a single one.
pub async fn export<S: Store>(
    pipeline: &ApplyPipeline<S>,
    table: Option<&str>,
) -> anyhow::Result<Vec<TableExport>> {
    let mapper = pipeline.mapper();

    let tables = match table {
        Some(table) => vec![TableExport {
            table: table.to_string(),
            records: mapper.export_table(table).await?,
        }],
        None => mapper
            .export_all()
            .await?
            .into_iter()
            .map(|(table, records)| TableExport {
                table: table.to_string(),
                records,
            })
            .collect(),
    };

    Ok(tables)
}

/// Apply an export produced on another device.
pub async fn import<S: Store>(
    pipeline: &ApplyPipeline<S>,
    tables: Vec<TableExport>,
) -> anyhow::Result<ImportSummary> {
    let mut messages = Vec::new();
    for export in tables {
        for record in export.records {
            let message = SyncMessage::upsert(export.table.as_str(), record)
                .with_context(|| format!("record in table {}", export.table))?;
            messages.push(message);
        }
    }

    let mut summary = ImportSummary::default();
    for (record_id, result) in pipeline.apply_batch(messages).await {
        match result {
            Ok(report) => {
                summary.released += report.released.len();
                summary.failed += report.retry_failures.len();
                match report.outcome {
                    ApplyOutcome::Applied { .. } | ApplyOutcome::Deleted { .. } => {
                        summary.applied += 1;
                    }
                    ApplyOutcome::Discarded => summary.discarded += 1,
                    // Counted from the queue below, it may have been released since
                    ApplyOutcome::Deferred(_) => {}
                }
            }
            Err(error @ SyncError::Store(_)) => {
                return Err(error).with_context(|| format!("applying {record_id}"));
            }
            Err(error) => {
                tracing::warn!(record_id = %record_id, error = %error, "Import rejected record");
                summary.failed += 1;
            }
        }
    }

    summary.deferred = pipeline.pending()?.len();

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;
    use xref_core::{GlobalId, LocalId, Record};
    use xref_store::RocksStore;

    fn create_test_pipeline() -> (ApplyPipeline<RocksStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let registry = Arc::new(ModelRegistry::standard().unwrap());
        (ApplyPipeline::with_defaults(registry, store), dir)
    }

    fn output(bytes: Vec<u8>) -> String {
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn validate_lists_dependencies() {
        let registry = ModelRegistry::standard().unwrap();
        let mut out = Vec::new();

        validate(&registry, &mut out).unwrap();

        let out = output(out);
        assert!(out.starts_with("6 models registered"));
        assert!(out.contains("  locations (device_id -> devices, volume_id -> volumes)"));
    }

    xref_sync::sync_model! {
        /// A playlist opening with one of its own tracks.
        pub struct Playlist in "playlists" {
            /// Opening track, if it has synced.
            pub opener_id: Option<LocalId>,
        }
        nullable_keys {
            opener_id => "tracks",
        }
    }

    xref_sync::sync_model! {
        /// A track on a playlist.
        pub struct Track in "tracks" {
            /// Playlist.
            pub playlist_id: LocalId,
        }
        foreign_keys {
            playlist_id => "playlists",
        }
    }

    #[test]
    fn validate_marks_nullable_references() {
        let registry = ModelRegistry::builder()
            .register::<Track>()
            .register::<Playlist>()
            .build()
            .unwrap();
        let mut out = Vec::new();

        validate(&registry, &mut out).unwrap();

        assert_eq!(
            output(out),
            "2 models registered, sync order:\n  playlists (opener_id -> tracks?)\n  tracks (playlist_id -> playlists)\n"
        );
    }

    #[tokio::test]
    async fn export_import_between_devices() {
        let (a, _dir_a) = create_test_pipeline();
        let (b, _dir_b) = create_test_pipeline();

        let device = GlobalId::generate();
        a.store()
            .upsert_entity("devices", &device, &Record::new().with("name", "laptop".to_string()))
            .unwrap();
        a.store()
            .upsert_entity(
                "locations",
                &GlobalId::generate(),
                &Record::new()
                    .with("device_id", LocalId::new(1))
                    .with("path", "/".to_string())
                    .with("total_file_count", 0u64)
                    .with("total_byte_size", 0u64),
            )
            .unwrap();

        let mut tables = export(&a, None).await.unwrap();
        // Deliver dependents first
        tables.reverse();

        let json = serde_json::to_string(&tables).unwrap();
        let tables: Vec<TableExport> = serde_json::from_str(&json).unwrap();

        let summary = import(&b, tables).await.unwrap();
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.deferred, 0);
        assert_eq!(summary.applied + summary.released, 2);
        assert!(b.pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn import_counts_records_still_waiting() {
        let (a, _dir_a) = create_test_pipeline();
        let (b, _dir_b) = create_test_pipeline();

        let device = GlobalId::generate();
        a.store()
            .upsert_entity("devices", &device, &Record::new().with("name", "laptop".to_string()))
            .unwrap();
        for path in ["/a", "/b"] {
            a.store()
                .upsert_entity(
                    "locations",
                    &GlobalId::generate(),
                    &Record::new()
                        .with("device_id", LocalId::new(1))
                        .with("path", path.to_string())
                        .with("total_file_count", 0u64)
                        .with("total_byte_size", 0u64),
                )
                .unwrap();
        }

        let locations = export(&a, Some("locations")).await.unwrap();
        let summary = import(&b, locations).await.unwrap();
        assert_eq!(summary.applied, 0);
        assert_eq!(summary.deferred, 2);

        let devices = export(&a, Some("devices")).await.unwrap();
        let summary = import(&b, devices).await.unwrap();
        assert_eq!(
            summary,
            ImportSummary {
                applied: 1,
                released: 2,
                ..ImportSummary::default()
            }
        );
    }

    #[tokio::test]
    async fn pending_reports_waiting_records() {
        let (pipeline, _dir) = create_test_pipeline();
        let mut out = Vec::new();

        pending(&pipeline, Utc::now(), &mut out).unwrap();
        assert_eq!(output(out), "No pending records\n");

        let device = GlobalId::generate();
        let message = SyncMessage::upsert(
            "volumes",
            WireRecord::new(
                Record::new()
                    .with("uuid", GlobalId::generate())
                    .with("device_uuid", device)
                    .with("fingerprint", "abc".to_string()),
            ),
        )
        .unwrap();
        pipeline.apply(message).await.unwrap();

        let mut out = Vec::new();
        pending(&pipeline, Utc::now(), &mut out).unwrap();
        let out = output(out);
        assert!(out.starts_with("1 pending records"));
        assert!(out.contains(&format!("waiting for devices {device} via device_id")));
    }
}
