//! Two devices exchanging records through the mappers and the apply pipeline.
//!
//! Each device has its own `RocksDB` store in a temporary directory, so local
//! ids are assigned independently on both sides.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;
use xref_core::{GlobalId, LocalId, Record, WireRecord};
use xref_store::{RocksStore, Store};
use xref_sync::{
    ApplyOutcome, ApplyPipeline, ModelRegistry, SyncConfig, SyncError, SyncMessage,
};

struct Device {
    pipeline: ApplyPipeline<RocksStore>,
    _dir: TempDir,
}

impl Device {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        Self {
            pipeline: open_pipeline(dir.path(), SyncConfig::default()),
            _dir: dir,
        }
    }

    fn store(&self) -> &RocksStore {
        self.pipeline.store()
    }

    fn local_id(&self, table: &str, id: &GlobalId) -> Option<LocalId> {
        self.store().lookup_local_by_global(table, id).unwrap()
    }

    fn insert(&self, table: &str, id: GlobalId, fields: Record) -> LocalId {
        self.store().upsert_entity(table, &id, &fields).unwrap()
    }

    async fn outbound(&self, table: &str, id: &GlobalId) -> SyncMessage {
        let entity = self
            .store()
            .get_entity_by_global(table, id)
            .unwrap()
            .unwrap();
        let wire = self
            .pipeline
            .mapper()
            .to_wire_form(table, &entity.to_local_record())
            .await
            .unwrap();
        SyncMessage::upsert(table, wire).unwrap()
    }
}

fn open_pipeline(path: &Path, config: SyncConfig) -> ApplyPipeline<RocksStore> {
    let store = Arc::new(RocksStore::open(path).unwrap());
    let registry = Arc::new(ModelRegistry::standard().unwrap());
    ApplyPipeline::new(registry, store, config)
}

fn device_fields(name: &str) -> Record {
    Record::new().with("name", name.to_string())
}

fn location_fields(device_id: LocalId, path: &str) -> Record {
    Record::new()
        .with("device_id", device_id)
        .with("path", path.to_string())
        .with("total_file_count", 0u64)
        .with("total_byte_size", 0u64)
}

fn file_fields(location_id: LocalId, parent_id: Option<LocalId>, name: &str) -> Record {
    Record::new()
        .with("location_id", location_id)
        .with("parent_id", parent_id)
        .with("name", name.to_string())
        .with("size", 0u64)
        .with("is_dir", parent_id.is_none())
}

#[tokio::test]
async fn foreign_key_resolves_to_destination_local_id() {
    let a = Device::new();
    let b = Device::new();

    let aaaa = GlobalId::generate();
    let loc = GlobalId::generate();

    // Device A: devices {1 -> aaaa}, locations {3 -> loc}
    assert_eq!(a.insert("devices", aaaa, device_fields("laptop")), LocalId::new(1));
    a.insert("locations", GlobalId::generate(), location_fields(LocalId::new(1), "/a"));
    a.insert("locations", GlobalId::generate(), location_fields(LocalId::new(1), "/b"));
    assert_eq!(
        a.insert("locations", loc, location_fields(LocalId::new(1), "/photos")),
        LocalId::new(3)
    );

    // Device B: devices {2 -> aaaa}
    b.insert("devices", GlobalId::generate(), device_fields("phone"));
    assert_eq!(b.insert("devices", aaaa, device_fields("laptop")), LocalId::new(2));

    let message = a.outbound("locations", &loc).await;
    let xref_sync::Change::Upsert(wire) = &message.change else {
        panic!("expected upsert");
    };
    assert_eq!(wire.as_record().get_as::<GlobalId>("device_uuid").unwrap(), aaaa);
    assert!(!wire.as_record().contains("device_id"));
    assert!(!wire.as_record().contains("id"));

    let report = b.pipeline.apply(message).await.unwrap();
    assert_eq!(
        report.outcome,
        ApplyOutcome::Applied {
            local_id: LocalId::new(1)
        }
    );

    let stored = b.store().get_entity_by_global("locations", &loc).unwrap().unwrap();
    assert_eq!(
        stored.fields.get_as::<LocalId>("device_id").unwrap(),
        LocalId::new(2)
    );
}

#[tokio::test]
async fn location_before_device_is_deferred_then_applied() {
    let a = Device::new();
    let b = Device::new();

    let aaaa = GlobalId::generate();
    let loc = GlobalId::generate();
    let device_local = a.insert("devices", aaaa, device_fields("laptop"));
    a.insert("locations", loc, location_fields(device_local, "/photos"));

    let location = a.outbound("locations", &loc).await;
    let device = a.outbound("devices", &aaaa).await;

    let report = b.pipeline.apply(location).await.unwrap();
    match report.outcome {
        ApplyOutcome::Deferred(missing) => {
            assert_eq!(missing.target_type, "devices");
            assert_eq!(missing.missing_uuid, aaaa);
        }
        other => panic!("expected Deferred, got {other:?}"),
    }
    assert_eq!(b.local_id("locations", &loc), None);

    let report = b.pipeline.apply(device).await.unwrap();
    assert_eq!(report.released.len(), 1);
    assert!(report.retry_failures.is_empty());

    let device_on_b = b.local_id("devices", &aaaa).unwrap();
    let stored = b.store().get_entity_by_global("locations", &loc).unwrap().unwrap();
    assert_eq!(stored.fields.get_as::<LocalId>("device_id").unwrap(), device_on_b);
    assert!(b.pipeline.pending().unwrap().is_empty());
}

#[tokio::test]
async fn round_trip_preserves_references() {
    let a = Device::new();
    let b = Device::new();

    // Shift B's id space so the two devices disagree on every local id
    b.insert("devices", GlobalId::generate(), device_fields("other"));

    let device = GlobalId::generate();
    let location = GlobalId::generate();
    let root = GlobalId::generate();
    let child = GlobalId::generate();

    let device_id = a.insert("devices", device, device_fields("laptop"));
    let location_id = a.insert("locations", location, location_fields(device_id, "/"));
    let root_id = a.insert("files", root, file_fields(location_id, None, "docs"));
    a.insert("files", child, file_fields(location_id, Some(root_id), "notes"));

    for (table, wire) in a.pipeline.mapper().export_all().await.unwrap() {
        for record in wire {
            let report = b
                .pipeline
                .apply(SyncMessage::upsert(table, record).unwrap())
                .await
                .unwrap();
            assert!(matches!(report.outcome, ApplyOutcome::Applied { .. }));
        }
    }

    // Both devices produce the same wire form for every record
    for (table, id) in [
        ("devices", device),
        ("locations", location),
        ("files", root),
        ("files", child),
    ] {
        assert_eq!(a.outbound(table, &id).await, b.outbound(table, &id).await);
    }

    let child_on_b = b.store().get_entity_by_global("files", &child).unwrap().unwrap();
    assert_eq!(
        child_on_b.fields.get_as::<Option<LocalId>>("parent_id").unwrap(),
        b.local_id("files", &root)
    );
}

#[tokio::test]
async fn reverse_delivery_converges() {
    let a = Device::new();
    let b = Device::new();

    let device = GlobalId::generate();
    let location = GlobalId::generate();
    let root = GlobalId::generate();
    let child = GlobalId::generate();
    let tag = GlobalId::generate();
    let file_tag = GlobalId::generate();

    let device_id = a.insert("devices", device, device_fields("laptop"));
    let location_id = a.insert("locations", location, location_fields(device_id, "/"));
    let root_id = a.insert("files", root, file_fields(location_id, None, "docs"));
    let child_id = a.insert("files", child, file_fields(location_id, Some(root_id), "notes"));
    let tag_id = a.insert("tags", tag, Record::new().with("name", "red".to_string()));
    a.insert(
        "file_tags",
        file_tag,
        Record::new().with("file_id", child_id).with("tag_id", tag_id),
    );

    let mut messages = Vec::new();
    for (table, id) in [
        ("file_tags", file_tag),
        ("files", child),
        ("files", root),
        ("locations", location),
        ("tags", tag),
        ("devices", device),
    ] {
        messages.push(a.outbound(table, &id).await);
    }

    for message in messages {
        b.pipeline.apply(message).await.unwrap();
    }

    assert!(b.pipeline.pending().unwrap().is_empty());
    for (table, id) in [
        ("devices", device),
        ("locations", location),
        ("files", root),
        ("files", child),
        ("tags", tag),
        ("file_tags", file_tag),
    ] {
        assert!(b.local_id(table, &id).is_some(), "{table} {id} not applied");
    }

    let link = b.store().get_entity_by_global("file_tags", &file_tag).unwrap().unwrap();
    assert_eq!(
        Some(link.fields.get_as::<LocalId>("file_id").unwrap()),
        b.local_id("files", &child)
    );
}

#[tokio::test]
async fn concurrent_batch_converges() {
    let a = Device::new();
    let b = Device::new();

    let device = GlobalId::generate();
    let device_id = a.insert("devices", device, device_fields("laptop"));

    let mut locations = Vec::new();
    for i in 0..20 {
        let id = GlobalId::generate();
        a.insert("locations", id, location_fields(device_id, &format!("/l{i}")));
        locations.push(id);
    }

    let mut messages = Vec::new();
    for id in &locations {
        messages.push(a.outbound("locations", id).await);
    }
    messages.insert(10, a.outbound("devices", &device).await);
    // Redelivery of the same records
    messages.extend(messages.clone());

    let results = b.pipeline.apply_batch(messages).await;
    assert!(results.iter().all(|(_, result)| result.is_ok()));

    assert!(b.pipeline.pending().unwrap().is_empty());
    assert_eq!(b.store().list_entities("locations").unwrap().len(), 20);
    assert_eq!(b.store().list_entities("devices").unwrap().len(), 1);
}

#[tokio::test]
async fn deferred_records_survive_restart() {
    let a = Device::new();
    let dir = TempDir::new().unwrap();

    let device = GlobalId::generate();
    let location = GlobalId::generate();
    let device_id = a.insert("devices", device, device_fields("laptop"));
    a.insert("locations", location, location_fields(device_id, "/"));

    {
        let b = open_pipeline(dir.path(), SyncConfig::default());
        let report = b.apply(a.outbound("locations", &location).await).await.unwrap();
        assert!(matches!(report.outcome, ApplyOutcome::Deferred(_)));
    }

    let b = open_pipeline(dir.path(), SyncConfig::default());
    assert_eq!(b.pending().unwrap().len(), 1);

    let report = b.apply(a.outbound("devices", &device).await).await.unwrap();
    assert_eq!(report.released.len(), 1);
    assert!(b
        .store()
        .lookup_local_by_global("locations", &location)
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn missing_dependency_leaves_nothing_behind() {
    let b = Device::new();
    let location = GlobalId::generate();
    let wire = WireRecord::new(
        Record::new()
            .with("uuid", location)
            .with("device_uuid", GlobalId::generate())
            .with("path", "/".to_string())
            .with("total_file_count", 0u64)
            .with("total_byte_size", 0u64),
    );
    let before = wire.clone();

    let result = b.pipeline.mapper().to_local_form("locations", &wire).await;
    assert!(matches!(result, Err(SyncError::MissingDependency(_))));
    assert_eq!(wire, before);
    assert!(b.store().list_entities("locations").unwrap().is_empty());
}

#[tokio::test]
async fn dangling_reference_is_not_sent() {
    let a = Device::new();
    let location = GlobalId::generate();
    a.insert("locations", location, location_fields(LocalId::new(42), "/"));

    let entity = a
        .store()
        .get_entity_by_global("locations", &location)
        .unwrap()
        .unwrap();
    let result = a
        .pipeline
        .mapper()
        .to_wire_form("locations", &entity.to_local_record())
        .await;

    assert!(matches!(
        result,
        Err(SyncError::DanglingLocalReference { ref field, .. }) if field == "device_id"
    ));
}

#[tokio::test]
async fn delete_overtaking_create_wins() {
    let a = Device::new();
    let b = Device::new();

    let device = GlobalId::generate();
    a.insert("devices", device, device_fields("laptop"));
    let create = a.outbound("devices", &device).await;

    b.pipeline
        .apply(SyncMessage::delete("devices", device))
        .await
        .unwrap();
    let report = b.pipeline.apply(create).await.unwrap();

    assert_eq!(report.outcome, ApplyOutcome::Discarded);
    assert_eq!(b.local_id("devices", &device), None);
}

#[tokio::test]
async fn stale_deferral_is_reported() {
    let a = Device::new();
    let dir = TempDir::new().unwrap();
    let config = SyncConfig {
        stale_after_seconds: 1,
        ..SyncConfig::default()
    };
    let b = open_pipeline(dir.path(), config);

    let device = GlobalId::generate();
    let location = GlobalId::generate();
    let device_id = a.insert("devices", device, device_fields("laptop"));
    a.insert("locations", location, location_fields(device_id, "/"));

    b.apply(a.outbound("locations", &location).await).await.unwrap();

    let stale = b
        .evict_stale(Utc::now() + chrono::Duration::seconds(5))
        .await
        .unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].record_id, location);
    assert_eq!(stale[0].missing.missing_uuid, device);
    assert!(b.pending().unwrap().is_empty());
}
