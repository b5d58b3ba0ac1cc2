//! Foreign-key remapping for xref cross-device sync.
//!
//! Every synced entity has two identities: a `LocalId` assigned by the
//! device's own database and a `GlobalId` shared by all devices. Foreign keys
//! are stored locally as `LocalId`s, which mean nothing on another device.
//! This crate rewrites them into global form before a record leaves the
//! device and back into local form when it arrives.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Transport (out of scope)                   │
//! └─────────────────────────────────────────────────────────────┘
//!          ▲ WireRecord                          │ SyncMessage
//!          │                                     ▼
//! ┌──────────────────┐            ┌─────────────────────────────┐
//! │      Mapper      │◄───────────│        ApplyPipeline        │
//! │  to_wire_form    │            │  ┌──────────┐ ┌──────────┐  │
//! │  to_local_form   │            │  │ Deferred │ │  Entity  │  │
//! └──────────────────┘            │  │  queue   │ │  locks   │  │
//!          │                      │  └──────────┘ └──────────┘  │
//!          │ ModelRegistry        └─────────────────────────────┘
//!          ▼                                     │
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Store (RocksDB, translation table)             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use xref_store::RocksStore;
//! use xref_sync::{ApplyPipeline, ModelRegistry, SyncMessage};
//!
//! # async fn example(message: SyncMessage) -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/xref")?);
//! let registry = Arc::new(ModelRegistry::standard()?);
//! let pipeline = ApplyPipeline::with_defaults(registry, store);
//!
//! let report = pipeline.apply(message).await?;
//! println!("{:?}", report.outcome);
//! # Ok(())
//! # }
//! ```
//!
//! # Ordering
//!
//! Records may arrive in any order. A record whose reference cannot be
//! resolved yet is parked in the deferred queue and applied as soon as the
//! referenced entity is. See the [`lifecycle`] module for the per-record
//! state machine.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod handle;
pub mod lifecycle;
pub mod locks;
pub mod mapping;
pub mod model;
pub mod models;
pub mod pipeline;
pub mod registry;

pub use config::SyncConfig;
pub use error::{MissingDependency, Result, SyncError};
pub use handle::StorageHandle;
pub use lifecycle::{RecordState, RecordTracker};
pub use locks::{EntityGuard, EntityLocks};
pub use mapping::{to_local_form, to_local_form_batch, to_wire_form, to_wire_form_batch, Mapper};
pub use model::{wire_field_name, FkMapping, SyncModel};
pub use models::{Device, File, FileTag, Location, Tag, Volume};
pub use pipeline::{
    ApplyOutcome, ApplyPipeline, ApplyReport, Change, ReleasedRecord, RetryFailure,
    StaleDependency, StaleReason, SyncMessage,
};
pub use registry::{ModelDescriptor, ModelRegistry, ModelRegistryBuilder};

// Re-export commonly used types from dependencies for convenience
pub use xref_core::{
    GlobalId, LocalId, LocalRecord, Record, RecordError, Value, WireRecord, ID_FIELD, UUID_FIELD,
};
