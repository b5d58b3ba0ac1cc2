//! Core types for xref cross-device sync.
//!
//! This crate provides the foundational types used throughout xref:
//!
//! - **Identifiers**: [`LocalId`] (device-local integer keys) and [`GlobalId`]
//!   (UUIDs shared by every device)
//! - **Records**: a typed field map ([`Record`]) and the two identifier-space
//!   views of it, [`LocalRecord`] and [`WireRecord`]
//! - **Error types**: identifier and record access errors
//!
//! # Example
//!
//! ```
//! use xref_core::{GlobalId, LocalId, LocalRecord, Record};
//!
//! let location = LocalRecord::new(
//!     Record::new()
//!         .with("uuid", GlobalId::generate())
//!         .with("name", "Photos".to_string())
//!         .with("device_id", LocalId::new(1)),
//! );
//!
//! assert!(location.global_id().is_ok());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;
pub mod record;

pub use error::{RecordError, Result};
pub use ids::{GlobalId, IdError, LocalId};
pub use record::{FieldValue, LocalRecord, Record, Value, WireRecord, ID_FIELD, UUID_FIELD};
