//! Error types for the storage layer.

use thiserror::Error;

/// A result type using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A database error occurred.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A stored key or index entry could not be decoded.
    #[error("corrupt entry in {cf}: {detail}")]
    Corrupt {
        /// Column family holding the entry.
        cf: &'static str,
        /// What was wrong with it.
        detail: String,
    },
}
