//! Error types for record access.

use thiserror::Error;

use crate::ids::IdError;

/// A result type using `RecordError`.
pub type Result<T> = std::result::Result<T, RecordError>;

/// Errors raised while reading typed values out of a [`Record`](crate::Record).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    /// A required field is absent.
    #[error("missing field '{0}'")]
    MissingField(String),

    /// A field holds a value of the wrong kind.
    #[error("field '{field}' has type {found}, expected {expected}")]
    TypeMismatch {
        /// The offending field.
        field: String,
        /// The kind the schema expects.
        expected: &'static str,
        /// The kind actually present.
        found: &'static str,
    },

    /// An integer value does not fit the target type.
    #[error("field '{field}' is out of range: {value}")]
    OutOfRange {
        /// The offending field.
        field: String,
        /// The value found.
        value: i128,
    },

    /// A field holds a malformed identifier.
    #[error("field '{field}': {source}")]
    InvalidId {
        /// The offending field.
        field: String,
        /// The parse failure.
        source: IdError,
    },
}
