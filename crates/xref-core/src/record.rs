//! Typed field-map representation of synced records.
//!
//! Records move through the sync layer as ordered maps of field name to
//! [`Value`]. Two newtypes keep the two identifier spaces apart:
//!
//! - [`LocalRecord`]: foreign keys are device-local integers (`device_id`).
//! - [`WireRecord`]: foreign keys are global UUIDs (`device_uuid`), and the
//!   local primary key is absent.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{RecordError, Result};
use crate::ids::{GlobalId, LocalId};

/// Field holding the device-local primary key. Never transmitted.
pub const ID_FIELD: &str = "id";

/// Field holding the global identifier. Always transmitted.
pub const UUID_FIELD: &str = "uuid";

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// An explicitly unset value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed integer (also used for local identifiers).
    Int(i64),
    /// An unsigned integer too large for [`Value::Int`].
    UInt(u64),
    /// A floating point number.
    Float(f64),
    /// A UTF-8 string.
    Text(String),
    /// A UUID (used for global identifiers).
    Uuid(uuid::Uuid),
}

impl Value {
    /// Name of the value's kind, for diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) | Self::UInt(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Uuid(_) => "uuid",
        }
    }

    /// Returns true for [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Conversion between Rust field types and [`Value`].
pub trait FieldValue: Sized {
    /// Kind name reported in type mismatch errors.
    const KIND: &'static str;

    /// Convert into a [`Value`].
    fn into_value(self) -> Value;

    /// Decode from a present [`Value`].
    ///
    /// # Errors
    ///
    /// Returns `RecordError::TypeMismatch` if the value has the wrong kind.
    fn from_value(field: &str, value: &Value) -> Result<Self>;

    /// Value to use when the field is absent from the record.
    ///
    /// # Errors
    ///
    /// Returns `RecordError::MissingField` unless the type is optional.
    fn from_missing(field: &str) -> Result<Self> {
        Err(RecordError::MissingField(field.to_string()))
    }
}

fn mismatch(field: &str, expected: &'static str, found: &Value) -> RecordError {
    RecordError::TypeMismatch {
        field: field.to_string(),
        expected,
        found: found.kind(),
    }
}

fn out_of_range(field: &str, value: impl Into<i128>) -> RecordError {
    RecordError::OutOfRange {
        field: field.to_string(),
        value: value.into(),
    }
}

impl FieldValue for bool {
    const KIND: &'static str = "bool";

    fn into_value(self) -> Value {
        Value::Bool(self)
    }

    fn from_value(field: &str, value: &Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            other => Err(mismatch(field, Self::KIND, other)),
        }
    }
}

impl FieldValue for i64 {
    const KIND: &'static str = "int";

    fn into_value(self) -> Value {
        Value::Int(self)
    }

    fn from_value(field: &str, value: &Value) -> Result<Self> {
        match value {
            Value::Int(i) => Ok(*i),
            Value::UInt(u) => i64::try_from(*u).map_err(|_| out_of_range(field, *u)),
            other => Err(mismatch(field, Self::KIND, other)),
        }
    }
}

impl FieldValue for u64 {
    const KIND: &'static str = "int";

    fn into_value(self) -> Value {
        i64::try_from(self).map_or(Value::UInt(self), Value::Int)
    }

    fn from_value(field: &str, value: &Value) -> Result<Self> {
        match value {
            Value::Int(i) => u64::try_from(*i).map_err(|_| out_of_range(field, *i)),
            Value::UInt(u) => Ok(*u),
            other => Err(mismatch(field, Self::KIND, other)),
        }
    }
}

impl FieldValue for f64 {
    const KIND: &'static str = "float";

    fn into_value(self) -> Value {
        Value::Float(self)
    }

    fn from_value(field: &str, value: &Value) -> Result<Self> {
        match value {
            Value::Float(f) => Ok(*f),
            #[allow(clippy::cast_precision_loss)]
            Value::Int(i) => Ok(*i as f64),
            #[allow(clippy::cast_precision_loss)]
            Value::UInt(u) => Ok(*u as f64),
            other => Err(mismatch(field, Self::KIND, other)),
        }
    }
}

impl FieldValue for String {
    const KIND: &'static str = "text";

    fn into_value(self) -> Value {
        Value::Text(self)
    }

    fn from_value(field: &str, value: &Value) -> Result<Self> {
        match value {
            Value::Text(s) => Ok(s.clone()),
            other => Err(mismatch(field, Self::KIND, other)),
        }
    }
}

impl FieldValue for LocalId {
    const KIND: &'static str = "int";

    fn into_value(self) -> Value {
        Value::Int(self.get())
    }

    fn from_value(field: &str, value: &Value) -> Result<Self> {
        i64::from_value(field, value).map(LocalId::new)
    }
}

impl FieldValue for GlobalId {
    const KIND: &'static str = "uuid";

    fn into_value(self) -> Value {
        Value::Uuid(*self.as_uuid())
    }

    fn from_value(field: &str, value: &Value) -> Result<Self> {
        match value {
            Value::Uuid(u) => Ok(GlobalId::from_uuid(*u)),
            Value::Text(s) => s.parse().map_err(|source| RecordError::InvalidId {
                field: field.to_string(),
                source,
            }),
            other => Err(mismatch(field, Self::KIND, other)),
        }
    }
}

impl FieldValue for uuid::Uuid {
    const KIND: &'static str = "uuid";

    fn into_value(self) -> Value {
        Value::Uuid(self)
    }

    fn from_value(field: &str, value: &Value) -> Result<Self> {
        GlobalId::from_value(field, value).map(|id| *id.as_uuid())
    }
}

impl<T: FieldValue> FieldValue for Option<T> {
    const KIND: &'static str = T::KIND;

    fn into_value(self) -> Value {
        self.map_or(Value::Null, FieldValue::into_value)
    }

    fn from_value(field: &str, value: &Value) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(field, value).map(Some)
        }
    }

    fn from_missing(_field: &str) -> Result<Self> {
        Ok(None)
    }
}

/// An ordered map of field name to value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, Value>);

impl Record {
    /// Create an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert of a typed value.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl FieldValue) -> Self {
        self.set(field, value);
        self
    }

    /// Get a raw value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Returns true if the field is present (even if `Null`).
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Insert a raw value, returning the previous one.
    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    /// Insert a typed value.
    pub fn set(&mut self, field: impl Into<String>, value: impl FieldValue) {
        self.0.insert(field.into(), value.into_value());
    }

    /// Remove a field, returning its value.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// Read a typed value.
    ///
    /// # Errors
    ///
    /// Returns an error if the field is absent (and `T` is not optional) or has
    /// the wrong kind.
    pub fn get_as<T: FieldValue>(&self, field: &str) -> Result<T> {
        match self.0.get(field) {
            Some(value) => T::from_value(field, value),
            None => T::from_missing(field),
        }
    }

    /// Read a typed value, treating both absent and `Null` as `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the field holds a value of the wrong kind.
    pub fn get_opt<T: FieldValue>(&self, field: &str) -> Result<Option<T>> {
        self.get_as::<Option<T>>(field)
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The global identifier stored in the `uuid` field.
    ///
    /// # Errors
    ///
    /// Returns an error if the field is absent or not a UUID.
    pub fn global_id(&self) -> Result<GlobalId> {
        self.get_as(UUID_FIELD)
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A record in this device's identifier space.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalRecord(Record);

impl LocalRecord {
    /// Wrap a record whose foreign keys are local identifiers.
    #[must_use]
    pub const fn new(record: Record) -> Self {
        Self(record)
    }

    /// Borrow the underlying record.
    #[must_use]
    pub const fn as_record(&self) -> &Record {
        &self.0
    }

    /// Unwrap into the underlying record.
    #[must_use]
    pub fn into_record(self) -> Record {
        self.0
    }

    /// The global identifier of this record.
    ///
    /// # Errors
    ///
    /// Returns an error if the `uuid` field is absent or malformed.
    pub fn global_id(&self) -> Result<GlobalId> {
        self.0.global_id()
    }

    /// The local primary key, if the record has been persisted.
    ///
    /// # Errors
    ///
    /// Returns an error if the `id` field holds a non-integer.
    pub fn local_id(&self) -> Result<Option<LocalId>> {
        self.0.get_as(ID_FIELD)
    }
}

/// A record in the global identifier space, ready for transmission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WireRecord(Record);

impl WireRecord {
    /// Wrap a record whose foreign keys are global identifiers.
    #[must_use]
    pub const fn new(record: Record) -> Self {
        Self(record)
    }

    /// Borrow the underlying record.
    #[must_use]
    pub const fn as_record(&self) -> &Record {
        &self.0
    }

    /// Unwrap into the underlying record.
    #[must_use]
    pub fn into_record(self) -> Record {
        self.0
    }

    /// The global identifier of this record.
    ///
    /// # Errors
    ///
    /// Returns an error if the `uuid` field is absent or malformed.
    pub fn global_id(&self) -> Result<GlobalId> {
        self.0.global_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_access() {
        let id = GlobalId::generate();
        let record = Record::new()
            .with("uuid", id)
            .with("name", "Photos".to_string())
            .with("device_id", LocalId::new(1))
            .with("volume_id", None::<LocalId>);

        assert_eq!(record.global_id().unwrap(), id);
        assert_eq!(record.get_as::<String>("name").unwrap(), "Photos");
        assert_eq!(
            record.get_as::<LocalId>("device_id").unwrap(),
            LocalId::new(1)
        );
        assert_eq!(record.get_as::<Option<LocalId>>("volume_id").unwrap(), None);
        assert_eq!(record.get_opt::<LocalId>("parent_id").unwrap(), None);
        assert_eq!(record.get_opt::<uuid::Uuid>("uuid").unwrap(), Some(*id.as_uuid()));
        assert_eq!(record.get("volume_id"), Some(&Value::Null));
    }

    #[test]
    fn missing_and_mismatched_fields() {
        let record = Record::new().with("name", "x".to_string());

        assert_eq!(
            record.get_as::<i64>("size"),
            Err(RecordError::MissingField("size".into()))
        );
        assert_eq!(record.get_as::<Option<i64>>("size"), Ok(None));
        assert!(matches!(
            record.get_as::<i64>("name"),
            Err(RecordError::TypeMismatch {
                expected: "int",
                found: "text",
                ..
            })
        ));
    }

    #[test]
    fn global_id_accepts_uuid_text() {
        let id = GlobalId::generate();
        let record = Record::new().with("uuid", id.to_string());
        assert_eq!(record.global_id().unwrap(), id);

        let bad = Record::new().with("uuid", "aaaa".to_string());
        assert!(matches!(
            bad.global_id(),
            Err(RecordError::InvalidId { .. })
        ));
    }

    #[test]
    fn negative_size_is_out_of_range() {
        let record = Record::new().with("size", -1i64);
        assert!(matches!(
            record.get_as::<u64>("size"),
            Err(RecordError::OutOfRange { value: -1, .. })
        ));
    }

    #[test]
    fn large_unsigned_values_are_kept() {
        let huge = u64::MAX - 1;
        let record = Record::new()
            .with("size", huge)
            .with("small", 42u64);

        assert_eq!(record.get("size"), Some(&Value::UInt(huge)));
        assert_eq!(record.get("small"), Some(&Value::Int(42)));
        assert_eq!(record.get_as::<u64>("size").unwrap(), huge);
        assert_eq!(record.get("size").unwrap().kind(), "int");

        let json = serde_json::to_string(&record).unwrap();
        let back: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get_as::<u64>("size").unwrap(), huge);

        assert!(matches!(
            record.get_as::<i64>("size"),
            Err(RecordError::OutOfRange { value, .. }) if value == i128::from(huge)
        ));
        assert!(matches!(
            record.get_as::<LocalId>("size"),
            Err(RecordError::OutOfRange { .. })
        ));
    }

    #[test]
    fn local_record_local_id() {
        let unsaved = LocalRecord::new(Record::new());
        assert_eq!(unsaved.local_id().unwrap(), None);

        let saved = LocalRecord::new(Record::new().with("id", LocalId::new(7)));
        assert_eq!(saved.local_id().unwrap(), Some(LocalId::new(7)));
    }

    #[test]
    fn record_serde_json_shape() {
        let record = Record::new().with("size", 10i64);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"size":{"Int":10}}"#);
    }
}
