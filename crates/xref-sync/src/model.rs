//! Syncable model declarations.
//!
//! A syncable model declares, next to its schema, which of its fields are
//! foreign keys and which table each one points into. The declarations are
//! static: they never touch storage and return the same slice on every call.
//!
//! Models are normally declared with [`sync_model!`](crate::sync_model), which
//! generates the struct, its record conversions and the [`SyncModel`] impl
//! from a single definition.

use xref_core::{GlobalId, LocalId, LocalRecord, RecordError, ID_FIELD};

/// Suffix of local foreign key fields.
pub const LOCAL_FK_SUFFIX: &str = "_id";

/// Suffix of foreign key fields on the wire.
pub const WIRE_FK_SUFFIX: &str = "_uuid";

/// A foreign key declaration: `local_field` holds a local id of `target_table`.
///
/// A nullable key does not order its model after the target table, which is
/// how two models can reference each other. An inbound nullable reference
/// whose target has not arrived is stored as null instead of deferring the
/// record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FkMapping {
    /// Field holding the local id, e.g. `device_id`.
    pub local_field: &'static str,
    /// Table the field points into, e.g. `devices`.
    pub target_table: &'static str,
    /// Whether an unresolved reference may be dropped to null.
    pub nullable: bool,
}

impl FkMapping {
    /// Declare a foreign key.
    #[must_use]
    pub const fn new(local_field: &'static str, target_table: &'static str) -> Self {
        Self {
            local_field,
            target_table,
            nullable: false,
        }
    }

    /// Declare a nullable foreign key.
    #[must_use]
    pub const fn new_nullable(local_field: &'static str, target_table: &'static str) -> Self {
        Self {
            local_field,
            target_table,
            nullable: true,
        }
    }

    /// Name of the field carrying the global id on the wire.
    #[must_use]
    pub fn wire_field(&self) -> String {
        wire_field_name(self.local_field)
    }

    /// Returns true if the mapping points back at its own table.
    #[must_use]
    pub fn is_self_reference(&self, table: &str) -> bool {
        self.target_table == table
    }
}

/// Wire name of a local foreign key field: `device_id` becomes `device_uuid`.
#[must_use]
pub fn wire_field_name(local_field: &str) -> String {
    let stem = local_field
        .strip_suffix(LOCAL_FK_SUFFIX)
        .unwrap_or(local_field);
    format!("{stem}{WIRE_FK_SUFFIX}")
}

/// Returns true if a field name follows the local foreign key convention.
#[must_use]
pub fn looks_like_foreign_key(field: &str) -> bool {
    field != ID_FIELD && field.ends_with(LOCAL_FK_SUFFIX)
}

/// A model that takes part in cross-device sync.
pub trait SyncModel: Sized + Send + Sync + 'static {
    /// Table name, also used as the entity type in the translation table.
    const TABLE: &'static str;

    /// Foreign keys of this model. Models without references keep the default.
    #[must_use]
    fn foreign_key_mappings() -> &'static [FkMapping] {
        &[]
    }

    /// Every field of the schema, including `id` and `uuid`.
    fn field_names() -> &'static [&'static str];

    /// Integer `*_id` fields that never leave this device.
    ///
    /// They are stripped from outbound records and exempt from the
    /// foreign key completeness check.
    #[must_use]
    fn local_only_fields() -> &'static [&'static str] {
        &[]
    }

    /// The global identifier.
    fn global_id(&self) -> GlobalId;

    /// The local primary key, `None` until persisted.
    fn local_id(&self) -> Option<LocalId>;

    /// Convert into the generic local record form.
    fn to_record(&self) -> LocalRecord;

    /// Decode from the generic local record form.
    ///
    /// # Errors
    ///
    /// Returns an error if a field is missing or has the wrong type.
    fn from_record(record: &LocalRecord) -> Result<Self, RecordError>;
}

/// Declare a syncable model.
///
/// Generates a struct with `id: Option<LocalId>` and `uuid: GlobalId` in
/// addition to the listed fields, plus its [`SyncModel`] impl. Foreign keys
/// and local-only fields are declared in the same block as the schema.
/// Keys listed under `nullable_keys` are declared with
/// [`FkMapping::new_nullable`].
///
/// ```
/// use xref_sync::{sync_model, LocalId, SyncModel};
///
/// sync_model! {
///     /// A photo album.
///     pub struct Album in "albums" {
///         /// Album title.
///         pub title: String,
///         /// Owning device.
///         pub device_id: LocalId,
///     }
///     foreign_keys {
///         device_id => "devices",
///     }
/// }
///
/// assert_eq!(Album::TABLE, "albums");
/// assert_eq!(Album::foreign_key_mappings()[0].wire_field(), "device_uuid");
/// ```
#[macro_export]
macro_rules! sync_model {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident in $table:literal {
            $( $(#[$fmeta:meta])* $fvis:vis $field:ident : $ty:ty ),* $(,)?
        }
        $( foreign_keys { $( $fk:ident => $target:literal ),* $(,)? } )?
        $( nullable_keys { $( $nfk:ident => $ntarget:literal ),* $(,)? } )?
        $( local_only { $( $local:ident ),* $(,)? } )?
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        $vis struct $name {
            /// Local primary key, `None` until persisted.
            pub id: ::std::option::Option<$crate::LocalId>,
            /// Global identifier.
            pub uuid: $crate::GlobalId,
            $( $(#[$fmeta])* $fvis $field: $ty, )*
        }

        impl $crate::SyncModel for $name {
            const TABLE: &'static str = $table;

            fn foreign_key_mappings() -> &'static [$crate::FkMapping] {
                const MAPPINGS: &[$crate::FkMapping] = &[
                    $( $( $crate::FkMapping::new(stringify!($fk), $target), )* )?
                    $( $( $crate::FkMapping::new_nullable(stringify!($nfk), $ntarget), )* )?
                ];
                MAPPINGS
            }

            fn field_names() -> &'static [&'static str] {
                const FIELDS: &[&str] =
                    &[$crate::ID_FIELD, $crate::UUID_FIELD, $( stringify!($field) ),*];
                FIELDS
            }

            fn local_only_fields() -> &'static [&'static str] {
                const LOCAL_ONLY: &[&str] = &[ $( $( stringify!($local), )* )? ];
                LOCAL_ONLY
            }

            fn global_id(&self) -> $crate::GlobalId {
                self.uuid
            }

            fn local_id(&self) -> ::std::option::Option<$crate::LocalId> {
                self.id
            }

            fn to_record(&self) -> $crate::LocalRecord {
                let mut record = $crate::Record::new();
                if let ::std::option::Option::Some(id) = self.id {
                    record.set($crate::ID_FIELD, id);
                }
                record.set($crate::UUID_FIELD, self.uuid);
                $( record.set(stringify!($field), ::std::clone::Clone::clone(&self.$field)); )*
                $crate::LocalRecord::new(record)
            }

            fn from_record(
                record: &$crate::LocalRecord,
            ) -> ::std::result::Result<Self, $crate::RecordError> {
                let record = record.as_record();
                ::std::result::Result::Ok(Self {
                    id: record.get_as($crate::ID_FIELD)?,
                    uuid: record.get_as($crate::UUID_FIELD)?,
                    $( $field: record.get_as(stringify!($field))?, )*
                })
            }
        }
    };
}
