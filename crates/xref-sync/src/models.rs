//! Built-in syncable models.
//!
//! The dependency graph between them is:
//!
//! ```text
//! volumes   ──► devices
//! locations ──► devices, volumes
//! files     ──► locations, files (parent)
//! file_tags ──► files, tags
//! ```

use xref_core::LocalId;

crate::sync_model! {
    /// A paired device.
    pub struct Device in "devices" {
        /// Display name.
        pub name: String,
        /// Operating system, if known.
        pub os: Option<String>,
        /// Hardware model, if known.
        pub hardware_model: Option<String>,
    }
}

crate::sync_model! {
    /// A storage volume attached to a device.
    pub struct Volume in "volumes" {
        /// Device the volume is attached to.
        pub device_id: LocalId,
        /// Stable fingerprint of the volume.
        pub fingerprint: String,
        /// Display name.
        pub display_name: Option<String>,
        /// Capacity in bytes.
        pub total_capacity: Option<u64>,
        /// Whether the volume is removable media.
        pub is_removable: Option<bool>,
    }
    foreign_keys {
        device_id => "devices",
    }
}

crate::sync_model! {
    /// An indexed location on a device.
    pub struct Location in "locations" {
        /// Device owning the location.
        pub device_id: LocalId,
        /// Volume the location lives on, if tracked.
        pub volume_id: Option<LocalId>,
        /// Display name.
        pub name: Option<String>,
        /// Root path on the owning device.
        pub path: String,
        /// Number of indexed files.
        pub total_file_count: u64,
        /// Total size of indexed files in bytes.
        pub total_byte_size: u64,
    }
    foreign_keys {
        device_id => "devices",
        volume_id => "volumes",
    }
}

crate::sync_model! {
    /// A file or directory inside a location.
    pub struct File in "files" {
        /// Location containing the entry.
        pub location_id: LocalId,
        /// Parent directory, `None` at the location root.
        pub parent_id: Option<LocalId>,
        /// File name without extension.
        pub name: String,
        /// Extension, if any.
        pub extension: Option<String>,
        /// Size in bytes.
        pub size: u64,
        /// Whether the entry is a directory.
        pub is_dir: bool,
        /// Slot in this device's thumbnail cache.
        pub thumbnail_cache_id: Option<i64>,
    }
    foreign_keys {
        location_id => "locations",
        parent_id => "files",
    }
    local_only {
        thumbnail_cache_id,
    }
}

crate::sync_model! {
    /// A user-defined tag.
    pub struct Tag in "tags" {
        /// Tag name.
        pub name: String,
        /// Display color.
        pub color: Option<String>,
    }
}

crate::sync_model! {
    /// Assignment of a tag to a file.
    pub struct FileTag in "file_tags" {
        /// Tagged file.
        pub file_id: LocalId,
        /// Applied tag.
        pub tag_id: LocalId,
    }
    foreign_keys {
        file_id => "files",
        tag_id => "tags",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SyncModel;

    #[test]
    fn location_declares_both_references() {
        let tables: Vec<_> = Location::foreign_key_mappings()
            .iter()
            .map(|m| (m.local_field, m.target_table))
            .collect();
        assert_eq!(
            tables,
            vec![("device_id", "devices"), ("volume_id", "volumes")]
        );
    }

    #[test]
    fn file_parent_is_self_reference() {
        let parent = File::foreign_key_mappings()
            .iter()
            .find(|m| m.local_field == "parent_id")
            .unwrap();
        assert!(parent.is_self_reference(File::TABLE));
        assert_eq!(File::local_only_fields(), &["thumbnail_cache_id"]);
    }

    #[test]
    fn models_without_references() {
        assert!(Device::foreign_key_mappings().is_empty());
        assert!(Tag::foreign_key_mappings().is_empty());
    }
}
