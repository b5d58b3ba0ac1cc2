//! Async storage seam used by the mappers.
//!
//! The mappers only ever issue the two translation lookups (and their
//! batched forms), so this is all they see of storage. Every [`Store`] is a
//! `StorageHandle`.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use xref_core::{GlobalId, LocalId};
use xref_store::{Result, Store};

/// Read-only access to the identifier translation table.
#[async_trait]
pub trait StorageHandle: Send + Sync {
    /// Resolve a local id of `table` to its global id.
    async fn lookup_global_by_local(&self, table: &str, local_id: LocalId)
        -> Result<Option<GlobalId>>;

    /// Resolve a global id to this device's local id in `table`.
    async fn lookup_local_by_global(
        &self,
        table: &str,
        global_id: &GlobalId,
    ) -> Result<Option<LocalId>>;

    /// Resolve many local ids of one table. Misses are omitted.
    async fn batch_lookup_global_by_local(
        &self,
        table: &str,
        local_ids: &HashSet<LocalId>,
    ) -> Result<HashMap<LocalId, GlobalId>>;

    /// Resolve many global ids of one table. Misses are omitted.
    async fn batch_lookup_local_by_global(
        &self,
        table: &str,
        global_ids: &HashSet<GlobalId>,
    ) -> Result<HashMap<GlobalId, LocalId>>;
}

#[async_trait]
impl<S: Store + ?Sized> StorageHandle for S {
    async fn lookup_global_by_local(
        &self,
        table: &str,
        local_id: LocalId,
    ) -> Result<Option<GlobalId>> {
        Store::lookup_global_by_local(self, table, local_id)
    }

    async fn lookup_local_by_global(
        &self,
        table: &str,
        global_id: &GlobalId,
    ) -> Result<Option<LocalId>> {
        Store::lookup_local_by_global(self, table, global_id)
    }

    async fn batch_lookup_global_by_local(
        &self,
        table: &str,
        local_ids: &HashSet<LocalId>,
    ) -> Result<HashMap<LocalId, GlobalId>> {
        Store::batch_lookup_global_by_local(self, table, local_ids)
    }

    async fn batch_lookup_local_by_global(
        &self,
        table: &str,
        global_ids: &HashSet<GlobalId>,
    ) -> Result<HashMap<GlobalId, LocalId>> {
        Store::batch_lookup_local_by_global(self, table, global_ids)
    }
}
