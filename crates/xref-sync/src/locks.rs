//! Per-entity apply locks.
//!
//! Two records that mutate the same entity must not be applied at the same
//! time. Each global id gets its own async mutex on first use; entries are
//! dropped again once nobody holds or waits for them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;
use xref_core::GlobalId;

/// A table of per-entity async locks.
#[derive(Debug, Default)]
pub struct EntityLocks {
    locks: Mutex<HashMap<GlobalId, Arc<tokio::sync::Mutex<()>>>>,
}

impl EntityLocks {
    /// Create a new empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to an entity.
    ///
    /// Cancelling the returned future prunes the entry like dropping a guard.
    pub async fn lock(&self, id: GlobalId) -> EntityGuard<'_> {
        let mutex = Arc::clone(self.locks.lock().entry(id).or_default());

        let mut guard = EntityGuard {
            locks: self,
            id,
            guard: None,
        };
        // Declared after `guard`: on cancellation the pending wait and its
        // Arc are dropped first, then `guard` releases the entry.
        let acquire = mutex.lock_owned();
        guard.guard = Some(acquire.await);

        guard
    }

    /// Number of entities with a live lock entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    /// Check if no entity is locked or awaited.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }

    fn release(&self, id: &GlobalId) {
        let mut locks = self.locks.lock();
        // Only the table itself still references an idle entry
        if locks.get(id).is_some_and(|m| Arc::strong_count(m) == 1) {
            locks.remove(id);
        }
    }
}

/// Exclusive access to one entity, released on drop.
#[derive(Debug)]
pub struct EntityGuard<'a> {
    locks: &'a EntityLocks,
    id: GlobalId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl EntityGuard<'_> {
    /// The locked entity.
    #[must_use]
    pub const fn id(&self) -> &GlobalId {
        &self.id
    }
}

impl Drop for EntityGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.release(&self.id);
    }
}
