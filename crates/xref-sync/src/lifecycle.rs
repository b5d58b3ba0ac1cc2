//! Per-record apply state machine.
//!
//! # State Machine
//!
//! ```text
//!               ┌──────────┐  (missing dependency)  ┌──────────┐
//!         ┌────▶│ Received │───────────────────────▶│ Deferred │
//!         │     └────┬─────┘                        └────┬─────┘
//!         │          │ (references resolved)             │
//!         │          ▼                                   │
//!         │     ┌──────────┐                             │
//!         │     │  Mapped  │                             │
//!         │     └────┬─────┘                             │
//!         │          │ (stored)                          │
//!         │          ▼                                   │
//!         │     ┌──────────┐                             │
//!         │     │ Applied  │◄── Received (no references, │
//!         │     └──────────┘    delete, discard)         │
//!         │                                              │
//!         └──────────────────────────────────────────────┘
//!                        (dependency applied)
//!
//!   Received | Mapped ──▶ Failed
//! ```

use serde::{Deserialize, Serialize};
use xref_core::GlobalId;

use crate::error::{Result, SyncError};

/// Processing state of one incoming record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    /// Delivered, not yet mapped.
    Received,
    /// All references resolved to local ids.
    Mapped,
    /// Stored locally.
    Applied,
    /// Waiting in the deferred queue for a dependency.
    Deferred,
    /// Rejected.
    Failed,
}

/// Validates a state transition and returns the target state if valid.
///
/// # Errors
///
/// Returns `SyncError::InvalidTransition` if the transition is not allowed.
pub fn validate_transition(
    record_id: &GlobalId,
    from: RecordState,
    to: RecordState,
) -> Result<RecordState> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(SyncError::InvalidTransition {
            record_id: *record_id,
            from,
            to,
        })
    }
}

/// Check if a state transition is valid according to the state machine.
#[must_use]
pub const fn is_valid_transition(from: RecordState, to: RecordState) -> bool {
    use RecordState::{Applied, Deferred, Failed, Mapped, Received};

    matches!(
        (from, to),
        (Received, Mapped | Applied | Deferred | Failed)
            | (Mapped, Applied | Failed)
            // A released record is delivered again
            | (Deferred, Received)
    )
}

/// Returns true if the record will not be processed again.
#[must_use]
pub const fn is_terminal(state: RecordState) -> bool {
    matches!(state, RecordState::Applied | RecordState::Failed)
}

/// Tracks the state of one record through the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct RecordTracker {
    record_id: GlobalId,
    state: RecordState,
}

impl RecordTracker {
    /// Start tracking a freshly delivered record.
    #[must_use]
    pub const fn received(record_id: GlobalId) -> Self {
        Self {
            record_id,
            state: RecordState::Received,
        }
    }

    /// Start tracking a record taken out of the deferred queue.
    #[must_use]
    pub const fn deferred(record_id: GlobalId) -> Self {
        Self {
            record_id,
            state: RecordState::Deferred,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> RecordState {
        self.state
    }

    /// Move to `to`.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidTransition` if the move is not allowed.
    pub fn advance(&mut self, to: RecordState) -> Result<()> {
        self.state = validate_transition(&self.record_id, self.state, to)?;
        tracing::trace!(record_id = %self.record_id, state = ?to, "Record state changed");
        Ok(())
    }
}
