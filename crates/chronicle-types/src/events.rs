//! Domain events pushed by the state store to its subscribers.
//!
//! The store publishes every mutation as a [`StateEvent`] on a broadcast
//! channel. Consumers subscribe rather than registering callbacks, so a slow
//! or failing consumer can never block or break a write.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{ChangeType, StateCategory, WorldRegion};
use crate::value::StateValue;

/// A change observed in the state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "event", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum StateEvent {
    /// A key was created, updated, or recalculated.
    StateChanged {
        /// The key that changed.
        key: String,
        /// The key's version after the change.
        version: u64,
        /// Created, Updated, or Calculated.
        change_type: ChangeType,
        /// Previous value, absent for creations.
        old_value: Option<StateValue>,
        /// New value.
        new_value: StateValue,
        /// Category of the variable.
        category: StateCategory,
        /// Region of the variable.
        region: WorldRegion,
    },
    /// A key was soft-deleted.
    StateDeleted {
        /// The deleted key.
        key: String,
        /// The key's version after the deletion.
        version: u64,
    },
    /// A snapshot was captured.
    SnapshotCreated {
        /// Global snapshot version.
        version: u64,
        /// Number of variables captured.
        variable_count: usize,
        /// Whether the snapshot was triggered automatically by a write.
        automatic: bool,
    },
    /// A snapshot was deleted.
    SnapshotDeleted {
        /// Global snapshot version.
        version: u64,
    },
    /// The live state was rolled back to a snapshot.
    SnapshotRestored {
        /// Global snapshot version restored from.
        version: u64,
        /// Number of keys whose value changed.
        keys_changed: usize,
    },
    /// A derived rule was re-evaluated during a cascade.
    DerivedRecalculated {
        /// The derived key.
        key: String,
        /// The computed value, absent if the calculator failed.
        value: Option<StateValue>,
    },
}

impl StateEvent {
    /// The state key this event concerns, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::StateChanged { key, .. }
            | Self::StateDeleted { key, .. }
            | Self::DerivedRecalculated { key, .. } => Some(key),
            Self::SnapshotCreated { .. }
            | Self::SnapshotDeleted { .. }
            | Self::SnapshotRestored { .. } => None,
        }
    }
}
