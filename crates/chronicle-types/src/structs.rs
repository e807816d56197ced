//! Core record structs: variables, change records, and snapshots.
//!
//! These are the shapes both the in-memory store and the JSON repository
//! work with. Timestamps are UTC and serialize as RFC 3339.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{ChangeType, StateCategory, WorldRegion};
use crate::ids::{ChangeId, SnapshotId};
use crate::value::StateValue;

// ---------------------------------------------------------------------------
// State variable
// ---------------------------------------------------------------------------

/// A versioned fact tracked by the state store.
///
/// `version` starts at 1 and increases by exactly 1 on every mutation of
/// the key, deletions included. A deleted variable is kept with
/// `active == false` so its version sequence continues if it is recreated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct StateVariable {
    /// Dotted key, e.g. `"kingdom.north.ruler"`.
    pub key: String,
    /// Current value.
    pub value: StateValue,
    /// Subject area.
    pub category: StateCategory,
    /// Part of the world the fact applies to.
    pub region: WorldRegion,
    /// Free-form labels used by tag queries.
    pub tags: BTreeSet<String>,
    /// When the key was first created.
    pub created_at: DateTime<Utc>,
    /// When the key was last mutated.
    pub updated_at: DateTime<Utc>,
    /// Per-key version, incremented on every mutation.
    pub version: u64,
    /// `false` once the key has been soft-deleted.
    #[serde(default = "default_active")]
    pub active: bool,
}

const fn default_active() -> bool {
    true
}

impl StateVariable {
    /// Whether the variable carries every tag in `tags`.
    pub fn has_all_tags<'a>(&self, mut tags: impl Iterator<Item = &'a String>) -> bool {
        tags.all(|t| self.tags.contains(t))
    }

    /// Whether the variable carries at least one tag in `tags`.
    pub fn has_any_tag<'a>(&self, mut tags: impl Iterator<Item = &'a String>) -> bool {
        tags.any(|t| self.tags.contains(t))
    }
}

// ---------------------------------------------------------------------------
// Change record
// ---------------------------------------------------------------------------

/// One immutable entry in a key's append-only history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct StateChangeRecord {
    /// Unique record identifier.
    pub id: ChangeId,
    /// The key that changed.
    pub state_key: String,
    /// Value before the change, absent for creations.
    pub old_value: Option<StateValue>,
    /// Value after the change ([`StateValue::Null`] for deletions).
    pub new_value: StateValue,
    /// What kind of change this was.
    pub change_type: ChangeType,
    /// Category of the variable at the time of the change.
    #[serde(default)]
    pub category: StateCategory,
    /// When the change was applied.
    pub timestamp: DateTime<Utc>,
    /// The key's version after this change.
    pub version: u64,
    /// Why the change was made.
    pub reason: Option<String>,
    /// The entity responsible for the change, if any.
    pub entity_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// A full point-in-time capture of every live value.
///
/// Snapshot versions come from a global counter that is independent of the
/// per-key versions. Snapshots are never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct WorldStateSnapshot {
    /// Unique snapshot identifier.
    pub id: SnapshotId,
    /// Global snapshot version.
    pub version: u64,
    /// Capture time.
    pub timestamp: DateTime<Utc>,
    /// Every live key and its value at capture time.
    pub variables: BTreeMap<String, StateValue>,
    /// Latest logged version of every key at capture time, deleted keys
    /// included. Records with a higher version were written afterwards.
    #[serde(default)]
    pub key_versions: BTreeMap<String, u64>,
    /// Free-form annotations (`type`, `triggered_by`, ...).
    pub metadata: BTreeMap<String, String>,
}

impl WorldStateSnapshot {
    /// Summarize the snapshot without cloning its variables.
    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary {
            version: self.version,
            timestamp: self.timestamp,
            metadata: self.metadata.clone(),
            variable_count: self.variables.len(),
        }
    }
}

/// Lightweight listing entry for a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SnapshotSummary {
    /// Global snapshot version.
    pub version: u64,
    /// Capture time.
    pub timestamp: DateTime<Utc>,
    /// Free-form annotations.
    pub metadata: BTreeMap<String, String>,
    /// Number of variables captured.
    pub variable_count: usize,
}
