//! The pluggable persistence boundary.
//!
//! A [`StateRepository`] stores the three parts of a store independently:
//! current variables, the change history, and snapshots. Keeping snapshots
//! apart from the live state means a corrupted state file can be rebuilt
//! from the newest snapshot plus the history recorded after it.
//!
//! Failures never cross this boundary as errors. Saves report `false` and
//! loads fall back to empty data, logging what went wrong.

use std::collections::BTreeMap;
use std::future::Future;

use chrono::{DateTime, Utc};

use chronicle_types::{StateChangeRecord, StateVariable, WorldStateSnapshot};

/// Storage backend for a state store.
pub trait StateRepository: Send + Sync {
    /// Persist every variable, replacing what was stored before.
    fn save_state(
        &self,
        variables: &BTreeMap<String, StateVariable>,
    ) -> impl Future<Output = bool> + Send;

    /// Load the stored variables, empty if none or unreadable.
    fn load_state(&self) -> impl Future<Output = BTreeMap<String, StateVariable>> + Send;

    /// Persist the full change history, replacing what was stored before.
    fn save_history(&self, history: &[StateChangeRecord]) -> impl Future<Output = bool> + Send;

    /// Load the stored change history, empty if none or unreadable.
    fn load_history(&self) -> impl Future<Output = Vec<StateChangeRecord>> + Send;

    /// Persist one snapshot.
    fn save_snapshot(&self, snapshot: &WorldStateSnapshot) -> impl Future<Output = bool> + Send;

    /// Load every readable snapshot, ascending by version.
    fn load_snapshots(&self) -> impl Future<Output = Vec<WorldStateSnapshot>> + Send;

    /// Versions of every stored snapshot, ascending and without duplicates.
    fn stored_snapshot_versions(&self) -> impl Future<Output = Vec<u64>> + Send;

    /// Delete a stored snapshot. Returns `false` if it was not stored.
    fn delete_snapshot(&self, version: u64) -> impl Future<Output = bool> + Send;

    /// Drop stored change records older than `cutoff`, keeping each key's
    /// latest record. Returns the number removed.
    fn delete_changes_before(&self, cutoff: DateTime<Utc>) -> impl Future<Output = usize> + Send;
}
