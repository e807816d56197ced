//! Full-state snapshots with an independent global version counter.
//!
//! The [`SnapshotManager`] only stores snapshots; the store is responsible
//! for handing it a consistent copy of the live values (it captures under
//! its write lock, so no half-applied write is ever visible).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use chronicle_types::{SnapshotId, SnapshotSummary, StateValue, WorldStateSnapshot};

/// Owns every snapshot taken of the store, keyed by global version.
#[derive(Debug, Clone)]
pub struct SnapshotManager {
    /// Snapshots by global version.
    snapshots: BTreeMap<u64, WorldStateSnapshot>,
    /// Version the next capture will receive.
    next_version: u64,
}

impl Default for SnapshotManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotManager {
    /// Create an empty manager. The first snapshot receives version 1.
    pub const fn new() -> Self {
        Self {
            snapshots: BTreeMap::new(),
            next_version: 1,
        }
    }

    /// Return the number of stored snapshots.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Return whether no snapshots are stored.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Store a new snapshot of `variables` under the next global version.
    pub fn capture(
        &mut self,
        variables: BTreeMap<String, StateValue>,
        metadata: BTreeMap<String, String>,
    ) -> WorldStateSnapshot {
        self.capture_with_versions(variables, BTreeMap::new(), metadata)
    }

    /// Like [`capture`](Self::capture), also recording the per-key versions
    /// the values were read at.
    pub fn capture_with_versions(
        &mut self,
        variables: BTreeMap<String, StateValue>,
        key_versions: BTreeMap<String, u64>,
        metadata: BTreeMap<String, String>,
    ) -> WorldStateSnapshot {
        let version = self.next_version;
        self.next_version = self.next_version.saturating_add(1);

        let snapshot = WorldStateSnapshot {
            id: SnapshotId::new(),
            version,
            timestamp: Utc::now(),
            variables,
            key_versions,
            metadata,
        };

        tracing::debug!(
            version,
            variable_count = snapshot.variables.len(),
            "Captured snapshot"
        );

        self.snapshots.insert(version, snapshot.clone());
        snapshot
    }

    /// Insert a snapshot loaded from persistence, keeping its version.
    ///
    /// Advances the version counter past it so later captures never reuse a
    /// loaded version. An existing snapshot with the same version is
    /// replaced.
    pub fn insert(&mut self, snapshot: WorldStateSnapshot) {
        let after = snapshot.version.saturating_add(1);
        if after > self.next_version {
            self.next_version = after;
        }
        self.snapshots.insert(snapshot.version, snapshot);
    }

    /// Look up a snapshot.
    ///
    /// - `version` given: that exact snapshot.
    /// - `timestamp` given: the latest snapshot taken at or before it.
    /// - neither: the latest snapshot.
    ///
    /// When both are given the version wins.
    pub fn load(
        &self,
        version: Option<u64>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Option<&WorldStateSnapshot> {
        match (version, timestamp) {
            (Some(v), _) => self.snapshots.get(&v),
            (None, Some(at)) => self.latest_at_or_before(at),
            (None, None) => self.snapshots.values().next_back(),
        }
    }

    /// The latest snapshot with `timestamp <= at`.
    pub fn latest_at_or_before(&self, at: DateTime<Utc>) -> Option<&WorldStateSnapshot> {
        self.snapshots
            .values()
            .rev()
            .find(|s| s.timestamp <= at)
    }

    /// Listing entries for every snapshot, ascending by version.
    pub fn list(&self) -> Vec<SnapshotSummary> {
        self.snapshots.values().map(WorldStateSnapshot::summary).collect()
    }

    /// Iterate over every snapshot, ascending by version.
    pub fn iter(&self) -> impl Iterator<Item = &WorldStateSnapshot> {
        self.snapshots.values()
    }

    /// Delete a snapshot. Returns `false` if the version did not exist.
    pub fn delete(&mut self, version: u64) -> bool {
        let removed = self.snapshots.remove(&version).is_some();
        if removed {
            tracing::debug!(version, "Deleted snapshot");
        }
        removed
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, i32)]) -> BTreeMap<String, StateValue> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), StateValue::from(*v)))
            .collect()
    }

    #[test]
    fn versions_start_at_one_and_increase() {
        let mut manager = SnapshotManager::new();
        let first = manager.capture(vars(&[("a", 1)]), BTreeMap::new());
        let second = manager.capture(vars(&[("a", 2)]), BTreeMap::new());
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn load_by_version_and_latest() {
        let mut manager = SnapshotManager::new();
        manager.capture(vars(&[("a", 1)]), BTreeMap::new());
        manager.capture(vars(&[("a", 2)]), BTreeMap::new());

        let first = manager.load(Some(1), None).unwrap();
        assert_eq!(first.variables, vars(&[("a", 1)]));

        let latest = manager.load(None, None).unwrap();
        assert_eq!(latest.version, 2);

        assert!(manager.load(Some(9), None).is_none());
    }

    #[test]
    fn load_by_timestamp_picks_at_or_before() {
        let mut manager = SnapshotManager::new();
        let first = manager.capture(vars(&[("a", 1)]), BTreeMap::new());
        let found = manager.load(None, Some(first.timestamp)).unwrap();
        assert_eq!(found.version, 1);

        let before = first.timestamp - chrono::Duration::seconds(1);
        assert!(manager.load(None, Some(before)).is_none());
    }

    #[test]
    fn delete_reports_existence() {
        let mut manager = SnapshotManager::new();
        manager.capture(BTreeMap::new(), BTreeMap::new());
        assert!(manager.delete(1));
        assert!(!manager.delete(1));
        assert!(manager.is_empty());
    }

    #[test]
    fn deleted_versions_are_not_reused() {
        let mut manager = SnapshotManager::new();
        manager.capture(BTreeMap::new(), BTreeMap::new());
        manager.delete(1);
        let next = manager.capture(BTreeMap::new(), BTreeMap::new());
        assert_eq!(next.version, 2);
    }

    #[test]
    fn inserted_snapshot_advances_counter() {
        let mut manager = SnapshotManager::new();
        let mut loaded = SnapshotManager::new().capture(BTreeMap::new(), BTreeMap::new());
        loaded.version = 7;
        manager.insert(loaded);
        let next = manager.capture(BTreeMap::new(), BTreeMap::new());
        assert_eq!(next.version, 8);
    }

    #[test]
    fn list_summarizes_each_snapshot() {
        let mut manager = SnapshotManager::new();
        let metadata: BTreeMap<String, String> =
            [("type".to_owned(), "manual".to_owned())].into_iter().collect();
        manager.capture(vars(&[("a", 1), ("b", 2)]), metadata.clone());
        let list = manager.list();
        assert_eq!(list.len(), 1);
        assert_eq!(list.first().map(|s| s.variable_count), Some(2));
        assert_eq!(list.first().map(|s| s.metadata.clone()), Some(metadata));
    }
}
