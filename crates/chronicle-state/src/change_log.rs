//! The change log: a per-key, append-only history of state mutations.
//!
//! Every write to the [`StateStore`](crate::StateStore) appends exactly one
//! [`StateChangeRecord`]. Records within a key are kept in ascending
//! version order, which makes both point-in-time lookups binary searches.
//!
//! # Design
//!
//! - **Append-only**: records are never modified or reordered. The only
//!   removal path is [`ChangeLog::prune_before`], which drops old records
//!   while always keeping each key's latest one.
//! - **Strictly increasing versions**: an append whose version does not
//!   exceed the key's last version is rejected.
//! - **Lookups**: `O(log n)` per key via [`slice::partition_point`].
//!   Timestamp lookups assume timestamps are non-decreasing within a key,
//!   which holds because appends happen under the store's write lock.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use chronicle_types::{ChangeType, StateChangeRecord, StateValue};

use crate::StateError;

/// The per-key history of every mutation in the store.
#[derive(Debug, Clone, Default)]
pub struct ChangeLog {
    /// Records grouped by key, ascending by version.
    entries: BTreeMap<String, Vec<StateChangeRecord>>,
    /// Total number of records across all keys.
    total: usize,
}

impl ChangeLog {
    /// Create a new empty change log.
    pub const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            total: 0,
        }
    }

    /// Rebuild a change log from previously persisted records.
    ///
    /// Records may arrive in any order; they are grouped by key and sorted
    /// by version. Duplicate versions for a key are dropped (first wins).
    pub fn from_records(records: impl IntoIterator<Item = StateChangeRecord>) -> Self {
        let mut entries: BTreeMap<String, Vec<StateChangeRecord>> = BTreeMap::new();
        for record in records {
            entries
                .entry(record.state_key.clone())
                .or_default()
                .push(record);
        }

        let mut total: usize = 0;
        for history in entries.values_mut() {
            history.sort_by_key(|r| r.version);
            history.dedup_by_key(|r| r.version);
            total = total.saturating_add(history.len());
        }

        Self { entries, total }
    }

    /// Return the total number of records.
    pub const fn len(&self) -> usize {
        self.total
    }

    /// Return whether the log has no records.
    pub const fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Return the number of keys with at least one record.
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    /// Append a record to its key's history.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::NonMonotonicVersion`] if the record's version
    /// does not exceed the last version recorded for the key.
    pub fn append(&mut self, record: StateChangeRecord) -> Result<&StateChangeRecord, StateError> {
        let history = self.entries.entry(record.state_key.clone()).or_default();

        if let Some(last) = history.last() {
            if record.version <= last.version {
                return Err(StateError::NonMonotonicVersion {
                    key: record.state_key,
                    last: last.version,
                    attempted: record.version,
                });
            }
        }

        history.push(record);
        self.total = self.total.saturating_add(1);

        history.last().ok_or(StateError::InternalError(
            "failed to retrieve change record after append",
        ))
    }

    /// Full history for a key, ascending by version. Empty if unknown.
    pub fn history(&self, key: &str) -> &[StateChangeRecord] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The most recent record for a key.
    pub fn latest(&self, key: &str) -> Option<&StateChangeRecord> {
        self.entries.get(key).and_then(|h| h.last())
    }

    /// The record in effect at `version`: the exact match, or the latest
    /// record below it.
    pub fn record_at_version(&self, key: &str, version: u64) -> Option<&StateChangeRecord> {
        let history = self.entries.get(key)?;
        let idx = history.partition_point(|r| r.version <= version);
        idx.checked_sub(1).and_then(|i| history.get(i))
    }

    /// The latest record with `timestamp <= at`.
    pub fn record_at_time(&self, key: &str, at: DateTime<Utc>) -> Option<&StateChangeRecord> {
        let history = self.entries.get(key)?;
        let idx = history.partition_point(|r| r.timestamp <= at);
        idx.checked_sub(1).and_then(|i| history.get(i))
    }

    /// Value of `key` as of `version`, or `None` if the key did not exist
    /// or was deleted at that version.
    pub fn value_at_version(&self, key: &str, version: u64) -> Option<&StateValue> {
        self.record_at_version(key, version).and_then(live_value)
    }

    /// Value of `key` as of `at`, or `None` if the key did not exist or was
    /// deleted at that time.
    pub fn value_at_time(&self, key: &str, at: DateTime<Utc>) -> Option<&StateValue> {
        self.record_at_time(key, at).and_then(live_value)
    }

    /// All keys that have at least one record.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Iterate over every record, key by key, ascending by version.
    pub fn iter(&self) -> impl Iterator<Item = &StateChangeRecord> {
        self.entries.values().flatten()
    }

    /// Records with `start <= timestamp <= end`, ordered by timestamp.
    pub fn records_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<&StateChangeRecord> {
        let mut records: Vec<&StateChangeRecord> = self
            .iter()
            .filter(|r| r.timestamp >= start && r.timestamp <= end)
            .collect();
        records.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });
        records
    }

    /// Every record ordered by timestamp, for persistence.
    pub fn to_records(&self) -> Vec<StateChangeRecord> {
        let mut records: Vec<StateChangeRecord> = self.iter().cloned().collect();
        records.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });
        records
    }

    /// Drop records older than `cutoff`, always keeping each key's latest
    /// record so current versions remain known.
    ///
    /// Returns the number of records removed.
    pub fn prune_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let mut removed: usize = 0;
        for history in self.entries.values_mut() {
            let keep_from = history
                .partition_point(|r| r.timestamp < cutoff)
                .min(history.len().saturating_sub(1));
            if keep_from > 0 {
                history.drain(..keep_from);
                removed = removed.saturating_add(keep_from);
            }
        }
        self.total = self.total.saturating_sub(removed);

        if removed > 0 {
            tracing::debug!(removed, %cutoff, "Pruned change log");
        }
        removed
    }
}

/// The value a record leaves behind, `None` for deletions.
fn live_value(record: &StateChangeRecord) -> Option<&StateValue> {
    match record.change_type {
        ChangeType::Deleted => None,
        ChangeType::Created | ChangeType::Updated | ChangeType::Calculated => {
            Some(&record.new_value)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use chrono::Duration;

    use chronicle_types::{ChangeId, StateCategory};

    use super::*;

    fn record(key: &str, version: u64, value: i32, at: DateTime<Utc>) -> StateChangeRecord {
        StateChangeRecord {
            id: ChangeId::new(),
            state_key: key.to_owned(),
            old_value: None,
            new_value: StateValue::from(value),
            change_type: if version == 1 {
                ChangeType::Created
            } else {
                ChangeType::Updated
            },
            category: StateCategory::Other,
            timestamp: at,
            version,
            reason: None,
            entity_id: None,
        }
    }

    fn populated() -> (ChangeLog, DateTime<Utc>) {
        let base = Utc::now();
        let mut log = ChangeLog::new();
        for v in 1..=5_u64 {
            let offset = i64::try_from(v).unwrap() * 10;
            let value = i32::try_from(v).unwrap() * 100;
            log.append(record("gold", v, value, base + Duration::seconds(offset)))
                .unwrap();
        }
        (log, base)
    }

    #[test]
    fn new_log_is_empty() {
        let log = ChangeLog::new();
        assert!(log.is_empty());
        assert_eq!(log.len(), 0);
        assert!(log.history("missing").is_empty());
    }

    #[test]
    fn append_keeps_version_order() {
        let (log, _) = populated();
        assert_eq!(log.len(), 5);
        let versions: Vec<u64> = log.history("gold").iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn append_rejects_stale_version() {
        let (mut log, base) = populated();
        let result = log.append(record("gold", 5, 0, base));
        assert!(matches!(
            result,
            Err(StateError::NonMonotonicVersion {
                last: 5,
                attempted: 5,
                ..
            })
        ));
        assert_eq!(log.len(), 5);
    }

    #[test]
    fn value_at_version_is_exact_or_latest_below() {
        let (log, _) = populated();
        assert_eq!(log.value_at_version("gold", 3), Some(&StateValue::from(300)));
        assert_eq!(log.value_at_version("gold", 99), Some(&StateValue::from(500)));
        assert_eq!(log.value_at_version("gold", 0), None);
        assert_eq!(log.value_at_version("silver", 1), None);
    }

    #[test]
    fn value_at_time_picks_latest_not_after() {
        let (log, base) = populated();
        // Records sit at +10s, +20s, ... +50s.
        assert_eq!(log.value_at_time("gold", base), None);
        assert_eq!(
            log.value_at_time("gold", base + Duration::seconds(25)),
            Some(&StateValue::from(200))
        );
        assert_eq!(
            log.value_at_time("gold", base + Duration::seconds(30)),
            Some(&StateValue::from(300))
        );
    }

    #[test]
    fn deleted_record_resolves_to_none() {
        let (mut log, base) = populated();
        let mut deletion = record("gold", 6, 0, base + Duration::seconds(60));
        deletion.change_type = ChangeType::Deleted;
        deletion.new_value = StateValue::Null;
        log.append(deletion).unwrap();

        assert_eq!(log.value_at_version("gold", 6), None);
        assert_eq!(log.value_at_version("gold", 5), Some(&StateValue::from(500)));
    }

    #[test]
    fn prune_keeps_latest_record() {
        let (mut log, base) = populated();
        let removed = log.prune_before(base + Duration::seconds(1000));
        assert_eq!(removed, 4);
        assert_eq!(log.len(), 1);
        assert_eq!(log.history("gold")[0].version, 5);
    }

    #[test]
    fn prune_removes_only_older_records() {
        let (mut log, base) = populated();
        let removed = log.prune_before(base + Duration::seconds(30));
        assert_eq!(removed, 2);
        assert_eq!(log.history("gold")[0].version, 3);
    }

    #[test]
    fn from_records_sorts_and_counts() {
        let (log, _) = populated();
        let mut records = log.to_records();
        records.reverse();
        let rebuilt = ChangeLog::from_records(records);
        assert_eq!(rebuilt.len(), 5);
        assert_eq!(rebuilt.history("gold")[0].version, 1);
        assert_eq!(rebuilt.key_count(), 1);
    }

    #[test]
    fn records_between_is_inclusive() {
        let (log, base) = populated();
        let window = log.records_between(
            base + Duration::seconds(20),
            base + Duration::seconds(40),
        );
        let versions: Vec<u64> = window.iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![2, 3, 4]);
    }
}
