//! The versioned world-state store.
//!
//! [`StateStore`] owns the live variables, the [`ChangeLog`], the
//! [`SnapshotManager`] and the [`DerivedStateEngine`] behind a single
//! `parking_lot::RwLock`. Every mutating method takes the write lock once
//! and finishes all of its side effects (change record, derived cascade,
//! automatic snapshot, events) before releasing it.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use chronicle_types::{
    ChangeId, ChangeType, SnapshotSummary, StateCategory, StateChangeRecord, StateEvent,
    StateValue, StateVariable, WorldRegion, WorldStateSnapshot,
};

use crate::change_log::ChangeLog;
use crate::derived::{DERIVED_TAG, DerivedStateEngine, DerivedStateRule, RuleInfo};
use crate::events::{BROADCAST_CAPACITY, EventBus};
use crate::query::{QueryEngine, StateQuery};
use crate::snapshot::SnapshotManager;
use crate::StateError;

/// Snapshot metadata `type` value for snapshots taken automatically.
pub const AUTO_SNAPSHOT_TYPE: &str = "auto_snapshot";

/// Numeric change larger than this counts as significant.
pub const SIGNIFICANT_DELTA: f64 = 100.0;

// ---------------------------------------------------------------------------
// Parameters and options
// ---------------------------------------------------------------------------

/// Parameters for [`StateStore::set_state`].
#[derive(Debug, Clone, PartialEq)]
pub struct SetStateParams {
    /// The key to write.
    pub key: String,
    /// The new value.
    pub value: StateValue,
    /// Subject area.
    pub category: StateCategory,
    /// Part of the world.
    pub region: WorldRegion,
    /// Tags; replaces the variable's previous tag set.
    pub tags: BTreeSet<String>,
    /// The entity responsible for the write.
    pub entity_id: Option<String>,
    /// Why the write happened.
    pub reason: Option<String>,
}

impl SetStateParams {
    /// A write of `value` to `key` in category `Other`, region `Global`.
    pub fn new(key: impl Into<String>, value: impl Into<StateValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            category: StateCategory::Other,
            region: WorldRegion::Global,
            tags: BTreeSet::new(),
            entity_id: None,
            reason: None,
        }
    }

    /// Set the category.
    #[must_use]
    pub const fn with_category(mut self, category: StateCategory) -> Self {
        self.category = category;
        self
    }

    /// Set the category from a name; unknown names become `Other`.
    #[must_use]
    pub fn with_category_name(mut self, name: &str) -> Self {
        self.category = StateCategory::from_str_lossy(name);
        self
    }

    /// Set the region.
    #[must_use]
    pub const fn with_region(mut self, region: WorldRegion) -> Self {
        self.region = region;
        self
    }

    /// Set the region from a name; unknown names become `Global`.
    #[must_use]
    pub fn with_region_name(mut self, name: &str) -> Self {
        self.region = WorldRegion::from_str_lossy(name);
        self
    }

    /// Set the tags.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Attribute the write to an entity.
    #[must_use]
    pub fn with_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Record why the write happened.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Parameters that keep `existing`'s category, region and tags.
    fn keeping(existing: &StateVariable, value: StateValue) -> Self {
        Self {
            key: existing.key.clone(),
            value,
            category: existing.category,
            region: existing.region,
            tags: existing.tags.clone(),
            entity_id: None,
            reason: None,
        }
    }
}

/// Behavioural switches for a [`StateStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Snapshot automatically after writes to important categories.
    pub auto_snapshot: bool,
    /// Per-subscriber buffer of the event channel.
    pub event_capacity: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            auto_snapshot: true,
            event_capacity: BROADCAST_CAPACITY,
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Counters describing the store's contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStatistics {
    /// Live variables.
    pub state_count: usize,
    /// Soft-deleted variables.
    pub deleted_count: usize,
    /// Change records across all keys.
    pub history_size: usize,
    /// Stored snapshots.
    pub snapshot_count: usize,
    /// Registered derived rules.
    pub derived_rule_count: usize,
    /// Live variables per category.
    pub category_counts: BTreeMap<StateCategory, usize>,
    /// Live variables per region.
    pub region_counts: BTreeMap<WorldRegion, usize>,
    /// Live variables per tag.
    pub tag_counts: BTreeMap<String, usize>,
}

/// What changed between two instants.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodSummary {
    /// Window start, inclusive.
    pub start: DateTime<Utc>,
    /// Window end, inclusive.
    pub end: DateTime<Utc>,
    /// Change records in the window.
    pub change_count: usize,
    /// Distinct keys changed in the window.
    pub keys_changed: usize,
    /// Change records per category.
    pub category_counts: BTreeMap<StateCategory, usize>,
    /// Records that pass [`StateStore::is_significant_change`], by time.
    pub significant_changes: Vec<StateChangeRecord>,
}

/// Everything a store persists: live variables, history and snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreContents {
    /// Every variable, deleted ones included.
    pub variables: BTreeMap<String, StateVariable>,
    /// Every change record, ordered by timestamp.
    pub history: Vec<StateChangeRecord>,
    /// Every snapshot, ascending by version.
    pub snapshots: Vec<WorldStateSnapshot>,
}

// ---------------------------------------------------------------------------
// Inner state
// ---------------------------------------------------------------------------

/// Everything guarded by the store lock.
#[derive(Debug, Default)]
struct StoreInner {
    /// Every variable ever written, deleted ones kept with `active == false`.
    variables: BTreeMap<String, StateVariable>,
    /// Per-key history.
    log: ChangeLog,
    /// Snapshots.
    snapshots: SnapshotManager,
    /// Derived rules.
    derived: DerivedStateEngine,
}

impl StoreInner {
    /// The live value of `key`.
    fn live_value(&self, key: &str) -> Option<StateValue> {
        self.variables
            .get(key)
            .filter(|v| v.active)
            .map(|v| v.value.clone())
    }

    /// Every live `(key, value)` pair.
    fn live_values(&self) -> BTreeMap<String, StateValue> {
        self.variables
            .iter()
            .filter(|(_, v)| v.active)
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect()
    }

    /// Apply one write to the variable map and the log.
    ///
    /// `calculated` marks writes produced by a derived rule.
    fn write(
        &mut self,
        params: SetStateParams,
        calculated: bool,
    ) -> Result<(StateVariable, StateChangeRecord), StateError> {
        let now = Utc::now();
        let SetStateParams {
            key,
            value,
            category,
            region,
            tags,
            entity_id,
            reason,
        } = params;

        let last_logged = self.log.latest(&key).map_or(0, |r| r.version);
        let (old_value, version, change_type) = match self.variables.get_mut(&key) {
            Some(existing) => {
                let version = existing.version.max(last_logged).saturating_add(1);
                let (old, kind) = if existing.active {
                    (Some(existing.value.clone()), ChangeType::Updated)
                } else {
                    existing.created_at = now;
                    existing.active = true;
                    (None, ChangeType::Created)
                };
                existing.value = value.clone();
                existing.category = category;
                existing.region = region;
                existing.tags = tags;
                existing.updated_at = now;
                existing.version = version;
                (old, version, kind)
            }
            None => {
                let version = last_logged.saturating_add(1);
                self.variables.insert(
                    key.clone(),
                    StateVariable {
                        key: key.clone(),
                        value: value.clone(),
                        category,
                        region,
                        tags,
                        created_at: now,
                        updated_at: now,
                        version,
                        active: true,
                    },
                );
                (None, version, ChangeType::Created)
            }
        };

        let record = StateChangeRecord {
            id: ChangeId::new(),
            state_key: key.clone(),
            old_value,
            new_value: value,
            change_type: if calculated {
                ChangeType::Calculated
            } else {
                change_type
            },
            category,
            timestamp: now,
            version,
            reason,
            entity_id,
        };
        let record = self.log.append(record)?.clone();

        let variable = self
            .variables
            .get(&key)
            .cloned()
            .ok_or(StateError::InternalError("variable vanished during write"))?;
        Ok((variable, record))
    }

    /// Soft-delete `key`. Returns the deletion record, or `None` if the key
    /// was not live.
    fn remove(
        &mut self,
        key: &str,
        entity_id: Option<String>,
        reason: Option<String>,
    ) -> Result<Option<StateChangeRecord>, StateError> {
        let now = Utc::now();
        let last_logged = self.log.latest(key).map_or(0, |r| r.version);
        let Some(existing) = self.variables.get_mut(key).filter(|v| v.active) else {
            return Ok(None);
        };

        let version = existing.version.max(last_logged).saturating_add(1);
        let old_value = core::mem::take(&mut existing.value);
        existing.active = false;
        existing.updated_at = now;
        existing.version = version;

        let record = StateChangeRecord {
            id: ChangeId::new(),
            state_key: key.to_owned(),
            old_value: Some(old_value),
            new_value: StateValue::Null,
            change_type: ChangeType::Deleted,
            category: existing.category,
            timestamp: now,
            version,
            reason,
            entity_id,
        };
        Ok(Some(self.log.append(record)?.clone()))
    }

    /// Recompute `order` (already topologically sorted), writing each
    /// changed result back with `ChangeType::Calculated`.
    ///
    /// With `only_when_ready`, a rule none of whose dependencies are live
    /// is skipped instead of being materialized.
    fn recalculate(
        &mut self,
        order: &[String],
        trigger: &str,
        only_when_ready: bool,
        events: &EventBus,
    ) -> Result<(), StateError> {
        // Failed rules read as absent for the rest of this cascade.
        let mut failed: BTreeSet<String> = BTreeSet::new();

        for derived_key in order {
            let Some(rule) = self.derived.rule(derived_key) else {
                continue;
            };
            let (category, region, mut tags) = (rule.category, rule.region, rule.tags.clone());

            if only_when_ready
                && !rule
                    .dependencies
                    .iter()
                    .any(|d| !failed.contains(d) && self.live_value(d).is_some())
            {
                continue;
            }

            let computed = {
                let lookup = |k: &str| {
                    if failed.contains(k) {
                        None
                    } else {
                        self.live_value(k)
                    }
                };
                self.derived.compute_shallow(derived_key, &lookup)
            };

            let Some(value) = computed else {
                failed.insert(derived_key.clone());
                self.derived.invalidate(derived_key);
                events.publish(StateEvent::DerivedRecalculated {
                    key: derived_key.clone(),
                    value: None,
                });
                continue;
            };

            self.derived.store_cached(derived_key, value.clone());
            if self.live_value(derived_key).as_ref() != Some(&value) {
                tags.insert(DERIVED_TAG.to_owned());
                let params = SetStateParams {
                    key: derived_key.clone(),
                    value: value.clone(),
                    category,
                    region,
                    tags,
                    entity_id: None,
                    reason: Some(format!("recalculated after change to {trigger}")),
                };
                let (variable, record) = self.write(params, true)?;
                events.publish(changed_event(&variable, &record));
            }
            events.publish(StateEvent::DerivedRecalculated {
                key: derived_key.clone(),
                value: Some(value),
            });
        }
        Ok(())
    }

    /// Take a snapshot of every live value.
    fn capture(&mut self, metadata: BTreeMap<String, String>) -> WorldStateSnapshot {
        let values = self.live_values();
        let versions = self
            .log
            .keys()
            .filter_map(|key| self.log.latest(key).map(|r| (key.clone(), r.version)))
            .collect();
        self.snapshots.capture_with_versions(values, versions, metadata)
    }
}

/// Whether `record` was written after `snapshot` was captured.
///
/// Snapshots without per-key versions fall back to comparing timestamps.
fn written_after(snapshot: &WorldStateSnapshot, record: &StateChangeRecord) -> bool {
    if snapshot.key_versions.is_empty() && !snapshot.variables.is_empty() {
        return record.timestamp > snapshot.timestamp;
    }
    let seen = snapshot
        .key_versions
        .get(&record.state_key)
        .copied()
        .unwrap_or(0);
    record.version > seen
}

/// The event published for a create, update or recalculation.
fn changed_event(variable: &StateVariable, record: &StateChangeRecord) -> StateEvent {
    StateEvent::StateChanged {
        key: variable.key.clone(),
        version: variable.version,
        change_type: record.change_type,
        old_value: record.old_value.clone(),
        new_value: record.new_value.clone(),
        category: variable.category,
        region: variable.region,
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Versioned key/value store of world facts.
///
/// Share it between collaborators by reference or inside an `Arc`; every
/// method takes `&self`.
#[derive(Debug)]
pub struct StateStore {
    /// Variables, history, snapshots and rules.
    inner: RwLock<StoreInner>,
    /// Change notifications.
    events: EventBus,
    /// Behavioural switches.
    options: StoreOptions,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    /// Create an empty store with default options.
    pub fn new() -> Self {
        Self::with_options(StoreOptions::default())
    }

    /// Create an empty store.
    pub fn with_options(options: StoreOptions) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            events: EventBus::new(options.event_capacity),
            options,
        }
    }

    /// The options the store was created with.
    pub const fn options(&self) -> StoreOptions {
        self.options
    }

    /// Subscribe to every event the store publishes from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.events.subscribe()
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Create or update a variable.
    ///
    /// A new key (or a previously deleted one) gets a `Created` record; a
    /// live key gets an `Updated` record. Dependent derived values are then
    /// recomputed, and a write to an important category takes an automatic
    /// snapshot when enabled.
    ///
    /// # Errors
    ///
    /// Returns an error only if the change log rejects the record, which
    /// indicates a broken internal invariant.
    pub fn set_state(&self, params: SetStateParams) -> Result<StateVariable, StateError> {
        let mut inner = self.inner.write();
        let (variable, record) = inner.write(params, false)?;
        self.events.publish(changed_event(&variable, &record));

        tracing::debug!(
            key = %variable.key,
            version = variable.version,
            change_type = ?record.change_type,
            "State variable written"
        );

        let order = inner.derived.cascade_order(&variable.key);
        if !order.is_empty() {
            inner.recalculate(&order, &variable.key, false, &self.events)?;
        }

        if self.options.auto_snapshot && variable.category.is_important() {
            let metadata = BTreeMap::from([
                ("type".to_owned(), AUTO_SNAPSHOT_TYPE.to_owned()),
                ("triggered_by".to_owned(), variable.key.clone()),
                (
                    "change_category".to_owned(),
                    variable.category.as_str().to_owned(),
                ),
            ]);
            let snapshot = inner.capture(metadata);
            self.events.publish(StateEvent::SnapshotCreated {
                version: snapshot.version,
                variable_count: snapshot.variables.len(),
                automatic: true,
            });
        }

        Ok(variable)
    }

    /// Soft-delete a variable. Its history is kept and a later write
    /// recreates it with the next version.
    ///
    /// Returns `false` if the key is not live.
    ///
    /// # Errors
    ///
    /// Returns an error only if the change log rejects the record.
    pub fn delete_state(&self, key: &str, entity_id: Option<&str>) -> Result<bool, StateError> {
        let mut inner = self.inner.write();
        let Some(record) = inner.remove(key, entity_id.map(str::to_owned), None)? else {
            return Ok(false);
        };
        self.events.publish(StateEvent::StateDeleted {
            key: key.to_owned(),
            version: record.version,
        });
        tracing::debug!(key, version = record.version, "State variable deleted");

        let order = inner.derived.cascade_order(key);
        if !order.is_empty() {
            inner.recalculate(&order, key, false, &self.events)?;
        }
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// The current value of `key`.
    pub fn get_state(&self, key: &str) -> Option<StateValue> {
        self.inner.read().live_value(key)
    }

    /// The current value of `key`, or `default` if it is not live.
    pub fn get_state_or(&self, key: &str, default: StateValue) -> StateValue {
        self.get_state(key).unwrap_or(default)
    }

    /// The live variable for `key`, with its metadata.
    pub fn get_state_variable(&self, key: &str) -> Option<StateVariable> {
        self.inner
            .read()
            .variables
            .get(key)
            .filter(|v| v.active)
            .cloned()
    }

    /// Every live variable.
    pub fn get_all_state_variables(&self) -> BTreeMap<String, StateVariable> {
        self.inner
            .read()
            .variables
            .iter()
            .filter(|(_, v)| v.active)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Number of live variables.
    pub fn state_count(&self) -> usize {
        self.inner
            .read()
            .variables
            .values()
            .filter(|v| v.active)
            .count()
    }

    // -----------------------------------------------------------------------
    // History
    // -----------------------------------------------------------------------

    /// Every change record for `key`, ascending by version.
    pub fn get_history(&self, key: &str) -> Vec<StateChangeRecord> {
        self.inner.read().log.history(key).to_vec()
    }

    /// The value `key` held at `at`: the latest record with
    /// `timestamp <= at`. `None` if the key did not exist or was deleted.
    pub fn get_value_at_time(&self, key: &str, at: DateTime<Utc>) -> Option<StateValue> {
        self.inner.read().log.value_at_time(key, at).cloned()
    }

    /// [`get_value_at_time`](Self::get_value_at_time) with a fallback.
    pub fn get_value_at_time_or(&self, key: &str, at: DateTime<Utc>, default: StateValue) -> StateValue {
        self.get_value_at_time(key, at).unwrap_or(default)
    }

    /// The value `key` held at `version`, or at the latest version below it.
    pub fn get_value_at_version(&self, key: &str, version: u64) -> Option<StateValue> {
        self.inner.read().log.value_at_version(key, version).cloned()
    }

    /// [`get_value_at_version`](Self::get_value_at_version) with a fallback.
    pub fn get_value_at_version_or(&self, key: &str, version: u64, default: StateValue) -> StateValue {
        self.get_value_at_version(key, version).unwrap_or(default)
    }

    /// Set `key` back to the value it held at `version`.
    ///
    /// Returns `false` if that version has no live value.
    ///
    /// # Errors
    ///
    /// Returns an error only if the change log rejects the record.
    pub fn restore_version(&self, key: &str, version: u64) -> Result<bool, StateError> {
        let mut inner = self.inner.write();
        let Some(record) = inner.log.record_at_version(key, version).cloned() else {
            return Ok(false);
        };
        if record.change_type == ChangeType::Deleted {
            return Ok(false);
        }

        let mut params = match inner.variables.get(key) {
            Some(existing) => SetStateParams::keeping(existing, record.new_value),
            None => SetStateParams::new(key, record.new_value).with_category(record.category),
        };
        params.reason = Some(format!("restored to version {version}"));

        let (variable, written) = inner.write(params, false)?;
        self.events.publish(changed_event(&variable, &written));
        tracing::info!(key, version, new_version = variable.version, "Restored key to version");

        let order = inner.derived.cascade_order(key);
        if !order.is_empty() {
            inner.recalculate(&order, key, false, &self.events)?;
        }
        Ok(true)
    }

    /// Drop change records older than `cutoff`, keeping each key's latest.
    /// Returns the number removed.
    pub fn prune_history_before(&self, cutoff: DateTime<Utc>) -> usize {
        self.inner.write().log.prune_before(cutoff)
    }

    /// Whether a change matters: it touched an important category or moved
    /// a number by more than [`SIGNIFICANT_DELTA`].
    pub fn is_significant_change(record: &StateChangeRecord, category: StateCategory) -> bool {
        if category.is_important() {
            return true;
        }
        let old = record.old_value.as_ref().and_then(StateValue::as_number);
        let new = record.new_value.as_number();
        match (old, new) {
            (Some(a), Some(b)) => (b - a).abs() > SIGNIFICANT_DELTA,
            _ => false,
        }
    }

    /// Summarize every change with `start <= timestamp <= end`.
    pub fn summarize_period(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> PeriodSummary {
        let inner = self.inner.read();
        let records = inner.log.records_between(start, end);

        let mut keys: BTreeSet<&str> = BTreeSet::new();
        let mut category_counts: BTreeMap<StateCategory, usize> = BTreeMap::new();
        let mut significant_changes = Vec::new();
        for record in &records {
            keys.insert(record.state_key.as_str());
            let count = category_counts.entry(record.category).or_insert(0);
            *count = count.saturating_add(1);
            if Self::is_significant_change(record, record.category) {
                significant_changes.push((*record).clone());
            }
        }

        PeriodSummary {
            start,
            end,
            change_count: records.len(),
            keys_changed: keys.len(),
            category_counts,
            significant_changes,
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Live variables matching every filter in `query`.
    pub fn query(&self, query: &StateQuery) -> BTreeMap<String, StateVariable> {
        let inner = self.inner.read();
        QueryEngine::new(&inner.variables).run(query)
    }

    /// Live variables in `category`.
    pub fn query_by_category(&self, category: StateCategory) -> BTreeMap<String, StateVariable> {
        let inner = self.inner.read();
        QueryEngine::new(&inner.variables).by_category(category)
    }

    /// Live variables in `region`.
    pub fn query_by_region(&self, region: WorldRegion) -> BTreeMap<String, StateVariable> {
        let inner = self.inner.read();
        QueryEngine::new(&inner.variables).by_region(region)
    }

    /// Live variables carrying all of `tags`, or any of them with
    /// `match_any`.
    pub fn query_by_tags<I, S>(&self, tags: I, match_any: bool) -> BTreeMap<String, StateVariable>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let inner = self.inner.read();
        QueryEngine::new(&inner.variables).by_tags(tags, match_any)
    }

    /// Live variables whose key starts with `prefix`.
    pub fn query_by_prefix(&self, prefix: &str) -> BTreeMap<String, StateVariable> {
        let inner = self.inner.read();
        QueryEngine::new(&inner.variables).by_prefix(prefix)
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    /// Capture every live value under the next global snapshot version.
    pub fn create_snapshot(&self, metadata: BTreeMap<String, String>) -> WorldStateSnapshot {
        let snapshot = self.inner.write().capture(metadata);
        self.events.publish(StateEvent::SnapshotCreated {
            version: snapshot.version,
            variable_count: snapshot.variables.len(),
            automatic: false,
        });
        tracing::info!(
            version = snapshot.version,
            variable_count = snapshot.variables.len(),
            "Snapshot created"
        );
        snapshot
    }

    /// A snapshot by version, by "latest at or before" `timestamp`, or the
    /// latest when neither is given.
    pub fn load_snapshot(
        &self,
        version: Option<u64>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Option<WorldStateSnapshot> {
        self.inner.read().snapshots.load(version, timestamp).cloned()
    }

    /// Listing entries for every snapshot, ascending by version.
    pub fn list_snapshots(&self) -> Vec<SnapshotSummary> {
        self.inner.read().snapshots.list()
    }

    /// Delete a snapshot. Returns `false` if it did not exist.
    pub fn delete_snapshot(&self, version: u64) -> bool {
        let removed = self.inner.write().snapshots.delete(version);
        if removed {
            self.events.publish(StateEvent::SnapshotDeleted { version });
        }
        removed
    }

    /// Roll the live state back to a snapshot: every captured key gets its
    /// captured value back and live keys absent from the snapshot are
    /// deleted. Each change is recorded in the log.
    ///
    /// Returns `false` if the snapshot does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error only if the change log rejects a record.
    pub fn restore_snapshot(&self, version: u64) -> Result<bool, StateError> {
        let mut inner = self.inner.write();
        let Some(snapshot) = inner.snapshots.load(Some(version), None).cloned() else {
            return Ok(false);
        };
        let reason = format!("restored from snapshot {version}");
        let mut keys_changed: usize = 0;

        for (key, value) in &snapshot.variables {
            if inner.live_value(key).as_ref() == Some(value) {
                continue;
            }
            let mut params = match inner.variables.get(key) {
                Some(existing) => SetStateParams::keeping(existing, value.clone()),
                None => SetStateParams::new(key.clone(), value.clone()),
            };
            params.reason = Some(reason.clone());
            let (variable, record) = inner.write(params, false)?;
            self.events.publish(changed_event(&variable, &record));
            keys_changed = keys_changed.saturating_add(1);
        }

        let stale: Vec<String> = inner
            .variables
            .iter()
            .filter(|(k, v)| v.active && !snapshot.variables.contains_key(*k))
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            if let Some(record) = inner.remove(&key, None, Some(reason.clone()))? {
                self.events.publish(StateEvent::StateDeleted {
                    key,
                    version: record.version,
                });
                keys_changed = keys_changed.saturating_add(1);
            }
        }

        // Derived values were captured alongside their inputs.
        inner.derived.clear_cache();

        self.events.publish(StateEvent::SnapshotRestored {
            version,
            keys_changed,
        });
        tracing::info!(version, keys_changed, "Restored snapshot");
        Ok(true)
    }

    /// Rebuild every live value as of `at`: the latest snapshot at or
    /// before `at`, with later change records up to `at` replayed on top.
    /// Without such a snapshot the whole log is replayed.
    ///
    /// Returns `None` if nothing is known about the store before `at`.
    pub fn reconstruct_at(&self, at: DateTime<Utc>) -> Option<BTreeMap<String, StateValue>> {
        let inner = self.inner.read();
        let base = inner.snapshots.latest_at_or_before(at);

        let mut values = base.map_or_else(BTreeMap::new, |s| s.variables.clone());
        let mut replay: Vec<&StateChangeRecord> = inner
            .log
            .iter()
            .filter(|r| r.timestamp <= at && base.is_none_or(|s| written_after(s, r)))
            .collect();
        if base.is_none() && replay.is_empty() {
            return None;
        }
        replay.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.version.cmp(&b.version)));

        for record in replay {
            if record.change_type == ChangeType::Deleted {
                values.remove(&record.state_key);
            } else {
                values.insert(record.state_key.clone(), record.new_value.clone());
            }
        }
        Some(values)
    }

    // -----------------------------------------------------------------------
    // Derived state
    // -----------------------------------------------------------------------

    /// Register a derived rule and materialize its value if any of its
    /// dependencies is already live.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::DuplicateRule`] or
    /// [`StateError::CycleDetected`]; the store is unchanged on error.
    pub fn register_rule(&self, rule: DerivedStateRule) -> Result<(), StateError> {
        let mut inner = self.inner.write();
        let key = rule.key.clone();
        inner.derived.register(rule)?;
        self.materialize(&mut inner, &key)
    }

    /// Replace a derived rule and recompute it.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::RuleNotFound`] or
    /// [`StateError::CycleDetected`]; the old rule stays on error.
    pub fn update_rule(&self, rule: DerivedStateRule) -> Result<(), StateError> {
        let mut inner = self.inner.write();
        let key = rule.key.clone();
        inner.derived.update(rule)?;
        self.materialize(&mut inner, &key)
    }

    /// Remove a derived rule. The last written value stays in the store.
    pub fn remove_rule(&self, key: &str) -> bool {
        self.inner.write().derived.remove(key)
    }

    /// Register the built-in rules that are not registered yet.
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in rule would form a cycle with rules
    /// already registered.
    pub fn register_default_rules(&self) -> Result<(), StateError> {
        let rule = crate::derived::population_total_rule();
        if self.inner.read().derived.contains(&rule.key) {
            return Ok(());
        }
        self.register_rule(rule)
    }

    /// Evaluate a derived rule against the current values.
    pub fn get_derived_value(&self, key: &str) -> Option<StateValue> {
        let inner = self.inner.read();
        if let Some(cached) = inner.derived.cached(key) {
            return Some(cached.clone());
        }
        let lookup = |k: &str| inner.live_value(k);
        inner.derived.evaluate(key, &lookup)
    }

    /// Derived keys that read `key` directly.
    pub fn get_dependent_keys(&self, key: &str) -> Vec<String> {
        self.inner.read().derived.dependent_keys(key)
    }

    /// Every derived key.
    pub fn get_all_derived_keys(&self) -> Vec<String> {
        self.inner.read().derived.derived_keys()
    }

    /// Description of the rule for `key`.
    pub fn get_rule_info(&self, key: &str) -> Option<RuleInfo> {
        self.inner.read().derived.rule_info(key)
    }

    /// Compute a newly (re)registered rule and everything downstream of it.
    fn materialize(&self, inner: &mut StoreInner, key: &str) -> Result<(), StateError> {
        let mut order = vec![key.to_owned()];
        order.extend(inner.derived.cascade_order(key));
        inner.recalculate(&order, key, true, &self.events)
    }

    // -----------------------------------------------------------------------
    // Statistics and persistence
    // -----------------------------------------------------------------------

    /// Counters describing the store.
    pub fn statistics(&self) -> StoreStatistics {
        let inner = self.inner.read();
        let mut stats = StoreStatistics {
            history_size: inner.log.len(),
            snapshot_count: inner.snapshots.len(),
            derived_rule_count: inner.derived.len(),
            ..StoreStatistics::default()
        };

        for variable in inner.variables.values() {
            if !variable.active {
                stats.deleted_count = stats.deleted_count.saturating_add(1);
                continue;
            }
            stats.state_count = stats.state_count.saturating_add(1);
            bump(&mut stats.category_counts, variable.category);
            bump(&mut stats.region_counts, variable.region);
            for tag in &variable.tags {
                bump(&mut stats.tag_counts, tag.clone());
            }
        }
        stats
    }

    /// Copy out everything the store persists.
    pub fn export(&self) -> StoreContents {
        let inner = self.inner.read();
        StoreContents {
            variables: inner.variables.clone(),
            history: inner.log.to_records(),
            snapshots: inner.snapshots.iter().cloned().collect(),
        }
    }

    /// Replace the store's variables, history and snapshots. Registered
    /// rules are kept; their cached values are dropped.
    pub fn import(&self, contents: StoreContents) {
        let mut inner = self.inner.write();
        let StoreContents {
            variables,
            history,
            snapshots,
        } = contents;

        inner.variables = variables;
        inner.log = ChangeLog::from_records(history);
        inner.snapshots = SnapshotManager::new();
        for snapshot in snapshots {
            inner.snapshots.insert(snapshot);
        }
        inner.derived.clear_cache();

        tracing::info!(
            variables = inner.variables.len(),
            history = inner.log.len(),
            snapshots = inner.snapshots.len(),
            "Imported store contents"
        );
    }

    /// Build a store from persisted contents.
    pub fn from_contents(contents: StoreContents, options: StoreOptions) -> Self {
        let store = Self::with_options(options);
        store.import(contents);
        store
    }
}

/// Increment a counter map entry.
fn bump<K: Ord>(counts: &mut BTreeMap<K, usize>, key: K) {
    let count = counts.entry(key).or_insert(0);
    *count = count.saturating_add(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn quiet_store() -> StateStore {
        StateStore::with_options(StoreOptions {
            auto_snapshot: false,
            ..StoreOptions::default()
        })
    }

    #[test]
    fn first_write_creates_version_one() {
        let store = quiet_store();
        let var = store.set_state(SetStateParams::new("a", 1)).unwrap();
        assert_eq!(var.version, 1);
        let history = store.get_history("a");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].change_type, ChangeType::Created);
        assert!(history[0].old_value.is_none());
    }

    #[test]
    fn update_records_old_value() {
        let store = quiet_store();
        store.set_state(SetStateParams::new("a", 1)).unwrap();
        let var = store.set_state(SetStateParams::new("a", 2)).unwrap();
        assert_eq!(var.version, 2);
        let history = store.get_history("a");
        assert_eq!(history[1].change_type, ChangeType::Updated);
        assert_eq!(history[1].old_value, Some(StateValue::from(1)));
    }

    #[test]
    fn missing_key_falls_back_to_default() {
        let store = quiet_store();
        assert_eq!(store.get_state("missing"), None);
        assert_eq!(store.get_state_or("missing", StateValue::from(7)), StateValue::from(7));
        assert!(store.get_state_variable("missing").is_none());
    }

    #[test]
    fn string_names_are_coerced() {
        let store = quiet_store();
        let var = store
            .set_state(
                SetStateParams::new("a", 1)
                    .with_category_name("not-a-category")
                    .with_region_name("north"),
            )
            .unwrap();
        assert_eq!(var.category, StateCategory::Other);
        assert_eq!(var.region, WorldRegion::Northern);
    }

    #[test]
    fn delete_then_recreate_continues_versions() {
        let store = quiet_store();
        store.set_state(SetStateParams::new("a", 1)).unwrap();
        assert!(store.delete_state("a", Some("tester")).unwrap());
        assert!(!store.delete_state("a", None).unwrap());
        assert_eq!(store.get_state("a"), None);
        assert_eq!(store.state_count(), 0);

        let var = store.set_state(SetStateParams::new("a", 5)).unwrap();
        assert_eq!(var.version, 3);
        let kinds: Vec<ChangeType> = store.get_history("a").iter().map(|r| r.change_type).collect();
        assert_eq!(kinds, vec![ChangeType::Created, ChangeType::Deleted, ChangeType::Created]);
        assert_eq!(store.get_history("a")[1].entity_id.as_deref(), Some("tester"));
    }

    #[test]
    fn delete_unknown_key_returns_false() {
        let store = quiet_store();
        assert!(!store.delete_state("ghost", None).unwrap());
        assert!(store.get_history("ghost").is_empty());
    }

    #[test]
    fn important_write_takes_auto_snapshot() {
        let store = StateStore::new();
        store
            .set_state(SetStateParams::new("war.declared", true).with_category(StateCategory::Military))
            .unwrap();
        store.set_state(SetStateParams::new("weather", "rain")).unwrap();

        let snapshots = store.list_snapshots();
        assert_eq!(snapshots.len(), 1);
        let meta = &snapshots[0].metadata;
        assert_eq!(meta.get("type").map(String::as_str), Some(AUTO_SNAPSHOT_TYPE));
        assert_eq!(meta.get("triggered_by").map(String::as_str), Some("war.declared"));
        assert_eq!(meta.get("change_category").map(String::as_str), Some("MILITARY"));
    }

    #[test]
    fn significance_rules() {
        let record = |old: Option<f64>, new: f64| StateChangeRecord {
            id: ChangeId::new(),
            state_key: "k".to_owned(),
            old_value: old.map(StateValue::from),
            new_value: StateValue::from(new),
            change_type: ChangeType::Updated,
            category: StateCategory::Economic,
            timestamp: Utc::now(),
            version: 2,
            reason: None,
            entity_id: None,
        };
        assert!(StateStore::is_significant_change(&record(Some(0.0), 150.0), StateCategory::Economic));
        assert!(!StateStore::is_significant_change(&record(Some(0.0), 50.0), StateCategory::Economic));
        assert!(!StateStore::is_significant_change(&record(None, 500.0), StateCategory::Economic));
        assert!(StateStore::is_significant_change(&record(Some(0.0), 1.0), StateCategory::Quest));
    }

    #[test]
    fn statistics_count_live_and_deleted() {
        let store = quiet_store();
        store
            .set_state(SetStateParams::new("a", 1).with_category(StateCategory::Economic).with_tags(["x"]))
            .unwrap();
        store
            .set_state(SetStateParams::new("b", 2).with_category(StateCategory::Economic).with_tags(["x", "y"]))
            .unwrap();
        store.set_state(SetStateParams::new("c", 3)).unwrap();
        store.delete_state("c", None).unwrap();

        let stats = store.statistics();
        assert_eq!(stats.state_count, 2);
        assert_eq!(stats.deleted_count, 1);
        assert_eq!(stats.history_size, 4);
        assert_eq!(stats.category_counts.get(&StateCategory::Economic), Some(&2));
        assert_eq!(stats.tag_counts.get("x"), Some(&2));
        assert_eq!(stats.tag_counts.get("y"), Some(&1));
    }

    #[test]
    fn export_import_preserves_contents() {
        let store = quiet_store();
        store.set_state(SetStateParams::new("a", 1)).unwrap();
        store.set_state(SetStateParams::new("a", 2)).unwrap();
        store.create_snapshot(BTreeMap::new());

        let restored = StateStore::from_contents(store.export(), StoreOptions::default());
        assert_eq!(restored.get_state("a"), Some(StateValue::from(2)));
        assert_eq!(restored.get_history("a").len(), 2);
        assert_eq!(restored.list_snapshots().len(), 1);

        let next = restored.create_snapshot(BTreeMap::new());
        assert_eq!(next.version, 2);
        let var = restored.set_state(SetStateParams::new("a", 3)).unwrap();
        assert_eq!(var.version, 3);
    }
}
