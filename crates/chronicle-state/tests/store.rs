//! Integration tests for the `chronicle-state` store.
//!
//! Exercise the public [`StateStore`] surface end to end: versioning,
//! point-in-time lookups, snapshots, queries, derived cascades and the
//! event channel.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::items_after_statements,
    clippy::missing_panics_doc,
    clippy::too_many_lines,
    clippy::indexing_slicing,
    clippy::float_cmp
)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use chrono::Utc;

use chronicle_state::derived::{POPULATION_TOTAL_KEY, sum_numbers};
use chronicle_state::{
    DerivedStateRule, SetStateParams, StateError, StateQuery, StateStore, StoreOptions,
};
use chronicle_types::{ChangeType, StateCategory, StateEvent, StateValue, WorldRegion};

fn quiet_store() -> StateStore {
    StateStore::with_options(StoreOptions {
        auto_snapshot: false,
        ..StoreOptions::default()
    })
}

fn set(store: &StateStore, key: &str, value: impl Into<StateValue>) {
    store.set_state(SetStateParams::new(key, value)).unwrap();
}

fn number(store: &StateStore, key: &str) -> Option<f64> {
    store.get_state(key).and_then(|v| v.as_number())
}

// =========================================================================
// Versioning and history
// =========================================================================

#[test]
fn n_writes_give_n_history_records_with_versions_one_to_n() {
    let store = quiet_store();
    for i in 1..=10 {
        set(&store, "treasury.gold", i * 100);
    }

    let history = store.get_history("treasury.gold");
    assert_eq!(history.len(), 10);
    let versions: Vec<u64> = history.iter().map(|r| r.version).collect();
    assert_eq!(versions, (1..=10).collect::<Vec<u64>>());
    assert_eq!(history[0].change_type, ChangeType::Created);
    assert!(history[1..].iter().all(|r| r.change_type == ChangeType::Updated));
}

#[test]
fn value_at_version_matches_each_write() {
    let store = quiet_store();
    let values = ["Aldric", "Brenna", "Cedric", "Dagny"];
    for name in values {
        set(&store, "kingdom.north.ruler", name);
    }

    for (i, name) in values.iter().enumerate() {
        let version = u64::try_from(i).unwrap() + 1;
        assert_eq!(
            store.get_value_at_version("kingdom.north.ruler", version),
            Some(StateValue::from(*name))
        );
    }
    // Above the latest version resolves to the latest value.
    assert_eq!(
        store.get_value_at_version("kingdom.north.ruler", 99),
        Some(StateValue::from("Dagny"))
    );
    assert_eq!(
        store.get_value_at_version_or("kingdom.north.ruler", 0, StateValue::from("nobody")),
        StateValue::from("nobody")
    );
}

#[test]
fn value_at_time_tracks_history() {
    let store = quiet_store();
    let before = Utc::now();
    set(&store, "weather", "sunny");
    let between = Utc::now();
    set(&store, "weather", "storm");

    assert_eq!(store.get_value_at_time("weather", before - chrono::Duration::seconds(1)), None);
    assert_eq!(
        store.get_value_at_time("weather", between),
        Some(StateValue::from("sunny"))
    );
    assert_eq!(
        store.get_value_at_time("weather", Utc::now()),
        Some(StateValue::from("storm"))
    );
    assert_eq!(
        store.get_value_at_time_or("nothing", Utc::now(), StateValue::Null),
        StateValue::Null
    );
}

#[test]
fn restore_version_writes_a_new_record() {
    let store = quiet_store();
    set(&store, "a", 1);
    set(&store, "a", 2);
    set(&store, "a", 3);

    assert!(store.restore_version("a", 1).unwrap());
    assert_eq!(number(&store, "a"), Some(1.0));
    let history = store.get_history("a");
    assert_eq!(history.len(), 4);
    assert_eq!(history[3].version, 4);
    assert_eq!(history[3].reason.as_deref(), Some("restored to version 1"));

    assert!(!store.restore_version("missing", 1).unwrap());
}

#[test]
fn prune_keeps_latest_record() {
    let store = quiet_store();
    set(&store, "a", 1);
    set(&store, "a", 2);
    let removed = store.prune_history_before(Utc::now());
    assert_eq!(removed, 1);
    let history = store.get_history("a");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].version, 2);

    // Versions keep counting from the retained record.
    let var = store.set_state(SetStateParams::new("a", 3)).unwrap();
    assert_eq!(var.version, 3);
}

// =========================================================================
// Snapshots
// =========================================================================

#[test]
fn snapshot_captures_live_values_exactly() {
    let store = quiet_store();
    set(&store, "a", 1);
    set(&store, "b", "two");
    set(&store, "c", true);
    store.delete_state("c", None).unwrap();

    let snapshot = store.create_snapshot(BTreeMap::from([("note".to_owned(), "test".to_owned())]));
    let live: BTreeMap<String, StateValue> = store
        .get_all_state_variables()
        .into_iter()
        .map(|(k, v)| (k, v.value))
        .collect();

    let loaded = store.load_snapshot(Some(snapshot.version), None).unwrap();
    assert_eq!(loaded.variables, live);
    assert_eq!(loaded.metadata.get("note").map(String::as_str), Some("test"));
}

#[test]
fn snapshot_versions_are_global_and_listable() {
    let store = quiet_store();
    set(&store, "a", 1);
    let first = store.create_snapshot(BTreeMap::new());
    set(&store, "a", 2);
    set(&store, "b", 2);
    let second = store.create_snapshot(BTreeMap::new());

    assert_eq!(first.version, 1);
    assert_eq!(second.version, 2);
    assert_eq!(store.load_snapshot(None, None).unwrap().version, 2);
    assert_eq!(store.load_snapshot(None, Some(first.timestamp)).unwrap().version, 1);

    let listed = store.list_snapshots();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].variable_count, 1);
    assert_eq!(listed[1].variable_count, 2);

    assert!(store.delete_snapshot(1));
    assert!(!store.delete_snapshot(1));
    assert!(store.load_snapshot(Some(1), None).is_none());
}

#[test]
fn restore_snapshot_rolls_back_values_and_deletes_new_keys() {
    let store = quiet_store();
    set(&store, "a", 1);
    set(&store, "b", 1);
    let snapshot = store.create_snapshot(BTreeMap::new());

    set(&store, "a", 5);
    store.delete_state("b", None).unwrap();
    set(&store, "c", 9);

    assert!(store.restore_snapshot(snapshot.version).unwrap());
    assert_eq!(number(&store, "a"), Some(1.0));
    assert_eq!(number(&store, "b"), Some(1.0));
    assert_eq!(store.get_state("c"), None);
    assert!(!store.restore_snapshot(42).unwrap());
}

#[test]
fn reconstruct_replays_log_on_top_of_snapshot() {
    let store = quiet_store();
    set(&store, "a", 1);
    store.create_snapshot(BTreeMap::new());
    set(&store, "a", 2);
    set(&store, "b", 3);
    let checkpoint = Utc::now();
    set(&store, "a", 100);

    let rebuilt = store.reconstruct_at(checkpoint).unwrap();
    assert_eq!(rebuilt.get("a"), Some(&StateValue::from(2)));
    assert_eq!(rebuilt.get("b"), Some(&StateValue::from(3)));

    let long_ago = checkpoint - chrono::Duration::days(1);
    assert!(store.reconstruct_at(long_ago).is_none());
}

#[test]
fn reconstruct_without_snapshot_replays_whole_log() {
    let store = quiet_store();
    set(&store, "a", 1);
    set(&store, "b", 2);
    store.delete_state("b", None).unwrap();

    let rebuilt = store.reconstruct_at(Utc::now()).unwrap();
    assert_eq!(rebuilt.len(), 1);
    assert_eq!(rebuilt.get("a"), Some(&StateValue::from(1)));
}

#[test]
fn reconstruct_keeps_writes_sharing_the_snapshot_timestamp() {
    let store = quiet_store();
    set(&store, "a", 1);
    let snapshot = store.create_snapshot(BTreeMap::new());
    assert_eq!(snapshot.key_versions.get("a"), Some(&1));
    set(&store, "a", 2);

    // Same clock tick as the snapshot, but written after it.
    let mut contents = store.export();
    for record in &mut contents.history {
        if record.version == 2 {
            record.timestamp = snapshot.timestamp;
        }
    }
    let reloaded = StateStore::from_contents(
        contents,
        StoreOptions {
            auto_snapshot: false,
            ..StoreOptions::default()
        },
    );

    let rebuilt = reloaded.reconstruct_at(snapshot.timestamp).unwrap();
    assert_eq!(rebuilt.get("a"), Some(&StateValue::from(2)));
}

// =========================================================================
// Queries
// =========================================================================

fn tagged_store() -> StateStore {
    let store = quiet_store();
    store
        .set_state(SetStateParams::new("x.both", 1).with_tags(["a", "b"]))
        .unwrap();
    store
        .set_state(SetStateParams::new("x.only_a", 1).with_tags(["a"]))
        .unwrap();
    store
        .set_state(SetStateParams::new("y.only_b", 1).with_tags(["b"]))
        .unwrap();
    store
        .set_state(SetStateParams::new("y.none", 1).with_category(StateCategory::Economic))
        .unwrap();
    store
}

#[test]
fn tag_queries_honor_match_mode() {
    let store = tagged_store();

    let all: Vec<String> = store.query_by_tags(["a", "b"], false).into_keys().collect();
    assert_eq!(all, vec!["x.both"]);

    let any: Vec<String> = store.query_by_tags(["a", "b"], true).into_keys().collect();
    assert_eq!(any, vec!["x.both", "x.only_a", "y.only_b"]);
}

#[test]
fn combined_filters_intersect() {
    let store = tagged_store();
    store
        .set_state(
            SetStateParams::new("x.north", 1)
                .with_region(WorldRegion::Northern)
                .with_tags(["a"]),
        )
        .unwrap();

    let found = store.query(
        &StateQuery::new()
            .with_prefix("x.")
            .with_region(WorldRegion::Northern)
            .with_tags(["a"], false),
    );
    assert_eq!(found.keys().collect::<Vec<_>>(), vec!["x.north"]);
    assert_eq!(store.query_by_prefix("y.").len(), 2);
    assert_eq!(store.query_by_category(StateCategory::Economic).len(), 1);
    assert_eq!(store.query_by_region(WorldRegion::Northern).len(), 1);
}

#[test]
fn deleted_variables_are_not_queried() {
    let store = tagged_store();
    store.delete_state("x.both", None).unwrap();
    assert!(store.query_by_tags(["a", "b"], false).is_empty());
}

// =========================================================================
// Derived state
// =========================================================================

#[test]
fn population_total_is_kept_current() {
    let store = quiet_store();
    store.register_default_rules().unwrap();
    // No inputs yet, so nothing is materialized.
    assert_eq!(store.get_state(POPULATION_TOTAL_KEY), None);

    set(&store, "world.population.humans", 1000);
    set(&store, "world.population.elves", 500);
    set(&store, "world.population.dwarves", 300);
    set(&store, "world.population.orcs", 200);

    assert_eq!(number(&store, POPULATION_TOTAL_KEY), Some(2000.0));
    assert_eq!(
        store.get_derived_value(POPULATION_TOTAL_KEY),
        Some(StateValue::from(2000.0))
    );

    let var = store.get_state_variable(POPULATION_TOTAL_KEY).unwrap();
    assert!(var.tags.contains("derived"));
    assert_eq!(var.category, StateCategory::Population);
    let last = store.get_history(POPULATION_TOTAL_KEY).pop().unwrap();
    assert_eq!(last.change_type, ChangeType::Calculated);

    store.delete_state("world.population.orcs", None).unwrap();
    assert_eq!(number(&store, POPULATION_TOTAL_KEY), Some(1800.0));
}

#[test]
fn registering_after_data_materializes_value() {
    let store = quiet_store();
    set(&store, "world.population.humans", 10);
    store.register_default_rules().unwrap();
    assert_eq!(number(&store, POPULATION_TOTAL_KEY), Some(10.0));
    // Registering the defaults again is a no-op.
    store.register_default_rules().unwrap();
    assert_eq!(store.get_all_derived_keys(), vec![POPULATION_TOTAL_KEY]);
}

#[test]
fn chained_rules_recompute_in_dependency_order() {
    let store = quiet_store();
    store
        .register_rule(DerivedStateRule::new("sum", ["a", "b"], |inputs| Ok(sum_numbers(inputs))))
        .unwrap();
    store
        .register_rule(DerivedStateRule::new("double", ["sum"], |inputs| {
            let sum = inputs
                .get("sum")
                .and_then(Option::as_ref)
                .and_then(StateValue::as_number)
                .ok_or_else(|| "sum missing".to_owned())?;
            Ok(StateValue::from(sum * 2.0))
        }))
        .unwrap();

    set(&store, "a", 5);
    set(&store, "b", 7);
    assert_eq!(number(&store, "sum"), Some(12.0));
    assert_eq!(number(&store, "double"), Some(24.0));
    assert_eq!(store.get_dependent_keys("sum"), vec!["double"]);
}

#[test]
fn mutual_dependency_is_rejected_and_not_installed() {
    let store = quiet_store();
    store
        .register_rule(DerivedStateRule::new("a", ["b"], |inputs| Ok(sum_numbers(inputs))))
        .unwrap();
    let err = store
        .register_rule(DerivedStateRule::new("b", ["a"], |inputs| Ok(sum_numbers(inputs))))
        .unwrap_err();
    assert!(matches!(err, StateError::CycleDetected { .. }));
    assert_eq!(store.get_all_derived_keys(), vec!["a"]);
    assert!(store.get_rule_info("b").is_none());
}

#[test]
fn failing_rule_does_not_abort_cascade() {
    let store = quiet_store();
    store
        .register_rule(DerivedStateRule::new("broken", ["x"], |_| Err("boom".to_owned())))
        .unwrap();
    store
        .register_rule(DerivedStateRule::new("healthy", ["x"], |inputs| Ok(sum_numbers(inputs))))
        .unwrap();
    store
        .register_rule(DerivedStateRule::new("downstream", ["broken"], |inputs| {
            Ok(StateValue::from(inputs.get("broken").is_some_and(Option::is_some)))
        }))
        .unwrap();

    set(&store, "x", 3);
    assert_eq!(store.get_state("broken"), None);
    assert_eq!(number(&store, "healthy"), Some(3.0));
    assert_eq!(store.get_state("downstream"), Some(StateValue::from(false)));
}

#[test]
fn update_and_remove_rules() {
    let store = quiet_store();
    set(&store, "a", 2);
    store
        .register_rule(DerivedStateRule::new("r", ["a"], |inputs| Ok(sum_numbers(inputs))))
        .unwrap();
    assert_eq!(number(&store, "r"), Some(2.0));

    store
        .update_rule(DerivedStateRule::new("r", ["a"], |inputs| {
            let a = inputs
                .get("a")
                .and_then(Option::as_ref)
                .and_then(StateValue::as_number)
                .unwrap_or(0.0);
            Ok(StateValue::from(a * 10.0))
        }))
        .unwrap();
    assert_eq!(number(&store, "r"), Some(20.0));

    assert!(store.remove_rule("r"));
    assert!(!store.remove_rule("r"));
    set(&store, "a", 3);
    // The last computed value stays; it is no longer recalculated.
    assert_eq!(number(&store, "r"), Some(20.0));
    assert!(matches!(
        store.update_rule(DerivedStateRule::new("r", ["a"], |i| Ok(sum_numbers(i)))),
        Err(StateError::RuleNotFound(_))
    ));
}

// =========================================================================
// Events and summaries
// =========================================================================

#[test]
fn writes_publish_events_in_order() {
    let store = quiet_store();
    let mut rx = store.subscribe();

    set(&store, "a", 1);
    store.delete_state("a", None).unwrap();
    store.create_snapshot(BTreeMap::new());

    match rx.try_recv().unwrap() {
        StateEvent::StateChanged {
            key,
            version,
            change_type,
            ..
        } => {
            assert_eq!(key, "a");
            assert_eq!(version, 1);
            assert_eq!(change_type, ChangeType::Created);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(
        rx.try_recv().unwrap(),
        StateEvent::StateDeleted {
            key: "a".to_owned(),
            version: 2
        }
    );
    assert!(matches!(
        rx.try_recv().unwrap(),
        StateEvent::SnapshotCreated {
            version: 1,
            automatic: false,
            ..
        }
    ));
}

#[test]
fn period_summary_counts_changes() {
    let store = quiet_store();
    let start = Utc::now();
    store
        .set_state(SetStateParams::new("gold", 0).with_category(StateCategory::Economic))
        .unwrap();
    store
        .set_state(SetStateParams::new("gold", 500).with_category(StateCategory::Economic))
        .unwrap();
    store
        .set_state(SetStateParams::new("treaty", "signed").with_category(StateCategory::Political))
        .unwrap();
    let end = Utc::now();

    let summary = store.summarize_period(start, end);
    assert_eq!(summary.change_count, 3);
    assert_eq!(summary.keys_changed, 2);
    assert_eq!(summary.category_counts.get(&StateCategory::Economic), Some(&2));
    // The 0 -> 500 jump and the political write are significant.
    assert_eq!(summary.significant_changes.len(), 2);
}

#[test]
fn concurrent_writers_keep_versions_dense() {
    let store = Arc::new(quiet_store());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..25 {
                    store.set_state(SetStateParams::new("counter", i)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let versions: Vec<u64> = store.get_history("counter").iter().map(|r| r.version).collect();
    assert_eq!(versions, (1..=100).collect::<Vec<u64>>());
}
