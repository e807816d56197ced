//! Integration tests for configuration files and world seeding.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::items_after_statements,
    clippy::missing_panics_doc,
    clippy::too_many_lines,
    clippy::indexing_slicing,
    clippy::panic
)]

use chronicle_core::{ChronicleConfig, ConfigError, region_key, seed_store};
use chronicle_state::{StateStore, StoreOptions};
use chronicle_types::{StateCategory, StateValue, WorldRegion};
use chronicle_worldgen::{TerrainGenerator, WorldMapAssembler};

fn small_world(seed: u64) -> chronicle_worldgen::WorldMap {
    let config = ChronicleConfig::parse(&format!(
        "world:\n  seed: {seed}\n  width: 3\n  height: 3\n  region_size: 8\n"
    ))
    .unwrap();
    let generator = TerrainGenerator::new(
        config.terrain.clone(),
        std::sync::Arc::new(chronicle_worldgen::BiomeTable::with_defaults().unwrap()),
    )
    .unwrap();
    WorldMapAssembler::new(generator, config.world.generation.clone())
        .unwrap()
        .generate_world_map(config.world.width, config.world.height, config.world.seed)
        .unwrap()
}

#[test]
fn config_file_round_trip() {
    let path = std::env::temp_dir().join(format!("chronicle-core-{}.yaml", std::process::id()));
    std::fs::write(&path, "world:\n  name: Saga\n  seed: 9\nlogging:\n  json: true\n").unwrap();
    let config = ChronicleConfig::from_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(config.world.name, "Saga");
    assert_eq!(config.world.seed, 9);
    assert!(config.logging.json);

    let missing = ChronicleConfig::from_file(&path);
    assert!(matches!(missing, Err(ConfigError::Io { .. })));
}

#[test]
fn seeding_writes_world_and_region_facts() {
    let map = small_world(42);
    let store = StateStore::with_options(StoreOptions::default());
    let written = seed_store(&store, &map).unwrap();

    // Five world facts plus five per region.
    assert_eq!(written, 5 + 5 * 9);
    assert_eq!(store.state_count(), written);
    assert_eq!(store.get_state("world.seed"), Some(StateValue::from(42_u32)));
    assert_eq!(store.get_state("world.width"), Some(StateValue::from(3_u32)));
    assert_eq!(
        store.get_state("world.river_count"),
        Some(StateValue::from(u32::try_from(map.rivers.len()).unwrap()))
    );

    let region = store.query_by_prefix("region.1_1.");
    assert_eq!(region.len(), 5);
    assert!(region.values().all(|v| v.category == StateCategory::Environmental));
    assert!(region.values().all(|v| v.region == WorldRegion::Central));
    assert!(region.values().all(|v| v.tags.contains("worldgen")));

    let biome = store.get_state(&region_key(0, 0, "biome")).unwrap();
    assert_eq!(
        biome,
        StateValue::from(map.region(0, 0).unwrap().dominant_biome().unwrap())
    );
    assert!(matches!(
        store.get_state(&region_key(2, 2, "resources")),
        Some(StateValue::Map(_))
    ));

    // Environmental writes never trigger automatic snapshots.
    assert!(store.list_snapshots().is_empty());
    assert_eq!(store.query_by_region(WorldRegion::Northern).len(), 15);
}

#[test]
fn points_of_interest_are_listed_per_region() {
    let map = small_world(5);
    let store = StateStore::new();
    seed_store(&store, &map).unwrap();

    let mut listed = 0;
    for region in &map.regions {
        let key = region_key(region.x, region.y, "points_of_interest");
        let Some(StateValue::List(items)) = store.get_state(&key) else {
            panic!("missing {key}");
        };
        assert_eq!(items.len(), region.points_of_interest.len());
        listed += items.len();
    }
    assert_eq!(listed, map.points_of_interest().count());
}
