//! Engine binary for Chronicle.
//!
//! Loads configuration, restores the persisted world state or generates a
//! fresh world and seeds the store with it, registers the built-in derived
//! rules, snapshots the result and saves it.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `chronicle-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Open the JSON repository and load prior state
//! 4. If the store is empty, generate the world map and seed the store
//! 5. Register default derived rules
//! 6. Create a startup snapshot
//! 7. Save the store

mod error;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chronicle_core::config::LoggingConfig;
use chronicle_core::{ChronicleConfig, seed_store};
use chronicle_db::{JsonFileRepository, load_store, save_store};
use chronicle_worldgen::{BiomeTable, TerrainGenerator, WorldMap, WorldMapAssembler};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;

/// Default location of the configuration file.
const CONFIG_PATH: &str = "chronicle-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, generation, seeding or the final
/// save fails.
#[tokio::main]
async fn main() -> Result<(), EngineError> {
    // 1. Load configuration; logging settings come from it.
    let config = load_config(Path::new(CONFIG_PATH))?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging);
    info!(
        world_name = config.world.name,
        seed = config.world.seed,
        width = config.world.width,
        height = config.world.height,
        "chronicle-engine starting"
    );

    // 3. Open the repository and load any prior state.
    let repo = JsonFileRepository::new(&config.persistence.data_dir, config.persistence.max_backups);
    repo.init().await?;
    let store = load_store(&repo, config.store.options()).await;

    // 4. Generate and seed a fresh world when nothing was persisted.
    if store.state_count() == 0 {
        let map = generate_world(&config).await?;
        let facts = seed_store(&store, &map)?;
        info!(facts, regions = map.regions.len(), "New world seeded");
    } else {
        info!(variables = store.state_count(), "Existing world state loaded");
    }

    // 5. Register built-in derived rules.
    store.register_default_rules()?;

    // 6. Snapshot.
    let snapshot = store.create_snapshot(BTreeMap::from([
        ("type".to_owned(), "startup".to_owned()),
        ("world".to_owned(), config.world.name.clone()),
    ]));
    info!(version = snapshot.version, "Startup snapshot created");

    // 7. Save.
    if !save_store(&store, &repo).await {
        return Err(EngineError::Save {
            path: config.persistence.data_dir.display().to_string(),
        });
    }

    let stats = store.statistics();
    info!(
        variables = stats.state_count,
        history = stats.history_size,
        snapshots = stats.snapshot_count,
        "chronicle-engine finished"
    );
    Ok(())
}

/// Install the tracing subscriber. `RUST_LOG` takes precedence over the
/// configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

/// Load configuration from `path`, falling back to defaults when the file
/// does not exist.
fn load_config(path: &Path) -> Result<ChronicleConfig, EngineError> {
    if path.exists() {
        Ok(ChronicleConfig::from_file(path)?)
    } else {
        let mut config = ChronicleConfig::default();
        config.persistence.apply_env_overrides();
        Ok(config)
    }
}

/// Generate the world map off the async runtime.
async fn generate_world(config: &ChronicleConfig) -> Result<WorldMap, EngineError> {
    let terrain = config.terrain.clone();
    let world = config.world.clone();
    let map = tokio::task::spawn_blocking(move || {
        let generator = TerrainGenerator::new(terrain, Arc::new(BiomeTable::with_defaults()?))?;
        let assembler = WorldMapAssembler::new(generator, world.generation)?;
        assembler.generate_world_map(world.width, world.height, world.seed)
    })
    .await
    .map_err(|e| EngineError::Task {
        message: format!("{e}"),
    })??;
    Ok(map)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_uses_defaults() {
        let config = load_config(Path::new("definitely/not/here.yaml")).unwrap();
        assert_eq!(config.world.seed, 42);
        assert_eq!(config.world.width, 4);
    }

    #[tokio::test]
    async fn generates_configured_world() {
        let config = ChronicleConfig::parse(
            "world:\n  width: 2\n  height: 1\n  region_size: 8\n  seed: 3\n",
        )
        .unwrap();
        let map = generate_world(&config).await.unwrap();
        assert_eq!(map.regions.len(), 2);
        assert_eq!(map.region_size, 8);
        assert_eq!(map.seed, 3);
    }
}
