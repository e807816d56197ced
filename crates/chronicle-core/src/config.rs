//! Configuration loading and typed config structures for Chronicle.
//!
//! The canonical configuration lives in `chronicle-config.yaml` at the
//! project root. Every section and field has a default, so an empty file
//! (or no file at all) yields a working configuration.

use std::path::{Path, PathBuf};

use chronicle_state::StoreOptions;
use chronicle_worldgen::{TerrainConfig, WorldGenConfig, WorldGenError};
use serde::Deserialize;

/// Environment variable overriding [`PersistenceConfig::data_dir`].
pub const DATA_DIR_ENV: &str = "CHRONICLE_DATA_DIR";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The configuration parsed but describes an unusable world.
    #[error("invalid configuration: {source}")]
    Invalid {
        /// The rejected generation parameter.
        #[from]
        source: WorldGenError,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level Chronicle configuration.
///
/// Mirrors the structure of `chronicle-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChronicleConfig {
    /// World size, seed and generation parameters.
    #[serde(default)]
    pub world: WorldConfig,

    /// Per-region terrain parameters.
    #[serde(default)]
    pub terrain: TerrainConfig,

    /// State store behaviour.
    #[serde(default)]
    pub store: StoreConfig,

    /// Where and how state is persisted.
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ChronicleConfig {
    /// Load configuration from a YAML file, applying environment
    /// overrides and validating the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if it is not valid YAML, or
    /// [`ConfigError::Invalid`] if the values are out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.persistence.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Check that the world can be generated with these values.
    pub fn validate(&self) -> Result<(), WorldGenError> {
        if self.world.width == 0 || self.world.height == 0 {
            return Err(WorldGenError::InvalidDimensions {
                width: self.world.width,
                height: self.world.height,
            });
        }
        self.world.generation.validate()?;
        self.terrain.validate()
    }
}

/// World-level configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorldConfig {
    /// Human-readable world name.
    #[serde(default = "default_world_name")]
    pub name: String,

    /// Seed for every generation step.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Regions per row.
    #[serde(default = "default_world_dimension")]
    pub width: usize,

    /// Regions per column.
    #[serde(default = "default_world_dimension")]
    pub height: usize,

    /// Region size, climate variation, rivers, cache capacity.
    #[serde(flatten)]
    pub generation: WorldGenConfig,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            name: default_world_name(),
            seed: default_seed(),
            width: default_world_dimension(),
            height: default_world_dimension(),
            generation: WorldGenConfig::default(),
        }
    }
}

/// State store configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// Snapshot automatically after writes to important categories.
    #[serde(default = "default_true")]
    pub auto_snapshot: bool,

    /// Per-subscriber buffer of the event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl StoreConfig {
    /// Options for [`chronicle_state::StateStore::with_options`].
    pub const fn options(&self) -> StoreOptions {
        StoreOptions {
            auto_snapshot: self.auto_snapshot,
            event_capacity: self.event_capacity,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            auto_snapshot: default_true(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// Persistence configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PersistenceConfig {
    /// Root directory of the JSON repository.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Number of state backups kept.
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
}

impl PersistenceConfig {
    /// Override the data directory with `CHRONICLE_DATA_DIR` when set.
    pub fn apply_env_overrides(&mut self) {
        if let Some(val) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
            self.data_dir = PathBuf::from(val);
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_backups: default_max_backups(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_world_name() -> String {
    "Chronicle".to_owned()
}

const fn default_seed() -> u64 {
    42
}

const fn default_world_dimension() -> usize {
    4
}

const fn default_true() -> bool {
    true
}

const fn default_event_capacity() -> usize {
    256
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data/world_state")
}

const fn default_max_backups() -> usize {
    10
}

fn default_log_level() -> String {
    "info".to_owned()
}
