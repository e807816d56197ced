//! Configuration and world seeding for Chronicle.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `chronicle-config.yaml` into
//!   strongly-typed structs.
//! - [`seed`] -- Projection of a generated world map into state store
//!   facts.

pub mod config;
pub mod seed;

// Re-export primary types at crate root.
pub use config::{
    ChronicleConfig, ConfigError, LoggingConfig, PersistenceConfig, StoreConfig, WorldConfig,
};
pub use seed::{compass_region, region_key, seed_store};
