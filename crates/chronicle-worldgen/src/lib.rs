//! Deterministic procedural terrain and world map generation for Chronicle.
//!
//! Terrain is a pure function of a seed and region coordinates: the same
//! inputs always produce bit-identical grids, on any thread and in any
//! order. World assembly generates regions in parallel and then runs a few
//! sequential passes over the finished map.
//!
//! # Modules
//!
//! - [`noise`] -- Hash-based value noise, fractal octaves, weighted
//!   [`NoiseField`]s.
//! - [`biome`] -- [`BiomeInfo`] definitions and the immutable
//!   [`BiomeTable`], including synthesized transition biomes.
//! - [`terrain`] -- [`TerrainGenerator`]: elevation, climate, rivers and
//!   biome classification for one region.
//! - [`river`] -- Downhill river tracing shared by regions and the world.
//! - [`cache`] -- Bounded LRU [`RegionCache`] of generated regions.
//! - [`world_map`] -- [`WorldMapAssembler`], [`Region`] and [`WorldMap`].
//! - [`poi`] -- Points of interest with terrain preferences.
//! - [`grid`] -- Bounds-checked row-major [`Grid`].
//! - [`error`] -- [`WorldGenError`].
//!
//! # Usage
//!
//! ```
//! use chronicle_worldgen::{TerrainGenerator, WorldGenConfig, WorldGenError, WorldMapAssembler};
//!
//! let config = WorldGenConfig { region_size: 8, ..WorldGenConfig::default() };
//! let assembler = WorldMapAssembler::new(TerrainGenerator::with_defaults()?, config)?;
//! let map = assembler.generate_world_map(2, 2, 42)?;
//! assert_eq!(map.regions.len(), 4);
//! assert_eq!(map, assembler.generate_world_map(2, 2, 42)?);
//! # Ok::<(), WorldGenError>(())
//! ```

pub mod biome;
pub mod cache;
pub mod error;
pub mod grid;
pub mod noise;
pub mod poi;
pub mod river;
pub mod terrain;
pub mod world_map;

// Re-export primary types at crate root.
pub use biome::{BiomeInfo, BiomeTable, Rgb, ValueRange};
pub use cache::{CacheStats, RegionCache, RegionKey};
pub use error::WorldGenError;
pub use grid::Grid;
pub use noise::{NoiseField, NoiseLayer};
pub use poi::{PoiKind, PointOfInterest};
pub use terrain::{TerrainConfig, TerrainGenerator, TerrainGrid};
pub use world_map::{Region, TerrainType, WorldGenConfig, WorldMap, WorldMapAssembler};
