//! World map assembly.
//!
//! [`WorldMapAssembler::generate_world_map`] generates one region per
//! grid cell in parallel, then runs sequential passes over the whole map:
//! world-scale rivers that cross region borders, per-region resource
//! yields, and points of interest.

use std::collections::BTreeMap;
use std::f64::consts::TAU;
use std::fmt;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::biome::{BiomeInfo, BiomeTable, RIVER};
use crate::cache::{DEFAULT_CACHE_CAPACITY, RegionCache, RegionKey};
use crate::error::WorldGenError;
use crate::grid::Grid;
use crate::poi::{PointOfInterest, place_points_of_interest};
use crate::river::{CHANNEL_WEIGHT, trace_descent};
use crate::terrain::{TerrainGenerator, TerrainGrid, coord};

/// Seed spacing between neighbouring regions.
pub const REGION_SEED_STRIDE: u64 = 1000;
/// Seed offset of the world river RNG relative to the world seed.
pub const RIVER_SEED_OFFSET: u64 = 42;

// ---------------------------------------------------------------------------
// TerrainType
// ---------------------------------------------------------------------------

/// Coarse terrain class of a cell, derived from its biome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerrainType {
    /// Ocean, lakes and rivers.
    Water,
    /// Open grassland.
    Plains,
    /// Woodland.
    Forest,
    /// Peaks and highlands.
    Mountain,
    /// Arid land.
    Desert,
    /// Frozen lowland.
    Tundra,
    /// Wetland.
    Swamp,
}

impl TerrainType {
    /// Lowercase identifier.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Water => "water",
            Self::Plains => "plains",
            Self::Forest => "forest",
            Self::Mountain => "mountain",
            Self::Desert => "desert",
            Self::Tundra => "tundra",
            Self::Swamp => "swamp",
        }
    }

    /// Terrain of a base biome id.
    pub fn from_biome_id(id: &str) -> Self {
        match id {
            "ocean" | "river" | "lake" => Self::Water,
            "mountain" | "mountains" | "snow_peak" | "hills" => Self::Mountain,
            "forest" | "jungle" | "taiga" => Self::Forest,
            "desert" | "savanna" => Self::Desert,
            "tundra" => Self::Tundra,
            "swamp" | "marsh" => Self::Swamp,
            _ => Self::Plains,
        }
    }

    /// Terrain of a biome. Transitions take the terrain of their first
    /// source biome.
    pub fn from_biome(biome: &BiomeInfo) -> Self {
        if biome.is_water {
            return Self::Water;
        }
        match biome.base_biomes.first() {
            Some(base) if biome.is_transition => Self::from_biome_id(base),
            _ => Self::from_biome_id(&biome.id),
        }
    }
}

impl fmt::Display for TerrainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Region
// ---------------------------------------------------------------------------

/// One generated region of the world map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Region column.
    pub x: usize,
    /// Region row.
    pub y: usize,
    /// Side length in cells.
    pub size: usize,
    /// Seed the region's terrain was generated from.
    pub seed: u64,
    /// Climate offset applied to temperature.
    pub temperature_offset: f64,
    /// Climate offset applied to moisture.
    pub moisture_offset: f64,
    /// Elevation per cell.
    pub elevation: Grid<f64>,
    /// Temperature per cell.
    pub temperature: Grid<f64>,
    /// Moisture per cell.
    pub moisture: Grid<f64>,
    /// River weight per cell.
    pub rivers: Grid<f64>,
    /// Biome id per cell.
    pub biomes: Grid<String>,
    /// Coarse terrain per cell.
    pub terrain: Grid<TerrainType>,
    /// Mean yield of each resource over the region's cells.
    pub resources: BTreeMap<String, f64>,
    /// Placed points of interest.
    pub points_of_interest: Vec<PointOfInterest>,
}

impl Region {
    /// Build a region from generated terrain.
    pub fn from_terrain(
        grid: &TerrainGrid,
        table: &BiomeTable,
        temperature_offset: f64,
        moisture_offset: f64,
    ) -> Self {
        let terrain = grid.biomes.map(|id| {
            table
                .get(id)
                .map_or_else(|| TerrainType::from_biome_id(id), TerrainType::from_biome)
        });
        let mut region = Self {
            x: grid.region_x,
            y: grid.region_y,
            size: grid.size,
            seed: grid.seed,
            temperature_offset,
            moisture_offset,
            elevation: grid.elevation.clone(),
            temperature: grid.temperature.clone(),
            moisture: grid.moisture.clone(),
            rivers: grid.rivers.clone(),
            biomes: grid.biomes.clone(),
            terrain,
            resources: BTreeMap::new(),
            points_of_interest: Vec::new(),
        };
        region.recompute_resources(table);
        region
    }

    /// Recompute [`Region::resources`] as the mean biome yield per cell.
    pub fn recompute_resources(&mut self, table: &BiomeTable) {
        let mut totals: BTreeMap<String, f64> = BTreeMap::new();
        for id in self.biomes.cells() {
            let Some(biome) = table.get(id) else {
                continue;
            };
            for (name, amount) in &biome.resources {
                *totals.entry(name.clone()).or_default() += amount;
            }
        }
        let cells = coord(self.biomes.len()).max(1.0);
        self.resources = totals
            .into_iter()
            .map(|(name, total)| (name, total / cells))
            .collect();
    }

    /// Mean elevation over the region.
    pub fn mean_elevation(&self) -> f64 {
        let cells = self.elevation.cells();
        if cells.is_empty() {
            return 0.0;
        }
        cells.iter().sum::<f64>() / coord(cells.len())
    }

    /// Number of cells per biome id.
    pub fn biome_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for id in self.biomes.cells() {
            let count: &mut usize = counts.entry(id.as_str()).or_default();
            *count = count.saturating_add(1);
        }
        counts
    }

    /// The most common biome; ties go to the smallest id.
    pub fn dominant_biome(&self) -> Option<&str> {
        let mut best: Option<(&str, usize)> = None;
        for (id, count) in self.biome_counts() {
            if best.is_none_or(|(_, top)| count > top) {
                best = Some((id, count));
            }
        }
        best.map(|(id, _)| id)
    }

    /// The most common terrain type; ties go to declaration order.
    pub fn dominant_terrain(&self) -> Option<TerrainType> {
        let mut counts: BTreeMap<TerrainType, usize> = BTreeMap::new();
        for terrain in self.terrain.cells() {
            let count = counts.entry(*terrain).or_default();
            *count = count.saturating_add(1);
        }
        let mut best: Option<(TerrainType, usize)> = None;
        for (terrain, count) in counts {
            if best.is_none_or(|(_, top)| count > top) {
                best = Some((terrain, count));
            }
        }
        best.map(|(terrain, _)| terrain)
    }

    /// Turn a cell into a river channel.
    fn mark_river(&mut self, x: usize, y: usize) {
        self.terrain.set(x, y, TerrainType::Water);
        self.biomes.set(x, y, RIVER.to_owned());
        self.rivers.set(x, y, CHANNEL_WEIGHT);
    }
}

// ---------------------------------------------------------------------------
// WorldMap
// ---------------------------------------------------------------------------

/// A `width x height` grid of regions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldMap {
    /// Regions per row.
    pub width: usize,
    /// Regions per column.
    pub height: usize,
    /// World seed.
    pub seed: u64,
    /// Side length of every region in cells.
    pub region_size: usize,
    /// Regions in row-major order.
    pub regions: Vec<Region>,
    /// World-scale river paths in global cell coordinates.
    pub rivers: Vec<Vec<(usize, usize)>>,
}

impl WorldMap {
    /// Borrow the region at `(x, y)`.
    pub fn region(&self, x: usize, y: usize) -> Option<&Region> {
        self.regions.get(self.region_index(x, y)?)
    }

    fn region_index(&self, x: usize, y: usize) -> Option<usize> {
        if x >= self.width || y >= self.height {
            return None;
        }
        y.checked_mul(self.width)?.checked_add(x)
    }

    /// Width of the world in cells.
    pub const fn cell_width(&self) -> usize {
        self.width.saturating_mul(self.region_size)
    }

    /// Height of the world in cells.
    pub const fn cell_height(&self) -> usize {
        self.height.saturating_mul(self.region_size)
    }

    /// Split a global cell coordinate into region index and local cell.
    fn locate(&self, gx: usize, gy: usize) -> Option<(usize, usize, usize)> {
        let rx = gx.checked_div(self.region_size)?;
        let ry = gy.checked_div(self.region_size)?;
        let cx = gx.checked_rem(self.region_size)?;
        let cy = gy.checked_rem(self.region_size)?;
        Some((self.region_index(rx, ry)?, cx, cy))
    }

    /// Elevation at a global cell coordinate.
    pub fn elevation_at(&self, gx: usize, gy: usize) -> Option<f64> {
        let (index, cx, cy) = self.locate(gx, gy)?;
        self.regions.get(index)?.elevation.get(cx, cy).copied()
    }

    /// Biome id at a global cell coordinate.
    pub fn biome_at(&self, gx: usize, gy: usize) -> Option<&str> {
        let (index, cx, cy) = self.locate(gx, gy)?;
        self.regions
            .get(index)?
            .biomes
            .get(cx, cy)
            .map(String::as_str)
    }

    /// Terrain at a global cell coordinate.
    pub fn terrain_at(&self, gx: usize, gy: usize) -> Option<TerrainType> {
        let (index, cx, cy) = self.locate(gx, gy)?;
        self.regions.get(index)?.terrain.get(cx, cy).copied()
    }

    /// Every point of interest with the region holding it.
    pub fn points_of_interest(&self) -> impl Iterator<Item = (&Region, &PointOfInterest)> + '_ {
        self.regions
            .iter()
            .flat_map(|region| region.points_of_interest.iter().map(move |poi| (region, poi)))
    }

    fn mark_river(&mut self, gx: usize, gy: usize) {
        let Some((index, cx, cy)) = self.locate(gx, gy) else {
            return;
        };
        if let Some(region) = self.regions.get_mut(index) {
            region.mark_river(cx, cy);
        }
    }
}

// ---------------------------------------------------------------------------
// Assembler
// ---------------------------------------------------------------------------

/// World-level generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldGenConfig {
    /// Side length of every region in cells.
    pub region_size: usize,
    /// Strength of the latitude and longitude temperature offsets.
    pub temperature_variation: f64,
    /// World rivers end at or below this elevation.
    pub ocean_threshold: f64,
    /// Upper bound on world-scale rivers.
    pub max_rivers: usize,
    /// Mountain cells per region considered as river sources.
    pub sources_per_region: usize,
    /// Minimum number of points of interest.
    pub min_points_of_interest: usize,
    /// Regions kept in the generation cache.
    pub cache_capacity: usize,
}

impl Default for WorldGenConfig {
    fn default() -> Self {
        Self {
            region_size: 32,
            temperature_variation: 0.3,
            ocean_threshold: 0.2,
            max_rivers: 5,
            sources_per_region: 2,
            min_points_of_interest: 5,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl WorldGenConfig {
    /// Check the parameters are usable.
    pub fn validate(&self) -> Result<(), WorldGenError> {
        if self.region_size == 0 {
            return Err(WorldGenError::InvalidConfig(
                "region_size must be positive".to_owned(),
            ));
        }
        if !self.temperature_variation.is_finite() {
            return Err(WorldGenError::InvalidConfig(
                "temperature_variation must be finite".to_owned(),
            ));
        }
        if !(0.0..=1.0).contains(&self.ocean_threshold) {
            return Err(WorldGenError::InvalidConfig(format!(
                "ocean_threshold must be within [0, 1], got {}",
                self.ocean_threshold
            )));
        }
        Ok(())
    }
}

/// Generates regions and stitches them into a [`WorldMap`].
#[derive(Debug)]
pub struct WorldMapAssembler {
    generator: TerrainGenerator,
    cache: RegionCache,
    config: WorldGenConfig,
}

impl WorldMapAssembler {
    /// Create an assembler around a terrain generator.
    pub fn new(generator: TerrainGenerator, config: WorldGenConfig) -> Result<Self, WorldGenError> {
        config.validate()?;
        Ok(Self {
            generator,
            cache: RegionCache::new(config.cache_capacity),
            config,
        })
    }

    /// An assembler with default terrain and world settings.
    pub fn with_defaults() -> Result<Self, WorldGenError> {
        Self::new(TerrainGenerator::with_defaults()?, WorldGenConfig::default())
    }

    /// The terrain generator.
    pub const fn generator(&self) -> &TerrainGenerator {
        &self.generator
    }

    /// The region cache.
    pub const fn cache(&self) -> &RegionCache {
        &self.cache
    }

    /// World-level parameters.
    pub const fn config(&self) -> &WorldGenConfig {
        &self.config
    }

    /// Seed of region `(x, y)` in a world `width` regions wide.
    pub fn region_seed(seed: u64, x: usize, y: usize, width: usize) -> u64 {
        let index = y.saturating_mul(width).saturating_add(x);
        let index = u64::try_from(index).unwrap_or(u64::MAX);
        seed.wrapping_add(index.wrapping_mul(REGION_SEED_STRIDE))
    }

    /// Temperature and moisture offsets of region `(x, y)`.
    ///
    /// Temperature falls off quadratically away from the middle row and
    /// varies gently along a sine wave across columns.
    pub fn climate_offsets(&self, x: usize, y: usize, width: usize, height: usize) -> (f64, f64) {
        let variation = self.config.temperature_variation;
        let xf = coord(x) / coord(width.max(1));
        let yf = coord(y) / coord(height.max(1));
        let latitude = -(yf - 0.5).powi(2) * 4.0 * variation;
        let longitude = (TAU * xf).sin() * variation * 0.3;
        (latitude + longitude, 0.0)
    }

    /// Generate region `(x, y)` of a `width x height` world.
    pub fn generate_region(
        &self,
        x: usize,
        y: usize,
        width: usize,
        height: usize,
        seed: u64,
    ) -> Result<Region, WorldGenError> {
        if x >= width || y >= height {
            return Err(WorldGenError::RegionOutOfBounds { x, y });
        }
        let size = self.config.region_size;
        let region_seed = Self::region_seed(seed, x, y, width);
        let (t_off, m_off) = self.climate_offsets(x, y, width, height);
        let key = RegionKey::new(x, y, size, region_seed, t_off, m_off);
        let grid = self.cache.get_or_generate(key, || {
            self.generator
                .generate_terrain(x, y, size, region_seed, t_off, m_off)
        })?;
        Ok(Region::from_terrain(
            &grid,
            self.generator.biomes(),
            t_off,
            m_off,
        ))
    }

    /// Generate a complete `width x height` world map.
    pub fn generate_world_map(
        &self,
        width: usize,
        height: usize,
        seed: u64,
    ) -> Result<WorldMap, WorldGenError> {
        let count = width
            .checked_mul(height)
            .filter(|&n| n > 0)
            .ok_or(WorldGenError::InvalidDimensions { width, height })?;

        let regions = (0..count)
            .into_par_iter()
            .map(|i| {
                let x = i.checked_rem(width).unwrap_or(0);
                let y = i.checked_div(width).unwrap_or(0);
                self.generate_region(x, y, width, height, seed)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut map = WorldMap {
            width,
            height,
            seed,
            region_size: self.config.region_size,
            regions,
            rivers: Vec::new(),
        };

        self.connect_rivers(&mut map);
        let table = self.generator.biomes();
        for region in &mut map.regions {
            region.recompute_resources(table);
        }
        let placed = place_points_of_interest(
            &mut map.regions,
            seed,
            self.config.min_points_of_interest,
        );

        tracing::info!(
            width,
            height,
            seed,
            regions = map.regions.len(),
            rivers = map.rivers.len(),
            points_of_interest = placed,
            "World map generated"
        );
        Ok(map)
    }

    /// Trace world-scale rivers from mountain sources across region
    /// borders and carve them into the regions.
    fn connect_rivers(&self, map: &mut WorldMap) {
        let mut rng = ChaCha8Rng::seed_from_u64(map.seed.wrapping_add(RIVER_SEED_OFFSET));
        let wanted = (map.width.saturating_add(map.height) / 3)
            .min(self.config.max_rivers)
            .max(1);
        let cell_width = map.cell_width();
        let cell_height = map.cell_height();
        let size = map.region_size;

        let mut sources: Vec<(usize, usize)> = Vec::new();
        for region in &map.regions {
            let origin = (region.x.saturating_mul(size), region.y.saturating_mul(size));
            sources.extend(
                sample_cells(
                    &region.terrain,
                    TerrainType::Mountain,
                    self.config.sources_per_region,
                    &mut rng,
                )
                .into_iter()
                .map(|(cx, cy)| (origin.0.saturating_add(cx), origin.1.saturating_add(cy))),
            );
        }
        let missing = wanted.saturating_sub(sources.len());
        sources.extend((0..missing).map(|_| {
            (
                rng.random_range(0..cell_width),
                rng.random_range(0..cell_height),
            )
        }));

        let amount = wanted.min(sources.len());
        let max_steps = cell_width.saturating_add(cell_height);
        let sea_level = Some(self.config.ocean_threshold);
        let paths: Vec<Vec<(usize, usize)>> =
            rand::seq::index::sample(&mut rng, sources.len(), amount)
                .iter()
                .filter_map(|i| sources.get(i).copied())
                .map(|start| {
                    trace_descent(cell_width, cell_height, start, max_steps, sea_level, |gx, gy| {
                        map.elevation_at(gx, gy)
                    })
                })
                .collect();

        for path in &paths {
            for &(gx, gy) in path {
                map.mark_river(gx, gy);
            }
        }
        tracing::debug!(rivers = paths.len(), "World rivers traced");
        map.rivers = paths;
    }
}

/// Up to `amount` distinct cells of `kind`, drawn at random.
fn sample_cells(
    terrain: &Grid<TerrainType>,
    kind: TerrainType,
    amount: usize,
    rng: &mut ChaCha8Rng,
) -> Vec<(usize, usize)> {
    let matching: Vec<(usize, usize)> = terrain
        .iter()
        .filter(|&(_, _, t)| *t == kind)
        .map(|(x, y, _)| (x, y))
        .collect();
    let amount = amount.min(matching.len());
    rand::seq::index::sample(rng, matching.len(), amount)
        .iter()
        .filter_map(|i| matching.get(i).copied())
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn small_assembler() -> WorldMapAssembler {
        WorldMapAssembler::new(
            TerrainGenerator::with_defaults().unwrap(),
            WorldGenConfig {
                region_size: 8,
                ..WorldGenConfig::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn terrain_from_biome_ids() {
        assert_eq!(TerrainType::from_biome_id("ocean"), TerrainType::Water);
        assert_eq!(TerrainType::from_biome_id("snow_peak"), TerrainType::Mountain);
        assert_eq!(TerrainType::from_biome_id("forest"), TerrainType::Forest);
        assert_eq!(TerrainType::from_biome_id("savanna"), TerrainType::Desert);
        assert_eq!(TerrainType::from_biome_id("unknown"), TerrainType::Plains);

        let table = BiomeTable::with_defaults().unwrap();
        let transition = table.get("transition_plains_forest").unwrap();
        assert_eq!(TerrainType::from_biome(transition), TerrainType::Plains);
        assert_eq!(
            TerrainType::from_biome(table.get("river").unwrap()),
            TerrainType::Water
        );
    }

    #[test]
    fn region_seeds_are_spaced() {
        assert_eq!(WorldMapAssembler::region_seed(42, 0, 0, 4), 42);
        assert_eq!(WorldMapAssembler::region_seed(42, 1, 0, 4), 1042);
        assert_eq!(WorldMapAssembler::region_seed(42, 0, 1, 4), 4042);
    }

    #[test]
    fn climate_is_warmest_mid_world() {
        let assembler = small_assembler();
        let (middle, _) = assembler.climate_offsets(0, 2, 4, 4);
        let (edge, _) = assembler.climate_offsets(0, 0, 4, 4);
        assert!(middle.abs() < 1e-12);
        assert!(edge < middle);
    }

    #[test]
    fn invalid_dimensions_and_bounds() {
        let assembler = small_assembler();
        assert!(matches!(
            assembler.generate_world_map(0, 3, 1),
            Err(WorldGenError::InvalidDimensions { width: 0, height: 3 })
        ));
        assert_eq!(
            assembler.generate_region(4, 0, 4, 4, 1),
            Err(WorldGenError::RegionOutOfBounds { x: 4, y: 0 })
        );
        assert!(
            WorldMapAssembler::new(
                TerrainGenerator::with_defaults().unwrap(),
                WorldGenConfig {
                    region_size: 0,
                    ..WorldGenConfig::default()
                }
            )
            .is_err()
        );
    }

    #[test]
    fn resources_are_mean_yields() {
        let table = BiomeTable::with_defaults().unwrap();
        let generator = TerrainGenerator::with_defaults().unwrap();
        let mut grid = generator.generate_terrain(0, 0, 2, 1, 0.0, 0.0).unwrap();
        grid.biomes = Grid::from_fn(2, 2, |x, _| if x == 0 { "forest" } else { "plains" }.to_owned());
        let region = Region::from_terrain(&grid, &table, 0.0, 0.0);
        assert!((region.resources["wood"] - 0.45).abs() < 1e-12);
        assert!((region.resources["grain"] - 0.4).abs() < 1e-12);
        assert_eq!(region.dominant_biome(), Some("forest"));
        assert_eq!(region.dominant_terrain(), Some(TerrainType::Plains));
    }

    #[test]
    fn mountain_sources_are_sampled_not_scanned() {
        let terrain = Grid::new(8, 8, TerrainType::Mountain);
        let picks: Vec<Vec<(usize, usize)>> = (0..10)
            .map(|seed| sample_cells(&terrain, TerrainType::Mountain, 2, &mut ChaCha8Rng::seed_from_u64(seed)))
            .collect();
        assert!(picks.iter().all(|p| p.len() == 2 && p[0] != p[1]));
        assert!(picks.iter().any(|p| p.as_slice() != [(0, 0), (1, 0)]));

        let mixed = Grid::from_fn(4, 1, |x, _| {
            if x == 2 { TerrainType::Mountain } else { TerrainType::Plains }
        });
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(sample_cells(&mixed, TerrainType::Mountain, 2, &mut rng), vec![(2, 0)]);
    }

    #[test]
    fn missing_sources_are_topped_up() {
        // A 3x3 world asks for two rivers whether or not it has mountains.
        let assembler = small_assembler();
        for seed in 0..4 {
            let map = assembler.generate_world_map(3, 3, seed).unwrap();
            assert_eq!(map.rivers.len(), 2, "seed {seed}");
        }
    }
}
