//! Per-region terrain generation.
//!
//! [`TerrainGenerator::generate_terrain`] is a pure function of its
//! arguments: elevation, temperature and moisture come from seeded noise
//! fields, rivers from a seeded ChaCha RNG, and biomes from the shared
//! immutable [`BiomeTable`]. Nothing is cached here; see
//! [`crate::cache::RegionCache`] for memoization.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::biome::{BiomeTable, MOUNTAIN, OCEAN, RIVER, SNOW_PEAK};
use crate::error::WorldGenError;
use crate::grid::Grid;
use crate::noise::{
    NoiseField, NoiseLayer, default_elevation_layers, default_moisture_layers,
    default_temperature_layers, fold_seed,
};
use crate::river::generate_rivers;

/// Moisture added to a river cell itself.
const RIVER_MOISTURE: f64 = 0.3;
/// Moisture added at distance zero from a river, fading to nothing at
/// [`MOISTURE_RADIUS`].
const NEARBY_MOISTURE: f64 = 0.2;
/// Euclidean reach of the moisture boost around river cells.
const MOISTURE_RADIUS: i32 = 2;

/// Tunable parameters for terrain generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    /// Layers of the elevation field.
    pub elevation_layers: Vec<NoiseLayer>,
    /// Layers of the moisture field.
    pub moisture_layers: Vec<NoiseLayer>,
    /// Layers of the temperature field.
    pub temperature_layers: Vec<NoiseLayer>,
    /// Cells below this elevation are ocean.
    pub ocean_threshold: f64,
    /// Cells above this elevation are mountain or snow peak.
    pub peak_threshold: f64,
    /// Peaks colder than this are snow peaks.
    pub snow_temperature: f64,
    /// Cells above this elevation may source rivers.
    pub mountain_threshold: f64,
    /// Chance per river step of widening into bank cells.
    pub bank_chance: f64,
    /// River weight of a bank cell.
    pub bank_weight: f64,
    /// Height of the world in cells; temperature peaks at its middle row.
    pub world_span: f64,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            elevation_layers: default_elevation_layers(),
            moisture_layers: default_moisture_layers(),
            temperature_layers: default_temperature_layers(),
            ocean_threshold: 0.2,
            peak_threshold: 0.85,
            snow_temperature: 0.2,
            mountain_threshold: 0.75,
            bank_chance: 0.3,
            bank_weight: 0.7,
            world_span: 1000.0,
        }
    }
}

impl TerrainConfig {
    /// Check thresholds and probabilities are in range.
    pub fn validate(&self) -> Result<(), WorldGenError> {
        let unit = [
            ("ocean_threshold", self.ocean_threshold),
            ("peak_threshold", self.peak_threshold),
            ("snow_temperature", self.snow_temperature),
            ("mountain_threshold", self.mountain_threshold),
            ("bank_chance", self.bank_chance),
            ("bank_weight", self.bank_weight),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(WorldGenError::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.ocean_threshold >= self.peak_threshold {
            return Err(WorldGenError::InvalidConfig(
                "ocean_threshold must be below peak_threshold".to_owned(),
            ));
        }
        if !(self.world_span.is_finite() && self.world_span > 0.0) {
            return Err(WorldGenError::InvalidConfig(format!(
                "world_span must be positive, got {}",
                self.world_span
            )));
        }
        Ok(())
    }
}

/// Generated grids for one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerrainGrid {
    /// Region column.
    pub region_x: usize,
    /// Region row.
    pub region_y: usize,
    /// Side length in cells.
    pub size: usize,
    /// Seed the region was generated from.
    pub seed: u64,
    /// Elevation in `[0, 1]`.
    pub elevation: Grid<f64>,
    /// Temperature in `[0, 1]`.
    pub temperature: Grid<f64>,
    /// Moisture in `[0, 1]`.
    pub moisture: Grid<f64>,
    /// River weight: 0 for dry land, bank weight, or 1 for channel.
    pub rivers: Grid<f64>,
    /// Biome id per cell.
    pub biomes: Grid<String>,
}

/// Convert a cell coordinate to `f64` without a lossy cast.
pub(crate) fn coord(value: usize) -> f64 {
    u32::try_from(value).map_or(f64::from(u32::MAX), f64::from)
}

/// Produces [`TerrainGrid`]s from a shared biome table and noise fields.
#[derive(Debug, Clone)]
pub struct TerrainGenerator {
    config: TerrainConfig,
    biomes: Arc<BiomeTable>,
    elevation: NoiseField,
    moisture: NoiseField,
    temperature: NoiseField,
}

impl TerrainGenerator {
    /// Build a generator, validating the config and its noise layers.
    pub fn new(config: TerrainConfig, biomes: Arc<BiomeTable>) -> Result<Self, WorldGenError> {
        config.validate()?;
        let field = |layers: &[NoiseLayer]| {
            NoiseField::new(layers.to_vec()).map_err(WorldGenError::InvalidConfig)
        };
        Ok(Self {
            elevation: field(&config.elevation_layers)?,
            moisture: field(&config.moisture_layers)?,
            temperature: field(&config.temperature_layers)?,
            config,
            biomes,
        })
    }

    /// A generator with the default config and biome table.
    pub fn with_defaults() -> Result<Self, WorldGenError> {
        Self::new(
            TerrainConfig::default(),
            Arc::new(BiomeTable::with_defaults()?),
        )
    }

    /// The generation parameters.
    pub const fn config(&self) -> &TerrainConfig {
        &self.config
    }

    /// The shared biome table.
    pub fn biomes(&self) -> &Arc<BiomeTable> {
        &self.biomes
    }

    /// Temperature multiplier for a world row: 1.0 at the middle of the
    /// world, falling to 0.5 at its edges.
    pub fn latitude_factor(&self, world_y: f64) -> f64 {
        let half = self.config.world_span / 2.0;
        (1.0 - 0.5 * (world_y - half).abs() / half).clamp(0.0, 1.0)
    }

    /// Classify one cell.
    ///
    /// Rivers win, then ocean, then peaks (snow when cold enough); every
    /// other cell goes to the best-fitting land biome.
    pub fn classify(&self, elevation: f64, temperature: f64, moisture: f64, river: bool) -> &str {
        if river {
            RIVER
        } else if elevation < self.config.ocean_threshold {
            OCEAN
        } else if elevation > self.config.peak_threshold {
            if temperature < self.config.snow_temperature {
                SNOW_PEAK
            } else {
                MOUNTAIN
            }
        } else {
            self.biomes.best_match(temperature, moisture, elevation)
        }
    }

    /// Generate the terrain of region `(region_x, region_y)`.
    ///
    /// Identical arguments always yield identical grids.
    pub fn generate_terrain(
        &self,
        region_x: usize,
        region_y: usize,
        size: usize,
        seed: u64,
        temperature_offset: f64,
        moisture_offset: f64,
    ) -> Result<TerrainGrid, WorldGenError> {
        if size == 0 {
            return Err(WorldGenError::InvalidDimensions {
                width: size,
                height: size,
            });
        }
        if !(temperature_offset.is_finite() && moisture_offset.is_finite()) {
            return Err(WorldGenError::InvalidConfig(
                "climate offsets must be finite".to_owned(),
            ));
        }

        let noise_seed = fold_seed(seed);
        let origin_x = coord(region_x) * coord(size);
        let origin_y = coord(region_y) * coord(size);
        let world = |x: usize, y: usize| (origin_x + coord(x), origin_y + coord(y));

        let elevation = Grid::from_fn(size, size, |x, y| {
            let (wx, wy) = world(x, y);
            self.elevation.value(wx, wy, noise_seed)
        });

        let rivers = generate_rivers(&elevation, seed, &self.config);

        let temperature = Grid::from_fn(size, size, |x, y| {
            let (wx, wy) = world(x, y);
            let base = self.temperature.value(wx, wy, noise_seed);
            let height = elevation.get(x, y).copied().unwrap_or(0.0);
            let cooled = base * height.mul_add(-0.5, 1.0) * self.latitude_factor(wy);
            (cooled + temperature_offset).clamp(0.0, 1.0)
        });

        let mut moisture = Grid::from_fn(size, size, |x, y| {
            let (wx, wy) = world(x, y);
            (self.moisture.value(wx, wy, noise_seed) + moisture_offset).clamp(0.0, 1.0)
        });
        apply_river_moisture(&mut moisture, &rivers);

        let biomes = Grid::from_fn(size, size, |x, y| {
            let e = elevation.get(x, y).copied().unwrap_or(0.0);
            let t = temperature.get(x, y).copied().unwrap_or(0.0);
            let m = moisture.get(x, y).copied().unwrap_or(0.0);
            let river = rivers.get(x, y).is_some_and(|&w| w > 0.0);
            self.classify(e, t, m, river).to_owned()
        });

        tracing::debug!(region_x, region_y, size, seed, "Region terrain generated");

        Ok(TerrainGrid {
            region_x,
            region_y,
            size,
            seed,
            elevation,
            temperature,
            moisture,
            rivers,
            biomes,
        })
    }
}

/// Raise moisture on and around river cells, capped at 1.0.
fn apply_river_moisture(moisture: &mut Grid<f64>, rivers: &Grid<f64>) {
    let wet: Vec<(usize, usize)> = rivers
        .iter()
        .filter(|&(_, _, &w)| w > 0.0)
        .map(|(x, y, _)| (x, y))
        .collect();

    let mut add = |x: usize, y: usize, amount: f64| {
        if let Some(cell) = moisture.get_mut(x, y) {
            *cell = (*cell + amount).min(1.0);
        }
    };

    for (x, y) in wet {
        add(x, y, RIVER_MOISTURE);
        for dy in -MOISTURE_RADIUS..=MOISTURE_RADIUS {
            for dx in -MOISTURE_RADIUS..=MOISTURE_RADIUS {
                let distance = f64::from(dx).hypot(f64::from(dy));
                let radius = f64::from(MOISTURE_RADIUS);
                if distance > radius {
                    continue;
                }
                let target = isize::try_from(dx)
                    .ok()
                    .zip(isize::try_from(dy).ok())
                    .and_then(|(dx, dy)| Some((x.checked_add_signed(dx)?, y.checked_add_signed(dy)?)));
                if let Some((nx, ny)) = target {
                    add(nx, ny, NEARBY_MOISTURE * (1.0 - distance / radius));
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(TerrainConfig::default().validate().is_ok());
        let bad = TerrainConfig {
            bank_chance: 1.5,
            ..TerrainConfig::default()
        };
        assert!(bad.validate().is_err());
        let inverted = TerrainConfig {
            ocean_threshold: 0.9,
            ..TerrainConfig::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn classification_priority() {
        let generator = TerrainGenerator::with_defaults().unwrap();
        assert_eq!(generator.classify(0.1, 0.5, 0.5, true), RIVER);
        assert_eq!(generator.classify(0.1, 0.5, 0.5, false), OCEAN);
        assert_eq!(generator.classify(0.9, 0.1, 0.5, false), SNOW_PEAK);
        assert_eq!(generator.classify(0.9, 0.5, 0.5, false), MOUNTAIN);
        assert_eq!(generator.classify(0.5, 0.85, 0.1, false), "desert");
    }

    #[test]
    fn latitude_peaks_mid_world() {
        let generator = TerrainGenerator::with_defaults().unwrap();
        assert!((generator.latitude_factor(500.0) - 1.0).abs() < 1e-12);
        assert!((generator.latitude_factor(0.0) - 0.5).abs() < 1e-12);
        assert!((generator.latitude_factor(1000.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn river_moisture_boost_is_capped() {
        let mut moisture = Grid::new(5, 5, 0.5);
        let mut rivers = Grid::new(5, 5, 0.0);
        rivers.set(2, 2, 1.0);
        apply_river_moisture(&mut moisture, &rivers);
        // Own cell: +0.3 then +0.2 at distance zero.
        assert!((moisture.get(2, 2).unwrap() - 1.0).abs() < 1e-12);
        // Distance one: +0.1.
        assert!((moisture.get(3, 2).unwrap() - 0.6).abs() < 1e-12);
        // Distance two: nothing.
        assert!((moisture.get(4, 2).unwrap() - 0.5).abs() < 1e-12);
        // Corner, distance sqrt(8): untouched.
        assert!((moisture.get(0, 0).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn zero_size_is_rejected() {
        let generator = TerrainGenerator::with_defaults().unwrap();
        assert!(matches!(
            generator.generate_terrain(0, 0, 0, 1, 0.0, 0.0),
            Err(WorldGenError::InvalidDimensions { .. })
        ));
        assert!(generator.generate_terrain(0, 0, 4, 1, f64::NAN, 0.0).is_err());
    }

    #[test]
    fn grids_are_in_unit_range() {
        let generator = TerrainGenerator::with_defaults().unwrap();
        let terrain = generator.generate_terrain(1, 2, 16, 9, 0.1, -0.1).unwrap();
        for grid in [&terrain.elevation, &terrain.temperature, &terrain.moisture] {
            assert_eq!(grid.len(), 256);
            assert!(grid.cells().iter().all(|v| (0.0..=1.0).contains(v)));
        }
        let table = generator.biomes();
        assert!(terrain.biomes.cells().iter().all(|id| table.get(id).is_some()));
    }
}
