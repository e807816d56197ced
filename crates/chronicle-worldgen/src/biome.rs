//! Biome definitions and the immutable [`BiomeTable`].
//!
//! The table is built once from a list of base biomes. Building it
//! validates the definitions and synthesizes a transition biome for every
//! pair of ordinary land biomes whose climate ranges overlap on at least
//! two axes. After construction the table never changes; generators share
//! it behind an `Arc`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::WorldGenError;

/// Biome id assigned to river cells.
pub const RIVER: &str = "river";
/// Biome id assigned below the ocean threshold.
pub const OCEAN: &str = "ocean";
/// Biome id for high, temperate peaks.
pub const MOUNTAIN: &str = "mountain";
/// Biome id for high, frozen peaks.
pub const SNOW_PEAK: &str = "snow_peak";

/// Biomes picked by explicit classification rules rather than scoring.
/// They never take part in transitions either.
pub const RESERVED_BIOMES: [&str; 4] = [OCEAN, RIVER, MOUNTAIN, SNOW_PEAK];

/// Fallback ids used when no biome can be scored.
const FALLBACK_BIOMES: [&str; 3] = ["desert", "forest", "plains"];

const TEMPERATURE_WEIGHT: f64 = 0.4;
const MOISTURE_WEIGHT: f64 = 0.4;
const ELEVATION_WEIGHT: f64 = 0.2;

/// Maximum penalty for sitting at the very edge of a range.
const MID_RANGE_PENALTY: f64 = 0.2;
/// Score lost per unit of distance outside a range.
const OUT_OF_RANGE_DECAY: f64 = 2.0;

// ---------------------------------------------------------------------------
// Ranges and colors
// ---------------------------------------------------------------------------

/// Inclusive `[min, max]` interval on one climate axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    /// Lower bound.
    pub min: f64,
    /// Upper bound.
    pub max: f64,
}

impl ValueRange {
    /// Create a range.
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Whether `value` lies inside the range.
    pub fn contains(self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Whether two ranges share at least one point.
    pub fn overlaps(self, other: Self) -> bool {
        self.min <= other.max && other.min <= self.max
    }

    /// The shared part of two overlapping ranges.
    pub fn intersect(self, other: Self) -> Self {
        Self::new(self.min.max(other.min), self.max.min(other.max))
    }

    /// Midpoint of the range.
    pub fn mid(self) -> f64 {
        (self.min + self.max) / 2.0
    }

    /// Width of the range.
    pub fn span(self) -> f64 {
        self.max - self.min
    }

    /// How well `value` fits this range, in `[0, 1]`.
    ///
    /// Inside the range the score is 1.0 at the midpoint and drops by at
    /// most 0.2 towards the edges. Below `min` it decays linearly with
    /// `min - value`, otherwise with `value - max`. Inverted transition
    /// ranges therefore score every value as out of range.
    pub fn fit(self, value: f64) -> f64 {
        if self.contains(value) {
            let span = self.span();
            if span <= 0.0 {
                return 1.0;
            }
            1.0 - (value - self.mid()).abs() / span * MID_RANGE_PENALTY
        } else {
            let distance = if value < self.min {
                self.min - value
            } else {
                value - self.max
            };
            distance.mul_add(-OUT_OF_RANGE_DECAY, 1.0).max(0.0)
        }
    }
}

/// An RGB display color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
}

impl Rgb {
    /// Create a color from its channels.
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Per-channel average of two colors, rounded down.
    pub fn blend(self, other: Self) -> Self {
        let avg = |a: u8, b: u8| {
            let sum = u16::from(a).saturating_add(u16::from(b));
            u8::try_from(sum / 2).unwrap_or(u8::MAX)
        };
        Self::new(
            avg(self.r, other.r),
            avg(self.g, other.g),
            avg(self.b, other.b),
        )
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

// ---------------------------------------------------------------------------
// BiomeInfo
// ---------------------------------------------------------------------------

/// Static description of one biome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiomeInfo {
    /// Stable identifier, e.g. `"forest"`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Temperature band the biome favours.
    pub temperature_range: ValueRange,
    /// Moisture band the biome favours.
    pub moisture_range: ValueRange,
    /// Elevation band the biome favours.
    pub elevation_range: ValueRange,
    /// Descriptive features.
    pub features: BTreeSet<String>,
    /// Resource name to yield in `[0, 1]`.
    pub resources: BTreeMap<String, f64>,
    /// Map color.
    pub color: Rgb,
    /// Whether cells of this biome are water.
    pub is_water: bool,
    /// Whether this biome was synthesized between two base biomes.
    pub is_transition: bool,
    /// Source biome ids of a transition; empty for base biomes.
    pub base_biomes: Vec<String>,
}

impl BiomeInfo {
    /// A land biome with the given climate ranges.
    pub fn land(
        id: &str,
        name: &str,
        ranges: [(f64, f64); 3],
        features: &[&str],
        resources: &[(&str, f64)],
        color: Rgb,
    ) -> Self {
        let [(t0, t1), (m0, m1), (e0, e1)] = ranges;
        Self {
            id: id.to_owned(),
            name: name.to_owned(),
            temperature_range: ValueRange::new(t0, t1),
            moisture_range: ValueRange::new(m0, m1),
            elevation_range: ValueRange::new(e0, e1),
            features: features.iter().map(|&f| f.to_owned()).collect(),
            resources: resources
                .iter()
                .map(|&(name, amount)| (name.to_owned(), amount))
                .collect(),
            color,
            is_water: false,
            is_transition: false,
            base_biomes: Vec::new(),
        }
    }

    /// Mark the biome as water.
    #[must_use]
    pub fn water(mut self) -> Self {
        self.is_water = true;
        self
    }

    /// Weighted range fit for a climate sample.
    pub fn score(&self, temperature: f64, moisture: f64, elevation: f64) -> f64 {
        self.temperature_range.fit(temperature) * TEMPERATURE_WEIGHT
            + self.moisture_range.fit(moisture) * MOISTURE_WEIGHT
            + self.elevation_range.fit(elevation) * ELEVATION_WEIGHT
    }

    fn ranges(&self) -> [ValueRange; 3] {
        [
            self.temperature_range,
            self.moisture_range,
            self.elevation_range,
        ]
    }

    /// Blend two biomes into a transition, if their ranges overlap on at
    /// least two of the three axes.
    pub fn transition_with(&self, other: &Self) -> Option<Self> {
        let overlapping = self
            .ranges()
            .iter()
            .zip(other.ranges())
            .filter(|(a, b)| a.overlaps(*b))
            .count();
        if overlapping < 2 {
            return None;
        }

        let mut resources = self.resources.clone();
        for (name, amount) in &other.resources {
            resources
                .entry(name.clone())
                .and_modify(|existing| *existing = (*existing + amount) / 2.0)
                .or_insert(*amount);
        }

        Some(Self {
            id: format!("transition_{}_{}", self.id, other.id),
            name: format!("{}-{} Transition", self.name, other.name),
            temperature_range: self.temperature_range.intersect(other.temperature_range),
            moisture_range: self.moisture_range.intersect(other.moisture_range),
            elevation_range: self.elevation_range.intersect(other.elevation_range),
            features: self.features.union(&other.features).cloned().collect(),
            resources,
            color: self.color.blend(other.color),
            is_water: false,
            is_transition: true,
            base_biomes: vec![self.id.clone(), other.id.clone()],
        })
    }

    fn is_reserved(&self) -> bool {
        RESERVED_BIOMES.contains(&self.id.as_str())
    }

    fn validate(&self) -> Result<(), WorldGenError> {
        for (axis, range) in ["temperature", "moisture", "elevation"]
            .iter()
            .zip(self.ranges())
        {
            if !(range.min.is_finite() && range.max.is_finite() && range.min <= range.max) {
                return Err(WorldGenError::InvalidConfig(format!(
                    "biome {} has an invalid {axis} range [{}, {}]",
                    self.id, range.min, range.max
                )));
            }
        }
        Ok(())
    }
}

/// The built-in base biomes, in declaration order.
pub fn default_biomes() -> Vec<BiomeInfo> {
    vec![
        BiomeInfo::land(
            OCEAN,
            "Ocean",
            [(0.0, 1.0), (0.0, 1.0), (0.0, 0.3)],
            &["deep_water", "fish"],
            &[("fish", 0.8), ("salt", 0.6)],
            Rgb::new(0x00, 0x77, 0xBE),
        )
        .water(),
        BiomeInfo::land(
            "desert",
            "Desert",
            [(0.7, 1.0), (0.0, 0.3), (0.3, 0.8)],
            &["dunes", "cacti"],
            &[("sand", 0.9), ("gold", 0.2)],
            Rgb::new(0xED, 0xC9, 0xAF),
        ),
        BiomeInfo::land(
            "plains",
            "Plains",
            [(0.3, 0.7), (0.3, 0.6), (0.3, 0.6)],
            &["grassland", "rolling_hills"],
            &[("grain", 0.8), ("livestock", 0.7)],
            Rgb::new(0x7C, 0xFC, 0x00),
        ),
        BiomeInfo::land(
            "forest",
            "Forest",
            [(0.3, 0.7), (0.6, 1.0), (0.3, 0.7)],
            &["trees", "wildlife"],
            &[("wood", 0.9), ("game", 0.7)],
            Rgb::new(0x22, 0x8B, 0x22),
        ),
        BiomeInfo::land(
            "mountains",
            "Mountains",
            [(0.0, 0.6), (0.2, 0.8), (0.7, 1.0)],
            &["peaks", "caves"],
            &[("stone", 0.9), ("ore", 0.6)],
            Rgb::new(0x80, 0x80, 0x80),
        ),
        BiomeInfo::land(
            "tundra",
            "Tundra",
            [(0.0, 0.3), (0.2, 0.6), (0.3, 0.7)],
            &["permafrost", "sparse_vegetation"],
            &[("fur", 0.7), ("herbs", 0.4)],
            Rgb::new(0xA9, 0xA9, 0xA9),
        ),
        BiomeInfo::land(
            "swamp",
            "Swamp",
            [(0.5, 0.8), (0.7, 1.0), (0.3, 0.4)],
            &["marsh", "mangroves"],
            &[("herbs", 0.8), ("exotic_creatures", 0.5)],
            Rgb::new(0x2F, 0x4F, 0x4F),
        ),
        BiomeInfo::land(
            RIVER,
            "River",
            [(0.0, 1.0), (0.0, 1.0), (0.0, 0.9)],
            &["flowing_water", "fish"],
            &[("fresh_water", 1.0), ("fish", 0.7)],
            Rgb::new(0x1E, 0x90, 0xFF),
        )
        .water(),
        BiomeInfo::land(
            MOUNTAIN,
            "Mountain",
            [(0.2, 1.0), (0.0, 1.0), (0.85, 1.0)],
            &["peaks", "cliffs"],
            &[("stone", 1.0), ("ore", 0.7)],
            Rgb::new(0x69, 0x69, 0x69),
        ),
        BiomeInfo::land(
            SNOW_PEAK,
            "Snow Peak",
            [(0.0, 0.2), (0.0, 1.0), (0.85, 1.0)],
            &["glaciers", "snowfields"],
            &[("ice", 0.8), ("stone", 0.6)],
            Rgb::new(0xFF, 0xFA, 0xFA),
        ),
    ]
}

// ---------------------------------------------------------------------------
// BiomeTable
// ---------------------------------------------------------------------------

/// Immutable lookup table of base and transition biomes.
#[derive(Debug, Clone, PartialEq)]
pub struct BiomeTable {
    biomes: Vec<BiomeInfo>,
    index: BTreeMap<String, usize>,
}

impl BiomeTable {
    /// Validate `base` and synthesize its transition biomes.
    ///
    /// Fails if an id repeats, a range is inverted, or one of the ids the
    /// classifier relies on is missing.
    pub fn new(base: Vec<BiomeInfo>) -> Result<Self, WorldGenError> {
        for biome in &base {
            biome.validate()?;
        }

        let eligible: Vec<&BiomeInfo> = base
            .iter()
            .filter(|b| !b.is_water && !b.is_transition && !b.is_reserved())
            .collect();
        let mut transitions = Vec::new();
        for (i, a) in eligible.iter().enumerate() {
            for b in eligible.iter().skip(i.saturating_add(1)) {
                if let Some(transition) = a.transition_with(b) {
                    transitions.push(transition);
                }
            }
        }

        let mut biomes = base;
        biomes.extend(transitions);

        let mut index = BTreeMap::new();
        for (i, biome) in biomes.iter().enumerate() {
            if index.insert(biome.id.clone(), i).is_some() {
                return Err(WorldGenError::InvalidConfig(format!(
                    "duplicate biome id {}",
                    biome.id
                )));
            }
        }
        for required in RESERVED_BIOMES.iter().chain(FALLBACK_BIOMES.iter()) {
            if !index.contains_key(*required) {
                return Err(WorldGenError::InvalidConfig(format!(
                    "biome table is missing {required}"
                )));
            }
        }

        tracing::debug!(
            biomes = biomes.len(),
            transitions = biomes.iter().filter(|b| b.is_transition).count(),
            "Biome table built"
        );
        Ok(Self { biomes, index })
    }

    /// The table built from [`default_biomes`].
    pub fn with_defaults() -> Result<Self, WorldGenError> {
        Self::new(default_biomes())
    }

    /// Look up a biome by id.
    pub fn get(&self, id: &str) -> Option<&BiomeInfo> {
        self.biomes.get(*self.index.get(id)?)
    }

    /// All biomes: base biomes in declaration order, then transitions.
    pub fn iter(&self) -> impl Iterator<Item = &BiomeInfo> + '_ {
        self.biomes.iter()
    }

    /// Only the synthesized transition biomes.
    pub fn transitions(&self) -> impl Iterator<Item = &BiomeInfo> + '_ {
        self.biomes.iter().filter(|b| b.is_transition)
    }

    /// Number of biomes including transitions.
    pub fn len(&self) -> usize {
        self.biomes.len()
    }

    /// Whether the table is empty. Never true for a validated table.
    pub fn is_empty(&self) -> bool {
        self.biomes.is_empty()
    }

    /// The best-scoring land biome for a climate sample.
    ///
    /// Reserved and water biomes are skipped. Ties go to the biome that
    /// appears first. With no candidates the choice falls back to a
    /// simple temperature/moisture rule.
    pub fn best_match(&self, temperature: f64, moisture: f64, elevation: f64) -> &str {
        let mut best: Option<(&BiomeInfo, f64)> = None;
        for biome in self.biomes.iter().filter(|b| !b.is_water && !b.is_reserved()) {
            let score = biome.score(temperature, moisture, elevation);
            if best.is_none_or(|(_, top)| score > top) {
                best = Some((biome, score));
            }
        }
        match best {
            Some((biome, _)) => &biome.id,
            None if temperature > 0.7 && moisture < 0.3 => "desert",
            None if temperature > 0.3 && moisture > 0.6 => "forest",
            None => "plains",
        }
    }
}
