//! Points of interest placed on a finished world map.

use std::fmt;

use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::world_map::{Region, TerrainType};

/// Seed offset of the placement RNG relative to the world seed.
pub const POI_SEED_OFFSET: u64 = 100;

/// Kind of a point of interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoiKind {
    /// A town or village.
    Settlement,
    /// Remains of an older settlement.
    Ruins,
    /// An underground complex.
    Dungeon,
    /// A notable natural feature.
    Landmark,
    /// A small holy site.
    Shrine,
}

impl PoiKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Settlement,
        Self::Ruins,
        Self::Dungeon,
        Self::Landmark,
        Self::Shrine,
    ];

    /// Lowercase identifier.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Settlement => "settlement",
            Self::Ruins => "ruins",
            Self::Dungeon => "dungeon",
            Self::Landmark => "landmark",
            Self::Shrine => "shrine",
        }
    }

    /// Terrain this kind is placed on when available.
    pub const fn preferred_terrain(self) -> &'static [TerrainType] {
        use TerrainType::{Desert, Forest, Mountain, Plains};
        match self {
            Self::Settlement => &[Plains, Forest, Desert],
            Self::Ruins => &[Plains, Forest, Desert, Mountain],
            Self::Dungeon => &[Mountain, Forest],
            Self::Landmark => &[Mountain, Plains, Desert],
            Self::Shrine => &[Plains, Forest, Mountain],
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Settlement => "Settlement",
            Self::Ruins => "Ruins",
            Self::Dungeon => "Dungeon",
            Self::Landmark => "Landmark",
            Self::Shrine => "Shrine",
        }
    }
}

impl fmt::Display for PoiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A point of interest inside a region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointOfInterest {
    /// What it is.
    pub kind: PoiKind,
    /// Generated display name.
    pub name: String,
    /// Cell column within the region.
    pub x: usize,
    /// Cell row within the region.
    pub y: usize,
    /// Terrain of the chosen cell.
    pub terrain: TerrainType,
}

/// Number of points of interest placed on a world of `regions` regions.
pub fn poi_count(regions: usize, minimum: usize) -> usize {
    (regions / 2).max(minimum)
}

/// Scatter points of interest over `regions`, returning how many were
/// placed.
///
/// Each attempt picks a kind and a region at random, then a free cell of
/// a preferred terrain, falling back to any free land cell. Attempts that
/// find no land are skipped.
pub fn place_points_of_interest(regions: &mut [Region], seed: u64, minimum: usize) -> usize {
    if regions.is_empty() {
        return 0;
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(POI_SEED_OFFSET));
    let mut placed = 0_usize;

    for _ in 0..poi_count(regions.len(), minimum) {
        let Some(&kind) = PoiKind::ALL.choose(&mut rng) else {
            break;
        };
        let index = rng.random_range(0..regions.len());
        let Some(region) = regions.get_mut(index) else {
            continue;
        };

        let free = |x: usize, y: usize| {
            !region
                .points_of_interest
                .iter()
                .any(|poi| poi.x == x && poi.y == y)
        };
        let preferred: Vec<(usize, usize, TerrainType)> = region
            .terrain
            .iter()
            .filter(|&(x, y, t)| kind.preferred_terrain().contains(t) && free(x, y))
            .map(|(x, y, &t)| (x, y, t))
            .collect();
        let candidates = if preferred.is_empty() {
            region
                .terrain
                .iter()
                .filter(|&(x, y, t)| *t != TerrainType::Water && free(x, y))
                .map(|(x, y, &t)| (x, y, t))
                .collect()
        } else {
            preferred
        };

        let Some(&(x, y, terrain)) = candidates.choose(&mut rng) else {
            tracing::debug!(
                region_x = region.x,
                region_y = region.y,
                kind = %kind,
                "No land for point of interest"
            );
            continue;
        };
        let cell = region.terrain.index_of(x, y).unwrap_or(0);
        let name = format!("{} {}-{}-{cell}", kind.label(), region.x, region.y);
        region.points_of_interest.push(PointOfInterest {
            kind,
            name,
            x,
            y,
            terrain,
        });
        placed = placed.saturating_add(1);
    }
    placed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_has_a_floor() {
        assert_eq!(poi_count(1, 5), 5);
        assert_eq!(poi_count(16, 5), 8);
        assert_eq!(poi_count(0, 0), 0);
    }

    #[test]
    fn preferences_exclude_water() {
        for kind in PoiKind::ALL {
            assert!(!kind.preferred_terrain().contains(&TerrainType::Water));
        }
        assert!(PoiKind::Dungeon.preferred_terrain().contains(&TerrainType::Mountain));
        assert!(PoiKind::Settlement.preferred_terrain().contains(&TerrainType::Plains));
    }
}
