//! Projection of a generated [`WorldMap`] into [`StateStore`] facts.
//!
//! Geography itself stays in the world map; the store receives the
//! summary facts that simulation systems read and later mutate.

use std::collections::BTreeMap;

use chronicle_state::{SetStateParams, StateError, StateStore};
use chronicle_types::{StateCategory, StateValue, WorldRegion};
use chronicle_worldgen::{PointOfInterest, Region, WorldMap};

/// Reason recorded on every seeded change.
pub const SEED_REASON: &str = "world generation";

/// Key of a per-region fact, e.g. `region.2_3.biome`.
pub fn region_key(x: usize, y: usize, field: &str) -> String {
    format!("region.{x}_{y}.{field}")
}

/// Compass area of region `(x, y)` in a `width x height` grid.
///
/// The grid is split into thirds: the top third is northern, the bottom
/// third southern, and the middle band is western, central or eastern.
pub fn compass_region(x: usize, y: usize, width: usize, height: usize) -> WorldRegion {
    let third = |value: usize, extent: usize| {
        value
            .saturating_mul(3)
            .checked_div(extent)
            .unwrap_or(0)
    };
    match (third(x, width), third(y, height)) {
        (_, 0) => WorldRegion::Northern,
        (_, 2..) => WorldRegion::Southern,
        (0, _) => WorldRegion::Western,
        (2.., _) => WorldRegion::Eastern,
        _ => WorldRegion::Central,
    }
}

fn count(value: usize) -> StateValue {
    StateValue::from(u32::try_from(value).unwrap_or(u32::MAX))
}

fn poi_value(poi: &PointOfInterest) -> StateValue {
    StateValue::Map(BTreeMap::from([
        ("kind".to_owned(), StateValue::from(poi.kind.as_str())),
        ("name".to_owned(), StateValue::from(poi.name.as_str())),
        ("terrain".to_owned(), StateValue::from(poi.terrain.as_str())),
        ("x".to_owned(), count(poi.x)),
        ("y".to_owned(), count(poi.y)),
    ]))
}

fn region_facts(region: &Region) -> Vec<(&'static str, StateValue)> {
    let resources = region
        .resources
        .iter()
        .map(|(name, amount)| (name.clone(), StateValue::from(*amount)))
        .collect::<BTreeMap<_, _>>();
    vec![
        (
            "biome",
            StateValue::from(region.dominant_biome().unwrap_or_default()),
        ),
        (
            "terrain",
            region
                .dominant_terrain()
                .map_or(StateValue::Null, |t| StateValue::from(t.as_str())),
        ),
        ("elevation", StateValue::from(region.mean_elevation())),
        ("resources", StateValue::Map(resources)),
        (
            "points_of_interest",
            StateValue::List(region.points_of_interest.iter().map(poi_value).collect()),
        ),
    ]
}

/// Write world and per-region facts for `map` into `store`.
///
/// Returns the number of facts written. Every fact is Environmental and
/// tagged `worldgen`.
pub fn seed_store(store: &StateStore, map: &WorldMap) -> Result<usize, StateError> {
    let seed = u32::try_from(map.seed).map_or_else(|_| StateValue::from(map.seed.to_string()), StateValue::from);
    let world_facts = [
        ("world.seed", seed),
        ("world.width", count(map.width)),
        ("world.height", count(map.height)),
        ("world.region_size", count(map.region_size)),
        ("world.river_count", count(map.rivers.len())),
    ];

    let mut written = 0_usize;
    for (key, value) in world_facts {
        store.set_state(
            SetStateParams::new(key, value)
                .with_category(StateCategory::Environmental)
                .with_region(WorldRegion::Global)
                .with_tags(["worldgen", "world"])
                .with_reason(SEED_REASON),
        )?;
        written = written.saturating_add(1);
    }

    for region in &map.regions {
        let area = compass_region(region.x, region.y, map.width, map.height);
        for (field, value) in region_facts(region) {
            store.set_state(
                SetStateParams::new(region_key(region.x, region.y, field), value)
                    .with_category(StateCategory::Environmental)
                    .with_region(area)
                    .with_tags(["worldgen", "region"])
                    .with_reason(SEED_REASON),
            )?;
            written = written.saturating_add(1);
        }
    }

    tracing::info!(
        facts = written,
        regions = map.regions.len(),
        "World seeded into state store"
    );
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compass_regions_split_into_thirds() {
        assert_eq!(compass_region(0, 0, 4, 4), WorldRegion::Northern);
        assert_eq!(compass_region(3, 3, 4, 4), WorldRegion::Southern);
        assert_eq!(compass_region(0, 2, 4, 4), WorldRegion::Western);
        assert_eq!(compass_region(3, 2, 4, 4), WorldRegion::Eastern);
        assert_eq!(compass_region(2, 2, 4, 4), WorldRegion::Central);
        assert_eq!(compass_region(0, 0, 1, 1), WorldRegion::Northern);
    }

    #[test]
    fn region_keys_are_dotted() {
        assert_eq!(region_key(2, 3, "biome"), "region.2_3.biome");
    }
}
