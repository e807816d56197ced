//! Integration tests for terrain generation and world assembly.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::items_after_statements,
    clippy::missing_panics_doc,
    clippy::too_many_lines,
    clippy::indexing_slicing,
    clippy::float_cmp
)]

use chronicle_worldgen::biome::{OCEAN, RIVER};
use chronicle_worldgen::river::trace_path;
use chronicle_worldgen::{
    PoiKind, TerrainGenerator, TerrainType, WorldGenConfig, WorldMapAssembler,
};

fn assembler(region_size: usize) -> WorldMapAssembler {
    WorldMapAssembler::new(
        TerrainGenerator::with_defaults().unwrap(),
        WorldGenConfig {
            region_size,
            ..WorldGenConfig::default()
        },
    )
    .unwrap()
}

// =========================================================================
// Terrain
// =========================================================================

#[test]
fn terrain_is_deterministic() {
    let generator = TerrainGenerator::with_defaults().unwrap();
    let a = generator.generate_terrain(3, 5, 32, 42, 0.0, 0.0).unwrap();
    let b = generator.generate_terrain(3, 5, 32, 42, 0.0, 0.0).unwrap();
    assert_eq!(a.elevation, b.elevation);
    assert_eq!(a.biomes, b.biomes);
    assert_eq!(a.rivers, b.rivers);
    assert_eq!(a, b);

    // A separately built generator agrees too: no hidden state.
    let other = TerrainGenerator::with_defaults().unwrap();
    assert_eq!(other.generate_terrain(3, 5, 32, 42, 0.0, 0.0).unwrap(), a);
}

#[test]
fn terrain_depends_on_seed_and_position() {
    let generator = TerrainGenerator::with_defaults().unwrap();
    let base = generator.generate_terrain(3, 5, 16, 42, 0.0, 0.0).unwrap();
    let reseeded = generator.generate_terrain(3, 5, 16, 43, 0.0, 0.0).unwrap();
    let moved = generator.generate_terrain(4, 5, 16, 42, 0.0, 0.0).unwrap();
    assert_ne!(base.elevation, reseeded.elevation);
    assert_ne!(base.elevation, moved.elevation);
}

#[test]
fn rivers_from_mountain_sources_terminate() {
    let generator = TerrainGenerator::with_defaults().unwrap();
    let threshold = generator.config().mountain_threshold;
    for seed in [1, 42, 777] {
        let terrain = generator.generate_terrain(3, 5, 32, seed, 0.0, 0.0).unwrap();
        let budget = terrain.size * 2;
        for (x, y, &e) in terrain.elevation.iter() {
            if e <= threshold {
                continue;
            }
            let path = trace_path(&terrain.elevation, (x, y));
            assert!(path.len() <= budget + 1);
            for pair in path.windows(2) {
                let (ax, ay) = pair[0];
                let (bx, by) = pair[1];
                assert!(
                    terrain.elevation.get(bx, by).unwrap() < terrain.elevation.get(ax, ay).unwrap()
                );
            }
        }
    }
}

#[test]
fn classification_follows_priority() {
    let generator = TerrainGenerator::with_defaults().unwrap();
    let terrain = generator.generate_terrain(0, 0, 32, 42, 0.0, 0.0).unwrap();
    let config = generator.config();
    for (x, y, biome) in terrain.biomes.iter() {
        let river = *terrain.rivers.get(x, y).unwrap();
        let elevation = *terrain.elevation.get(x, y).unwrap();
        if river > 0.0 {
            assert_eq!(biome, RIVER);
        } else if elevation < config.ocean_threshold {
            assert_eq!(biome, OCEAN);
        } else {
            assert_ne!(biome, RIVER);
            assert!(generator.biomes().get(biome).is_some());
        }
    }
}

#[test]
fn offsets_shift_the_climate() {
    let generator = TerrainGenerator::with_defaults().unwrap();
    let warm = generator.generate_terrain(1, 1, 16, 5, 0.2, 0.0).unwrap();
    let cold = generator.generate_terrain(1, 1, 16, 5, -0.2, 0.0).unwrap();
    let mean = |g: &chronicle_worldgen::Grid<f64>| g.cells().iter().sum::<f64>() / 256.0;
    assert!(mean(&warm.temperature) > mean(&cold.temperature));
    assert_eq!(warm.elevation, cold.elevation);
}

// =========================================================================
// World map
// =========================================================================

#[test]
fn world_map_is_deterministic() {
    let a = assembler(16).generate_world_map(3, 3, 42).unwrap();
    let b = assembler(16).generate_world_map(3, 3, 42).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.regions.len(), 9);
    assert_eq!((a.cell_width(), a.cell_height()), (48, 48));
    for (i, region) in a.regions.iter().enumerate() {
        assert_eq!((region.x, region.y), (i % 3, i / 3));
    }
}

#[test]
fn parallel_regions_match_individual_generation() {
    let map = assembler(16).generate_world_map(2, 2, 7).unwrap();
    let fresh = assembler(16);
    for region in &map.regions {
        let single = fresh.generate_region(region.x, region.y, 2, 2, 7).unwrap();
        assert_eq!(single.elevation, region.elevation);
        assert_eq!(single.temperature, region.temperature);
    }
}

#[test]
fn repeated_generation_hits_the_cache() {
    let assembler = assembler(8);
    assembler.generate_world_map(2, 2, 1).unwrap();
    assert_eq!(assembler.cache().stats().misses, 4);
    assembler.generate_world_map(2, 2, 1).unwrap();
    let stats = assembler.cache().stats();
    assert_eq!(stats.misses, 4);
    assert_eq!(stats.hits, 4);
}

#[test]
fn world_rivers_descend_and_are_carved() {
    let map = assembler(16).generate_world_map(4, 4, 42).unwrap();
    assert!(!map.rivers.is_empty());
    assert!(map.rivers.len() <= 5);
    let budget = map.cell_width() + map.cell_height();
    for path in &map.rivers {
        assert!(path.len() <= budget + 1);
        for &(gx, gy) in path {
            assert_eq!(map.biome_at(gx, gy), Some(RIVER));
            assert_eq!(map.terrain_at(gx, gy), Some(TerrainType::Water));
        }
        for pair in path.windows(2) {
            let (ax, ay) = pair[0];
            let (bx, by) = pair[1];
            assert!(map.elevation_at(bx, by).unwrap() < map.elevation_at(ax, ay).unwrap());
        }
    }
}

#[test]
fn points_of_interest_sit_on_land() {
    let map = assembler(16).generate_world_map(4, 4, 42).unwrap();
    let pois: Vec<_> = map.points_of_interest().collect();
    assert!(!pois.is_empty());
    assert!(pois.len() <= 8);
    for (region, poi) in pois {
        assert_ne!(poi.terrain, TerrainType::Water);
        assert_eq!(region.terrain.get(poi.x, poi.y), Some(&poi.terrain));
        let label = match poi.kind {
            PoiKind::Settlement => "Settlement",
            PoiKind::Ruins => "Ruins",
            PoiKind::Dungeon => "Dungeon",
            PoiKind::Landmark => "Landmark",
            PoiKind::Shrine => "Shrine",
        };
        assert!(poi.name.starts_with(&format!("{label} {}-{}-", region.x, region.y)));
    }
}

#[test]
fn region_resources_are_mean_yields() {
    let map = assembler(8).generate_world_map(2, 1, 3).unwrap();
    for region in &map.regions {
        assert!(!region.resources.is_empty());
        assert!(region.resources.values().all(|&v| (0.0..=1.0).contains(&v)));
        assert!(region.dominant_biome().is_some());
    }
}
