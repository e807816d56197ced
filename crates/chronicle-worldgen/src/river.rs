//! River tracing.
//!
//! A river starts at a source cell and repeatedly steps to its lowest
//! neighbour, stopping as soon as no neighbour is strictly lower or the
//! step budget runs out. Because every step strictly descends, a path can
//! never revisit a cell.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::grid::{Grid, neighbors_within};
use crate::terrain::TerrainConfig;

/// Weight of a cell on a river's main channel.
pub const CHANNEL_WEIGHT: f64 = 1.0;

/// Number of random fallback sources when no cell is high enough.
const FALLBACK_SOURCES: usize = 3;

/// Number of rivers attempted in a region of side `size`.
pub fn river_count(size: usize) -> usize {
    (size.isqrt() / 4).max(1)
}

/// Walk downhill from `start` on a `width x height` lattice.
///
/// `elevation` returns the height of an in-bounds cell. The returned path
/// starts with `start` and contains at most `max_steps + 1` cells. When
/// `sea_level` is set the walk also ends at the first cell at or below it.
pub fn trace_descent(
    width: usize,
    height: usize,
    start: (usize, usize),
    max_steps: usize,
    sea_level: Option<f64>,
    elevation: impl Fn(usize, usize) -> Option<f64>,
) -> Vec<(usize, usize)> {
    let mut path = vec![start];
    let (mut x, mut y) = start;
    let Some(mut current) = elevation(x, y) else {
        return path;
    };

    for _ in 0..max_steps {
        if sea_level.is_some_and(|level| current <= level) {
            break;
        }
        let lowest = neighbors_within(width, height, x, y, true)
            .into_iter()
            .filter_map(|(nx, ny)| elevation(nx, ny).map(|e| (nx, ny, e)))
            .min_by(|a, b| a.2.total_cmp(&b.2));
        let Some((nx, ny, next)) = lowest else {
            break;
        };
        if next >= current {
            break;
        }
        x = nx;
        y = ny;
        current = next;
        path.push((x, y));
    }
    path
}

/// Trace one river on a region's elevation grid, with the region's
/// `width + height` step budget.
pub fn trace_path(elevation: &Grid<f64>, start: (usize, usize)) -> Vec<(usize, usize)> {
    trace_descent(
        elevation.width(),
        elevation.height(),
        start,
        elevation.width().saturating_add(elevation.height()),
        None,
        |x, y| elevation.get(x, y).copied(),
    )
}

/// Whether no 8-neighbour of `(x, y)` is strictly higher.
fn is_local_maximum(elevation: &Grid<f64>, x: usize, y: usize, height: f64) -> bool {
    neighbors_within(elevation.width(), elevation.height(), x, y, true)
        .into_iter()
        .all(|(nx, ny)| elevation.get(nx, ny).is_none_or(|&e| e <= height))
}

/// Move up to `wanted - sources.len()` cells of `pool` into `sources`,
/// chosen without replacement.
fn draw_sources(
    rng: &mut ChaCha8Rng,
    pool: &[(usize, usize)],
    wanted: usize,
    sources: &mut Vec<(usize, usize)>,
) {
    let amount = wanted.saturating_sub(sources.len()).min(pool.len());
    sources.extend(
        rand::seq::index::sample(rng, pool.len(), amount)
            .iter()
            .filter_map(|i| pool.get(i).copied()),
    );
}

/// Pick the river sources of one region.
///
/// Local maxima above `mountain_threshold` come first, then the other
/// cells above it, then random cells.
fn choose_sources(
    elevation: &Grid<f64>,
    rng: &mut ChaCha8Rng,
    threshold: f64,
    wanted: usize,
) -> Vec<(usize, usize)> {
    let (peaks, slopes): (Vec<_>, Vec<_>) = elevation
        .iter()
        .filter(|&(_, _, &e)| e > threshold)
        .map(|(x, y, &e)| (x, y, is_local_maximum(elevation, x, y, e)))
        .partition(|&(_, _, peak)| peak);
    let peaks: Vec<(usize, usize)> = peaks.into_iter().map(|(x, y, _)| (x, y)).collect();
    let slopes: Vec<(usize, usize)> = slopes.into_iter().map(|(x, y, _)| (x, y)).collect();

    let mut sources = Vec::with_capacity(wanted);
    draw_sources(rng, &peaks, wanted, &mut sources);
    draw_sources(rng, &slopes, wanted, &mut sources);
    if sources.is_empty() {
        let random: Vec<(usize, usize)> = (0..FALLBACK_SOURCES)
            .map(|_| {
                (
                    rng.random_range(0..elevation.width()),
                    rng.random_range(0..elevation.height()),
                )
            })
            .collect();
        draw_sources(rng, &random, wanted, &mut sources);
    }
    sources
}

/// Generate the river weight grid for one region.
///
/// Sources are local elevation maxima above `config.mountain_threshold`,
/// topped up with other cells above the threshold, or random cells when
/// none qualify. Channel cells get weight 1.0; after each step the river
/// may widen, marking empty orthogonal neighbours with
/// `config.bank_weight`.
pub fn generate_rivers(elevation: &Grid<f64>, seed: u64, config: &TerrainConfig) -> Grid<f64> {
    let width = elevation.width();
    let height = elevation.height();
    let mut rivers = Grid::new(width, height, 0.0);
    if elevation.is_empty() {
        return rivers;
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let sources = choose_sources(
        elevation,
        &mut rng,
        config.mountain_threshold,
        river_count(width),
    );

    for source in sources {
        let path = trace_path(elevation, source);
        for &(x, y) in &path {
            rivers.set(x, y, CHANNEL_WEIGHT);
        }
        // One widening roll per step taken.
        for &(x, y) in path.iter().skip(1) {
            if rng.random::<f64>() < config.bank_chance {
                for (nx, ny) in neighbors_within(width, height, x, y, false) {
                    if rivers.get(nx, ny).is_some_and(|&w| w <= 0.0) {
                        rivers.set(nx, ny, config.bank_weight);
                    }
                }
            }
        }
    }
    rivers
}
