//! Bounded least-recently-used cache of generated region terrain.
//!
//! Keys capture every input of
//! [`TerrainGenerator::generate_terrain`](crate::terrain::TerrainGenerator::generate_terrain),
//! with the floating-point offsets compared by bit pattern. Values are
//! shared `Arc`s, so a hit never copies grids.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::WorldGenError;
use crate::terrain::TerrainGrid;

/// Default number of regions kept in memory.
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Everything that determines a region's generated terrain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionKey {
    /// Region column.
    pub x: usize,
    /// Region row.
    pub y: usize,
    /// Side length in cells.
    pub size: usize,
    /// Region seed.
    pub seed: u64,
    /// Bits of the temperature offset.
    pub temperature_offset: u64,
    /// Bits of the moisture offset.
    pub moisture_offset: u64,
}

impl RegionKey {
    /// Build a key from generation arguments.
    pub const fn new(
        x: usize,
        y: usize,
        size: usize,
        seed: u64,
        temperature_offset: f64,
        moisture_offset: f64,
    ) -> Self {
        Self {
            x,
            y,
            size,
            seed,
            temperature_offset: temperature_offset.to_bits(),
            moisture_offset: moisture_offset.to_bits(),
        }
    }
}

/// Hit/miss counters and current occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that had to generate.
    pub misses: u64,
    /// Entries dropped to respect the capacity.
    pub evictions: u64,
    /// Entries currently held.
    pub len: usize,
}

#[derive(Debug, Default)]
struct LruInner {
    entries: HashMap<RegionKey, (Arc<TerrainGrid>, u64)>,
    recency: BTreeMap<u64, RegionKey>,
    tick: u64,
    stats: CacheStats,
}

impl LruInner {
    fn touch(&mut self, key: RegionKey) -> Option<Arc<TerrainGrid>> {
        self.tick = self.tick.saturating_add(1);
        let tick = self.tick;
        let (grid, last) = self.entries.get_mut(&key)?;
        self.recency.remove(last);
        *last = tick;
        self.recency.insert(tick, key);
        Some(Arc::clone(grid))
    }

    fn insert(&mut self, key: RegionKey, grid: Arc<TerrainGrid>, capacity: usize) {
        self.tick = self.tick.saturating_add(1);
        if let Some((_, old)) = self.entries.insert(key, (grid, self.tick)) {
            self.recency.remove(&old);
        }
        self.recency.insert(self.tick, key);

        while self.entries.len() > capacity {
            let Some((_, oldest)) = self.recency.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
            self.stats.evictions = self.stats.evictions.saturating_add(1);
        }
    }
}

/// Thread-safe bounded LRU of generated regions.
///
/// Generation runs outside the lock, so two threads missing on the same
/// key may both generate; the results are identical and the second insert
/// simply refreshes the entry.
#[derive(Debug)]
pub struct RegionCache {
    capacity: usize,
    inner: Mutex<LruInner>,
}

impl RegionCache {
    /// Create a cache holding at most `capacity` regions. A capacity of
    /// zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(LruInner::default()),
        }
    }

    /// Maximum number of entries.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up a region, marking it most recently used.
    pub fn get(&self, key: &RegionKey) -> Option<Arc<TerrainGrid>> {
        self.inner.lock().touch(*key)
    }

    /// Insert a region, evicting the least recently used entries.
    pub fn insert(&self, key: RegionKey, grid: Arc<TerrainGrid>) {
        if self.capacity == 0 {
            return;
        }
        self.inner.lock().insert(key, grid, self.capacity);
    }

    /// Return the cached region or generate, store and return it.
    pub fn get_or_generate(
        &self,
        key: RegionKey,
        generate: impl FnOnce() -> Result<TerrainGrid, WorldGenError>,
    ) -> Result<Arc<TerrainGrid>, WorldGenError> {
        {
            let mut inner = self.inner.lock();
            if let Some(hit) = inner.touch(key) {
                inner.stats.hits = inner.stats.hits.saturating_add(1);
                return Ok(hit);
            }
            inner.stats.misses = inner.stats.misses.saturating_add(1);
        }

        let grid = Arc::new(generate()?);
        self.insert(key, Arc::clone(&grid));
        Ok(grid)
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.recency.clear();
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            len: inner.entries.len(),
            ..inner.stats
        }
    }
}

impl Default for RegionCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}
