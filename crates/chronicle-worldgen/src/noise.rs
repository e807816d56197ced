//! Deterministic value noise.
//!
//! Lattice values come from an integer hash of `(ix, iy, seed)` and are
//! blended with a smoothstep-weighted bilinear interpolation. Fractal
//! noise sums octaves of that base signal; a [`NoiseField`] combines
//! several weighted fractal layers into a single `[0, 1]` value.
//!
//! Every function here is pure: the same inputs always produce the same
//! output, on every platform.

use serde::{Deserialize, Serialize};

const HASH_X: u32 = 374_761_393;
const HASH_Y: u32 = 668_265_263;
const HASH_MIX: u32 = 1_274_126_177;

/// Seed increment between successive octaves of a fractal sample.
pub const OCTAVE_SEED_STEP: u32 = 1000;

/// One weighted fractal noise layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseLayer {
    /// Feature size in cells; the base frequency is `1 / scale`.
    pub scale: f64,
    /// Weight of this layer within its field.
    pub amplitude: f64,
    /// Number of octaves summed.
    pub octaves: u32,
    /// Amplitude multiplier between octaves.
    pub persistence: f64,
    /// Frequency multiplier between octaves.
    pub lacunarity: f64,
    /// Added to the base seed so layers are decorrelated.
    pub seed_offset: u32,
}

impl NoiseLayer {
    /// A layer with the default persistence (0.5) and lacunarity (2.0).
    pub const fn new(scale: f64, amplitude: f64, octaves: u32, seed_offset: u32) -> Self {
        Self {
            scale,
            amplitude,
            octaves,
            persistence: 0.5,
            lacunarity: 2.0,
            seed_offset,
        }
    }

    /// Check that the layer parameters are usable.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(format!("noise scale must be positive, got {}", self.scale));
        }
        if !(self.amplitude.is_finite() && self.amplitude >= 0.0) {
            return Err(format!(
                "noise amplitude must be non-negative, got {}",
                self.amplitude
            ));
        }
        if self.octaves == 0 {
            return Err("noise layers need at least one octave".to_owned());
        }
        Ok(())
    }
}

/// Default elevation layers: continents, hills, detail.
pub fn default_elevation_layers() -> Vec<NoiseLayer> {
    vec![
        NoiseLayer::new(100.0, 1.0, 4, 0),
        NoiseLayer::new(50.0, 0.5, 2, 1000),
        NoiseLayer::new(25.0, 0.25, 1, 2000),
    ]
}

/// Default moisture layers.
pub fn default_moisture_layers() -> Vec<NoiseLayer> {
    vec![
        NoiseLayer::new(120.0, 1.0, 3, 3000),
        NoiseLayer::new(60.0, 0.6, 2, 4000),
    ]
}

/// Default temperature layers.
pub fn default_temperature_layers() -> Vec<NoiseLayer> {
    vec![
        NoiseLayer::new(150.0, 1.0, 2, 5000),
        NoiseLayer::new(75.0, 0.4, 1, 6000),
    ]
}

/// Fold a 64-bit seed into the 32-bit space the hash works in.
pub fn fold_seed(seed: u64) -> u32 {
    let folded = (seed ^ (seed >> 32)) & u64::from(u32::MAX);
    u32::try_from(folded).unwrap_or(0)
}

/// Hash a lattice point into `[0, 1]`.
// Lattice coordinates wrap into 32 bits on purpose.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn lattice(ix: i64, iy: i64, seed: u32) -> f64 {
    let mut h = seed
        .wrapping_add((ix as u32).wrapping_mul(HASH_X))
        .wrapping_add((iy as u32).wrapping_mul(HASH_Y));
    h = (h ^ (h >> 13)).wrapping_mul(HASH_MIX);
    h ^= h >> 16;
    f64::from(h) / f64::from(u32::MAX)
}

const fn smoothstep(t: f64) -> f64 {
    t * t * (3.0 - 2.0 * t)
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    (b - a).mul_add(t, a)
}

/// Single-octave value noise at `(x, y)`, in `[-1, 1]`.
#[allow(clippy::cast_possible_truncation)]
pub fn value_noise(x: f64, y: f64, seed: u32) -> f64 {
    let fx = x.floor();
    let fy = y.floor();
    let ix = fx as i64;
    let iy = fy as i64;
    let tx = smoothstep(x - fx);
    let ty = smoothstep(y - fy);

    let c00 = lattice(ix, iy, seed);
    let c10 = lattice(ix.wrapping_add(1), iy, seed);
    let c01 = lattice(ix, iy.wrapping_add(1), seed);
    let c11 = lattice(ix.wrapping_add(1), iy.wrapping_add(1), seed);

    let top = lerp(c00, c10, tx);
    let bottom = lerp(c01, c11, tx);
    lerp(top, bottom, ty).mul_add(2.0, -1.0)
}

/// Sum `octaves` of value noise, normalized by the total amplitude.
/// Result is in `[-1, 1]`.
pub fn fractal_sample(
    x: f64,
    y: f64,
    scale: f64,
    octaves: u32,
    persistence: f64,
    lacunarity: f64,
    seed: u32,
) -> f64 {
    let mut value = 0.0;
    let mut amplitude = 1.0;
    let mut frequency = 1.0 / scale;
    let mut total = 0.0;
    let mut octave_seed = seed;

    for _ in 0..octaves {
        value += value_noise(x * frequency, y * frequency, octave_seed) * amplitude;
        total += amplitude;
        amplitude *= persistence;
        frequency *= lacunarity;
        octave_seed = octave_seed.wrapping_add(OCTAVE_SEED_STEP);
    }

    if total > 0.0 { value / total } else { 0.0 }
}

/// Sample one layer at `(x, y)` with the layer's seed offset applied.
/// Result is in `[-1, 1]`, not yet scaled by the layer amplitude.
pub fn sample(x: f64, y: f64, layer: &NoiseLayer, seed: u32) -> f64 {
    fractal_sample(
        x,
        y,
        layer.scale,
        layer.octaves,
        layer.persistence,
        layer.lacunarity,
        seed.wrapping_add(layer.seed_offset),
    )
}

/// A weighted stack of noise layers producing values in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseField {
    layers: Vec<NoiseLayer>,
}

impl NoiseField {
    /// Build a field from its layers.
    pub fn new(layers: Vec<NoiseLayer>) -> Result<Self, String> {
        if layers.is_empty() {
            return Err("a noise field needs at least one layer".to_owned());
        }
        for layer in &layers {
            layer.validate()?;
        }
        Ok(Self { layers })
    }

    /// The layers of this field.
    pub fn layers(&self) -> &[NoiseLayer] {
        &self.layers
    }

    /// Amplitude-weighted average of every layer, mapped to `[0, 1]`.
    pub fn value(&self, x: f64, y: f64, seed: u32) -> f64 {
        let mut sum = 0.0;
        let mut weight = 0.0;
        for layer in &self.layers {
            sum += sample(x, y, layer, seed) * layer.amplitude;
            weight += layer.amplitude;
        }
        let combined = if weight > 0.0 { sum / weight } else { 0.0 };
        ((combined + 1.0) / 2.0).clamp(0.0, 1.0)
    }
}
