//! Error types for the `chronicle-worldgen` crate.

/// Errors that can occur while generating terrain or assembling a world.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorldGenError {
    /// A grid or world dimension was zero.
    #[error("invalid dimensions {width}x{height}")]
    InvalidDimensions {
        /// Requested width.
        width: usize,
        /// Requested height.
        height: usize,
    },

    /// A generation parameter is out of range.
    #[error("invalid generation config: {0}")]
    InvalidConfig(String),

    /// A region coordinate lies outside the world grid.
    #[error("region ({x}, {y}) is outside the world grid")]
    RegionOutOfBounds {
        /// Region column.
        x: usize,
        /// Region row.
        y: usize,
    },
}
