//! Error types for the engine binary.
//!
//! [`EngineError`] is the top-level error type that wraps all possible
//! failure modes during startup, generation and persistence.

/// Top-level error for the engine binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: chronicle_core::ConfigError,
    },

    /// World generation failed.
    #[error("world generation error: {source}")]
    WorldGen {
        /// The underlying generation error.
        #[from]
        source: chronicle_worldgen::WorldGenError,
    },

    /// A state store operation failed.
    #[error("state error: {source}")]
    State {
        /// The underlying store error.
        #[from]
        source: chronicle_state::StateError,
    },

    /// Preparing the data directory failed.
    #[error("storage error: {source}")]
    Db {
        /// The underlying persistence error.
        #[from]
        source: chronicle_db::DbError,
    },

    /// Saving the world state failed; details were logged by the
    /// repository.
    #[error("failed to save world state to {path}")]
    Save {
        /// Data directory that could not be written.
        path: String,
    },

    /// A blocking generation task panicked or was cancelled.
    #[error("generation task failed: {message}")]
    Task {
        /// Description of the task failure.
        message: String,
    },
}
