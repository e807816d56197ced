//! Error types for the persistence layer.
//!
//! Internal helpers propagate [`DbError`]; the public repository methods
//! log it and report plain success or failure.

/// Errors that can occur while reading or writing persisted state.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A file was written by a newer schema than this build understands.
    #[error("{file} has schema version {found}, newest supported is {supported}")]
    UnsupportedSchema {
        /// Which document was being read.
        file: String,
        /// The version found in the file.
        found: u32,
        /// The newest version this build reads.
        supported: u32,
    },

    /// A file is structurally invalid.
    #[error("Corrupt file {0}")]
    Corrupt(String),
}
