//! Persistence for the Chronicle world-state store.
//!
//! The store itself is purely in-memory. This crate saves and restores it
//! through a [`StateRepository`], with [`JsonFileRepository`] as the file
//! backed implementation. All I/O is async on tokio; dropping a pending
//! save abandons it without touching the in-memory store.
//!
//! # Modules
//!
//! - [`repository`] -- The [`StateRepository`] trait
//! - [`json_store`] -- JSON file layout, backups and corruption recovery
//! - [`migrate`] -- Schema versioning and upgrade hooks
//! - [`persist`] -- Whole-store save and load
//! - [`error`] -- Shared error types

pub mod error;
pub mod json_store;
pub mod migrate;
pub mod persist;
pub mod repository;

// Re-export primary types for convenience.
pub use error::DbError;
pub use json_store::{DEFAULT_MAX_BACKUPS, JsonFileRepository};
pub use migrate::CURRENT_SCHEMA_VERSION;
pub use persist::{load_store, save_store};
pub use repository::StateRepository;
