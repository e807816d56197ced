//! Shared type definitions for the Chronicle world-state store.
//!
//! This crate is the single source of truth for the records that flow
//! between the state store, the persistence layer, and the world generator's
//! seeding step. Types defined here also flow downstream to `TypeScript`
//! via `ts-rs`.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for snapshots and change records
//! - [`enums`] -- Categories, regions, and change types
//! - [`value`] -- The tagged [`StateValue`] held by every key
//! - [`structs`] -- Variables, change records, and snapshots
//! - [`events`] -- Events published by the store

pub mod enums;
pub mod events;
pub mod ids;
pub mod structs;
pub mod value;

// Re-export all public types at crate root for convenience.
pub use enums::{ChangeType, ParseEnumError, StateCategory, WorldRegion};
pub use events::StateEvent;
pub use ids::{ChangeId, SnapshotId};
pub use structs::{SnapshotSummary, StateChangeRecord, StateVariable, WorldStateSnapshot};
pub use value::StateValue;
