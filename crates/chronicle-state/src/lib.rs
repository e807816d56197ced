//! Versioned world-state store for the Chronicle simulation.
//!
//! Every fact about the simulated world lives in a [`StateStore`] as a
//! versioned key/value [`StateVariable`](chronicle_types::StateVariable).
//! Each mutation bumps the key's version, appends an immutable record to
//! the [`ChangeLog`], and is published on the store's event channel.
//!
//! # Architecture
//!
//! - [`store`] -- The [`StateStore`]: writes, reads, restores, statistics.
//! - [`change_log`] -- Per-key append-only history with point-in-time lookups.
//! - [`snapshot`] -- Full-state captures under a global version counter.
//! - [`query`] -- Category, region, tag and prefix filters over live state.
//! - [`derived`] -- Dependency graph of calculated values.
//! - [`events`] -- Broadcast channel for [`StateEvent`](chronicle_types::StateEvent)s.
//!
//! # Concurrency
//!
//! The store is a single-writer structure: all mutations (including the
//! derived-value cascade and automatic snapshots) run under one write
//! lock, so per-key versions and change-log appends can never interleave
//! and a snapshot never observes a half-applied write. Reads take the
//! shared lock.
//!
//! # Usage
//!
//! ```
//! use chronicle_state::{SetStateParams, StateStore};
//! use chronicle_types::{StateCategory, StateValue};
//!
//! let store = StateStore::new();
//! store
//!     .set_state(SetStateParams::new("kingdom.north.ruler", "Aldric").with_category(StateCategory::Political))
//!     .ok();
//! store
//!     .set_state(SetStateParams::new("kingdom.north.ruler", "Brenna").with_category(StateCategory::Political))
//!     .ok();
//!
//! assert_eq!(store.get_state("kingdom.north.ruler"), Some(StateValue::from("Brenna")));
//! assert_eq!(store.get_history("kingdom.north.ruler").len(), 2);
//! assert_eq!(store.get_value_at_version("kingdom.north.ruler", 1), Some(StateValue::from("Aldric")));
//! ```

pub mod change_log;
pub mod derived;
pub mod events;
pub mod query;
pub mod snapshot;
pub mod store;

use chronicle_types::ParseEnumError;

// Re-export primary types at crate root.
pub use change_log::ChangeLog;
pub use derived::{Calculator, DependencyValues, DerivedStateEngine, DerivedStateRule, RuleInfo};
pub use events::EventBus;
pub use query::{QueryEngine, StateQuery};
pub use snapshot::SnapshotManager;
pub use store::{PeriodSummary, SetStateParams, StateStore, StoreContents, StoreOptions, StoreStatistics};

/// Errors that can occur in the state store.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Registering or updating a derived rule would create a dependency
    /// cycle.
    #[error("derived rule {key} would create a dependency cycle: {}", path.join(" -> "))]
    CycleDetected {
        /// The rule being registered.
        key: String,
        /// The offending cycle, starting and ending at `key`.
        path: Vec<String>,
    },

    /// A derived rule for the key already exists.
    #[error("derived rule already registered for {0}")]
    DuplicateRule(String),

    /// No derived rule exists for the key.
    #[error("no derived rule registered for {0}")]
    RuleNotFound(String),

    /// A category or region string was not recognised by a strict parse.
    #[error(transparent)]
    InvalidEnum(#[from] ParseEnumError),

    /// A change record's version did not exceed the key's last version.
    #[error("non-monotonic version for {key}: last {last}, attempted {attempted}")]
    NonMonotonicVersion {
        /// The key being appended to.
        key: String,
        /// The key's last recorded version.
        last: u64,
        /// The rejected version.
        attempted: u64,
    },

    /// An internal invariant was violated.
    #[error("internal error: {0}")]
    InternalError(&'static str),
}
