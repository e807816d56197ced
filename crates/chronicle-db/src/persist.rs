//! Moving a whole [`StateStore`] through a repository.
//!
//! ```text
//! save_store()
//!   |
//!   +-- save_state()     --> current variables
//!   +-- save_history()   --> full change history
//!   +-- save_snapshot()  --> one file per snapshot
//!   +-- delete_snapshot() --> stored snapshots the store no longer holds
//! ```

use std::collections::BTreeSet;

use chronicle_state::{StateStore, StoreContents, StoreOptions};

use crate::repository::StateRepository;

/// Save the store's variables, history and snapshots.
///
/// Stored snapshots that the store has since deleted are removed from the
/// repository.
///
/// Every part is attempted even if an earlier one fails. Returns `true`
/// only if all parts were written.
pub async fn save_store<R: StateRepository>(store: &StateStore, repo: &R) -> bool {
    let StoreContents {
        variables,
        history,
        snapshots,
    } = store.export();

    let state_ok = repo.save_state(&variables).await;
    let history_ok = repo.save_history(&history).await;
    let mut snapshots_ok = true;
    for snapshot in &snapshots {
        snapshots_ok &= repo.save_snapshot(snapshot).await;
    }
    let live: BTreeSet<u64> = snapshots.iter().map(|s| s.version).collect();
    let mut pruned = 0_usize;
    for version in repo.stored_snapshot_versions().await {
        if !live.contains(&version) {
            let removed = repo.delete_snapshot(version).await;
            snapshots_ok &= removed;
            pruned = pruned.saturating_add(usize::from(removed));
        }
    }

    let ok = state_ok && history_ok && snapshots_ok;
    if ok {
        tracing::info!(
            variables = variables.len(),
            history = history.len(),
            snapshots = snapshots.len(),
            pruned,
            "Saved store"
        );
    } else {
        tracing::warn!(state_ok, history_ok, snapshots_ok, "Store saved partially");
    }
    ok
}

/// Build a store from whatever the repository holds. Missing or unreadable
/// parts come back empty.
pub async fn load_store<R: StateRepository>(repo: &R, options: StoreOptions) -> StateStore {
    let contents = StoreContents {
        variables: repo.load_state().await,
        history: repo.load_history().await,
        snapshots: repo.load_snapshots().await,
    };
    StateStore::from_contents(contents, options)
}
