//! JSON file repository.
//!
//! # Layout
//!
//! | Path | Contents |
//! |------|----------|
//! | `current/state.json` | `{schema_version, timestamp, variables}` |
//! | `history/state_history.json` | `{schema_version, history}` |
//! | `snapshots/snapshot_v<N>_<timestamp>.json` | `{schema_version, snapshot}` |
//! | `backups/<timestamp>/state.json` | Previous `current/state.json` files |
//!
//! Every write goes to a `.tmp` sibling first and is renamed into place, so
//! an abandoned save never leaves a torn file behind.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;

use chronicle_state::ChangeLog;
use chronicle_types::{StateChangeRecord, StateVariable, WorldStateSnapshot};

use crate::error::DbError;
use crate::migrate::{CURRENT_SCHEMA_VERSION, migrate_history, migrate_snapshot, migrate_state};
use crate::repository::StateRepository;

/// Default number of state backups kept.
pub const DEFAULT_MAX_BACKUPS: usize = 10;

const CURRENT_DIR: &str = "current";
const HISTORY_DIR: &str = "history";
const SNAPSHOTS_DIR: &str = "snapshots";
const BACKUPS_DIR: &str = "backups";
const STATE_FILE: &str = "state.json";
const HISTORY_FILE: &str = "state_history.json";
const SNAPSHOT_PREFIX: &str = "snapshot_v";

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct StateDocumentOut<'a> {
    schema_version: u32,
    timestamp: DateTime<Utc>,
    variables: &'a BTreeMap<String, StateVariable>,
}

#[derive(Deserialize)]
struct StateDocument {
    variables: BTreeMap<String, StateVariable>,
}

#[derive(Serialize)]
struct HistoryDocumentOut<'a> {
    schema_version: u32,
    history: &'a [StateChangeRecord],
}

#[derive(Deserialize)]
struct HistoryDocument {
    history: Vec<StateChangeRecord>,
}

#[derive(Serialize)]
struct SnapshotDocumentOut<'a> {
    schema_version: u32,
    snapshot: &'a WorldStateSnapshot,
}

#[derive(Deserialize)]
struct SnapshotDocument {
    snapshot: WorldStateSnapshot,
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// A [`StateRepository`] backed by JSON files under one root directory.
#[derive(Debug, Clone)]
pub struct JsonFileRepository {
    /// Root directory.
    root: PathBuf,
    /// Number of state backups kept; 0 disables backups.
    max_backups: usize,
}

impl JsonFileRepository {
    /// Create a repository rooted at `root`. Directories are created on
    /// first write.
    pub fn new(root: impl Into<PathBuf>, max_backups: usize) -> Self {
        Self {
            root: root.into(),
            max_backups,
        }
    }

    /// Create the repository's directory tree.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Io`] if a directory cannot be created.
    pub async fn init(&self) -> Result<(), DbError> {
        for dir in [CURRENT_DIR, HISTORY_DIR, SNAPSHOTS_DIR, BACKUPS_DIR] {
            fs::create_dir_all(self.root.join(dir)).await?;
        }
        tracing::info!(root = %self.root.display(), "Opened JSON state repository");
        Ok(())
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the current state file.
    pub fn current_path(&self) -> PathBuf {
        self.root.join(CURRENT_DIR).join(STATE_FILE)
    }

    /// Path of the history file.
    pub fn history_path(&self) -> PathBuf {
        self.root.join(HISTORY_DIR).join(HISTORY_FILE)
    }

    /// Directory holding snapshot files.
    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join(SNAPSHOTS_DIR)
    }

    /// Directory holding backup directories.
    pub fn backups_dir(&self) -> PathBuf {
        self.root.join(BACKUPS_DIR)
    }

    /// Backup directories, oldest first.
    pub async fn list_backups(&self) -> Vec<PathBuf> {
        match list_dir(&self.backups_dir()).await {
            Ok(entries) => entries
                .into_iter()
                .filter(|(_, is_dir)| *is_dir)
                .map(|(path, _)| path)
                .collect(),
            Err(error) => {
                tracing::warn!(%error, "Could not list state backups");
                Vec::new()
            }
        }
    }

    /// Stored snapshot files as `(version, path)`, ascending by version.
    pub async fn list_snapshot_files(&self) -> Vec<(u64, PathBuf)> {
        let entries = match list_dir(&self.snapshots_dir()).await {
            Ok(entries) => entries,
            Err(error) => {
                tracing::warn!(%error, "Could not list snapshot files");
                return Vec::new();
            }
        };
        let mut files: Vec<(u64, PathBuf)> = entries
            .into_iter()
            .filter(|(_, is_dir)| !is_dir)
            .filter_map(|(path, _)| {
                let version = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(parse_snapshot_version)?;
                Some((version, path))
            })
            .collect();
        files.sort();
        files
    }

    // -----------------------------------------------------------------------
    // Fallible internals
    // -----------------------------------------------------------------------

    async fn try_save_state(&self, variables: &BTreeMap<String, StateVariable>) -> Result<(), DbError> {
        let current = self.current_path();
        if self.max_backups > 0 && fs::try_exists(&current).await? {
            let dir = self.backups_dir().join(file_stamp(Utc::now()));
            fs::create_dir_all(&dir).await?;
            fs::copy(&current, dir.join(STATE_FILE)).await?;
            self.prune_backups().await?;
        }

        let doc = StateDocumentOut {
            schema_version: CURRENT_SCHEMA_VERSION,
            timestamp: Utc::now(),
            variables,
        };
        write_json_atomic(&current, &doc).await
    }

    async fn try_load_state(path: &Path) -> Result<Option<BTreeMap<String, StateVariable>>, DbError> {
        let Some(raw) = read_json(path).await? else {
            return Ok(None);
        };
        let doc: StateDocument = serde_json::from_value(migrate_state(raw)?)?;
        Ok(Some(doc.variables))
    }

    async fn try_load_history(&self) -> Result<Vec<StateChangeRecord>, DbError> {
        let Some(raw) = read_json(&self.history_path()).await? else {
            return Ok(Vec::new());
        };
        let doc: HistoryDocument = serde_json::from_value(migrate_history(raw)?)?;
        Ok(doc.history)
    }

    async fn try_save_history(&self, history: &[StateChangeRecord]) -> Result<(), DbError> {
        let doc = HistoryDocumentOut {
            schema_version: CURRENT_SCHEMA_VERSION,
            history,
        };
        write_json_atomic(&self.history_path(), &doc).await
    }

    async fn try_load_snapshot(path: &Path) -> Result<Option<WorldStateSnapshot>, DbError> {
        let Some(raw) = read_json(path).await? else {
            return Ok(None);
        };
        let doc: SnapshotDocument = serde_json::from_value(migrate_snapshot(raw)?)?;
        Ok(Some(doc.snapshot))
    }

    /// Delete the oldest backups beyond `max_backups`.
    async fn prune_backups(&self) -> Result<(), DbError> {
        let backups = self.list_backups().await;
        let excess = backups.len().saturating_sub(self.max_backups);
        for dir in backups.iter().take(excess) {
            fs::remove_dir_all(dir).await?;
            tracing::debug!(backup = %dir.display(), "Removed old state backup");
        }
        Ok(())
    }

    /// Load the newest readable backup and reinstate it as the current
    /// state. Empty if no backup can be read.
    async fn restore_from_backup(&self) -> BTreeMap<String, StateVariable> {
        for dir in self.list_backups().await.into_iter().rev() {
            let path = dir.join(STATE_FILE);
            match Self::try_load_state(&path).await {
                Ok(Some(variables)) => {
                    if let Err(error) = self.reinstate(&path).await {
                        tracing::warn!(%error, "Could not reinstate backup as current state");
                    }
                    tracing::warn!(
                        backup = %dir.display(),
                        variables = variables.len(),
                        "Restored state from backup"
                    );
                    return variables;
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(backup = %dir.display(), %error, "Backup unreadable");
                }
            }
        }
        tracing::warn!("No readable state backup, starting from empty state");
        BTreeMap::new()
    }

    /// Move the corrupt current file aside and copy `backup` into its place.
    async fn reinstate(&self, backup: &Path) -> Result<(), DbError> {
        let current = self.current_path();
        if fs::try_exists(&current).await? {
            let aside = current.with_file_name(format!("state.corrupt-{}.json", file_stamp(Utc::now())));
            fs::rename(&current, aside).await?;
        }
        fs::copy(backup, &current).await?;
        Ok(())
    }
}

impl StateRepository for JsonFileRepository {
    async fn save_state(&self, variables: &BTreeMap<String, StateVariable>) -> bool {
        match self.try_save_state(variables).await {
            Ok(()) => {
                tracing::info!(variables = variables.len(), "Saved current state");
                true
            }
            Err(error) => {
                tracing::warn!(%error, "Failed to save current state");
                false
            }
        }
    }

    async fn load_state(&self) -> BTreeMap<String, StateVariable> {
        match Self::try_load_state(&self.current_path()).await {
            Ok(Some(variables)) => {
                tracing::info!(variables = variables.len(), "Loaded current state");
                variables
            }
            Ok(None) => BTreeMap::new(),
            Err(error) => {
                tracing::warn!(%error, "Current state unreadable, trying backups");
                self.restore_from_backup().await
            }
        }
    }

    async fn save_history(&self, history: &[StateChangeRecord]) -> bool {
        match self.try_save_history(history).await {
            Ok(()) => {
                tracing::debug!(records = history.len(), "Saved change history");
                true
            }
            Err(error) => {
                tracing::warn!(%error, "Failed to save change history");
                false
            }
        }
    }

    async fn load_history(&self) -> Vec<StateChangeRecord> {
        self.try_load_history().await.unwrap_or_else(|error| {
            tracing::warn!(%error, "Change history unreadable, starting with empty history");
            Vec::new()
        })
    }

    async fn save_snapshot(&self, snapshot: &WorldStateSnapshot) -> bool {
        let name = format!(
            "{SNAPSHOT_PREFIX}{}_{}.json",
            snapshot.version,
            snapshot.timestamp.format("%Y%m%dT%H%M%S")
        );
        let doc = SnapshotDocumentOut {
            schema_version: CURRENT_SCHEMA_VERSION,
            snapshot,
        };
        match write_json_atomic(&self.snapshots_dir().join(name), &doc).await {
            Ok(()) => {
                tracing::debug!(version = snapshot.version, "Saved snapshot");
                true
            }
            Err(error) => {
                tracing::warn!(version = snapshot.version, %error, "Failed to save snapshot");
                false
            }
        }
    }

    async fn load_snapshots(&self) -> Vec<WorldStateSnapshot> {
        let mut snapshots: BTreeMap<u64, WorldStateSnapshot> = BTreeMap::new();
        for (version, path) in self.list_snapshot_files().await {
            match Self::try_load_snapshot(&path).await {
                Ok(Some(snapshot)) => {
                    snapshots.insert(snapshot.version, snapshot);
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(version, %error, "Skipping unreadable snapshot");
                }
            }
        }
        snapshots.into_values().collect()
    }

    async fn stored_snapshot_versions(&self) -> Vec<u64> {
        let mut versions: Vec<u64> = self
            .list_snapshot_files()
            .await
            .into_iter()
            .map(|(version, _)| version)
            .collect();
        versions.dedup();
        versions
    }

    async fn delete_snapshot(&self, version: u64) -> bool {
        let mut removed = false;
        for (_, path) in self
            .list_snapshot_files()
            .await
            .into_iter()
            .filter(|(v, _)| *v == version)
        {
            match fs::remove_file(&path).await {
                Ok(()) => removed = true,
                Err(error) => {
                    tracing::warn!(version, %error, "Failed to delete snapshot file");
                }
            }
        }
        removed
    }

    async fn delete_changes_before(&self, cutoff: DateTime<Utc>) -> usize {
        let history = match self.try_load_history().await {
            Ok(history) => history,
            Err(error) => {
                tracing::warn!(%error, "Change history unreadable, nothing pruned");
                return 0;
            }
        };
        let mut log = ChangeLog::from_records(history);
        let removed = log.prune_before(cutoff);
        if removed > 0 && !self.save_history(&log.to_records()).await {
            return 0;
        }
        removed
    }
}

// ---------------------------------------------------------------------------
// File helpers
// ---------------------------------------------------------------------------

/// Sortable timestamp for file and directory names.
fn file_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%S%.6fZ").to_string()
}

/// The version encoded in a `snapshot_v<N>_<timestamp>.json` file name.
fn parse_snapshot_version(name: &str) -> Option<u64> {
    let rest = name.strip_prefix(SNAPSHOT_PREFIX)?;
    if !rest.ends_with(".json") {
        return None;
    }
    let (version, _) = rest.split_once('_')?;
    version.parse().ok()
}

/// Serialize `value` to `path` through a temporary sibling file.
async fn write_json_atomic<T: Serialize + Sync>(path: &Path, value: &T) -> Result<(), DbError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

/// Read and parse a JSON file; `None` if it does not exist.
async fn read_json(path: &Path) -> Result<Option<Value>, DbError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error.into()),
    }
}

/// Entries of `dir` as `(path, is_dir)`, sorted by path. A missing
/// directory has no entries.
async fn list_dir(dir: &Path) -> Result<Vec<(PathBuf, bool)>, DbError> {
    let mut reader = match fs::read_dir(dir).await {
        Ok(reader) => reader,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => return Err(error.into()),
    };
    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        let is_dir = entry.file_type().await?.is_dir();
        entries.push((entry.path(), is_dir));
    }
    entries.sort();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_names_parse() {
        assert_eq!(parse_snapshot_version("snapshot_v12_20260101T000000.json"), Some(12));
        assert_eq!(parse_snapshot_version("snapshot_v12_20260101T000000.json.tmp"), None);
        assert_eq!(parse_snapshot_version("snapshot_vx_1.json"), None);
        assert_eq!(parse_snapshot_version("state.json"), None);
    }

    #[test]
    fn stamps_sort_chronologically() {
        let earlier = DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default();
        let later = DateTime::from_timestamp(1_700_000_000, 5_000).unwrap_or_default();
        assert!(file_stamp(earlier) < file_stamp(later));
    }
}
