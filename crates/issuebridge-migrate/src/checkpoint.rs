//! Migration checkpoints.
//!
//! A checkpoint records, per source issue, whether it was migrated and which
//! target number it received. It also carries the signature of the
//! source/target pair so a file is never resumed against another repository.

use crate::error::{MigrationError, Result};
use crate::text::IssueIdMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::debug;

/// Progress of a single source issue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub source_id: u64,
    pub target_id: Option<u64>,
    pub migrated: bool,
    pub in_progress: bool,
}

/// Storage for migration checkpoints.
pub trait CheckpointStore: Send + Sync {
    /// Signature of the run that owns this checkpoint.
    fn signature(&self) -> Result<Option<String>>;

    /// Record the signature of the current run.
    fn set_signature(&self, signature: &str) -> Result<()>;

    /// State of one source issue.
    fn entry(&self, source_id: u64) -> Result<Option<CheckpointEntry>>;

    /// Flag an issue as submitted but not yet confirmed.
    fn mark_in_progress(&self, source_id: u64) -> Result<()>;

    /// Flag an issue as migrated, with its target number when known.
    fn mark_migrated(&self, source_id: u64, target_id: Option<u64>) -> Result<()>;

    /// Drop the in-progress flag of an issue that never reached the target.
    fn clear_in_progress(&self, source_id: u64) -> Result<()>;

    /// Every recorded entry, ordered by source id.
    fn entries(&self) -> Result<Vec<CheckpointEntry>>;

    /// Source id to target id for every migrated issue with a known number.
    fn id_map(&self) -> Result<IssueIdMap> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.migrated)
            .filter_map(|e| e.target_id.map(|target| (e.source_id, target)))
            .collect())
    }

    /// Whether an issue is already migrated.
    fn is_migrated(&self, source_id: u64) -> Result<bool> {
        Ok(self.entry(source_id)?.is_some_and(|e| e.migrated))
    }
}

impl<T: CheckpointStore> CheckpointStore for Arc<T> {
    fn signature(&self) -> Result<Option<String>> {
        (**self).signature()
    }

    fn set_signature(&self, signature: &str) -> Result<()> {
        (**self).set_signature(signature)
    }

    fn entry(&self, source_id: u64) -> Result<Option<CheckpointEntry>> {
        (**self).entry(source_id)
    }

    fn mark_in_progress(&self, source_id: u64) -> Result<()> {
        (**self).mark_in_progress(source_id)
    }

    fn mark_migrated(&self, source_id: u64, target_id: Option<u64>) -> Result<()> {
        (**self).mark_migrated(source_id, target_id)
    }

    fn clear_in_progress(&self, source_id: u64) -> Result<()> {
        (**self).clear_in_progress(source_id)
    }

    fn entries(&self) -> Result<Vec<CheckpointEntry>> {
        (**self).entries()
    }
}

/// Check `store` against the current run, claiming it if it is fresh.
pub fn claim(store: &dyn CheckpointStore, signature: &str) -> Result<()> {
    match store.signature()? {
        Some(found) if found != signature => Err(MigrationError::CheckpointMismatch {
            expected: signature.to_string(),
            found,
        }),
        Some(_) => Ok(()),
        None => store.set_signature(signature),
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct CheckpointState {
    signature: Option<String>,
    #[serde(default)]
    issues: BTreeMap<u64, CheckpointEntry>,
}

impl CheckpointState {
    fn update(&mut self, source_id: u64, f: impl FnOnce(&mut CheckpointEntry)) {
        let entry = self.issues.entry(source_id).or_insert(CheckpointEntry {
            source_id,
            ..Default::default()
        });
        f(entry);
    }
}

/// Checkpoint kept in memory for the duration of a run.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    state: RwLock<CheckpointState>,
}

impl MemoryCheckpointStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn signature(&self) -> Result<Option<String>> {
        Ok(self.state.read().signature.clone())
    }

    fn set_signature(&self, signature: &str) -> Result<()> {
        self.state.write().signature = Some(signature.to_string());
        Ok(())
    }

    fn entry(&self, source_id: u64) -> Result<Option<CheckpointEntry>> {
        Ok(self.state.read().issues.get(&source_id).copied())
    }

    fn mark_in_progress(&self, source_id: u64) -> Result<()> {
        self.state
            .write()
            .update(source_id, |e| e.in_progress = true);
        Ok(())
    }

    fn mark_migrated(&self, source_id: u64, target_id: Option<u64>) -> Result<()> {
        self.state.write().update(source_id, |e| {
            e.migrated = true;
            e.in_progress = false;
            e.target_id = target_id;
        });
        Ok(())
    }

    fn clear_in_progress(&self, source_id: u64) -> Result<()> {
        self.state
            .write()
            .update(source_id, |e| e.in_progress = false);
        Ok(())
    }

    fn entries(&self) -> Result<Vec<CheckpointEntry>> {
        Ok(self.state.read().issues.values().copied().collect())
    }
}

/// Checkpoint persisted as JSON, rewritten atomically after every update.
#[derive(Debug)]
pub struct JsonFileCheckpointStore {
    path: PathBuf,
    state: RwLock<CheckpointState>,
}

impl JsonFileCheckpointStore {
    /// Open the checkpoint at `path`, starting empty if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            serde_json::from_str(&text).map_err(|e| {
                MigrationError::Checkpoint(format!("{} is not a checkpoint: {e}", path.display()))
            })?
        } else {
            CheckpointState::default()
        };
        debug!(path = %path.display(), issues = state.issues.len(), "Opened checkpoint");

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    fn modify(&self, f: impl FnOnce(&mut CheckpointState)) -> Result<()> {
        let mut state = self.state.write();
        let mut next = state.clone();
        f(&mut next);
        self.persist(&next)?;
        *state = next;
        Ok(())
    }

    fn persist(&self, state: &CheckpointState) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut file = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut file, state)?;
        file.flush()?;
        file.persist(&self.path)
            .map_err(|e| MigrationError::IoError(e.error))?;
        Ok(())
    }
}

impl CheckpointStore for JsonFileCheckpointStore {
    fn signature(&self) -> Result<Option<String>> {
        Ok(self.state.read().signature.clone())
    }

    fn set_signature(&self, signature: &str) -> Result<()> {
        self.modify(|s| s.signature = Some(signature.to_string()))
    }

    fn entry(&self, source_id: u64) -> Result<Option<CheckpointEntry>> {
        Ok(self.state.read().issues.get(&source_id).copied())
    }

    fn mark_in_progress(&self, source_id: u64) -> Result<()> {
        self.modify(|s| s.update(source_id, |e| e.in_progress = true))
    }

    fn mark_migrated(&self, source_id: u64, target_id: Option<u64>) -> Result<()> {
        self.modify(|s| {
            s.update(source_id, |e| {
                e.migrated = true;
                e.in_progress = false;
                e.target_id = target_id;
            })
        })
    }

    fn clear_in_progress(&self, source_id: u64) -> Result<()> {
        self.modify(|s| s.update(source_id, |e| e.in_progress = false))
    }

    fn entries(&self) -> Result<Vec<CheckpointEntry>> {
        Ok(self.state.read().issues.values().copied().collect())
    }
}
