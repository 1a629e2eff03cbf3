//! Persisted per-item progress for resumable ingestion runs.
//!
//! One [`ProgressTracker`] owns one manifest file. Every mutation rewrites the
//! whole manifest atomically before returning, so a crash between operations
//! leaves the last applied state on disk. Mutations are serialised behind a
//! single mutex; the tracker can be shared across worker threads.

use crate::storage::{self, StorageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("corrupt manifest {path}: {reason}")]
    CorruptManifest { path: String, reason: String },

    #[error("no manifest at {0}")]
    NoManifest(String),

    #[error("failed to persist manifest {path}: {source}")]
    Persist { path: String, source: StorageError },

    #[error("unknown item: {0}")]
    UnknownItem(String),

    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: ItemStatus,
        to: ItemStatus,
    },

    #[error("cannot complete {id} without a checksum and file path")]
    MissingArtifact { id: String },
}

/// Status of one tracked item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ItemStatus::Pending => "pending",
            ItemStatus::InProgress => "in_progress",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
            ItemStatus::Skipped => "skipped",
        })
    }
}

/// Resume state for one download unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemProgress {
    pub id: String,
    pub status: ItemStatus,
    /// Fetch attempts, including retries inside one call.
    pub attempts: u32,
    /// Downloader calls started for this item; the resume budget counts these.
    #[serde(default)]
    pub runs: u32,
    pub last_attempt_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub record_count: Option<u64>,
    pub file_path: Option<String>,
    pub checksum: Option<String>,
    pub completed_at_time: Option<DateTime<Utc>>,
}

impl ItemProgress {
    pub fn pending(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ItemStatus::Pending,
            attempts: 0,
            runs: 0,
            last_attempt_time: None,
            error_message: None,
            record_count: None,
            file_path: None,
            checksum: None,
            completed_at_time: None,
        }
    }
}

/// Durable snapshot of every item in one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,
    pub last_updated_time: DateTime<Utc>,
    pub total_items: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    pub items: Vec<ItemProgress>,
}

impl Manifest {
    pub fn new(ids: &[String]) -> Self {
        let mut manifest = Self {
            schema_version: SCHEMA_VERSION,
            last_updated_time: Utc::now(),
            total_items: 0,
            completed: 0,
            failed: 0,
            pending: 0,
            items: Vec::with_capacity(ids.len()),
        };
        for id in ids {
            if !manifest.items.iter().any(|i| &i.id == id) {
                manifest.items.push(ItemProgress::pending(id.clone()));
            }
        }
        manifest.refresh_totals();
        manifest
    }

    fn refresh_totals(&mut self) {
        self.total_items = self.items.len();
        self.completed = self.count(ItemStatus::Completed);
        self.failed = self.count(ItemStatus::Failed);
        self.pending = self.total_items - self.completed - self.failed;
    }

    fn count(&self, status: ItemStatus) -> usize {
        self.items.iter().filter(|i| i.status == status).count()
    }

    /// Reject states no tracker would have written.
    fn check(&self) -> Result<(), String> {
        if self.schema_version == 0 || self.schema_version > SCHEMA_VERSION {
            return Err(format!(
                "unsupported schema version {} (expected {SCHEMA_VERSION})",
                self.schema_version
            ));
        }
        let mut seen = HashSet::with_capacity(self.items.len());
        for item in &self.items {
            if !seen.insert(item.id.as_str()) {
                return Err(format!("duplicate item id {}", item.id));
            }
            if item.status == ItemStatus::Completed && !has_artifact(item) {
                return Err(format!("{} is completed without checksum or file path", item.id));
            }
        }
        Ok(())
    }
}

fn has_artifact(item: &ItemProgress) -> bool {
    item.checksum.as_deref().is_some_and(|c| !c.is_empty())
        && item.file_path.as_deref().is_some_and(|p| !p.is_empty())
}

/// Counts plus completion rate (percent).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub skipped: usize,
    pub completion_rate: f64,
}

struct State {
    manifest: Manifest,
    index: HashMap<String, usize>,
}

impl State {
    fn new(manifest: Manifest) -> Self {
        let index = manifest
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.id.clone(), i))
            .collect();
        Self { manifest, index }
    }

    fn push(&mut self, id: &str) {
        self.index.insert(id.to_string(), self.manifest.items.len());
        self.manifest.items.push(ItemProgress::pending(id));
    }

    fn position(&self, id: &str) -> Result<usize, TrackerError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| TrackerError::UnknownItem(id.to_string()))
    }
}

/// Owner of one manifest file.
pub struct ProgressTracker {
    path: PathBuf,
    state: Mutex<State>,
}

impl ProgressTracker {
    /// Load the manifest at `path`, appending any of `ids` it lacks, or create
    /// a new all-pending manifest when none exists.
    pub fn initialize(path: impl Into<PathBuf>, ids: &[String]) -> Result<Self, TrackerError> {
        let path = path.into();
        match read_manifest(&path)? {
            Some(manifest) => {
                let mut state = State::new(manifest);
                let mut appended = 0usize;
                for id in ids {
                    if !state.index.contains_key(id) {
                        state.push(id);
                        appended += 1;
                    }
                }
                let tracker = Self {
                    path,
                    state: Mutex::new(state),
                };
                tracing::info!(
                    path = %tracker.path.display(),
                    appended,
                    "resuming from existing manifest"
                );
                if appended > 0 {
                    tracker.persist(&mut tracker.lock())?;
                }
                Ok(tracker)
            }
            None => Self::create(path, ids),
        }
    }

    /// Discard any existing manifest and start every id as pending.
    pub fn fresh(path: impl Into<PathBuf>, ids: &[String]) -> Result<Self, TrackerError> {
        let path = path.into();
        match fs::remove_file(&path) {
            Ok(()) => tracing::info!(path = %path.display(), "discarded previous manifest"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(TrackerError::Persist {
                    path: path.display().to_string(),
                    source: StorageError::Io {
                        path: path.display().to_string(),
                        source: e,
                    },
                })
            }
        }
        Self::create(path, ids)
    }

    /// Open an existing manifest read-mostly, without adding items.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, TrackerError> {
        let path = path.into();
        let manifest = read_manifest(&path)?
            .ok_or_else(|| TrackerError::NoManifest(path.display().to_string()))?;
        Ok(Self {
            path,
            state: Mutex::new(State::new(manifest)),
        })
    }

    fn create(path: PathBuf, ids: &[String]) -> Result<Self, TrackerError> {
        let tracker = Self {
            path,
            state: Mutex::new(State::new(Manifest::new(ids))),
        };
        tracker.persist(&mut tracker.lock())?;
        tracing::info!(
            path = %tracker.path.display(),
            items = ids.len(),
            "created manifest"
        );
        Ok(tracker)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ── Mutations ───────────────────────────────────────────────────

    /// Start a call: status IN_PROGRESS, attempts + 1, runs + 1.
    pub fn mark_in_progress(&self, id: &str) -> Result<(), TrackerError> {
        self.mutate(id, |item| {
            if item.status == ItemStatus::Completed {
                return Err(transition(item, ItemStatus::InProgress));
            }
            item.status = ItemStatus::InProgress;
            item.attempts += 1;
            item.runs += 1;
            item.last_attempt_time = Some(Utc::now());
            Ok(())
        })
    }

    /// Count one more attempt within the current in-progress call. Runs are unchanged.
    pub fn record_retry(&self, id: &str) -> Result<(), TrackerError> {
        self.mutate(id, |item| {
            if item.status != ItemStatus::InProgress {
                return Err(transition(item, ItemStatus::InProgress));
            }
            item.attempts += 1;
            item.last_attempt_time = Some(Utc::now());
            Ok(())
        })
    }

    pub fn mark_completed(
        &self,
        id: &str,
        record_count: u64,
        file_path: &str,
        checksum: &str,
    ) -> Result<(), TrackerError> {
        self.mutate(id, |item| {
            if item.status != ItemStatus::InProgress {
                return Err(transition(item, ItemStatus::Completed));
            }
            if file_path.is_empty() || checksum.is_empty() {
                return Err(TrackerError::MissingArtifact {
                    id: item.id.clone(),
                });
            }
            item.status = ItemStatus::Completed;
            item.error_message = None;
            item.record_count = Some(record_count);
            item.file_path = Some(file_path.to_string());
            item.checksum = Some(checksum.to_string());
            item.completed_at_time = Some(Utc::now());
            Ok(())
        })
    }

    /// Record a failure. Attempts and earlier artifacts are kept.
    pub fn mark_failed(&self, id: &str, error: &str) -> Result<(), TrackerError> {
        self.mutate(id, |item| {
            if item.status == ItemStatus::Completed {
                return Err(transition(item, ItemStatus::Failed));
            }
            item.status = ItemStatus::Failed;
            item.error_message = Some(error.to_string());
            Ok(())
        })
    }

    /// Exclude an item from further attempts. Its error message is kept.
    pub fn mark_skipped(&self, id: &str) -> Result<(), TrackerError> {
        self.mutate(id, |item| {
            if matches!(item.status, ItemStatus::Completed | ItemStatus::InProgress) {
                return Err(transition(item, ItemStatus::Skipped));
            }
            item.status = ItemStatus::Skipped;
            Ok(())
        })
    }

    // ── Projections ─────────────────────────────────────────────────

    /// Resume set: every id not yet completed, in manifest order.
    pub fn pending(&self) -> Vec<String> {
        self.ids_where(|s| s != ItemStatus::Completed)
    }

    pub fn completed(&self) -> Vec<String> {
        self.ids_where(|s| s == ItemStatus::Completed)
    }

    pub fn failed(&self) -> Vec<String> {
        self.ids_where(|s| s == ItemStatus::Failed)
    }

    pub fn skipped(&self) -> Vec<String> {
        self.ids_where(|s| s == ItemStatus::Skipped)
    }

    /// True for a failed item with fewer than `max_retries` runs behind it.
    pub fn should_retry(&self, id: &str, max_retries: u32) -> bool {
        self.item(id)
            .is_some_and(|i| i.status == ItemStatus::Failed && i.runs < max_retries)
    }

    pub fn summary(&self) -> Summary {
        let state = self.lock();
        let m = &state.manifest;
        let completed = m.count(ItemStatus::Completed);
        let total = m.items.len();
        Summary {
            total,
            completed,
            failed: m.count(ItemStatus::Failed),
            pending: m.count(ItemStatus::Pending),
            in_progress: m.count(ItemStatus::InProgress),
            skipped: m.count(ItemStatus::Skipped),
            completion_rate: if total == 0 {
                0.0
            } else {
                completed as f64 / total as f64 * 100.0
            },
        }
    }

    pub fn item(&self, id: &str) -> Option<ItemProgress> {
        let state = self.lock();
        let pos = state.index.get(id)?;
        state.manifest.items.get(*pos).cloned()
    }

    /// Copy of the current manifest.
    pub fn snapshot(&self) -> Manifest {
        self.lock().manifest.clone()
    }

    // ── Internals ───────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ids_where(&self, keep: impl Fn(ItemStatus) -> bool) -> Vec<String> {
        self.lock()
            .manifest
            .items
            .iter()
            .filter(|i| keep(i.status))
            .map(|i| i.id.clone())
            .collect()
    }

    /// Apply `change` to one item and persist; the item is restored if either fails.
    fn mutate(
        &self,
        id: &str,
        change: impl FnOnce(&mut ItemProgress) -> Result<(), TrackerError>,
    ) -> Result<(), TrackerError> {
        let mut state = self.lock();
        let pos = state.position(id)?;
        let before = state.manifest.items[pos].clone();
        change(&mut state.manifest.items[pos])?;
        if let Err(e) = self.persist(&mut state) {
            state.manifest.items[pos] = before;
            state.manifest.refresh_totals();
            return Err(e);
        }
        Ok(())
    }

    fn persist(&self, state: &mut State) -> Result<(), TrackerError> {
        state.manifest.refresh_totals();
        state.manifest.last_updated_time = Utc::now();
        storage::write_json(&self.path, &state.manifest)
            .map(|_| ())
            .map_err(|source| TrackerError::Persist {
                path: self.path.display().to_string(),
                source,
            })
    }
}

fn transition(item: &ItemProgress, to: ItemStatus) -> TrackerError {
    TrackerError::InvalidTransition {
        id: item.id.clone(),
        from: item.status,
        to,
    }
}

fn read_manifest(path: &Path) -> Result<Option<Manifest>, TrackerError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(TrackerError::CorruptManifest {
                path: path.display().to_string(),
                reason: format!("unreadable: {e}"),
            })
        }
    };
    let corrupt = |reason: String| TrackerError::CorruptManifest {
        path: path.display().to_string(),
        reason,
    };
    let manifest: Manifest = serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;
    manifest.check().map_err(corrupt)?;
    Ok(Some(manifest))
}
