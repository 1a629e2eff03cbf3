//! Download orchestration shared by every source.
//!
//! Each [`Downloader`] runs one item through the same skeleton:
//! mark in progress, fetch under a retry policy, validate, persist, then mark
//! completed or failed. Per-item failures are recorded in the manifest and
//! reported as `Ok(false)`; only a manifest that cannot be written surfaces as
//! an error.

pub mod filings;
pub mod news;
pub mod prices;

pub use filings::FilingsDownloader;
pub use news::NewsDownloader;
pub use prices::PricesDownloader;

use crate::checksum::{self, Integrity};
use crate::retry::{RetryError, RetryPolicy};
use crate::source::FetchError;
use crate::storage::StorageError;
use crate::tracker::{ItemStatus, ProgressTracker, TrackerError};
use crate::validate::ValidationVerdict;
use chrono::{DateTime, NaiveDate, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Manifest file name inside each source directory.
pub const MANIFEST_FILE: &str = "download_manifest.json";

/// The three ingested data sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Prices,
    Filings,
    News,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::Prices, Source::Filings, Source::News];

    pub fn name(self) -> &'static str {
        match self {
            Source::Prices => "prices",
            Source::Filings => "filings",
            Source::News => "news",
        }
    }

    /// `<output_dir>/<source>`
    pub fn dir(self, output_dir: &Path) -> PathBuf {
        output_dir.join(self.name())
    }

    /// `<output_dir>/<source>/download_manifest.json`
    pub fn manifest_path(self, output_dir: &Path) -> PathBuf {
        self.dir(output_dir).join(MANIFEST_FILE)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "prices" | "price" | "timeseries" => Ok(Source::Prices),
            "filings" | "filing" | "sec" => Ok(Source::Filings),
            "news" => Ok(Source::News),
            other => Err(format!("unknown source: {other}")),
        }
    }
}

/// One source's per-item download contract.
pub trait Downloader: Send + Sync {
    fn source(&self) -> Source;

    fn tracker(&self) -> &ProgressTracker;

    /// Acquire, validate and persist one item.
    ///
    /// `Ok(false)` means the item failed and the reason is in the manifest.
    fn download_item(&self, id: &str) -> Result<bool, TrackerError>;
}

// ── Shared skeleton ─────────────────────────────────────────────────

/// Why one item attempt failed.
#[derive(Debug, Error)]
pub(crate) enum ItemError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] RetryError<FetchError>),

    #[error("no data returned for {0}")]
    NoData(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("lookup failed: {0}")]
    Lookup(String),

    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

impl ItemError {
    pub(crate) fn rejected(verdict: &ValidationVerdict) -> Self {
        ItemError::Validation(verdict.issue_summary())
    }
}

/// What a successful attempt records in the manifest.
#[derive(Debug)]
pub(crate) struct Completion {
    pub record_count: u64,
    pub file_path: PathBuf,
    pub checksum: String,
}

/// Directory holding one item's artifacts under a source root.
pub(crate) fn item_dir(root: &Path, id: &str) -> PathBuf {
    root.join(id.replace(['/', '\\'], "_"))
}

/// Attempt accounting for one `download_item` call.
///
/// `mark_in_progress` counts the call's first attempt. Retries from any of
/// the call's fetches are charged to the manifest until the call has used
/// `max_attempts`, so one call never records more than that.
pub(crate) struct ItemAttempts<'a> {
    tracker: &'a ProgressTracker,
    id: &'a str,
    uncharged: Cell<u32>,
}

impl<'a> ItemAttempts<'a> {
    fn new(tracker: &'a ProgressTracker, id: &'a str, max_attempts: u32) -> Self {
        Self {
            tracker,
            id,
            uncharged: Cell::new(max_attempts.saturating_sub(1)),
        }
    }

    fn charge_retry(&self) -> Result<(), TrackerError> {
        let left = self.uncharged.get();
        if left == 0 {
            return Ok(());
        }
        self.uncharged.set(left - 1);
        self.tracker.record_retry(self.id)
    }
}

/// Run `work` for `id` between `mark_in_progress` and the terminal mark.
pub(crate) fn run_item(
    tracker: &ProgressTracker,
    source: Source,
    id: &str,
    max_attempts: u32,
    work: impl FnOnce(&ItemAttempts<'_>) -> Result<Completion, ItemError>,
) -> Result<bool, TrackerError> {
    tracker.mark_in_progress(id)?;
    let attempts = ItemAttempts::new(tracker, id, max_attempts);
    match work(&attempts) {
        Ok(done) => {
            tracker.mark_completed(
                id,
                done.record_count,
                &done.file_path.display().to_string(),
                &done.checksum,
            )?;
            tracing::info!(
                %source,
                id,
                records = done.record_count,
                checksum = %done.checksum,
                "item completed"
            );
            Ok(true)
        }
        Err(ItemError::Tracker(e)) => Err(e),
        Err(e) => {
            let message = e.to_string();
            tracker.mark_failed(id, &message)?;
            tracing::warn!(%source, id, error = %message, "item failed");
            Ok(false)
        }
    }
}

/// Run one fetch under `policy`, charging its retries to the current call.
pub(crate) fn fetch_with_retry<T>(
    policy: &RetryPolicy,
    attempts: &ItemAttempts<'_>,
    what: &str,
    op: impl FnMut() -> Result<T, FetchError>,
) -> Result<T, ItemError> {
    let mut persist_error = None;
    let result = policy.execute_with(what, op, |_, _| {
        if persist_error.is_none() {
            persist_error = attempts.charge_retry().err();
        }
    });
    if let Some(e) = persist_error {
        return Err(ItemError::Tracker(e));
    }
    Ok(result?)
}

/// `metadata.json` written next to a persisted dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub ticker: String,
    pub source: String,
    pub provider: String,
    pub downloaded_at: DateTime<Utc>,
    pub file_name: String,
    pub file_size_bytes: u64,
    pub record_count: usize,
    pub completeness_score: f64,
    pub null_percentage: f64,
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    pub checksum: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl DatasetMetadata {
    pub(crate) fn new(
        ticker: &str,
        source: Source,
        provider: &str,
        file_name: &str,
        file_size_bytes: u64,
        verdict: &ValidationVerdict,
    ) -> Self {
        Self {
            ticker: ticker.to_string(),
            source: source.name().to_string(),
            provider: provider.to_string(),
            downloaded_at: Utc::now(),
            file_name: file_name.to_string(),
            file_size_bytes,
            record_count: verdict.record_count,
            completeness_score: verdict.completeness_score,
            null_percentage: verdict.null_percentage,
            date_range: verdict.date_range,
            checksum: verdict.checksum.clone(),
            warnings: verdict.warnings.clone(),
        }
    }
}

// ── Batch driver ────────────────────────────────────────────────────

/// Progress callbacks for a batch.
pub trait DownloadProgress: Send + Sync {
    fn on_start(&self, source: Source, id: &str, index: usize, total: usize);

    fn on_complete(&self, source: Source, id: &str, index: usize, total: usize, ok: bool);

    fn on_batch_complete(&self, summary: &BatchSummary);
}

/// Progress reporter that logs through `tracing`.
pub struct LogProgress;

impl DownloadProgress for LogProgress {
    fn on_start(&self, source: Source, id: &str, index: usize, total: usize) {
        tracing::info!(%source, id, "[{}/{total}] downloading", index + 1);
    }

    fn on_complete(&self, source: Source, id: &str, index: usize, total: usize, ok: bool) {
        if ok {
            tracing::info!(%source, id, "[{}/{total}] ok", index + 1);
        } else {
            tracing::warn!(%source, id, "[{}/{total}] failed", index + 1);
        }
    }

    fn on_batch_complete(&self, summary: &BatchSummary) {
        tracing::info!(
            source = %summary.source,
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed.len(),
            "batch complete"
        );
    }
}

/// Outcome of one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub source: Source,
    pub total: usize,
    pub succeeded: usize,
    /// `(id, recorded error)` for every item that failed, in input order.
    pub failed: Vec<(String, String)>,
    /// `(id, last recorded error)` for requested items left out because their
    /// retry budget is spent.
    pub skipped: Vec<(String, String)>,
}

impl BatchSummary {
    /// True only when no requested item is left unfinished.
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    /// Fill `skipped` with the requested ids the manifest marks skipped.
    pub fn note_skipped(&mut self, tracker: &ProgressTracker, requested: &[String]) {
        self.skipped = requested
            .iter()
            .filter_map(|id| {
                let item = tracker.item(id)?;
                (item.status == ItemStatus::Skipped)
                    .then(|| (id.clone(), item.error_message.unwrap_or_default()))
            })
            .collect();
    }
}

/// Download `ids` in order, or on a pool of `jobs` workers when `jobs > 1`.
///
/// Stops at the first manifest persistence failure.
pub fn run_batch(
    downloader: &dyn Downloader,
    ids: &[String],
    jobs: usize,
    progress: &dyn DownloadProgress,
) -> Result<BatchSummary, TrackerError> {
    let source = downloader.source();
    let total = ids.len();
    let one = |(index, id): (usize, &String)| -> Result<bool, TrackerError> {
        progress.on_start(source, id, index, total);
        let ok = downloader.download_item(id)?;
        progress.on_complete(source, id, index, total, ok);
        Ok(ok)
    };

    let outcomes: Vec<bool> = if jobs > 1 && total > 1 {
        match rayon::ThreadPoolBuilder::new().num_threads(jobs).build() {
            Ok(pool) => pool.install(|| {
                ids.par_iter()
                    .enumerate()
                    .map(one)
                    .collect::<Result<Vec<bool>, TrackerError>>()
            })?,
            Err(e) => {
                tracing::warn!(error = %e, "worker pool unavailable, running sequentially");
                ids.iter()
                    .enumerate()
                    .map(one)
                    .collect::<Result<Vec<bool>, TrackerError>>()?
            }
        }
    } else {
        ids.iter()
            .enumerate()
            .map(one)
            .collect::<Result<Vec<bool>, TrackerError>>()?
    };

    let tracker = downloader.tracker();
    let failed = ids
        .iter()
        .zip(&outcomes)
        .filter(|(_, ok)| !**ok)
        .map(|(id, _)| {
            let error = tracker
                .item(id)
                .and_then(|i| i.error_message)
                .unwrap_or_default();
            (id.clone(), error)
        })
        .collect();

    let summary = BatchSummary {
        source,
        total,
        succeeded: outcomes.iter().filter(|ok| **ok).count(),
        failed,
        skipped: Vec::new(),
    };
    progress.on_batch_complete(&summary);
    Ok(summary)
}

/// Ids to attempt on a resumed run, in manifest order.
///
/// Completed and skipped items are left out. Failed items with `max_retries`
/// runs behind them are marked skipped; retries inside a run do not count.
/// `max_retries == 0` means no cap.
pub fn resume_targets(
    tracker: &ProgressTracker,
    max_retries: u32,
) -> Result<Vec<String>, TrackerError> {
    let mut targets = Vec::new();
    for id in tracker.pending() {
        let Some(item) = tracker.item(&id) else {
            continue;
        };
        match item.status {
            ItemStatus::Skipped => {}
            ItemStatus::Failed if max_retries > 0 && item.runs >= max_retries => {
                tracing::warn!(
                    id = %id,
                    runs = item.runs,
                    attempts = item.attempts,
                    max_retries,
                    "retry budget spent, skipping"
                );
                tracker.mark_skipped(&id)?;
            }
            _ => targets.push(id),
        }
    }
    Ok(targets)
}

/// Integrity of one item's recorded artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemIntegrity {
    /// The item is not completed; nothing to check.
    NotCompleted,
    Checked(Integrity),
}

/// Re-hash the file a completed item points at and compare with its checksum.
pub fn verify_item(tracker: &ProgressTracker, id: &str) -> Result<ItemIntegrity, TrackerError> {
    let item = tracker
        .item(id)
        .ok_or_else(|| TrackerError::UnknownItem(id.to_string()))?;
    let (ItemStatus::Completed, Some(path), Some(expected)) =
        (item.status, item.file_path, item.checksum)
    else {
        return Ok(ItemIntegrity::NotCompleted);
    };
    let integrity = match checksum::verify_file(Path::new(&path), &expected) {
        Ok(integrity) => integrity,
        Err(e) => {
            tracing::warn!(id, path = %path, error = %e, "artifact unreadable");
            Integrity::Missing
        }
    };
    Ok(ItemIntegrity::Checked(integrity))
}
