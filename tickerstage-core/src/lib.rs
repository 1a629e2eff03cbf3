//! Tickerstage Core: resumable, validated ingestion of market data.
//!
//! Three sources feed a local staging area:
//! - daily OHLCV price histories
//! - SEC regulatory filings
//! - recent news articles
//!
//! Every source goes through the same skeleton: a persisted progress
//! tracker, a bounded retry policy, a per-source validator, then atomic
//! persistence with MD5 checksums.

pub mod checksum;
pub mod config;
pub mod download;
pub mod pipeline;
pub mod retry;
pub mod source;
pub mod storage;
pub mod tracker;
pub mod universe;
pub mod validate;

pub use config::{ConfigError, IngestConfig};
pub use download::{
    resume_targets, run_batch, verify_item, BatchSummary, DownloadProgress, Downloader,
    ItemIntegrity, LogProgress, Source,
};
pub use retry::{ErrorKind, RetryError, RetryPolicy, RetrySpec};
pub use tracker::{ItemProgress, ItemStatus, Manifest, ProgressTracker, TrackerError};
pub use validate::ValidationVerdict;
