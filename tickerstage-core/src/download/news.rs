//! Recent news downloader.
//!
//! Layout per ticker: `news/<TICKER>/articles_recent.parquet`, `metadata.json`,
//! `checksum.md5`.

use super::{
    fetch_with_retry, item_dir, run_item, Completion, DatasetMetadata, Downloader, ItemAttempts,
    ItemError, Source,
};
use crate::config::NewsConfig;
use crate::retry::RetryPolicy;
use crate::source::{ArticleBatch, NewsSource};
use crate::storage;
use crate::tracker::{ProgressTracker, TrackerError};
use crate::validate::NewsValidator;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const ARTICLES_FILE: &str = "articles_recent.parquet";

pub struct NewsDownloader {
    source: Box<dyn NewsSource>,
    tracker: Arc<ProgressTracker>,
    policy: RetryPolicy,
    validator: NewsValidator,
    root: PathBuf,
    page_size: usize,
}

impl NewsDownloader {
    pub fn new(
        source: Box<dyn NewsSource>,
        tracker: Arc<ProgressTracker>,
        output_dir: &Path,
        config: &NewsConfig,
    ) -> Self {
        Self {
            source,
            tracker,
            policy: RetryPolicy::new(config.retry.clone()),
            validator: NewsValidator::new(config.rules.clone()),
            root: Source::News.dir(output_dir),
            page_size: config.page_size,
        }
    }

    fn acquire(
        &self,
        ticker: &str,
        attempts: &ItemAttempts<'_>,
    ) -> Result<Completion, ItemError> {
        let records = fetch_with_retry(&self.policy, attempts, "recent news", || {
            self.source.fetch_recent(ticker, self.page_size)
        })?;
        if records.is_empty() {
            return Err(ItemError::NoData(ticker.to_string()));
        }
        let batch = ArticleBatch::from_records(&records, Utc::now());
        drop(records);

        let bytes = storage::encode_articles(&batch.articles)?;
        let verdict = self.validator.validate(&batch, &bytes, ticker);
        if !verdict.is_valid {
            return Err(ItemError::rejected(&verdict));
        }

        let dir = item_dir(&self.root, ticker);
        let file_path = dir.join(ARTICLES_FILE);
        storage::write_atomic(&file_path, &bytes)?;

        let metadata = DatasetMetadata::new(
            ticker,
            Source::News,
            self.source.name(),
            ARTICLES_FILE,
            bytes.len() as u64,
            &verdict,
        );
        storage::write_json(&dir.join("metadata.json"), &metadata)?;
        storage::write_checksum_file(&dir, &verdict.checksum, ARTICLES_FILE)?;

        Ok(Completion {
            record_count: verdict.record_count as u64,
            file_path,
            checksum: verdict.checksum,
        })
    }
}

impl Downloader for NewsDownloader {
    fn source(&self) -> Source {
        Source::News
    }

    fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    fn download_item(&self, id: &str) -> Result<bool, TrackerError> {
        let max_attempts = self.policy.spec().attempts();
        run_item(&self.tracker, Source::News, id, max_attempts, |attempts| {
            self.acquire(id, attempts)
        })
    }
}
