//! Daily price history downloader.
//!
//! Layout per ticker:
//! `prices/<TICKER>/prices_<period>_<interval>.parquet`, `metadata.json`, `checksum.md5`.

use super::{
    fetch_with_retry, item_dir, run_item, Completion, DatasetMetadata, Downloader, ItemAttempts,
    ItemError, Source,
};
use crate::config::PricesConfig;
use crate::retry::RetryPolicy;
use crate::source::PriceSource;
use crate::storage;
use crate::tracker::{ProgressTracker, TrackerError};
use crate::validate::TimeSeriesValidator;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct PricesDownloader {
    source: Box<dyn PriceSource>,
    tracker: Arc<ProgressTracker>,
    policy: RetryPolicy,
    validator: TimeSeriesValidator,
    root: PathBuf,
    period: String,
    interval: String,
}

impl PricesDownloader {
    pub fn new(
        source: Box<dyn PriceSource>,
        tracker: Arc<ProgressTracker>,
        output_dir: &Path,
        config: &PricesConfig,
    ) -> Self {
        Self {
            source,
            tracker,
            policy: RetryPolicy::new(config.retry.clone()),
            validator: TimeSeriesValidator::new(config.rules.clone()),
            root: Source::Prices.dir(output_dir),
            period: config.period.clone(),
            interval: config.interval.clone(),
        }
    }

    fn file_name(&self) -> String {
        format!("prices_{}_{}.parquet", self.period, self.interval)
    }

    fn acquire(
        &self,
        ticker: &str,
        attempts: &ItemAttempts<'_>,
    ) -> Result<Completion, ItemError> {
        let history = fetch_with_retry(&self.policy, attempts, "price history", || {
            self.source
                .fetch_history(ticker, &self.period, &self.interval)
        })?;
        if history.bars.is_empty() {
            return Err(ItemError::NoData(ticker.to_string()));
        }

        let bytes = storage::encode_prices(&history.bars)?;
        let verdict = self.validator.validate(&history, &bytes);
        if !verdict.is_valid {
            return Err(ItemError::rejected(&verdict));
        }

        let dir = item_dir(&self.root, ticker);
        let file_name = self.file_name();
        let file_path = dir.join(&file_name);
        storage::write_atomic(&file_path, &bytes)?;

        let metadata = DatasetMetadata::new(
            ticker,
            Source::Prices,
            self.source.name(),
            &file_name,
            bytes.len() as u64,
            &verdict,
        );
        storage::write_json(&dir.join("metadata.json"), &metadata)?;
        storage::write_checksum_file(&dir, &verdict.checksum, &file_name)?;

        Ok(Completion {
            record_count: verdict.record_count as u64,
            file_path,
            checksum: verdict.checksum,
        })
    }
}

impl Downloader for PricesDownloader {
    fn source(&self) -> Source {
        Source::Prices
    }

    fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    fn download_item(&self, id: &str) -> Result<bool, TrackerError> {
        let max_attempts = self.policy.spec().attempts();
        run_item(&self.tracker, Source::Prices, id, max_attempts, |attempts| {
            self.acquire(id, attempts)
        })
    }
}
