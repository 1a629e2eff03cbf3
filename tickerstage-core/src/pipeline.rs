//! Wiring from configuration to a running batch for one source.

use crate::config::IngestConfig;
use crate::download::{
    resume_targets, run_batch, BatchSummary, DownloadProgress, Downloader, FilingsDownloader,
    NewsDownloader, PricesDownloader, Source,
};
use crate::source::{newsapi, EdgarClient, EdgarEndpoints, FetchError, NewsApiClient, YahooProvider};
use crate::tracker::{ProgressTracker, TrackerError};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("failed to build {source_name} client: {error}")]
    Client {
        source_name: &'static str,
        error: FetchError,
    },
}

/// Options for one source run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Discard the manifest and start every id from scratch.
    pub fresh: bool,
    /// Worker threads; 1 runs strictly in order.
    pub jobs: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            fresh: false,
            jobs: 1,
        }
    }
}

/// Open (or recreate) the manifest for `source` and pick the ids to attempt.
///
/// On resume, only requested ids that are not completed are returned, in
/// manifest order. Failed ids with `resume.max_retries` runs behind them are
/// marked skipped and left out.
pub fn plan(
    source: Source,
    config: &IngestConfig,
    ids: &[String],
    fresh: bool,
) -> Result<(Arc<ProgressTracker>, Vec<String>), TrackerError> {
    let path = source.manifest_path(&config.output_dir);
    if fresh {
        let tracker = ProgressTracker::fresh(path, ids)?;
        let targets = tracker.pending();
        return Ok((Arc::new(tracker), targets));
    }

    let tracker = ProgressTracker::initialize(path, ids)?;
    let requested: HashSet<&str> = ids.iter().map(String::as_str).collect();
    let targets: Vec<String> = resume_targets(&tracker, config.resume.max_retries)?
        .into_iter()
        .filter(|id| requested.contains(id.as_str()))
        .collect();
    let done = ids.len().saturating_sub(targets.len());
    if done > 0 {
        tracing::info!(%source, already_done = done, remaining = targets.len(), "resuming");
    }
    Ok((Arc::new(tracker), targets))
}

/// Build the network-backed downloader for `source`.
pub fn build_downloader(
    source: Source,
    config: &IngestConfig,
    tracker: Arc<ProgressTracker>,
) -> Result<Box<dyn Downloader>, PipelineError> {
    let client_error = |error: FetchError| PipelineError::Client {
        source_name: source.name(),
        error,
    };
    let out = &config.output_dir;
    let downloader: Box<dyn Downloader> = match source {
        Source::Prices => {
            let provider = match &config.prices.base_url {
                Some(url) => YahooProvider::with_base_url(url, config.timeout()),
                None => YahooProvider::new(config.timeout()),
            }
            .map_err(client_error)?;
            Box::new(PricesDownloader::new(
                Box::new(provider),
                tracker,
                out,
                &config.prices,
            ))
        }
        Source::Filings => {
            let user_agent = config.filings.user_agent();
            let client = EdgarClient::new(
                user_agent.as_deref(),
                EdgarEndpoints::default(),
                config.filings.min_request_interval(),
                config.timeout(),
            )
            .map_err(client_error)?;
            Box::new(FilingsDownloader::new(
                Box::new(client),
                tracker,
                out,
                &config.filings,
            ))
        }
        Source::News => {
            let base_url = config
                .news
                .base_url
                .as_deref()
                .unwrap_or(newsapi::DEFAULT_BASE_URL);
            let client = NewsApiClient::new(config.news.api_key(), base_url, config.timeout())
                .map_err(client_error)?;
            Box::new(NewsDownloader::new(
                Box::new(client),
                tracker,
                out,
                &config.news,
            ))
        }
    };
    Ok(downloader)
}

/// Plan, build and run one source over `ids`.
pub fn run_source(
    source: Source,
    config: &IngestConfig,
    ids: &[String],
    options: &RunOptions,
    progress: &dyn DownloadProgress,
) -> Result<BatchSummary, PipelineError> {
    let (tracker, targets) = plan(source, config, ids, options.fresh)?;
    if targets.is_empty() {
        tracing::info!(%source, "nothing to do");
    }
    let downloader = build_downloader(source, config, tracker)?;
    let mut summary = run_batch(
        downloader.as_ref(),
        &targets,
        options.jobs.max(1),
        progress,
    )?;
    summary.note_skipped(downloader.tracker(), ids);
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &tempfile::TempDir) -> IngestConfig {
        IngestConfig {
            output_dir: dir.path().to_path_buf(),
            ..IngestConfig::default()
        }
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn resume_plan_excludes_completed_and_unrequested() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        {
            let (tracker, targets) = plan(Source::Prices, &cfg, &ids(&["A", "B", "C"]), false).unwrap();
            assert_eq!(targets, ids(&["A", "B", "C"]));
            tracker.mark_in_progress("A").unwrap();
            tracker.mark_completed("A", 1, "a", "abc").unwrap();
        }
        let (_, targets) = plan(Source::Prices, &cfg, &ids(&["A", "C", "D"]), false).unwrap();
        assert_eq!(targets, ids(&["C", "D"]));

        let (_, targets) = plan(Source::Prices, &cfg, &ids(&["A", "C"]), true).unwrap();
        assert_eq!(targets, ids(&["A", "C"]));
    }

    #[test]
    fn one_exhausted_run_leaves_resume_budget() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        let tickers = ids(&["MSFT"]);
        let spec_attempts = cfg.prices.retry.attempts();
        {
            let (tracker, _) = plan(Source::Prices, &cfg, &tickers, false).unwrap();
            tracker.mark_in_progress("MSFT").unwrap();
            for _ in 1..spec_attempts {
                tracker.record_retry("MSFT").unwrap();
            }
            tracker.mark_failed("MSFT", "gave up").unwrap();
        }
        for _ in 1..cfg.resume.max_retries {
            let (tracker, targets) = plan(Source::Prices, &cfg, &tickers, false).unwrap();
            assert_eq!(targets, tickers);
            tracker.mark_in_progress("MSFT").unwrap();
            tracker.mark_failed("MSFT", "gave up").unwrap();
        }

        let (tracker, targets) = plan(Source::Prices, &cfg, &tickers, false).unwrap();
        assert!(targets.is_empty());
        let mut summary = BatchSummary {
            source: Source::Prices,
            total: 0,
            succeeded: 0,
            failed: Vec::new(),
            skipped: Vec::new(),
        };
        summary.note_skipped(&tracker, &tickers);
        assert_eq!(summary.skipped, vec![("MSFT".to_string(), "gave up".to_string())]);
        assert!(!summary.all_succeeded());
    }

    #[test]
    fn manifests_live_under_their_source() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        plan(Source::News, &cfg, &ids(&["AAPL"]), false).unwrap();
        assert!(dir.path().join("news/download_manifest.json").exists());
    }
}
