//! End-to-end ingestion runs against in-memory sources.

mod common;

use common::{ids, FakeEdgar, FakeNews, FakePrices};
use std::path::Path;
use std::sync::Arc;
use tickerstage_core::checksum::{is_md5_hex, md5_file, verify_checksum_file, Integrity};
use tickerstage_core::config::{FilingsConfig, NewsConfig, PricesConfig};
use tickerstage_core::download::{
    FilingsDownloader, NewsDownloader, PricesDownloader, MANIFEST_FILE,
};
use tickerstage_core::pipeline::plan;
use tickerstage_core::storage::decode_parquet;
use tickerstage_core::{
    resume_targets, run_batch, verify_item, Downloader, IngestConfig, ItemIntegrity, ItemStatus,
    LogProgress, ProgressTracker, RetrySpec, Source,
};

fn prices_config(max_attempts: u32) -> PricesConfig {
    PricesConfig {
        retry: RetrySpec::immediate(max_attempts),
        ..PricesConfig::default()
    }
}

fn tracker_for(out: &Path, source: Source, tickers: &[String]) -> Arc<ProgressTracker> {
    Arc::new(ProgressTracker::initialize(source.manifest_path(out), tickers).unwrap())
}

fn prices_downloader(out: &Path, fake: &FakePrices, tickers: &[String]) -> PricesDownloader {
    PricesDownloader::new(
        Box::new(fake.clone()),
        tracker_for(out, Source::Prices, tickers),
        out,
        &prices_config(3),
    )
}

fn manifest_json(out: &Path, source: Source) -> serde_json::Value {
    let bytes = std::fs::read(source.manifest_path(out)).unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ── Prices ──────────────────────────────────────────────────────────

#[test]
fn clean_history_is_completed_with_checksum() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path();
    let tickers = ids(&["AAPL"]);
    let fake = FakePrices::new(250);
    let downloader = prices_downloader(out, &fake, &tickers);

    assert!(downloader.download_item("AAPL").unwrap());

    let tracker = downloader.tracker();
    assert_eq!(tracker.completed(), vec!["AAPL"]);
    assert!(tracker.pending().is_empty());

    let item = tracker.item("AAPL").unwrap();
    assert_eq!(item.status, ItemStatus::Completed);
    assert_eq!(item.record_count, Some(250));
    assert_eq!(item.attempts, 1);
    let checksum = item.checksum.unwrap();
    assert!(is_md5_hex(&checksum));

    let manifest = manifest_json(out, Source::Prices);
    assert_eq!(manifest["items"][0]["status"], "completed");
    assert_eq!(manifest["items"][0]["recordCount"], 250);
    assert_eq!(manifest["completed"], 1);
    assert_eq!(manifest["pending"], 0);

    let ticker_dir = out.join("prices/AAPL");
    let parquet = ticker_dir.join("prices_5y_1d.parquet");
    assert!(parquet.exists());
    assert!(ticker_dir.join("metadata.json").exists());
    assert_eq!(md5_file(&parquet).unwrap(), checksum);
    assert_eq!(verify_checksum_file(&ticker_dir).unwrap(), Integrity::Intact);

    let df = decode_parquet(&std::fs::read(&parquet).unwrap()).unwrap();
    assert_eq!(df.height(), 250);
}

#[test]
fn short_history_is_rejected_and_not_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path();
    let tickers = ids(&["IPO"]);
    let downloader = prices_downloader(out, &FakePrices::new(50), &tickers);

    assert!(!downloader.download_item("IPO").unwrap());

    let item = downloader.tracker().item("IPO").unwrap();
    assert_eq!(item.status, ItemStatus::Failed);
    let error = item.error_message.unwrap();
    assert!(error.contains("Insufficient records: 50 < 200 required"), "{error}");
    assert!(item.checksum.is_none());
    assert!(!out.join("prices/IPO/prices_5y_1d.parquet").exists());
}

#[test]
fn retries_are_bounded_by_max_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path();
    let tickers = ids(&["MSFT"]);
    let fake = FakePrices::new(250).unreachable("MSFT");
    let downloader = prices_downloader(out, &fake, &tickers);

    assert!(!downloader.download_item("MSFT").unwrap());

    assert_eq!(fake.calls.count("MSFT"), 3);
    let item = downloader.tracker().item("MSFT").unwrap();
    assert_eq!(item.attempts, 3);
    assert_eq!(item.status, ItemStatus::Failed);
    assert!(item.error_message.unwrap().contains("gave up after 3 attempts"));
    assert_eq!(downloader.tracker().failed(), vec!["MSFT"]);
}

#[test]
fn transient_failures_recover_within_budget() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path();
    let tickers = ids(&["AAPL"]);
    let fake = FakePrices::new(250).flaky(2);
    let downloader = prices_downloader(out, &fake, &tickers);

    assert!(downloader.download_item("AAPL").unwrap());
    let item = downloader.tracker().item("AAPL").unwrap();
    assert_eq!(item.status, ItemStatus::Completed);
    assert_eq!(item.attempts, 3);
    assert!(item.error_message.is_none());
}

#[test]
fn resume_only_reprocesses_unfinished_items() {
    let dir = tempfile::tempdir().unwrap();
    let config = IngestConfig {
        output_dir: dir.path().to_path_buf(),
        ..IngestConfig::default()
    };
    let tickers = ids(&["AAPL", "MSFT", "GOOG"]);
    let fake = FakePrices::new(250).unreachable("MSFT");

    let (tracker, targets) = plan(Source::Prices, &config, &tickers, false).unwrap();
    assert_eq!(targets, tickers);
    let first = PricesDownloader::new(
        Box::new(fake.clone()),
        tracker,
        &config.output_dir,
        &prices_config(2),
    );
    let summary = run_batch(&first, &targets, 1, &LogProgress).unwrap();
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, "MSFT");
    drop(first);

    // A new process picks the manifest up from disk.
    let (tracker, targets) = plan(Source::Prices, &config, &tickers, false).unwrap();
    assert_eq!(targets, vec!["MSFT"]);
    assert_eq!(tracker.completed(), vec!["AAPL", "GOOG"]);
    let second = PricesDownloader::new(
        Box::new(fake.clone()),
        tracker,
        &config.output_dir,
        &prices_config(2),
    );
    run_batch(&second, &targets, 1, &LogProgress).unwrap();

    assert_eq!(fake.calls.count("AAPL"), 1);
    assert_eq!(fake.calls.count("GOOG"), 1);
    assert_eq!(fake.calls.count("MSFT"), 4);
    assert_eq!(second.tracker().item("MSFT").unwrap().attempts, 4);

    // Fresh start discards the manifest.
    let (tracker, targets) = plan(Source::Prices, &config, &tickers, true).unwrap();
    assert_eq!(targets, tickers);
    assert!(tracker.completed().is_empty());
}

#[test]
fn exhausted_items_are_skipped_on_resume() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path();
    let tickers = ids(&["MSFT", "AAPL"]);
    let fake = FakePrices::new(250).unreachable("MSFT");
    let downloader = prices_downloader(out, &fake, &tickers);
    let tracker = downloader.tracker();

    downloader.download_item("MSFT").unwrap();
    assert!(tracker.should_retry("MSFT", 3));
    downloader.download_item("MSFT").unwrap();
    downloader.download_item("MSFT").unwrap();
    let item = tracker.item("MSFT").unwrap();
    assert_eq!((item.attempts, item.runs), (9, 3));
    assert!(!tracker.should_retry("MSFT", 3));

    assert_eq!(resume_targets(tracker, 3).unwrap(), vec!["AAPL"]);
    assert_eq!(tracker.skipped(), vec!["MSFT"]);

    let reloaded = ProgressTracker::open(Source::Prices.manifest_path(out)).unwrap();
    assert_eq!(reloaded.item("MSFT").unwrap().status, ItemStatus::Skipped);
}

#[test]
fn exhausted_run_with_default_retries_is_retried_on_resume() {
    let dir = tempfile::tempdir().unwrap();
    let config = IngestConfig {
        output_dir: dir.path().to_path_buf(),
        ..IngestConfig::default()
    };
    let retry = RetrySpec {
        delays_ms: vec![0],
        ..config.prices.retry.clone()
    };
    let prices = PricesConfig {
        retry,
        ..config.prices.clone()
    };
    let per_run = prices.retry.attempts();
    let tickers = ids(&["MSFT"]);
    let fake = FakePrices::new(250).unreachable("MSFT");

    let run = |expected_targets: &[String]| {
        let (tracker, targets) = plan(Source::Prices, &config, &tickers, false).unwrap();
        assert_eq!(targets, expected_targets);
        let downloader =
            PricesDownloader::new(Box::new(fake.clone()), tracker, &config.output_dir, &prices);
        let mut summary = run_batch(&downloader, &targets, 1, &LogProgress).unwrap();
        summary.note_skipped(downloader.tracker(), &tickers);
        (summary, downloader.tracker().item("MSFT").unwrap())
    };

    let (summary, item) = run(&tickers);
    assert!(!summary.all_succeeded());
    assert_eq!((item.attempts, item.runs), (per_run, 1));

    // Every resume within the budget attempts the item again.
    for runs in 2..=config.resume.max_retries {
        let (summary, item) = run(&tickers);
        assert!(!summary.all_succeeded());
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(item.runs, runs);
    }
    assert_eq!(fake.calls.count("MSFT"), per_run * config.resume.max_retries);

    // Past the budget the item is skipped, and the run still reports it unfinished.
    let (summary, item) = run(&[]);
    assert_eq!(item.status, ItemStatus::Skipped);
    assert!(summary.failed.is_empty());
    assert_eq!(summary.skipped.len(), 1);
    assert!(summary.skipped[0].1.contains("gave up after"));
    assert!(!summary.all_succeeded());
    assert_eq!(fake.calls.count("MSFT"), per_run * config.resume.max_retries);
}

#[test]
fn parallel_batch_completes_every_item() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path();
    let tickers = ids(&["AAPL", "MSFT", "GOOG", "AMZN", "NVDA", "META", "JPM", "XOM"]);
    let fake = FakePrices::new(220);
    let downloader = prices_downloader(out, &fake, &tickers);

    let summary = run_batch(&downloader, &tickers, 4, &LogProgress).unwrap();
    assert!(summary.all_succeeded());
    assert_eq!(summary.succeeded, tickers.len());

    let reloaded = ProgressTracker::open(out.join("prices").join(MANIFEST_FILE)).unwrap();
    assert_eq!(reloaded.completed(), tickers);
    let s = reloaded.summary();
    assert_eq!(s.completed, 8);
    assert_eq!(s.completion_rate, 100.0);
    for t in &tickers {
        assert_eq!(
            verify_item(&reloaded, t).unwrap(),
            ItemIntegrity::Checked(Integrity::Intact)
        );
    }
}

#[test]
fn tampered_artifact_fails_verification() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path();
    let tickers = ids(&["AAPL"]);
    let downloader = prices_downloader(out, &FakePrices::new(250), &tickers);
    assert!(downloader.download_item("AAPL").unwrap());

    let parquet = out.join("prices/AAPL/prices_5y_1d.parquet");
    let mut bytes = std::fs::read(&parquet).unwrap();
    bytes.push(0);
    std::fs::write(&parquet, bytes).unwrap();

    assert!(matches!(
        verify_item(downloader.tracker(), "AAPL").unwrap(),
        ItemIntegrity::Checked(Integrity::Mismatch { .. })
    ));
}

// ── Filings ─────────────────────────────────────────────────────────

fn filings_config() -> FilingsConfig {
    FilingsConfig {
        retry: RetrySpec::immediate(2),
        ..FilingsConfig::default()
    }
}

fn filings_downloader(out: &Path, fake: &FakeEdgar, tickers: &[String]) -> FilingsDownloader {
    FilingsDownloader::new(
        Box::new(fake.clone()),
        tracker_for(out, Source::Filings, tickers),
        out,
        &filings_config(),
    )
}

#[test]
fn filings_are_downloaded_per_form() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path();
    let tickers = ids(&["AAPL"]);
    let fake = FakeEdgar::new();
    let downloader = filings_downloader(out, &fake, &tickers);

    assert!(downloader.download_item("AAPL").unwrap());

    let item = downloader.tracker().item("AAPL").unwrap();
    assert_eq!(item.status, ItemStatus::Completed);
    assert_eq!(item.record_count, Some(2));

    let ticker_dir = out.join("filings/AAPL");
    let ten_k = ticker_dir.join("10-K");
    assert!(ten_k.join("aapl-10-k-2.htm").exists());
    assert!(ten_k.join("filing_metadata.json").exists());
    assert_eq!(verify_checksum_file(&ten_k).unwrap(), Integrity::Intact);
    assert_eq!(
        verify_checksum_file(&ticker_dir.join("10-Q")).unwrap(),
        Integrity::Intact
    );

    let metadata: serde_json::Value =
        serde_json::from_slice(&std::fs::read(ticker_dir.join("item_metadata.json")).unwrap())
            .unwrap();
    assert_eq!(metadata["cik"], common::AAPL_CIK);
    assert_eq!(metadata["total_files"], 2);
    assert_eq!(metadata["recent_events"].as_array().unwrap().len(), 3);
    assert_eq!(
        verify_item(downloader.tracker(), "AAPL").unwrap(),
        ItemIntegrity::Checked(Integrity::Intact)
    );

    assert!(out.join("filings/cik_cache.json").exists());
}

#[test]
fn unknown_ticker_fails_with_lookup_error() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path();
    let tickers = ids(&["ZZZZ"]);
    let downloader = filings_downloader(out, &FakeEdgar::new(), &tickers);

    assert!(!downloader.download_item("ZZZZ").unwrap());

    let tracker = downloader.tracker();
    assert_eq!(tracker.failed(), vec!["ZZZZ"]);
    let item = tracker.item("ZZZZ").unwrap();
    assert_eq!(item.status, ItemStatus::Failed);
    assert!(item.error_message.unwrap().contains("lookup"));
}

#[test]
fn cik_mapping_is_fetched_once_per_run() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path();
    let tickers = ids(&["AAPL", "ZZZZ", "QQQQ"]);
    let fake = FakeEdgar::new();
    let downloader = filings_downloader(out, &fake, &tickers);

    run_batch(&downloader, &tickers, 1, &LogProgress).unwrap();
    assert_eq!(fake.calls.count("ticker_map"), 1);
    drop(downloader);

    // Cached CIKs skip the bulk mapping on the next run.
    let fresh_fake = FakeEdgar::new();
    let tracker = ProgressTracker::fresh(Source::Filings.manifest_path(out), &ids(&["AAPL"])).unwrap();
    let again = FilingsDownloader::new(
        Box::new(fresh_fake.clone()),
        Arc::new(tracker),
        out,
        &filings_config(),
    );
    assert!(again.download_item("AAPL").unwrap());
    assert_eq!(fresh_fake.calls.count("ticker_map"), 0);
}

#[test]
fn undersized_annual_report_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path();
    let tickers = ids(&["AAPL"]);
    let fake = FakeEdgar::new().with_ten_k_size(5_000);
    let downloader = filings_downloader(out, &fake, &tickers);

    assert!(!downloader.download_item("AAPL").unwrap());
    let error = downloader.tracker().item("AAPL").unwrap().error_message.unwrap();
    assert!(error.contains("validation failed"), "{error}");
    assert!(error.contains("File size 5000 bytes"), "{error}");
}

#[test]
fn shared_ticker_map_retries_are_not_charged_to_a_ticker() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path();
    let tickers = ids(&["AAPL"]);
    let fake = FakeEdgar::new().flaky_map(1);
    let downloader = filings_downloader(out, &fake, &tickers);

    assert!(downloader.download_item("AAPL").unwrap());
    assert_eq!(fake.calls.count("ticker_map"), 2);
    let item = downloader.tracker().item("AAPL").unwrap();
    assert_eq!((item.attempts, item.runs), (1, 1));
}

#[test]
fn rate_limited_documents_stay_within_attempt_bound() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path();
    let tickers = ids(&["AAPL"]);
    let fake = FakeEdgar::new().flaky_documents(1);
    let downloader = filings_downloader(out, &fake, &tickers);

    assert!(downloader.download_item("AAPL").unwrap());
    assert_eq!(fake.calls.count("document 10-K"), 2);
    assert_eq!(fake.calls.count("document 10-Q"), 2);
    let item = downloader.tracker().item("AAPL").unwrap();
    assert_eq!(item.status, ItemStatus::Completed);
    assert_eq!(item.attempts, filings_config().retry.attempts());
}

#[test]
fn missing_user_agent_is_reported_as_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path();
    let tickers = ids(&["AAPL"]);
    let fake = FakeEdgar::new().without_user_agent();
    let downloader = filings_downloader(out, &fake, &tickers);

    assert!(!downloader.download_item("AAPL").unwrap());
    assert_eq!(fake.calls.count("ticker_map"), 1);
    let error = downloader.tracker().item("AAPL").unwrap().error_message.unwrap();
    assert!(error.contains("configuration error"), "{error}");
    assert!(error.contains("user agent"), "{error}");
    assert!(!error.contains("mapping unavailable"), "{error}");
}

// ── News ────────────────────────────────────────────────────────────

fn news_downloader(out: &Path, fake: &FakeNews, tickers: &[String]) -> NewsDownloader {
    let config = NewsConfig {
        retry: RetrySpec::immediate(2),
        ..NewsConfig::default()
    };
    NewsDownloader::new(
        Box::new(fake.clone()),
        tracker_for(out, Source::News, tickers),
        out,
        &config,
    )
}

#[test]
fn news_batch_is_persisted_as_parquet() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path();
    let tickers = ids(&["AAPL"]);
    let downloader = news_downloader(out, &FakeNews::default(), &tickers);

    assert!(downloader.download_item("AAPL").unwrap());

    let item = downloader.tracker().item("AAPL").unwrap();
    assert_eq!(item.record_count, Some(5));
    let file = out.join("news/AAPL/articles_recent.parquet");
    let df = decode_parquet(&std::fs::read(&file).unwrap()).unwrap();
    assert_eq!(df.height(), 5);
    assert_eq!(md5_file(&file).unwrap(), item.checksum.unwrap());
}

#[test]
fn ticker_without_coverage_fails_with_no_data() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path();
    let tickers = ids(&["TINY"]);
    let fake = FakeNews::default().silent("TINY");
    let downloader = news_downloader(out, &fake, &tickers);

    assert!(!downloader.download_item("TINY").unwrap());
    let error = downloader.tracker().item("TINY").unwrap().error_message.unwrap();
    assert!(error.contains("no data"), "{error}");
    assert_eq!(fake.calls.count("TINY"), 1);
}
