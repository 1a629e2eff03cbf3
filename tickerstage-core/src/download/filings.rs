//! Regulatory filings downloader.
//!
//! For each ticker: resolve the CIK (cache first, then the bulk mapping),
//! fetch the filer's index, download the latest document of each configured
//! form and list recent event filings. Layout:
//!
//! ```text
//! filings/cik_cache.json
//! filings/<TICKER>/item_metadata.json
//! filings/<TICKER>/<FORM>/<document>, filing_metadata.json, checksum.md5
//! ```

use super::{
    fetch_with_retry, item_dir, run_item, Completion, Downloader, ItemAttempts, ItemError, Source,
};
use crate::checksum::md5_hex;
use crate::config::FilingsConfig;
use crate::retry::{Classify, ErrorKind, RetryPolicy};
use crate::source::{FilingEntry, FilingIndex, FilingMetadata, FilingSource};
use crate::storage;
use crate::tracker::{ProgressTracker, TrackerError};
use crate::validate::FilingValidator;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const CIK_CACHE_FILE: &str = "cik_cache.json";
pub const ITEM_METADATA_FILE: &str = "item_metadata.json";
pub const FILING_METADATA_FILE: &str = "filing_metadata.json";

/// `filing_metadata.json` for one downloaded document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilingRecord {
    #[serde(flatten)]
    pub metadata: FilingMetadata,
    pub file_name: String,
    pub file_size_bytes: u64,
    pub checksum: String,
    pub downloaded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// A recent event filing, listed but not downloaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFiling {
    pub form_type: String,
    pub accession_number: String,
    pub filing_date: String,
    pub report_date: Option<String>,
    pub source_url: String,
}

/// `item_metadata.json` aggregating one ticker's filings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub ticker: String,
    pub cik: String,
    pub company_name: String,
    pub downloaded_at: DateTime<Utc>,
    pub filings: Vec<FilingRecord>,
    /// Configured forms the filer has not filed.
    pub absent_forms: Vec<String>,
    pub recent_events: Vec<EventFiling>,
    pub total_files: usize,
    pub total_bytes: u64,
}

/// Ticker → CIK lookups, persisted between runs.
struct CikCache {
    path: PathBuf,
    resolved: BTreeMap<String, String>,
    /// Bulk mapping, fetched at most once per run.
    bulk: Option<BTreeMap<String, String>>,
}

impl CikCache {
    fn load(path: PathBuf) -> Self {
        let resolved = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable CIK cache");
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot read CIK cache, starting empty");
                BTreeMap::new()
            }
        };
        Self {
            path,
            resolved,
            bulk: None,
        }
    }

    fn remember(&mut self, ticker: &str, cik: &str) {
        self.resolved.insert(ticker.to_string(), cik.to_string());
        if let Err(e) = storage::write_json(&self.path, &self.resolved) {
            tracing::warn!(error = %e, "failed to persist CIK cache");
        }
    }
}

pub struct FilingsDownloader {
    source: Box<dyn FilingSource>,
    tracker: Arc<ProgressTracker>,
    policy: RetryPolicy,
    validator: FilingValidator,
    root: PathBuf,
    forms: Vec<String>,
    event_form: String,
    max_event_filings: usize,
    ciks: Mutex<CikCache>,
}

impl FilingsDownloader {
    pub fn new(
        source: Box<dyn FilingSource>,
        tracker: Arc<ProgressTracker>,
        output_dir: &Path,
        config: &FilingsConfig,
    ) -> Self {
        let root = Source::Filings.dir(output_dir);
        Self {
            source,
            tracker,
            policy: RetryPolicy::new(config.retry.clone()),
            validator: FilingValidator::new(config.rules.clone()),
            ciks: Mutex::new(CikCache::load(root.join(CIK_CACHE_FILE))),
            root,
            forms: config.forms.clone(),
            event_form: config.event_form.clone(),
            max_event_filings: config.max_event_filings,
        }
    }

    /// Resolve `ticker` to a zero-padded CIK.
    ///
    /// The bulk mapping is shared by the whole run, so its retries are not
    /// charged to the ticker that happened to trigger the fetch.
    fn resolve_cik(&self, ticker: &str) -> Result<String, ItemError> {
        let key = ticker.to_uppercase();
        let mut cache = self
            .ciks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(cik) = cache.resolved.get(&key) {
            tracing::debug!(ticker, cik = %cik, "CIK from cache");
            return Ok(cik.clone());
        }

        if cache.bulk.is_none() {
            let map = self
                .policy
                .execute("ticker map", || self.source.ticker_map())
                .map_err(|e| match e.last_error().kind() {
                    ErrorKind::Config => ItemError::Fetch(e),
                    _ => ItemError::Lookup(format!("ticker to CIK mapping unavailable: {e}")),
                })?;
            tracing::info!(entries = map.len(), "fetched ticker to CIK mapping");
            cache.bulk = Some(map);
        }

        let cik = cache
            .bulk
            .as_ref()
            .and_then(|m| m.get(&key))
            .cloned()
            .ok_or_else(|| ItemError::Lookup(format!("no CIK found for ticker {ticker}")))?;
        cache.remember(&key, &cik);
        Ok(cik)
    }

    fn fetch_filing(
        &self,
        ticker: &str,
        index: &FilingIndex,
        entry: &FilingEntry,
        attempts: &ItemAttempts<'_>,
    ) -> Result<(Vec<u8>, FilingMetadata), ItemError> {
        let what = format!("{} document", entry.form_type);
        let content = fetch_with_retry(&self.policy, attempts, &what, || {
            self.source.fetch_document(&index.cik, entry)
        })?;

        let mut extra = BTreeMap::new();
        extra.insert("primary_document".to_string(), entry.primary_document.clone());
        if let Some(report_date) = &entry.report_date {
            extra.insert("report_date".to_string(), report_date.clone());
        }
        let metadata = FilingMetadata {
            ticker: ticker.to_string(),
            cik: index.cik.clone(),
            company_name: index.company_name.clone(),
            form_type: entry.form_type.clone(),
            filing_date: entry.filing_date.clone(),
            accession_number: entry.accession_number.clone(),
            source_url: self.source.document_url(&index.cik, entry),
            extra,
        };
        Ok((content, metadata))
    }

    fn persist_filing(
        &self,
        dir: &Path,
        entry: &FilingEntry,
        content: &[u8],
        metadata: FilingMetadata,
        warnings: Vec<String>,
        checksum: String,
    ) -> Result<FilingRecord, ItemError> {
        let form_dir = dir.join(entry.form_type.replace(' ', "_"));
        let file_name = document_file_name(&entry.primary_document);
        storage::write_atomic(&form_dir.join(&file_name), content)?;

        let record = FilingRecord {
            metadata,
            file_name: file_name.clone(),
            file_size_bytes: content.len() as u64,
            checksum,
            downloaded_at: Utc::now(),
            warnings,
        };
        storage::write_json(&form_dir.join(FILING_METADATA_FILE), &record)?;
        storage::write_checksum_file(&form_dir, &record.checksum, &file_name)?;
        Ok(record)
    }

    fn acquire(
        &self,
        ticker: &str,
        attempts: &ItemAttempts<'_>,
    ) -> Result<Completion, ItemError> {
        let cik = self.resolve_cik(ticker)?;
        let index = fetch_with_retry(&self.policy, attempts, "filing index", || {
            self.source.filing_index(&cik)
        })?;
        let dir = item_dir(&self.root, ticker);

        let mut filings = Vec::new();
        let mut absent_forms = Vec::new();
        let mut rejected = Vec::new();
        for form in &self.forms {
            let Some(entry) = index.latest(form) else {
                tracing::info!(ticker, form = %form, "form not in filer index, skipping");
                absent_forms.push(form.clone());
                continue;
            };
            let (content, metadata) = self.fetch_filing(ticker, &index, entry, attempts)?;
            let verdict = self.validator.validate(&content, &metadata, ticker, form);
            if !verdict.is_valid {
                rejected.push(format!("{form}: {}", verdict.issue_summary()));
                continue;
            }
            filings.push(self.persist_filing(
                &dir,
                entry,
                &content,
                metadata,
                verdict.warnings,
                verdict.checksum,
            )?);
        }

        if !rejected.is_empty() {
            return Err(ItemError::Validation(rejected.join(" | ")));
        }
        if filings.is_empty() {
            return Err(ItemError::NoData(format!(
                "{ticker} (none of {} filed)",
                self.forms.join(", ")
            )));
        }

        let recent_events = index
            .recent(&self.event_form, self.max_event_filings)
            .into_iter()
            .map(|e| EventFiling {
                form_type: e.form_type.clone(),
                accession_number: e.accession_number.clone(),
                filing_date: e.filing_date.clone(),
                report_date: e.report_date.clone(),
                source_url: self.source.document_url(&index.cik, e),
            })
            .collect();

        let item = ItemMetadata {
            ticker: ticker.to_string(),
            cik: index.cik.clone(),
            company_name: index.company_name.clone(),
            downloaded_at: Utc::now(),
            total_files: filings.len(),
            total_bytes: filings.iter().map(|f| f.file_size_bytes).sum(),
            filings,
            absent_forms,
            recent_events,
        };
        let file_path = dir.join(ITEM_METADATA_FILE);
        let bytes = storage::write_json(&file_path, &item)?;

        Ok(Completion {
            record_count: item.total_files as u64,
            file_path,
            checksum: md5_hex(&bytes),
        })
    }
}

impl Downloader for FilingsDownloader {
    fn source(&self) -> Source {
        Source::Filings
    }

    fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    fn download_item(&self, id: &str) -> Result<bool, TrackerError> {
        let max_attempts = self.policy.spec().attempts();
        run_item(&self.tracker, Source::Filings, id, max_attempts, |attempts| {
            self.acquire(id, attempts)
        })
    }
}

/// Last path segment of a primary document name.
fn document_file_name(primary_document: &str) -> String {
    Path::new(primary_document)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("document")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_names_are_flattened() {
        assert_eq!(document_file_name("aapl-20240928.htm"), "aapl-20240928.htm");
        assert_eq!(document_file_name("xslF345X05/form4.xml"), "form4.xml");
        assert_eq!(document_file_name(""), "document");
    }

    #[test]
    fn cik_cache_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CIK_CACHE_FILE);
        let mut cache = CikCache::load(path.clone());
        cache.remember("AAPL", "0000320193");

        let reloaded = CikCache::load(path);
        assert_eq!(
            reloaded.resolved.get("AAPL").map(String::as_str),
            Some("0000320193")
        );
    }

    #[test]
    fn corrupt_cik_cache_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CIK_CACHE_FILE);
        std::fs::write(&path, "not json").unwrap();
        assert!(CikCache::load(path).resolved.is_empty());
    }

    #[test]
    fn missing_or_unreadable_cik_cache_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CikCache::load(dir.path().join(CIK_CACHE_FILE)).resolved.is_empty());

        // A directory in place of the cache file cannot be read as one.
        let blocked = dir.path().join("blocked");
        std::fs::create_dir(&blocked).unwrap();
        assert!(CikCache::load(blocked).resolved.is_empty());
    }
}
