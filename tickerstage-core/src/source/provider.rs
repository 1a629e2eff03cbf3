//! Source traits, typed records and structured fetch errors.
//!
//! The traits abstract over upstream services (Yahoo Finance, SEC EDGAR,
//! NewsAPI) so downloaders can be driven by in-memory fakes in tests.

use crate::retry::{Classify, ErrorKind};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// ── Errors ──────────────────────────────────────────────────────────

/// Structured errors from upstream fetches.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("network unreachable: {0}")]
    Network(String),

    #[error("rate limited by provider (HTTP {status})")]
    RateLimited { status: u16 },

    #[error("server error: HTTP {status} for {url}")]
    Server { status: u16, url: String },

    #[error("request rejected: HTTP {status} for {url}")]
    Client { status: u16, url: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("empty response: {0}")]
    Empty(String),

    #[error("response format changed: {0}")]
    Malformed(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Classify for FetchError {
    fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Timeout(_) => ErrorKind::Timeout,
            FetchError::Network(_) => ErrorKind::Connection,
            FetchError::RateLimited { .. } => ErrorKind::RateLimited,
            FetchError::Server { .. } => ErrorKind::ServerError,
            FetchError::Client { .. } => ErrorKind::ClientError,
            FetchError::NotFound(_) => ErrorKind::NotFound,
            FetchError::Empty(_) => ErrorKind::EmptyResponse,
            FetchError::Malformed(_) => ErrorKind::Malformed,
            FetchError::Config(_) => ErrorKind::Config,
            FetchError::Io(_) => ErrorKind::Io,
        }
    }
}

// ── Time series ─────────────────────────────────────────────────────

/// Required OHLCV columns of a price history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OhlcvColumn {
    Open,
    High,
    Low,
    Close,
    Volume,
}

impl OhlcvColumn {
    pub const ALL: [OhlcvColumn; 5] = [
        OhlcvColumn::Open,
        OhlcvColumn::High,
        OhlcvColumn::Low,
        OhlcvColumn::Close,
        OhlcvColumn::Volume,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OhlcvColumn::Open => "Open",
            OhlcvColumn::High => "High",
            OhlcvColumn::Low => "Low",
            OhlcvColumn::Close => "Close",
            OhlcvColumn::Volume => "Volume",
        }
    }
}

/// One daily bar. Cells are `None` where the provider returned null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub adj_close: Option<f64>,
    pub volume: Option<u64>,
}

impl PriceBar {
    /// A cell counts as valid when present and finite.
    pub fn cell_is_valid(&self, column: OhlcvColumn) -> bool {
        match column {
            OhlcvColumn::Open => valid(self.open),
            OhlcvColumn::High => valid(self.high),
            OhlcvColumn::Low => valid(self.low),
            OhlcvColumn::Close => valid(self.close),
            OhlcvColumn::Volume => self.volume.is_some(),
        }
    }

    pub fn price(&self, column: OhlcvColumn) -> Option<f64> {
        match column {
            OhlcvColumn::Open => self.open,
            OhlcvColumn::High => self.high,
            OhlcvColumn::Low => self.low,
            OhlcvColumn::Close => self.close,
            OhlcvColumn::Volume => self.volume.map(|v| v as f64),
        }
        .filter(|v| v.is_finite())
    }
}

fn valid(cell: Option<f64>) -> bool {
    cell.is_some_and(f64::is_finite)
}

/// A fetched price history for one ticker.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceHistory {
    pub ticker: String,
    pub period: String,
    pub interval: String,
    /// Columns the provider actually supplied.
    pub columns: Vec<OhlcvColumn>,
    /// Bars in ascending date order.
    pub bars: Vec<PriceBar>,
}

impl PriceHistory {
    pub fn missing_columns(&self) -> Vec<OhlcvColumn> {
        OhlcvColumn::ALL
            .into_iter()
            .filter(|c| !self.columns.contains(c))
            .collect()
    }
}

// ── Filings ─────────────────────────────────────────────────────────

/// One row of a filer's recent-filings index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilingEntry {
    pub accession_number: String,
    pub filing_date: String,
    pub form_type: String,
    pub primary_document: String,
    pub report_date: Option<String>,
}

/// A filer's recent filings, newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct FilingIndex {
    pub cik: String,
    pub company_name: String,
    pub entries: Vec<FilingEntry>,
}

impl FilingIndex {
    /// Most recent entry of the given form type.
    pub fn latest(&self, form_type: &str) -> Option<&FilingEntry> {
        self.entries.iter().find(|e| e.form_type == form_type)
    }

    /// Up to `limit` most recent entries of the given form type.
    pub fn recent(&self, form_type: &str, limit: usize) -> Vec<&FilingEntry> {
        self.entries
            .iter()
            .filter(|e| e.form_type == form_type)
            .take(limit)
            .collect()
    }
}

/// Structured metadata accompanying one downloaded filing document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilingMetadata {
    pub ticker: String,
    pub cik: String,
    pub company_name: String,
    pub form_type: String,
    pub filing_date: String,
    pub accession_number: String,
    pub source_url: String,
    /// Provider-specific fields that vary between filings.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl FilingMetadata {
    /// Required fields as `(name, value)` pairs.
    pub fn required_fields(&self) -> [(&'static str, &str); 7] {
        [
            ("ticker", self.ticker.as_str()),
            ("cik", self.cik.as_str()),
            ("company_name", self.company_name.as_str()),
            ("form_type", self.form_type.as_str()),
            ("filing_date", self.filing_date.as_str()),
            ("accession_number", self.accession_number.as_str()),
            ("source_url", self.source_url.as_str()),
        ]
    }
}

// ── News ────────────────────────────────────────────────────────────

/// Loosely-typed article record as normalised by a news provider.
///
/// Keys follow [`NewsArticle`] field names. A key that is absent means the
/// provider never supplied that field; `Value::Null` means it was null.
pub type ArticleRecord = serde_json::Map<String, serde_json::Value>;

/// One article. Nullable fields are `None` where the provider sent null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsArticle {
    pub id: String,
    pub ticker: Option<String>,
    pub source: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
}

// ── Traits ──────────────────────────────────────────────────────────

/// Daily OHLCV history provider.
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch bars for `ticker` over a provider period (`"5y"`) and interval (`"1d"`).
    fn fetch_history(
        &self,
        ticker: &str,
        period: &str,
        interval: &str,
    ) -> Result<PriceHistory, FetchError>;
}

/// Regulatory filings provider.
pub trait FilingSource: Send + Sync {
    fn name(&self) -> &str;

    /// Bulk ticker → filer-identifier mapping (ticker upper-cased).
    fn ticker_map(&self) -> Result<BTreeMap<String, String>, FetchError>;

    /// Recent-filings index for a zero-padded 10-digit filer identifier.
    fn filing_index(&self, cik: &str) -> Result<FilingIndex, FetchError>;

    /// URL of an entry's primary document.
    fn document_url(&self, cik: &str, entry: &FilingEntry) -> String;

    /// Raw bytes of an entry's primary document.
    fn fetch_document(&self, cik: &str, entry: &FilingEntry) -> Result<Vec<u8>, FetchError>;
}

/// Recent-news provider.
pub trait NewsSource: Send + Sync {
    fn name(&self) -> &str;

    /// Up to `limit` recent articles mentioning `ticker`.
    fn fetch_recent(&self, ticker: &str, limit: usize) -> Result<Vec<ArticleRecord>, FetchError>;
}
