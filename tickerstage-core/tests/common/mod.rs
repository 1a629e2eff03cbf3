//! In-memory sources shared by the integration tests.

#![allow(dead_code)]

use chrono::{Duration, NaiveDate, Utc};
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tickerstage_core::source::{
    ArticleRecord, FetchError, FilingEntry, FilingIndex, FilingSource, NewsSource, OhlcvColumn,
    PriceBar, PriceHistory, PriceSource,
};

pub fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Calls made per ticker, shared between a fake and the test holding it.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<HashMap<String, u32>>>);

impl CallLog {
    fn bump(&self, ticker: &str) -> u32 {
        let mut calls = self.0.lock().unwrap();
        let n = calls.entry(ticker.to_string()).or_insert(0);
        *n += 1;
        *n
    }

    pub fn count(&self, ticker: &str) -> u32 {
        self.0.lock().unwrap().get(ticker).copied().unwrap_or(0)
    }
}

/// Clean daily bars starting 2020-01-02.
pub fn clean_bars(rows: usize) -> Vec<PriceBar> {
    let start = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();
    (0..rows)
        .map(|i| {
            let close = 100.0 + (i % 10) as f64;
            PriceBar {
                date: start + Duration::days(i as i64),
                open: Some(close - 0.5),
                high: Some(close + 1.0),
                low: Some(close - 1.0),
                close: Some(close),
                adj_close: Some(close),
                volume: Some(1_000_000 + i as u64),
            }
        })
        .collect()
}

// ── Prices ──────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct FakePrices {
    rows: usize,
    /// The first `flaky` calls per ticker time out.
    flaky: u32,
    unreachable: HashSet<String>,
    pub calls: CallLog,
}

impl FakePrices {
    pub fn new(rows: usize) -> Self {
        Self {
            rows,
            flaky: 0,
            unreachable: HashSet::new(),
            calls: CallLog::default(),
        }
    }

    pub fn flaky(mut self, failures: u32) -> Self {
        self.flaky = failures;
        self
    }

    pub fn unreachable(mut self, ticker: &str) -> Self {
        self.unreachable.insert(ticker.to_string());
        self
    }
}

impl PriceSource for FakePrices {
    fn name(&self) -> &str {
        "fake_prices"
    }

    fn fetch_history(
        &self,
        ticker: &str,
        period: &str,
        interval: &str,
    ) -> Result<PriceHistory, FetchError> {
        let call = self.calls.bump(ticker);
        if self.unreachable.contains(ticker) || call <= self.flaky {
            return Err(FetchError::Timeout(format!("{ticker} timed out")));
        }
        Ok(PriceHistory {
            ticker: ticker.to_string(),
            period: period.to_string(),
            interval: interval.to_string(),
            columns: OhlcvColumn::ALL.to_vec(),
            bars: clean_bars(self.rows),
        })
    }
}

// ── Filings ─────────────────────────────────────────────────────────

pub const AAPL_CIK: &str = "0000320193";

/// One known filer (AAPL) with a 10-K, a 10-Q and a few 8-Ks.
#[derive(Clone)]
pub struct FakeEdgar {
    tickers: BTreeMap<String, String>,
    ten_k_bytes: usize,
    /// 429s served before the ticker map succeeds.
    map_failures: u32,
    /// 429s served per form before its document succeeds.
    document_failures: u32,
    missing_user_agent: bool,
    pub calls: CallLog,
}

impl FakeEdgar {
    pub fn new() -> Self {
        let mut tickers = BTreeMap::new();
        tickers.insert("AAPL".to_string(), AAPL_CIK.to_string());
        Self {
            tickers,
            ten_k_bytes: 150_000,
            map_failures: 0,
            document_failures: 0,
            missing_user_agent: false,
            calls: CallLog::default(),
        }
    }

    pub fn flaky_map(mut self, failures: u32) -> Self {
        self.map_failures = failures;
        self
    }

    pub fn flaky_documents(mut self, failures: u32) -> Self {
        self.document_failures = failures;
        self
    }

    /// Behave like a client built without a contact user agent.
    pub fn without_user_agent(mut self) -> Self {
        self.missing_user_agent = true;
        self
    }

    /// Serve a 10-K of `bytes` bytes.
    pub fn with_ten_k_size(mut self, bytes: usize) -> Self {
        self.ten_k_bytes = bytes;
        self
    }
}

fn recent_date(days_ago: i64) -> String {
    (Utc::now().date_naive() - Duration::days(days_ago))
        .format("%Y-%m-%d")
        .to_string()
}

fn entry(form: &str, seq: u32, days_ago: i64) -> FilingEntry {
    FilingEntry {
        accession_number: format!("{AAPL_CIK}-24-{seq:06}"),
        filing_date: recent_date(days_ago),
        form_type: form.to_string(),
        primary_document: format!("aapl-{}-{seq}.htm", form.to_lowercase()),
        report_date: None,
    }
}

fn document(form: &str, size: usize) -> Vec<u8> {
    let head = format!(
        "<html><body><p>UNITED STATES SECURITIES AND EXCHANGE COMMISSION</p>\
         <p>Washington, D.C. 20549</p><p>FORM {form}</p><p>Apple Inc.</p>\
         <p>Commission File Number 001-36743</p>"
    );
    let mut body = head.into_bytes();
    body.resize(size, b' ');
    body
}

impl FilingSource for FakeEdgar {
    fn name(&self) -> &str {
        "fake_edgar"
    }

    fn ticker_map(&self) -> Result<BTreeMap<String, String>, FetchError> {
        let n = self.calls.bump("ticker_map");
        if self.missing_user_agent {
            return Err(FetchError::Config(
                "SEC EDGAR requires a contact user agent".into(),
            ));
        }
        if n <= self.map_failures {
            return Err(FetchError::RateLimited { status: 429 });
        }
        Ok(self.tickers.clone())
    }

    fn filing_index(&self, cik: &str) -> Result<FilingIndex, FetchError> {
        self.calls.bump(cik);
        if cik != AAPL_CIK {
            return Err(FetchError::NotFound(format!("CIK{cik}")));
        }
        Ok(FilingIndex {
            cik: cik.to_string(),
            company_name: "Apple Inc.".to_string(),
            entries: vec![
                entry("8-K", 5, 3),
                entry("10-Q", 4, 20),
                entry("8-K", 3, 40),
                entry("10-K", 2, 90),
                entry("8-K", 1, 120),
            ],
        })
    }

    fn document_url(&self, cik: &str, entry: &FilingEntry) -> String {
        format!(
            "https://www.sec.gov/Archives/edgar/data/{}/{}/{}",
            cik.trim_start_matches('0'),
            entry.accession_number.replace('-', ""),
            entry.primary_document
        )
    }

    fn fetch_document(&self, _cik: &str, entry: &FilingEntry) -> Result<Vec<u8>, FetchError> {
        let n = self.calls.bump(&format!("document {}", entry.form_type));
        if n <= self.document_failures {
            return Err(FetchError::RateLimited { status: 429 });
        }
        let size = match entry.form_type.as_str() {
            "10-K" => self.ten_k_bytes,
            "10-Q" => 60_000,
            _ => 5_000,
        };
        Ok(document(&entry.form_type, size))
    }
}

// ── News ────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct FakeNews {
    /// Tickers with no coverage return an empty list.
    silent: HashSet<String>,
    pub calls: CallLog,
}

impl FakeNews {
    pub fn silent(mut self, ticker: &str) -> Self {
        self.silent.insert(ticker.to_string());
        self
    }
}

pub fn article(ticker: &str, n: usize) -> ArticleRecord {
    json!({
        "ticker": ticker,
        "source": "Reuters",
        "title": format!("{ticker} headline number {n} for the week"),
        "description": format!("A longer description of story {n} about {ticker} and its markets."),
        "url": format!("https://news.example.com/{}/story-{n}?utm_source=feed", ticker.to_lowercase()),
        "published_at": format!("2024-05-{:02}T12:00:00Z", n + 1),
    })
    .as_object()
    .cloned()
    .unwrap()
}

impl NewsSource for FakeNews {
    fn name(&self) -> &str {
        "fake_news"
    }

    fn fetch_recent(&self, ticker: &str, limit: usize) -> Result<Vec<ArticleRecord>, FetchError> {
        self.calls.bump(ticker);
        if self.silent.contains(ticker) {
            return Ok(Vec::new());
        }
        Ok((0..limit.min(5)).map(|n| article(ticker, n)).collect())
    }
}
