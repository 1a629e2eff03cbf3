//! SEC EDGAR filings client.
//!
//! Endpoints:
//! - `{www}/files/company_tickers.json`: bulk ticker → CIK mapping
//! - `{data}/submissions/CIK##########.json`: a filer's recent-filings index
//! - `{www}/Archives/edgar/data/{cik}/{accession}/{document}`: documents
//!
//! EDGAR rejects requests without a contact user agent and throttles clients
//! above ten requests per second. Every request goes through one shared
//! [`RateLimiter`].

use super::http;
use super::provider::{FetchError, FilingEntry, FilingIndex, FilingSource};
use super::rate_limit::RateLimiter;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_WWW_URL: &str = "https://www.sec.gov";
pub const DEFAULT_DATA_URL: &str = "https://data.sec.gov";

#[derive(Debug, Deserialize)]
struct TickerRow {
    cik_str: u64,
    ticker: String,
}

#[derive(Debug, Deserialize)]
struct Submissions {
    name: Option<String>,
    filings: SubmissionFilings,
}

#[derive(Debug, Deserialize)]
struct SubmissionFilings {
    recent: RecentFilings,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecentFilings {
    accession_number: Vec<String>,
    filing_date: Vec<String>,
    form: Vec<String>,
    primary_document: Vec<String>,
    #[serde(default)]
    report_date: Vec<String>,
}

/// Endpoint roots, overridable for tests and mirrors.
#[derive(Debug, Clone)]
pub struct EdgarEndpoints {
    pub www: String,
    pub data: String,
}

impl Default for EdgarEndpoints {
    fn default() -> Self {
        Self {
            www: DEFAULT_WWW_URL.to_string(),
            data: DEFAULT_DATA_URL.to_string(),
        }
    }
}

/// EDGAR client. `None` user agent makes every request a configuration error.
pub struct EdgarClient {
    client: Option<Client>,
    endpoints: EdgarEndpoints,
    limiter: RateLimiter,
}

impl EdgarClient {
    pub fn new(
        user_agent: Option<&str>,
        endpoints: EdgarEndpoints,
        min_request_interval: Duration,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = match user_agent.map(str::trim).filter(|ua| !ua.is_empty()) {
            Some(ua) => Some(http::build_client(timeout, ua)?),
            None => {
                tracing::warn!("no EDGAR contact user agent configured; filings will fail");
                None
            }
        };
        Ok(Self {
            client,
            endpoints,
            limiter: RateLimiter::new(min_request_interval),
        })
    }

    fn client(&self) -> Result<&Client, FetchError> {
        self.client.as_ref().ok_or_else(|| {
            FetchError::Config(
                "SEC EDGAR requires a contact user agent (set filings.user_agent or SEC_USER_AGENT)"
                    .into(),
            )
        })
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let client = self.client()?;
        tracing::debug!(%url, "EDGAR request");
        self.limiter.run(|| http::send_json(client.get(url)))
    }
}

impl FilingSource for EdgarClient {
    fn name(&self) -> &str {
        "sec_edgar"
    }

    fn ticker_map(&self) -> Result<BTreeMap<String, String>, FetchError> {
        let url = format!("{}/files/company_tickers.json", self.endpoints.www);
        let rows: BTreeMap<String, TickerRow> = self.get_json(&url)?;
        if rows.is_empty() {
            return Err(FetchError::Empty(url));
        }
        Ok(rows
            .into_values()
            .map(|row| (row.ticker.to_uppercase(), pad_cik(row.cik_str)))
            .collect())
    }

    fn filing_index(&self, cik: &str) -> Result<FilingIndex, FetchError> {
        let url = format!("{}/submissions/CIK{cik}.json", self.endpoints.data);
        let submissions: Submissions = self.get_json(&url)?;
        index_from_submissions(cik, submissions)
    }

    fn document_url(&self, cik: &str, entry: &FilingEntry) -> String {
        format!(
            "{}/Archives/edgar/data/{}/{}/{}",
            self.endpoints.www,
            cik.trim_start_matches('0'),
            entry.accession_number.replace('-', ""),
            entry.primary_document
        )
    }

    fn fetch_document(&self, cik: &str, entry: &FilingEntry) -> Result<Vec<u8>, FetchError> {
        let client = self.client()?;
        let url = self.document_url(cik, entry);
        tracing::debug!(%url, form = %entry.form_type, "EDGAR document");
        self.limiter.run(|| http::send_bytes(client.get(&url)))
    }
}

/// Zero-pad a numeric CIK to ten digits.
pub fn pad_cik(cik: u64) -> String {
    format!("{cik:010}")
}

/// Parse a submissions body (as text) into a [`FilingIndex`].
pub fn parse_submissions_json(cik: &str, body: &str) -> Result<FilingIndex, FetchError> {
    let submissions: Submissions = serde_json::from_str(body)
        .map_err(|e| FetchError::Malformed(format!("failed to parse submissions for {cik}: {e}")))?;
    index_from_submissions(cik, submissions)
}

fn index_from_submissions(cik: &str, s: Submissions) -> Result<FilingIndex, FetchError> {
    let recent = s.filings.recent;
    let n = recent.accession_number.len();
    if recent.filing_date.len() != n || recent.form.len() != n || recent.primary_document.len() != n
    {
        return Err(FetchError::Malformed(format!(
            "submissions for {cik} have ragged columns"
        )));
    }

    let entries = (0..n)
        .map(|i| FilingEntry {
            accession_number: recent.accession_number[i].clone(),
            filing_date: recent.filing_date[i].clone(),
            form_type: recent.form[i].clone(),
            primary_document: recent.primary_document[i].clone(),
            report_date: recent
                .report_date
                .get(i)
                .filter(|d| !d.is_empty())
                .cloned(),
        })
        .collect();

    Ok(FilingIndex {
        cik: cik.to_string(),
        company_name: s.name.unwrap_or_default(),
        entries,
    })
}
