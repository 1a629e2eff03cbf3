//! NewsAPI recent-article client (`/v2/everything`).
//!
//! Articles are normalised into [`ArticleRecord`]s keyed by [`NewsArticle`]
//! field names. Keys the provider omitted stay absent so validation can tell
//! a missing field from a null one.
//!
//! [`NewsArticle`]: super::provider::NewsArticle

use super::http;
use super::provider::{ArticleRecord, FetchError, NewsSource};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://newsapi.org";

const USER_AGENT: &str = "tickerstage/0.1";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EverythingResponse {
    status: String,
    code: Option<String>,
    message: Option<String>,
    #[serde(default)]
    articles: Vec<Map<String, Value>>,
}

pub struct NewsApiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl NewsApiClient {
    pub fn new(
        api_key: Option<String>,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        Ok(Self {
            client: http::build_client(timeout, USER_AGENT)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }
}

impl NewsSource for NewsApiClient {
    fn name(&self) -> &str {
        "newsapi"
    }

    fn fetch_recent(&self, ticker: &str, limit: usize) -> Result<Vec<ArticleRecord>, FetchError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            FetchError::Config("NewsAPI key missing (set news.api_key or NEWSAPI_KEY)".into())
        })?;
        let url = format!("{}/v2/everything", self.base_url);
        let request = self
            .client
            .get(&url)
            .header("X-Api-Key", api_key)
            .query(&[
                ("q", ticker),
                ("language", "en"),
                ("sortBy", "publishedAt"),
                ("pageSize", &limit.to_string()),
            ]);
        let response: EverythingResponse = http::send_json(request)?;
        normalize_response(ticker, response)
    }
}

/// Parse an `/v2/everything` body (as text) into article records.
pub fn parse_everything_json(ticker: &str, body: &str) -> Result<Vec<ArticleRecord>, FetchError> {
    let response: EverythingResponse = serde_json::from_str(body)
        .map_err(|e| FetchError::Malformed(format!("failed to parse news for {ticker}: {e}")))?;
    normalize_response(ticker, response)
}

fn normalize_response(
    ticker: &str,
    response: EverythingResponse,
) -> Result<Vec<ArticleRecord>, FetchError> {
    if response.status != "ok" {
        let code = response.code.unwrap_or_default();
        let message = response.message.unwrap_or_default();
        return Err(match code.as_str() {
            "rateLimited" => FetchError::RateLimited { status: 429 },
            "apiKeyMissing" | "apiKeyInvalid" | "apiKeyDisabled" => {
                FetchError::Config(format!("{code}: {message}"))
            }
            _ => FetchError::Malformed(format!("{code}: {message}")),
        });
    }

    Ok(response
        .articles
        .into_iter()
        .map(|raw| normalize_article(ticker, raw))
        .collect())
}

fn normalize_article(ticker: &str, mut raw: Map<String, Value>) -> ArticleRecord {
    let mut record = ArticleRecord::new();
    record.insert("ticker".into(), Value::String(ticker.to_string()));

    if let Some(source) = raw.remove("source") {
        let name = match source {
            Value::Object(mut obj) => obj.remove("name").unwrap_or(Value::Null),
            other => other,
        };
        record.insert("source".into(), name);
    }
    for (from, to) in [
        ("title", "title"),
        ("description", "description"),
        ("url", "url"),
        ("publishedAt", "published_at"),
    ] {
        if let Some(value) = raw.remove(from) {
            record.insert(to.into(), value);
        }
    }
    record
}
