//! Yahoo Finance price history.
//!
//! Fetches daily OHLCV bars from Yahoo's v8 chart API in a single request per
//! ticker for a provider period (`range=5y`) and interval. Yahoo has no
//! official API and changes its format without notice; a changed shape maps
//! to [`FetchError::Malformed`], which is not retried.

use super::http;
use super::provider::{FetchError, OhlcvColumn, PriceBar, PriceHistory, PriceSource};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://query2.finance.yahoo.com";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    open: Option<Vec<Option<f64>>>,
    high: Option<Vec<Option<f64>>>,
    low: Option<Vec<Option<f64>>>,
    close: Option<Vec<Option<f64>>>,
    volume: Option<Vec<Option<u64>>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

/// Yahoo Finance chart client.
pub struct YahooProvider {
    client: Client,
    base_url: String,
}

impl YahooProvider {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        Self::with_base_url(DEFAULT_BASE_URL, timeout)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        Ok(Self {
            client: http::build_client(timeout, USER_AGENT)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn chart_url(&self, ticker: &str, period: &str, interval: &str) -> String {
        format!(
            "{}/v8/finance/chart/{ticker}?range={period}&interval={interval}\
             &includeAdjustedClose=true",
            self.base_url
        )
    }
}

impl PriceSource for YahooProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn fetch_history(
        &self,
        ticker: &str,
        period: &str,
        interval: &str,
    ) -> Result<PriceHistory, FetchError> {
        let url = self.chart_url(ticker, period, interval);
        tracing::debug!(ticker, %url, "fetching chart");
        let chart: ChartResponse = http::send_json(self.client.get(&url))?;
        parse_chart(ticker, period, interval, chart)
    }
}

/// Parse a chart body (as text) into a [`PriceHistory`].
pub fn parse_chart_json(
    ticker: &str,
    period: &str,
    interval: &str,
    body: &str,
) -> Result<PriceHistory, FetchError> {
    let chart: ChartResponse = serde_json::from_str(body)
        .map_err(|e| FetchError::Malformed(format!("failed to parse chart for {ticker}: {e}")))?;
    parse_chart(ticker, period, interval, chart)
}

fn parse_chart(
    ticker: &str,
    period: &str,
    interval: &str,
    resp: ChartResponse,
) -> Result<PriceHistory, FetchError> {
    let result = resp.chart.result.ok_or_else(|| match resp.chart.error {
        Some(err) if err.code == "Not Found" => FetchError::NotFound(format!("symbol {ticker}")),
        Some(err) => FetchError::Malformed(format!("{}: {}", err.code, err.description)),
        None => FetchError::Empty(format!("chart for {ticker} has no result and no error")),
    })?;

    let Some(data) = result.into_iter().next() else {
        return Err(FetchError::Empty(format!("chart for {ticker} is empty")));
    };

    // No timestamps means no trading data for the range, not a format change.
    let Some(timestamps) = data.timestamp else {
        return Err(FetchError::Empty(format!("no timestamps for {ticker}")));
    };

    let quote = data
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| FetchError::Malformed("no quote data".into()))?;

    let adj_closes = data
        .indicators
        .adjclose
        .and_then(|v| v.into_iter().next())
        .map(|a| a.adjclose);

    let mut columns = Vec::new();
    if quote.open.is_some() {
        columns.push(OhlcvColumn::Open);
    }
    if quote.high.is_some() {
        columns.push(OhlcvColumn::High);
    }
    if quote.low.is_some() {
        columns.push(OhlcvColumn::Low);
    }
    if quote.close.is_some() {
        columns.push(OhlcvColumn::Close);
    }
    if quote.volume.is_some() {
        columns.push(OhlcvColumn::Volume);
    }

    let cell = |col: &Option<Vec<Option<f64>>>, i: usize| {
        col.as_ref().and_then(|v| v.get(i).copied().flatten())
    };

    let mut bars = Vec::with_capacity(timestamps.len());
    for (i, &ts) in timestamps.iter().enumerate() {
        let date = chrono::DateTime::from_timestamp(ts, 0)
            .map(|dt| dt.naive_utc().date())
            .ok_or_else(|| FetchError::Malformed(format!("invalid timestamp: {ts}")))?;

        let open = cell(&quote.open, i);
        let high = cell(&quote.high, i);
        let low = cell(&quote.low, i);
        let close = cell(&quote.close, i);
        let volume = quote
            .volume
            .as_ref()
            .and_then(|v| v.get(i).copied().flatten());

        // Rows with no values at all are non-trading days.
        if open.is_none() && high.is_none() && low.is_none() && close.is_none() && volume.is_none()
        {
            continue;
        }

        bars.push(PriceBar {
            date,
            open,
            high,
            low,
            close,
            adj_close: adj_closes.as_ref().and_then(|v| v.get(i).copied().flatten()),
            volume,
        });
    }

    bars.sort_by_key(|b| b.date);

    Ok(PriceHistory {
        ticker: ticker.to_string(),
        period: period.to_string(),
        interval: interval.to_string(),
        columns,
        bars,
    })
}
