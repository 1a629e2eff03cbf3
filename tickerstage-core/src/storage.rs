//! Persistence helpers: atomic file replacement and Parquet encoding.
//!
//! Datasets are encoded to bytes once. Those exact bytes are hashed and
//! written, so a recorded checksum always describes the file on disk.

use crate::checksum::{checksum_line, CHECKSUM_FILE};
use crate::source::{NewsArticle, PriceBar};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error at {path}: {source}")]
    Io { path: String, source: io::Error },

    #[error("parquet encoding failed: {0}")]
    Parquet(String),

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl StorageError {
    fn io(path: &Path, source: io::Error) -> Self {
        StorageError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Replace `path` with `bytes` atomically: write `<path>.tmp`, then rename.
///
/// Readers see either the previous file or the new one, never a partial write.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);

    fs::write(tmp_path, bytes).map_err(|e| StorageError::io(tmp_path, e))?;
    fs::rename(tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(tmp_path);
        StorageError::io(path, e)
    })
}

/// Serialize `value` as pretty JSON and write it atomically. Returns the bytes written.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<Vec<u8>, StorageError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes)?;
    Ok(bytes)
}

/// Write the `checksum.md5` side file for `file_name` in `dir`.
pub fn write_checksum_file(dir: &Path, digest: &str, file_name: &str) -> Result<(), StorageError> {
    write_atomic(
        &dir.join(CHECKSUM_FILE),
        checksum_line(digest, file_name).as_bytes(),
    )
}

// ── Parquet encoding ────────────────────────────────────────────────

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

/// Encode price bars as a Parquet file image.
pub fn encode_prices(bars: &[PriceBar]) -> Result<Vec<u8>, StorageError> {
    let dates: Vec<i32> = bars
        .iter()
        .map(|b| (b.date - epoch()).num_days() as i32)
        .collect();
    let opens: Vec<Option<f64>> = bars.iter().map(|b| b.open).collect();
    let highs: Vec<Option<f64>> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<Option<f64>> = bars.iter().map(|b| b.low).collect();
    let closes: Vec<Option<f64>> = bars.iter().map(|b| b.close).collect();
    let adj_closes: Vec<Option<f64>> = bars.iter().map(|b| b.adj_close).collect();
    let volumes: Vec<Option<u64>> = bars.iter().map(|b| b.volume).collect();

    let mut df = DataFrame::new(vec![
        Column::new("date".into(), dates)
            .cast(&DataType::Date)
            .map_err(|e| StorageError::Parquet(format!("date cast: {e}")))?,
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("adj_close".into(), adj_closes),
        Column::new("volume".into(), volumes),
    ])
    .map_err(|e| StorageError::Parquet(format!("dataframe creation: {e}")))?;

    to_parquet_bytes(&mut df)
}

/// Encode articles as a Parquet file image. Timestamps are RFC 3339 strings.
pub fn encode_articles(articles: &[NewsArticle]) -> Result<Vec<u8>, StorageError> {
    let ids: Vec<String> = articles.iter().map(|a| a.id.clone()).collect();
    let tickers: Vec<Option<String>> = articles.iter().map(|a| a.ticker.clone()).collect();
    let sources: Vec<Option<String>> = articles.iter().map(|a| a.source.clone()).collect();
    let titles: Vec<Option<String>> = articles.iter().map(|a| a.title.clone()).collect();
    let descriptions: Vec<Option<String>> =
        articles.iter().map(|a| a.description.clone()).collect();
    let urls: Vec<Option<String>> = articles.iter().map(|a| a.url.clone()).collect();
    let published: Vec<Option<String>> = articles
        .iter()
        .map(|a| a.published_at.map(|t| t.to_rfc3339()))
        .collect();
    let fetched: Vec<String> = articles.iter().map(|a| a.fetched_at.to_rfc3339()).collect();

    let mut df = DataFrame::new(vec![
        Column::new("id".into(), ids),
        Column::new("ticker".into(), tickers),
        Column::new("source".into(), sources),
        Column::new("title".into(), titles),
        Column::new("description".into(), descriptions),
        Column::new("url".into(), urls),
        Column::new("published_at".into(), published),
        Column::new("fetched_at".into(), fetched),
    ])
    .map_err(|e| StorageError::Parquet(format!("dataframe creation: {e}")))?;

    to_parquet_bytes(&mut df)
}

fn to_parquet_bytes(df: &mut DataFrame) -> Result<Vec<u8>, StorageError> {
    let mut buf: Vec<u8> = Vec::new();
    ParquetWriter::new(&mut buf)
        .finish(df)
        .map_err(|e| StorageError::Parquet(format!("write parquet: {e}")))?;
    Ok(buf)
}

/// Decode a price Parquet image back to a DataFrame.
pub fn decode_parquet(bytes: &[u8]) -> Result<DataFrame, StorageError> {
    ParquetReader::new(io::Cursor::new(bytes))
        .finish()
        .map_err(|e| StorageError::Parquet(format!("read parquet: {e}")))
}
