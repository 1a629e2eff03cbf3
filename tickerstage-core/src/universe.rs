//! Ticker universes: sector-organised ticker lists stored as TOML.
//!
//! ```toml
//! [sectors]
//! Technology = ["AAPL", "MSFT"]
//! Finance = ["JPM"]
//! ```

use crate::config::ConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

static TICKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Z][A-Z0-9]{0,5}([.\-][A-Z0-9]{1,3})?$").expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Universe {
    pub sectors: BTreeMap<String, Vec<String>>,
}

impl Universe {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Every ticker across sectors, normalised, first occurrence kept.
    pub fn all_tickers(&self) -> Vec<String> {
        dedup(self.sectors.values().flatten().map(String::as_str))
    }

    pub fn sector_tickers(&self, sector: &str) -> Option<&[String]> {
        self.sectors.get(sector).map(Vec::as_slice)
    }

    pub fn sector_names(&self) -> Vec<&str> {
        self.sectors.keys().map(String::as_str).collect()
    }

    /// A small default universe of large US filers.
    pub fn default_us() -> Self {
        let sector =
            |tickers: &[&str]| -> Vec<String> { tickers.iter().map(|t| t.to_string()).collect() };
        let mut sectors = BTreeMap::new();
        sectors.insert(
            "Technology".to_string(),
            sector(&["AAPL", "MSFT", "GOOGL", "AMZN", "NVDA", "META"]),
        );
        sectors.insert("Healthcare".to_string(), sector(&["JNJ", "UNH", "PFE", "LLY"]));
        sectors.insert("Finance".to_string(), sector(&["JPM", "BAC", "GS", "V"]));
        sectors.insert("Energy".to_string(), sector(&["XOM", "CVX", "COP"]));
        sectors.insert("Consumer".to_string(), sector(&["WMT", "PG", "KO", "COST"]));
        Self { sectors }
    }
}

/// Trim and upper-case a ticker; `None` if it is not a plausible symbol.
pub fn normalize_ticker(raw: &str) -> Option<String> {
    let ticker = raw.trim().to_uppercase();
    TICKER_RE.is_match(&ticker).then_some(ticker)
}

/// Parse a comma- or whitespace-separated ticker list.
///
/// Returns the normalised tickers and the entries that were rejected.
pub fn parse_ticker_list(raw: &str) -> (Vec<String>, Vec<String>) {
    let mut rejected = Vec::new();
    let entries: Vec<&str> = raw
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .collect();
    for entry in &entries {
        if normalize_ticker(entry).is_none() {
            rejected.push(entry.to_string());
        }
    }
    (dedup(entries.into_iter()), rejected)
}

/// Normalise and de-duplicate, keeping first-seen order. Invalid symbols are dropped.
pub fn dedup<'a>(tickers: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    tickers
        .filter_map(normalize_ticker)
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_universe_has_sectors() {
        let u = Universe::default_us();
        assert!(u.sector_names().contains(&"Technology"));
        assert!(u.all_tickers().contains(&"AAPL".to_string()));
        assert_eq!(u.sector_tickers("Energy").unwrap().len(), 3);
    }

    #[test]
    fn toml_parse_dedups_across_sectors() {
        let u = Universe::from_toml(
            r#"
            [sectors]
            Finance = ["jpm", "V"]
            Payments = ["V", "MA"]
            "#,
        )
        .unwrap();
        assert_eq!(u.all_tickers(), vec!["JPM", "V", "MA"]);
    }

    #[test]
    fn malformed_universe_is_a_parse_error() {
        assert!(matches!(
            Universe::from_toml("sectors = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn ticker_normalisation() {
        assert_eq!(normalize_ticker(" aapl ").as_deref(), Some("AAPL"));
        assert_eq!(normalize_ticker("BRK.B").as_deref(), Some("BRK.B"));
        assert_eq!(normalize_ticker("BF-B").as_deref(), Some("BF-B"));
        assert_eq!(normalize_ticker("../etc"), None);
        assert_eq!(normalize_ticker(""), None);
    }

    #[test]
    fn ticker_lists_split_on_commas_and_spaces() {
        let (tickers, rejected) = parse_ticker_list("AAPL, msft  AAPL,,$$$");
        assert_eq!(tickers, vec!["AAPL", "MSFT"]);
        assert_eq!(rejected, vec!["$$$"]);
    }
}
