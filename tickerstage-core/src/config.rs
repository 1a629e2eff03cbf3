//! Run configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file is a valid configuration.
//!
//! ```toml
//! output_dir = "data/staging"
//! tickers = ["AAPL", "MSFT"]
//!
//! [prices]
//! period = "5y"
//! min_records = 200
//!
//! [prices.retry]
//! max_attempts = 5
//! delays_ms = [2000, 4000, 8000, 16000, 32000, 60000]
//!
//! [filings]
//! forms = ["10-K", "10-Q"]
//! user_agent = "Example Research research@example.com"
//! ```

use crate::retry::RetrySpec;
use crate::validate::{FilingRules, NewsRules, TimeSeriesRules};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable holding the EDGAR contact user agent.
pub const SEC_USER_AGENT_VAR: &str = "SEC_USER_AGENT";
/// Environment variable holding the NewsAPI key.
pub const NEWSAPI_KEY_VAR: &str = "NEWSAPI_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub output_dir: PathBuf,
    pub tickers: Vec<String>,
    /// Per-request network timeout.
    pub timeout_secs: u64,
    pub prices: PricesConfig,
    pub filings: FilingsConfig,
    pub news: NewsConfig,
    pub resume: ResumeConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data/staging"),
            tickers: Vec::new(),
            timeout_secs: 30,
            prices: PricesConfig::default(),
            filings: FilingsConfig::default(),
            news: NewsConfig::default(),
            resume: ResumeConfig::default(),
        }
    }
}

impl IngestConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.check()?;
        Ok(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    fn check(&self) -> Result<(), ConfigError> {
        for (section, spec) in [
            ("prices", &self.prices.retry),
            ("filings", &self.filings.retry),
            ("news", &self.news.retry),
        ] {
            if spec.max_attempts == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{section}.retry.max_attempts must be at least 1"
                )));
            }
        }
        if self.filings.forms.is_empty() {
            return Err(ConfigError::Invalid("filings.forms is empty".into()));
        }
        if !(1..=100).contains(&self.news.page_size) {
            return Err(ConfigError::Invalid(format!(
                "news.page_size must be 1-100, got {}",
                self.news.page_size
            )));
        }
        let rules = &self.prices.rules;
        if !(0.0..=1.0).contains(&rules.min_completeness) {
            return Err(ConfigError::Invalid(
                "prices.min_completeness must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricesConfig {
    /// Provider history range, e.g. `"5y"`.
    pub period: String,
    pub interval: String,
    pub base_url: Option<String>,
    #[serde(flatten)]
    pub rules: TimeSeriesRules,
    pub retry: RetrySpec,
}

impl Default for PricesConfig {
    fn default() -> Self {
        Self {
            period: "5y".into(),
            interval: "1d".into(),
            base_url: None,
            rules: TimeSeriesRules::default(),
            retry: RetrySpec::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilingsConfig {
    /// Forms downloaded in full (most recent of each).
    pub forms: Vec<String>,
    /// Form listed, not downloaded.
    pub event_form: String,
    pub max_event_filings: usize,
    pub min_request_interval_ms: u64,
    pub user_agent: Option<String>,
    #[serde(flatten)]
    pub rules: FilingRules,
    pub retry: RetrySpec,
}

impl Default for FilingsConfig {
    fn default() -> Self {
        Self {
            forms: vec!["10-K".into(), "10-Q".into()],
            event_form: "8-K".into(),
            max_event_filings: 10,
            min_request_interval_ms: 110,
            user_agent: None,
            rules: FilingRules::default(),
            retry: RetrySpec::default(),
        }
    }
}

impl FilingsConfig {
    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }

    /// Configured user agent, else `SEC_USER_AGENT`.
    pub fn user_agent(&self) -> Option<String> {
        credential(self.user_agent.as_deref(), SEC_USER_AGENT_VAR, env_lookup)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsConfig {
    pub page_size: usize,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    #[serde(flatten)]
    pub rules: NewsRules,
    pub retry: RetrySpec,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            api_key: None,
            base_url: None,
            rules: NewsRules::default(),
            retry: RetrySpec::default(),
        }
    }
}

impl NewsConfig {
    /// Configured key, else `NEWSAPI_KEY`.
    pub fn api_key(&self) -> Option<String> {
        credential(self.api_key.as_deref(), NEWSAPI_KEY_VAR, env_lookup)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResumeConfig {
    /// Failed items with this many runs behind them are skipped on resume. 0 disables the cap.
    pub max_retries: u32,
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

fn env_lookup(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

fn credential(
    configured: Option<&str>,
    var: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    configured
        .map(str::to_string)
        .or_else(|| lookup(var))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
