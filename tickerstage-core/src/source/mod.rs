//! Upstream data sources and their typed records.

pub mod articles;
pub mod edgar;
pub mod http;
pub mod newsapi;
pub mod provider;
pub mod rate_limit;
pub mod yahoo;

pub use articles::{article_id, canonical_url, ArticleBatch, REQUIRED_ARTICLE_FIELDS};
pub use edgar::{EdgarClient, EdgarEndpoints};
pub use newsapi::NewsApiClient;
pub use provider::{
    ArticleRecord, FetchError, FilingEntry, FilingIndex, FilingMetadata, FilingSource,
    NewsArticle, NewsSource, OhlcvColumn, PriceBar, PriceHistory, PriceSource,
};
pub use rate_limit::RateLimiter;
pub use yahoo::YahooProvider;
