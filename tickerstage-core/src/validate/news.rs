//! Checks on a batch of recent news articles for one ticker.

use super::{ValidationVerdict, VerdictBuilder};
use crate::source::{ArticleBatch, NewsArticle};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use url::Url;

/// Fields per article record.
const FIELD_COUNT: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsRules {
    pub min_articles: usize,
    pub max_duplicate_ratio: f64,
    pub min_title_len: usize,
    /// Shorter descriptions are logged, never blocking.
    pub min_description_len: usize,
}

impl Default for NewsRules {
    fn default() -> Self {
        Self {
            min_articles: 1,
            max_duplicate_ratio: 0.1,
            min_title_len: 10,
            min_description_len: 20,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewsValidator {
    rules: NewsRules,
}

impl NewsValidator {
    pub fn new(rules: NewsRules) -> Self {
        Self { rules }
    }

    pub fn validate(
        &self,
        batch: &ArticleBatch,
        canonical_bytes: &[u8],
        ticker: &str,
    ) -> ValidationVerdict {
        let articles = &batch.articles;
        let mut v = VerdictBuilder::new(articles.len());

        if !batch.missing_fields.is_empty() {
            v.issue(format!(
                "Missing required fields: {}",
                batch.missing_fields.join(", ")
            ));
            v.null_percentage = 100.0;
            return v.finish(canonical_bytes);
        }

        if articles.len() < self.rules.min_articles {
            v.issue(format!(
                "Insufficient articles: {} < {} required",
                articles.len(),
                self.rules.min_articles
            ));
        }

        let nulls = null_counts(articles);
        let total_nulls: usize = nulls.iter().map(|(_, n)| n).sum();
        for (field, count) in nulls {
            if count > 0 {
                v.issue(format!("Null values in {field}: {count}"));
            }
        }
        let cells = articles.len() * FIELD_COUNT;
        if cells == 0 {
            v.null_percentage = 100.0;
        } else {
            v.null_percentage = total_nulls as f64 / cells as f64 * 100.0;
            v.completeness_score = 1.0 - total_nulls as f64 / cells as f64;
        }

        let urls: Vec<&str> = articles.iter().filter_map(|a| a.url.as_deref()).collect();
        let invalid = urls.iter().filter(|u| !is_valid_url(u)).count();
        if invalid > 0 {
            v.issue(format!("Invalid URLs: {invalid}"));
        }

        if !articles.is_empty() {
            let unique: HashSet<&str> = urls.iter().copied().collect();
            let ratio = (urls.len() - unique.len()) as f64 / articles.len() as f64;
            if ratio > self.rules.max_duplicate_ratio {
                v.issue(format!(
                    "Duplicate URL ratio {ratio:.2} exceeds {:.2}",
                    self.rules.max_duplicate_ratio
                ));
            }
        }

        let short_titles = articles
            .iter()
            .filter_map(|a| a.title.as_deref())
            .filter(|t| t.trim().chars().count() < self.rules.min_title_len)
            .count();
        if short_titles > 0 {
            v.issue(format!(
                "Titles shorter than {} characters: {short_titles}",
                self.rules.min_title_len
            ));
        }

        let tickers: BTreeSet<&str> =
            articles.iter().filter_map(|a| a.ticker.as_deref()).collect();
        match tickers.len() {
            0 => {}
            1 => {
                if !tickers.contains(ticker) {
                    let got = tickers.iter().next().copied().unwrap_or_default();
                    v.issue(format!("Ticker mismatch: expected {ticker}, got {got}"));
                }
            }
            _ => {
                let all: Vec<&str> = tickers.into_iter().collect();
                v.issue(format!("Inconsistent tickers: {}", all.join(", ")));
            }
        }

        let short_descriptions = articles
            .iter()
            .filter_map(|a| a.description.as_deref())
            .filter(|d| d.trim().chars().count() < self.rules.min_description_len)
            .count();
        if short_descriptions > 0 {
            tracing::info!(
                ticker,
                count = short_descriptions,
                min_len = self.rules.min_description_len,
                "articles with short descriptions"
            );
        }

        let published: Vec<_> = articles
            .iter()
            .filter_map(|a| a.published_at.map(|t| t.date_naive()))
            .collect();
        v.date_range = published
            .iter()
            .min()
            .copied()
            .zip(published.iter().max().copied());

        let verdict = v.finish(canonical_bytes);
        tracing::debug!(
            ticker,
            articles = verdict.record_count,
            issues = verdict.issues.len(),
            "validated news batch"
        );
        verdict
    }
}

fn null_counts(articles: &[NewsArticle]) -> [(&'static str, usize); 6] {
    let count = |f: fn(&NewsArticle) -> bool| articles.iter().filter(|a| f(a)).count();
    [
        ("ticker", count(|a| a.ticker.is_none())),
        ("source", count(|a| a.source.is_none())),
        ("title", count(|a| a.title.is_none())),
        ("description", count(|a| a.description.is_none())),
        ("url", count(|a| a.url.is_none())),
        ("published_at", count(|a| a.published_at.is_none())),
    ]
}

fn is_valid_url(raw: &str) -> bool {
    Url::parse(raw)
        .is_ok_and(|u| !u.scheme().is_empty() && u.host_str().is_some_and(|h| !h.is_empty()))
}
