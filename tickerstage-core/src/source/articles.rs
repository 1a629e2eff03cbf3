//! Conversion of loose article records into typed [`NewsArticle`]s.

use super::provider::{ArticleRecord, NewsArticle};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Fields every article record must carry (possibly as null).
pub const REQUIRED_ARTICLE_FIELDS: [&str; 8] = [
    "id",
    "ticker",
    "source",
    "title",
    "description",
    "url",
    "published_at",
    "fetched_at",
];

/// A batch of articles for one ticker, plus any required fields that some
/// record did not carry at all.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleBatch {
    pub articles: Vec<NewsArticle>,
    pub missing_fields: Vec<String>,
}

impl ArticleBatch {
    /// Build a batch from provider records.
    ///
    /// `id` and `fetched_at` are assigned here; every other required field
    /// must come from the record.
    pub fn from_records(records: &[ArticleRecord], fetched_at: DateTime<Utc>) -> Self {
        let mut missing_fields: Vec<String> = Vec::new();
        let mut articles = Vec::with_capacity(records.len());

        for record in records {
            for field in REQUIRED_ARTICLE_FIELDS {
                if matches!(field, "id" | "fetched_at") {
                    continue;
                }
                if !record.contains_key(field) && !missing_fields.iter().any(|f| f == field) {
                    missing_fields.push(field.to_string());
                }
            }

            let url = text(record, "url");
            let published_at = text(record, "published_at").and_then(|s| parse_time(&s));
            articles.push(NewsArticle {
                id: article_id(url.as_deref().unwrap_or_default(), published_at),
                ticker: text(record, "ticker"),
                source: text(record, "source"),
                title: text(record, "title"),
                description: text(record, "description"),
                url,
                published_at,
                fetched_at,
            });
        }

        Self {
            articles,
            missing_fields,
        }
    }

    pub fn len(&self) -> usize {
        self.articles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }
}

fn text(record: &ArticleRecord, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Stable article id: BLAKE3 over canonical URL and publish time, 32 hex chars.
pub fn article_id(url: &str, published_at: Option<DateTime<Utc>>) -> String {
    let published = published_at.map(|t| t.to_rfc3339()).unwrap_or_default();
    let key = format!("{}|{published}", canonical_url(url));
    let hex = blake3::hash(key.as_bytes()).to_hex();
    hex[..32].to_string()
}

/// Canonical form of an article URL: no fragment, no `utm_*` tracking params.
///
/// Unparseable input is returned trimmed.
pub fn canonical_url(raw: &str) -> String {
    let Ok(mut url) = url::Url::parse(raw.trim()) else {
        return raw.trim().to_string();
    };
    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("utm_"))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> ArticleRecord {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn canonical_url_strips_tracking_and_fragment() {
        assert_eq!(
            canonical_url("https://News.example.com/a?id=7&utm_source=x#top"),
            "https://news.example.com/a?id=7"
        );
        assert_eq!(
            canonical_url("https://example.com/a?utm_medium=rss"),
            "https://example.com/a"
        );
        assert_eq!(canonical_url("  not a url "), "not a url");
    }

    #[test]
    fn article_id_is_stable_across_tracking_params() {
        let t = parse_time("2024-05-01T12:00:00Z");
        let a = article_id("https://example.com/story?utm_source=feed", t);
        let b = article_id("https://example.com/story", t);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert_ne!(a, article_id("https://example.com/story", None));
    }

    #[test]
    fn from_records_tracks_absent_fields_but_not_nulls() {
        let now = Utc::now();
        let records = vec![
            record(json!({
                "ticker": "AAPL", "source": "Reuters", "title": "Apple ships",
                "description": null, "url": "https://example.com/1",
                "published_at": "2024-05-01T12:00:00Z"
            })),
            record(json!({
                "ticker": "AAPL", "source": "Reuters", "title": "Apple again",
                "url": "https://example.com/2", "published_at": "2024-05-02T12:00:00Z"
            })),
        ];
        let batch = ArticleBatch::from_records(&records, now);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.missing_fields, vec!["description".to_string()]);
        assert_eq!(batch.articles[0].description, None);
        assert_eq!(batch.articles[0].fetched_at, now);
        assert!(batch.articles[1].published_at.is_some());
    }
}
