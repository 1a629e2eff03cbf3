//! Checks on one downloaded filing document and its metadata.

use super::{ValidationVerdict, VerdictBuilder};
use crate::source::FilingMetadata;
use chrono::{NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::sync::LazyLock;

static ACCESSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{10}-\d{2}-\d{6}$").expect("valid regex"));

static CIK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{10}$").expect("valid regex"));

/// Terms expected somewhere in the head of a regulatory document.
const MARKER_TERMS: &[&str] = &[
    "securities and exchange commission",
    "form 10-k",
    "form 10-q",
    "form 8-k",
    "annual report",
    "quarterly report",
    "<sec-document>",
    "<html",
    "<?xml",
];

const HEAD_BYTES: usize = 1024;
const MIN_HEAD_CHARS: usize = 100;

/// Expected document size in bytes for a known form type.
pub fn form_size_range(form_type: &str) -> Option<RangeInclusive<u64>> {
    match form_type {
        "10-K" => Some(100_000..=50_000_000),
        "10-Q" => Some(50_000..=30_000_000),
        "8-K" => Some(1_000..=10_000_000),
        "DEF 14A" => Some(10_000..=20_000_000),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilingRules {
    /// Older filings are reported as warnings.
    pub max_filing_age_days: i64,
}

impl Default for FilingRules {
    fn default() -> Self {
        Self {
            max_filing_age_days: 730,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FilingValidator {
    rules: FilingRules,
}

impl FilingValidator {
    pub fn new(rules: FilingRules) -> Self {
        Self { rules }
    }

    pub fn validate(
        &self,
        content: &[u8],
        metadata: &FilingMetadata,
        ticker: &str,
        form_type: &str,
    ) -> ValidationVerdict {
        self.validate_as_of(content, metadata, ticker, form_type, Utc::now().date_naive())
    }

    /// Validate against a fixed "today" for the age window.
    pub fn validate_as_of(
        &self,
        content: &[u8],
        metadata: &FilingMetadata,
        ticker: &str,
        form_type: &str,
        today: NaiveDate,
    ) -> ValidationVerdict {
        let target = format!("{ticker} {form_type}");
        let mut v = VerdictBuilder::new(1);

        let size = content.len() as u64;
        match form_size_range(&metadata.form_type) {
            Some(range) if !range.contains(&size) => v.issue(format!(
                "File size {size} bytes outside expected range for {} ({}-{})",
                metadata.form_type,
                range.start(),
                range.end()
            )),
            Some(_) => {}
            None => v.issue(format!("Unknown form type: {:?}", metadata.form_type)),
        }

        let fields = metadata.required_fields();
        let mut missing = 0usize;
        for (name, value) in fields {
            if value.trim().is_empty() {
                missing += 1;
                v.issue(format!("Missing required metadata field: {name}"));
            }
        }
        v.completeness_score = (fields.len() - missing) as f64 / fields.len() as f64;
        v.null_percentage = missing as f64 / fields.len() as f64 * 100.0;

        if !metadata.accession_number.is_empty()
            && !ACCESSION_RE.is_match(&metadata.accession_number)
        {
            v.issue(format!(
                "Invalid accession number format: {}",
                metadata.accession_number
            ));
        }
        if !metadata.cik.is_empty() && !CIK_RE.is_match(&metadata.cik) {
            v.issue(format!("Invalid CIK format: {}", metadata.cik));
        }

        if !metadata.filing_date.is_empty() {
            match NaiveDate::parse_from_str(&metadata.filing_date, "%Y-%m-%d") {
                Ok(date) => {
                    v.date_range = Some((date, date));
                    let age = (today - date).num_days();
                    if age > self.rules.max_filing_age_days {
                        v.warn(
                            &target,
                            format!(
                                "Filing is {age} days old (max {})",
                                self.rules.max_filing_age_days
                            ),
                        );
                    }
                }
                Err(_) => v.issue(format!("Unparseable filing date: {}", metadata.filing_date)),
            }
        }

        if metadata.ticker != ticker {
            v.issue(format!(
                "Ticker mismatch: expected {ticker}, got {}",
                metadata.ticker
            ));
        }
        if metadata.form_type != form_type {
            v.issue(format!(
                "Form type mismatch: expected {form_type}, got {}",
                metadata.form_type
            ));
        }

        let head = String::from_utf8_lossy(&content[..content.len().min(HEAD_BYTES)]);
        let head = head.trim();
        if head.chars().count() <= MIN_HEAD_CHARS {
            v.issue("Content appears empty or truncated");
        } else {
            let lower = head.to_lowercase();
            if !MARKER_TERMS.iter().any(|t| lower.contains(t)) {
                v.warn(&target, "No regulatory marker terms in document head");
            }
        }

        let verdict = v.finish(content);
        tracing::debug!(
            ticker,
            form_type,
            size,
            issues = verdict.issues.len(),
            "validated filing"
        );
        verdict
    }
}
