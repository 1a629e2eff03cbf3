//! Per-source data-quality gates.
//!
//! Every validator reports a [`ValidationVerdict`] and never mutates its input.
//! Any entry in `issues` makes the verdict invalid. Soft findings go to
//! `warnings` and the log instead.

pub mod filing;
pub mod news;
pub mod time_series;

pub use filing::{form_size_range, FilingRules, FilingValidator};
pub use news::{NewsRules, NewsValidator};
pub use time_series::{TimeSeriesRules, TimeSeriesValidator};

use crate::checksum::md5_hex;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Result of validating one fetched dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub is_valid: bool,
    pub record_count: usize,
    /// Fraction of valid cells, in `[0, 1]`.
    pub completeness_score: f64,
    /// Percentage of null cells, in `[0, 100]`.
    pub null_percentage: f64,
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    pub issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// MD5 of the exact bytes that will be persisted.
    pub checksum: String,
}

/// Accumulates findings; `finish` derives validity from the issue list.
#[derive(Debug, Default)]
pub(crate) struct VerdictBuilder {
    pub record_count: usize,
    pub completeness_score: f64,
    pub null_percentage: f64,
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
}

impl VerdictBuilder {
    pub fn new(record_count: usize) -> Self {
        Self {
            record_count,
            ..Self::default()
        }
    }

    pub fn issue(&mut self, message: impl Into<String>) {
        self.issues.push(message.into());
    }

    pub fn warn(&mut self, target: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(target_id = target, "{message}");
        self.warnings.push(message);
    }

    pub fn finish(self, canonical_bytes: &[u8]) -> ValidationVerdict {
        ValidationVerdict {
            is_valid: self.issues.is_empty(),
            record_count: self.record_count,
            completeness_score: self.completeness_score.clamp(0.0, 1.0),
            null_percentage: self.null_percentage.clamp(0.0, 100.0),
            date_range: self.date_range,
            issues: self.issues,
            warnings: self.warnings,
            checksum: md5_hex(canonical_bytes),
        }
    }
}

impl ValidationVerdict {
    /// Issues joined for a manifest error message.
    pub fn issue_summary(&self) -> String {
        self.issues.join("; ")
    }
}
