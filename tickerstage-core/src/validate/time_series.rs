//! Daily OHLCV quality checks.

use super::{ValidationVerdict, VerdictBuilder};
use crate::source::{OhlcvColumn, PriceBar, PriceHistory};
use serde::{Deserialize, Serialize};

/// Thresholds for price histories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSeriesRules {
    pub min_records: usize,
    pub max_null_pct: f64,
    pub min_completeness: f64,
    pub max_daily_change_pct: f64,
    /// Treat extreme daily moves as blocking issues instead of warnings.
    pub block_on_extreme_moves: bool,
}

impl Default for TimeSeriesRules {
    fn default() -> Self {
        Self {
            min_records: 200,
            max_null_pct: 5.0,
            min_completeness: 0.95,
            max_daily_change_pct: 50.0,
            block_on_extreme_moves: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TimeSeriesValidator {
    rules: TimeSeriesRules,
}

impl TimeSeriesValidator {
    pub fn new(rules: TimeSeriesRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &TimeSeriesRules {
        &self.rules
    }

    /// Validate `history`; `canonical_bytes` is the encoding that will be persisted.
    pub fn validate(&self, history: &PriceHistory, canonical_bytes: &[u8]) -> ValidationVerdict {
        let ticker = history.ticker.as_str();
        let bars = &history.bars;
        let mut v = VerdictBuilder::new(bars.len());
        v.date_range = bars.first().zip(bars.last()).map(|(a, b)| (a.date, b.date));

        let missing = history.missing_columns();
        if !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(|c| c.name()).collect();
            v.issue(format!("Missing required columns: {}", names.join(", ")));
            v.completeness_score = 0.0;
            v.null_percentage = 100.0;
            return v.finish(canonical_bytes);
        }

        if bars.len() < self.rules.min_records {
            v.issue(format!(
                "Insufficient records: {} < {} required",
                bars.len(),
                self.rules.min_records
            ));
        }

        let total_cells = bars.len() * OhlcvColumn::ALL.len();
        let (nulls, valid) = cell_counts(bars);
        if total_cells == 0 {
            v.null_percentage = 100.0;
            v.completeness_score = 0.0;
        } else {
            v.null_percentage = nulls as f64 / total_cells as f64 * 100.0;
            v.completeness_score = valid as f64 / total_cells as f64;
            if v.null_percentage > self.rules.max_null_pct {
                v.issue(format!(
                    "Null percentage {:.2}% exceeds {:.2}%",
                    v.null_percentage, self.rules.max_null_pct
                ));
            }
            if v.completeness_score < self.rules.min_completeness {
                v.issue(format!(
                    "Completeness {:.3} below required {:.3}",
                    v.completeness_score, self.rules.min_completeness
                ));
            }
        }

        for (label, count) in ohlc_violations(bars) {
            if count > 0 {
                v.issue(format!("OHLC violation ({label}) in {count} rows"));
            }
        }

        for column in [
            OhlcvColumn::Open,
            OhlcvColumn::High,
            OhlcvColumn::Low,
            OhlcvColumn::Close,
        ] {
            let count = bars
                .iter()
                .filter(|b| b.price(column).is_some_and(|p| p <= 0.0))
                .count();
            if count > 0 {
                v.issue(format!(
                    "Non-positive {} prices in {count} rows",
                    column.name()
                ));
            }
        }

        let moves = extreme_moves(bars, self.rules.max_daily_change_pct);
        if !moves.is_empty() {
            let detail: Vec<String> = moves
                .iter()
                .take(5)
                .map(|(date, pct)| format!("{date} {pct:+.1}%"))
                .collect();
            let message = format!(
                "{} daily close moves beyond {:.0}% ({})",
                moves.len(),
                self.rules.max_daily_change_pct,
                detail.join(", ")
            );
            if self.rules.block_on_extreme_moves {
                v.issue(message);
            } else {
                v.warn(ticker, message);
            }
        }

        let verdict = v.finish(canonical_bytes);
        tracing::debug!(
            ticker,
            records = verdict.record_count,
            completeness = verdict.completeness_score,
            null_pct = verdict.null_percentage,
            issues = verdict.issues.len(),
            "validated price history"
        );
        verdict
    }
}

/// Null and valid cell counts across the required columns.
fn cell_counts(bars: &[PriceBar]) -> (usize, usize) {
    let mut nulls = 0;
    let mut valid = 0;
    for bar in bars {
        for column in OhlcvColumn::ALL {
            let is_null = match column {
                OhlcvColumn::Open => bar.open.is_none(),
                OhlcvColumn::High => bar.high.is_none(),
                OhlcvColumn::Low => bar.low.is_none(),
                OhlcvColumn::Close => bar.close.is_none(),
                OhlcvColumn::Volume => bar.volume.is_none(),
            };
            if is_null {
                nulls += 1;
            }
            if bar.cell_is_valid(column) {
                valid += 1;
            }
        }
    }
    (nulls, valid)
}

/// Row counts for each OHLC relation that fails. Rows with a missing price
/// only count for the relations they can be checked on.
fn ohlc_violations(bars: &[PriceBar]) -> [(&'static str, usize); 5] {
    let mut counts = [
        ("High < Low", 0),
        ("High < Open", 0),
        ("High < Close", 0),
        ("Low > Open", 0),
        ("Low > Close", 0),
    ];
    for bar in bars {
        let open = bar.price(OhlcvColumn::Open);
        let high = bar.price(OhlcvColumn::High);
        let low = bar.price(OhlcvColumn::Low);
        let close = bar.price(OhlcvColumn::Close);
        let broken = [
            lt(high, low),
            lt(high, open),
            lt(high, close),
            lt(open, low),
            lt(close, low),
        ];
        for (slot, is_broken) in counts.iter_mut().zip(broken) {
            if is_broken {
                slot.1 += 1;
            }
        }
    }
    counts
}

fn lt(a: Option<f64>, b: Option<f64>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a < b)
}

/// Consecutive closes whose percent change exceeds `max_pct` in magnitude.
fn extreme_moves(bars: &[PriceBar], max_pct: f64) -> Vec<(chrono::NaiveDate, f64)> {
    let closes: Vec<_> = bars
        .iter()
        .filter_map(|b| b.price(OhlcvColumn::Close).map(|c| (b.date, c)))
        .collect();
    closes
        .windows(2)
        .filter_map(|w| {
            let (_, prev) = w[0];
            let (date, cur) = w[1];
            if prev <= 0.0 {
                return None;
            }
            let pct = (cur - prev) / prev * 100.0;
            (pct.abs() > max_pct).then_some((date, pct))
        })
        .collect()
}
