//! Data integrity validation for bar histories.
//!
//! Validates:
//! - Timestamp ordering (strictly increasing)
//! - Price validity (finite, positive)
//! - OHLC consistency (low <= open, close <= high)
//! - Volume validity (finite, non-negative)
//! - Date continuity (no gaps longer than a week)

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::data::Bar;
use crate::error::{EngineError, EngineResult};

/// Result of a single validation check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
}

impl CheckResult {
    pub fn pass(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            message: message.to_string(),
            details: None,
        }
    }

    pub fn fail(name: &str, message: &str, details: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            message: message.to_string(),
            details,
        }
    }
}

/// Complete integrity report for one symbol's bars.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataIntegrityReport {
    pub symbol: String,
    pub bar_count: usize,
    pub checks: Vec<CheckResult>,
}

impl DataIntegrityReport {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failed_checks(&self) -> Vec<&CheckResult> {
        self.checks.iter().filter(|c| !c.passed).collect()
    }

    pub fn summary(&self) -> String {
        let passed = self.checks.iter().filter(|c| c.passed).count();
        let total = self.checks.len();
        format!(
            "{} ({} bars): {}/{} checks passed",
            self.symbol, self.bar_count, passed, total
        )
    }
}

/// Show at most this many offending rows in check details.
const MAX_DETAILS: usize = 5;

/// Validator for bar data integrity.
pub struct BarIntegrityValidator;

impl BarIntegrityValidator {
    /// Run all validation checks; failures are logged.
    pub fn validate(symbol: &str, bars: &[Bar]) -> DataIntegrityReport {
        let checks = vec![
            Self::check_ordering(bars),
            Self::check_price_validity(bars),
            Self::check_ohlc_consistency(bars),
            Self::check_volume(bars),
            Self::check_date_continuity(bars),
        ];

        let report = DataIntegrityReport {
            symbol: symbol.to_string(),
            bar_count: bars.len(),
            checks,
        };
        for failed in report.failed_checks() {
            warn!(
                "{}: {} failed: {} {}",
                symbol,
                failed.name,
                failed.message,
                failed.details.as_deref().unwrap_or("")
            );
        }
        report
    }

    /// Hard requirement for every consumer: timestamps strictly increase.
    pub fn ensure_sorted(bars: &[Bar]) -> EngineResult<()> {
        match bars.windows(2).position(|w| w[1].timestamp <= w[0].timestamp) {
            Some(i) => Err(EngineError::InvalidInput(format!(
                "bars not strictly increasing at index {} ({} then {})",
                i + 1,
                bars[i].timestamp,
                bars[i + 1].timestamp
            ))),
            None => Ok(()),
        }
    }

    fn check_ordering(bars: &[Bar]) -> CheckResult {
        match Self::ensure_sorted(bars) {
            Ok(()) => CheckResult::pass("timestamp_ordering", "Timestamps strictly increasing"),
            Err(e) => CheckResult::fail("timestamp_ordering", "Out-of-order timestamps", Some(e.to_string())),
        }
    }

    /// Prices must be finite and positive.
    fn check_price_validity(bars: &[Bar]) -> CheckResult {
        let bad: Vec<usize> = bars
            .iter()
            .enumerate()
            .filter(|(_, b)| {
                [b.open, b.high, b.low, b.close]
                    .iter()
                    .any(|p| !p.is_finite() || *p <= 0.0)
            })
            .map(|(i, _)| i)
            .collect();

        if bad.is_empty() {
            CheckResult::pass("price_validity", "All prices finite and positive")
        } else {
            CheckResult::fail(
                "price_validity",
                &format!("{} bars with invalid prices", bad.len()),
                Some(format_indices(&bad)),
            )
        }
    }

    /// low <= min(open, close) and max(open, close) <= high.
    fn check_ohlc_consistency(bars: &[Bar]) -> CheckResult {
        let bad: Vec<usize> = bars
            .iter()
            .enumerate()
            .filter(|(_, b)| b.low > b.open.min(b.close) || b.high < b.open.max(b.close) || b.low > b.high)
            .map(|(i, _)| i)
            .collect();

        if bad.is_empty() {
            CheckResult::pass("ohlc_consistency", "All bars satisfy low <= open, close <= high")
        } else {
            CheckResult::fail(
                "ohlc_consistency",
                &format!("{} inconsistent bars", bad.len()),
                Some(format_indices(&bad)),
            )
        }
    }

    fn check_volume(bars: &[Bar]) -> CheckResult {
        let bad: Vec<usize> = bars
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.volume.is_finite() || b.volume < 0.0)
            .map(|(i, _)| i)
            .collect();

        if bad.is_empty() {
            CheckResult::pass("volume_validity", "All volumes non-negative")
        } else {
            CheckResult::fail(
                "volume_validity",
                &format!("{} bars with invalid volume", bad.len()),
                Some(format_indices(&bad)),
            )
        }
    }

    /// Flag gaps of more than a week between consecutive bars.
    fn check_date_continuity(bars: &[Bar]) -> CheckResult {
        if bars.is_empty() {
            return CheckResult::fail("date_continuity", "No bars found", None);
        }

        let gaps: Vec<String> = bars
            .windows(2)
            .filter_map(|w| {
                let gap_days = (w[1].timestamp - w[0].timestamp).num_days();
                (gap_days > 7).then(|| {
                    format!(
                        "{} to {} ({} days)",
                        w[0].timestamp.date_naive(),
                        w[1].timestamp.date_naive(),
                        gap_days
                    )
                })
            })
            .collect();

        if gaps.is_empty() {
            CheckResult::pass("date_continuity", &format!("{} bars, no major gaps", bars.len()))
        } else {
            CheckResult::fail(
                "date_continuity",
                &format!("{} major gaps found", gaps.len()),
                Some(gaps.join(", ")),
            )
        }
    }
}

fn format_indices(indices: &[usize]) -> String {
    let shown: Vec<String> = indices.iter().take(MAX_DETAILS).map(|i| i.to_string()).collect();
    if indices.len() > MAX_DETAILS {
        format!("indices {} and {} more", shown.join(", "), indices.len() - MAX_DETAILS)
    } else {
        format!("indices {}", shown.join(", "))
    }
}
