//! Return-based regime classifier.
//!
//! Cheap classification of recent returns used to pick a weighting method:
//! - High volatility: std of returns above threshold
//! - Trending: |mean return| above threshold
//! - Normal: everything else

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Regime of a recent return window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnRegime {
    /// Volatility above threshold.
    HighVolatility,
    /// Drift above threshold in either direction.
    Trending,
    /// Calm, driftless market.
    Normal,
    /// Not enough returns to classify.
    Unknown,
}

impl ReturnRegime {
    /// Description of the regime.
    pub fn description(&self) -> &'static str {
        match self {
            Self::HighVolatility => "High volatility",
            Self::Trending => "Trending market",
            Self::Normal => "Normal conditions",
            Self::Unknown => "Unknown regime",
        }
    }
}

/// Statistics for a regime.
#[derive(Debug, Clone)]
pub struct RegimeStats {
    pub regime: ReturnRegime,
    pub windows: usize,
    pub pct_of_total: f64,
    pub avg_volatility: f64,
    pub avg_return: f64,
}

impl Default for RegimeStats {
    fn default() -> Self {
        Self {
            regime: ReturnRegime::Unknown,
            windows: 0,
            pct_of_total: 0.0,
            avg_volatility: 0.0,
            avg_return: 0.0,
        }
    }
}

/// Regime classifier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeClassifierConfig {
    /// Number of most recent returns considered.
    pub lookback: usize,
    /// Per-period standard deviation above which the regime is high volatility.
    pub volatility_threshold: f64,
    /// Absolute per-period mean return above which the regime is trending.
    pub trend_threshold: f64,
    /// Minimum returns required to classify.
    pub min_samples: usize,
}

impl Default for RegimeClassifierConfig {
    fn default() -> Self {
        Self {
            lookback: 20,
            volatility_threshold: 0.02,
            trend_threshold: 0.002,
            min_samples: 5,
        }
    }
}

impl RegimeClassifierConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.lookback < 2 {
            return Err(EngineError::config("regime lookback must be >= 2"));
        }
        if !(self.volatility_threshold > 0.0) || !(self.trend_threshold > 0.0) {
            return Err(EngineError::config("regime thresholds must be > 0"));
        }
        Ok(())
    }
}

/// Classifications retained for [`RegimeClassifier::get_stats`].
pub const HISTORY_LIMIT: usize = 1_000;

/// Return regime classifier.
pub struct RegimeClassifier {
    config: RegimeClassifierConfig,
    history: VecDeque<(ReturnRegime, f64, f64)>,
}

impl RegimeClassifier {
    /// Create a new classifier.
    pub fn new(config: RegimeClassifierConfig) -> Self {
        Self {
            config,
            history: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &RegimeClassifierConfig {
        &self.config
    }

    /// Classify the most recent `lookback` returns and record the result.
    pub fn classify(&mut self, returns: &[f64]) -> ReturnRegime {
        let start = returns.len().saturating_sub(self.config.lookback);
        let window: Vec<f64> = returns[start..].iter().copied().filter(|r| r.is_finite()).collect();

        if window.len() < self.config.min_samples.max(2) {
            self.record(ReturnRegime::Unknown, 0.0, 0.0);
            return ReturnRegime::Unknown;
        }

        let n = window.len() as f64;
        let mean = window.iter().sum::<f64>() / n;
        let variance = window.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let volatility = variance.sqrt();

        let regime = if volatility > self.config.volatility_threshold {
            ReturnRegime::HighVolatility
        } else if mean.abs() > self.config.trend_threshold {
            ReturnRegime::Trending
        } else {
            ReturnRegime::Normal
        };

        self.record(regime, volatility, mean);
        regime
    }

    fn record(&mut self, regime: ReturnRegime, volatility: f64, mean: f64) {
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back((regime, volatility, mean));
    }

    /// Get current regime.
    pub fn current_regime(&self) -> ReturnRegime {
        self.history
            .back()
            .map(|(regime, _, _)| *regime)
            .unwrap_or(ReturnRegime::Unknown)
    }

    /// Get regime statistics over the last [`HISTORY_LIMIT`] classifications.
    pub fn get_stats(&self) -> HashMap<ReturnRegime, RegimeStats> {
        let mut stats: HashMap<ReturnRegime, RegimeStats> = HashMap::new();
        let total = self.history.len();

        for (regime, vol, ret) in &self.history {
            let entry = stats.entry(*regime).or_insert_with(|| RegimeStats {
                regime: *regime,
                ..Default::default()
            });
            entry.windows += 1;
            entry.avg_volatility += vol;
            entry.avg_return += ret;
        }

        for entry in stats.values_mut() {
            entry.pct_of_total = entry.windows as f64 / total as f64 * 100.0;
            entry.avg_volatility /= entry.windows as f64;
            entry.avg_return /= entry.windows as f64;
        }

        stats
    }

    /// Clear history.
    pub fn clear(&mut self) {
        self.history.clear();
    }
}
