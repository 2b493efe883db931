//! Core data types shared across the engine.
//!
//! Bars are the market input, prediction records are the unit flowing from
//! the walk-forward runner (or live production) into the performance monitor,
//! and validation scores are the input of the unified validator.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Directional label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Bullish,
    Neutral,
    Bearish,
}

impl Direction {
    pub const ALL: [Direction; 3] = [Direction::Bullish, Direction::Neutral, Direction::Bearish];

    /// Label a return, treating `|ret| <= neutral_band` as neutral.
    pub fn from_return(ret: f64, neutral_band: f64) -> Self {
        if ret > neutral_band {
            Self::Bullish
        } else if ret < -neutral_band {
            Self::Bearish
        } else {
            Self::Neutral
        }
    }

    /// +1 / 0 / -1.
    pub fn sign(&self) -> f64 {
        match self {
            Self::Bullish => 1.0,
            Self::Neutral => 0.0,
            Self::Bearish => -1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bullish => "bullish",
            Self::Neutral => "neutral",
            Self::Bearish => "bearish",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "bullish" | "bull" | "up" | "buy" => Some(Self::Bullish),
            "neutral" | "flat" | "hold" => Some(Self::Neutral),
            "bearish" | "bear" | "down" | "sell" => Some(Self::Bearish),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Bar {
    pub fn new(timestamp: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Simple return from `prev` close to this bar's close.
    pub fn return_from(&self, prev: &Bar) -> f64 {
        if prev.close == 0.0 {
            return 0.0;
        }
        self.close / prev.close - 1.0
    }
}

/// Close-to-close simple returns of a bar slice (length `bars.len() - 1`).
pub fn close_returns(bars: &[Bar]) -> Vec<f64> {
    bars.windows(2).map(|w| w[1].return_from(&w[0])).collect()
}

/// Outcome of one prediction event, from the walk-forward runner or live.
///
/// Built once through [`PredictionRecord::new`], which derives `is_correct`
/// and `agreement`; nothing mutates it afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub predicted: Direction,
    /// Stated confidence in `[0, 1]`.
    pub confidence: f64,
    /// Label produced by each constituent model.
    pub model_predictions: BTreeMap<String, Direction>,
    /// Weight of each constituent model at prediction time (sums to 1).
    pub model_weights: BTreeMap<String, f64>,
    pub actual: Direction,
    pub is_correct: bool,
    /// Fraction of models agreeing with the ensemble label.
    pub agreement: f64,
}

impl PredictionRecord {
    pub fn new(
        timestamp: DateTime<Utc>,
        symbol: impl Into<String>,
        predicted: Direction,
        confidence: f64,
        model_predictions: BTreeMap<String, Direction>,
        model_weights: BTreeMap<String, f64>,
        actual: Direction,
    ) -> Self {
        let agreement = agreement_score(predicted, &model_predictions);
        Self {
            timestamp,
            symbol: symbol.into(),
            predicted,
            confidence: clamp_unit(confidence),
            model_predictions,
            model_weights,
            actual,
            is_correct: predicted == actual,
            agreement,
        }
    }

    /// Whether a given constituent model was correct on this record.
    pub fn model_correct(&self, model: &str) -> Option<bool> {
        self.model_predictions.get(model).map(|d| *d == self.actual)
    }
}

/// Fraction of models agreeing with `label`; one or zero models count as full agreement.
pub fn agreement_score(label: Direction, model_predictions: &BTreeMap<String, Direction>) -> f64 {
    if model_predictions.len() <= 1 {
        return 1.0;
    }
    let agreeing = model_predictions.values().filter(|d| **d == label).count();
    agreeing as f64 / model_predictions.len() as f64
}

/// Accuracy scores feeding one unified validation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationScores {
    pub backtesting_score: f64,
    pub walkforward_score: f64,
    pub live_score: f64,
    /// Timeframe name -> signed directional score in `[-1, 1]`.
    #[serde(default)]
    pub multi_tf_scores: BTreeMap<String, f64>,
    /// Point in time the scores describe.
    pub as_of: DateTime<Utc>,
    /// Last time the ensemble was retrained, if known.
    #[serde(default)]
    pub last_retrained: Option<DateTime<Utc>>,
}

impl ValidationScores {
    pub fn new(backtesting_score: f64, walkforward_score: f64, live_score: f64, as_of: DateTime<Utc>) -> Self {
        Self {
            backtesting_score,
            walkforward_score,
            live_score,
            multi_tf_scores: BTreeMap::new(),
            as_of,
            last_retrained: None,
        }
    }

    pub fn with_timeframes<I, S>(mut self, scores: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        self.multi_tf_scores = scores.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self
    }

    pub fn with_last_retrained(mut self, at: DateTime<Utc>) -> Self {
        self.last_retrained = Some(at);
        self
    }
}

/// Clamp into `[0, 1]`, mapping NaN to 0.
pub fn clamp_unit(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}
