//! Uniform contract for constituent forecasting models.
//!
//! Concrete models (random forest, gradient boosting, ARIMA-GARCH, Prophet,
//! TabPFN, ...) live outside this crate; the ensemble only ever holds
//! `Box<dyn Forecaster>`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::{Bar, Direction};

#[derive(Error, Debug, Clone)]
pub enum ForecastError {
    #[error("Insufficient data: need {needed} samples, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("Model {0} has not been trained")]
    NotTrained(String),

    #[error("Model {model} failed: {reason}")]
    Model { model: String, reason: String },
}

impl ForecastError {
    pub fn model_name(&self) -> Option<&str> {
        match self {
            Self::InsufficientData { .. } => None,
            Self::NotTrained(model) => Some(model),
            Self::Model { model, .. } => Some(model),
        }
    }
}

/// Row-major feature table with named columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    pub names: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    pub fn new(names: Vec<String>, rows: Vec<Vec<f64>>) -> Self {
        Self { names, rows }
    }

    pub fn n_samples(&self) -> usize {
        self.rows.len()
    }

    pub fn n_features(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Class probabilities over the three directional labels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassProbabilities {
    pub bullish: f64,
    pub neutral: f64,
    pub bearish: f64,
}

impl Default for ClassProbabilities {
    fn default() -> Self {
        Self::uniform()
    }
}

impl ClassProbabilities {
    pub fn new(bullish: f64, neutral: f64, bearish: f64) -> Self {
        Self {
            bullish,
            neutral,
            bearish,
        }
        .normalized()
    }

    pub fn uniform() -> Self {
        Self {
            bullish: 1.0 / 3.0,
            neutral: 1.0 / 3.0,
            bearish: 1.0 / 3.0,
        }
    }

    /// All mass on one label.
    pub fn one_hot(label: Direction) -> Self {
        let mut p = Self {
            bullish: 0.0,
            neutral: 0.0,
            bearish: 0.0,
        };
        *p.get_mut(label) = 1.0;
        p
    }

    pub fn get(&self, label: Direction) -> f64 {
        match label {
            Direction::Bullish => self.bullish,
            Direction::Neutral => self.neutral,
            Direction::Bearish => self.bearish,
        }
    }

    fn get_mut(&mut self, label: Direction) -> &mut f64 {
        match label {
            Direction::Bullish => &mut self.bullish,
            Direction::Neutral => &mut self.neutral,
            Direction::Bearish => &mut self.bearish,
        }
    }

    /// Rescale to sum 1; negative or non-finite entries count as zero.
    pub fn normalized(self) -> Self {
        let clean = |x: f64| if x.is_finite() && x > 0.0 { x } else { 0.0 };
        let (b, n, s) = (clean(self.bullish), clean(self.neutral), clean(self.bearish));
        let total = b + n + s;
        if total <= 0.0 {
            return Self::uniform();
        }
        Self {
            bullish: b / total,
            neutral: n / total,
            bearish: s / total,
        }
    }

    /// Most probable label; ties resolve to neutral.
    pub fn argmax(&self) -> Direction {
        let best = self.bullish.max(self.neutral).max(self.bearish);
        let neutral_tied = self.neutral >= best;
        match (self.bullish >= best, self.bearish >= best) {
            (true, false) if !neutral_tied => Direction::Bullish,
            (false, true) if !neutral_tied => Direction::Bearish,
            _ => Direction::Neutral,
        }
    }

    /// Signed directional score `P(bullish) - P(bearish)`.
    pub fn signed_score(&self) -> f64 {
        self.bullish - self.bearish
    }

    /// Accumulate `weight * other` into self.
    pub fn add_weighted(&mut self, other: &ClassProbabilities, weight: f64) {
        self.bullish += weight * other.bullish;
        self.neutral += weight * other.neutral;
        self.bearish += weight * other.bearish;
    }

    pub fn zero() -> Self {
        Self {
            bullish: 0.0,
            neutral: 0.0,
            bearish: 0.0,
        }
    }
}

/// Output of a single forecaster prediction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastOutput {
    pub label: Direction,
    pub confidence: f64,
    pub probabilities: ClassProbabilities,
    #[serde(default)]
    pub forecast_return: Option<f64>,
    #[serde(default)]
    pub forecast_volatility: Option<f64>,
}

impl ForecastOutput {
    /// Build from class probabilities; label and confidence follow the argmax.
    pub fn from_probabilities(probabilities: ClassProbabilities) -> Self {
        let probabilities = probabilities.normalized();
        let label = probabilities.argmax();
        Self {
            label,
            confidence: probabilities.get(label),
            probabilities,
            forecast_return: None,
            forecast_volatility: None,
        }
    }
}

/// Train/predict contract every constituent model satisfies.
pub trait Forecaster: Send {
    /// Stable model name used as the ensemble key.
    fn name(&self) -> &str;

    /// Build features and labels from a bar history. Implementations must only
    /// look at the bars they are given.
    fn prepare_training_data(
        &self,
        bars: &[Bar],
        horizon: usize,
    ) -> Result<(FeatureMatrix, Vec<Direction>), ForecastError>;

    fn train(
        &mut self,
        features: &FeatureMatrix,
        labels: &[Direction],
        min_samples: usize,
    ) -> Result<(), ForecastError>;

    /// Predict the direction over `horizon` bars following the end of `bars`.
    fn predict(&self, bars: &[Bar], horizon: usize) -> Result<ForecastOutput, ForecastError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probabilities_normalize() {
        let p = ClassProbabilities::new(2.0, 1.0, 1.0);
        assert!((p.bullish - 0.5).abs() < 1e-12);
        assert!((p.bullish + p.neutral + p.bearish - 1.0).abs() < 1e-12);

        let degenerate = ClassProbabilities::new(0.0, f64::NAN, -1.0);
        assert_eq!(degenerate, ClassProbabilities::uniform());
    }

    #[test]
    fn test_argmax_ties_favor_neutral() {
        assert_eq!(ClassProbabilities::new(0.6, 0.2, 0.2).argmax(), Direction::Bullish);
        assert_eq!(ClassProbabilities::new(0.1, 0.2, 0.7).argmax(), Direction::Bearish);
        assert_eq!(ClassProbabilities::new(0.4, 0.2, 0.4).argmax(), Direction::Neutral);
        assert_eq!(ClassProbabilities::new(0.4, 0.4, 0.2).argmax(), Direction::Neutral);
        assert_eq!(ClassProbabilities::uniform().argmax(), Direction::Neutral);
    }

    #[test]
    fn test_output_from_probabilities() {
        let out = ForecastOutput::from_probabilities(ClassProbabilities::new(0.2, 0.1, 0.7));
        assert_eq!(out.label, Direction::Bearish);
        assert!((out.confidence - 0.7).abs() < 1e-12);
        assert!((out.probabilities.signed_score() + 0.5).abs() < 1e-12);
    }
}
