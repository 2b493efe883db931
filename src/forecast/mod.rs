//! Forecaster contract consumed by the walk-forward runner and backtests.

pub mod forecaster;

pub use forecaster::{ClassProbabilities, FeatureMatrix, ForecastError, ForecastOutput, Forecaster};
