//! Per-model health classification from monitor history.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

use super::performance::PerformanceMonitor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Marginal,
    Unhealthy,
    /// Too few samples to judge.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightTrend {
    Rising,
    Flat,
    Falling,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelHealthConfig {
    /// Rolling accuracy at or above this is healthy.
    pub healthy_accuracy: f64,
    /// Rolling accuracy at or above this (and below healthy) is marginal.
    pub marginal_accuracy: f64,
    pub min_samples: usize,
    /// Most recent weight entries used for the trend.
    pub trend_window: usize,
    /// |slope| per entry below this is flat.
    pub trend_threshold: f64,
}

impl Default for ModelHealthConfig {
    fn default() -> Self {
        Self {
            healthy_accuracy: 0.55,
            marginal_accuracy: 0.45,
            min_samples: 10,
            trend_window: 20,
            trend_threshold: 1e-3,
        }
    }
}

impl ModelHealthConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.marginal_accuracy > self.healthy_accuracy {
            return Err(EngineError::config(
                "health.marginal_accuracy must not exceed health.healthy_accuracy",
            ));
        }
        if self.trend_window < 2 {
            return Err(EngineError::config("health.trend_window must be >= 2"));
        }
        Ok(())
    }
}

/// Health verdict for one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelHealth {
    pub model: String,
    pub status: HealthStatus,
    pub accuracy: Option<f64>,
    pub samples: usize,
    pub weight_trend: WeightTrend,
    pub current_weight: Option<f64>,
    pub recommendation: String,
}

pub struct ModelHealthChecker {
    config: ModelHealthConfig,
}

impl Default for ModelHealthChecker {
    fn default() -> Self {
        Self::new(ModelHealthConfig::default())
    }
}

impl ModelHealthChecker {
    pub fn new(config: ModelHealthConfig) -> Self {
        Self { config }
    }

    pub fn check(&self, monitor: &PerformanceMonitor, model: &str) -> ModelHealth {
        let outcomes = monitor.model_outcomes(model);
        let samples = outcomes.len();
        let accuracy = (samples > 0).then(|| outcomes.iter().filter(|c| **c).count() as f64 / samples as f64);

        let status = match accuracy {
            Some(_) if samples < self.config.min_samples => HealthStatus::Unknown,
            Some(acc) if acc >= self.config.healthy_accuracy => HealthStatus::Healthy,
            Some(acc) if acc >= self.config.marginal_accuracy => HealthStatus::Marginal,
            Some(_) => HealthStatus::Unhealthy,
            None => HealthStatus::Unknown,
        };

        let weights = monitor.weight_series(model);
        let recent = &weights[weights.len().saturating_sub(self.config.trend_window)..];
        let weight_trend = match slope(recent) {
            Some(s) if s > self.config.trend_threshold => WeightTrend::Rising,
            Some(s) if s < -self.config.trend_threshold => WeightTrend::Falling,
            _ => WeightTrend::Flat,
        };

        ModelHealth {
            model: model.to_string(),
            status,
            accuracy,
            samples,
            weight_trend,
            current_weight: weights.last().copied(),
            recommendation: recommendation(model, status, weight_trend, samples),
        }
    }

    /// Check every model the monitor has seen.
    pub fn check_all(&self, monitor: &PerformanceMonitor) -> Vec<ModelHealth> {
        monitor.models().iter().map(|m| self.check(monitor, m)).collect()
    }
}

/// Least-squares slope of `values` against their index.
fn slope(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = values.iter().sum::<f64>() / n as f64;
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    Some(num / den)
}

fn recommendation(model: &str, status: HealthStatus, trend: WeightTrend, samples: usize) -> String {
    match (status, trend) {
        (HealthStatus::Unknown, _) => format!("{}: only {} samples, keep collecting", model, samples),
        (HealthStatus::Healthy, WeightTrend::Falling) => {
            format!("{}: healthy but losing ensemble weight, keep monitoring", model)
        }
        (HealthStatus::Healthy, _) => format!("{}: healthy, no action needed", model),
        (HealthStatus::Marginal, _) => format!("{}: marginal accuracy, schedule retraining", model),
        (HealthStatus::Unhealthy, WeightTrend::Falling) => {
            format!("{}: unhealthy and losing weight, consider removing from ensemble", model)
        }
        (HealthStatus::Unhealthy, _) => format!("{}: unhealthy, retrain or disable", model),
    }
}
