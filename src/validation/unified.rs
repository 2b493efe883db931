//! Unified validation: one drift- and consensus-aware confidence.
//!
//! Reconciles backtesting, walk-forward and live accuracy into a single
//! confidence, penalised by accuracy drift and adjusted by multi-timeframe
//! agreement. Pure: the same inputs always give the same prediction.

use serde::{Deserialize, Serialize};

use crate::data::{clamp_unit, Direction, ValidationScores};
use crate::error::{EngineError, EngineResult};

use super::consensus::{assess_consensus, ConsensusConfig};
use super::drift::{assess_drift, DriftSeverity, DriftThresholds};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UnifiedValidatorConfig {
    pub backtest_weight: f64,
    pub walkforward_weight: f64,
    pub live_weight: f64,
    pub drift: DriftThresholds,
    /// Confidence removed per severity level above none.
    pub drift_penalty_per_level: f64,
    pub consensus: ConsensusConfig,
    /// Retrain when the last retraining is older than this.
    pub retrain_interval_days: i64,
    pub green_threshold: f64,
    pub yellow_threshold: f64,
}

impl Default for UnifiedValidatorConfig {
    fn default() -> Self {
        Self {
            backtest_weight: 0.40,
            walkforward_weight: 0.35,
            live_weight: 0.25,
            drift: DriftThresholds::default(),
            drift_penalty_per_level: 0.05,
            consensus: ConsensusConfig::default(),
            retrain_interval_days: 30,
            green_threshold: 0.70,
            yellow_threshold: 0.50,
        }
    }
}

impl UnifiedValidatorConfig {
    pub fn validate(&self) -> EngineResult<()> {
        let weights = [self.backtest_weight, self.walkforward_weight, self.live_weight];
        let sum: f64 = weights.iter().sum();
        if weights.iter().any(|w| *w < 0.0) || (sum - 1.0).abs() > 1e-6 {
            return Err(EngineError::config(format!(
                "validator score weights must be non-negative and sum to 1, got {:.6}",
                sum
            )));
        }
        if self.drift_penalty_per_level < 0.0 {
            return Err(EngineError::config("validator.drift_penalty_per_level must be >= 0"));
        }
        if self.retrain_interval_days <= 0 {
            return Err(EngineError::config("validator.retrain_interval_days must be > 0"));
        }
        if self.yellow_threshold > self.green_threshold {
            return Err(EngineError::config("validator.yellow_threshold must not exceed green_threshold"));
        }
        self.drift.validate()?;
        self.consensus.validate()
    }
}

/// Coarse traffic light for dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Green,
    Yellow,
    Red,
}

/// Output of one validation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedPrediction {
    pub symbol: String,
    pub direction: Direction,
    pub unified_confidence: f64,
    /// Weighted score before drift and consensus adjustments.
    pub base_confidence: f64,
    pub drift_detected: bool,
    pub drift_magnitude: f64,
    pub drift_severity: DriftSeverity,
    pub timeframe_conflict: bool,
    pub consensus_direction: Direction,
    pub retraining_trigger: bool,
    pub retraining_reason: String,
    pub status: ValidationStatus,
    pub explanation: String,
}

pub struct UnifiedValidator {
    config: UnifiedValidatorConfig,
}

impl Default for UnifiedValidator {
    fn default() -> Self {
        Self {
            config: UnifiedValidatorConfig::default(),
        }
    }
}

impl UnifiedValidator {
    pub fn new(config: UnifiedValidatorConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &UnifiedValidatorConfig {
        &self.config
    }

    pub fn validate(&self, symbol: &str, direction: Direction, scores: &ValidationScores) -> UnifiedPrediction {
        let cfg = &self.config;
        let bt = clamp_unit(scores.backtesting_score);
        let wf = clamp_unit(scores.walkforward_score);
        let live = clamp_unit(scores.live_score);

        let base = cfg.backtest_weight * bt + cfg.walkforward_weight * wf + cfg.live_weight * live;

        let drift = assess_drift(bt, live, &cfg.drift);
        let drift_penalty = drift.severity.rank() as f64 * cfg.drift_penalty_per_level;

        let consensus = assess_consensus(direction, &scores.multi_tf_scores, &cfg.consensus);

        let unified = clamp_unit(base - drift_penalty + consensus.adjustment);

        let (retraining_trigger, retraining_reason) = self.retraining(drift.severity, drift.magnitude, scores);

        let consensus_note = if consensus.timeframes_used == 0 {
            "no timeframe scores".to_string()
        } else if consensus.conflict {
            format!(
                "timeframe conflict, consensus {} ({:+.3})",
                consensus.consensus_direction, consensus.adjustment
            )
        } else {
            format!(
                "timeframes aligned {} ({:+.3})",
                consensus.consensus_direction, consensus.adjustment
            )
        };
        let explanation = format!(
            "base {:.3} (backtest {:.2} x {:.2}, walk-forward {:.2} x {:.2}, live {:.2} x {:.2}); \
             drift {}: {} (-{:.3}); {}; final {:.3}",
            base,
            bt,
            cfg.backtest_weight,
            wf,
            cfg.walkforward_weight,
            live,
            cfg.live_weight,
            drift.severity,
            drift.message,
            drift_penalty,
            consensus_note,
            unified
        );

        UnifiedPrediction {
            symbol: symbol.to_string(),
            direction,
            unified_confidence: unified,
            base_confidence: base,
            drift_detected: drift.detected,
            drift_magnitude: drift.magnitude,
            drift_severity: drift.severity,
            timeframe_conflict: consensus.conflict,
            consensus_direction: consensus.consensus_direction,
            retraining_trigger,
            retraining_reason,
            status: self.status(unified),
            explanation,
        }
    }

    pub fn status(&self, confidence: f64) -> ValidationStatus {
        if confidence >= self.config.green_threshold {
            ValidationStatus::Green
        } else if confidence >= self.config.yellow_threshold {
            ValidationStatus::Yellow
        } else {
            ValidationStatus::Red
        }
    }

    /// Critical drift first, then the schedule.
    fn retraining(&self, severity: DriftSeverity, magnitude: f64, scores: &ValidationScores) -> (bool, String) {
        if severity == DriftSeverity::Critical {
            return (true, format!("critical drift (magnitude {:.3})", magnitude));
        }
        if let Some(last) = scores.last_retrained {
            let days = (scores.as_of - last).num_days();
            if days > self.config.retrain_interval_days {
                return (
                    true,
                    format!(
                        "scheduled: {} days since last retraining (limit {})",
                        days, self.config.retrain_interval_days
                    ),
                );
            }
        }
        (false, "no retraining needed".to_string())
    }
}
