//! Intraday-to-horizon layer weight calibration.
//!
//! Learns how to blend component forecasts (supertrend, support/resistance,
//! ensemble) from realized outcomes. Two stages: an exhaustive search over a
//! weight lattice scored by embargoed walk-forward cross-validation, then a
//! bounded coordinate refinement accepted only on strict improvement.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};

/// One realized outcome with the component forecasts made for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSample {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub horizon: String,
    /// Component name -> forecast return.
    pub forecasts: BTreeMap<String, f64>,
    pub realized: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMethod {
    /// No history: hard-coded seed weights.
    Default,
    /// Too little history for the grid: inverse mean absolute error.
    InverseError,
    GridSearch,
    /// Grid optimum improved by local refinement.
    Refined,
}

/// Optimal layer weights for one `(symbol, horizon)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub symbol: String,
    pub horizon: String,
    pub weights: BTreeMap<String, f64>,
    /// Out-of-sample mean absolute error, when history allowed measuring it.
    pub validation_error: Option<f64>,
    pub directional_accuracy: Option<f64>,
    pub sample_count: usize,
    pub method: CalibrationMethod,
    pub calibrated_at: DateTime<Utc>,
    /// Source horizon when the weights were copied from a shorter horizon.
    #[serde(default)]
    pub propagated_from: Option<String>,
}

impl CalibrationResult {
    pub fn is_default(&self) -> bool {
        self.method == CalibrationMethod::Default
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibratorConfig {
    /// Weights used when there is no evaluation history.
    pub seed_weights: BTreeMap<String, f64>,
    /// Lattice spacing of the grid search.
    pub grid_step: f64,
    /// Below this many samples the inverse-error heuristic is used.
    pub grid_min_samples: usize,
    pub cv_folds: usize,
    /// Samples skipped between a training cutoff and its evaluation fold.
    pub embargo: usize,
    /// Iteration cap of the local refinement.
    pub refine_max_iter: usize,
    pub refine_initial_step: f64,
    pub refine_min_step: f64,
}

impl Default for CalibratorConfig {
    fn default() -> Self {
        let seed_weights = [("supertrend", 0.35), ("sr", 0.35), ("ensemble", 0.30)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Self {
            seed_weights,
            grid_step: 0.05,
            grid_min_samples: 30,
            cv_folds: 4,
            embargo: 2,
            refine_max_iter: 200,
            refine_initial_step: 0.025,
            refine_min_step: 0.001,
        }
    }
}

impl CalibratorConfig {
    pub fn validate(&self) -> EngineResult<()> {
        let sum: f64 = self.seed_weights.values().sum();
        if self.seed_weights.is_empty() || (sum - 1.0).abs() > 1e-6 || self.seed_weights.values().any(|w| *w < 0.0) {
            return Err(EngineError::config(format!(
                "calibration.seed_weights must be non-negative and sum to 1, got {:.6}",
                sum
            )));
        }
        let steps = (1.0 / self.grid_step).round();
        if !(self.grid_step > 0.0 && self.grid_step <= 0.5) || (steps * self.grid_step - 1.0).abs() > 1e-9 {
            return Err(EngineError::config("calibration.grid_step must divide 1 and be in (0, 0.5]"));
        }
        if self.cv_folds == 0 {
            return Err(EngineError::config("calibration.cv_folds must be > 0"));
        }
        if self.grid_min_samples < (self.cv_folds + 1) * (self.embargo + 1) {
            return Err(EngineError::config(
                "calibration.grid_min_samples too small for cv_folds and embargo",
            ));
        }
        if self.refine_min_step <= 0.0 || self.refine_initial_step < self.refine_min_step {
            return Err(EngineError::config("calibration refine steps must satisfy 0 < min <= initial"));
        }
        Ok(())
    }

    pub fn components(&self) -> Vec<String> {
        self.seed_weights.keys().cloned().collect()
    }
}

/// MAE differences below this count as ties.
const MAE_TIE: f64 = 1e-12;

/// Score of a weight vector: lower MAE first, then higher directional accuracy.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Score {
    mae: f64,
    directional: f64,
}

impl Score {
    fn better_than(&self, other: &Score) -> bool {
        if (self.mae - other.mae).abs() <= MAE_TIE {
            self.directional > other.directional
        } else {
            self.mae < other.mae
        }
    }
}

/// A `(train_end, eval_start, eval_end)` split over time-ordered samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CvFold {
    pub train_end: usize,
    pub eval_start: usize,
    pub eval_end: usize,
}

pub struct Calibrator {
    config: CalibratorConfig,
}

impl Default for Calibrator {
    fn default() -> Self {
        Self {
            config: CalibratorConfig::default(),
        }
    }
}

impl Calibrator {
    pub fn new(config: CalibratorConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CalibratorConfig {
        &self.config
    }

    /// Seed weights as a calibration result.
    pub fn default_result(&self, symbol: &str, horizon: &str, at: DateTime<Utc>) -> CalibrationResult {
        CalibrationResult {
            symbol: symbol.to_string(),
            horizon: horizon.to_string(),
            weights: self.config.seed_weights.clone(),
            validation_error: None,
            directional_accuracy: None,
            sample_count: 0,
            method: CalibrationMethod::Default,
            calibrated_at: at,
            propagated_from: None,
        }
    }

    /// Calibrate layer weights from evaluation history.
    ///
    /// Samples missing a component or carrying non-finite values are ignored.
    pub fn calibrate(
        &self,
        symbol: &str,
        horizon: &str,
        samples: &[EvaluationSample],
        at: DateTime<Utc>,
    ) -> CalibrationResult {
        let components = self.config.components();
        let mut usable: Vec<&EvaluationSample> = samples
            .iter()
            .filter(|s| s.realized.is_finite())
            .filter(|s| {
                components
                    .iter()
                    .all(|c| s.forecasts.get(c).map_or(false, |f| f.is_finite()))
            })
            .collect();
        usable.sort_by_key(|s| s.timestamp);
        if usable.len() < samples.len() {
            debug!("{}/{}: ignored {} incomplete samples", symbol, horizon, samples.len() - usable.len());
        }

        let x: Vec<Vec<f64>> = usable
            .iter()
            .map(|s| components.iter().map(|c| s.forecasts[c]).collect())
            .collect();
        let y: Vec<f64> = usable.iter().map(|s| s.realized).collect();
        let n = y.len();

        let result = |weights: Vec<f64>, score: Option<Score>, method| CalibrationResult {
            symbol: symbol.to_string(),
            horizon: horizon.to_string(),
            weights: components.iter().cloned().zip(weights).collect(),
            validation_error: score.map(|s| s.mae),
            directional_accuracy: score.map(|s| s.directional),
            sample_count: n,
            method,
            calibrated_at: at,
            propagated_from: None,
        };

        if n == 0 {
            info!("{}/{}: no evaluation history, using seed weights", symbol, horizon);
            return self.default_result(symbol, horizon, at);
        }

        if n < self.config.grid_min_samples {
            let weights = inverse_error_weights(&x, &y);
            let score = evaluate(&weights, &x, &y, 0, n);
            info!("{}/{}: {} samples, inverse-error weights {:?}", symbol, horizon, n, weights);
            return result(weights, Some(score), CalibrationMethod::InverseError);
        }

        match self.search(&x, &y) {
            Ok((weights, validation, method)) => {
                info!(
                    "{}/{}: {:?} over {} samples, validation MAE {:.5}",
                    symbol, horizon, method, n, validation.mae
                );
                result(weights, Some(validation), method)
            }
            Err(e) => {
                warn!("{}/{}: grid search failed, using inverse-error weights: {}", symbol, horizon, e);
                let weights = inverse_error_weights(&x, &y);
                let score = evaluate(&weights, &x, &y, 0, n);
                result(weights, Some(score), CalibrationMethod::InverseError)
            }
        }
    }

    /// Expanding-window folds with an embargo before each evaluation block.
    pub fn cv_folds(&self, n: usize) -> Vec<CvFold> {
        let k = self.config.cv_folds;
        let block = n / (k + 1);
        if block == 0 {
            return Vec::new();
        }
        (1..=k)
            .filter_map(|i| {
                let train_end = i * block;
                let eval_start = train_end + self.config.embargo;
                let eval_end = if i == k { n } else { (i + 1) * block };
                (eval_start < eval_end).then_some(CvFold {
                    train_end,
                    eval_start,
                    eval_end,
                })
            })
            .collect()
    }

    fn search(&self, x: &[Vec<f64>], y: &[f64]) -> EngineResult<(Vec<f64>, Score, CalibrationMethod)> {
        let folds = self.cv_folds(y.len());
        if folds.is_empty() {
            return Err(EngineError::insufficient("no cross-validation fold has evaluation samples"));
        }
        let dims = self.config.seed_weights.len();
        let lattice = weight_lattice(dims, self.config.grid_step);

        let cv_score = |w: &[f64]| -> Score {
            let scores: Vec<Score> = folds
                .iter()
                .map(|f| evaluate(w, x, y, f.eval_start, f.eval_end))
                .collect();
            mean_score(&scores)
        };

        let (grid_best, grid_score) = best_of(&lattice, cv_score)
            .ok_or_else(|| EngineError::numerical("empty weight lattice"))?;
        debug!("grid optimum {:?} (MAE {:.5})", grid_best, grid_score.mae);

        let (weights, method) = match self.refine(&grid_best, grid_score, cv_score) {
            Some(refined) => (refined, CalibrationMethod::Refined),
            None => (grid_best, CalibrationMethod::GridSearch),
        };

        // Nested estimate: select on each training prefix, score on its fold.
        let nested: Vec<Score> = folds
            .iter()
            .filter_map(|f| {
                let (chosen, _) = best_of(&lattice, |w| evaluate(w, x, y, 0, f.train_end))?;
                Some(evaluate(&chosen, x, y, f.eval_start, f.eval_end))
            })
            .collect();
        if nested.is_empty() {
            return Err(EngineError::numerical("nested validation produced no folds"));
        }

        Ok((weights, mean_score(&nested), method))
    }

    /// Pairwise coordinate moves on the simplex with a shrinking step.
    fn refine(&self, start: &[f64], start_score: Score, objective: impl Fn(&[f64]) -> Score) -> Option<Vec<f64>> {
        let mut best = start.to_vec();
        let mut best_score = start_score;
        let mut step = self.config.refine_initial_step;
        let mut improved_any = false;

        for _ in 0..self.config.refine_max_iter {
            let mut improved = false;
            for i in 0..best.len() {
                for j in 0..best.len() {
                    if i == j {
                        continue;
                    }
                    let delta = step.min(best[j]);
                    if delta <= 0.0 || best[i] + delta > 1.0 {
                        continue;
                    }
                    let mut candidate = best.clone();
                    candidate[i] += delta;
                    candidate[j] -= delta;
                    let score = objective(&candidate);
                    if score.better_than(&best_score) {
                        best = candidate;
                        best_score = score;
                        improved = true;
                        improved_any = true;
                    }
                }
            }
            if !improved {
                step /= 2.0;
                if step < self.config.refine_min_step {
                    break;
                }
            }
        }

        improved_any.then(|| normalize(best))
    }
}

/// MAE and directional hit rate of the blended forecast on `[start, end)`.
fn evaluate(weights: &[f64], x: &[Vec<f64>], y: &[f64], start: usize, end: usize) -> Score {
    let n = (end - start) as f64;
    let mut abs_err = 0.0;
    let mut hits = 0usize;
    for t in start..end {
        let blended: f64 = weights.iter().zip(&x[t]).map(|(w, f)| w * f).sum();
        abs_err += (blended - y[t]).abs();
        if blended.signum() == y[t].signum() {
            hits += 1;
        }
    }
    Score {
        mae: abs_err / n,
        directional: hits as f64 / n,
    }
}

fn mean_score(scores: &[Score]) -> Score {
    let n = scores.len() as f64;
    Score {
        mae: scores.iter().map(|s| s.mae).sum::<f64>() / n,
        directional: scores.iter().map(|s| s.directional).sum::<f64>() / n,
    }
}

fn best_of(candidates: &[Vec<f64>], score: impl Fn(&[f64]) -> Score) -> Option<(Vec<f64>, Score)> {
    let mut best: Option<(Vec<f64>, Score)> = None;
    for w in candidates {
        let s = score(w);
        if !s.mae.is_finite() {
            continue;
        }
        match &best {
            Some((_, b)) if !s.better_than(b) => {}
            _ => best = Some((w.clone(), s)),
        }
    }
    best
}

/// Every weight vector of `dims` entries on multiples of `step` summing to 1.
pub fn weight_lattice(dims: usize, step: f64) -> Vec<Vec<f64>> {
    let units = (1.0 / step).round() as usize;
    let mut out = Vec::new();
    let mut current = vec![0usize; dims];
    compositions(units, 0, &mut current, &mut out);
    out.into_iter()
        .map(|c| c.into_iter().map(|u| u as f64 / units as f64).collect())
        .collect()
}

fn compositions(remaining: usize, idx: usize, current: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
    if current.is_empty() {
        return;
    }
    if idx == current.len() - 1 {
        current[idx] = remaining;
        out.push(current.clone());
        return;
    }
    for units in 0..=remaining {
        current[idx] = units;
        compositions(remaining - units, idx + 1, current, out);
    }
}

/// Weights proportional to the inverse mean absolute error of each component.
fn inverse_error_weights(x: &[Vec<f64>], y: &[f64]) -> Vec<f64> {
    let dims = x.first().map_or(0, |row| row.len());
    let n = y.len() as f64;
    let inverse: Vec<f64> = (0..dims)
        .map(|c| {
            let mae = x.iter().zip(y).map(|(row, a)| (row[c] - a).abs()).sum::<f64>() / n;
            1.0 / (mae + 1e-9)
        })
        .collect();
    normalize(inverse)
}

fn normalize(weights: Vec<f64>) -> Vec<f64> {
    let total: f64 = weights.iter().sum();
    if total > 0.0 && total.is_finite() {
        weights.into_iter().map(|w| w / total).collect()
    } else {
        let n = weights.len().max(1) as f64;
        weights.iter().map(|_| 1.0 / n).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
    }

    /// `sr` tracks the realized move closely; the others are noisy.
    fn history(n: usize) -> Vec<EvaluationSample> {
        (0..n)
            .map(|i| {
                let realized = ((i as f64) * 0.9).sin() * 0.02;
                let mut forecasts = BTreeMap::new();
                forecasts.insert("sr".to_string(), realized + 0.001 * ((i as f64) * 3.1).cos());
                forecasts.insert("supertrend".to_string(), 0.015 * ((i as f64) * 1.3).cos());
                forecasts.insert("ensemble".to_string(), -realized * 0.5);
                EvaluationSample {
                    timestamp: at() - Duration::hours((n - i) as i64),
                    symbol: "SPY".to_string(),
                    horizon: "1d".to_string(),
                    forecasts,
                    realized,
                }
            })
            .collect()
    }

    fn assert_weights_sum_to_one(r: &CalibrationResult) {
        let sum: f64 = r.weights.values().sum();
        assert!((sum - 1.0).abs() < 1e-6, "{:?}", r.weights);
        assert!(r.weights.values().all(|w| *w >= 0.0));
    }

    #[test]
    fn test_empty_history_returns_seed() {
        let r = Calibrator::default().calibrate("SPY", "1d", &[], at());
        assert_eq!(r.method, CalibrationMethod::Default);
        assert_eq!(r.weights["supertrend"], 0.35);
        assert_eq!(r.weights["sr"], 0.35);
        assert_eq!(r.weights["ensemble"], 0.30);
        assert!(r.validation_error.is_none());
    }

    #[test]
    fn test_small_history_uses_inverse_error() {
        let r = Calibrator::default().calibrate("SPY", "1d", &history(12), at());
        assert_eq!(r.method, CalibrationMethod::InverseError);
        assert_eq!(r.sample_count, 12);
        assert_weights_sum_to_one(&r);
        assert!(r.weights["sr"] > r.weights["supertrend"]);
        assert!(r.weights["sr"] > r.weights["ensemble"]);
    }

    #[test]
    fn test_grid_search_finds_accurate_component() {
        let r = Calibrator::default().calibrate("SPY", "1d", &history(60), at());
        assert!(matches!(r.method, CalibrationMethod::GridSearch | CalibrationMethod::Refined));
        assert_weights_sum_to_one(&r);
        assert!(r.weights["sr"] >= 0.8, "{:?}", r.weights);
        assert!(r.validation_error.unwrap() < 0.005);
    }

    #[test]
    fn test_incomplete_samples_ignored() {
        let mut samples = history(10);
        samples[0].forecasts.remove("sr");
        samples[1].realized = f64::NAN;
        let r = Calibrator::default().calibrate("SPY", "1d", &samples, at());
        assert_eq!(r.sample_count, 8);
    }

    #[test]
    fn test_cv_folds_respect_embargo() {
        let calibrator = Calibrator::default();
        let folds = calibrator.cv_folds(50);
        assert_eq!(folds.len(), 4);
        for f in &folds {
            assert_eq!(f.eval_start, f.train_end + 2);
            assert!(f.eval_start < f.eval_end);
        }
        assert_eq!(folds.last().unwrap().eval_end, 50);
    }

    #[test]
    fn test_weight_lattice() {
        let lattice = weight_lattice(3, 0.05);
        assert_eq!(lattice.len(), 231);
        assert!(lattice.iter().all(|w| (w.iter().sum::<f64>() - 1.0).abs() < 1e-9));
    }

    #[test]
    fn test_score_ordering() {
        let a = Score { mae: 0.1, directional: 0.5 };
        let b = Score { mae: 0.1, directional: 0.6 };
        let c = Score { mae: 0.2, directional: 0.9 };
        assert!(b.better_than(&a));
        assert!(a.better_than(&c));
        assert!(!a.better_than(&a));
    }
}
