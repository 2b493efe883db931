//! Ensemble weight optimization.
//!
//! Turns recent per-model predictions and realized actuals into a bounded
//! weight vector. Every method ends in the same projection step so the result
//! always sums to 1 with each weight inside `[min_weight, max_weight]`.
//! Numerical trouble never reaches the caller: it degrades to equal weights.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};

use super::ridge::ridge_coefficients;

/// Weighting method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightMethod {
    /// L2-penalized stacking regression, |coef| as weights.
    Ridge,
    /// Risk-adjusted negative absolute error.
    Sharpe,
    /// Squared edge over a coin flip on direction-of-change.
    Directional,
    /// Minimize MSE + alpha*||w||² on the bounded simplex.
    #[serde(alias = "scipy")]
    Constrained,
    Equal,
}

impl WeightMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ridge => "ridge",
            Self::Sharpe => "sharpe",
            Self::Directional => "directional",
            Self::Constrained => "constrained",
            Self::Equal => "equal",
        }
    }
}

/// Weight optimizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightOptimizerConfig {
    /// Only the most recent samples are used.
    pub lookback_window: usize,
    pub min_weight: f64,
    pub max_weight: f64,
    /// L2 penalty for the ridge method.
    pub ridge_alpha: f64,
    /// L2 penalty for the constrained method.
    pub constrained_alpha: f64,
    /// Iteration cap for the constrained solver.
    pub max_iter: usize,
    /// Convergence tolerance (max weight change per iteration).
    pub tolerance: f64,
    /// Fewer aligned samples than this yields equal weights.
    pub min_samples: usize,
    pub default_method: WeightMethod,
}

impl Default for WeightOptimizerConfig {
    fn default() -> Self {
        Self {
            lookback_window: 60,
            min_weight: 0.05,
            max_weight: 0.60,
            ridge_alpha: 1.0,
            constrained_alpha: 0.01,
            max_iter: 5_000,
            tolerance: 1e-7,
            min_samples: 5,
            default_method: WeightMethod::Ridge,
        }
    }
}

impl WeightOptimizerConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.lookback_window == 0 {
            return Err(EngineError::config("weights.lookback_window must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.min_weight)
            || !(0.0..=1.0).contains(&self.max_weight)
            || self.min_weight > self.max_weight
        {
            return Err(EngineError::config(format!(
                "weights bounds must satisfy 0 <= min ({}) <= max ({}) <= 1",
                self.min_weight, self.max_weight
            )));
        }
        if self.ridge_alpha < 0.0 || self.constrained_alpha < 0.0 {
            return Err(EngineError::config("weights alphas must be >= 0"));
        }
        if self.max_iter == 0 {
            return Err(EngineError::config("weights.max_iter must be > 0"));
        }
        Ok(())
    }
}

/// Weights plus provenance of how they were obtained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightOutcome {
    pub weights: BTreeMap<String, f64>,
    pub requested: WeightMethod,
    pub method_used: WeightMethod,
    pub fell_back: bool,
    pub reason: Option<String>,
}

/// Ensemble weight optimizer.
#[derive(Debug, Clone)]
pub struct WeightOptimizer {
    config: WeightOptimizerConfig,
}

impl Default for WeightOptimizer {
    fn default() -> Self {
        Self::new(WeightOptimizerConfig::default())
    }
}

impl WeightOptimizer {
    pub fn new(config: WeightOptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WeightOptimizerConfig {
        &self.config
    }

    /// Optimize weights with the given method.
    pub fn optimize(
        &self,
        predictions: &BTreeMap<String, Vec<f64>>,
        actuals: &[f64],
        method: WeightMethod,
    ) -> BTreeMap<String, f64> {
        self.optimize_detailed(predictions, actuals, method).weights
    }

    /// Optimize weights, reporting whether a fallback was taken.
    pub fn optimize_detailed(
        &self,
        predictions: &BTreeMap<String, Vec<f64>>,
        actuals: &[f64],
        method: WeightMethod,
    ) -> WeightOutcome {
        let models: Vec<&String> = predictions.keys().collect();

        if models.len() <= 1 {
            return WeightOutcome {
                weights: models.into_iter().map(|m| (m.clone(), 1.0)).collect(),
                requested: method,
                method_used: method,
                fell_back: false,
                reason: None,
            };
        }

        let result = self
            .aligned_window(predictions, actuals)
            .and_then(|(x, y)| self.raw_weights(&x, &y, method));

        match result {
            Ok(raw) => {
                let bounded = project_to_bounds(&raw, self.config.min_weight, self.config.max_weight);
                debug!("{} weights: {:?}", method.as_str(), bounded);
                WeightOutcome {
                    weights: models.iter().map(|m| (*m).clone()).zip(bounded).collect(),
                    requested: method,
                    method_used: method,
                    fell_back: false,
                    reason: None,
                }
            }
            Err(e) => {
                warn!("{} weighting failed, using equal weights: {}", method.as_str(), e);
                WeightOutcome {
                    weights: equal_weights(models.iter().map(|m| m.as_str())),
                    requested: method,
                    method_used: WeightMethod::Equal,
                    fell_back: method != WeightMethod::Equal,
                    reason: Some(e.to_string()),
                }
            }
        }
    }

    /// Tail-align every series and cut to the lookback window.
    /// Returns the `n x m` prediction matrix and the target vector.
    fn aligned_window(
        &self,
        predictions: &BTreeMap<String, Vec<f64>>,
        actuals: &[f64],
    ) -> EngineResult<(Array2<f64>, Array1<f64>)> {
        let shortest = predictions
            .values()
            .map(|p| p.len())
            .chain(std::iter::once(actuals.len()))
            .min()
            .unwrap_or(0);
        let n = shortest.min(self.config.lookback_window);

        if n < self.config.min_samples.max(2) {
            return Err(EngineError::insufficient(format!(
                "{} aligned samples, need {}",
                n,
                self.config.min_samples.max(2)
            )));
        }

        let m = predictions.len();
        let mut x = Array2::<f64>::zeros((n, m));
        for (j, series) in predictions.values().enumerate() {
            let tail = &series[series.len() - n..];
            for (i, v) in tail.iter().enumerate() {
                x[[i, j]] = *v;
            }
        }
        let y = Array1::from(actuals[actuals.len() - n..].to_vec());

        if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
            return Err(EngineError::numerical("non-finite value in weighting window"));
        }
        Ok((x, y))
    }

    fn raw_weights(&self, x: &Array2<f64>, y: &Array1<f64>, method: WeightMethod) -> EngineResult<Vec<f64>> {
        let raw = match method {
            WeightMethod::Ridge => {
                let coef = ridge_coefficients(x, y, self.config.ridge_alpha)?;
                coef.iter().map(|c| c.abs()).collect()
            }
            WeightMethod::Sharpe => sharpe_scores(x, y)?,
            WeightMethod::Directional => directional_scores(x, y)?,
            WeightMethod::Constrained => self.constrained_weights(x, y)?,
            WeightMethod::Equal => vec![1.0; x.ncols()],
        };

        let total: f64 = raw.iter().sum();
        if !total.is_finite() || total <= 0.0 || raw.iter().any(|w| *w < 0.0) {
            return Err(EngineError::numerical(format!(
                "{} produced degenerate raw weights",
                method.as_str()
            )));
        }
        Ok(raw.iter().map(|w| w / total).collect())
    }

    /// Projected gradient descent on `MSE(Xw, y) + alpha * ||w||²`.
    fn constrained_weights(&self, x: &Array2<f64>, y: &Array1<f64>) -> EngineResult<Vec<f64>> {
        let (n, m) = x.dim();
        let lo = self.config.min_weight;
        let hi = self.config.max_weight;
        let alpha = self.config.constrained_alpha;

        // Lipschitz bound of the gradient: 2/n * ||X||_F² + 2 alpha.
        let frob: f64 = x.iter().map(|v| v * v).sum();
        let lipschitz = 2.0 / n as f64 * frob + 2.0 * alpha;
        if lipschitz <= 0.0 || !lipschitz.is_finite() {
            return Err(EngineError::numerical("constrained: zero-variance design"));
        }
        let step = 1.0 / lipschitz;

        let mut w = Array1::from(project_to_bounds(&vec![1.0; m], lo, hi));
        for iter in 0..self.config.max_iter {
            let residual = x.dot(&w) - y;
            let grad = x.t().dot(&residual) * (2.0 / n as f64) + &w * (2.0 * alpha);
            let candidate: Vec<f64> = (&w - &(grad * step)).to_vec();
            let next = Array1::from(project_to_bounds(&candidate, lo, hi));
            let delta = (&next - &w).iter().fold(0.0_f64, |acc, d| acc.max(d.abs()));
            w = next;
            if delta < self.config.tolerance {
                debug!("constrained weights converged after {} iterations", iter + 1);
                return Ok(w.to_vec());
            }
        }
        Err(EngineError::numerical(format!(
            "constrained solver did not converge in {} iterations",
            self.config.max_iter
        )))
    }
}

/// Score each model by mean/std of its negative absolute error, shifted positive.
fn sharpe_scores(x: &Array2<f64>, y: &Array1<f64>) -> EngineResult<Vec<f64>> {
    let n = x.nrows() as f64;
    let mut scores = Vec::with_capacity(x.ncols());
    for col in x.columns() {
        let neg_err: Vec<f64> = col.iter().zip(y.iter()).map(|(p, a)| -(p - a).abs()).collect();
        let mean = neg_err.iter().sum::<f64>() / n;
        let var = neg_err.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let std = var.sqrt();
        if std < 1e-12 {
            return Err(EngineError::numerical("sharpe: zero error variance"));
        }
        scores.push(mean / std);
    }
    let min = scores.iter().cloned().fold(f64::INFINITY, f64::min);
    Ok(scores.iter().map(|s| s - min + 1e-3).collect())
}

/// Score each model by `max(accuracy - 0.5, 0)²` on sign-of-change agreement.
fn directional_scores(x: &Array2<f64>, y: &Array1<f64>) -> EngineResult<Vec<f64>> {
    let n = x.nrows();
    let actual_moves: Vec<f64> = (1..n).map(|t| (y[t] - y[t - 1]).signum_or_zero()).collect();
    let scores: Vec<f64> = x
        .columns()
        .into_iter()
        .map(|col| {
            let hits = (1..n)
                .filter(|&t| (col[t] - col[t - 1]).signum_or_zero() == actual_moves[t - 1])
                .count();
            let accuracy = hits as f64 / (n - 1) as f64;
            (accuracy - 0.5).max(0.0).powi(2)
        })
        .collect();
    if scores.iter().all(|s| *s == 0.0) {
        return Err(EngineError::numerical("directional: no model beats chance"));
    }
    Ok(scores)
}

trait SignumOrZero {
    fn signum_or_zero(self) -> f64;
}

impl SignumOrZero for f64 {
    fn signum_or_zero(self) -> f64 {
        if self > 0.0 {
            1.0
        } else if self < 0.0 {
            -1.0
        } else {
            0.0
        }
    }
}

/// Uniform weights over the given names.
pub fn equal_weights<'a>(names: impl Iterator<Item = &'a str>) -> BTreeMap<String, f64> {
    let names: Vec<&str> = names.collect();
    let w = 1.0 / names.len().max(1) as f64;
    names.into_iter().map(|n| (n.to_string(), w)).collect()
}

/// Project onto `{w : sum(w) = 1, lo <= w_i <= hi}`.
///
/// Finds the shift `tau` with `sum(clamp(v_i - tau, lo, hi)) = 1` by bisection.
/// Bounds that cannot hold for `n` weights are widened to include `1/n`.
pub fn project_to_bounds(raw: &[f64], lo: f64, hi: f64) -> Vec<f64> {
    let n = raw.len();
    if n == 0 {
        return Vec::new();
    }
    let even = 1.0 / n as f64;
    let lo = if lo * (n as f64) > 1.0 { even } else { lo };
    let hi = if hi * (n as f64) < 1.0 { even } else { hi };

    let v: Vec<f64> = raw.iter().map(|x| if x.is_finite() { *x } else { 0.0 }).collect();
    let mass = |tau: f64| v.iter().map(|x| (x - tau).clamp(lo, hi)).sum::<f64>();

    let max_v = v.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min_v = v.iter().cloned().fold(f64::INFINITY, f64::min);
    let mut low = min_v - hi;
    let mut high = max_v - lo;
    for _ in 0..200 {
        let mid = 0.5 * (low + high);
        if mass(mid) > 1.0 {
            low = mid;
        } else {
            high = mid;
        }
    }
    let tau = 0.5 * (low + high);
    let mut w: Vec<f64> = v.iter().map(|x| (x - tau).clamp(lo, hi)).collect();

    // Absorb residual rounding into an interior weight.
    let residual = 1.0 - w.iter().sum::<f64>();
    if residual != 0.0 {
        if let Some(i) = (0..n).find(|&i| w[i] + residual >= lo && w[i] + residual <= hi) {
            w[i] += residual;
        }
    }
    w
}
