//! Walk-forward ensemble runner.
//!
//! Drives expanding-window training and one-step-ahead prediction over an
//! ordered bar history. Every prediction for bar `t` is produced by models
//! trained on `bars[..t]` only, and the step record carries that exclusive
//! training end so the no-lookahead property can be checked structurally.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::data::{Bar, Direction, PredictionRecord};
use crate::error::{EngineError, EngineResult};
use crate::forecast::{ForecastOutput, Forecaster};
use crate::monitor::PerformanceMonitor;
use crate::report::BatchReport;
use crate::validation::BarIntegrityValidator;
use crate::weights::{equal_weights, WeightMethod, WeightOptimizer};

use super::ensemble::{weighted_vote, EnsembleMetrics, WeightSnapshot};

/// Walk-forward runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkForwardConfig {
    /// Bars reserved for the first training window.
    pub initial_train_size: usize,
    /// Bars predicted per step (and the forecast horizon).
    pub test_size: usize,
    /// Retrain every N steps.
    pub refit_frequency: usize,
    /// Refresh ensemble weights every N steps.
    pub weight_update_frequency: usize,
    pub weight_method: WeightMethod,
    /// `min_samples` handed to every forecaster's `train`.
    pub min_train_samples: usize,
    /// Returns within `±neutral_band` are labelled neutral.
    pub neutral_band: f64,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            initial_train_size: 252,
            test_size: 1,
            refit_frequency: 20,
            weight_update_frequency: 5,
            weight_method: WeightMethod::Ridge,
            min_train_samples: 50,
            neutral_band: 0.001,
        }
    }
}

impl WalkForwardConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.initial_train_size == 0 {
            return Err(EngineError::config("walkforward.initial_train_size must be > 0"));
        }
        if self.test_size == 0 {
            return Err(EngineError::config("walkforward.test_size must be > 0"));
        }
        if self.refit_frequency == 0 || self.weight_update_frequency == 0 {
            return Err(EngineError::config("walkforward frequencies must be > 0"));
        }
        if !self.neutral_band.is_finite() || self.neutral_band < 0.0 {
            return Err(EngineError::config("walkforward.neutral_band must be >= 0"));
        }
        Ok(())
    }
}

/// Runner lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    WarmUp,
    Training,
    Testing,
    Complete,
}

/// One completed walk-forward step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step number, counted from the first prediction.
    pub step: usize,
    /// Index of the first predicted bar.
    pub index: usize,
    /// Exclusive end of the training slice; always equal to `index`.
    pub train_end: usize,
    pub refit: bool,
    pub weights_updated: bool,
    pub record: PredictionRecord,
}

/// Output of a walk-forward run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardResult {
    pub symbol: String,
    pub steps: BatchReport<StepRecord>,
    pub metrics: EnsembleMetrics,
    pub final_weights: BTreeMap<String, f64>,
}

impl WalkForwardResult {
    /// Steps attempted.
    pub fn n_windows(&self) -> usize {
        self.steps.attempted()
    }

    pub fn n_completed(&self) -> usize {
        self.steps.completed.len()
    }

    pub fn records(&self) -> impl Iterator<Item = &PredictionRecord> {
        self.steps.completed.iter().map(|s| &s.record)
    }

    pub fn summary(&self) -> String {
        format!(
            "Walk-Forward {}: {}/{} windows completed\n{}",
            self.symbol,
            self.n_completed(),
            self.n_windows(),
            self.metrics.summary()
        )
    }
}

/// Walk-forward runner over a set of forecasters.
pub struct WalkForwardRunner {
    config: WalkForwardConfig,
    optimizer: WeightOptimizer,
    forecasters: Vec<Box<dyn Forecaster>>,
    weights: BTreeMap<String, f64>,
    /// Models whose last training succeeded.
    ready: BTreeSet<String>,
    state: RunnerState,
}

impl WalkForwardRunner {
    pub fn new(
        config: WalkForwardConfig,
        optimizer: WeightOptimizer,
        forecasters: Vec<Box<dyn Forecaster>>,
    ) -> EngineResult<Self> {
        config.validate()?;
        if forecasters.is_empty() {
            return Err(EngineError::config("walk-forward runner needs at least one forecaster"));
        }
        let mut names = BTreeSet::new();
        for f in &forecasters {
            if !names.insert(f.name().to_string()) {
                return Err(EngineError::config(format!("duplicate forecaster name {}", f.name())));
            }
        }
        let weights = equal_weights(forecasters.iter().map(|f| f.name()));
        Ok(Self {
            config,
            optimizer,
            forecasters,
            weights,
            ready: BTreeSet::new(),
            state: RunnerState::WarmUp,
        })
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn weights(&self) -> &BTreeMap<String, f64> {
        &self.weights
    }

    pub fn config(&self) -> &WalkForwardConfig {
        &self.config
    }

    /// Run the walk-forward loop over `bars`.
    ///
    /// Per-step failures are recorded in the result's batch report. Unsorted
    /// bars or a history too short for a single step are hard errors. Every
    /// completed record is forwarded to `monitor` when one is supplied.
    pub fn run(
        &mut self,
        symbol: &str,
        bars: &[Bar],
        mut monitor: Option<&mut PerformanceMonitor>,
    ) -> EngineResult<WalkForwardResult> {
        BarIntegrityValidator::ensure_sorted(bars)?;

        let cfg = self.config.clone();
        if bars.len() < cfg.initial_train_size + cfg.test_size {
            return Err(EngineError::insufficient(format!(
                "{}: {} bars, need at least {}",
                symbol,
                bars.len(),
                cfg.initial_train_size + cfg.test_size
            )));
        }

        self.state = RunnerState::WarmUp;
        self.ready.clear();
        self.weights = equal_weights(self.forecasters.iter().map(|f| f.name()));

        let last_start = bars.len() - cfg.test_size;
        info!(
            "Walk-forward {}: {} bars, steps {}..={} by {}",
            symbol, bars.len(), cfg.initial_train_size, last_start, cfg.test_size
        );

        let mut steps: BatchReport<StepRecord> = BatchReport::new();
        let mut evolution = vec![WeightSnapshot {
            index: cfg.initial_train_size,
            timestamp: bars[cfg.initial_train_size].timestamp,
            weights: self.weights.clone(),
            method: WeightMethod::Equal,
            fell_back: false,
        }];

        for (step, t) in (cfg.initial_train_size..=last_start).step_by(cfg.test_size).enumerate() {
            let refit = step % cfg.refit_frequency == 0;
            let update = step > 0 && step % cfg.weight_update_frequency == 0;

            let weights_updated = if update {
                match self.refresh_weights(&steps, t, bars[t].timestamp) {
                    Some(snapshot) => {
                        evolution.push(snapshot);
                        true
                    }
                    None => false,
                }
            } else {
                false
            };

            match self.step(symbol, bars, t, refit) {
                Ok(record) => {
                    if let Some(m) = monitor.as_deref_mut() {
                        m.record(record.clone());
                    }
                    steps.complete(StepRecord {
                        step,
                        index: t,
                        train_end: t,
                        refit,
                        weights_updated,
                        record,
                    });
                }
                Err(e) if e.is_fatal() => {
                    self.state = RunnerState::Complete;
                    return Err(e);
                }
                Err(e) => steps.skip(format!("{} step {} (bar {})", symbol, step, t), &e),
            }
        }

        self.state = RunnerState::Complete;
        let metrics = EnsembleMetrics::from_records(steps.completed.iter().map(|s| &s.record), evolution);
        info!("Walk-forward {}: {}", symbol, steps.summary());

        Ok(WalkForwardResult {
            symbol: symbol.to_string(),
            steps,
            metrics,
            final_weights: self.weights.clone(),
        })
    }

    /// Train (when due) and predict bar `t` from `bars[..t]`.
    fn step(&mut self, symbol: &str, bars: &[Bar], t: usize, refit: bool) -> EngineResult<PredictionRecord> {
        let history = &bars[..t];
        let horizon = self.config.test_size;

        if refit {
            self.state = RunnerState::Training;
            self.train_all(history);
        }
        if self.ready.is_empty() {
            return Err(EngineError::ModelFailure {
                model: "ensemble".to_string(),
                reason: "no trained forecaster available".to_string(),
            });
        }

        self.state = RunnerState::Testing;
        let mut outputs: BTreeMap<String, ForecastOutput> = BTreeMap::new();
        for forecaster in &self.forecasters {
            if !self.ready.contains(forecaster.name()) {
                continue;
            }
            match forecaster.predict(history, horizon) {
                Ok(output) => {
                    outputs.insert(forecaster.name().to_string(), output);
                }
                Err(e) => warn!("{} predict failed at bar {}, excluded from vote: {}", forecaster.name(), t, e),
            }
        }

        let vote = weighted_vote(&outputs, &self.weights).ok_or_else(|| EngineError::ModelFailure {
            model: "ensemble".to_string(),
            reason: format!("every forecaster failed to predict bar {}", t),
        })?;

        let end = t + horizon - 1;
        let realized = bars[end].return_from(&bars[t - 1]);
        if !realized.is_finite() {
            // Missing close: this step has no label, the rest of the run is unaffected.
            return Err(EngineError::insufficient(format!("missing or non-finite close at bar {}", end)));
        }
        let actual = Direction::from_return(realized, self.config.neutral_band);

        debug!(
            "bar {}: predicted {} ({:.2}) actual {}",
            t, vote.label, vote.confidence, actual
        );

        Ok(PredictionRecord::new(
            bars[t].timestamp,
            symbol,
            vote.label,
            vote.confidence,
            outputs.iter().map(|(m, o)| (m.clone(), o.label)).collect(),
            vote.weights,
            actual,
        ))
    }

    fn train_all(&mut self, history: &[Bar]) {
        let horizon = self.config.test_size;
        let min_samples = self.config.min_train_samples;
        self.ready.clear();

        for forecaster in self.forecasters.iter_mut() {
            let result = forecaster
                .prepare_training_data(history, horizon)
                .and_then(|(features, labels)| forecaster.train(&features, &labels, min_samples));
            match result {
                Ok(()) => {
                    self.ready.insert(forecaster.name().to_string());
                }
                Err(e) => warn!(
                    "{} training on {} bars failed, excluded until next refit: {}",
                    forecaster.name(),
                    history.len(),
                    e
                ),
            }
        }
        debug!("Trained {}/{} forecasters on {} bars", self.ready.len(), self.forecasters.len(), history.len());
    }

    /// Re-optimize weights from the most recent completed records.
    ///
    /// Series are label signs; only records where every model predicted are
    /// used. Too few such records leaves the current weights in place.
    fn refresh_weights(
        &mut self,
        steps: &BatchReport<StepRecord>,
        index: usize,
        timestamp: DateTime<Utc>,
    ) -> Option<WeightSnapshot> {
        let names: Vec<String> = self.forecasters.iter().map(|f| f.name().to_string()).collect();
        let lookback = self.optimizer.config().lookback_window;

        let usable: Vec<&PredictionRecord> = steps
            .completed
            .iter()
            .rev()
            .map(|s| &s.record)
            .filter(|r| names.iter().all(|n| r.model_predictions.contains_key(n)))
            .take(lookback)
            .collect();

        if usable.len() < self.optimizer.config().min_samples {
            debug!("{} usable records, keeping current weights", usable.len());
            return None;
        }

        let mut predictions: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for name in &names {
            let series = usable
                .iter()
                .rev()
                .filter_map(|r| r.model_predictions.get(name).map(|d| d.sign()))
                .collect();
            predictions.insert(name.clone(), series);
        }
        let actuals: Vec<f64> = usable.iter().rev().map(|r| r.actual.sign()).collect();

        let outcome = self
            .optimizer
            .optimize_detailed(&predictions, &actuals, self.config.weight_method);
        debug!("Weights at bar {}: {:?}", index, outcome.weights);
        self.weights = outcome.weights.clone();

        Some(WeightSnapshot {
            index,
            timestamp,
            weights: outcome.weights,
            method: outcome.method_used,
            fell_back: outcome.fell_back,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::forecast::{ClassProbabilities, FeatureMatrix, ForecastError};
    use crate::monitor::PerformanceMonitorConfig;
    use chrono::{Duration, TimeZone};
    use std::sync::{Arc, Mutex};

    fn bars(n: usize) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let close = 100.0 + (i as f64 * 0.5).sin() * 3.0 + i as f64 * 0.05;
                Bar::new(start + Duration::days(i as i64), close, close + 1.0, close - 1.0, close, 1_000.0)
            })
            .collect()
    }

    /// Predicts continuation of the last move; records every history length it sees.
    struct Momentum {
        name: String,
        seen: Arc<Mutex<Vec<usize>>>,
        fail_predict_every: Option<usize>,
    }

    impl Momentum {
        fn new(name: &str) -> (Self, Arc<Mutex<Vec<usize>>>) {
            let seen = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    name: name.to_string(),
                    seen: seen.clone(),
                    fail_predict_every: None,
                },
                seen,
            )
        }
    }

    impl Forecaster for Momentum {
        fn name(&self) -> &str {
            &self.name
        }

        fn prepare_training_data(&self, bars: &[Bar], _horizon: usize) -> Result<(FeatureMatrix, Vec<Direction>), ForecastError> {
            self.seen.lock().unwrap().push(bars.len());
            let rows = bars.windows(2).map(|w| vec![w[1].return_from(&w[0])]).collect();
            let labels = bars.windows(2).map(|w| Direction::from_return(w[1].return_from(&w[0]), 0.0)).collect();
            Ok((FeatureMatrix::new(vec!["ret".into()], rows), labels))
        }

        fn train(&mut self, features: &FeatureMatrix, _labels: &[Direction], min_samples: usize) -> Result<(), ForecastError> {
            if features.n_samples() < min_samples {
                return Err(ForecastError::InsufficientData {
                    needed: min_samples,
                    got: features.n_samples(),
                });
            }
            Ok(())
        }

        fn predict(&self, bars: &[Bar], _horizon: usize) -> Result<ForecastOutput, ForecastError> {
            self.seen.lock().unwrap().push(bars.len());
            if let Some(k) = self.fail_predict_every {
                if bars.len() % k == 0 {
                    return Err(ForecastError::Model {
                        model: self.name.clone(),
                        reason: "boom".into(),
                    });
                }
            }
            let n = bars.len();
            let last = bars[n - 1].return_from(&bars[n - 2]);
            let probs = if last > 0.0 {
                ClassProbabilities::new(0.7, 0.2, 0.1)
            } else {
                ClassProbabilities::new(0.1, 0.2, 0.7)
            };
            Ok(ForecastOutput::from_probabilities(probs))
        }
    }

    fn config() -> WalkForwardConfig {
        WalkForwardConfig {
            initial_train_size: 30,
            refit_frequency: 10,
            weight_update_frequency: 5,
            min_train_samples: 10,
            ..Default::default()
        }
    }

    #[test]
    fn test_no_lookahead() {
        let data = bars(80);
        let (model, seen) = Momentum::new("momentum");
        let mut runner = WalkForwardRunner::new(config(), WeightOptimizer::default(), vec![Box::new(model)]).unwrap();
        let result = runner.run("SPY", &data, None).unwrap();

        assert_eq!(result.n_windows(), 50);
        assert_eq!(result.n_completed(), 50);
        for step in &result.steps.completed {
            assert_eq!(step.train_end, step.index);
            assert!(step.train_end <= step.index);
        }
        // Every slice the model saw ended strictly before the predicted bar.
        let lens = seen.lock().unwrap().clone();
        assert!(lens.iter().all(|len| *len >= 30 && *len < 80));
        assert_eq!(runner.state(), RunnerState::Complete);
    }

    #[test]
    fn test_failed_predictions_are_excluded_not_fatal() {
        let data = bars(60);
        let (good, _) = Momentum::new("good");
        let (mut flaky, _) = Momentum::new("flaky");
        flaky.fail_predict_every = Some(3);
        let mut runner =
            WalkForwardRunner::new(config(), WeightOptimizer::default(), vec![Box::new(good), Box::new(flaky)]).unwrap();
        let result = runner.run("SPY", &data, None).unwrap();

        assert_eq!(result.n_completed(), 30);
        let excluded = result.steps.completed.iter().filter(|s| s.record.model_predictions.len() == 1).count();
        assert_eq!(excluded, 10);
        for step in &result.steps.completed {
            let sum: f64 = step.record.model_weights.values().sum();
            assert!((sum - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_untrainable_models_skip_steps() {
        let data = bars(45);
        let (model, _) = Momentum::new("m");
        let cfg = WalkForwardConfig {
            min_train_samples: 1_000,
            ..config()
        };
        let mut runner = WalkForwardRunner::new(cfg, WeightOptimizer::default(), vec![Box::new(model)]).unwrap();
        let result = runner.run("SPY", &data, None).unwrap();
        assert_eq!(result.n_windows(), 15);
        assert_eq!(result.n_completed(), 0);
        assert_eq!(result.steps.skipped.len(), 15);
    }

    #[test]
    fn test_missing_close_skips_step_only() {
        let mut data = bars(80);
        data[79].close = f64::NAN;
        let (model, _) = Momentum::new("momentum");
        let mut runner = WalkForwardRunner::new(config(), WeightOptimizer::default(), vec![Box::new(model)]).unwrap();
        let result = runner.run("SPY", &data, None).unwrap();

        assert_eq!(result.n_windows(), 50);
        assert_eq!(result.n_completed(), 49);
        assert_eq!(result.steps.skipped.len(), 1);
        assert_eq!(result.steps.skipped[0].kind, FailureKind::InsufficientData);
        assert!(result.steps.skipped[0].unit.contains("bar 79"));
        assert_eq!(runner.state(), RunnerState::Complete);
    }

    #[test]
    fn test_weights_refresh_and_feed_monitor() {
        let data = bars(80);
        let (a, _) = Momentum::new("a");
        let (b, _) = Momentum::new("b");
        let mut monitor = PerformanceMonitor::new(PerformanceMonitorConfig::default());
        let mut runner = WalkForwardRunner::new(config(), WeightOptimizer::default(), vec![Box::new(a), Box::new(b)]).unwrap();
        let result = runner.run("SPY", &data, Some(&mut monitor)).unwrap();

        assert_eq!(monitor.len(), result.n_completed());
        assert!(result.metrics.weight_evolution.len() > 1);
        for snapshot in &result.metrics.weight_evolution {
            let sum: f64 = snapshot.weights.values().sum();
            assert!((sum - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let (m, _) = Momentum::new("m");
        assert!(WalkForwardRunner::new(config(), WeightOptimizer::default(), Vec::new()).is_err());

        let mut runner = WalkForwardRunner::new(config(), WeightOptimizer::default(), vec![Box::new(m)]).unwrap();
        let short = bars(20);
        assert!(matches!(runner.run("SPY", &short, None), Err(EngineError::InsufficientData(_))));

        let mut unsorted = bars(50);
        unsorted.swap(10, 11);
        assert!(matches!(runner.run("SPY", &unsorted, None), Err(EngineError::InvalidInput(_))));
    }
}
