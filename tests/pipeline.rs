//! End-to-end flow with deterministic stub forecasters.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use mahler_ensemble::backtest::{
    BacktestConfig, ForecasterSignals, SignalGenerator, WalkForwardBacktest, WalkForwardBacktestConfig,
};
use mahler_ensemble::calibration::{
    CalibrationService, Calibrator, CalibratorConfig, EvaluationSample, Freshness, FreshnessPolicy,
};
use mahler_ensemble::clock::ManualClock;
use mahler_ensemble::data::close_returns;
use mahler_ensemble::forecast::{ClassProbabilities, FeatureMatrix, ForecastError, ForecastOutput, Forecaster};
use mahler_ensemble::monitor::{AlertType, ModelHealthChecker, PerformanceMonitor, PerformanceMonitorConfig};
use mahler_ensemble::regime::{RegimeClassifierConfig, ReturnRegime};
use mahler_ensemble::store::{InMemoryStore, ValidationStore};
use mahler_ensemble::validation::{UnifiedValidator, ValidationStatus};
use mahler_ensemble::walkforward::{WalkForwardConfig, WalkForwardRunner};
use mahler_ensemble::weights::{AdaptiveWeightOptimizer, WeightOptimizer, WeightOptimizerConfig};
use mahler_ensemble::{Bar, Direction, EngineResult, PredictionRecord, ValidationScores};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, 21, 0, 0).unwrap()
}

/// Steady uptrend with a small wobble; every close-to-close return is positive.
fn trending_bars(n: usize) -> Vec<Bar> {
    (0..n)
        .map(|i| {
            let c = 100.0 + i as f64 * 0.5 + (i as f64 * 0.9).sin() * 0.2;
            Bar::new(start() + Duration::days(i as i64), c, c + 0.5, c - 0.5, c, 5_000.0)
        })
        .collect()
}

/// Follows the last close-to-close move.
struct Momentum;

impl Forecaster for Momentum {
    fn name(&self) -> &str {
        "momentum"
    }

    fn prepare_training_data(&self, bars: &[Bar], _horizon: usize) -> Result<(FeatureMatrix, Vec<Direction>), ForecastError> {
        let rows = bars.windows(2).map(|w| vec![w[1].return_from(&w[0])]).collect();
        let labels = bars
            .windows(2)
            .map(|w| Direction::from_return(w[1].return_from(&w[0]), 0.0))
            .collect();
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
        let n = bars.len();
        if n < 2 {
            return Err(ForecastError::InsufficientData { needed: 2, got: n });
        }
        let probs = if bars[n - 1].close > bars[n - 2].close {
            ClassProbabilities::new(0.7, 0.2, 0.1)
        } else {
            ClassProbabilities::new(0.1, 0.2, 0.7)
        };
        Ok(ForecastOutput::from_probabilities(probs))
    }
}

/// Bullish, except on every fourth history length where it turns bearish.
struct Wobbly;

impl Forecaster for Wobbly {
    fn name(&self) -> &str {
        "wobbly"
    }

    fn prepare_training_data(&self, bars: &[Bar], horizon: usize) -> Result<(FeatureMatrix, Vec<Direction>), ForecastError> {
        Momentum.prepare_training_data(bars, horizon)
    }

    fn train(&mut self, _features: &FeatureMatrix, _labels: &[Direction], _min_samples: usize) -> Result<(), ForecastError> {
        Ok(())
    }

    fn predict(&self, bars: &[Bar], _horizon: usize) -> Result<ForecastOutput, ForecastError> {
        let probs = if bars.len() % 4 == 0 {
            ClassProbabilities::new(0.1, 0.3, 0.6)
        } else {
            ClassProbabilities::new(0.6, 0.3, 0.1)
        };
        Ok(ForecastOutput::from_probabilities(probs))
    }
}

fn monitor_config() -> PerformanceMonitorConfig {
    PerformanceMonitorConfig {
        accuracy_window: 20,
        calibration_window: 40,
        min_samples_for_alert: 10,
        ..Default::default()
    }
}

#[test]
fn test_runner_monitor_and_validator() {
    let bars = trending_bars(90);
    let config = WalkForwardConfig {
        initial_train_size: 40,
        refit_frequency: 10,
        weight_update_frequency: 5,
        min_train_samples: 10,
        ..Default::default()
    };
    let mut runner =
        WalkForwardRunner::new(config, WeightOptimizer::default(), vec![Box::new(Momentum), Box::new(Wobbly)]).unwrap();
    let mut monitor = PerformanceMonitor::new(monitor_config());

    let result = runner.run("SPY", &bars, Some(&mut monitor)).unwrap();
    assert_eq!(result.n_windows(), 50);
    assert_eq!(result.n_completed(), 50);
    assert!(result.steps.skipped.is_empty());
    assert!(result.metrics.accuracy > 0.7);
    assert!((result.final_weights.values().sum::<f64>() - 1.0).abs() < 1e-6);

    let rolling = monitor.get_rolling_accuracy();
    assert_eq!(rolling.n, 20);
    assert_eq!(rolling.per_model["momentum"], 1.0);
    assert!(rolling.per_model["wobbly"] < 1.0);
    let health = ModelHealthChecker::default().check_all(&monitor);
    assert_eq!(health.len(), 2);

    // Re-weight from the runner's own records under the regime of the recent tape.
    let mut predictions: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    let mut actuals = Vec::new();
    for record in result.records() {
        for (model, label) in &record.model_predictions {
            predictions.entry(model.clone()).or_default().push(label.sign());
        }
        actuals.push(record.actual.sign());
    }
    let mut adaptive = AdaptiveWeightOptimizer::new(WeightOptimizerConfig::default(), RegimeClassifierConfig::default());
    let adapted = adaptive.optimize(&predictions, &actuals, &close_returns(&bars));
    assert_eq!(adapted.regime, ReturnRegime::Trending);
    assert!((adapted.outcome.weights.values().sum::<f64>() - 1.0).abs() < 1e-6);

    // Live regime flips: the ensemble keeps calling bullish while the market falls.
    let weights: BTreeMap<String, f64> = runner.weights().clone();
    let last = bars[bars.len() - 1].timestamp;
    for k in 0..20 {
        let models = [("momentum".to_string(), Direction::Bullish), ("wobbly".to_string(), Direction::Bullish)]
            .into_iter()
            .collect();
        monitor.record(PredictionRecord::new(
            last + Duration::days(k + 1),
            "SPY",
            Direction::Bullish,
            0.7,
            models,
            weights.clone(),
            Direction::Bearish,
        ));
    }
    assert!(monitor.alerts().iter().any(|a| a.alert_type == AlertType::LowAccuracy));

    let store = InMemoryStore::new();
    let written = monitor.flush_alerts(&store).unwrap();
    assert_eq!(written, monitor.alerts().len());
    assert_eq!(store.alerts().unwrap().len(), written);

    let live = monitor.get_rolling_accuracy().accuracy;
    assert!(live < 0.1);
    let scores = ValidationScores::new(result.metrics.accuracy, result.metrics.accuracy, live, last)
        .with_timeframes([("1h", 0.4), ("4h", 0.3), ("1d", 0.5)]);
    let unified = UnifiedValidator::default().validate("SPY", Direction::Bullish, &scores);

    assert!(unified.drift_detected);
    assert!(unified.retraining_trigger);
    assert!(!unified.timeframe_conflict);
    assert!((0.0..=1.0).contains(&unified.unified_confidence));
    assert_ne!(unified.status, ValidationStatus::Green);
}

#[test]
fn test_walkforward_backtest_with_trained_forecaster() {
    let bars = trending_bars(300);
    let trainer = |in_sample: &[Bar]| -> EngineResult<Box<dyn SignalGenerator>> {
        let mut model = Momentum;
        let (features, labels) = model.prepare_training_data(in_sample, 1)?;
        model.train(&features, &labels, 20)?;
        Ok(Box::new(ForecasterSignals::new(model, 1, 0.5)))
    };

    let wf = WalkForwardBacktest::new(WalkForwardBacktestConfig::default(), BacktestConfig::default()).unwrap();
    let result = wf.run("SPY", &bars, &trainer).unwrap();

    assert_eq!(result.folds.completed.len(), 5);
    assert!(result.folds.skipped.is_empty());
    for fold in &result.folds.completed {
        assert!(!fold.result.trades.is_empty());
        assert!(fold.result.total_return() > 0.0);
        // The simulation only covers the out-of-sample bars.
        assert_eq!(fold.result.equity_curve.len(), fold.window.out_of_sample_len());
    }
    assert!(result.aggregate.mean_return > 0.0);
    assert_eq!(result.aggregate.n_folds, 5);
}

#[test]
fn test_calibration_service_lifecycle() {
    let now = Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(now));
    let store = Arc::new(InMemoryStore::new());

    let samples = (0..60).map(|i| {
        let x = i as f64;
        let supertrend = (x * 0.7).sin() * 0.02;
        let sr = (x * 1.3).cos() * 0.015;
        let ensemble = (x * 0.4).sin() * 0.01;
        let forecasts: BTreeMap<String, f64> = [("supertrend", supertrend), ("sr", sr), ("ensemble", ensemble)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        EvaluationSample {
            timestamp: now - Duration::hours(60 - i),
            symbol: "SPY".to_string(),
            horizon: "1d".to_string(),
            forecasts,
            realized: 0.6 * supertrend + 0.3 * sr + 0.1 * ensemble,
        }
    });
    store.add_evaluations(samples).unwrap();

    let calibrator = Calibrator::new(CalibratorConfig::default()).unwrap();
    let mut service = CalibrationService::new(
        store.clone(),
        clock.clone(),
        calibrator,
        FreshnessPolicy::default(),
        Duration::minutes(60),
    );

    assert_eq!(service.current("SPY", "1d").freshness, Freshness::Missing);

    let report = service.refresh("SPY", "1d").unwrap();
    assert!(report.recalibrated);
    assert!(report.persisted);
    assert!(!report.result.is_default());
    assert_eq!(report.result.sample_count, 60);
    assert!((report.result.weights.values().sum::<f64>() - 1.0).abs() < 1e-6);
    assert!(report.result.weights["supertrend"] > report.result.weights["ensemble"]);

    let stored = store.latest_calibration("SPY", "1d").unwrap().unwrap();
    assert_eq!(stored.weights, report.result.weights);
    assert_eq!(service.current("SPY", "1d").freshness, Freshness::Fresh);

    let propagated = service.propagate("SPY", "1d", &["1w"]).unwrap();
    assert_eq!(propagated.len(), 1);
    assert_eq!(propagated[0].propagated_from.as_deref(), Some("1d"));
    assert_eq!(propagated[0].weights, report.result.weights);

    clock.advance(Duration::hours(25));
    let current = service.current("SPY", "1d");
    assert_eq!(current.freshness, Freshness::Stale);
    assert!(current.is_stale());
}
