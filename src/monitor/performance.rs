//! Rolling performance monitor over a stream of prediction records.
//!
//! One instance per run or per live process, passed by `&mut` to whoever
//! produces records. Not internally synchronized.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::{info, warn};

use crate::data::{Direction, PredictionRecord};
use crate::error::{EngineError, EngineResult};
use crate::store::ValidationStore;

use super::alerts::{AlertRecord, AlertSeverity, AlertType};

/// Performance monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceMonitorConfig {
    /// Records used for rolling accuracy and alert rules.
    pub accuracy_window: usize,
    /// Records used for confidence calibration.
    pub calibration_window: usize,
    /// No rule is evaluated before this many records.
    pub min_samples_for_alert: usize,
    /// Rolling accuracy below this raises `low_accuracy`.
    pub accuracy_floor: f64,
    /// Rolling accuracy below this makes `low_accuracy` critical.
    pub critical_accuracy: f64,
    /// Smallest earlier-minus-recent accuracy gap that can raise `accuracy_drop`.
    pub min_accuracy_drop: f64,
    /// One-sided significance level of the half-window comparison.
    pub drop_significance: f64,
    pub calibration_bins: usize,
    /// Expected calibration error below this counts as well calibrated.
    pub calibration_tolerance: f64,
    /// Allowed |empirical - target| interval coverage gap.
    pub coverage_tolerance: f64,
    /// Records that must pass before the same alert type fires again.
    pub alert_cooldown: usize,
    pub weight_history_limit: usize,
}

impl Default for PerformanceMonitorConfig {
    fn default() -> Self {
        Self {
            accuracy_window: 50,
            calibration_window: 200,
            min_samples_for_alert: 20,
            accuracy_floor: 0.45,
            critical_accuracy: 0.35,
            min_accuracy_drop: 0.10,
            drop_significance: 0.05,
            calibration_bins: 10,
            calibration_tolerance: 0.10,
            coverage_tolerance: 0.05,
            alert_cooldown: 10,
            weight_history_limit: 1_000,
        }
    }
}

impl PerformanceMonitorConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.accuracy_window == 0 || self.calibration_window == 0 {
            return Err(EngineError::config("monitor windows must be > 0"));
        }
        if self.calibration_window < self.accuracy_window {
            return Err(EngineError::config(
                "monitor.calibration_window must be >= monitor.accuracy_window",
            ));
        }
        if self.min_samples_for_alert > self.accuracy_window {
            return Err(EngineError::config(
                "monitor.min_samples_for_alert cannot exceed monitor.accuracy_window",
            ));
        }
        if self.calibration_bins == 0 {
            return Err(EngineError::config("monitor.calibration_bins must be > 0"));
        }
        if !(0.0..1.0).contains(&self.drop_significance) {
            return Err(EngineError::config("monitor.drop_significance must be in [0, 1)"));
        }
        Ok(())
    }
}

/// Accuracy over the most recent `accuracy_window` records.
///
/// `accuracy` is NaN when `n == 0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingAccuracy {
    pub n: usize,
    pub accuracy: f64,
    pub per_class: BTreeMap<Direction, f64>,
    pub per_model: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationBucket {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
    pub mean_confidence: f64,
    pub accuracy: f64,
}

/// Confidence calibration over the calibration window.
///
/// `ece` is NaN when `n == 0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub n: usize,
    pub ece: f64,
    pub well_calibrated: bool,
    pub buckets: Vec<CalibrationBucket>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub weights: BTreeMap<String, f64>,
}

/// Serializable view for dashboards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub last_update: Option<DateTime<Utc>>,
    pub total_records: usize,
    pub rolling: RollingAccuracy,
    pub calibration: CalibrationReport,
    pub current_weights: BTreeMap<String, f64>,
    pub total_alerts: usize,
    pub recent_alerts: Vec<AlertRecord>,
}

/// Rolling accuracy, calibration and alerting over prediction records.
pub struct PerformanceMonitor {
    config: PerformanceMonitorConfig,
    /// Most recent `calibration_window` records; the accuracy window is its tail.
    records: VecDeque<PredictionRecord>,
    weight_history: VecDeque<WeightHistoryEntry>,
    alerts: Vec<AlertRecord>,
    /// Prefix of `alerts` already written to a store.
    flushed_alerts: usize,
    total_records: usize,
    /// `total_records` at the last firing of each alert type.
    last_fired: HashMap<AlertType, usize>,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(PerformanceMonitorConfig::default())
    }
}

impl PerformanceMonitor {
    pub fn new(config: PerformanceMonitorConfig) -> Self {
        Self {
            records: VecDeque::with_capacity(config.calibration_window.max(config.accuracy_window)),
            weight_history: VecDeque::new(),
            alerts: Vec::new(),
            flushed_alerts: 0,
            total_records: 0,
            last_fired: HashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &PerformanceMonitorConfig {
        &self.config
    }

    /// Records observed since construction.
    pub fn len(&self) -> usize {
        self.total_records
    }

    pub fn is_empty(&self) -> bool {
        self.total_records == 0
    }

    /// Ingest one record; returns the alerts it raised.
    pub fn record(&mut self, record: PredictionRecord) -> Vec<AlertRecord> {
        let capacity = self.config.calibration_window.max(self.config.accuracy_window);
        if self.records.len() == capacity {
            self.records.pop_front();
        }

        if self.weight_history.len() == self.config.weight_history_limit {
            self.weight_history.pop_front();
        }
        if self.config.weight_history_limit > 0 {
            self.weight_history.push_back(WeightHistoryEntry {
                timestamp: record.timestamp,
                weights: record.model_weights.clone(),
            });
        }

        let timestamp = record.timestamp;
        self.records.push_back(record);
        self.total_records += 1;

        self.evaluate_rules(timestamp)
    }

    /// Feed externally measured prediction-interval coverage.
    pub fn report_coverage(&mut self, empirical: f64, target: f64, at: DateTime<Utc>) -> Option<AlertRecord> {
        if self.total_records < self.config.min_samples_for_alert {
            return None;
        }
        let gap = (empirical - target).abs();
        if !gap.is_finite() || gap <= self.config.coverage_tolerance {
            return None;
        }
        let severity = if gap > 2.0 * self.config.coverage_tolerance {
            AlertSeverity::Critical
        } else {
            AlertSeverity::Warning
        };
        self.raise(AlertRecord {
            timestamp: at,
            alert_type: AlertType::CalibrationDrift,
            severity,
            metric: "coverage_gap".to_string(),
            value: gap,
            threshold: self.config.coverage_tolerance,
            message: format!("empirical coverage {:.3} vs target {:.3}", empirical, target),
        })
    }

    fn accuracy_slice(&self) -> impl Iterator<Item = &PredictionRecord> {
        let skip = self.records.len().saturating_sub(self.config.accuracy_window);
        self.records.iter().skip(skip)
    }

    pub fn get_rolling_accuracy(&self) -> RollingAccuracy {
        let window: Vec<&PredictionRecord> = self.accuracy_slice().collect();
        let n = window.len();
        if n == 0 {
            return RollingAccuracy {
                n: 0,
                accuracy: f64::NAN,
                per_class: BTreeMap::new(),
                per_model: BTreeMap::new(),
            };
        }

        let correct = window.iter().filter(|r| r.is_correct).count();

        let mut per_class = BTreeMap::new();
        for class in Direction::ALL {
            let of_class: Vec<_> = window.iter().filter(|r| r.actual == class).collect();
            if !of_class.is_empty() {
                let hits = of_class.iter().filter(|r| r.is_correct).count();
                per_class.insert(class, hits as f64 / of_class.len() as f64);
            }
        }

        let mut per_model: BTreeMap<String, (usize, usize)> = BTreeMap::new();
        for r in &window {
            for model in r.model_predictions.keys() {
                let entry = per_model.entry(model.clone()).or_insert((0, 0));
                entry.1 += 1;
                if r.model_correct(model) == Some(true) {
                    entry.0 += 1;
                }
            }
        }

        RollingAccuracy {
            n,
            accuracy: correct as f64 / n as f64,
            per_class,
            per_model: per_model
                .into_iter()
                .map(|(m, (hits, total))| (m, hits as f64 / total as f64))
                .collect(),
        }
    }

    /// Expected calibration error over equal-width confidence buckets.
    pub fn get_confidence_calibration(&self) -> CalibrationReport {
        let n = self.records.len();
        let bins = self.config.calibration_bins;
        if n == 0 {
            return CalibrationReport {
                n: 0,
                ece: f64::NAN,
                well_calibrated: false,
                buckets: Vec::new(),
            };
        }

        let mut sums = vec![(0usize, 0.0f64, 0usize); bins];
        for r in &self.records {
            let idx = ((r.confidence * bins as f64) as usize).min(bins - 1);
            sums[idx].0 += 1;
            sums[idx].1 += r.confidence;
            if r.is_correct {
                sums[idx].2 += 1;
            }
        }

        let mut ece = 0.0;
        let mut buckets = Vec::new();
        for (i, (count, conf_sum, hits)) in sums.into_iter().enumerate() {
            if count == 0 {
                continue;
            }
            let mean_confidence = conf_sum / count as f64;
            let accuracy = hits as f64 / count as f64;
            ece += count as f64 / n as f64 * (accuracy - mean_confidence).abs();
            buckets.push(CalibrationBucket {
                lower: i as f64 / bins as f64,
                upper: (i + 1) as f64 / bins as f64,
                count,
                mean_confidence,
                accuracy,
            });
        }

        CalibrationReport {
            n,
            ece,
            well_calibrated: ece < self.config.calibration_tolerance,
            buckets,
        }
    }

    /// Per-record correctness of one model over the accuracy window.
    pub fn model_outcomes(&self, model: &str) -> Vec<bool> {
        self.accuracy_slice().filter_map(|r| r.model_correct(model)).collect()
    }

    /// Weight history of one model, oldest first.
    pub fn weight_series(&self, model: &str) -> Vec<f64> {
        self.weight_history
            .iter()
            .filter_map(|e| e.weights.get(model).copied())
            .collect()
    }

    pub fn current_weights(&self) -> BTreeMap<String, f64> {
        self.weight_history
            .back()
            .map(|e| e.weights.clone())
            .unwrap_or_default()
    }

    /// Every model seen in the retained records.
    pub fn models(&self) -> Vec<String> {
        let mut models: Vec<String> = self
            .records
            .iter()
            .flat_map(|r| r.model_predictions.keys().cloned())
            .collect();
        models.sort();
        models.dedup();
        models
    }

    pub fn alerts(&self) -> &[AlertRecord] {
        &self.alerts
    }

    /// Append alerts raised since the last flush to `store`; returns how many were written.
    ///
    /// On failure nothing is marked as written, so the next flush retries them.
    pub fn flush_alerts(&mut self, store: &dyn ValidationStore) -> EngineResult<usize> {
        let pending = &self.alerts[self.flushed_alerts..];
        if pending.is_empty() {
            return Ok(0);
        }
        store.append_alerts(pending)?;
        let written = pending.len();
        self.flushed_alerts = self.alerts.len();
        info!("Persisted {} alerts", written);
        Ok(written)
    }

    pub fn weight_history(&self) -> &VecDeque<WeightHistoryEntry> {
        &self.weight_history
    }

    pub fn dashboard_snapshot(&self, recent_alerts: usize) -> DashboardSnapshot {
        let skip = self.alerts.len().saturating_sub(recent_alerts);
        DashboardSnapshot {
            last_update: self.records.back().map(|r| r.timestamp),
            total_records: self.total_records,
            rolling: self.get_rolling_accuracy(),
            calibration: self.get_confidence_calibration(),
            current_weights: self.current_weights(),
            total_alerts: self.alerts.len(),
            recent_alerts: self.alerts[skip..].to_vec(),
        }
    }

    fn evaluate_rules(&mut self, timestamp: DateTime<Utc>) -> Vec<AlertRecord> {
        if self.total_records < self.config.min_samples_for_alert {
            return Vec::new();
        }

        let mut raised = Vec::new();
        let rolling = self.get_rolling_accuracy();
        if rolling.n >= self.config.min_samples_for_alert && rolling.accuracy < self.config.accuracy_floor {
            let severity = if rolling.accuracy < self.config.critical_accuracy {
                AlertSeverity::Critical
            } else {
                AlertSeverity::Warning
            };
            raised.extend(self.raise(AlertRecord {
                timestamp,
                alert_type: AlertType::LowAccuracy,
                severity,
                metric: "rolling_accuracy".to_string(),
                value: rolling.accuracy,
                threshold: self.config.accuracy_floor,
                message: format!("{} of last {} correct", (rolling.accuracy * rolling.n as f64).round(), rolling.n),
            }));
        }

        if let Some(alert) = self.accuracy_drop(timestamp) {
            raised.extend(self.raise(alert));
        }
        raised
    }

    /// Compare the earlier and recent halves of the accuracy window.
    fn accuracy_drop(&self, timestamp: DateTime<Utc>) -> Option<AlertRecord> {
        let window: Vec<bool> = self.accuracy_slice().map(|r| r.is_correct).collect();
        let half = window.len() / 2;
        if half == 0 || window.len() < self.config.min_samples_for_alert {
            return None;
        }
        let earlier = &window[window.len() - 2 * half..window.len() - half];
        let recent = &window[window.len() - half..];

        let p_earlier = earlier.iter().filter(|c| **c).count() as f64 / half as f64;
        let p_recent = recent.iter().filter(|c| **c).count() as f64 / half as f64;
        let drop = p_earlier - p_recent;
        if drop < self.config.min_accuracy_drop {
            return None;
        }

        let p_value = one_sided_two_proportion_p(p_earlier, p_recent, half)?;
        if p_value >= self.config.drop_significance {
            return None;
        }

        let severity = if drop >= 2.0 * self.config.min_accuracy_drop {
            AlertSeverity::Critical
        } else {
            AlertSeverity::Warning
        };
        Some(AlertRecord {
            timestamp,
            alert_type: AlertType::AccuracyDrop,
            severity,
            metric: "half_window_accuracy_drop".to_string(),
            value: drop,
            threshold: self.config.min_accuracy_drop,
            message: format!(
                "accuracy {:.3} -> {:.3} over {} records each (p = {:.4})",
                p_earlier, p_recent, half, p_value
            ),
        })
    }

    /// Append unless the same alert type fired within the cooldown.
    fn raise(&mut self, alert: AlertRecord) -> Option<AlertRecord> {
        if let Some(last) = self.last_fired.get(&alert.alert_type) {
            if self.total_records - last < self.config.alert_cooldown {
                return None;
            }
        }
        self.last_fired.insert(alert.alert_type, self.total_records);
        match alert.severity {
            AlertSeverity::Critical => warn!("{}", alert),
            AlertSeverity::Warning => info!("{}", alert),
        }
        self.alerts.push(alert.clone());
        Some(alert)
    }
}

/// P(Z >= z) for the pooled two-proportion statistic `(p1 - p2) / se`.
fn one_sided_two_proportion_p(p1: f64, p2: f64, n_each: usize) -> Option<f64> {
    let n = n_each as f64;
    let pooled = (p1 + p2) / 2.0;
    let se = (pooled * (1.0 - pooled) * (2.0 / n)).sqrt();
    if se <= 0.0 || !se.is_finite() {
        return None;
    }
    let z = (p1 - p2) / se;
    let normal = Normal::new(0.0, 1.0).ok()?;
    Some(1.0 - normal.cdf(z))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{CalibrationResult, EvaluationSample};
    use crate::error::FailureKind;
    use crate::store::{InMemoryStore, RecordQuery, StoreError, StoreResult};
    use chrono::{Duration, TimeZone};

    fn record(i: usize, correct: bool, confidence: f64) -> PredictionRecord {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(i as i64);
        let actual = Direction::Bullish;
        let predicted = if correct { Direction::Bullish } else { Direction::Bearish };
        let mut preds = BTreeMap::new();
        preds.insert("rf".to_string(), predicted);
        preds.insert("gb".to_string(), Direction::Bullish);
        let mut weights = BTreeMap::new();
        weights.insert("rf".to_string(), 0.5 + i as f64 * 0.001);
        weights.insert("gb".to_string(), 0.5 - i as f64 * 0.001);
        PredictionRecord::new(ts, "SPY", predicted, confidence, preds, weights, actual)
    }

    #[test]
    fn test_empty_monitor_sentinels() {
        let monitor = PerformanceMonitor::default();
        let rolling = monitor.get_rolling_accuracy();
        assert_eq!(rolling.n, 0);
        assert!(rolling.accuracy.is_nan());
        assert!(monitor.get_confidence_calibration().ece.is_nan());
        assert!(monitor.is_empty());
    }

    #[test]
    fn test_no_alert_before_min_samples() {
        let mut monitor = PerformanceMonitor::default();
        for i in 0..19 {
            assert!(monitor.record(record(i, false, 0.6)).is_empty());
        }
        assert!(monitor.alerts().is_empty());
        let raised = monitor.record(record(19, false, 0.6));
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].alert_type, AlertType::LowAccuracy);
        assert_eq!(raised[0].severity, AlertSeverity::Critical);
    }

    #[test]
    fn test_low_accuracy_cooldown() {
        let mut monitor = PerformanceMonitor::default();
        for i in 0..40 {
            monitor.record(record(i, false, 0.6));
        }
        // Fires at 20 and 30 and 40 with a cooldown of 10.
        let low = monitor
            .alerts()
            .iter()
            .filter(|a| a.alert_type == AlertType::LowAccuracy)
            .count();
        assert_eq!(low, 3);
    }

    struct UnavailableStore;

    impl ValidationStore for UnavailableStore {
        fn load_evaluations(&self, _: &RecordQuery) -> StoreResult<Vec<EvaluationSample>> {
            Ok(Vec::new())
        }

        fn load_predictions(&self, _: &RecordQuery) -> StoreResult<Vec<PredictionRecord>> {
            Ok(Vec::new())
        }

        fn upsert_calibration(&self, _: &CalibrationResult) -> StoreResult<()> {
            Ok(())
        }

        fn latest_calibration(&self, _: &str, _: &str) -> StoreResult<Option<CalibrationResult>> {
            Ok(None)
        }

        fn append_alerts(&self, _: &[AlertRecord]) -> StoreResult<()> {
            Err(StoreError::Unavailable("offline".to_string()))
        }
    }

    #[test]
    fn test_flush_alerts_writes_each_alert_once() {
        let store = InMemoryStore::new();
        let mut monitor = PerformanceMonitor::default();
        assert_eq!(monitor.flush_alerts(&store).unwrap(), 0);

        for i in 0..20 {
            monitor.record(record(i, false, 0.6));
        }
        let err = monitor.flush_alerts(&UnavailableStore).unwrap_err();
        assert_eq!(err.kind(), FailureKind::PersistenceFailure);

        assert_eq!(monitor.flush_alerts(&store).unwrap(), 1);
        assert_eq!(monitor.flush_alerts(&store).unwrap(), 0);

        for i in 20..30 {
            monitor.record(record(i, false, 0.6));
        }
        assert_eq!(monitor.flush_alerts(&store).unwrap(), 1);
        let stored = store.alerts().unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|a| a.alert_type == AlertType::LowAccuracy));
        assert!(stored[0].timestamp < stored[1].timestamp);
    }

    #[test]
    fn test_accuracy_drop_detects_regime_break() {
        let config = PerformanceMonitorConfig {
            accuracy_floor: 0.0,
            ..Default::default()
        };
        let mut monitor = PerformanceMonitor::new(config);
        for i in 0..25 {
            monitor.record(record(i, true, 0.7));
        }
        for i in 25..50 {
            monitor.record(record(i, i % 2 == 0, 0.7));
        }
        let drops: Vec<&AlertRecord> = monitor
            .alerts()
            .iter()
            .filter(|a| a.alert_type == AlertType::AccuracyDrop)
            .collect();
        assert!(!drops.is_empty());
        assert!(drops.iter().all(|a| a.value >= 0.10));
    }

    #[test]
    fn test_steady_accuracy_raises_nothing() {
        let mut monitor = PerformanceMonitor::default();
        for i in 0..100 {
            monitor.record(record(i, i % 5 != 0, 0.8));
        }
        assert!(monitor.alerts().is_empty());
        let rolling = monitor.get_rolling_accuracy();
        assert_eq!(rolling.n, 50);
        assert!((rolling.accuracy - 0.8).abs() < 1e-12);
        assert_eq!(rolling.per_model["gb"], 1.0);
    }

    #[test]
    fn test_calibration_report() {
        let mut monitor = PerformanceMonitor::default();
        for i in 0..100 {
            monitor.record(record(i, i % 5 != 0, 0.8));
        }
        let report = monitor.get_confidence_calibration();
        assert_eq!(report.n, 100);
        assert_eq!(report.buckets.len(), 1);
        assert!(report.ece < 1e-9);
        assert!(report.well_calibrated);

        let mut overconfident = PerformanceMonitor::default();
        for i in 0..50 {
            overconfident.record(record(i, i % 2 == 0, 0.95));
        }
        let report = overconfident.get_confidence_calibration();
        assert!((report.ece - 0.45).abs() < 1e-9);
        assert!(!report.well_calibrated);
    }

    #[test]
    fn test_coverage_alert() {
        let mut monitor = PerformanceMonitor::default();
        let at = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        assert!(monitor.report_coverage(0.70, 0.90, at).is_none());

        for i in 0..30 {
            monitor.record(record(i, true, 0.9));
        }
        assert!(monitor.report_coverage(0.88, 0.90, at).is_none());
        let alert = monitor.report_coverage(0.70, 0.90, at).unwrap();
        assert_eq!(alert.alert_type, AlertType::CalibrationDrift);
        assert_eq!(alert.severity, AlertSeverity::Critical);
    }

    #[test]
    fn test_weight_history_and_snapshot() {
        let config = PerformanceMonitorConfig {
            weight_history_limit: 5,
            ..Default::default()
        };
        let mut monitor = PerformanceMonitor::new(config);
        for i in 0..8 {
            monitor.record(record(i, true, 0.7));
        }
        assert_eq!(monitor.weight_history().len(), 5);
        assert_eq!(monitor.weight_series("rf").len(), 5);
        assert!((monitor.current_weights()["rf"] - 0.507).abs() < 1e-12);

        let snapshot = monitor.dashboard_snapshot(5);
        assert_eq!(snapshot.total_records, 8);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("current_weights"));
    }

    #[test]
    fn test_config_validation() {
        assert!(PerformanceMonitorConfig::default().validate().is_ok());
        let bad = PerformanceMonitorConfig {
            min_samples_for_alert: 100,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
