//! In-process store backed by `RwLock`ed collections.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::calibration::{CalibrationResult, EvaluationSample};
use crate::data::PredictionRecord;
use crate::monitor::AlertRecord;

use super::{RecordQuery, StoreError, StoreResult, ValidationStore};

#[derive(Default)]
pub struct InMemoryStore {
    evaluations: RwLock<Vec<EvaluationSample>>,
    predictions: RwLock<Vec<PredictionRecord>>,
    calibrations: RwLock<HashMap<(String, String), CalibrationResult>>,
    alerts: RwLock<Vec<AlertRecord>>,
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_evaluations(&self, samples: impl IntoIterator<Item = EvaluationSample>) -> StoreResult<()> {
        let mut evaluations = self.evaluations.write().map_err(poisoned)?;
        evaluations.extend(samples);
        evaluations.sort_by_key(|s| s.timestamp);
        Ok(())
    }

    pub fn add_predictions(&self, records: impl IntoIterator<Item = PredictionRecord>) -> StoreResult<()> {
        let mut predictions = self.predictions.write().map_err(poisoned)?;
        predictions.extend(records);
        predictions.sort_by_key(|r| r.timestamp);
        Ok(())
    }

    pub fn alerts(&self) -> StoreResult<Vec<AlertRecord>> {
        Ok(self.alerts.read().map_err(poisoned)?.clone())
    }
}

impl ValidationStore for InMemoryStore {
    fn load_evaluations(&self, query: &RecordQuery) -> StoreResult<Vec<EvaluationSample>> {
        let evaluations = self.evaluations.read().map_err(poisoned)?;
        Ok(evaluations
            .iter()
            .filter(|s| s.symbol == query.symbol)
            .filter(|s| query.horizon.as_ref().map_or(true, |h| &s.horizon == h))
            .filter(|s| query.contains_time(s.timestamp))
            .cloned()
            .collect())
    }

    fn load_predictions(&self, query: &RecordQuery) -> StoreResult<Vec<PredictionRecord>> {
        let predictions = self.predictions.read().map_err(poisoned)?;
        Ok(predictions
            .iter()
            .filter(|r| r.symbol == query.symbol && query.contains_time(r.timestamp))
            .cloned()
            .collect())
    }

    fn upsert_calibration(&self, result: &CalibrationResult) -> StoreResult<()> {
        let mut calibrations = self.calibrations.write().map_err(poisoned)?;
        let key = (result.symbol.clone(), result.horizon.clone());
        if let Some(existing) = calibrations.get(&key) {
            if existing.calibrated_at > result.calibrated_at {
                return Err(StoreError::StaleWrite {
                    symbol: key.0,
                    horizon: key.1,
                });
            }
        }
        calibrations.insert(key, result.clone());
        Ok(())
    }

    fn latest_calibration(&self, symbol: &str, horizon: &str) -> StoreResult<Option<CalibrationResult>> {
        let calibrations = self.calibrations.read().map_err(poisoned)?;
        Ok(calibrations
            .get(&(symbol.to_string(), horizon.to_string()))
            .cloned())
    }

    fn append_alerts(&self, alerts: &[AlertRecord]) -> StoreResult<()> {
        self.alerts.write().map_err(poisoned)?.extend_from_slice(alerts);
        Ok(())
    }
}
