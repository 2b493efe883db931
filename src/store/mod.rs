//! Persistence contract consumed by the engine.
//!
//! Backends only need to filter records by symbol, horizon and time range,
//! keep the newest calibration per `(symbol, horizon)` and append alerts.

pub mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calibration::{CalibrationResult, EvaluationSample};
use crate::data::PredictionRecord;
use crate::monitor::AlertRecord;

pub use memory::InMemoryStore;

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Stale write for {symbol}/{horizon}: stored calibration is newer")]
    StaleWrite { symbol: String, horizon: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Filter for record reads. `None` fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordQuery {
    pub symbol: String,
    pub horizon: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl RecordQuery {
    pub fn symbol(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Default::default()
        }
    }

    pub fn horizon(mut self, horizon: impl Into<String>) -> Self {
        self.horizon = Some(horizon.into());
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    /// Inclusive time-range check.
    pub fn contains_time(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |f| at >= f) && self.to.map_or(true, |t| at <= t)
    }
}

/// Storage for evaluation history, calibrations and alerts.
pub trait ValidationStore: Send + Sync {
    /// Evaluation samples matching the query, oldest first.
    fn load_evaluations(&self, query: &RecordQuery) -> StoreResult<Vec<EvaluationSample>>;

    /// Prediction records matching the query (horizon is ignored), oldest first.
    fn load_predictions(&self, query: &RecordQuery) -> StoreResult<Vec<PredictionRecord>>;

    /// Insert or replace the calibration for `(symbol, horizon)`.
    ///
    /// Rejects a write older than the stored one.
    fn upsert_calibration(&self, result: &CalibrationResult) -> StoreResult<()>;

    fn latest_calibration(&self, symbol: &str, horizon: &str) -> StoreResult<Option<CalibrationResult>>;

    fn append_alerts(&self, alerts: &[AlertRecord]) -> StoreResult<()>;
}
