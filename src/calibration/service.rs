//! Calibration service: store, cache, calibrator and freshness policy.

use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::TtlCache;
use crate::clock::Clock;
use crate::error::{EngineError, EngineResult};
use crate::report::BatchReport;
use crate::store::{RecordQuery, ValidationStore};

use super::calibrator::{CalibrationResult, Calibrator};
use super::freshness::{Freshness, FreshnessPolicy};

/// Calibration in force for a `(symbol, horizon)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentCalibration {
    pub result: CalibrationResult,
    pub freshness: Freshness,
}

impl CurrentCalibration {
    pub fn is_stale(&self) -> bool {
        self.freshness == Freshness::Stale
    }
}

/// What a refresh did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshReport {
    pub symbol: String,
    pub horizon: String,
    pub recalibrated: bool,
    /// False when the store rejected the write; the result is still cached.
    pub persisted: bool,
    pub result: CalibrationResult,
}

/// Parse `15m`, `4h`, `1d`, `2w` style horizons into minutes.
pub fn horizon_minutes(horizon: &str) -> Option<i64> {
    let h = horizon.trim().to_lowercase();
    let split = h.find(|c: char| !c.is_ascii_digit())?;
    let (num, unit) = h.split_at(split);
    let n: i64 = num.parse().ok()?;
    let per = match unit {
        "m" | "min" => 1,
        "h" => 60,
        "d" => 60 * 24,
        "w" => 60 * 24 * 7,
        _ => return None,
    };
    (n > 0).then_some(n * per)
}

pub struct CalibrationService {
    store: Arc<dyn ValidationStore>,
    clock: Arc<dyn Clock>,
    calibrator: Calibrator,
    policy: FreshnessPolicy,
    cache: TtlCache<(String, String), CalibrationResult>,
}

impl CalibrationService {
    pub fn new(
        store: Arc<dyn ValidationStore>,
        clock: Arc<dyn Clock>,
        calibrator: Calibrator,
        policy: FreshnessPolicy,
        cache_ttl: Duration,
    ) -> Self {
        let cache = TtlCache::new(cache_ttl, clock.clone());
        Self {
            store,
            clock,
            calibrator,
            policy,
            cache,
        }
    }

    pub fn policy(&self) -> &FreshnessPolicy {
        &self.policy
    }

    /// Newest calibration from cache, then store. Store errors are logged.
    fn latest(&mut self, symbol: &str, horizon: &str) -> Option<CalibrationResult> {
        let key = (symbol.to_string(), horizon.to_string());
        if let Some(hit) = self.cache.get(&key) {
            return Some(hit.clone());
        }
        match self.store.latest_calibration(symbol, horizon) {
            Ok(Some(result)) => {
                self.cache.put(key, result.clone());
                Some(result)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("{}/{}: could not read calibration: {}", symbol, horizon, e);
                None
            }
        }
    }

    /// Current calibration, or the seed weights flagged missing.
    pub fn current(&mut self, symbol: &str, horizon: &str) -> CurrentCalibration {
        let now = self.clock.now();
        match self.latest(symbol, horizon) {
            Some(result) => CurrentCalibration {
                freshness: self.policy.freshness(Some(&result), now),
                result,
            },
            None => CurrentCalibration {
                result: self.calibrator.default_result(symbol, horizon, now),
                freshness: Freshness::Missing,
            },
        }
    }

    /// Recalibrate when the freshness policy asks for it.
    pub fn refresh(&mut self, symbol: &str, horizon: &str) -> EngineResult<RefreshReport> {
        if symbol.trim().is_empty() || horizon.trim().is_empty() {
            return Err(EngineError::InvalidInput("symbol and horizon must be non-empty".to_string()));
        }
        let now = self.clock.now();
        let current = self.latest(symbol, horizon);

        let mut query = RecordQuery::symbol(symbol).horizon(horizon);
        query.to = Some(now);
        let samples = self.store.load_evaluations(&query)?;

        let new_samples = match &current {
            Some(c) => samples.iter().filter(|s| s.timestamp > c.calibrated_at).count(),
            None => samples.len(),
        };

        if !self
            .policy
            .needs_recalibration(current.as_ref(), samples.len(), new_samples, now)
        {
            debug!(
                "{}/{}: keeping calibration ({} samples, {} new)",
                symbol,
                horizon,
                samples.len(),
                new_samples
            );
            return Ok(RefreshReport {
                symbol: symbol.to_string(),
                horizon: horizon.to_string(),
                recalibrated: false,
                persisted: current.is_some(),
                result: current.unwrap_or_else(|| self.calibrator.default_result(symbol, horizon, now)),
            });
        }

        let result = self.calibrator.calibrate(symbol, horizon, &samples, now);
        let persisted = self.persist(&result);
        Ok(RefreshReport {
            symbol: symbol.to_string(),
            horizon: horizon.to_string(),
            recalibrated: true,
            persisted,
            result,
        })
    }

    /// Refresh many symbols; per-symbol failures are skipped.
    pub fn refresh_all(&mut self, symbols: &[String], horizon: &str) -> EngineResult<BatchReport<RefreshReport>> {
        if symbols.is_empty() {
            return Err(EngineError::config("zero symbols requested for calibration"));
        }
        let mut report = BatchReport::new();
        for symbol in symbols {
            match self.refresh(symbol, horizon) {
                Ok(r) => report.complete(r),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => report.skip(format!("{}/{}", symbol, horizon), &e),
            }
        }
        info!("Calibration refresh {}: {}", horizon, report.summary());
        Ok(report)
    }

    /// Copy the calibration of `from` to longer horizons.
    ///
    /// A target with its own fresh calibration is left alone.
    pub fn propagate(&mut self, symbol: &str, from: &str, to: &[&str]) -> EngineResult<Vec<CalibrationResult>> {
        let from_minutes = horizon_minutes(from)
            .ok_or_else(|| EngineError::InvalidInput(format!("unrecognised horizon {}", from)))?;
        for target in to {
            match horizon_minutes(target) {
                Some(m) if m > from_minutes => {}
                Some(_) => {
                    return Err(EngineError::InvalidInput(format!(
                        "{} is not longer than {}",
                        target, from
                    )))
                }
                None => return Err(EngineError::InvalidInput(format!("unrecognised horizon {}", target))),
            }
        }

        let source = self
            .latest(symbol, from)
            .filter(|r| !r.is_default())
            .ok_or_else(|| EngineError::insufficient(format!("{}/{}: nothing to propagate", symbol, from)))?;

        let now = self.clock.now();
        let mut propagated = Vec::new();
        for target in to {
            if let Some(existing) = self.latest(symbol, target) {
                let own = existing.propagated_from.is_none();
                if own && self.policy.freshness(Some(&existing), now) == Freshness::Fresh {
                    debug!("{}/{}: has its own fresh calibration, not propagating", symbol, target);
                    continue;
                }
            }
            let result = CalibrationResult {
                horizon: target.to_string(),
                calibrated_at: now,
                propagated_from: Some(from.to_string()),
                ..source.clone()
            };
            self.persist(&result);
            propagated.push(result);
        }
        info!("{}: propagated {} weights to {} horizons", symbol, from, propagated.len());
        Ok(propagated)
    }

    /// Write through to the store and cache. Store failure keeps the cached result.
    fn persist(&mut self, result: &CalibrationResult) -> bool {
        let persisted = match self.store.upsert_calibration(result) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "{}/{}: {}; keeping in-memory calibration",
                    result.symbol,
                    result.horizon,
                    EngineError::from(e)
                );
                false
            }
        };
        self.cache
            .put((result.symbol.clone(), result.horizon.clone()), result.clone());
        persisted
    }
}
