//! Calibration freshness and recalibration policy.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

use super::calibrator::CalibrationResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Fresh,
    /// Older than the policy allows but still usable.
    Stale,
    Missing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FreshnessPolicy {
    pub max_age_hours: i64,
    /// New samples since the last calibration needed to recalibrate a stale one.
    pub min_new_samples: usize,
    /// Total samples needed for the first calibration.
    pub min_total_samples: usize,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            max_age_hours: 24,
            min_new_samples: 20,
            min_total_samples: 50,
        }
    }
}

impl FreshnessPolicy {
    pub fn validate(&self) -> EngineResult<()> {
        if self.max_age_hours <= 0 {
            return Err(EngineError::config("freshness.max_age_hours must be > 0"));
        }
        Ok(())
    }

    pub fn max_age(&self) -> Duration {
        Duration::hours(self.max_age_hours)
    }

    pub fn freshness(&self, current: Option<&CalibrationResult>, now: DateTime<Utc>) -> Freshness {
        match current {
            None => Freshness::Missing,
            Some(c) if c.is_default() => Freshness::Missing,
            Some(c) if now - c.calibrated_at < self.max_age() => Freshness::Fresh,
            Some(_) => Freshness::Stale,
        }
    }

    /// Whether to recalibrate now.
    pub fn needs_recalibration(
        &self,
        current: Option<&CalibrationResult>,
        total_samples: usize,
        new_samples: usize,
        now: DateTime<Utc>,
    ) -> bool {
        match self.freshness(current, now) {
            Freshness::Fresh => false,
            Freshness::Stale => new_samples >= self.min_new_samples,
            Freshness::Missing => total_samples >= self.min_total_samples,
        }
    }
}
