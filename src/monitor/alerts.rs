//! Alert records raised by the performance monitor.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// Rolling accuracy below the floor.
    LowAccuracy,
    /// Recent half-window significantly worse than the earlier half.
    AccuracyDrop,
    /// Reported interval coverage away from its target.
    CalibrationDrift,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LowAccuracy => "low_accuracy",
            Self::AccuracyDrop => "accuracy_drop",
            Self::CalibrationDrift => "calibration_drift",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// One fired alert. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub timestamp: DateTime<Utc>,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
}

impl fmt::Display for AlertRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:?}] {} at {}: {} = {:.3} (threshold {:.3}) {}",
            self.severity,
            self.alert_type.as_str(),
            self.timestamp.format("%Y-%m-%d %H:%M"),
            self.metric,
            self.value,
            self.threshold,
            self.message
        )
    }
}
