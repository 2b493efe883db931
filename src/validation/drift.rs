//! Drift between historical and live accuracy.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftSeverity {
    None,
    Minor,
    Moderate,
    Severe,
    Critical,
}

impl DriftSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Minor => "minor",
            Self::Moderate => "moderate",
            Self::Severe => "severe",
            Self::Critical => "critical",
        }
    }

    /// 0 for none up to 4 for critical.
    pub fn rank(&self) -> u8 {
        *self as u8
    }

    /// Moderate and worse count as detected drift.
    pub fn is_drift(&self) -> bool {
        *self >= Self::Moderate
    }
}

impl fmt::Display for DriftSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower bounds of each severity band on relative drift magnitude.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftThresholds {
    pub minor: f64,
    pub moderate: f64,
    pub severe: f64,
    pub critical: f64,
}

impl Default for DriftThresholds {
    fn default() -> Self {
        Self {
            minor: 0.10,
            moderate: 0.25,
            severe: 0.50,
            critical: 0.75,
        }
    }
}

impl DriftThresholds {
    pub fn validate(&self) -> EngineResult<()> {
        let ordered = 0.0 <= self.minor
            && self.minor <= self.moderate
            && self.moderate <= self.severe
            && self.severe <= self.critical;
        if !ordered {
            return Err(EngineError::config(
                "drift thresholds must satisfy 0 <= minor <= moderate <= severe <= critical",
            ));
        }
        Ok(())
    }

    pub fn classify(&self, magnitude: f64) -> DriftSeverity {
        if magnitude >= self.critical {
            DriftSeverity::Critical
        } else if magnitude >= self.severe {
            DriftSeverity::Severe
        } else if magnitude >= self.moderate {
            DriftSeverity::Moderate
        } else if magnitude >= self.minor {
            DriftSeverity::Minor
        } else {
            DriftSeverity::None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftAssessment {
    pub detected: bool,
    pub magnitude: f64,
    pub severity: DriftSeverity,
    pub message: String,
}

/// Relative divergence of live accuracy from backtested accuracy.
///
/// Without a positive backtesting score there is no baseline; drift is then
/// reported as not detected.
pub fn assess_drift(backtesting: f64, live: f64, thresholds: &DriftThresholds) -> DriftAssessment {
    if backtesting <= 0.0 || !backtesting.is_finite() {
        return DriftAssessment {
            detected: false,
            magnitude: 0.0,
            severity: DriftSeverity::None,
            message: "no historical data for drift detection".to_string(),
        };
    }

    let magnitude = (backtesting - live).abs() / backtesting;
    let severity = thresholds.classify(magnitude);
    let direction = if live < backtesting { "below" } else { "above" };
    DriftAssessment {
        detected: severity.is_drift(),
        magnitude,
        severity,
        message: format!(
            "live {:.3} {} backtest {:.3} ({:.1}% relative, {})",
            live,
            direction,
            backtesting,
            magnitude * 100.0,
            severity
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_bands() {
        let t = DriftThresholds::default();
        assert_eq!(t.classify(0.0), DriftSeverity::None);
        assert_eq!(t.classify(0.10), DriftSeverity::Minor);
        assert_eq!(t.classify(0.25), DriftSeverity::Moderate);
        assert_eq!(t.classify(0.5), DriftSeverity::Severe);
        assert_eq!(t.classify(0.75), DriftSeverity::Critical);
        assert_eq!(t.classify(3.0), DriftSeverity::Critical);
    }

    #[test]
    fn test_assess_drift() {
        let t = DriftThresholds::default();
        let a = assess_drift(0.80, 0.40, &t);
        assert_eq!(a.magnitude, 0.5);
        assert_eq!(a.severity, DriftSeverity::Severe);
        assert!(a.detected);

        let minor = assess_drift(0.60, 0.52, &t);
        assert_eq!(minor.severity, DriftSeverity::Minor);
        assert!(!minor.detected);
    }

    #[test]
    fn test_no_baseline() {
        let a = assess_drift(0.0, 0.6, &DriftThresholds::default());
        assert!(!a.detected);
        assert!(a.message.contains("no historical data"));
    }
}
