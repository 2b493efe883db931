//! Layer weight calibration module.
//!
//! Learns per-symbol weights for the forecast layers from short-horizon
//! evaluation feedback and propagates them to longer horizons.

pub mod calibrator;
pub mod freshness;
pub mod service;

pub use calibrator::{
    weight_lattice, CalibrationMethod, CalibrationResult, Calibrator, CalibratorConfig, CvFold, EvaluationSample,
};
pub use freshness::{Freshness, FreshnessPolicy};
pub use service::{horizon_minutes, CalibrationService, CurrentCalibration, RefreshReport};
