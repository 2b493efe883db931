//! Performance monitoring module.
//!
//! Rolling observability over prediction records:
//! - Rolling and per-model accuracy, confidence calibration
//! - Alert rules with an append-only log
//! - Per-model health checks

pub mod alerts;
pub mod health;
pub mod performance;

pub use alerts::{AlertRecord, AlertSeverity, AlertType};
pub use health::{HealthStatus, ModelHealth, ModelHealthChecker, ModelHealthConfig, WeightTrend};
pub use performance::{
    CalibrationBucket, CalibrationReport, DashboardSnapshot, PerformanceMonitor, PerformanceMonitorConfig,
    RollingAccuracy, WeightHistoryEntry,
};
