//! Validation module.
//!
//! - Bar data integrity checks
//! - Accuracy drift between backtest and live
//! - Multi-timeframe directional consensus
//! - Unified, drift- and consensus-aware confidence

pub mod consensus;
pub mod data_integrity;
pub mod drift;
pub mod unified;

pub use consensus::{assess_consensus, canonical_timeframe, ConsensusConfig, ConsensusResult};
pub use data_integrity::{BarIntegrityValidator, CheckResult, DataIntegrityReport};
pub use drift::{assess_drift, DriftAssessment, DriftSeverity, DriftThresholds};
pub use unified::{UnifiedPrediction, UnifiedValidator, UnifiedValidatorConfig, ValidationStatus};
