//! Error taxonomy for the validation engine.
//!
//! Per-unit failures (one step, one fold, one symbol) are caught by the batch
//! drivers and recorded in a [`crate::report::BatchReport`]; only
//! misconfiguration and malformed input propagate to the caller.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::forecast::ForecastError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Numerical failure: {0}")]
    NumericalFailure(String),

    #[error("Model failure ({model}): {reason}")]
    ModelFailure { model: String, reason: String },

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Coarse classification used when aggregating skipped units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InsufficientData,
    NumericalFailure,
    ModelFailure,
    PersistenceFailure,
    InvalidConfig,
    InvalidInput,
    Io,
}

impl EngineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InsufficientData(_) => FailureKind::InsufficientData,
            Self::NumericalFailure(_) => FailureKind::NumericalFailure,
            Self::ModelFailure { .. } => FailureKind::ModelFailure,
            Self::PersistenceFailure(_) => FailureKind::PersistenceFailure,
            Self::InvalidConfig(_) => FailureKind::InvalidConfig,
            Self::InvalidInput(_) => FailureKind::InvalidInput,
            Self::Io(_) | Self::Json(_) | Self::Toml(_) | Self::TomlSer(_) => FailureKind::Io,
        }
    }

    /// Whether the error must abort a batch instead of skipping one unit.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidConfig(_) | Self::InvalidInput(_))
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn insufficient(msg: impl Into<String>) -> Self {
        Self::InsufficientData(msg.into())
    }

    pub fn numerical(msg: impl Into<String>) -> Self {
        Self::NumericalFailure(msg.into())
    }
}

impl From<ForecastError> for EngineError {
    fn from(err: ForecastError) -> Self {
        match err {
            ForecastError::InsufficientData { needed, got } => Self::InsufficientData(format!(
                "forecaster needs {} samples, got {}",
                needed, got
            )),
            other => Self::ModelFailure {
                model: other.model_name().unwrap_or("unknown").to_string(),
                reason: other.to_string(),
            },
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        Self::PersistenceFailure(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(EngineError::config("zero symbols").is_fatal());
        assert!(EngineError::InvalidInput("unsorted".into()).is_fatal());
        assert!(!EngineError::insufficient("3 < 10").is_fatal());
        assert!(!EngineError::numerical("singular").is_fatal());
    }

    #[test]
    fn test_forecast_error_conversion() {
        let err: EngineError = ForecastError::InsufficientData { needed: 50, got: 10 }.into();
        assert_eq!(err.kind(), FailureKind::InsufficientData);

        let err: EngineError = ForecastError::Model {
            model: "rf".to_string(),
            reason: "diverged".to_string(),
        }
        .into();
        assert_eq!(err.kind(), FailureKind::ModelFailure);
        assert!(err.to_string().contains("rf"));
    }
}
