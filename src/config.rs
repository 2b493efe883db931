//! Engine configuration loaded from TOML.
//!
//! Every section is optional; missing keys fall back to component defaults.

use std::fs;
use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backtest::{BacktestConfig, WalkForwardBacktestConfig};
use crate::calibration::{CalibratorConfig, FreshnessPolicy};
use crate::error::{EngineError, EngineResult};
use crate::monitor::{ModelHealthConfig, PerformanceMonitorConfig};
use crate::regime::RegimeClassifierConfig;
use crate::validation::UnifiedValidatorConfig;
use crate::walkforward::WalkForwardConfig;
use crate::weights::WeightOptimizerConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub weights: WeightOptimizerConfig,
    pub regime: RegimeClassifierConfig,
    pub walkforward: WalkForwardConfig,
    pub monitor: PerformanceMonitorConfig,
    pub health: ModelHealthConfig,
    pub validator: UnifiedValidatorConfig,
    pub calibrator: CalibratorConfig,
    pub freshness: FreshnessPolicy,
    /// How long a loaded calibration is served from memory.
    pub calibration_cache_minutes: i64,
    pub backtest: BacktestConfig,
    pub walkforward_backtest: WalkForwardBacktestConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            weights: WeightOptimizerConfig::default(),
            regime: RegimeClassifierConfig::default(),
            walkforward: WalkForwardConfig::default(),
            monitor: PerformanceMonitorConfig::default(),
            health: ModelHealthConfig::default(),
            validator: UnifiedValidatorConfig::default(),
            calibrator: CalibratorConfig::default(),
            freshness: FreshnessPolicy::default(),
            calibration_cache_minutes: 60,
            backtest: BacktestConfig::default(),
            walkforward_backtest: WalkForwardBacktestConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> EngineResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn calibration_cache_ttl(&self) -> Duration {
        Duration::minutes(self.calibration_cache_minutes)
    }

    /// Reject misconfiguration in any section.
    pub fn validate(&self) -> EngineResult<()> {
        self.weights.validate()?;
        self.regime.validate()?;
        self.walkforward.validate()?;
        self.monitor.validate()?;
        self.health.validate()?;
        self.validator.validate()?;
        self.calibrator.validate()?;
        self.freshness.validate()?;
        if self.calibration_cache_minutes <= 0 {
            return Err(EngineError::config("calibration_cache_minutes must be > 0"));
        }
        self.backtest.validate()?;
        self.walkforward_backtest.validate()
    }
}
