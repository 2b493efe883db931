pub mod backtest;
pub mod cache;
pub mod calibration;
pub mod clock;
pub mod config;
pub mod data;
pub mod error;
pub mod forecast;
pub mod metrics;
pub mod monitor;
pub mod regime;
pub mod report;
pub mod risk;
pub mod store;
pub mod validation;
pub mod walkforward;
pub mod weights;

// Re-export commonly used types
pub use backtest::{BacktestConfig, BacktestResult, BacktestSimulator, Signal, SignalGenerator, WalkForwardBacktest};
pub use calibration::{CalibrationResult, CalibrationService, Calibrator, FreshnessPolicy};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use data::{Bar, Direction, PredictionRecord, ValidationScores};
pub use error::{EngineError, EngineResult};
pub use forecast::{ForecastOutput, Forecaster};
pub use metrics::{MetricsCalculator, PerformanceMetrics};
pub use monitor::{ModelHealthChecker, PerformanceMonitor};
pub use report::BatchReport;
pub use store::{InMemoryStore, ValidationStore};
pub use validation::{UnifiedPrediction, UnifiedValidator};
pub use walkforward::{WalkForwardResult, WalkForwardRunner};
pub use weights::{AdaptiveWeightOptimizer, WeightOptimizer};
