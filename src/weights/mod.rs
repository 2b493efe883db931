//! Ensemble weight optimization module.
//!
//! Learns how much each constituent model contributes to the ensemble vote:
//! - Ridge stacking, Sharpe-style and directional scoring
//! - Constrained least squares on the bounded simplex
//! - Regime-adaptive method selection

pub mod adaptive;
pub mod optimizer;
pub mod ridge;

pub use adaptive::{AdaptiveOutcome, AdaptiveWeightOptimizer};
pub use optimizer::{
    equal_weights, project_to_bounds, WeightMethod, WeightOptimizer, WeightOptimizerConfig, WeightOutcome,
};
pub use ridge::ridge_coefficients;
