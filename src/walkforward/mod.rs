//! Walk-forward validation module.
//!
//! Simulates deployment of the model ensemble without look-ahead:
//! - Expanding training window ending strictly before each predicted bar
//! - Periodic refits and ensemble weight refreshes
//! - Weighted vote over class probabilities

pub mod ensemble;
pub mod runner;

pub use ensemble::{weighted_vote, EnsembleMetrics, EnsembleVote, WeightSnapshot};
pub use runner::{RunnerState, StepRecord, WalkForwardConfig, WalkForwardResult, WalkForwardRunner};
