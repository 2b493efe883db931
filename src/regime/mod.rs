//! Market regime classification module.
//!
//! Categorizes a recent return window for adaptive ensemble weighting:
//! - High volatility: dispersion above threshold
//! - Trending: drift above threshold
//! - Normal: neither

pub mod classifier;

pub use classifier::{RegimeClassifier, RegimeClassifierConfig, RegimeStats, ReturnRegime, HISTORY_LIMIT};
