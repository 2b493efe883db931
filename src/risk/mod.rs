//! Risk management module.
//!
//! Provides position sizing as a capped fraction of current capital.

pub mod position_sizer;

pub use position_sizer::{PositionSizer, PositionSizerConfig, SizingResult};
