//! Performance metrics module.
//!
//! Provides performance calculations for backtest runs:
//! - Win rate, profit factor
//! - Sharpe ratio, Sortino ratio, Calmar ratio
//! - Maximum drawdown from the running peak
//! - Annualized return and volatility, monthly returns

pub mod calculator;

pub use calculator::{DrawdownAnalysis, MetricsCalculator, MetricsConfig, PerformanceMetrics};
