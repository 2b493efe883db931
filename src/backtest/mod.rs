//! Backtesting engine for directional signals.
//!
//! This module provides a bar-by-bar trading simulator:
//! - Signal generators and precomputed signal series
//! - Trade lifecycle (entry, mark-to-market, exit, forced close)
//! - Slippage in basis points and commission as a rate of notional
//! - Walk-forward evaluation over independent folds

pub mod commission;
pub mod engine;
pub mod signal;
pub mod slippage;
pub mod trade;
pub mod walkforward;

pub use commission::{Commission, CommissionModel};
pub use engine::{BacktestConfig, BacktestResult, BacktestSimulator, BacktestSummary, EquityPoint};
pub use signal::{generate_signals, ForecasterSignals, SignalGenerator, SignalSeries};
pub use slippage::SlippageModel;
pub use trade::{ExitReason, Position, Signal, Trade, TradeDirection};
pub use walkforward::{
    FoldAggregate, FoldResult, FoldWindow, SignalTrainer, WalkForwardBacktest, WalkForwardBacktestConfig,
    WalkForwardBacktestResult,
};
