//! Core backtesting engine.
//!
//! Runs the simulation loop, one bar at a time:
//! 1. Mark the open position to the bar close
//! 2. Ask the signal generator for a signal using bars up to this one
//! 3. Close on an opposite signal, then open if flat
//! 4. Force-close at the final bar
//! 5. Record equity

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::data::Bar;
use crate::error::{EngineError, EngineResult};
use crate::metrics::{MetricsCalculator, MetricsConfig, PerformanceMetrics};
use crate::risk::{PositionSizer, PositionSizerConfig};
use crate::validation::BarIntegrityValidator;

use super::commission::CommissionModel;
use super::signal::{SignalGenerator, SignalSeries};
use super::slippage::SlippageModel;
use super::trade::{ExitReason, Position, Signal, Trade, TradeDirection};

/// Configuration for backtest execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// Starting capital.
    pub initial_capital: Decimal,

    /// Open short positions on sell signals when flat.
    pub allow_short: bool,

    /// Slippage model.
    pub slippage: SlippageModel,

    /// Commission model.
    pub commission: CommissionModel,

    /// Position sizing limits.
    pub sizing: PositionSizerConfig,

    /// Annualization settings for derived metrics.
    pub metrics: MetricsConfig,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: Decimal::from(100_000),
            allow_short: false,
            slippage: SlippageModel::default(),
            commission: CommissionModel::default(),
            sizing: PositionSizerConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.initial_capital <= Decimal::ZERO {
            return Err(EngineError::config("initial_capital must be > 0"));
        }
        self.slippage.validate()?;
        self.commission.validate()?;
        self.sizing.validate()?;
        self.metrics.validate()
    }
}

/// Equity snapshot after one bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub equity: Decimal,
    pub cash: Decimal,
    pub position_value: Decimal,
    /// Direction held at the end of the bar.
    pub position: Option<TradeDirection>,
    pub bar_pnl: Decimal,
}

/// Result of a completed backtest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub symbol: String,

    /// Configuration used.
    pub config: BacktestConfig,

    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,

    /// All completed trades, in exit order.
    pub trades: Vec<Trade>,

    /// One point per bar.
    pub equity_curve: Vec<EquityPoint>,

    pub initial_capital: Decimal,
    pub final_equity: Decimal,

    pub metrics: PerformanceMetrics,
}

impl BacktestResult {
    pub fn total_return(&self) -> f64 {
        self.metrics.total_return
    }

    pub fn sharpe_ratio(&self) -> f64 {
        self.metrics.sharpe_ratio
    }

    pub fn max_drawdown(&self) -> f64 {
        self.metrics.max_drawdown
    }

    pub fn win_rate(&self) -> f64 {
        self.metrics.win_rate
    }

    /// Generate summary string.
    pub fn summary(&self) -> String {
        format!(
            "Backtest Results: {} ({} to {})\n\
             ----------------------------------------\n\
             Initial Capital: ${:.2}\n\
             Final Equity: ${:.2}\n\
             \n\
             {}",
            self.symbol,
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d"),
            self.initial_capital,
            self.final_equity,
            self.metrics.summary(),
        )
    }
}

/// Serializable view of a run: every scalar metric plus the trade ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestSummary {
    pub symbol: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub initial_capital: Decimal,
    pub final_equity: Decimal,
    pub metrics: PerformanceMetrics,
    pub trades: Vec<Trade>,
}

impl From<&BacktestResult> for BacktestSummary {
    fn from(result: &BacktestResult) -> Self {
        Self {
            symbol: result.symbol.clone(),
            start: result.start,
            end: result.end,
            initial_capital: result.initial_capital,
            final_equity: result.final_equity,
            metrics: result.metrics.clone(),
            trades: result.trades.clone(),
        }
    }
}

/// Mutable state of one run.
struct RunState {
    cash: Decimal,
    position: Option<Position>,
    trades: Vec<Trade>,
    equity_curve: Vec<EquityPoint>,
    next_id: u64,
}

impl RunState {
    fn equity(&self) -> Decimal {
        self.cash + self.position.as_ref().map_or(Decimal::ZERO, |p| p.market_value())
    }
}

/// Executes signals against bar history. Holds no per-run state, so one
/// simulator can serve many runs concurrently.
#[derive(Debug, Clone)]
pub struct BacktestSimulator {
    config: BacktestConfig,
    sizer: PositionSizer,
}

impl BacktestSimulator {
    pub fn new(config: BacktestConfig) -> EngineResult<Self> {
        config.validate()?;
        let sizer = PositionSizer::new(config.sizing.clone());
        Ok(Self { config, sizer })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Run with one precomputed signal per bar.
    pub fn run_signals(&self, symbol: &str, bars: &[Bar], signals: &[Signal]) -> EngineResult<BacktestResult> {
        let series = SignalSeries::new(signals.to_vec());
        series.check_aligned(bars.len())?;
        self.run(symbol, bars, &series)
    }

    /// Run the simulation. The generator sees `bars[..=i]` when trading bar `i`.
    pub fn run(&self, symbol: &str, bars: &[Bar], generator: &dyn SignalGenerator) -> EngineResult<BacktestResult> {
        let (first, last) = match (bars.first(), bars.last()) {
            (Some(f), Some(l)) => (f.timestamp, l.timestamp),
            _ => return Err(EngineError::insufficient("backtest needs at least one bar")),
        };
        BarIntegrityValidator::ensure_sorted(bars)?;

        let mut state = RunState {
            cash: self.config.initial_capital,
            position: None,
            trades: Vec::new(),
            equity_curve: Vec::with_capacity(bars.len()),
            next_id: 1,
        };

        let final_index = bars.len() - 1;
        for (i, bar) in bars.iter().enumerate() {
            let price = close_price(bar, i)?;
            if let Some(position) = state.position.as_mut() {
                position.update_mtm(price);
            }

            if i == final_index {
                self.close_position(&mut state, i, bar.timestamp, price, ExitReason::EndOfPeriod);
            } else {
                match generator.signal_at(&bars[..=i]) {
                    Signal::Buy => {
                        if state.position.as_ref().map_or(false, |p| !p.is_long()) {
                            self.close_position(&mut state, i, bar.timestamp, price, ExitReason::Signal);
                        }
                        if state.position.is_none() {
                            self.open_position(&mut state, TradeDirection::Long, i, bar.timestamp, price);
                        }
                    }
                    Signal::Sell => {
                        if state.position.as_ref().map_or(false, |p| p.is_long()) {
                            self.close_position(&mut state, i, bar.timestamp, price, ExitReason::Signal);
                        }
                        if state.position.is_none() && self.config.allow_short {
                            self.open_position(&mut state, TradeDirection::Short, i, bar.timestamp, price);
                        }
                    }
                    Signal::Hold => {}
                }
            }

            let equity = state.equity();
            let prev_equity = state
                .equity_curve
                .last()
                .map(|e| e.equity)
                .unwrap_or(self.config.initial_capital);
            state.equity_curve.push(EquityPoint {
                index: i,
                timestamp: bar.timestamp,
                equity,
                cash: state.cash,
                position_value: equity - state.cash,
                position: state.position.as_ref().map(|p| p.direction),
                bar_pnl: equity - prev_equity,
            });
        }

        let final_equity = state.equity();
        let metrics = MetricsCalculator::calculate(
            self.config.initial_capital,
            &state.equity_curve,
            &state.trades,
            &self.config.metrics,
        );
        info!(
            "{}: {} bars, {} trades, return {:.2}%, Sharpe {:.2}, max drawdown {:.2}%",
            symbol,
            bars.len(),
            metrics.total_trades,
            metrics.total_return * 100.0,
            metrics.sharpe_ratio,
            metrics.max_drawdown * 100.0
        );

        Ok(BacktestResult {
            symbol: symbol.to_string(),
            config: self.config.clone(),
            start: first,
            end: last,
            trades: state.trades,
            equity_curve: state.equity_curve,
            initial_capital: self.config.initial_capital,
            final_equity,
            metrics,
        })
    }

    fn open_position(
        &self,
        state: &mut RunState,
        direction: TradeDirection,
        index: usize,
        at: DateTime<Utc>,
        price: Decimal,
    ) {
        let fill = match direction {
            TradeDirection::Long => self.config.slippage.buy_fill(price),
            TradeDirection::Short => self.config.slippage.sell_fill(price),
        };
        let sizing = self.sizer.calculate(state.equity(), fill, self.config.commission.rate);
        if !sizing.is_allowed() {
            debug!(
                "bar {}: skipping {:?} entry: {}",
                index,
                direction,
                sizing.constraint_reason.as_deref().unwrap_or("sizing rejected")
            );
            return;
        }

        let commission = self.config.commission.calculate(sizing.quantity, fill).total;
        let mut position = Position::open(state.next_id, direction, index, at, fill, sizing.quantity, commission);
        state.next_id += 1;
        state.cash -= position.signed_quantity() * fill + commission;
        position.update_mtm(price);
        debug!("bar {}: open {:?} {} @ {}", index, direction, position.quantity, fill);
        state.position = Some(position);
    }

    fn close_position(
        &self,
        state: &mut RunState,
        index: usize,
        at: DateTime<Utc>,
        price: Decimal,
        reason: ExitReason,
    ) {
        let Some(position) = state.position.take() else {
            return;
        };
        let fill = match position.direction {
            TradeDirection::Long => self.config.slippage.sell_fill(price),
            TradeDirection::Short => self.config.slippage.buy_fill(price),
        };
        let commission = self.config.commission.calculate(position.quantity, fill).total;
        state.cash += position.signed_quantity() * fill - commission;

        let trade = position.close(index, at, fill, commission, reason);
        debug!("bar {}: close {:?} ({:?}) pnl {}", index, trade.direction, reason, trade.pnl);
        state.trades.push(trade);
    }
}

fn close_price(bar: &Bar, index: usize) -> EngineResult<Decimal> {
    if !bar.close.is_finite() || bar.close <= 0.0 {
        return Err(EngineError::InvalidInput(format!(
            "bar {} has invalid close {}",
            index, bar.close
        )));
    }
    Decimal::try_from(bar.close)
        .map_err(|e| EngineError::InvalidInput(format!("bar {} close {}: {}", index, bar.close, e)))
}
