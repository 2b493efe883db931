//! Performance metrics calculator.
//!
//! Calculates risk-adjusted statistics from an equity curve and trade ledger.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::backtest::{EquityPoint, Trade};
use crate::error::{EngineError, EngineResult};

/// Annualization and risk-free settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Bars per year used to annualize.
    pub trading_days_per_year: f64,
    /// Annual risk-free rate subtracted in Sharpe and Sortino.
    pub risk_free_rate: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            trading_days_per_year: 252.0,
            risk_free_rate: 0.0,
        }
    }
}

impl MetricsConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if !(self.trading_days_per_year > 0.0) {
            return Err(EngineError::config("trading_days_per_year must be > 0"));
        }
        if !self.risk_free_rate.is_finite() {
            return Err(EngineError::config("risk_free_rate must be finite"));
        }
        Ok(())
    }

    fn per_period_risk_free(&self) -> f64 {
        self.risk_free_rate / self.trading_days_per_year
    }
}

/// Serde for ratios that may be infinite. JSON numbers cannot hold `inf`,
/// so non-finite values travel as the strings `"inf"`, `"-inf"` and `"nan"`.
mod unbounded_ratio {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else if value.is_nan() {
            serializer.serialize_str("nan")
        } else if *value > 0.0 {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_str("-inf")
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(v) => Ok(v),
            Repr::Text(text) => match text.as_str() {
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                "nan" => Ok(f64::NAN),
                other => Err(D::Error::custom(format!("invalid ratio '{}'", other))),
            },
        }
    }
}

/// Scalar performance metrics. Returns and drawdowns are fractions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    // Basic statistics
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,

    // P&L metrics
    pub total_pnl: Decimal,
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
    /// `+inf` when there are no losing trades; written as `"inf"` in JSON.
    #[serde(with = "unbounded_ratio")]
    pub profit_factor: f64,
    pub avg_trade_pnl: Decimal,
    pub avg_winner: Decimal,
    pub avg_loser: Decimal,
    pub largest_winner: Decimal,
    pub largest_loser: Decimal,

    // Return metrics
    pub total_return: f64,
    pub annualized_return: f64,
    pub annualized_volatility: f64,

    // Risk metrics
    /// Largest peak-to-trough decline, `<= 0`.
    pub max_drawdown: f64,
    pub max_drawdown_amount: Decimal,
    pub drawdown_duration_bars: usize,

    // Risk-adjusted returns
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    /// Zero when there was no drawdown.
    pub calmar_ratio: f64,

    // Time metrics
    pub periods: usize,
    pub avg_bars_in_trade: f64,
    /// Fraction of bars ending with an open position.
    pub exposure: f64,

    pub total_commission: Decimal,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self {
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            win_rate: 0.0,
            total_pnl: Decimal::ZERO,
            gross_profit: Decimal::ZERO,
            gross_loss: Decimal::ZERO,
            profit_factor: 0.0,
            avg_trade_pnl: Decimal::ZERO,
            avg_winner: Decimal::ZERO,
            avg_loser: Decimal::ZERO,
            largest_winner: Decimal::ZERO,
            largest_loser: Decimal::ZERO,
            total_return: 0.0,
            annualized_return: 0.0,
            annualized_volatility: 0.0,
            max_drawdown: 0.0,
            max_drawdown_amount: Decimal::ZERO,
            drawdown_duration_bars: 0,
            sharpe_ratio: 0.0,
            sortino_ratio: 0.0,
            calmar_ratio: 0.0,
            periods: 0,
            avg_bars_in_trade: 0.0,
            exposure: 0.0,
            total_commission: Decimal::ZERO,
        }
    }
}

impl PerformanceMetrics {
    /// Generate a summary report.
    pub fn summary(&self) -> String {
        format!(
            "Performance Summary\n\
             ====================\n\
             \n\
             Trades: {} (W: {}, L: {})\n\
             Win Rate: {:.1}%\n\
             Profit Factor: {:.2}\n\
             \n\
             Total P&L: ${:.2}\n\
             Avg Trade: ${:.2}\n\
             Avg Winner: ${:.2}\n\
             Avg Loser: ${:.2}\n\
             Largest Win: ${:.2}\n\
             Largest Loss: ${:.2}\n\
             \n\
             Total Return: {:.2}%\n\
             Annualized Return: {:.2}%\n\
             Annualized Volatility: {:.2}%\n\
             \n\
             Max Drawdown: {:.2}%\n\
             Sharpe Ratio: {:.2}\n\
             Sortino Ratio: {:.2}\n\
             Calmar Ratio: {:.2}\n\
             \n\
             Avg Bars in Trade: {:.1}\n\
             Exposure: {:.1}%\n\
             Commission: ${:.2}",
            self.total_trades,
            self.winning_trades,
            self.losing_trades,
            self.win_rate * 100.0,
            self.profit_factor,
            self.total_pnl,
            self.avg_trade_pnl,
            self.avg_winner,
            self.avg_loser,
            self.largest_winner,
            self.largest_loser,
            self.total_return * 100.0,
            self.annualized_return * 100.0,
            self.annualized_volatility * 100.0,
            self.max_drawdown * 100.0,
            self.sharpe_ratio,
            self.sortino_ratio,
            self.calmar_ratio,
            self.avg_bars_in_trade,
            self.exposure * 100.0,
            self.total_commission,
        )
    }
}

/// Drawdown analysis details.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DrawdownAnalysis {
    /// Fraction below the running peak, `<= 0`.
    pub max_drawdown: f64,
    pub max_drawdown_amount: Decimal,
    pub peak_time: Option<DateTime<Utc>>,
    pub trough_time: Option<DateTime<Utc>>,
    pub recovery_time: Option<DateTime<Utc>>,
    /// Longest stretch of bars spent below a prior peak.
    pub longest_duration_bars: usize,
    pub drawdown_periods: usize,
}

fn to_f64(d: Decimal) -> f64 {
    d.try_into().unwrap_or(0.0)
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Sample standard deviation; zero below two observations.
pub(crate) fn sample_std(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    (xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64).sqrt()
}

/// Metrics calculator.
pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Calculate all metrics for a run that started with `initial` capital.
    pub fn calculate(
        initial: Decimal,
        equity_curve: &[EquityPoint],
        trades: &[Trade],
        config: &MetricsConfig,
    ) -> PerformanceMetrics {
        let total_trades = trades.len();
        let winners: Vec<&Trade> = trades.iter().filter(|t| t.is_winner()).collect();
        let losers: Vec<&Trade> = trades.iter().filter(|t| !t.is_winner()).collect();
        let win_rate = if total_trades > 0 {
            winners.len() as f64 / total_trades as f64
        } else {
            0.0
        };

        let total_pnl: Decimal = trades.iter().map(|t| t.pnl).sum();
        let gross_profit: Decimal = winners.iter().map(|t| t.pnl).sum();
        let gross_loss: Decimal = losers.iter().map(|t| t.pnl).sum();
        let profit_factor = Self::calculate_profit_factor(gross_profit, gross_loss);

        let avg = |sum: Decimal, n: usize| {
            if n > 0 {
                sum / Decimal::from(n as i64)
            } else {
                Decimal::ZERO
            }
        };

        let returns = Self::period_returns(initial, equity_curve);
        let final_equity = equity_curve.last().map(|p| p.equity).unwrap_or(initial);
        let total_return = if initial > Decimal::ZERO {
            to_f64(final_equity / initial) - 1.0
        } else {
            0.0
        };
        let annualized_return = Self::annualize(total_return, returns.len(), config.trading_days_per_year);
        let annualized_volatility = sample_std(&returns) * config.trading_days_per_year.sqrt();

        let drawdown = Self::analyze_drawdown(initial, equity_curve);
        let calmar_ratio = if drawdown.max_drawdown < 0.0 {
            annualized_return / drawdown.max_drawdown.abs()
        } else {
            0.0
        };

        let periods = equity_curve.len();
        let exposure = if periods > 0 {
            equity_curve.iter().filter(|p| p.position.is_some()).count() as f64 / periods as f64
        } else {
            0.0
        };
        let avg_bars_in_trade = if total_trades > 0 {
            trades.iter().map(|t| t.bars_held as f64).sum::<f64>() / total_trades as f64
        } else {
            0.0
        };

        PerformanceMetrics {
            total_trades,
            winning_trades: winners.len(),
            losing_trades: losers.len(),
            win_rate,
            total_pnl,
            gross_profit,
            gross_loss,
            profit_factor,
            avg_trade_pnl: avg(total_pnl, total_trades),
            avg_winner: avg(gross_profit, winners.len()),
            avg_loser: avg(gross_loss, losers.len()),
            largest_winner: winners.iter().map(|t| t.pnl).max().unwrap_or(Decimal::ZERO),
            largest_loser: losers.iter().map(|t| t.pnl).min().unwrap_or(Decimal::ZERO),
            total_return,
            annualized_return,
            annualized_volatility,
            max_drawdown: drawdown.max_drawdown,
            max_drawdown_amount: drawdown.max_drawdown_amount,
            drawdown_duration_bars: drawdown.longest_duration_bars,
            sharpe_ratio: Self::calculate_sharpe(&returns, config),
            sortino_ratio: Self::calculate_sortino(&returns, config),
            calmar_ratio,
            periods,
            avg_bars_in_trade,
            exposure,
            total_commission: trades.iter().map(|t| t.commission).sum(),
        }
    }

    /// Bar-over-bar equity returns, the first measured against `initial`.
    pub fn period_returns(initial: Decimal, equity_curve: &[EquityPoint]) -> Vec<f64> {
        let mut prev = to_f64(initial);
        let mut returns = Vec::with_capacity(equity_curve.len());
        for point in equity_curve {
            let curr = to_f64(point.equity);
            returns.push(if prev > 0.0 { curr / prev - 1.0 } else { 0.0 });
            prev = curr;
        }
        returns
    }

    /// Geometric annualization of a total return earned over `periods` bars.
    fn annualize(total_return: f64, periods: usize, periods_per_year: f64) -> f64 {
        if periods == 0 {
            return 0.0;
        }
        let growth = 1.0 + total_return;
        if growth <= 0.0 {
            return -1.0;
        }
        growth.powf(periods_per_year / periods as f64) - 1.0
    }

    /// Calculate profit factor.
    fn calculate_profit_factor(gross_profit: Decimal, gross_loss: Decimal) -> f64 {
        let loss = to_f64(gross_loss.abs());
        if loss == 0.0 {
            return f64::INFINITY;
        }
        to_f64(gross_profit) / loss
    }

    /// Annualized Sharpe ratio of excess per-bar returns.
    fn calculate_sharpe(returns: &[f64], config: &MetricsConfig) -> f64 {
        let rf = config.per_period_risk_free();
        let excess: Vec<f64> = returns.iter().map(|r| r - rf).collect();
        let std_dev = sample_std(&excess);
        if std_dev == 0.0 {
            return 0.0;
        }
        mean(&excess) / std_dev * config.trading_days_per_year.sqrt()
    }

    /// Calculate Sortino ratio (downside deviation of excess returns).
    fn calculate_sortino(returns: &[f64], config: &MetricsConfig) -> f64 {
        if returns.is_empty() {
            return 0.0;
        }
        let rf = config.per_period_risk_free();
        let excess: Vec<f64> = returns.iter().map(|r| r - rf).collect();
        let downside_variance =
            excess.iter().map(|r| r.min(0.0).powi(2)).sum::<f64>() / excess.len() as f64;
        let downside_dev = downside_variance.sqrt();
        if downside_dev == 0.0 {
            return 0.0;
        }
        mean(&excess) / downside_dev * config.trading_days_per_year.sqrt()
    }

    /// Analyze drawdown from the running peak, seeded with `initial`.
    pub fn analyze_drawdown(initial: Decimal, equity_curve: &[EquityPoint]) -> DrawdownAnalysis {
        let mut analysis = DrawdownAnalysis::default();
        if equity_curve.is_empty() {
            return analysis;
        }

        let mut peak = initial;
        let mut peak_time = None;
        let mut underwater = 0usize;
        let mut in_drawdown = false;
        let mut awaiting_recovery = false;

        for point in equity_curve {
            if point.equity >= peak {
                if in_drawdown {
                    analysis.drawdown_periods += 1;
                    if awaiting_recovery {
                        analysis.recovery_time = Some(point.timestamp);
                        awaiting_recovery = false;
                    }
                }
                peak = point.equity;
                peak_time = Some(point.timestamp);
                underwater = 0;
                in_drawdown = false;
                continue;
            }

            in_drawdown = true;
            underwater += 1;
            analysis.longest_duration_bars = analysis.longest_duration_bars.max(underwater);

            let amount = peak - point.equity;
            let pct = if peak > Decimal::ZERO {
                -to_f64(amount / peak)
            } else {
                0.0
            };
            if pct < analysis.max_drawdown {
                analysis.max_drawdown = pct;
                analysis.max_drawdown_amount = amount;
                analysis.peak_time = peak_time;
                analysis.trough_time = Some(point.timestamp);
                analysis.recovery_time = None;
                awaiting_recovery = true;
            }
        }
        if in_drawdown {
            analysis.drawdown_periods += 1;
        }
        analysis
    }
}
