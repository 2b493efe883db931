//! Trade and position management for backtesting.
//!
//! Handles the trade lifecycle:
//! - Entry (position creation from a signal)
//! - Position tracking (mark-to-market against bar closes)
//! - Exit (opposite signal or end of period)
//! - P&L calculation net of commissions

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::data::Direction;

/// Trading signal for one bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl Signal {
    /// Bullish buys, bearish sells, neutral holds.
    pub fn from_direction(direction: Direction) -> Self {
        match direction {
            Direction::Bullish => Self::Buy,
            Direction::Bearish => Self::Sell,
            Direction::Neutral => Self::Hold,
        }
    }
}

/// Direction of the trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeDirection {
    Long,
    Short,
}

impl TradeDirection {
    /// +1 for long, -1 for short.
    pub fn sign(&self) -> Decimal {
        match self {
            Self::Long => Decimal::ONE,
            Self::Short => Decimal::NEGATIVE_ONE,
        }
    }
}

/// Reason for exiting a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    /// Opposite signal received.
    Signal,
    /// Forced close at the final bar.
    EndOfPeriod,
}

/// The single open position of a simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: u64,
    pub direction: TradeDirection,
    pub entry_index: usize,
    pub entry_time: DateTime<Utc>,
    /// Fill price after slippage.
    pub entry_price: Decimal,
    /// Units held, always positive.
    pub quantity: Decimal,
    pub entry_commission: Decimal,
    /// Last mark.
    pub current_price: Decimal,
}

impl Position {
    pub fn open(
        id: u64,
        direction: TradeDirection,
        entry_index: usize,
        entry_time: DateTime<Utc>,
        entry_price: Decimal,
        quantity: Decimal,
        entry_commission: Decimal,
    ) -> Self {
        Self {
            id,
            direction,
            entry_index,
            entry_time,
            entry_price,
            quantity,
            entry_commission,
            current_price: entry_price,
        }
    }

    /// Signed quantity: positive long, negative short.
    pub fn signed_quantity(&self) -> Decimal {
        self.direction.sign() * self.quantity
    }

    pub fn is_long(&self) -> bool {
        self.direction == TradeDirection::Long
    }

    pub fn update_mtm(&mut self, price: Decimal) {
        self.current_price = price;
    }

    /// Contribution of the position to equity at the last mark.
    pub fn market_value(&self) -> Decimal {
        self.signed_quantity() * self.current_price
    }

    /// Close the position into a completed trade.
    pub fn close(
        self,
        exit_index: usize,
        exit_time: DateTime<Utc>,
        exit_price: Decimal,
        exit_commission: Decimal,
        exit_reason: ExitReason,
    ) -> Trade {
        let gross = self.signed_quantity() * (exit_price - self.entry_price);
        let commission = self.entry_commission + exit_commission;
        let pnl = gross - commission;

        let notional = self.quantity * self.entry_price;
        let return_pct: f64 = if notional.is_zero() {
            0.0
        } else {
            (pnl / notional).try_into().unwrap_or(0.0)
        };

        Trade {
            id: self.id,
            direction: self.direction,
            entry_index: self.entry_index,
            exit_index,
            entry_time: self.entry_time,
            exit_time,
            entry_price: self.entry_price,
            exit_price,
            quantity: self.quantity,
            commission,
            pnl,
            return_pct,
            bars_held: exit_index.saturating_sub(self.entry_index),
            exit_reason,
        }
    }
}

/// A completed trade for the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: u64,
    pub direction: TradeDirection,
    pub entry_index: usize,
    pub exit_index: usize,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: Decimal,
    /// Entry plus exit commission.
    pub commission: Decimal,
    /// Net of commissions.
    pub pnl: Decimal,
    /// P&L over entry notional.
    pub return_pct: f64,
    pub bars_held: usize,
    pub exit_reason: ExitReason,
}

impl Trade {
    pub fn is_winner(&self) -> bool {
        self.pnl > Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 21, 0, 0).unwrap()
    }

    #[test]
    fn test_signal_mapping() {
        assert_eq!(Signal::from_direction(Direction::Bullish), Signal::Buy);
        assert_eq!(Signal::from_direction(Direction::Neutral), Signal::Hold);
        assert_eq!(Signal::from_direction(Direction::Bearish), Signal::Sell);
    }

    #[test]
    fn test_long_trade_pnl() {
        let mut position = Position::open(1, TradeDirection::Long, 0, t(1), dec!(100), dec!(10), dec!(1));
        position.update_mtm(dec!(105));
        assert_eq!(position.market_value(), dec!(1050));

        let trade = position.close(3, t(4), dec!(110), dec!(1.1), ExitReason::Signal);
        // 10 * (110 - 100) - 2.1
        assert_eq!(trade.pnl, dec!(97.9));
        assert_eq!(trade.commission, dec!(2.1));
        assert_eq!(trade.bars_held, 3);
        assert!(trade.is_winner());
        assert!((trade.return_pct - 0.0979).abs() < 1e-9);
    }

    #[test]
    fn test_short_trade_pnl() {
        let position = Position::open(2, TradeDirection::Short, 5, t(5), dec!(50), dec!(20), dec!(0));
        assert_eq!(position.signed_quantity(), dec!(-20));

        let trade = position.close(6, t(6), dec!(55), dec!(0), ExitReason::EndOfPeriod);
        assert_eq!(trade.pnl, dec!(-100));
        assert!(!trade.is_winner());
        assert_eq!(trade.bars_held, 1);
    }
}
