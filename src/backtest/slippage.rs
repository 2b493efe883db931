//! Slippage model in basis points.
//!
//! Fills move against the trade: buys pay `price * (1 + bps / 10_000)`,
//! sells receive `price * (1 - bps / 10_000)`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

const BPS: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

/// Configurable slippage model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlippageModel {
    /// Adverse price move per fill, in basis points.
    pub bps: Decimal,
}

impl Default for SlippageModel {
    fn default() -> Self {
        Self { bps: Decimal::from(5) }
    }
}

impl SlippageModel {
    pub fn new(bps: Decimal) -> Self {
        Self { bps }
    }

    /// Create a zero-slippage model (fills at the bar price).
    pub fn zero() -> Self {
        Self { bps: Decimal::ZERO }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.bps < Decimal::ZERO || self.bps >= BPS {
            return Err(EngineError::config(format!(
                "slippage bps must be in [0, 10000), got {}",
                self.bps
            )));
        }
        Ok(())
    }

    /// Fraction of price lost per fill.
    pub fn fraction(&self) -> Decimal {
        self.bps / BPS
    }

    /// Fill price for buying.
    pub fn buy_fill(&self, price: Decimal) -> Decimal {
        price * (Decimal::ONE + self.fraction())
    }

    /// Fill price for selling.
    pub fn sell_fill(&self, price: Decimal) -> Decimal {
        price * (Decimal::ONE - self.fraction())
    }
}
