//! Position sizing module.
//!
//! Sizes a new position as a fraction of current capital:
//! - Notional capped at `max_position_fraction` of capital
//! - Entry commission paid out of the same budget
//! - Quantity rounded down to `quantity_decimals` places

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Position sizing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionSizerConfig {
    /// Maximum fraction of current capital committed to one position.
    pub max_position_fraction: Decimal,
    /// Decimal places allowed in a quantity (0 = whole units).
    pub quantity_decimals: u32,
    /// Smallest quantity worth trading.
    pub min_quantity: Decimal,
}

impl Default for PositionSizerConfig {
    fn default() -> Self {
        Self {
            max_position_fraction: Decimal::new(95, 2),
            quantity_decimals: 0,
            min_quantity: Decimal::ONE,
        }
    }
}

impl PositionSizerConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.max_position_fraction <= Decimal::ZERO || self.max_position_fraction > Decimal::ONE {
            return Err(EngineError::config(format!(
                "max_position_fraction must be in (0, 1], got {}",
                self.max_position_fraction
            )));
        }
        if self.min_quantity < Decimal::ZERO {
            return Err(EngineError::config("min_quantity must be >= 0"));
        }
        Ok(())
    }
}

/// Result of position sizing calculation.
#[derive(Debug, Clone)]
pub struct SizingResult {
    pub quantity: Decimal,
    /// Quantity times fill price.
    pub notional: Decimal,
    /// Capital the sizer was allowed to commit.
    pub budget: Decimal,
    pub constraint_reason: Option<String>,
}

impl SizingResult {
    pub fn is_allowed(&self) -> bool {
        self.quantity > Decimal::ZERO
    }

    fn rejected(budget: Decimal, reason: impl Into<String>) -> Self {
        Self {
            quantity: Decimal::ZERO,
            notional: Decimal::ZERO,
            budget,
            constraint_reason: Some(reason.into()),
        }
    }
}

/// Position sizer for determining quantities.
#[derive(Debug, Clone, Default)]
pub struct PositionSizer {
    config: PositionSizerConfig,
}

impl PositionSizer {
    pub fn new(config: PositionSizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PositionSizerConfig {
        &self.config
    }

    /// Quantity to trade at `fill_price` given current `capital`.
    ///
    /// `commission_rate` is reserved from the budget so the entry never
    /// spends more than the allowed fraction.
    pub fn calculate(&self, capital: Decimal, fill_price: Decimal, commission_rate: Decimal) -> SizingResult {
        let budget = (capital * self.config.max_position_fraction).max(Decimal::ZERO);
        if capital <= Decimal::ZERO {
            return SizingResult::rejected(budget, "No capital available");
        }
        if fill_price <= Decimal::ZERO {
            return SizingResult::rejected(budget, format!("Invalid fill price {}", fill_price));
        }

        let per_unit = fill_price * (Decimal::ONE + commission_rate);
        let quantity = (budget / per_unit)
            .round_dp_with_strategy(self.config.quantity_decimals, RoundingStrategy::ToZero);

        if quantity < self.config.min_quantity || quantity <= Decimal::ZERO {
            return SizingResult::rejected(
                budget,
                format!("Budget {:.2} buys less than minimum quantity {}", budget, self.config.min_quantity),
            );
        }

        SizingResult {
            quantity,
            notional: quantity * fill_price,
            budget,
            constraint_reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config() {
        let config = PositionSizerConfig::default();
        assert_eq!(config.max_position_fraction, dec!(0.95));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_basic_sizing() {
        let sizer = PositionSizer::default();
        // 95% of 100K = 95K budget at $100 = 950 units
        let result = sizer.calculate(dec!(100_000), dec!(100), dec!(0));
        assert_eq!(result.quantity, dec!(950));
        assert_eq!(result.notional, dec!(95_000));
        assert!(result.is_allowed());
    }

    #[test]
    fn test_commission_reserved_from_budget() {
        let sizer = PositionSizer::new(PositionSizerConfig {
            max_position_fraction: dec!(1),
            ..Default::default()
        });
        // 10_000 / (100 * 1.01) = 99.0099 -> 99
        let result = sizer.calculate(dec!(10_000), dec!(100), dec!(0.01));
        assert_eq!(result.quantity, dec!(99));
        assert!(result.notional * dec!(1.01) <= dec!(10_000));
    }

    #[test]
    fn test_fractional_quantities() {
        let sizer = PositionSizer::new(PositionSizerConfig {
            max_position_fraction: dec!(0.5),
            quantity_decimals: 2,
            min_quantity: dec!(0.01),
        });
        let result = sizer.calculate(dec!(1_000), dec!(300), dec!(0));
        assert_eq!(result.quantity, dec!(1.66));
    }

    #[test]
    fn test_rejections() {
        let sizer = PositionSizer::default();
        assert!(!sizer.calculate(dec!(0), dec!(100), dec!(0)).is_allowed());
        assert!(!sizer.calculate(dec!(1_000), dec!(0), dec!(0)).is_allowed());
        let tiny = sizer.calculate(dec!(50), dec!(100), dec!(0));
        assert!(!tiny.is_allowed());
        assert!(tiny.constraint_reason.unwrap().contains("minimum quantity"));
    }

    #[test]
    fn test_validate() {
        let bad = PositionSizerConfig {
            max_position_fraction: dec!(1.5),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
