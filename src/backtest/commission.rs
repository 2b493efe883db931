//! Commission model as a rate of traded notional.
//!
//! Default: 10 bps of notional per fill, no minimum.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Commission for a single fill.
#[derive(Debug, Clone, Copy)]
pub struct Commission {
    pub notional: Decimal,
    pub rate: Decimal,
    pub total: Decimal,
}

/// Configurable commission model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommissionModel {
    /// Fraction of notional charged per fill.
    pub rate: Decimal,
    /// Minimum commission per fill.
    pub min_per_order: Decimal,
}

impl Default for CommissionModel {
    fn default() -> Self {
        Self {
            rate: Decimal::new(1, 3), // 0.1%
            min_per_order: Decimal::ZERO,
        }
    }
}

impl CommissionModel {
    pub fn new(rate: Decimal) -> Self {
        Self {
            rate,
            ..Default::default()
        }
    }

    /// Create a zero-commission model.
    pub fn zero() -> Self {
        Self {
            rate: Decimal::ZERO,
            min_per_order: Decimal::ZERO,
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.rate < Decimal::ZERO || self.rate >= Decimal::ONE {
            return Err(EngineError::config(format!("commission rate must be in [0, 1), got {}", self.rate)));
        }
        if self.min_per_order < Decimal::ZERO {
            return Err(EngineError::config("commission min_per_order must be >= 0"));
        }
        Ok(())
    }

    /// Commission for a fill of `quantity` at `price`.
    pub fn calculate(&self, quantity: Decimal, price: Decimal) -> Commission {
        let notional = (quantity * price).abs();
        let mut total = notional * self.rate;
        if !notional.is_zero() && total < self.min_per_order {
            total = self.min_per_order;
        }
        Commission {
            notional,
            rate: self.rate,
            total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_commission() {
        let model = CommissionModel::default();
        assert_eq!(model.rate, dec!(0.001));
        // 100 units at $50 = $5000 notional
        assert_eq!(model.calculate(dec!(100), dec!(50)).total, dec!(5));
    }

    #[test]
    fn test_minimum_applies_only_to_real_fills() {
        let model = CommissionModel {
            rate: dec!(0.001),
            min_per_order: dec!(1),
        };
        assert_eq!(model.calculate(dec!(1), dec!(10)).total, dec!(1));
        assert_eq!(model.calculate(dec!(0), dec!(10)).total, dec!(0));
    }

    #[test]
    fn test_zero_commission() {
        let comm = CommissionModel::zero().calculate(dec!(1000), dec!(400));
        assert_eq!(comm.total, dec!(0));
        assert_eq!(comm.notional, dec!(400000));
    }

    #[test]
    fn test_validate() {
        assert!(CommissionModel::new(dec!(1.5)).validate().is_err());
        assert!(CommissionModel::default().validate().is_ok());
    }
}
