//! Regime-aware method selection for ensemble weighting.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::regime::{RegimeClassifier, RegimeClassifierConfig, ReturnRegime};

use super::optimizer::{WeightMethod, WeightOptimizer, WeightOptimizerConfig, WeightOutcome};

/// Outcome of an adaptive optimization, with the regime that chose the method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveOutcome {
    pub regime: ReturnRegime,
    pub outcome: WeightOutcome,
}

/// Weight optimizer that picks its method from the current return regime.
///
/// High volatility favours directional agreement, trending markets favour
/// risk-adjusted error, and everything else uses the configured default.
pub struct AdaptiveWeightOptimizer {
    optimizer: WeightOptimizer,
    classifier: RegimeClassifier,
}

impl AdaptiveWeightOptimizer {
    pub fn new(weights: WeightOptimizerConfig, regime: RegimeClassifierConfig) -> Self {
        Self {
            optimizer: WeightOptimizer::new(weights),
            classifier: RegimeClassifier::new(regime),
        }
    }

    /// Method chosen for a regime.
    pub fn method_for(&self, regime: ReturnRegime) -> WeightMethod {
        match regime {
            ReturnRegime::HighVolatility => WeightMethod::Directional,
            ReturnRegime::Trending => WeightMethod::Sharpe,
            ReturnRegime::Normal | ReturnRegime::Unknown => self.optimizer.config().default_method,
        }
    }

    /// Classify `recent_returns`, then optimize with the matching method.
    pub fn optimize(
        &mut self,
        predictions: &BTreeMap<String, Vec<f64>>,
        actuals: &[f64],
        recent_returns: &[f64],
    ) -> AdaptiveOutcome {
        let regime = self.classifier.classify(recent_returns);
        let method = self.method_for(regime);
        debug!("Regime {:?} selects {} weighting", regime, method.as_str());
        AdaptiveOutcome {
            regime,
            outcome: self.optimizer.optimize_detailed(predictions, actuals, method),
        }
    }

    pub fn classifier(&self) -> &RegimeClassifier {
        &self.classifier
    }

    pub fn optimizer(&self) -> &WeightOptimizer {
        &self.optimizer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> (BTreeMap<String, Vec<f64>>, Vec<f64>) {
        let actuals: Vec<f64> = (0..30).map(|i| ((i as f64) * 0.8).sin()).collect();
        let a: Vec<f64> = actuals.iter().map(|x| x * 0.9 + 0.01).collect();
        let b: Vec<f64> = (0..30).map(|i| ((i as f64) * 1.7).cos()).collect();
        let mut preds = BTreeMap::new();
        preds.insert("a".to_string(), a);
        preds.insert("b".to_string(), b);
        (preds, actuals)
    }

    #[test]
    fn test_high_volatility_uses_directional() {
        let mut adaptive = AdaptiveWeightOptimizer::new(WeightOptimizerConfig::default(), RegimeClassifierConfig::default());
        let (preds, actuals) = inputs();
        let wild: Vec<f64> = (0..20).map(|i| if i % 2 == 0 { 0.06 } else { -0.06 }).collect();
        let result = adaptive.optimize(&preds, &actuals, &wild);
        assert_eq!(result.regime, ReturnRegime::HighVolatility);
        assert_eq!(result.outcome.requested, WeightMethod::Directional);
    }

    #[test]
    fn test_trending_uses_sharpe_and_calm_uses_default() {
        let mut adaptive = AdaptiveWeightOptimizer::new(WeightOptimizerConfig::default(), RegimeClassifierConfig::default());
        let (preds, actuals) = inputs();

        let trend = vec![0.005; 20];
        assert_eq!(adaptive.optimize(&preds, &actuals, &trend).outcome.requested, WeightMethod::Sharpe);

        let calm = vec![0.0; 20];
        let result = adaptive.optimize(&preds, &actuals, &calm);
        assert_eq!(result.regime, ReturnRegime::Normal);
        assert_eq!(result.outcome.requested, WeightMethod::Ridge);
        let sum: f64 = result.outcome.weights.values().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }
}
