//! Ensemble vote and aggregate metrics over walk-forward records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::{Direction, PredictionRecord};
use crate::forecast::{ClassProbabilities, ForecastOutput};
use crate::weights::WeightMethod;

/// Result of combining per-model outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleVote {
    pub label: Direction,
    pub confidence: f64,
    pub probabilities: ClassProbabilities,
    /// Weights actually applied, renormalized over the models that voted.
    pub weights: BTreeMap<String, f64>,
}

/// Weighted vote over class probabilities.
///
/// Only models present in `outputs` vote; their weights are renormalized. A
/// model missing from `weights`, or a zero total, falls back to equal voting.
pub fn weighted_vote(
    outputs: &BTreeMap<String, ForecastOutput>,
    weights: &BTreeMap<String, f64>,
) -> Option<EnsembleVote> {
    if outputs.is_empty() {
        return None;
    }

    let raw: BTreeMap<String, f64> = outputs
        .keys()
        .map(|m| (m.clone(), weights.get(m).copied().filter(|w| w.is_finite() && *w >= 0.0).unwrap_or(0.0)))
        .collect();
    let total: f64 = raw.values().sum();
    let applied: BTreeMap<String, f64> = if total > 0.0 {
        raw.into_iter().map(|(m, w)| (m, w / total)).collect()
    } else {
        let even = 1.0 / outputs.len() as f64;
        outputs.keys().map(|m| (m.clone(), even)).collect()
    };

    let mut combined = ClassProbabilities::zero();
    for (model, output) in outputs {
        let w = applied.get(model).copied().unwrap_or(0.0);
        combined.add_weighted(&output.probabilities.normalized(), w);
    }
    let combined = combined.normalized();
    let label = combined.argmax();

    Some(EnsembleVote {
        label,
        confidence: combined.get(label),
        probabilities: combined,
        weights: applied,
    })
}

/// Weight vector in force from a given step onward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightSnapshot {
    /// Bar index of the first prediction using these weights.
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub weights: BTreeMap<String, f64>,
    pub method: WeightMethod,
    pub fell_back: bool,
}

/// Aggregate metrics over a run's prediction records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnsembleMetrics {
    pub n_predictions: usize,
    pub accuracy: f64,
    /// Accuracy restricted to records whose actual label is the class.
    pub per_class_accuracy: BTreeMap<Direction, f64>,
    pub per_model_accuracy: BTreeMap<String, f64>,
    pub mean_confidence: f64,
    pub mean_agreement: f64,
    pub weight_evolution: Vec<WeightSnapshot>,
}

impl EnsembleMetrics {
    pub fn from_records<'a>(
        records: impl IntoIterator<Item = &'a PredictionRecord>,
        weight_evolution: Vec<WeightSnapshot>,
    ) -> Self {
        let records: Vec<&PredictionRecord> = records.into_iter().collect();
        let n = records.len();
        if n == 0 {
            return Self {
                weight_evolution,
                ..Default::default()
            };
        }

        let correct = records.iter().filter(|r| r.is_correct).count();

        let mut per_class_accuracy = BTreeMap::new();
        for class in Direction::ALL {
            let of_class: Vec<_> = records.iter().filter(|r| r.actual == class).collect();
            if !of_class.is_empty() {
                let hits = of_class.iter().filter(|r| r.is_correct).count();
                per_class_accuracy.insert(class, hits as f64 / of_class.len() as f64);
            }
        }

        let mut model_hits: BTreeMap<String, (usize, usize)> = BTreeMap::new();
        for record in &records {
            for (model, label) in &record.model_predictions {
                let entry = model_hits.entry(model.clone()).or_insert((0, 0));
                entry.1 += 1;
                if *label == record.actual {
                    entry.0 += 1;
                }
            }
        }

        Self {
            n_predictions: n,
            accuracy: correct as f64 / n as f64,
            per_class_accuracy,
            per_model_accuracy: model_hits
                .into_iter()
                .map(|(m, (hits, total))| (m, hits as f64 / total as f64))
                .collect(),
            mean_confidence: records.iter().map(|r| r.confidence).sum::<f64>() / n as f64,
            mean_agreement: records.iter().map(|r| r.agreement).sum::<f64>() / n as f64,
            weight_evolution,
        }
    }

    /// Render the weight-evolution table as text.
    pub fn weight_table(&self) -> String {
        let models: Vec<&String> = self
            .weight_evolution
            .first()
            .map(|s| s.weights.keys().collect())
            .unwrap_or_default();

        let mut table = String::new();
        table.push_str("| Index | Method |");
        for m in &models {
            table.push_str(&format!(" {} |", m));
        }
        table.push('\n');
        for snapshot in &self.weight_evolution {
            table.push_str(&format!("| {:>5} | {} |", snapshot.index, snapshot.method.as_str()));
            for m in &models {
                table.push_str(&format!(" {:.3} |", snapshot.weights.get(*m).copied().unwrap_or(0.0)));
            }
            table.push('\n');
        }
        table
    }

    pub fn summary(&self) -> String {
        format!(
            "Ensemble: {} predictions\n\
             Accuracy: {:.1}%\n\
             Mean Confidence: {:.3}\n\
             Mean Agreement: {:.3}\n\
             Weight Updates: {}",
            self.n_predictions,
            self.accuracy * 100.0,
            self.mean_confidence,
            self.mean_agreement,
            self.weight_evolution.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn output(b: f64, n: f64, s: f64) -> ForecastOutput {
        ForecastOutput::from_probabilities(ClassProbabilities::new(b, n, s))
    }

    #[test]
    fn test_weighted_vote_respects_weights() {
        let mut outputs = BTreeMap::new();
        outputs.insert("rf".to_string(), output(0.7, 0.2, 0.1));
        outputs.insert("gb".to_string(), output(0.1, 0.2, 0.7));

        let mut weights = BTreeMap::new();
        weights.insert("rf".to_string(), 0.8);
        weights.insert("gb".to_string(), 0.2);

        let vote = weighted_vote(&outputs, &weights).unwrap();
        assert_eq!(vote.label, Direction::Bullish);
        assert!((vote.confidence - 0.58).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_vote_renormalizes_over_survivors() {
        let mut outputs = BTreeMap::new();
        outputs.insert("gb".to_string(), output(0.1, 0.2, 0.7));

        let mut weights = BTreeMap::new();
        weights.insert("rf".to_string(), 0.8);
        weights.insert("gb".to_string(), 0.2);

        let vote = weighted_vote(&outputs, &weights).unwrap();
        assert_eq!(vote.label, Direction::Bearish);
        assert!((vote.weights["gb"] - 1.0).abs() < 1e-12);
        assert!(weighted_vote(&BTreeMap::new(), &weights).is_none());
    }

    #[test]
    fn test_metrics_from_records() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let mut preds = BTreeMap::new();
        preds.insert("rf".to_string(), Direction::Bullish);
        preds.insert("gb".to_string(), Direction::Bearish);
        let weights: BTreeMap<String, f64> = [("rf".to_string(), 0.5), ("gb".to_string(), 0.5)].into();

        let records = vec![
            PredictionRecord::new(ts, "SPY", Direction::Bullish, 0.6, preds.clone(), weights.clone(), Direction::Bullish),
            PredictionRecord::new(ts, "SPY", Direction::Bullish, 0.8, preds, weights, Direction::Bearish),
        ];
        let metrics = EnsembleMetrics::from_records(&records, Vec::new());
        assert_eq!(metrics.n_predictions, 2);
        assert!((metrics.accuracy - 0.5).abs() < 1e-12);
        assert_eq!(metrics.per_class_accuracy[&Direction::Bullish], 1.0);
        assert_eq!(metrics.per_class_accuracy[&Direction::Bearish], 0.0);
        assert_eq!(metrics.per_model_accuracy["rf"], 0.5);
        assert!((metrics.mean_confidence - 0.7).abs() < 1e-12);
        assert!((metrics.mean_agreement - 0.5).abs() < 1e-12);
    }
}
