//! Multi-timeframe directional consensus.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::data::Direction;
use crate::error::{EngineError, EngineResult};

/// Map a timeframe name or alias to its canonical key.
pub fn canonical_timeframe(name: &str) -> Option<&'static str> {
    match name.trim().to_lowercase().as_str() {
        "m15" | "15m" | "15min" => Some("m15"),
        "h1" | "1h" | "hourly" => Some("h1"),
        "h4" | "4h" => Some("h4"),
        "d1" | "1d" | "daily" => Some("d1"),
        "w1" | "1w" | "weekly" => Some("w1"),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Importance of each canonical timeframe; sums to 1.
    pub timeframe_weights: BTreeMap<String, f64>,
    /// Scores within `±dead_zone` vote neutral.
    pub dead_zone: f64,
    /// Share of weight the consensus direction must exceed to count as aligned.
    pub majority: f64,
    /// Added to confidence when the prediction agrees with the consensus.
    pub alignment_bonus: f64,
    /// Subtracted from confidence on a conflict.
    pub conflict_penalty: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        let timeframe_weights = [("m15", 0.05), ("h1", 0.10), ("h4", 0.20), ("d1", 0.30), ("w1", 0.35)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Self {
            timeframe_weights,
            dead_zone: 0.1,
            majority: 0.5,
            alignment_bonus: 0.05,
            conflict_penalty: 0.10,
        }
    }
}

impl ConsensusConfig {
    pub fn validate(&self) -> EngineResult<()> {
        let sum: f64 = self.timeframe_weights.values().sum();
        if (sum - 1.0).abs() > 1e-6 || self.timeframe_weights.values().any(|w| *w < 0.0) {
            return Err(EngineError::config(format!(
                "timeframe weights must be non-negative and sum to 1, got {:.6}",
                sum
            )));
        }
        if let Some(bad) = self.timeframe_weights.keys().find(|k| canonical_timeframe(k).is_none()) {
            return Err(EngineError::config(format!("unknown timeframe {}", bad)));
        }
        if !(0.0..1.0).contains(&self.dead_zone) {
            return Err(EngineError::config("consensus.dead_zone must be in [0, 1)"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub consensus_direction: Direction,
    pub conflict: bool,
    /// Normalized vote weight per direction.
    pub votes: BTreeMap<Direction, f64>,
    pub timeframes_used: usize,
    /// Confidence adjustment implied by the result.
    pub adjustment: f64,
}

/// Weighted timeframe vote against the stated `direction`.
///
/// With no recognised timeframes the consensus is neutral, with no conflict
/// and no adjustment.
pub fn assess_consensus(
    direction: Direction,
    scores: &BTreeMap<String, f64>,
    config: &ConsensusConfig,
) -> ConsensusResult {
    let mut used: Vec<(Direction, f64)> = Vec::new();
    let mut seen: BTreeSet<&'static str> = BTreeSet::new();
    for (name, score) in scores {
        let Some(key) = canonical_timeframe(name) else {
            warn!("Ignoring unknown timeframe {}", name);
            continue;
        };
        // One vote per timeframe; the first name in key order wins.
        if !seen.insert(key) {
            warn!("Ignoring {}: timeframe {} already scored", name, key);
            continue;
        }
        let Some(weight) = config.timeframe_weights.get(key).copied() else {
            continue;
        };
        if !score.is_finite() {
            warn!("Ignoring non-finite score for timeframe {}", name);
            continue;
        }
        used.push((Direction::from_return(score.clamp(-1.0, 1.0), config.dead_zone), weight));
    }

    let total: f64 = used.iter().map(|(_, w)| w).sum();
    if used.is_empty() || total <= 0.0 {
        return ConsensusResult {
            consensus_direction: Direction::Neutral,
            conflict: false,
            votes: BTreeMap::new(),
            timeframes_used: 0,
            adjustment: 0.0,
        };
    }

    let mut votes: BTreeMap<Direction, f64> = Direction::ALL.iter().map(|d| (*d, 0.0)).collect();
    for (d, w) in &used {
        if let Some(v) = votes.get_mut(d) {
            *v += w / total;
        }
    }

    let best = votes.values().cloned().fold(0.0_f64, f64::max);
    let leaders: Vec<Direction> = votes
        .iter()
        .filter(|(_, v)| (**v - best).abs() < 1e-12)
        .map(|(d, _)| *d)
        .collect();
    let consensus_direction = if leaders.len() == 1 { leaders[0] } else { Direction::Neutral };

    let share = votes.get(&consensus_direction).copied().unwrap_or(0.0);
    let conflict = !(direction == consensus_direction && share > config.majority);

    ConsensusResult {
        consensus_direction,
        conflict,
        votes,
        timeframes_used: used.len(),
        adjustment: if conflict {
            -config.conflict_penalty
        } else {
            config.alignment_bonus
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_all_bullish() {
        let s = scores(&[("m15", 0.40), ("h1", 0.45), ("h4", 0.50), ("d1", 0.55), ("w1", 0.60)]);
        let r = assess_consensus(Direction::Bullish, &s, &ConsensusConfig::default());
        assert_eq!(r.consensus_direction, Direction::Bullish);
        assert!(!r.conflict);
        assert!(r.adjustment > 0.0);
    }

    #[test]
    fn test_longer_horizons_dominate() {
        let s = scores(&[("15m", 0.8), ("1h", 0.8), ("daily", -0.5), ("weekly", -0.6)]);
        let r = assess_consensus(Direction::Bullish, &s, &ConsensusConfig::default());
        assert_eq!(r.consensus_direction, Direction::Bearish);
        assert!(r.conflict);
        assert!(r.adjustment < 0.0);
    }

    #[test]
    fn test_tie_favours_neutral() {
        // h4 (0.20) + h1 (0.10) bullish against d1 (0.30) bearish.
        let s = scores(&[("h1", 0.5), ("h4", 0.5), ("d1", -0.5)]);
        let r = assess_consensus(Direction::Bullish, &s, &ConsensusConfig::default());
        assert_eq!(r.consensus_direction, Direction::Neutral);
        assert!(r.conflict);
    }

    #[test]
    fn test_aliases_of_one_timeframe_vote_once() {
        // "d1" and "daily" are the same timeframe; counted twice, bearish would win 0.60 to 0.55.
        let s = scores(&[("d1", -0.5), ("daily", -0.5), ("h4", 0.5), ("w1", 0.5)]);
        let r = assess_consensus(Direction::Bullish, &s, &ConsensusConfig::default());
        assert_eq!(r.timeframes_used, 3);
        assert_eq!(r.consensus_direction, Direction::Bullish);
        assert!(!r.conflict);
        assert!((r.votes[&Direction::Bearish] - 0.30 / 0.85).abs() < 1e-12);
    }

    #[test]
    fn test_dead_zone_and_empty() {
        let s = scores(&[("d1", 0.05), ("w1", -0.05)]);
        let r = assess_consensus(Direction::Neutral, &s, &ConsensusConfig::default());
        assert_eq!(r.consensus_direction, Direction::Neutral);
        assert!(!r.conflict);

        let empty = assess_consensus(Direction::Bullish, &BTreeMap::new(), &ConsensusConfig::default());
        assert_eq!(empty.consensus_direction, Direction::Neutral);
        assert!(!empty.conflict);
        assert_eq!(empty.adjustment, 0.0);

        let unknown = assess_consensus(Direction::Bullish, &scores(&[("3d", 0.9)]), &ConsensusConfig::default());
        assert_eq!(unknown.timeframes_used, 0);
    }

    #[test]
    fn test_default_weights_valid() {
        assert!(ConsensusConfig::default().validate().is_ok());
    }
}
