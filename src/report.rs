//! Batch reports distinguishing completed from skipped units of work.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{EngineError, FailureKind};

/// A unit of work that was attempted and skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedUnit {
    /// Identifier of the unit (step index, fold number, symbol).
    pub unit: String,
    pub kind: FailureKind,
    pub reason: String,
}

/// Outcome of a batch operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport<T> {
    pub completed: Vec<T>,
    pub skipped: Vec<SkippedUnit>,
}

impl<T> Default for BatchReport<T> {
    fn default() -> Self {
        Self {
            completed: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

impl<T> BatchReport<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn complete(&mut self, value: T) {
        self.completed.push(value);
    }

    /// Record a skipped unit and log it.
    pub fn skip(&mut self, unit: impl Into<String>, err: &EngineError) {
        let unit = unit.into();
        warn!("Skipping {}: {}", unit, err);
        self.skipped.push(SkippedUnit {
            unit,
            kind: err.kind(),
            reason: err.to_string(),
        });
    }

    pub fn attempted(&self) -> usize {
        self.completed.len() + self.skipped.len()
    }

    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }

    /// Count of skipped units per failure kind.
    pub fn skip_counts(&self) -> HashMap<FailureKind, usize> {
        let mut counts = HashMap::new();
        for s in &self.skipped {
            *counts.entry(s.kind).or_insert(0) += 1;
        }
        counts
    }

    pub fn summary(&self) -> String {
        format!(
            "{}/{} units completed, {} skipped",
            self.completed.len(),
            self.attempted(),
            self.skipped.len()
        )
    }
}
