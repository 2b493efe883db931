//! Signal generators consumed by the simulator.

use crate::data::{Bar, Direction};
use crate::error::{EngineError, EngineResult};
use crate::forecast::Forecaster;

use super::trade::Signal;

/// Produces a signal from the bars seen so far.
///
/// `history` always ends at the bar being traded; implementations must not
/// assume anything about bars after it.
pub trait SignalGenerator: Send + Sync {
    fn signal_at(&self, history: &[Bar]) -> Signal;
}

/// Precomputed signals aligned with the bars of a run.
#[derive(Debug, Clone, Default)]
pub struct SignalSeries {
    signals: Vec<Signal>,
}

impl SignalSeries {
    pub fn new(signals: Vec<Signal>) -> Self {
        Self { signals }
    }

    pub fn from_directions(directions: &[Direction]) -> Self {
        Self::new(directions.iter().copied().map(Signal::from_direction).collect())
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    /// Error unless there is exactly one signal per bar.
    pub fn check_aligned(&self, bars: usize) -> EngineResult<()> {
        if self.signals.len() != bars {
            return Err(EngineError::InvalidInput(format!(
                "{} signals for {} bars",
                self.signals.len(),
                bars
            )));
        }
        Ok(())
    }
}

impl SignalGenerator for SignalSeries {
    fn signal_at(&self, history: &[Bar]) -> Signal {
        history
            .len()
            .checked_sub(1)
            .and_then(|i| self.signals.get(i))
            .copied()
            .unwrap_or(Signal::Hold)
    }
}

/// Signals for `bars[start..]`, each computed from `bars[..=i]`.
pub fn generate_signals(generator: &dyn SignalGenerator, bars: &[Bar], start: usize) -> Vec<Signal> {
    (start..bars.len()).map(|i| generator.signal_at(&bars[..=i])).collect()
}

/// Adapts a trained forecaster into a signal generator.
///
/// Predictions below `min_confidence`, or failed predictions, hold.
pub struct ForecasterSignals<F> {
    forecaster: std::sync::Mutex<F>,
    horizon: usize,
    min_confidence: f64,
}

impl<F: Forecaster> ForecasterSignals<F> {
    pub fn new(forecaster: F, horizon: usize, min_confidence: f64) -> Self {
        Self {
            forecaster: std::sync::Mutex::new(forecaster),
            horizon,
            min_confidence,
        }
    }
}

impl<F: Forecaster> SignalGenerator for ForecasterSignals<F> {
    fn signal_at(&self, history: &[Bar]) -> Signal {
        let Ok(forecaster) = self.forecaster.lock() else {
            return Signal::Hold;
        };
        match forecaster.predict(history, self.horizon) {
            Ok(out) if out.confidence >= self.min_confidence => Signal::from_direction(out.label),
            Ok(_) => Signal::Hold,
            Err(e) => {
                tracing::debug!("{}: prediction failed, holding: {}", forecaster.name(), e);
                Signal::Hold
            }
        }
    }
}
