//! Walk-forward backtesting over independent folds.
//!
//! Bars are cut into consecutive folds; each fold trains a signal generator
//! on its in-sample head and trades only its out-of-sample tail. Folds share
//! no state and run in parallel with rayon.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::data::Bar;
use crate::error::{EngineError, EngineResult};
use crate::metrics::calculator::sample_std;
use crate::report::BatchReport;
use crate::validation::BarIntegrityValidator;

use super::engine::{BacktestConfig, BacktestResult, BacktestSimulator};
use super::signal::{generate_signals, SignalGenerator};

/// Walk-forward backtest configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkForwardBacktestConfig {
    pub n_folds: usize,
    /// Share of each fold used for training.
    pub in_sample_fraction: f64,
    pub min_in_sample_bars: usize,
    pub min_out_of_sample_bars: usize,
}

impl Default for WalkForwardBacktestConfig {
    fn default() -> Self {
        Self {
            n_folds: 5,
            in_sample_fraction: 0.7,
            min_in_sample_bars: 20,
            min_out_of_sample_bars: 5,
        }
    }
}

impl WalkForwardBacktestConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.n_folds == 0 {
            return Err(EngineError::config("n_folds must be >= 1"));
        }
        if !(self.in_sample_fraction > 0.0 && self.in_sample_fraction < 1.0) {
            return Err(EngineError::config(format!(
                "in_sample_fraction must be in (0, 1), got {}",
                self.in_sample_fraction
            )));
        }
        if self.min_out_of_sample_bars == 0 {
            return Err(EngineError::config("min_out_of_sample_bars must be >= 1"));
        }
        Ok(())
    }
}

/// Builds a signal generator from in-sample bars.
pub trait SignalTrainer: Sync {
    fn train(&self, in_sample: &[Bar]) -> EngineResult<Box<dyn SignalGenerator>>;
}

impl<F> SignalTrainer for F
where
    F: Fn(&[Bar]) -> EngineResult<Box<dyn SignalGenerator>> + Sync,
{
    fn train(&self, in_sample: &[Bar]) -> EngineResult<Box<dyn SignalGenerator>> {
        self(in_sample)
    }
}

/// Bar ranges of one fold: in-sample `[start, split)`, out-of-sample `[split, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldWindow {
    pub fold: usize,
    pub start: usize,
    pub split: usize,
    pub end: usize,
}

impl FoldWindow {
    pub fn in_sample_len(&self) -> usize {
        self.split - self.start
    }

    pub fn out_of_sample_len(&self) -> usize {
        self.end - self.split
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldResult {
    pub window: FoldWindow,
    pub result: BacktestResult,
}

/// Statistics across completed folds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FoldAggregate {
    pub n_folds: usize,
    pub mean_return: f64,
    pub std_return: f64,
    pub mean_sharpe: f64,
    pub std_sharpe: f64,
    /// Most negative max drawdown of any fold.
    pub worst_drawdown: f64,
    pub total_trades: usize,
}

impl FoldAggregate {
    pub fn from_folds(folds: &[FoldResult]) -> Self {
        if folds.is_empty() {
            return Self::default();
        }
        let returns: Vec<f64> = folds.iter().map(|f| f.result.total_return()).collect();
        let sharpes: Vec<f64> = folds.iter().map(|f| f.result.sharpe_ratio()).collect();
        let n = folds.len() as f64;
        Self {
            n_folds: folds.len(),
            mean_return: returns.iter().sum::<f64>() / n,
            std_return: sample_std(&returns),
            mean_sharpe: sharpes.iter().sum::<f64>() / n,
            std_sharpe: sample_std(&sharpes),
            worst_drawdown: folds
                .iter()
                .map(|f| f.result.max_drawdown())
                .fold(0.0, f64::min),
            total_trades: folds.iter().map(|f| f.result.metrics.total_trades).sum(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardBacktestResult {
    pub symbol: String,
    pub folds: BatchReport<FoldResult>,
    pub aggregate: FoldAggregate,
}

impl WalkForwardBacktestResult {
    pub fn summary(&self) -> String {
        format!(
            "Walk-forward backtest: {}\n\
             Folds: {}\n\
             Mean Return: {:.2}% (std {:.2}%)\n\
             Mean Sharpe: {:.2} (std {:.2})\n\
             Worst Drawdown: {:.2}%\n\
             Total Trades: {}",
            self.symbol,
            self.folds.summary(),
            self.aggregate.mean_return * 100.0,
            self.aggregate.std_return * 100.0,
            self.aggregate.mean_sharpe,
            self.aggregate.std_sharpe,
            self.aggregate.worst_drawdown * 100.0,
            self.aggregate.total_trades,
        )
    }
}

pub struct WalkForwardBacktest {
    config: WalkForwardBacktestConfig,
    simulator: BacktestSimulator,
}

impl WalkForwardBacktest {
    pub fn new(config: WalkForwardBacktestConfig, backtest: BacktestConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            simulator: BacktestSimulator::new(backtest)?,
        })
    }

    pub fn config(&self) -> &WalkForwardBacktestConfig {
        &self.config
    }

    /// Consecutive, non-overlapping folds; the last fold absorbs the remainder.
    pub fn fold_windows(&self, n_bars: usize) -> EngineResult<Vec<FoldWindow>> {
        let n_folds = self.config.n_folds;
        let fold_size = n_bars / n_folds;
        let min_fold = self.config.min_in_sample_bars + self.config.min_out_of_sample_bars;
        if fold_size < min_fold.max(2) {
            return Err(EngineError::insufficient(format!(
                "{} bars give {} folds of {} bars, need at least {}",
                n_bars, n_folds, fold_size, min_fold
            )));
        }

        Ok((0..n_folds)
            .map(|fold| {
                let start = fold * fold_size;
                let end = if fold + 1 == n_folds { n_bars } else { start + fold_size };
                let len = end - start;
                let in_sample = ((len as f64 * self.config.in_sample_fraction).floor() as usize)
                    .max(self.config.min_in_sample_bars)
                    .min(len - self.config.min_out_of_sample_bars);
                FoldWindow {
                    fold,
                    start,
                    split: start + in_sample,
                    end,
                }
            })
            .collect())
    }

    /// Train and simulate every fold. Failed folds are skipped and logged.
    pub fn run(&self, symbol: &str, bars: &[Bar], trainer: &dyn SignalTrainer) -> EngineResult<WalkForwardBacktestResult> {
        BarIntegrityValidator::ensure_sorted(bars)?;
        let windows = self.fold_windows(bars.len())?;
        info!("{}: walk-forward backtest over {} folds", symbol, windows.len());

        let outcomes: Vec<(FoldWindow, EngineResult<BacktestResult>)> = windows
            .par_iter()
            .map(|window| (*window, self.run_fold(symbol, bars, window, trainer)))
            .collect();

        let mut folds = BatchReport::new();
        for (window, outcome) in outcomes {
            match outcome {
                Ok(result) => folds.complete(FoldResult { window, result }),
                Err(e) => folds.skip(format!("{} fold {}", symbol, window.fold), &e),
            }
        }

        let aggregate = FoldAggregate::from_folds(&folds.completed);
        info!(
            "{}: {}; mean return {:.2}%, mean Sharpe {:.2}",
            symbol,
            folds.summary(),
            aggregate.mean_return * 100.0,
            aggregate.mean_sharpe
        );
        Ok(WalkForwardBacktestResult {
            symbol: symbol.to_string(),
            folds,
            aggregate,
        })
    }

    fn run_fold(
        &self,
        symbol: &str,
        bars: &[Bar],
        window: &FoldWindow,
        trainer: &dyn SignalTrainer,
    ) -> EngineResult<BacktestResult> {
        let generator = trainer.train(&bars[window.start..window.split])?;
        // Out-of-sample signals may look back into the in-sample bars of the same fold.
        let context = &bars[window.start..window.end];
        let signals = generate_signals(generator.as_ref(), context, window.in_sample_len());
        self.simulator
            .run_signals(symbol, &bars[window.split..window.end], &signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::Signal;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::sync::Mutex;

    fn bars(n: usize) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2023, 1, 2, 21, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let c = 100.0 + (i as f64 * 0.3).sin() * 4.0 + i as f64 * 0.05;
                Bar::new(start + Duration::days(i as i64), c, c + 0.5, c - 0.5, c, 10_000.0)
            })
            .collect()
    }

    struct Momentum;

    impl SignalGenerator for Momentum {
        fn signal_at(&self, history: &[Bar]) -> Signal {
            match history {
                [.., a, b] if b.close > a.close => Signal::Buy,
                [.., a, b] if b.close < a.close => Signal::Sell,
                _ => Signal::Hold,
            }
        }
    }

    fn momentum_trainer(_: &[Bar]) -> EngineResult<Box<dyn SignalGenerator>> {
        Ok(Box::new(Momentum))
    }

    #[test]
    fn test_fold_windows_partition_bars() {
        let wf = WalkForwardBacktest::new(WalkForwardBacktestConfig::default(), BacktestConfig::default()).unwrap();
        let windows = wf.fold_windows(253).unwrap();
        assert_eq!(windows.len(), 5);
        assert_eq!(windows[0].start, 0);
        assert_eq!(windows[4].end, 253);
        for w in &windows {
            assert!(w.start < w.split && w.split < w.end);
            assert!(w.in_sample_len() >= 20);
            assert!(w.out_of_sample_len() >= 5);
        }
        for pair in windows.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert!(wf.fold_windows(40).is_err());
    }

    #[test]
    fn test_all_folds_complete() {
        let wf = WalkForwardBacktest::new(WalkForwardBacktestConfig::default(), BacktestConfig::default()).unwrap();
        let b = bars(300);
        let result = wf.run("SPY", &b, &momentum_trainer).unwrap();

        assert!(result.folds.is_complete());
        assert_eq!(result.aggregate.n_folds, 5);
        let trades: usize = result.folds.completed.iter().map(|f| f.result.trades.len()).sum();
        assert_eq!(result.aggregate.total_trades, trades);
        assert!(result.aggregate.worst_drawdown <= 0.0);
        for fold in &result.folds.completed {
            assert_eq!(fold.result.equity_curve.len(), fold.window.out_of_sample_len());
            assert_eq!(fold.result.start, b[fold.window.split].timestamp);
        }
    }

    #[test]
    fn test_failed_fold_is_skipped() {
        let wf = WalkForwardBacktest::new(WalkForwardBacktestConfig::default(), BacktestConfig::default()).unwrap();
        let b = bars(300);
        let cutoff = b[180].timestamp;
        let trainer = move |in_sample: &[Bar]| -> EngineResult<Box<dyn SignalGenerator>> {
            if in_sample[0].timestamp >= cutoff {
                Err(EngineError::insufficient("trainer refused"))
            } else {
                Ok(Box::new(Momentum))
            }
        };

        let result = wf.run("SPY", &b, &trainer).unwrap();
        assert_eq!(result.folds.attempted(), 5);
        assert_eq!(result.folds.completed.len(), 3);
        assert_eq!(result.folds.skipped.len(), 2);
        assert!(result.folds.skipped[0].unit.contains("fold 3"));
        assert_eq!(result.aggregate.n_folds, 3);
    }

    #[test]
    fn test_trainer_never_sees_out_of_sample() {
        let wf = WalkForwardBacktest::new(WalkForwardBacktestConfig::default(), BacktestConfig::default()).unwrap();
        let b = bars(250);
        let seen: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>> = Mutex::new(Vec::new());
        let trainer = |in_sample: &[Bar]| -> EngineResult<Box<dyn SignalGenerator>> {
            let first = in_sample[0].timestamp;
            let last = in_sample[in_sample.len() - 1].timestamp;
            seen.lock().unwrap().push((first, last));
            Ok(Box::new(Momentum))
        };

        let result = wf.run("SPY", &b, &trainer).unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 5);
        for fold in &result.folds.completed {
            let oos_start = b[fold.window.split].timestamp;
            let in_start = b[fold.window.start].timestamp;
            let (_, last) = seen.iter().find(|(first, _)| *first == in_start).copied().unwrap();
            assert!(last < oos_start);
        }
    }

    #[test]
    fn test_config_validation() {
        let bad = WalkForwardBacktestConfig {
            in_sample_fraction: 1.0,
            ..Default::default()
        };
        assert!(WalkForwardBacktest::new(bad, BacktestConfig::default()).is_err());
        let zero = WalkForwardBacktestConfig {
            n_folds: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
    }
}
