//! Mahler ensemble CLI
//!
//! Usage:
//! ```bash
//! # Reconcile accuracy scores into one unified confidence
//! mahler-ensemble validate --scores scores.json --symbol SPY --direction bullish
//!
//! # Simulate a precomputed signal series against bar history
//! mahler-ensemble backtest --bars bars.json --signals signals.json --symbol SPY
//!
//! # Print the effective configuration
//! mahler-ensemble --config config/default.toml config
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use mahler_ensemble::backtest::{BacktestSimulator, BacktestSummary, Signal};
use mahler_ensemble::validation::{BarIntegrityValidator, UnifiedValidator};
use mahler_ensemble::{Bar, Direction, EngineConfig, ValidationScores};

#[derive(Parser)]
#[command(name = "mahler-ensemble")]
#[command(about = "Validation, calibration and backtesting engine for forecast ensembles")]
#[command(version)]
struct Cli {
    /// Path to a TOML configuration file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Produce a unified prediction from stored accuracy scores
    Validate {
        /// JSON file with backtesting/walk-forward/live scores
        #[arg(short, long)]
        scores: PathBuf,

        #[arg(long, default_value = "SPY")]
        symbol: String,

        /// Ensemble direction being validated
        #[arg(short, long, default_value = "bullish")]
        direction: String,
    },

    /// Run a backtest of a signal series
    Backtest {
        /// JSON array of OHLCV bars
        #[arg(short, long)]
        bars: PathBuf,

        /// JSON array of signals ("buy", "sell", "hold"), one per bar
        #[arg(short, long)]
        signals: PathBuf,

        #[arg(long, default_value = "SPY")]
        symbol: String,

        /// Print the full JSON summary including the trade ledger
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(p) => EngineConfig::load(p).with_context(|| format!("Invalid configuration {}", p.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("mahler_ensemble=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Validate {
            scores,
            symbol,
            direction,
        } => {
            let direction =
                Direction::parse(&direction).ok_or_else(|| anyhow!("Unknown direction '{}'", direction))?;
            let scores: ValidationScores = read_json(&scores)?;
            let validator = UnifiedValidator::new(config.validator).context("Invalid validator configuration")?;

            let prediction = validator.validate(&symbol, direction, &scores);
            info!("{}: {}", symbol, prediction.explanation);
            println!("{}", serde_json::to_string_pretty(&prediction)?);
        }
        Commands::Backtest {
            bars,
            signals,
            symbol,
            json,
        } => {
            let bars: Vec<Bar> = read_json(&bars)?;
            let signals: Vec<Signal> = read_json(&signals)?;

            let report = BarIntegrityValidator::validate(&symbol, &bars);
            if !report.all_passed() {
                warn!("{}", report.summary());
            }

            let simulator = BacktestSimulator::new(config.backtest).context("Invalid backtest configuration")?;
            let result = simulator
                .run_signals(&symbol, &bars, &signals)
                .context("Backtest failed")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&BacktestSummary::from(&result))?);
            } else {
                println!("{}", result.summary());
            }
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
