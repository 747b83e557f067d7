use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use candle_backtester::config::load_backtest_config;
use candle_backtester::data::load_candles;
use candle_backtester::engine::{run_batch, BacktestEngine, BacktestResult, BatchJob};
use candle_backtester::exchange::{ConstraintProvider, StaticConstraintProvider};
use candle_backtester::types::Candle;

#[derive(Parser)]
#[command(name = "candle-backtester")]
#[command(author = "Trading Bot")]
#[command(version = "0.1.0")]
#[command(about = "Deterministic candle-by-candle strategy backtester", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Backtest one strategy over a candle file
    Backtest {
        /// Candle file (JSON array or CSV)
        #[arg(long)]
        candles: PathBuf,
        /// Run configuration (TOML)
        #[arg(short, long, default_value = "backtest.toml")]
        config: PathBuf,
        /// Write the full result as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run several configurations over the same candles concurrently
    Batch {
        /// Candle file (JSON array or CSV)
        #[arg(long)]
        candles: PathBuf,
        /// Run configurations (TOML), one run each
        #[arg(short, long, required = true, num_args = 1..)]
        config: Vec<PathBuf>,
        /// Directory for one JSON result per configuration
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
    /// Show the exchange constraints used for a symbol
    Constraints {
        /// Symbol, e.g. BTCUSDT
        symbol: String,
        /// Apply [constraints] overrides from this configuration
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Print as a TOML table instead of the summary line
        #[arg(long)]
        toml: bool,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str()));
    if cli.json_logs {
        let subscriber = FmtSubscriber::builder()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("Candle Backtester v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Backtest { candles, config, output } => {
            run_backtest(&candles, &config, output.as_deref())?;
        }
        Commands::Batch { candles, config, output_dir } => {
            run_batch_command(&candles, &config, output_dir.as_deref())?;
        }
        Commands::Constraints { symbol, config, toml } => {
            show_constraints(&symbol, config.as_deref(), toml)?;
        }
    }

    Ok(())
}

fn run_backtest(candles_path: &Path, config_path: &Path, output: Option<&Path>) -> Result<()> {
    let config = load_backtest_config(config_path)?;
    let candles = load_candles(candles_path)?;

    let mut engine = BacktestEngine::new(config)?;
    let result = engine.run(&candles)?;
    result.print_summary();

    if let Some(path) = output {
        save_result(&result, path)?;
    }
    Ok(())
}

fn run_batch_command(
    candles_path: &Path,
    config_paths: &[PathBuf],
    output_dir: Option<&Path>,
) -> Result<()> {
    let candles: Arc<[Candle]> = load_candles(candles_path)?.into();

    let mut jobs = Vec::with_capacity(config_paths.len());
    for path in config_paths {
        let config = load_backtest_config(path)?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("run")
            .to_string();
        jobs.push(BatchJob::new(name, config, candles.clone()));
    }

    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let mut failures = 0;
    for outcome in run_batch(&jobs) {
        match outcome.result {
            Ok(result) => {
                println!("\n>>> {}", outcome.name);
                result.print_summary();
                if let Some(dir) = output_dir {
                    save_result(&result, &dir.join(format!("{}.json", outcome.name)))?;
                }
            }
            Err(e) => {
                error!("{}: {}", outcome.name, e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        return Err(anyhow!("{} of {} backtests failed", failures, jobs.len()));
    }
    Ok(())
}

fn show_constraints(symbol: &str, config_path: Option<&Path>, as_toml: bool) -> Result<()> {
    let provider = match config_path {
        Some(path) => load_backtest_config(path)?.constraint_provider(),
        None => StaticConstraintProvider::new(),
    };
    let constraints = provider.constraints_for(symbol);
    if as_toml {
        print!("{}", toml::to_string_pretty(&constraints)?);
    } else {
        println!("{}", constraints);
    }
    Ok(())
}

fn save_result(result: &BacktestResult, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(result)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Results saved to {}", path.display());
    Ok(())
}
