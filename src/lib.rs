//! Deterministic candle-by-candle backtesting for crypto trading strategies.

pub mod config;
pub mod data;
pub mod engine;
pub mod errors;
pub mod exchange;
pub mod indicators;
pub mod risk;
pub mod strategies;
pub mod types;

pub use config::{load_backtest_config, BacktestConfig};
pub use engine::{run_batch, BacktestEngine, BacktestResult, BatchJob};
pub use errors::{BacktestError, Result};
pub use strategies::{Strategy, StrategyEvaluator, StrategyParams};
pub use types::Candle;
