use rayon::prelude::*;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::BacktestConfig;
use crate::errors::Result;
use crate::types::Candle;

use super::backtest::BacktestEngine;
use super::results::BacktestResult;

/// One independent run. Candles are shared read-only between jobs.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub name: String,
    pub config: BacktestConfig,
    pub candles: Arc<[Candle]>,
}

impl BatchJob {
    pub fn new(name: impl Into<String>, config: BacktestConfig, candles: Arc<[Candle]>) -> Self {
        Self {
            name: name.into(),
            config,
            candles,
        }
    }

    pub fn run(&self) -> Result<BacktestResult> {
        BacktestEngine::new(self.config.clone())?.run(&self.candles)
    }
}

#[derive(Debug)]
pub struct BatchOutcome {
    pub name: String,
    pub result: Result<BacktestResult>,
}

/// Runs every job on the rayon pool. Each job owns its engine and account;
/// outcomes come back in job order and a failed job does not stop the others.
pub fn run_batch(jobs: &[BatchJob]) -> Vec<BatchOutcome> {
    info!("Running {} backtests in parallel", jobs.len());

    jobs.par_iter()
        .map(|job| {
            let result = job.run();
            if let Err(e) = &result {
                warn!("Backtest '{}' failed: {}", job.name, e);
            }
            BatchOutcome {
                name: job.name.clone(),
                result,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::{CrossoverParams, StrategyParams};
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn wave(len: usize) -> Arc<[Candle]> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..len)
            .map(|i| {
                let phase = (i % 40) as i64;
                let offset = if phase < 20 { phase } else { 40 - phase };
                let close = dec!(100) + Decimal::from(offset);
                let open_time = start + Duration::hours(i as i64);
                Candle {
                    open_time,
                    close_time: open_time + Duration::hours(1),
                    open: close,
                    high: close + dec!(0.5),
                    low: close - dec!(0.5),
                    close,
                    volume: dec!(100),
                }
            })
            .collect()
    }

    fn crossover(fast: usize, slow: usize) -> BacktestConfig {
        BacktestConfig {
            strategy: StrategyParams::Crossover(CrossoverParams {
                fast_period: fast,
                slow_period: slow,
                use_rsi_filter: false,
                use_volume_filter: false,
                use_trend_filter: false,
                ..CrossoverParams::default()
            }),
            ..BacktestConfig::default()
        }
    }

    #[test]
    fn test_batch_matches_sequential_runs() {
        let candles = wave(200);
        let jobs = vec![
            BatchJob::new("fast", crossover(3, 8), candles.clone()),
            BatchJob::new("slow", crossover(5, 13), candles.clone()),
        ];

        let outcomes = run_batch(&jobs);
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].name, "fast");
        assert_eq!(outcomes[1].name, "slow");

        for (job, outcome) in jobs.iter().zip(&outcomes) {
            let parallel = outcome.result.as_ref().unwrap();
            let sequential = job.run().unwrap();
            assert_eq!(parallel, &sequential);
        }
    }

    #[test]
    fn test_failed_job_does_not_stop_batch() {
        let jobs = vec![
            BatchJob::new("short", crossover(3, 8), wave(5)),
            BatchJob::new("ok", crossover(3, 8), wave(100)),
        ];
        let outcomes = run_batch(&jobs);
        assert!(outcomes[0].result.is_err());
        assert!(outcomes[1].result.is_ok());
    }
}
