use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::{BacktestError, Result};

/// One OHLCV bar. Never mutated once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// Merge consecutive candles into one higher-timeframe bar.
    /// Returns `None` for an empty slice.
    pub fn aggregate(candles: &[Candle]) -> Option<Candle> {
        let first = candles.first()?;
        let last = candles.last()?;
        let high = candles.iter().map(|c| c.high).max()?;
        let low = candles.iter().map(|c| c.low).min()?;
        let volume = candles.iter().map(|c| c.volume).sum();

        Some(Candle {
            open_time: first.open_time,
            close_time: last.close_time,
            open: first.open,
            high,
            low,
            close: last.close,
            volume,
        })
    }

    /// Fail fast on malformed input: open times must strictly advance without
    /// overlapping the previous bar, every bar must close after it opens and
    /// high/low must bracket open/close.
    pub fn validate_series(candles: &[Candle]) -> Result<()> {
        for (index, candle) in candles.iter().enumerate() {
            if candle.close_time <= candle.open_time {
                return Err(BacktestError::InvalidCandle {
                    index,
                    reason: "close time is not after open time".to_string(),
                });
            }
            if candle.high < candle.open.max(candle.close)
                || candle.low > candle.open.min(candle.close)
            {
                return Err(BacktestError::InvalidCandle {
                    index,
                    reason: format!(
                        "high {} / low {} do not bracket open {} / close {}",
                        candle.high, candle.low, candle.open, candle.close
                    ),
                });
            }
            if candle.volume.is_sign_negative() {
                return Err(BacktestError::InvalidCandle {
                    index,
                    reason: "negative volume".to_string(),
                });
            }
            if index > 0 {
                let previous = &candles[index - 1];
                if candle.open_time <= previous.open_time {
                    return Err(BacktestError::UnorderedCandles { index });
                }
                if candle.open_time < previous.close_time {
                    return Err(BacktestError::InvalidCandle {
                        index,
                        reason: "opens before the previous candle closes".to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

pub fn closes(candles: &[Candle]) -> Vec<Decimal> {
    candles.iter().map(|c| c.close).collect()
}

pub fn volumes(candles: &[Candle]) -> Vec<Decimal> {
    candles.iter().map(|c| c.volume).collect()
}

/// A higher-timeframe view built from `factor` consecutive base candles.
#[derive(Debug, Clone)]
pub struct ResampledSeries {
    pub factor: usize,
    pub candles: Vec<Candle>,
    /// Base index of the last candle folded into each resampled bar.
    pub last_base_index: Vec<usize>,
}

impl ResampledSeries {
    /// Only complete buckets are emitted; a trailing partial bucket is dropped.
    pub fn build(base: &[Candle], factor: usize) -> Self {
        let factor = factor.max(1);
        let mut candles = Vec::with_capacity(base.len() / factor);
        let mut last_base_index = Vec::with_capacity(base.len() / factor);

        for (bucket, chunk) in base.chunks(factor).enumerate() {
            if chunk.len() < factor {
                break;
            }
            if let Some(bar) = Candle::aggregate(chunk) {
                candles.push(bar);
                last_base_index.push(bucket * factor + factor - 1);
            }
        }

        Self {
            factor,
            candles,
            last_base_index,
        }
    }

    /// Number of resampled bars fully formed from base candles `0..step`.
    pub fn closed_before(&self, step: usize) -> usize {
        self.last_base_index.partition_point(|&last| last < step)
    }
}
