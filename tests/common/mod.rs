#![allow(dead_code)]

use candle_backtester::indicators::IndicatorRef;
use candle_backtester::strategies::{StrategyContext, StrategyEvaluator, StrategySignal};
use candle_backtester::types::Candle;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
}

pub fn candle(
    hour: i64,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
) -> Candle {
    let open_time = start() + Duration::hours(hour);
    Candle {
        open_time,
        close_time: open_time + Duration::hours(1),
        open,
        high,
        low,
        close,
        volume,
    }
}

pub fn flat(hour: i64, price: Decimal) -> Candle {
    candle(hour, price, price, price, price, dec!(100))
}

/// Hourly candles whose open is the previous close, with a fixed wick.
pub fn from_closes(closes: &[Decimal]) -> Vec<Candle> {
    let mut candles = Vec::with_capacity(closes.len());
    let mut previous = closes.first().copied().unwrap_or(dec!(100));
    for (i, &close) in closes.iter().enumerate() {
        let open = previous;
        let wick = dec!(0.25);
        let volume = dec!(100) + Decimal::from((i * 37 % 50) as u64);
        let (high, low) = (open.max(close) + wick, open.min(close) - wick);
        candles.push(candle(i as i64, open, high, low, close, volume));
        previous = close;
    }
    candles
}

/// Triangle wave around 100 with the given period, plus a slow drift.
pub fn wave(len: usize, period: usize) -> Vec<Candle> {
    let half = (period / 2).max(1);
    let closes: Vec<Decimal> = (0..len)
        .map(|i| {
            let phase = i % period;
            let offset = if phase < half { phase } else { period - phase };
            dec!(100) + Decimal::from(offset as u64) + Decimal::from(i as u64) / dec!(10)
        })
        .collect();
    from_closes(&closes)
}

/// Emits pre-planned signals by step, whatever the history.
pub struct ScriptedStrategy {
    pub warmup: usize,
    pub signals: BTreeMap<usize, StrategySignal>,
}

impl ScriptedStrategy {
    pub fn new(warmup: usize, signals: Vec<(usize, StrategySignal)>) -> Self {
        Self {
            warmup,
            signals: signals.into_iter().collect(),
        }
    }
}

impl StrategyEvaluator for ScriptedStrategy {
    fn name(&self) -> &str {
        "scripted"
    }

    fn warmup_candles(&self) -> usize {
        self.warmup
    }

    fn required_indicators(&self) -> Vec<IndicatorRef> {
        Vec::new()
    }

    fn evaluate(&self, ctx: &StrategyContext<'_>) -> StrategySignal {
        self.signals.get(&ctx.step).cloned().unwrap_or_else(StrategySignal::none)
    }
}
