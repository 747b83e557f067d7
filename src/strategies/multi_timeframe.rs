use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use super::{
    apply_filters, FilterMode, ProtectiveLevel, StrategyContext, StrategyEvaluator, StrategySignal,
};
use crate::errors::Result;
use crate::indicators::{check_periods, IndicatorCache, IndicatorKey, IndicatorRef, MAX_PERIOD};
use crate::types::{Candle, ResampledSeries, Side, Signal};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiTimeframeParams {
    /// Aggregation factors over the base candles, e.g. 1h/4h/16h from 1h data.
    pub timeframes: Vec<usize>,
    pub min_agreement: usize,

    pub rsi_period: usize,
    pub rsi_bullish: Decimal,
    pub rsi_bearish: Decimal,

    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,

    pub use_volume_filter: bool,
    pub volume_period: usize,
    pub min_volume_ratio: Decimal,

    pub atr_period: usize,
    pub stop_atr_multiplier: Decimal,
    pub take_profit_atr_multiplier: Decimal,

    pub filter_mode: FilterMode,
}

impl Default for MultiTimeframeParams {
    fn default() -> Self {
        Self {
            timeframes: vec![1, 4, 16],
            min_agreement: 2,
            rsi_period: 14,
            rsi_bullish: dec!(55),
            rsi_bearish: dec!(45),
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            use_volume_filter: true,
            volume_period: 20,
            min_volume_ratio: dec!(1.0),
            atr_period: 14,
            stop_atr_multiplier: dec!(2),
            take_profit_atr_multiplier: dec!(4),
            filter_mode: FilterMode::Strict,
        }
    }
}

impl MultiTimeframeParams {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let distinct: BTreeSet<usize> = self.timeframes.iter().copied().collect();
        if distinct.len() < 2 || distinct.len() != self.timeframes.len() {
            errors.push("strategy.timeframes must list at least two distinct factors".to_string());
        }
        if self.timeframes.iter().any(|f| *f == 0 || *f > MAX_PERIOD) {
            errors.push(format!(
                "strategy.timeframes factors must be between 1 and {}",
                MAX_PERIOD
            ));
        }
        if self.min_agreement == 0 || self.min_agreement > self.timeframes.len() {
            errors.push(
                "strategy.min_agreement must be between 1 and the number of timeframes".to_string(),
            );
        }
        if self.rsi_bearish > self.rsi_bullish {
            errors.push("strategy.rsi_bearish must be <= strategy.rsi_bullish".to_string());
        }
        if self.macd_fast >= self.macd_slow {
            errors.push("strategy.macd_fast must be < strategy.macd_slow".to_string());
        }
        errors.extend(check_periods(
            "strategy",
            &[
                ("rsi_period", self.rsi_period),
                ("macd_fast", self.macd_fast),
                ("macd_slow", self.macd_slow),
                ("macd_signal", self.macd_signal),
                ("volume_period", self.volume_period),
                ("atr_period", self.atr_period),
            ],
        ));
        if self.stop_atr_multiplier <= Decimal::ZERO
            || self.take_profit_atr_multiplier <= Decimal::ZERO
        {
            errors.push("strategy ATR multipliers must be > 0".to_string());
        }
        errors
    }
}

/// One higher timeframe with its own indicator cache.
#[derive(Debug, Clone)]
struct Frame {
    resampled: ResampledSeries,
    cache: IndicatorCache,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameVotes {
    pub rsi_bullish: usize,
    pub rsi_bearish: usize,
    pub macd_bullish: usize,
    pub macd_bearish: usize,
}

impl FrameVotes {
    fn agrees(&self, side: Side, min: usize) -> bool {
        match side {
            Side::Buy => self.rsi_bullish >= min && self.macd_bullish >= min,
            Side::Sell => self.rsi_bearish >= min && self.macd_bearish >= min,
        }
    }

    fn agreement(&self, side: Side, frames: usize) -> Decimal {
        if frames == 0 {
            return Decimal::ZERO;
        }
        let votes = match side {
            Side::Buy => self.rsi_bullish + self.macd_bullish,
            Side::Sell => self.rsi_bearish + self.macd_bearish,
        };
        Decimal::from(votes as u32) / Decimal::from((2 * frames) as u32)
    }
}

/// RSI and MACD histogram read independently on several aggregated
/// timeframes; a direction needs enough frames agreeing on both.
#[derive(Debug, Clone)]
pub struct MultiTimeframeStrategy {
    name: String,
    params: MultiTimeframeParams,
    rsi: IndicatorRef,
    macd_hist: IndicatorRef,
    volume_ratio: IndicatorRef,
    atr: IndicatorRef,
    frames: Vec<Frame>,
}

impl MultiTimeframeStrategy {
    pub fn new(params: MultiTimeframeParams) -> Self {
        let name = format!(
            "MultiTimeframe_{}",
            params.timeframes.iter().map(|f| f.to_string()).collect::<Vec<_>>().join("/")
        );
        Self {
            name,
            rsi: IndicatorKey::Rsi(params.rsi_period).into(),
            macd_hist: IndicatorKey::macd_histogram(
                params.macd_fast,
                params.macd_slow,
                params.macd_signal,
            )
            .into(),
            volume_ratio: IndicatorKey::VolumeRatio(params.volume_period).into(),
            atr: IndicatorKey::Atr(params.atr_period).into(),
            params,
            frames: Vec::new(),
        }
    }

    fn frame_warmup(&self) -> usize {
        self.rsi.warmup().max(self.macd_hist.warmup())
    }

    /// Votes from bars fully closed before `step`.
    pub fn votes(&self, step: usize) -> FrameVotes {
        let mut votes = FrameVotes::default();
        for frame in &self.frames {
            let view = frame.cache.view(frame.resampled.closed_before(step));
            if let Some(rsi) = view.latest(&self.rsi) {
                if rsi > self.params.rsi_bullish {
                    votes.rsi_bullish += 1;
                } else if rsi < self.params.rsi_bearish {
                    votes.rsi_bearish += 1;
                }
            }
            if let Some(hist) = view.latest(&self.macd_hist) {
                if hist > Decimal::ZERO {
                    votes.macd_bullish += 1;
                } else if hist < Decimal::ZERO {
                    votes.macd_bearish += 1;
                }
            }
        }
        votes
    }
}

impl StrategyEvaluator for MultiTimeframeStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn warmup_candles(&self) -> usize {
        // bar index `w` of a factor-f frame closes with base index (w + 1) * f - 1
        let frame_warmup = self.frame_warmup() + 1;
        let slowest = self.params.timeframes.iter().copied().max().unwrap_or(1);
        let base = self.volume_ratio.warmup().max(self.atr.warmup()) + 1;
        frame_warmup.saturating_mul(slowest).max(base)
    }

    fn required_indicators(&self) -> Vec<IndicatorRef> {
        vec![self.volume_ratio.clone(), self.atr.clone()]
    }

    fn prepare(&mut self, candles: &[Candle]) -> Result<()> {
        let keys = [self.rsi.clone(), self.macd_hist.clone()];
        self.frames = self
            .params
            .timeframes
            .iter()
            .map(|&factor| {
                let resampled = ResampledSeries::build(candles, factor);
                let cache = IndicatorCache::precompute(&resampled.candles, &keys);
                Frame { resampled, cache }
            })
            .collect();
        debug!(
            "[{}] prepared {} frames over {} base candles",
            self.name,
            self.frames.len(),
            candles.len()
        );
        Ok(())
    }

    fn evaluate(&self, ctx: &StrategyContext<'_>) -> StrategySignal {
        let p = &self.params;
        let votes = self.votes(ctx.step);
        let frames = self.frames.len();

        let direction = if votes.agrees(Side::Buy, p.min_agreement) {
            Some(Side::Buy)
        } else if votes.agrees(Side::Sell, p.min_agreement) {
            Some(Side::Sell)
        } else {
            None
        };
        let Some(side) = direction else {
            return StrategySignal::none();
        };

        if let Some(open_side) = ctx.position {
            if side != open_side {
                return StrategySignal::new(
                    Signal::from_side(side),
                    votes.agreement(side, frames),
                    "timeframes turned against position",
                );
            }
            return StrategySignal::none();
        }

        let mut checks = Vec::with_capacity(1);
        if p.use_volume_filter {
            let volume_ok = ctx
                .indicator(&self.volume_ratio, 0)
                .map(|ratio| ratio >= p.min_volume_ratio)
                .unwrap_or(false);
            checks.push(("volume_ratio", volume_ok));
        }
        let agreement = votes.agreement(side, frames);
        let Some(confidence) = apply_filters(p.filter_mode, &self.name, &checks, agreement) else {
            return StrategySignal::none();
        };

        let Some(atr) = ctx.indicator(&self.atr, 0) else {
            return StrategySignal::none();
        };

        StrategySignal::new(
            Signal::from_side(side),
            confidence,
            format!(
                "{} agreement: rsi {}/{}, macd {}/{}",
                side,
                if side == Side::Buy { votes.rsi_bullish } else { votes.rsi_bearish },
                frames,
                if side == Side::Buy { votes.macd_bullish } else { votes.macd_bearish },
                frames
            ),
        )
        .with_levels(
            ProtectiveLevel::Offset(atr * p.stop_atr_multiplier),
            ProtectiveLevel::Offset(atr * p.take_profit_atr_multiplier),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    /// Accelerating trend: close = 1000 + d * (i + i^2 / 20).
    fn trending(n: usize, direction: Decimal) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let x = Decimal::from(i as u32);
                let close = dec!(1000) + direction * (x + x * x / dec!(20));
                Candle {
                    open_time: start + Duration::hours(i as i64),
                    close_time: start + Duration::hours(i as i64 + 1),
                    open: close - direction * dec!(0.5),
                    high: close + dec!(1),
                    low: close - dec!(1),
                    close,
                    volume: dec!(50),
                }
            })
            .collect()
    }

    fn params() -> MultiTimeframeParams {
        MultiTimeframeParams {
            timeframes: vec![1, 2, 4],
            rsi_period: 3,
            macd_fast: 2,
            macd_slow: 4,
            macd_signal: 2,
            volume_period: 3,
            atr_period: 3,
            use_volume_filter: false,
            ..MultiTimeframeParams::default()
        }
    }

    fn evaluate(
        strategy: &MultiTimeframeStrategy,
        candles: &[Candle],
        step: usize,
        position: Option<Side>,
    ) -> StrategySignal {
        let cache = IndicatorCache::precompute(candles, &strategy.required_indicators());
        strategy.evaluate(&StrategyContext {
            step,
            history: &candles[..step],
            indicators: cache.view(step),
            position,
        })
    }

    #[test]
    fn test_uptrend_agreement_buys() {
        let candles = trending(80, Decimal::ONE);
        let mut strategy = MultiTimeframeStrategy::new(params());
        strategy.prepare(&candles).unwrap();

        let step = strategy.warmup_candles() + 20;
        let signal = evaluate(&strategy, &candles, step, None);
        assert_eq!(signal.signal, Signal::Buy);
        assert_eq!(signal.confidence, Decimal::ONE);
    }

    #[test]
    fn test_downtrend_exits_long() {
        let candles = trending(80, -Decimal::ONE);
        let mut strategy = MultiTimeframeStrategy::new(params());
        strategy.prepare(&candles).unwrap();

        let step = strategy.warmup_candles() + 20;
        let signal = evaluate(&strategy, &candles, step, Some(Side::Buy));
        assert_eq!(signal.signal, Signal::Sell);
        assert!(signal.stop_loss.is_none());
    }

    #[test]
    fn test_no_votes_before_frames_close() {
        let candles = trending(80, Decimal::ONE);
        let mut strategy = MultiTimeframeStrategy::new(params());
        strategy.prepare(&candles).unwrap();
        assert_eq!(strategy.votes(0), FrameVotes::default());
        assert!(evaluate(&strategy, &candles, 1, None).is_none());
    }

    #[test]
    fn test_strict_volume_filter() {
        let candles = trending(80, Decimal::ONE);
        let mut strategy = MultiTimeframeStrategy::new(MultiTimeframeParams {
            use_volume_filter: true,
            min_volume_ratio: dec!(2),
            ..params()
        });
        strategy.prepare(&candles).unwrap();
        let step = strategy.warmup_candles() + 20;
        assert!(evaluate(&strategy, &candles, step, None).is_none());
    }

    #[test]
    fn test_validation() {
        assert!(MultiTimeframeParams::default().validate().is_empty());
        let invalid = MultiTimeframeParams {
            timeframes: vec![4, 4],
            min_agreement: 3,
            ..MultiTimeframeParams::default()
        };
        assert_eq!(invalid.validate().len(), 2);

        let oversized = MultiTimeframeParams {
            timeframes: vec![1, 4, 1 << 40],
            rsi_period: 0,
            ..MultiTimeframeParams::default()
        };
        assert_eq!(oversized.validate().len(), 2);
    }
}
