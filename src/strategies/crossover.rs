use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::{
    apply_filters, warmup_for, FilterMode, ProtectiveLevel, StrategyContext, StrategyEvaluator,
    StrategySignal,
};
use crate::indicators::{check_periods, BollingerPart, IndicatorKey, IndicatorRef};
use crate::types::{Side, Signal};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovingAverageType {
    Sma,
    #[default]
    Ema,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossoverParams {
    pub ma_type: MovingAverageType,
    pub fast_period: usize,
    pub slow_period: usize,

    // Momentum band
    pub use_rsi_filter: bool,
    pub rsi_period: usize,
    pub rsi_long_min: Decimal,
    pub rsi_overbought: Decimal,
    pub rsi_short_max: Decimal,
    pub rsi_oversold: Decimal,

    // Volume confirmation
    pub use_volume_filter: bool,
    pub volume_period: usize,
    pub min_volume_ratio: Decimal,

    // Trend-strength composite
    pub use_trend_filter: bool,
    pub adx_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bb_period: usize,
    pub bb_std_dev: Decimal,
    pub min_trend_strength: Decimal,

    // Protective levels as ATR multiples from the fill
    pub atr_period: usize,
    pub stop_atr_multiplier: Decimal,
    pub take_profit_atr_multiplier: Decimal,

    pub filter_mode: FilterMode,
}

impl Default for CrossoverParams {
    fn default() -> Self {
        Self {
            ma_type: MovingAverageType::Ema,
            fast_period: 9,
            slow_period: 21,
            use_rsi_filter: true,
            rsi_period: 14,
            rsi_long_min: dec!(45),
            rsi_overbought: dec!(70),
            rsi_short_max: dec!(55),
            rsi_oversold: dec!(30),
            use_volume_filter: true,
            volume_period: 20,
            min_volume_ratio: dec!(1.0),
            use_trend_filter: true,
            adx_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bb_period: 20,
            bb_std_dev: dec!(2),
            min_trend_strength: dec!(0.5),
            atr_period: 14,
            stop_atr_multiplier: dec!(1.5),
            take_profit_atr_multiplier: dec!(3.0),
            filter_mode: FilterMode::Strict,
        }
    }
}

impl CrossoverParams {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.fast_period >= self.slow_period {
            errors.push("strategy.fast_period must be < strategy.slow_period".to_string());
        }
        if self.macd_fast >= self.macd_slow {
            errors.push("strategy.macd_fast must be < strategy.macd_slow".to_string());
        }
        errors.extend(check_periods(
            "strategy",
            &[
                ("fast_period", self.fast_period),
                ("slow_period", self.slow_period),
                ("rsi_period", self.rsi_period),
                ("volume_period", self.volume_period),
                ("adx_period", self.adx_period),
                ("macd_fast", self.macd_fast),
                ("macd_slow", self.macd_slow),
                ("macd_signal", self.macd_signal),
                ("bb_period", self.bb_period),
                ("atr_period", self.atr_period),
            ],
        ));
        if self.rsi_oversold >= self.rsi_overbought {
            errors.push("strategy.rsi_oversold must be < strategy.rsi_overbought".to_string());
        }
        if self.bb_std_dev <= Decimal::ZERO {
            errors.push("strategy.bb_std_dev must be > 0".to_string());
        }
        if self.stop_atr_multiplier <= Decimal::ZERO
            || self.take_profit_atr_multiplier <= Decimal::ZERO
        {
            errors.push("strategy ATR multipliers must be > 0".to_string());
        }
        if self.min_trend_strength < Decimal::ZERO || self.min_trend_strength > Decimal::ONE {
            errors.push("strategy.min_trend_strength must be in [0, 1]".to_string());
        }
        errors
    }
}

#[derive(Debug, Clone)]
struct CrossoverKeys {
    fast: IndicatorRef,
    slow: IndicatorRef,
    rsi: IndicatorRef,
    volume_ratio: IndicatorRef,
    adx: IndicatorRef,
    macd_hist: IndicatorRef,
    percent_b: IndicatorRef,
    atr: IndicatorRef,
}

/// Fast/slow moving-average crossover with momentum, volume and
/// trend-strength confirmation.
#[derive(Debug, Clone)]
pub struct CrossoverStrategy {
    name: String,
    params: CrossoverParams,
    keys: CrossoverKeys,
}

impl CrossoverStrategy {
    pub fn new(params: CrossoverParams) -> Self {
        let ma = |period| match params.ma_type {
            MovingAverageType::Sma => IndicatorRef::from(IndicatorKey::Sma(period)),
            MovingAverageType::Ema => IndicatorRef::from(IndicatorKey::Ema(period)),
        };
        let keys = CrossoverKeys {
            fast: ma(params.fast_period),
            slow: ma(params.slow_period),
            rsi: IndicatorKey::Rsi(params.rsi_period).into(),
            volume_ratio: IndicatorKey::VolumeRatio(params.volume_period).into(),
            adx: IndicatorKey::Adx(params.adx_period).into(),
            macd_hist: IndicatorKey::macd_histogram(
                params.macd_fast,
                params.macd_slow,
                params.macd_signal,
            )
            .into(),
            percent_b: IndicatorKey::bollinger(
                BollingerPart::PercentB,
                params.bb_period,
                params.bb_std_dev,
            )
            .into(),
            atr: IndicatorKey::Atr(params.atr_period).into(),
        };

        Self {
            name: format!("Crossover_{}/{}", params.fast_period, params.slow_period),
            params,
            keys,
        }
    }

    /// Cross between the two newest visible bars: +1 bullish, -1 bearish.
    fn detect_cross(&self, ctx: &StrategyContext<'_>) -> Option<Side> {
        let fast = ctx.indicator(&self.keys.fast, 0)?;
        let slow = ctx.indicator(&self.keys.slow, 0)?;
        let prev_fast = ctx.indicator(&self.keys.fast, 1)?;
        let prev_slow = ctx.indicator(&self.keys.slow, 1)?;

        if prev_fast <= prev_slow && fast > slow {
            Some(Side::Buy)
        } else if prev_fast >= prev_slow && fast < slow {
            Some(Side::Sell)
        } else {
            None
        }
    }

    /// Weighted blend in [0, 1] of MA alignment (0.3), ADX (0.3),
    /// MACD histogram direction (0.2) and Bollinger %B position (0.2).
    /// Undefined inputs contribute nothing.
    pub fn trend_strength(&self, ctx: &StrategyContext<'_>, side: Side) -> Decimal {
        let close = ctx.close(0);
        let fast = ctx.indicator(&self.keys.fast, 0);
        let slow = ctx.indicator(&self.keys.slow, 0);

        let alignment = match (close, fast, slow) {
            (Some(c), Some(f), Some(s)) => {
                let (stacked, crossed) = match side {
                    Side::Buy => (c > f && f > s, f > s),
                    Side::Sell => (c < f && f < s, f < s),
                };
                if stacked {
                    Decimal::ONE
                } else if crossed {
                    dec!(0.5)
                } else {
                    Decimal::ZERO
                }
            }
            _ => Decimal::ZERO,
        };

        let adx = ctx
            .indicator(&self.keys.adx, 0)
            .map(|adx| (adx / dec!(50)).min(Decimal::ONE))
            .unwrap_or(Decimal::ZERO);

        let momentum = match ctx.indicator(&self.keys.macd_hist, 0) {
            Some(hist) if side == Side::Buy && hist > Decimal::ZERO => Decimal::ONE,
            Some(hist) if side == Side::Sell && hist < Decimal::ZERO => Decimal::ONE,
            _ => Decimal::ZERO,
        };

        let band = ctx
            .indicator(&self.keys.percent_b, 0)
            .map(|pb| {
                let pb = pb.max(Decimal::ZERO).min(Decimal::ONE);
                match side {
                    Side::Buy => pb,
                    Side::Sell => Decimal::ONE - pb,
                }
            })
            .unwrap_or(Decimal::ZERO);

        dec!(0.3) * alignment + dec!(0.3) * adx + dec!(0.2) * momentum + dec!(0.2) * band
    }

    fn rsi_in_band(&self, ctx: &StrategyContext<'_>, side: Side) -> bool {
        let p = &self.params;
        match ctx.indicator(&self.keys.rsi, 0) {
            Some(rsi) => match side {
                Side::Buy => rsi >= p.rsi_long_min && rsi <= p.rsi_overbought,
                Side::Sell => rsi <= p.rsi_short_max && rsi >= p.rsi_oversold,
            },
            None => false,
        }
    }

    fn volume_confirms(&self, ctx: &StrategyContext<'_>) -> bool {
        ctx.indicator(&self.keys.volume_ratio, 0)
            .map(|ratio| ratio >= self.params.min_volume_ratio)
            .unwrap_or(false)
    }
}

impl StrategyEvaluator for CrossoverStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn warmup_candles(&self) -> usize {
        warmup_for(&self.required_indicators())
    }

    fn required_indicators(&self) -> Vec<IndicatorRef> {
        let k = &self.keys;
        vec![
            k.fast.clone(),
            k.slow.clone(),
            k.rsi.clone(),
            k.volume_ratio.clone(),
            k.adx.clone(),
            k.macd_hist.clone(),
            k.percent_b.clone(),
            k.atr.clone(),
        ]
    }

    fn evaluate(&self, ctx: &StrategyContext<'_>) -> StrategySignal {
        let Some(cross) = self.detect_cross(ctx) else {
            return StrategySignal::none();
        };

        if let Some(open_side) = ctx.position {
            // Opposite cross closes; a same-direction cross is ignored
            if cross != open_side {
                return StrategySignal::new(
                    Signal::from_side(cross),
                    Decimal::ONE,
                    format!(
                        "{} crossover exit",
                        if cross == Side::Buy { "bullish" } else { "bearish" }
                    ),
                );
            }
            return StrategySignal::none();
        }

        let p = &self.params;
        let strength = self.trend_strength(ctx, cross);

        let mut checks = Vec::with_capacity(3);
        if p.use_rsi_filter {
            checks.push(("rsi_band", self.rsi_in_band(ctx, cross)));
        }
        if p.use_volume_filter {
            checks.push(("volume_ratio", self.volume_confirms(ctx)));
        }
        if p.use_trend_filter {
            checks.push(("trend_strength", strength >= p.min_trend_strength));
        }

        let base_confidence = (dec!(0.5) + strength / dec!(2)).min(Decimal::ONE);
        let Some(confidence) =
            apply_filters(p.filter_mode, &self.name, &checks, base_confidence)
        else {
            return StrategySignal::none();
        };

        let Some(atr) = ctx.indicator(&self.keys.atr, 0) else {
            return StrategySignal::none();
        };

        StrategySignal::new(
            Signal::from_side(cross),
            confidence,
            format!(
                "{} crossover (trend strength {:.2})",
                if cross == Side::Buy { "bullish" } else { "bearish" },
                strength
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
    use crate::indicators::IndicatorCache;
    use crate::types::Candle;
    use chrono::{Duration, TimeZone, Utc};

    fn series(closes: &[Decimal]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                open_time: start + Duration::hours(i as i64),
                close_time: start + Duration::hours(i as i64 + 1),
                open: close,
                high: close + dec!(0.5),
                low: close - dec!(0.5),
                close,
                volume: dec!(100),
            })
            .collect()
    }

    fn relaxed() -> CrossoverParams {
        CrossoverParams {
            ma_type: MovingAverageType::Sma,
            fast_period: 2,
            slow_period: 4,
            use_rsi_filter: false,
            use_volume_filter: false,
            use_trend_filter: false,
            atr_period: 3,
            adx_period: 3,
            macd_fast: 2,
            macd_slow: 3,
            macd_signal: 2,
            bb_period: 3,
            rsi_period: 3,
            volume_period: 3,
            ..CrossoverParams::default()
        }
    }

    fn evaluate_at(
        strategy: &CrossoverStrategy,
        candles: &[Candle],
        step: usize,
        position: Option<Side>,
    ) -> StrategySignal {
        let cache = IndicatorCache::precompute(candles, &strategy.required_indicators());
        let ctx = StrategyContext {
            step,
            history: &candles[..step],
            indicators: cache.view(step),
            position,
        };
        strategy.evaluate(&ctx)
    }

    // Falling then rising: SMA(2) crosses above SMA(4) between index 8 and 9
    fn v_shape() -> Vec<Candle> {
        series(&[
            dec!(110), dec!(109), dec!(108), dec!(107), dec!(106), dec!(105), dec!(104),
            dec!(103), dec!(103), dec!(108), dec!(112), dec!(115),
        ])
    }

    #[test]
    fn test_bullish_cross_emits_buy_with_atr_offsets() {
        let strategy = CrossoverStrategy::new(relaxed());
        let candles = v_shape();
        let signal = evaluate_at(&strategy, &candles, 10, None);
        assert_eq!(signal.signal, Signal::Buy);
        assert!(matches!(signal.stop_loss, Some(ProtectiveLevel::Offset(_))));
        assert!(matches!(signal.take_profit, Some(ProtectiveLevel::Offset(_))));
        // no cross between 9 and 10
        assert!(evaluate_at(&strategy, &candles, 11, None).is_none());
    }

    #[test]
    fn test_opposite_cross_is_exit_signal() {
        let strategy = CrossoverStrategy::new(relaxed());
        let candles = v_shape();
        let signal = evaluate_at(&strategy, &candles, 10, Some(Side::Sell));
        assert_eq!(signal.signal, Signal::Buy);
        assert!(signal.stop_loss.is_none());
        assert!(evaluate_at(&strategy, &candles, 10, Some(Side::Buy)).is_none());
    }

    #[test]
    fn test_strict_filter_suppresses_and_advisory_keeps() {
        let candles = v_shape();
        let strict = CrossoverStrategy::new(CrossoverParams {
            use_volume_filter: true,
            min_volume_ratio: dec!(5),
            ..relaxed()
        });
        assert!(evaluate_at(&strict, &candles, 10, None).is_none());

        let advisory = CrossoverStrategy::new(CrossoverParams {
            use_volume_filter: true,
            min_volume_ratio: dec!(5),
            filter_mode: FilterMode::Advisory,
            ..relaxed()
        });
        let signal = evaluate_at(&advisory, &candles, 10, None);
        assert_eq!(signal.signal, Signal::Buy);
        let unfiltered = evaluate_at(&CrossoverStrategy::new(relaxed()), &candles, 10, None);
        assert!(signal.confidence < unfiltered.confidence);
    }

    #[test]
    fn test_trend_strength_is_bounded() {
        let strategy = CrossoverStrategy::new(relaxed());
        let candles = v_shape();
        let cache = IndicatorCache::precompute(&candles, &strategy.required_indicators());
        let ctx = StrategyContext {
            step: 12,
            history: &candles,
            indicators: cache.view(12),
            position: None,
        };
        for side in [Side::Buy, Side::Sell] {
            let strength = strategy.trend_strength(&ctx, side);
            assert!(strength >= Decimal::ZERO && strength <= Decimal::ONE);
        }
        let bullish = strategy.trend_strength(&ctx, Side::Buy);
        assert!(bullish > strategy.trend_strength(&ctx, Side::Sell));
    }

    #[test]
    fn test_insufficient_history_is_none() {
        let strategy = CrossoverStrategy::new(relaxed());
        let candles = v_shape();
        assert!(evaluate_at(&strategy, &candles, 2, None).is_none());
    }

    #[test]
    fn test_validation() {
        assert!(CrossoverParams::default().validate().is_empty());
        let invalid = CrossoverParams {
            fast_period: 30,
            slow_period: 20,
            ..CrossoverParams::default()
        };
        assert_eq!(invalid.validate().len(), 1);

        let huge = CrossoverParams {
            slow_period: usize::MAX,
            ..CrossoverParams::default()
        };
        assert_eq!(
            huge.validate(),
            vec!["strategy.slow_period must be between 1 and 10000".to_string()]
        );
    }
}
