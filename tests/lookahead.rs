//! Nothing computed for step `i` may depend on candle `i` or later.

mod common;

use candle_backtester::config::BacktestConfig;
use candle_backtester::engine::BacktestEngine;
use candle_backtester::indicators::{IndicatorCache, IndicatorRef};
use candle_backtester::strategies::{
    CrossoverParams, FilterMode, MultiTimeframeParams, SessionReentryParams, Strategy,
    StrategyContext, StrategyEvaluator, StrategyParams, StrategySignal,
};
use candle_backtester::types::{Candle, MarketType, Side};
use common::from_closes;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const INDICATOR_KEYS: &[&str] = &[
    "sma_10",
    "ema_10",
    "rsi_14",
    "atr_14",
    "adx_14",
    "plus_di_14",
    "minus_di_14",
    "macd_line_12_26_9",
    "macd_signal_12_26_9",
    "macd_hist_12_26_9",
    "bb_upper_20_2",
    "bb_middle_20_2",
    "bb_lower_20_2",
    "bb_pctb_20_2",
    "bb_width_20_2",
    "volume_sma_20",
    "volume_ratio_20",
];

/// Deterministic choppy series with trends in both directions.
fn market(len: usize) -> Vec<Candle> {
    let mut state: u64 = 7;
    let mut price = dec!(100);
    let closes: Vec<Decimal> = (0..len)
        .map(|i| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let noise = Decimal::from(((state >> 33) % 200) as i64 - 100) / dec!(100);
            let drift = if (i / 60) % 2 == 0 { dec!(0.35) } else { dec!(-0.3) };
            price = (price + drift + noise).max(dec!(10));
            price
        })
        .collect();
    from_closes(&closes)
}

/// Scales every candle from `from` on, keeping timestamps and OHLC shape valid.
fn mutate_from(candles: &[Candle], from: usize) -> Vec<Candle> {
    let mut mutated = candles.to_vec();
    for candle in mutated.iter_mut().skip(from) {
        candle.open *= dec!(1.5);
        candle.high *= dec!(1.5);
        candle.low *= dec!(1.5);
        candle.close *= dec!(1.5);
        candle.volume *= dec!(3);
    }
    mutated
}

#[test]
fn test_indicator_prefix_ignores_future_candles() {
    let candles = market(150);
    let refs: Vec<IndicatorRef> = INDICATOR_KEYS.iter().map(|k| IndicatorRef::parse(k)).collect();
    assert!(refs.iter().all(|r| matches!(r, IndicatorRef::Known(_))));

    let full = IndicatorCache::precompute(&candles, &refs);
    for i in [30, 61, 99, 148] {
        let mutated = mutate_from(&candles, i + 1);
        let cache = IndicatorCache::precompute(&mutated, &refs);
        for key in &refs {
            let original = &full.full_series(key).unwrap()[..=i];
            let changed = &cache.full_series(key).unwrap()[..=i];
            assert_eq!(original, changed, "{} changed at or before index {}", key, i);
        }
    }
}

#[test]
fn test_indicator_view_matches_truncated_input() {
    let candles = market(120);
    let refs: Vec<IndicatorRef> = INDICATOR_KEYS.iter().map(|k| IndicatorRef::parse(k)).collect();
    let full = IndicatorCache::precompute(&candles, &refs);

    for step in [40, 77, 119] {
        let truncated = IndicatorCache::precompute(&candles[..step], &refs);
        let view = full.view(step);
        for key in &refs {
            assert_eq!(view.series(key), &truncated.full_series(key).unwrap()[..], "{}", key);
        }
    }
}

fn signal_at(
    strategy: &mut Strategy,
    candles: &[Candle],
    step: usize,
    position: Option<Side>,
) -> StrategySignal {
    strategy.prepare(candles).unwrap();
    let cache = IndicatorCache::precompute(candles, &strategy.required_indicators());
    let ctx = StrategyContext {
        step,
        history: &candles[..step],
        indicators: cache.view(step),
        position,
    };
    strategy.evaluate(&ctx)
}

fn strategies() -> Vec<StrategyParams> {
    vec![
        StrategyParams::Crossover(CrossoverParams {
            fast_period: 3,
            slow_period: 8,
            filter_mode: FilterMode::Advisory,
            ..CrossoverParams::default()
        }),
        StrategyParams::MultiTimeframeMomentum(MultiTimeframeParams {
            timeframes: vec![1, 2, 4],
            rsi_period: 7,
            macd_fast: 5,
            macd_slow: 10,
            macd_signal: 4,
            filter_mode: FilterMode::Advisory,
            ..MultiTimeframeParams::default()
        }),
        StrategyParams::SessionReentry(SessionReentryParams {
            timezone: "UTC".to_string(),
            session_start: "00:00".to_string(),
            session_end: "06:00".to_string(),
            trend_filter: "ema_20".to_string(),
            filter_mode: FilterMode::Advisory,
            ..SessionReentryParams::default()
        }),
    ]
}

#[test]
fn test_strategy_signals_ignore_current_and_future_candles() {
    let candles = market(240);

    for params in strategies() {
        let mut strategy = Strategy::from_params(&params).unwrap();
        let warmup = strategy.warmup_candles();
        assert!(warmup < candles.len(), "{} warm-up {}", params, warmup);

        let mut emitted = 0;
        for step in warmup..candles.len() {
            let mutated = mutate_from(&candles, step);
            for position in [None, Some(Side::Buy), Some(Side::Sell)] {
                let original = signal_at(&mut strategy, &candles, step, position);
                let changed = signal_at(&mut strategy, &mutated, step, position);
                assert_eq!(original, changed, "{} diverged at step {}", params, step);
                if !original.is_none() {
                    emitted += 1;
                }
            }
        }
        if let StrategyParams::Crossover(_) = params {
            assert!(emitted > 0, "crossover never signalled");
        }
    }
}

#[test]
fn test_engine_history_ignores_future_candles() {
    let candles = market(240);
    let config = BacktestConfig {
        market: MarketType::Perpetual,
        leverage: 2,
        trailing_stop_pct: Some(dec!(2)),
        strategy: strategies().remove(0),
        ..BacktestConfig::default()
    };
    let original = BacktestEngine::new(config.clone()).unwrap().run(&candles).unwrap();

    let cut = 180;
    let changed = BacktestEngine::new(config).unwrap().run(&mutate_from(&candles, cut)).unwrap();

    assert_eq!(
        original.equity_curve[..cut].iter().map(|p| p.balance).collect::<Vec<_>>(),
        changed.equity_curve[..cut].iter().map(|p| p.balance).collect::<Vec<_>>()
    );
    let closed_before_cut = |r: &candle_backtester::engine::BacktestResult| {
        r.trades
            .iter()
            .filter(|t| t.exit_time <= candles[cut].open_time)
            .cloned()
            .collect::<Vec<_>>()
    };
    assert_eq!(closed_before_cut(&original), closed_before_cut(&changed));
}
