use chrono::{Duration, NaiveDate, NaiveTime};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    apply_filters, warmup_for, FilterMode, ProtectiveLevel, StrategyContext, StrategyEvaluator,
    StrategySignal,
};
use crate::errors::{BacktestError, Result};
use crate::indicators::{check_periods, IndicatorKey, IndicatorRef};
use crate::types::{Candle, Side, Signal};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionReentryParams {
    /// IANA zone name, e.g. "America/New_York".
    pub timezone: String,
    /// Local wall-clock window, "HH:MM" or "HH:MM:SS". Start after end wraps midnight.
    pub session_start: String,
    pub session_end: String,
    /// Hours after the session's last bar during which its range stays tradable.
    pub range_valid_hours: Option<u32>,

    /// Reference moving average: long only above it, short only below it.
    pub trend_filter: String,
    pub exit_on_trend_flip: bool,

    pub use_adx_filter: bool,
    pub adx_period: usize,
    pub min_adx: Decimal,

    pub use_rsi_filter: bool,
    pub rsi_period: usize,
    pub rsi_overbought: Decimal,
    pub rsi_oversold: Decimal,

    pub use_macd_filter: bool,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,

    pub use_volume_filter: bool,
    pub volume_period: usize,
    pub min_volume_ratio: Decimal,

    /// Stop sits this many ATRs beyond the breakout extreme.
    pub atr_period: usize,
    pub stop_atr_buffer: Decimal,

    pub filter_mode: FilterMode,
}

impl Default for SessionReentryParams {
    fn default() -> Self {
        Self {
            timezone: "America/New_York".to_string(),
            session_start: "00:00".to_string(),
            session_end: "08:00".to_string(),
            range_valid_hours: Some(16),
            trend_filter: "ema_200".to_string(),
            exit_on_trend_flip: true,
            use_adx_filter: true,
            adx_period: 14,
            min_adx: dec!(20),
            use_rsi_filter: true,
            rsi_period: 14,
            rsi_overbought: dec!(70),
            rsi_oversold: dec!(30),
            use_macd_filter: true,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            use_volume_filter: true,
            volume_period: 20,
            min_volume_ratio: dec!(1.0),
            atr_period: 14,
            stop_atr_buffer: dec!(0.5),
            filter_mode: FilterMode::Strict,
        }
    }
}

impl SessionReentryParams {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.timezone.parse::<Tz>().is_err() {
            errors.push(format!("strategy.timezone '{}' is not a known time zone", self.timezone));
        }
        match (parse_session_time(&self.session_start), parse_session_time(&self.session_end)) {
            (Some(start), Some(end)) if start == end => {
                errors.push(
                    "strategy.session_start and strategy.session_end must differ".to_string(),
                );
            }
            (Some(_), Some(_)) => {}
            _ => errors.push("strategy session times must be HH:MM or HH:MM:SS".to_string()),
        }
        if self.macd_fast >= self.macd_slow {
            errors.push("strategy.macd_fast must be < strategy.macd_slow".to_string());
        }
        if self.rsi_oversold >= self.rsi_overbought {
            errors.push("strategy.rsi_oversold must be < strategy.rsi_overbought".to_string());
        }
        errors.extend(check_periods(
            "strategy",
            &[
                ("adx_period", self.adx_period),
                ("rsi_period", self.rsi_period),
                ("macd_fast", self.macd_fast),
                ("macd_slow", self.macd_slow),
                ("macd_signal", self.macd_signal),
                ("volume_period", self.volume_period),
                ("atr_period", self.atr_period),
            ],
        ));
        if self.stop_atr_buffer < Decimal::ZERO {
            errors.push("strategy.stop_atr_buffer must be >= 0".to_string());
        }
        errors
    }
}

fn parse_session_time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S"))
        .ok()
}

/// Daily window in a named zone. Membership is decided on local wall-clock
/// time, so DST shifts move the window in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionWindow {
    pub tz: Tz,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl SessionWindow {
    pub fn new(tz: Tz, start: NaiveTime, end: NaiveTime) -> Self {
        Self { tz, start, end }
    }

    pub fn wraps_midnight(&self) -> bool {
        self.start > self.end
    }

    /// Local trading date of the session containing `candle`, if it is in one.
    pub fn session_date(&self, candle: &Candle) -> Option<NaiveDate> {
        let local = candle.open_time.with_timezone(&self.tz);
        let time = local.time();
        let date = local.date_naive();

        if self.wraps_midnight() {
            if time >= self.start {
                Some(date)
            } else if time < self.end {
                date.pred_opt()
            } else {
                None
            }
        } else if time >= self.start && time < self.end {
            Some(date)
        } else {
            None
        }
    }
}

/// High/low of one completed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRange {
    pub date: NaiveDate,
    pub high: Decimal,
    pub low: Decimal,
    /// Base index of the last candle inside the session.
    pub last_index: usize,
}

/// `out[j]` is the newest session range completed using candles `0..=j` only.
pub fn completed_ranges(candles: &[Candle], window: &SessionWindow) -> Vec<Option<SessionRange>> {
    let mut out = Vec::with_capacity(candles.len());
    let mut forming: Option<SessionRange> = None;
    let mut latest: Option<SessionRange> = None;

    for (j, candle) in candles.iter().enumerate() {
        match window.session_date(candle) {
            Some(date) => {
                let continues = forming.as_ref().map_or(false, |r| r.date == date);
                if continues {
                    if let Some(range) = forming.as_mut() {
                        range.high = range.high.max(candle.high);
                        range.low = range.low.min(candle.low);
                        range.last_index = j;
                    }
                } else {
                    // a new session began without an out-of-session bar in between
                    if let Some(done) = forming.take() {
                        latest = Some(done);
                    }
                    forming = Some(SessionRange {
                        date,
                        high: candle.high,
                        low: candle.low,
                        last_index: j,
                    });
                }
            }
            None => {
                if let Some(done) = forming.take() {
                    latest = Some(done);
                }
            }
        }
        out.push(latest);
    }
    out
}

/// Breakout of a completed session range that closes back inside it,
/// traded in the direction of a reference moving average.
#[derive(Debug, Clone)]
pub struct SessionReentryStrategy {
    name: String,
    params: SessionReentryParams,
    window: SessionWindow,
    trend: IndicatorRef,
    adx: IndicatorRef,
    rsi: IndicatorRef,
    macd_hist: IndicatorRef,
    volume_ratio: IndicatorRef,
    atr: IndicatorRef,
    ranges: Vec<Option<SessionRange>>,
}

impl SessionReentryStrategy {
    pub fn new(params: SessionReentryParams) -> Result<Self> {
        let tz: Tz = params
            .timezone
            .parse()
            .map_err(|_| BacktestError::UnknownTimeZone(params.timezone.clone()))?;
        let start = parse_session_time(&params.session_start)
            .ok_or_else(|| {
                BacktestError::InvalidConfig(format!(
                    "bad session_start '{}'",
                    params.session_start
                ))
            })?;
        let end = parse_session_time(&params.session_end)
            .ok_or_else(|| {
                BacktestError::InvalidConfig(format!("bad session_end '{}'", params.session_end))
            })?;

        Ok(Self {
            name: format!(
                "SessionReentry_{}_{}-{}",
                tz.name(),
                start.format("%H%M"),
                end.format("%H%M")
            ),
            window: SessionWindow::new(tz, start, end),
            trend: IndicatorRef::parse(&params.trend_filter),
            adx: IndicatorKey::Adx(params.adx_period).into(),
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
            ranges: Vec::new(),
        })
    }

    pub fn window(&self) -> &SessionWindow {
        &self.window
    }

    /// Range usable for a decision at `step`: completed before bar `step - 2`
    /// and, if configured, not stale.
    fn active_range(&self, ctx: &StrategyContext<'_>) -> Option<SessionRange> {
        let newest = ctx.step.checked_sub(1)?;
        let range = (*self.ranges.get(newest)?)?;
        if range.last_index + 2 > newest {
            return None;
        }
        if let Some(hours) = self.params.range_valid_hours {
            let range_end = ctx.history.get(range.last_index)?.close_time;
            let now = ctx.candle(0)?.close_time;
            if now - range_end > Duration::hours(hours as i64) {
                return None;
            }
        }
        Some(range)
    }

    fn filter_checks(&self, ctx: &StrategyContext<'_>, side: Side) -> Vec<(&'static str, bool)> {
        let p = &self.params;
        let mut checks = Vec::with_capacity(4);
        if p.use_adx_filter {
            let ok = ctx.indicator(&self.adx, 0).map(|adx| adx >= p.min_adx).unwrap_or(false);
            checks.push(("adx", ok));
        }
        if p.use_rsi_filter {
            let ok = ctx
                .indicator(&self.rsi, 0)
                .map(|rsi| match side {
                    Side::Buy => rsi < p.rsi_overbought,
                    Side::Sell => rsi > p.rsi_oversold,
                })
                .unwrap_or(false);
            checks.push(("rsi_band", ok));
        }
        if p.use_macd_filter {
            let ok = match (ctx.indicator(&self.macd_hist, 0), ctx.indicator(&self.macd_hist, 1)) {
                (Some(hist), Some(prev)) => match side {
                    Side::Buy => hist > prev,
                    Side::Sell => hist < prev,
                },
                _ => false,
            };
            checks.push(("macd_momentum", ok));
        }
        if p.use_volume_filter {
            let ok = ctx
                .indicator(&self.volume_ratio, 0)
                .map(|ratio| ratio >= p.min_volume_ratio)
                .unwrap_or(false);
            checks.push(("volume_ratio", ok));
        }
        checks
    }
}

impl StrategyEvaluator for SessionReentryStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn warmup_candles(&self) -> usize {
        warmup_for(&self.required_indicators())
    }

    fn required_indicators(&self) -> Vec<IndicatorRef> {
        vec![
            self.trend.clone(),
            self.adx.clone(),
            self.rsi.clone(),
            self.macd_hist.clone(),
            self.volume_ratio.clone(),
            self.atr.clone(),
        ]
    }

    fn prepare(&mut self, candles: &[Candle]) -> Result<()> {
        self.ranges = completed_ranges(candles, &self.window);
        let first = self.ranges.iter().position(Option::is_some);
        debug!("[{}] first completed session range at index {:?}", self.name, first);
        Ok(())
    }

    fn evaluate(&self, ctx: &StrategyContext<'_>) -> StrategySignal {
        let p = &self.params;
        // An unknown or unwarmed trend filter disables the strategy
        let Some(trend) = ctx.indicator(&self.trend, 0) else {
            return StrategySignal::none();
        };
        let (Some(prev_bar), Some(last_bar)) = (ctx.candle(1), ctx.candle(0)) else {
            return StrategySignal::none();
        };

        if let Some(open_side) = ctx.position {
            let flipped = match open_side {
                Side::Buy => last_bar.close < trend,
                Side::Sell => last_bar.close > trend,
            };
            if p.exit_on_trend_flip && flipped {
                return StrategySignal::new(
                    Signal::from_side(open_side.opposite()),
                    Decimal::ONE,
                    "close crossed reference average",
                );
            }
            return StrategySignal::none();
        }

        let Some(range) = self.active_range(ctx) else {
            return StrategySignal::none();
        };

        let side = if prev_bar.close < range.low
            && last_bar.close > range.low
            && last_bar.close > trend
        {
            Side::Buy
        } else if prev_bar.close > range.high
            && last_bar.close < range.high
            && last_bar.close < trend
        {
            Side::Sell
        } else {
            return StrategySignal::none();
        };

        let checks = self.filter_checks(ctx, side);
        let passed = checks.iter().filter(|(_, ok)| *ok).count();
        let base_confidence = if checks.is_empty() {
            Decimal::ONE
        } else {
            let share = Decimal::from(passed as u32) / Decimal::from(checks.len() as u32);
            dec!(0.6) + dec!(0.4) * share
        };
        let Some(confidence) =
            apply_filters(p.filter_mode, &self.name, &checks, base_confidence)
        else {
            return StrategySignal::none();
        };

        let Some(atr) = ctx.indicator(&self.atr, 0) else {
            return StrategySignal::none();
        };
        let buffer = atr * p.stop_atr_buffer;
        let (stop, target) = match side {
            Side::Buy => (prev_bar.low.min(last_bar.low) - buffer, range.high),
            Side::Sell => (prev_bar.high.max(last_bar.high) + buffer, range.low),
        };

        StrategySignal::new(
            Signal::from_side(side),
            confidence,
            format!(
                "{} reentry of {} session range [{}, {}]",
                side, range.date, range.low, range.high
            ),
        )
        .with_levels(ProtectiveLevel::Price(stop), ProtectiveLevel::Price(target))
    }
}
