pub mod crossover;
pub mod multi_timeframe;
pub mod session_reentry;

pub use crossover::*;
pub use multi_timeframe::*;
pub use session_reentry::*;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::errors::Result;
use crate::indicators::{IndicatorRef, IndicatorView};
use crate::types::{Candle, Side, Signal};

/// Confidence removed per failed filter in advisory mode.
const ADVISORY_PENALTY: Decimal = dec!(0.15);

/// Decision rule a backtest run drives one step at a time.
///
/// `evaluate` only sees candles `0..step` and indicator values up to `step - 1`;
/// anything computed in `prepare` must be read through the same bound.
pub trait StrategyEvaluator: Send + Sync {
    fn name(&self) -> &str;

    /// First step at which `evaluate` can produce a signal.
    fn warmup_candles(&self) -> usize;

    /// Indicators the engine precomputes over the base candles.
    fn required_indicators(&self) -> Vec<IndicatorRef>;

    /// Per-run setup over the immutable candle set.
    fn prepare(&mut self, _candles: &[Candle]) -> Result<()> {
        Ok(())
    }

    fn evaluate(&self, ctx: &StrategyContext<'_>) -> StrategySignal;
}

/// Everything visible when deciding what to do at the open of candle `step`.
#[derive(Debug, Clone, Copy)]
pub struct StrategyContext<'a> {
    pub step: usize,
    /// Candles `0..step`.
    pub history: &'a [Candle],
    pub indicators: IndicatorView<'a>,
    /// Side of the open position, if any.
    pub position: Option<Side>,
}

impl<'a> StrategyContext<'a> {
    /// Candle `bars_ago` bars before the newest visible one.
    pub fn candle(&self, bars_ago: usize) -> Option<&'a Candle> {
        let index = self.history.len().checked_sub(bars_ago + 1)?;
        self.history.get(index)
    }

    pub fn close(&self, bars_ago: usize) -> Option<Decimal> {
        self.candle(bars_ago).map(|c| c.close)
    }

    pub fn indicator(&self, key: &IndicatorRef, bars_ago: usize) -> Option<Decimal> {
        self.indicators.value(key, bars_ago)
    }
}

/// Stop-loss / take-profit as an absolute price or a distance from the fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectiveLevel {
    Price(Decimal),
    Offset(Decimal),
}

impl ProtectiveLevel {
    pub fn resolve_stop(&self, fill: Decimal, side: Side) -> Decimal {
        match *self {
            ProtectiveLevel::Price(price) => price,
            ProtectiveLevel::Offset(distance) => match side {
                Side::Buy => fill - distance,
                Side::Sell => fill + distance,
            },
        }
    }

    pub fn resolve_target(&self, fill: Decimal, side: Side) -> Decimal {
        match *self {
            ProtectiveLevel::Price(price) => price,
            ProtectiveLevel::Offset(distance) => match side {
                Side::Buy => fill + distance,
                Side::Sell => fill - distance,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrategySignal {
    pub signal: Signal,
    pub confidence: Decimal,
    pub stop_loss: Option<ProtectiveLevel>,
    pub take_profit: Option<ProtectiveLevel>,
    pub reason: String,
}

impl StrategySignal {
    pub fn none() -> Self {
        Self {
            signal: Signal::Neutral,
            confidence: Decimal::ZERO,
            stop_loss: None,
            take_profit: None,
            reason: String::new(),
        }
    }

    pub fn new(signal: Signal, confidence: Decimal, reason: impl Into<String>) -> Self {
        Self {
            signal,
            confidence: confidence.max(Decimal::ZERO).min(Decimal::ONE),
            stop_loss: None,
            take_profit: None,
            reason: reason.into(),
        }
    }

    pub fn with_levels(mut self, stop_loss: ProtectiveLevel, take_profit: ProtectiveLevel) -> Self {
        self.stop_loss = Some(stop_loss);
        self.take_profit = Some(take_profit);
        self
    }

    pub fn side(&self) -> Option<Side> {
        self.signal.side()
    }

    pub fn is_none(&self) -> bool {
        self.signal == Signal::Neutral
    }

    pub fn should_trade(&self, min_confidence: Decimal) -> bool {
        self.confidence >= min_confidence && !self.is_none()
    }
}

/// What a failed, enabled confirmation filter does to a signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    /// Any failed filter suppresses the signal.
    #[default]
    Strict,
    /// Failures are logged and lower confidence; the signal survives.
    Advisory,
}

/// Applies the filter mode to a set of named checks. Returns the adjusted
/// confidence, or `None` when the signal is suppressed.
pub fn apply_filters(
    mode: FilterMode,
    strategy: &str,
    checks: &[(&str, bool)],
    confidence: Decimal,
) -> Option<Decimal> {
    let failed: Vec<&str> = checks.iter().filter(|(_, ok)| !ok).map(|(name, _)| *name).collect();
    if failed.is_empty() {
        return Some(confidence);
    }
    match mode {
        FilterMode::Strict => {
            debug!("[{}] signal suppressed, failed filters: {}", strategy, failed.join(", "));
            None
        }
        FilterMode::Advisory => {
            debug!("[{}] failed filters (advisory): {}", strategy, failed.join(", "));
            let penalty = ADVISORY_PENALTY * Decimal::from(failed.len() as u32);
            Some((confidence - penalty).max(Decimal::ZERO))
        }
    }
}

/// Parameter set for each strategy family, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyParams {
    Crossover(CrossoverParams),
    MultiTimeframeMomentum(MultiTimeframeParams),
    SessionReentry(SessionReentryParams),
}

impl Default for StrategyParams {
    fn default() -> Self {
        StrategyParams::Crossover(CrossoverParams::default())
    }
}

impl StrategyParams {
    pub fn kind(&self) -> &'static str {
        match self {
            StrategyParams::Crossover(_) => "crossover",
            StrategyParams::MultiTimeframeMomentum(_) => "multi_timeframe_momentum",
            StrategyParams::SessionReentry(_) => "session_reentry",
        }
    }

    pub fn validate(&self) -> Vec<String> {
        match self {
            StrategyParams::Crossover(p) => p.validate(),
            StrategyParams::MultiTimeframeMomentum(p) => p.validate(),
            StrategyParams::SessionReentry(p) => p.validate(),
        }
    }
}

impl fmt::Display for StrategyParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind())
    }
}

/// The closed set of strategy families.
#[derive(Debug, Clone)]
pub enum Strategy {
    Crossover(CrossoverStrategy),
    MultiTimeframe(MultiTimeframeStrategy),
    SessionReentry(SessionReentryStrategy),
}

impl Strategy {
    pub fn from_params(params: &StrategyParams) -> Result<Self> {
        Ok(match params {
            StrategyParams::Crossover(p) => Strategy::Crossover(CrossoverStrategy::new(p.clone())),
            StrategyParams::MultiTimeframeMomentum(p) => {
                Strategy::MultiTimeframe(MultiTimeframeStrategy::new(p.clone()))
            }
            StrategyParams::SessionReentry(p) => {
                Strategy::SessionReentry(SessionReentryStrategy::new(p.clone())?)
            }
        })
    }

    fn inner(&self) -> &dyn StrategyEvaluator {
        match self {
            Strategy::Crossover(s) => s,
            Strategy::MultiTimeframe(s) => s,
            Strategy::SessionReentry(s) => s,
        }
    }
}

impl StrategyEvaluator for Strategy {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn warmup_candles(&self) -> usize {
        self.inner().warmup_candles()
    }

    fn required_indicators(&self) -> Vec<IndicatorRef> {
        self.inner().required_indicators()
    }

    fn prepare(&mut self, candles: &[Candle]) -> Result<()> {
        match self {
            Strategy::Crossover(s) => s.prepare(candles),
            Strategy::MultiTimeframe(s) => s.prepare(candles),
            Strategy::SessionReentry(s) => s.prepare(candles),
        }
    }

    fn evaluate(&self, ctx: &StrategyContext<'_>) -> StrategySignal {
        self.inner().evaluate(ctx)
    }
}

/// Steps needed before every key has a value two bars back.
pub(crate) fn warmup_for(keys: &[IndicatorRef]) -> usize {
    keys.iter().map(IndicatorRef::warmup).max().unwrap_or(0) + 2
}
