use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info, warn};

use crate::config::BacktestConfig;
use crate::errors::{BacktestError, Result};
use crate::exchange::{
    round_to_tick_size, validate_order, ConstraintProvider, ExchangeConstraints,
};
use crate::indicators::{IndicatorCache, IndicatorKey, IndicatorRef, VolatilityLevel};
use crate::risk::{PositionSizer, SizingRequest};
use crate::strategies::{Strategy, StrategyContext, StrategyEvaluator, StrategySignal};
use crate::types::{Candle, FillTiming, MarketType, Position, Side};

use super::account::Account;
use super::exits::{check_protective_levels, trailing_stop_hit, ExitTrigger};
use super::results::{
    BacktestResult, EquityPoint, ExitReason, MetricsCalculator, SkippedEntry, TradeRecord,
};

/// Decimal places kept for margin and fees so account sums stay exact.
const CASH_DP: u32 = 8;

/// Candle-by-candle simulator for one symbol and one strategy.
///
/// The engine itself is immutable between runs; every call to [`run`] starts
/// from a fresh account, so repeated runs over the same input are identical.
///
/// [`run`]: BacktestEngine::run
pub struct BacktestEngine<S: StrategyEvaluator = Strategy> {
    config: BacktestConfig,
    constraints: ExchangeConstraints,
    sizer: PositionSizer,
    sizing_atr: IndicatorRef,
    strategy: S,
}

impl BacktestEngine<Strategy> {
    /// Builds the strategy named by `config.strategy`.
    pub fn new(config: BacktestConfig) -> Result<Self> {
        let constraints = config.resolve_constraints();
        config.validate_against(&constraints).map_err(BacktestError::from_messages)?;
        let strategy = Strategy::from_params(&config.strategy)?;
        Ok(Self::assemble(config, strategy, constraints))
    }
}

impl<S: StrategyEvaluator> BacktestEngine<S> {
    pub fn with_strategy(config: BacktestConfig, strategy: S) -> Result<Self> {
        let provider = config.constraint_provider();
        Self::with_provider(config, strategy, &provider)
    }

    /// Resolves constraints from `provider`; the leverage cap is checked
    /// against that table rather than the built-in one.
    pub fn with_provider(
        config: BacktestConfig,
        strategy: S,
        provider: &dyn ConstraintProvider,
    ) -> Result<Self> {
        let constraints = config.apply_fee_override(provider.constraints_for(&config.symbol));
        config.validate_against(&constraints).map_err(BacktestError::from_messages)?;
        Ok(Self::assemble(config, strategy, constraints))
    }

    fn assemble(config: BacktestConfig, strategy: S, constraints: ExchangeConstraints) -> Self {
        let sizer = PositionSizer::new(config.sizing.clone());
        let sizing_atr = IndicatorKey::Atr(config.sizing.atr_period).into();

        Self {
            config,
            constraints,
            sizer,
            sizing_atr,
            strategy,
        }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn constraints(&self) -> &ExchangeConstraints {
        &self.constraints
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Runs the simulation over `candles`. Input problems fail before the
    /// first step; nothing after that aborts the run.
    pub fn run(&mut self, candles: &[Candle]) -> Result<BacktestResult> {
        Candle::validate_series(candles)?;

        let warmup = self.strategy.warmup_candles();
        if candles.len() <= warmup {
            return Err(BacktestError::InsufficientHistory {
                required: warmup + 1,
                available: candles.len(),
            });
        }

        self.strategy.prepare(candles)?;

        let mut keys = self.strategy.required_indicators();
        keys.push(self.sizing_atr.clone());
        let cache = IndicatorCache::precompute(candles, &keys);

        info!(
            "Backtesting {} on {} | {} candles, warm-up {}, {} market, {}x leverage",
            self.strategy.name(),
            self.constraints.symbol,
            candles.len(),
            warmup,
            self.config.market,
            self.config.leverage
        );

        let mut state = RunState::new(self.config.initial_balance);
        let last = candles.len() - 1;

        for (step, candle) in candles.iter().enumerate() {
            let ctx = StrategyContext {
                step,
                history: &candles[..step],
                indicators: cache.view(step),
                position: state.position.as_ref().map(|p| p.side),
            };

            let mut closed_this_step = false;
            if let Some(trigger) = self.check_exits(&mut state, candle, &ctx) {
                self.close_position(&mut state, candle, trigger);
                closed_this_step = true;
            }

            if step == last && state.position.is_some() {
                let trigger = ExitTrigger::market(ExitReason::EndOfData, self.fill_price(candle));
                debug!("Closing open position at end of data");
                self.close_position(&mut state, candle, trigger);
            } else if state.position.is_none()
                && !closed_this_step
                && step >= warmup
                && step < last
            {
                self.try_entry(&mut state, candle, &ctx);
            }

            state.record_equity(candle);
        }

        let result = MetricsCalculator::calculate(
            &self.constraints.symbol,
            self.strategy.name(),
            self.config.initial_balance,
            state.account.balance(),
            state.trades,
            state.skipped,
            state.equity_curve,
        );

        info!(
            "Backtest complete: {} trades, {} skipped, balance {:.2} ({:.2}%), drawdown {:.2}%",
            result.total_trades,
            result.skipped_entries.len(),
            result.final_balance,
            result.total_return_pct,
            result.max_drawdown_pct
        );

        Ok(result)
    }

    /// Exit priority: trailing stop, intrabar stop-loss / take-profit,
    /// strategy exit, holding-time expiry.
    fn check_exits(
        &self,
        state: &mut RunState,
        candle: &Candle,
        ctx: &StrategyContext<'_>,
    ) -> Option<ExitTrigger> {
        let position = state.position.as_mut()?;
        let fill = self.fill_price(candle);

        if let Some(trailing) = self.config.trailing_stop_pct {
            let pnl_pct = position.pnl_percentage(fill);
            let peak = position.peak_pnl_pct;
            if trailing_stop_hit(&mut position.peak_pnl_pct, pnl_pct, trailing) {
                debug!(
                    "Trailing stop triggered: peak={:.2}%, current={:.2}%, trail={}%",
                    peak, pnl_pct, trailing
                );
                return Some(ExitTrigger::market(ExitReason::TrailingStop, fill));
            }
        }

        if let Some(trigger) = check_protective_levels(position, candle) {
            debug!(
                "{} triggered: high={} low={} open={} -> {}",
                trigger.reason, candle.high, candle.low, candle.open, trigger.price
            );
            return Some(trigger);
        }

        let signal = self.strategy.evaluate(ctx);
        if signal.side() == Some(position.side.opposite()) {
            debug!("Strategy exit: {}", signal.reason);
            return Some(ExitTrigger::market(ExitReason::StrategyExit, fill));
        }

        if let Some(hours) = self.config.max_holding_hours {
            if self.fill_time(candle) - position.entry_time >= Duration::hours(i64::from(hours)) {
                debug!("Holding time of {}h expired", hours);
                return Some(ExitTrigger::market(ExitReason::TimeExpired, fill));
            }
        }

        None
    }

    fn close_position(&self, state: &mut RunState, candle: &Candle, trigger: ExitTrigger) {
        let position = match state.position.take() {
            Some(p) => p,
            None => return,
        };

        let exit_price = if trigger.is_limit() {
            round_to_tick_size(trigger.price, self.constraints.tick_size)
        } else {
            self.slipped_price(trigger.price, position.side.opposite())
        };
        let exit_time = match trigger.reason {
            ExitReason::StopLoss | ExitReason::TakeProfit => candle.close_time,
            _ => self.fill_time(candle),
        };

        let fee = (position.quantity * exit_price * self.constraints.fee_rate(trigger.liquidity))
            .round_dp(CASH_DP);
        let gross_pnl = position.calculate_pnl(exit_price);
        state.account.close(position.margin, gross_pnl, fee);

        let pnl = gross_pnl - position.entry_fee - fee;
        let return_pct = if position.margin.is_zero() {
            Decimal::ZERO
        } else {
            pnl / position.margin * dec!(100)
        };

        debug!(
            "Closed #{} {} {} @ {} -> {} ({}) | P&L ${:.2} ({:.2}%)",
            position.id,
            position.side,
            position.quantity,
            position.entry_price,
            exit_price,
            trigger.reason,
            pnl,
            return_pct
        );

        state.trades.push(TradeRecord {
            id: position.id,
            symbol: self.constraints.symbol.clone(),
            side: position.side,
            entry_time: position.entry_time,
            exit_time,
            entry_price: position.entry_price,
            exit_price,
            quantity: position.quantity,
            margin: position.margin,
            gross_pnl,
            pnl,
            return_pct,
            fees: position.entry_fee + fee,
            strategy: position.strategy,
            exit_reason: trigger.reason,
        });
    }

    fn try_entry(&self, state: &mut RunState, candle: &Candle, ctx: &StrategyContext<'_>) {
        let signal = self.strategy.evaluate(ctx);
        let side = match signal.side() {
            Some(side) => side,
            None => return,
        };
        debug!(
            "[{}] {} signal at step {} (confidence {:.2}): {}",
            self.strategy.name(),
            signal.signal,
            ctx.step,
            signal.confidence,
            signal.reason
        );

        let timestamp = self.fill_time(candle);
        match self.build_position(state, candle, ctx, side, &signal) {
            Ok(position) => {
                state.account.open(position.margin, position.entry_fee);
                debug!(
                    "Opened #{} {} {} @ {} | margin ${:.2} fee ${:.4} | SL {:?} TP {:?}",
                    position.id,
                    position.side,
                    position.quantity,
                    position.entry_price,
                    position.margin,
                    position.entry_fee,
                    position.stop_loss,
                    position.take_profit
                );
                state.next_trade_id += 1;
                state.position = Some(position);
            }
            Err(reason) => {
                warn!("[{}] Entry skipped at {}: {}", self.constraints.symbol, timestamp, reason);
                state.skipped.push(SkippedEntry {
                    timestamp,
                    step: ctx.step,
                    side,
                    reason,
                });
            }
        }
    }

    /// Entry pipeline: confidence, market, levels, sizing, exchange
    /// validation, affordability. The error is the skip reason.
    fn build_position(
        &self,
        state: &RunState,
        candle: &Candle,
        ctx: &StrategyContext<'_>,
        side: Side,
        signal: &StrategySignal,
    ) -> std::result::Result<Position, String> {
        let hundred = dec!(100);

        if !signal.should_trade(self.config.min_confidence) {
            return Err(format!(
                "confidence {:.2} below minimum {:.2}",
                signal.confidence, self.config.min_confidence
            ));
        }
        if side == Side::Sell && self.config.market == MarketType::Spot {
            return Err("short entries are not available on a spot market".to_string());
        }

        let fill = self.slipped_price(self.fill_price(candle), side);
        if fill <= Decimal::ZERO {
            return Err(format!("non-positive fill price {}", fill));
        }

        let tick = self.constraints.tick_size;
        let stop_loss = signal
            .stop_loss
            .map(|level| level.resolve_stop(fill, side))
            .or_else(|| {
                self.config
                    .stop_loss_pct
                    .map(|pct| percent_level(fill, pct, side.opposite()))
            })
            .map(|price| round_to_tick_size(price, tick));
        let take_profit = signal
            .take_profit
            .map(|level| level.resolve_target(fill, side))
            .or_else(|| self.config.take_profit_pct.map(|pct| percent_level(fill, pct, side)))
            .map(|price| round_to_tick_size(price, tick));
        check_levels(side, fill, stop_loss, take_profit)?;

        let balance = state.account.balance();
        let atr = ctx.indicators.latest(&self.sizing_atr);
        let request = SizingRequest {
            balance,
            entry_price: fill,
            stop_price: stop_loss,
            atr,
            max_position_value: balance * self.config.position_size_pct / hundred
                * Decimal::from(self.config.leverage),
            regime: atr.map(|a| VolatilityLevel::classify(a, fill)),
            committed_risk: Decimal::ZERO,
        };
        let size = self.sizer.calculate(&request, &self.constraints);
        if size.is_zero() {
            let reason = size.skip_reason.unwrap_or("position sizer returned zero quantity");
            return Err(reason.to_string());
        }

        validate_order(size.quantity, fill, &self.constraints)
            .map_err(|rejection| rejection.to_string())?;

        let notional = size.quantity * fill;
        let entry_fee =
            (notional * self.constraints.fee_rate(self.config.entry_fee)).round_dp(CASH_DP);
        let margin = match self.config.market {
            MarketType::Spot => notional,
            MarketType::Perpetual => {
                (notional / Decimal::from(self.config.leverage)).round_dp(CASH_DP)
            }
        };
        if !state.account.can_afford(margin, entry_fee) {
            return Err(format!(
                "insufficient balance: need {:.2} have {:.2}",
                margin + entry_fee,
                state.account.available()
            ));
        }

        Ok(Position {
            id: state.next_trade_id,
            side,
            entry_price: fill,
            entry_time: self.fill_time(candle),
            entry_step: ctx.step,
            quantity: size.quantity,
            margin,
            entry_fee,
            stop_loss,
            take_profit,
            peak_pnl_pct: Decimal::ZERO,
            strategy: self.strategy.name().to_string(),
        })
    }

    fn fill_price(&self, candle: &Candle) -> Decimal {
        match self.config.fill_timing {
            FillTiming::Open => candle.open,
            FillTiming::Close => candle.close,
        }
    }

    fn fill_time(&self, candle: &Candle) -> DateTime<Utc> {
        match self.config.fill_timing {
            FillTiming::Open => candle.open_time,
            FillTiming::Close => candle.close_time,
        }
    }

    /// Market fill: slippage against the order side, then the nearest tick.
    fn slipped_price(&self, price: Decimal, order_side: Side) -> Decimal {
        let slip = self.config.slippage_pct / dec!(100);
        let adjusted = match order_side {
            Side::Buy => price * (Decimal::ONE + slip),
            Side::Sell => price * (Decimal::ONE - slip),
        };
        round_to_tick_size(adjusted, self.constraints.tick_size)
    }
}

/// Level `pct` percent away from `price` in the direction a `toward` order moves it.
fn percent_level(price: Decimal, pct: Decimal, toward: Side) -> Decimal {
    let offset = price * pct / dec!(100);
    match toward {
        Side::Buy => price + offset,
        Side::Sell => price - offset,
    }
}

fn check_levels(
    side: Side,
    fill: Decimal,
    stop_loss: Option<Decimal>,
    take_profit: Option<Decimal>,
) -> std::result::Result<(), String> {
    let stop_ok = stop_loss.map_or(true, |sl| match side {
        Side::Buy => sl < fill && sl > Decimal::ZERO,
        Side::Sell => sl > fill,
    });
    let take_ok = take_profit.map_or(true, |tp| match side {
        Side::Buy => tp > fill,
        Side::Sell => tp < fill && tp > Decimal::ZERO,
    });
    if stop_ok && take_ok {
        Ok(())
    } else {
        Err(format!(
            "inconsistent levels for {} @ {}: stop {:?}, take profit {:?}",
            side, fill, stop_loss, take_profit
        ))
    }
}

/// Mutable state owned by a single run.
struct RunState {
    account: Account,
    position: Option<Position>,
    trades: Vec<TradeRecord>,
    skipped: Vec<SkippedEntry>,
    equity_curve: Vec<EquityPoint>,
    peak_balance: Decimal,
    max_drawdown_pct: Decimal,
    next_trade_id: u64,
}

impl RunState {
    fn new(initial_balance: Decimal) -> Self {
        Self {
            account: Account::new(initial_balance),
            position: None,
            trades: Vec::new(),
            skipped: Vec::new(),
            equity_curve: Vec::new(),
            peak_balance: initial_balance,
            max_drawdown_pct: Decimal::ZERO,
            next_trade_id: 1,
        }
    }

    fn record_equity(&mut self, candle: &Candle) {
        let balance = self.account.balance();
        let unrealized = self
            .position
            .as_ref()
            .map(|p| p.calculate_pnl(candle.close))
            .unwrap_or(Decimal::ZERO);

        if balance > self.peak_balance {
            self.peak_balance = balance;
        }
        let drawdown_pct = if self.peak_balance > Decimal::ZERO {
            (self.peak_balance - balance) / self.peak_balance * dec!(100)
        } else {
            Decimal::ZERO
        };
        if drawdown_pct > self.max_drawdown_pct {
            self.max_drawdown_pct = drawdown_pct;
        }

        self.equity_curve.push(EquityPoint {
            timestamp: candle.close_time,
            balance,
            equity: balance + unrealized,
            drawdown_pct,
            max_drawdown_pct: self.max_drawdown_pct,
        });
    }
}
