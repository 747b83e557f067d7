//! Exit checks evaluated while a position is open.

use rust_decimal::Decimal;

use super::results::ExitReason;
use crate::types::{Candle, Liquidity, Position, Side};

/// A triggered exit before slippage and tick rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitTrigger {
    pub reason: ExitReason,
    pub price: Decimal,
    pub liquidity: Liquidity,
}

impl ExitTrigger {
    pub fn market(reason: ExitReason, price: Decimal) -> Self {
        Self {
            reason,
            price,
            liquidity: Liquidity::Taker,
        }
    }

    /// Take-profit fills rest on the book.
    pub fn is_limit(&self) -> bool {
        self.liquidity == Liquidity::Maker
    }
}

/// Updates the running peak profit and reports whether the current profit has
/// fallen `trailing_pct` below it. Inactive until the peak is positive.
pub fn trailing_stop_hit(
    peak_pnl_pct: &mut Decimal,
    current_pnl_pct: Decimal,
    trailing_pct: Decimal,
) -> bool {
    let hit = *peak_pnl_pct > Decimal::ZERO && current_pnl_pct <= *peak_pnl_pct - trailing_pct;
    if current_pnl_pct > *peak_pnl_pct {
        *peak_pnl_pct = current_pnl_pct;
    }
    hit
}

/// Static stop-loss / take-profit against the candle's high and low.
pub fn check_protective_levels(position: &Position, candle: &Candle) -> Option<ExitTrigger> {
    let side = position.side;
    let stop = position.stop_loss.filter(|&sl| match side {
        Side::Buy => candle.low <= sl,
        Side::Sell => candle.high >= sl,
    });
    let take = position.take_profit.filter(|&tp| match side {
        Side::Buy => candle.high >= tp,
        Side::Sell => candle.low <= tp,
    });

    let (reason, level) = match (stop, take) {
        (Some(sl), Some(tp)) => match resolve_tie(side, candle.open, sl, tp) {
            ExitReason::TakeProfit => (ExitReason::TakeProfit, tp),
            _ => (ExitReason::StopLoss, sl),
        },
        (Some(sl), None) => (ExitReason::StopLoss, sl),
        (None, Some(tp)) => (ExitReason::TakeProfit, tp),
        (None, None) => return None,
    };

    let price = gap_fill(side, reason, candle.open, level);
    let liquidity = if reason == ExitReason::TakeProfit {
        Liquidity::Maker
    } else {
        Liquidity::Taker
    };
    Some(ExitTrigger { reason, price, liquidity })
}

/// Picks the level hit first when one candle spans both.
///
/// With the open strictly between the levels the nearer one wins, and an
/// exact tie goes to the stop. Otherwise the open has already passed one level
/// and that level wins.
pub fn resolve_tie(side: Side, open: Decimal, stop: Decimal, take: Decimal) -> ExitReason {
    let (lower, upper) = (stop.min(take), stop.max(take));
    if open > lower && open < upper {
        if (take - open).abs() < (open - stop).abs() {
            ExitReason::TakeProfit
        } else {
            ExitReason::StopLoss
        }
    } else {
        let past_stop = match side {
            Side::Buy => open <= stop,
            Side::Sell => open >= stop,
        };
        if past_stop {
            ExitReason::StopLoss
        } else {
            ExitReason::TakeProfit
        }
    }
}

/// A candle that opens beyond the level fills at the open.
fn gap_fill(side: Side, reason: ExitReason, open: Decimal, level: Decimal) -> Decimal {
    let gapped = match (reason, side) {
        (ExitReason::TakeProfit, Side::Buy) | (ExitReason::StopLoss, Side::Sell) => open >= level,
        _ => open <= level,
    };
    if gapped {
        open
    } else {
        level
    }
}
