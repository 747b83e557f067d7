use rust_decimal::prelude::RoundingStrategy;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::warn;

use crate::types::{Liquidity, TradingPair};

/// Symbol whose table is used when a symbol is not recognised.
pub const DEFAULT_SYMBOL: &str = "BTCUSDT";

/// Per-symbol exchange filters and fee schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeConstraints {
    pub symbol: String,
    pub step_size: Decimal,
    pub tick_size: Decimal,
    pub min_qty: Decimal,
    pub max_qty: Decimal,
    pub min_notional: Decimal,
    pub max_notional: Decimal,
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
    pub max_leverage: u32,
}

impl ExchangeConstraints {
    pub fn for_pair(pair: TradingPair) -> Self {
        let step_size = Decimal::new(1, pair.quantity_precision());
        let tick_size = Decimal::new(1, pair.price_precision());
        let max_qty = match pair {
            TradingPair::BTCUSDT => Decimal::from(9_000),
            TradingPair::ETHUSDT => Decimal::from(90_000),
            TradingPair::SOLUSDT => Decimal::from(900_000),
            TradingPair::BNBUSDT => Decimal::from(90_000),
            TradingPair::ADAUSDT | TradingPair::XRPUSDT => Decimal::from(90_000_000),
        };

        Self {
            symbol: pair.as_str().to_string(),
            step_size,
            tick_size,
            min_qty: step_size,
            max_qty,
            min_notional: Decimal::from(10),
            max_notional: Decimal::from(9_000_000),
            maker_fee: Decimal::new(8, 4), // 0.08%
            taker_fee: Decimal::new(1, 3), // 0.10%
            max_leverage: pair.max_leverage(),
        }
    }

    pub fn fee_rate(&self, liquidity: Liquidity) -> Decimal {
        match liquidity {
            Liquidity::Maker => self.maker_fee,
            Liquidity::Taker => self.taker_fee,
        }
    }

    pub fn is_step_aligned(&self, qty: Decimal) -> bool {
        is_multiple_of(qty, self.step_size)
    }

    pub fn is_tick_aligned(&self, price: Decimal) -> bool {
        is_multiple_of(price, self.tick_size)
    }
}

impl fmt::Display for ExchangeConstraints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== {} ===", self.symbol)?;
        writeln!(f, "Step size:     {}", self.step_size)?;
        writeln!(f, "Tick size:     {}", self.tick_size)?;
        writeln!(f, "Quantity:      {} .. {}", self.min_qty, self.max_qty)?;
        writeln!(f, "Notional:      {} .. {}", self.min_notional, self.max_notional)?;
        writeln!(f, "Maker fee:     {}%", self.maker_fee * Decimal::from(100))?;
        writeln!(f, "Taker fee:     {}%", self.taker_fee * Decimal::from(100))?;
        write!(f, "Max leverage:  {}x", self.max_leverage)
    }
}

/// Partial table from the `[constraints.<SYMBOL>]` config section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstraintOverride {
    pub step_size: Option<Decimal>,
    pub tick_size: Option<Decimal>,
    pub min_qty: Option<Decimal>,
    pub max_qty: Option<Decimal>,
    pub min_notional: Option<Decimal>,
    pub max_notional: Option<Decimal>,
    pub maker_fee: Option<Decimal>,
    pub taker_fee: Option<Decimal>,
    pub max_leverage: Option<u32>,
}

impl ConstraintOverride {
    pub fn apply(&self, mut base: ExchangeConstraints) -> ExchangeConstraints {
        if let Some(v) = self.step_size {
            base.step_size = v;
        }
        if let Some(v) = self.tick_size {
            base.tick_size = v;
        }
        if let Some(v) = self.min_qty {
            base.min_qty = v;
        }
        if let Some(v) = self.max_qty {
            base.max_qty = v;
        }
        if let Some(v) = self.min_notional {
            base.min_notional = v;
        }
        if let Some(v) = self.max_notional {
            base.max_notional = v;
        }
        if let Some(v) = self.maker_fee {
            base.maker_fee = v;
        }
        if let Some(v) = self.taker_fee {
            base.taker_fee = v;
        }
        if let Some(v) = self.max_leverage {
            base.max_leverage = v;
        }
        base
    }

    pub fn validate(&self, symbol: &str) -> Vec<String> {
        let mut errors = Vec::new();
        let positive = [
            ("step_size", self.step_size),
            ("tick_size", self.tick_size),
            ("max_qty", self.max_qty),
            ("max_notional", self.max_notional),
        ];
        for (name, value) in positive {
            if matches!(value, Some(v) if v <= Decimal::ZERO) {
                errors.push(format!("constraints.{}.{} must be > 0", symbol, name));
            }
        }
        let non_negative = [
            ("min_qty", self.min_qty),
            ("min_notional", self.min_notional),
            ("maker_fee", self.maker_fee),
            ("taker_fee", self.taker_fee),
        ];
        for (name, value) in non_negative {
            if matches!(value, Some(v) if v < Decimal::ZERO) {
                errors.push(format!("constraints.{}.{} must be >= 0", symbol, name));
            }
        }
        if self.max_leverage == Some(0) {
            errors.push(format!("constraints.{}.max_leverage must be >= 1", symbol));
        }
        errors
    }
}

/// Reference-data lookup by symbol. Never fails: unknown symbols resolve to
/// the [`DEFAULT_SYMBOL`] table.
#[cfg_attr(test, mockall::automock)]
pub trait ConstraintProvider: Send + Sync {
    fn constraints_for(&self, symbol: &str) -> ExchangeConstraints;
}

/// Built-in table for the supported pairs, with optional per-symbol overrides.
#[derive(Debug, Clone, Default)]
pub struct StaticConstraintProvider {
    overrides: BTreeMap<String, ConstraintOverride>,
}

impl StaticConstraintProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_overrides(overrides: BTreeMap<String, ConstraintOverride>) -> Self {
        let overrides = overrides
            .into_iter()
            .map(|(symbol, o)| (symbol.trim().to_uppercase(), o))
            .collect();
        Self { overrides }
    }
}

impl ConstraintProvider for StaticConstraintProvider {
    fn constraints_for(&self, symbol: &str) -> ExchangeConstraints {
        let symbol = symbol.trim().to_uppercase();
        let override_table = self.overrides.get(&symbol);

        let base = match symbol.parse::<TradingPair>() {
            Ok(pair) => ExchangeConstraints::for_pair(pair),
            Err(_) => {
                let mut fallback = ExchangeConstraints::for_pair(TradingPair::BTCUSDT);
                if override_table.is_some() {
                    fallback.symbol = symbol.clone();
                } else {
                    warn!(
                        "No exchange constraints for {}, falling back to {}",
                        symbol, DEFAULT_SYMBOL
                    );
                }
                fallback
            }
        };

        match override_table {
            Some(o) => o.apply(base),
            None => base,
        }
    }
}

/// Floors to a multiple of `step`. A non-positive step leaves `qty` unchanged.
pub fn round_to_step_size(qty: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return qty;
    }
    (qty / step).floor() * step
}

/// Rounds to the nearest multiple of `tick`, halves away from zero.
pub fn round_to_tick_size(price: Decimal, tick: Decimal) -> Decimal {
    if tick <= Decimal::ZERO {
        return price;
    }
    (price / tick).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero) * tick
}

fn is_multiple_of(value: Decimal, unit: Decimal) -> bool {
    unit > Decimal::ZERO && (value % unit).is_zero()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderRejection {
    #[error("quantity {qty} below minimum {min}")]
    BelowMinQty { qty: Decimal, min: Decimal },

    #[error("quantity {qty} above maximum {max}")]
    AboveMaxQty { qty: Decimal, max: Decimal },

    #[error("quantity {qty} is not a multiple of step size {step}")]
    StepMisaligned { qty: Decimal, step: Decimal },

    #[error("notional {notional} below minimum {min}")]
    BelowMinNotional { notional: Decimal, min: Decimal },

    #[error("notional {notional} above maximum {max}")]
    AboveMaxNotional { notional: Decimal, max: Decimal },

    #[error("price {price} is not a multiple of tick size {tick}")]
    PriceOffTick { price: Decimal, tick: Decimal },
}

/// Checks run in order: minQty, maxQty, step, minNotional, maxNotional, tick.
pub fn validate_order(
    qty: Decimal,
    price: Decimal,
    constraints: &ExchangeConstraints,
) -> std::result::Result<(), OrderRejection> {
    if qty < constraints.min_qty || qty <= Decimal::ZERO {
        return Err(OrderRejection::BelowMinQty {
            qty,
            min: constraints.min_qty,
        });
    }
    if qty > constraints.max_qty {
        return Err(OrderRejection::AboveMaxQty {
            qty,
            max: constraints.max_qty,
        });
    }
    if !constraints.is_step_aligned(qty) {
        return Err(OrderRejection::StepMisaligned {
            qty,
            step: constraints.step_size,
        });
    }

    let notional = qty * price;
    if notional < constraints.min_notional {
        return Err(OrderRejection::BelowMinNotional {
            notional,
            min: constraints.min_notional,
        });
    }
    if notional > constraints.max_notional {
        return Err(OrderRejection::AboveMaxNotional {
            notional,
            max: constraints.max_notional,
        });
    }
    if !constraints.is_tick_aligned(price) {
        return Err(OrderRejection::PriceOffTick {
            price,
            tick: constraints.tick_size,
        });
    }

    Ok(())
}
