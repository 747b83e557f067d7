use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::exchange::{round_to_step_size, ExchangeConstraints};
use crate::indicators::{check_periods, VolatilityLevel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    // Risk per trade, % of balance lost if the stop is hit
    pub risk_per_trade_pct: Decimal,

    // Volatility sizing: % of balance per (ATR * multiplier) of adverse move
    pub volatility_risk_pct: Decimal,
    pub atr_period: usize,
    pub atr_multiplier: Decimal,

    // Notional floor applied before exchange rounding
    pub min_position_value: Decimal,

    // Portfolio budget
    pub max_portfolio_risk_pct: Decimal,
    pub portfolio_safety_fraction: Decimal,
    pub correlation_factor: Decimal,

    pub use_volatility_regime: bool,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            risk_per_trade_pct: Decimal::ONE,
            volatility_risk_pct: Decimal::ONE,
            atr_period: 14,
            atr_multiplier: Decimal::from(2),
            min_position_value: Decimal::ZERO,
            max_portfolio_risk_pct: Decimal::from(6),
            portfolio_safety_fraction: Decimal::new(8, 1), // 0.8
            correlation_factor: Decimal::ZERO,
            use_volatility_regime: false,
        }
    }
}

impl SizingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let hundred = Decimal::from(100);

        if self.risk_per_trade_pct <= Decimal::ZERO || self.risk_per_trade_pct > hundred {
            errors.push("sizing.risk_per_trade_pct must be in (0, 100]".to_string());
        }
        if self.volatility_risk_pct <= Decimal::ZERO || self.volatility_risk_pct > hundred {
            errors.push("sizing.volatility_risk_pct must be in (0, 100]".to_string());
        }
        errors.extend(check_periods("sizing", &[("atr_period", self.atr_period)]));
        if self.atr_multiplier <= Decimal::ZERO {
            errors.push("sizing.atr_multiplier must be > 0".to_string());
        }
        if self.min_position_value < Decimal::ZERO {
            errors.push("sizing.min_position_value must be >= 0".to_string());
        }
        if self.max_portfolio_risk_pct <= Decimal::ZERO || self.max_portfolio_risk_pct > hundred {
            errors.push("sizing.max_portfolio_risk_pct must be in (0, 100]".to_string());
        }
        if self.portfolio_safety_fraction <= Decimal::ZERO
            || self.portfolio_safety_fraction > Decimal::ONE
        {
            errors.push("sizing.portfolio_safety_fraction must be in (0, 1]".to_string());
        }
        if self.correlation_factor < Decimal::ZERO || self.correlation_factor > Decimal::ONE {
            errors.push("sizing.correlation_factor must be in [0, 1]".to_string());
        }
        errors
    }
}

#[derive(Debug, Clone)]
pub struct SizingRequest {
    pub balance: Decimal,
    pub entry_price: Decimal,
    pub stop_price: Option<Decimal>,
    pub atr: Option<Decimal>,
    /// Upper bound on notional (balance share times leverage).
    pub max_position_value: Decimal,
    pub regime: Option<VolatilityLevel>,
    /// Risk already held by open positions.
    pub committed_risk: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PositionSize {
    pub quantity: Decimal,
    pub notional: Decimal,
    pub risk_amount: Decimal,
    pub risk_pct: Decimal,
    pub confidence: Decimal,
    /// Raised to clear the exchange minimum notional.
    pub bumped: bool,
    /// Why a zero size was returned, when the sizer declined the entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<&'static str>,
}

impl PositionSize {
    pub fn zero() -> Self {
        Self {
            quantity: Decimal::ZERO,
            notional: Decimal::ZERO,
            risk_amount: Decimal::ZERO,
            risk_pct: Decimal::ZERO,
            confidence: Decimal::ZERO,
            bumped: false,
            skip_reason: None,
        }
    }

    pub fn skipped(reason: &'static str) -> Self {
        Self {
            skip_reason: Some(reason),
            ..Self::zero()
        }
    }

    pub fn is_zero(&self) -> bool {
        self.quantity.is_zero()
    }
}

#[derive(Debug, Clone)]
pub struct PositionSizer {
    config: SizingConfig,
}

impl PositionSizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    pub fn calculate(
        &self,
        req: &SizingRequest,
        constraints: &ExchangeConstraints,
    ) -> PositionSize {
        let hundred = Decimal::from(100);
        if req.balance <= Decimal::ZERO || req.entry_price <= Decimal::ZERO {
            return PositionSize::zero();
        }

        let stop_distance = req
            .stop_price
            .map(|sl| (req.entry_price - sl).abs())
            .filter(|d| *d > Decimal::ZERO);
        let volatility_distance = req
            .atr
            .map(|atr| atr * self.config.atr_multiplier)
            .filter(|d| *d > Decimal::ZERO);

        let risk_based = stop_distance
            .map(|d| req.balance * self.config.risk_per_trade_pct / hundred / d);
        let volatility_based = volatility_distance
            .map(|d| req.balance * self.config.volatility_risk_pct / hundred / d);

        let max_qty_by_value = req.max_position_value / req.entry_price;
        let mut model_qty = match (risk_based, volatility_based) {
            (Some(r), Some(v)) => r.min(v),
            (Some(r), None) => r,
            (None, Some(v)) => v,
            (None, None) => max_qty_by_value,
        };

        if self.config.use_volatility_regime {
            if let Some(regime) = req.regime {
                model_qty *= regime.position_size_factor();
            }
        }

        // Every multiplier is applied before the cap
        let mut quantity = model_qty.min(max_qty_by_value);
        if quantity * req.entry_price < self.config.min_position_value {
            quantity = (self.config.min_position_value / req.entry_price).min(max_qty_by_value);
        }

        quantity = round_to_step_size(quantity, constraints.step_size);
        let sized_qty = quantity;

        let mut bumped = false;
        if quantity * req.entry_price < constraints.min_notional {
            let bump = smallest_step_qty_for(
                constraints.min_notional,
                req.entry_price,
                constraints.step_size,
            )
            .min(constraints.max_qty);
            debug!(
                "Bumping quantity {} -> {} to clear min notional {}",
                quantity, bump, constraints.min_notional
            );
            quantity = bump;
            bumped = true;
        }

        // Portfolio budget
        let budget = req.balance * self.config.max_portfolio_risk_pct / hundred;
        let remaining = budget - req.committed_risk;
        if remaining <= Decimal::ZERO {
            debug!("No portfolio risk budget left ({} committed)", req.committed_risk);
            return PositionSize::skipped("portfolio risk budget exhausted");
        }
        let allowed = remaining * self.config.portfolio_safety_fraction;
        let risk_unit = stop_distance.or(volatility_distance).unwrap_or(req.entry_price);
        let correlation = Decimal::ONE + self.config.correlation_factor;

        let mut scaled = false;
        if quantity * risk_unit * correlation > allowed {
            quantity =
                round_to_step_size(allowed / (risk_unit * correlation), constraints.step_size);
            scaled = true;
            if quantity * req.entry_price < constraints.min_notional {
                debug!(
                    "Portfolio budget {} leaves {} below min notional {}",
                    allowed, quantity, constraints.min_notional
                );
                return PositionSize::skipped("portfolio budget leaves size below min notional");
            }
        }

        if quantity <= Decimal::ZERO {
            return PositionSize::zero();
        }

        let risk_amount = quantity * risk_unit;
        let mut confidence = Decimal::ONE;
        if stop_distance.is_none() {
            confidence *= Decimal::new(8, 1);
        }
        if bumped && !scaled && !sized_qty.is_zero() {
            confidence *= (sized_qty / quantity).min(Decimal::ONE);
        } else if bumped && !scaled {
            confidence *= Decimal::new(5, 1);
        }

        let size = PositionSize {
            quantity,
            notional: quantity * req.entry_price,
            risk_amount,
            risk_pct: risk_amount / req.balance * hundred,
            confidence,
            bumped: bumped && !scaled,
            skip_reason: None,
        };

        debug!(
            "Position size: {} (${:.2}) | risk ${:.2} ({:.3}%) | confidence {:.2}",
            size.quantity, size.notional, size.risk_amount, size.risk_pct, size.confidence
        );

        size
    }
}

/// Smallest multiple of `step` whose notional at `price` is at least `min_notional`.
fn smallest_step_qty_for(min_notional: Decimal, price: Decimal, step: Decimal) -> Decimal {
    let raw = min_notional / price;
    if step <= Decimal::ZERO {
        return raw;
    }
    let mut qty = (raw / step).ceil() * step;
    // Division rounding can land one step short
    if qty * price < min_notional {
        qty += step;
    }
    qty
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TradingPair;
    use rust_decimal_macros::dec;

    fn constraints() -> ExchangeConstraints {
        ExchangeConstraints {
            step_size: dec!(0.001),
            min_qty: dec!(0.001),
            ..ExchangeConstraints::for_pair(TradingPair::BTCUSDT)
        }
    }

    fn request() -> SizingRequest {
        SizingRequest {
            balance: dec!(10000),
            entry_price: dec!(100),
            stop_price: Some(dec!(98)),
            atr: Some(dec!(2)),
            max_position_value: dec!(100000),
            regime: None,
            committed_risk: Decimal::ZERO,
        }
    }

    #[test]
    fn test_takes_smaller_of_risk_and_volatility_sizes() {
        let sizer = PositionSizer::new(SizingConfig::default());
        // risk: 100 / 2 = 50; volatility: 100 / (2 * 2) = 25
        let size = sizer.calculate(&request(), &constraints());
        assert_eq!(size.quantity, dec!(25));
        assert_eq!(size.risk_amount, dec!(50));
        assert_eq!(size.risk_pct, dec!(0.5));
        assert_eq!(size.confidence, Decimal::ONE);
    }

    #[test]
    fn test_clamped_to_max_position_value() {
        let sizer = PositionSizer::new(SizingConfig::default());
        let req = SizingRequest {
            max_position_value: dec!(1000),
            ..request()
        };
        let size = sizer.calculate(&req, &constraints());
        assert_eq!(size.quantity, dec!(10));
        assert_eq!(size.notional, dec!(1000));
    }

    #[test]
    fn test_rounds_down_to_step() {
        let sizer = PositionSizer::new(SizingConfig::default());
        let req = SizingRequest {
            stop_price: Some(dec!(97)),
            atr: None,
            ..request()
        };
        // 100 / 3 = 33.333...
        let size = sizer.calculate(&req, &constraints());
        assert_eq!(size.quantity, dec!(33.333));
    }

    #[test]
    fn test_min_notional_bump() {
        let sizer = PositionSizer::new(SizingConfig::default());
        let req = SizingRequest {
            balance: dec!(1000),
            entry_price: dec!(3),
            stop_price: Some(dec!(2.9)),
            atr: Some(dec!(0.1)),
            max_position_value: dec!(1),
            ..request()
        };
        let c = ExchangeConstraints {
            step_size: dec!(0.1),
            min_qty: dec!(0.1),
            ..constraints()
        };
        let size = sizer.calculate(&req, &c);
        assert!(size.bumped);
        // 10 / 3 = 3.33 -> next step 3.4
        assert_eq!(size.quantity, dec!(3.4));
        assert!(size.notional >= c.min_notional);
        assert!(size.confidence < Decimal::ONE);
    }

    #[test]
    fn test_bump_is_capped_at_max_qty() {
        let sizer = PositionSizer::new(SizingConfig::default());
        let c = ExchangeConstraints {
            max_qty: dec!(0.05),
            ..constraints()
        };
        let req = SizingRequest {
            max_position_value: dec!(1),
            ..request()
        };
        let size = sizer.calculate(&req, &c);
        assert_eq!(size.quantity, dec!(0.05));
        assert!(size.notional < c.min_notional);
    }

    #[test]
    fn test_portfolio_budget_exhausted() {
        let sizer = PositionSizer::new(SizingConfig::default());
        let req = SizingRequest {
            committed_risk: dec!(600),
            ..request()
        };
        assert!(sizer.calculate(&req, &constraints()).is_zero());
    }

    #[test]
    fn test_portfolio_adjustment_scales_down() {
        let config = SizingConfig {
            correlation_factor: dec!(0.5),
            ..SizingConfig::default()
        };
        let sizer = PositionSizer::new(config);
        let req = SizingRequest {
            committed_risk: dec!(560),
            ..request()
        };
        // remaining 40, allowed 32; 25 * 2 * 1.5 = 75 > 32 -> 32 / 3
        let size = sizer.calculate(&req, &constraints());
        assert_eq!(size.quantity, dec!(10.666));
        assert!(!size.bumped);
    }

    #[test]
    fn test_regime_multiplier() {
        let config = SizingConfig {
            use_volatility_regime: true,
            ..SizingConfig::default()
        };
        let sizer = PositionSizer::new(config);
        let req = SizingRequest {
            regime: Some(VolatilityLevel::Extreme),
            ..request()
        };
        assert_eq!(sizer.calculate(&req, &constraints()).quantity, dec!(12.5));
    }

    #[test]
    fn test_low_regime_stays_within_max_value() {
        let config = SizingConfig {
            use_volatility_regime: true,
            max_portfolio_risk_pct: dec!(100),
            portfolio_safety_fraction: Decimal::ONE,
            ..SizingConfig::default()
        };
        let sizer = PositionSizer::new(config);
        let req = SizingRequest {
            stop_price: None,
            atr: None,
            max_position_value: dec!(1000),
            regime: Some(VolatilityLevel::Low),
            ..request()
        };
        let size = sizer.calculate(&req, &constraints());
        assert_eq!(size.quantity, dec!(10));
        assert!(size.notional <= dec!(1000));
    }

    #[test]
    fn test_portfolio_scaling_below_min_notional_skips() {
        let sizer = PositionSizer::new(SizingConfig::default());
        let c = ExchangeConstraints {
            step_size: dec!(0.1),
            min_qty: dec!(0.1),
            ..constraints()
        };
        // Bumped to 3.4 for min notional, then the budget only allows 1.6
        let req = SizingRequest {
            balance: dec!(1000),
            entry_price: dec!(3),
            stop_price: Some(dec!(2.9)),
            atr: Some(dec!(0.1)),
            max_position_value: dec!(1),
            committed_risk: dec!(59.8),
            ..request()
        };
        let size = sizer.calculate(&req, &c);
        assert!(size.is_zero());
        assert_eq!(size.skip_reason, Some("portfolio budget leaves size below min notional"));
    }

    #[test]
    fn test_config_validation() {
        assert!(SizingConfig::default().validate().is_empty());
        let invalid = SizingConfig {
            atr_period: 0,
            portfolio_safety_fraction: dec!(1.5),
            ..SizingConfig::default()
        };
        assert_eq!(invalid.validate().len(), 2);
    }
}
