use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::exchange::{
    ConstraintOverride, ConstraintProvider, ExchangeConstraints, StaticConstraintProvider,
};
use crate::risk::SizingConfig;
use crate::strategies::StrategyParams;
use crate::types::{FillTiming, Liquidity, MarketType};

/// Maker/taker rates replacing the exchange table's fee schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSettings {
    pub maker: Decimal,
    pub taker: Decimal,
}

/// Immutable settings for one backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub symbol: String,
    pub initial_balance: Decimal,
    /// Share of balance committed as margin per position, in percent.
    pub position_size_pct: Decimal,
    pub leverage: u32,
    pub market: MarketType,
    pub fees: Option<FeeSettings>,
    /// Fee side charged on signal-driven entries.
    pub entry_fee: Liquidity,
    /// Adverse fill adjustment, in percent of price.
    pub slippage_pct: Decimal,
    pub fill_timing: FillTiming,
    pub min_confidence: Decimal,

    // Exit management, all in percent of entry price
    pub trailing_stop_pct: Option<Decimal>,
    pub stop_loss_pct: Option<Decimal>,
    pub take_profit_pct: Option<Decimal>,
    pub max_holding_hours: Option<u32>,

    pub sizing: SizingConfig,
    pub strategy: StrategyParams,
    pub constraints: BTreeMap<String, ConstraintOverride>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            initial_balance: dec!(10000),
            position_size_pct: dec!(10),
            leverage: 1,
            market: MarketType::Spot,
            fees: None,
            entry_fee: Liquidity::Taker,
            slippage_pct: dec!(0.05),
            fill_timing: FillTiming::Close,
            min_confidence: Decimal::ZERO,
            trailing_stop_pct: None,
            stop_loss_pct: Some(dec!(2)),
            take_profit_pct: Some(dec!(4)),
            max_holding_hours: None,
            sizing: SizingConfig::default(),
            strategy: StrategyParams::default(),
            constraints: BTreeMap::new(),
        }
    }
}

impl BacktestConfig {
    /// Checks every setting, with the leverage cap taken from the built-in
    /// constraint table.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        self.validate_against(&self.resolve_constraints())
    }

    /// Same checks as [`validate`](Self::validate), with the leverage cap
    /// taken from `constraints`.
    pub fn validate_against(&self, constraints: &ExchangeConstraints) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let hundred = dec!(100);

        if self.symbol.trim().is_empty() {
            errors.push("symbol must not be empty".to_string());
        }
        if self.initial_balance <= Decimal::ZERO {
            errors.push("initial_balance must be > 0".to_string());
        }
        if self.position_size_pct <= Decimal::ZERO || self.position_size_pct > hundred {
            errors.push("position_size_pct must be in (0, 100]".to_string());
        }

        // Leverage
        if self.leverage == 0 {
            errors.push("leverage must be >= 1".to_string());
        }
        if self.market == MarketType::Spot && self.leverage > 1 {
            errors.push("spot market requires leverage = 1".to_string());
        }
        for (symbol, table) in &self.constraints {
            errors.extend(table.validate(symbol));
        }
        if self.leverage > constraints.max_leverage {
            errors.push(format!(
                "leverage {}x exceeds {} maximum of {}x",
                self.leverage, constraints.symbol, constraints.max_leverage
            ));
        }

        // Costs
        if self.slippage_pct < Decimal::ZERO || self.slippage_pct >= hundred {
            errors.push("slippage_pct must be in [0, 100)".to_string());
        }
        if let Some(fees) = self.fees {
            if fees.maker < Decimal::ZERO || fees.taker < Decimal::ZERO {
                errors.push("fees must be >= 0".to_string());
            }
        }
        if self.min_confidence < Decimal::ZERO || self.min_confidence > Decimal::ONE {
            errors.push("min_confidence must be between 0 and 1".to_string());
        }

        // Exit levels: a stop at or beyond the target has non-positive distance
        if let Some(sl) = self.stop_loss_pct {
            if sl <= Decimal::ZERO || sl >= hundred {
                errors.push("stop_loss_pct must be in (0, 100)".to_string());
            }
        }
        if let Some(tp) = self.take_profit_pct {
            if tp <= Decimal::ZERO {
                errors.push("take_profit_pct must be > 0".to_string());
            }
        }
        if let Some(trailing) = self.trailing_stop_pct {
            if trailing <= Decimal::ZERO {
                errors.push("trailing_stop_pct must be > 0".to_string());
            }
        }
        if self.max_holding_hours == Some(0) {
            errors.push("max_holding_hours must be > 0".to_string());
        }

        errors.extend(self.sizing.validate());
        errors.extend(self.strategy.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn constraint_provider(&self) -> StaticConstraintProvider {
        StaticConstraintProvider::with_overrides(self.constraints.clone())
    }

    /// Exchange constraints for `symbol` with the fee override applied.
    pub fn resolve_constraints(&self) -> ExchangeConstraints {
        self.apply_fee_override(self.constraint_provider().constraints_for(&self.symbol))
    }

    pub fn apply_fee_override(&self, mut constraints: ExchangeConstraints) -> ExchangeConstraints {
        if let Some(fees) = self.fees {
            constraints.maker_fee = fees.maker;
            constraints.taker_fee = fees.taker;
        }
        constraints
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::{CrossoverParams, MultiTimeframeParams, SessionReentryParams};

    #[test]
    fn test_default_config_is_valid() {
        assert!(BacktestConfig::default().validate().is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let config = BacktestConfig {
            initial_balance: Decimal::ZERO,
            leverage: 5,
            slippage_pct: dec!(-1),
            min_confidence: dec!(1.5),
            stop_loss_pct: Some(Decimal::ZERO),
            trailing_stop_pct: Some(Decimal::ZERO),
            ..BacktestConfig::default()
        };
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 6, "{:?}", errors);
    }

    #[test]
    fn test_leverage_capped_by_symbol() {
        let config = BacktestConfig {
            symbol: "ADAUSDT".to_string(),
            market: MarketType::Perpetual,
            leverage: 60,
            ..BacktestConfig::default()
        };
        let errors = config.validate().unwrap_err();
        assert!(errors[0].contains("exceeds ADAUSDT maximum of 50x"));

        let ok = BacktestConfig { leverage: 50, ..config };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_validate_against_uses_given_leverage_cap() {
        let config = BacktestConfig {
            market: MarketType::Perpetual,
            leverage: 20,
            ..BacktestConfig::default()
        };
        let mut constraints = config.resolve_constraints();
        assert!(config.validate_against(&constraints).is_ok());

        constraints.max_leverage = 10;
        let errors = config.validate_against(&constraints).unwrap_err();
        assert_eq!(errors, vec!["leverage 20x exceeds BTCUSDT maximum of 10x".to_string()]);
    }

    #[test]
    fn test_strategy_errors_are_included() {
        let crossover = BacktestConfig {
            strategy: StrategyParams::Crossover(CrossoverParams {
                fast_period: 50,
                slow_period: 20,
                ..CrossoverParams::default()
            }),
            ..BacktestConfig::default()
        };
        assert!(crossover.validate().is_err());

        let frames = BacktestConfig {
            strategy: StrategyParams::MultiTimeframeMomentum(MultiTimeframeParams {
                timeframes: vec![1],
                min_agreement: 1,
                ..MultiTimeframeParams::default()
            }),
            ..BacktestConfig::default()
        };
        assert!(frames.validate().is_err());

        let zone = BacktestConfig {
            strategy: StrategyParams::SessionReentry(SessionReentryParams {
                timezone: "Nowhere/Town".to_string(),
                ..SessionReentryParams::default()
            }),
            ..BacktestConfig::default()
        };
        assert!(zone.validate().is_err());
    }

    #[test]
    fn test_fee_override() {
        let config = BacktestConfig {
            fees: Some(FeeSettings {
                maker: dec!(0.0002),
                taker: dec!(0.0004),
            }),
            ..BacktestConfig::default()
        };
        let constraints = config.resolve_constraints();
        assert_eq!(constraints.maker_fee, dec!(0.0002));
        assert_eq!(constraints.taker_fee, dec!(0.0004));
    }
}
