use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Side;

/// The single open position an engine instance may hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: u64,
    pub side: Side,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    /// Step index of the candle the position was opened on.
    pub entry_step: usize,
    pub quantity: Decimal,
    /// Balance locked while the position is open.
    pub margin: Decimal,
    pub entry_fee: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    /// Best profit percentage seen so far; zero until the position is in profit.
    pub peak_pnl_pct: Decimal,
    pub strategy: String,
}

impl Position {
    pub fn calculate_pnl(&self, price: Decimal) -> Decimal {
        let price_diff = price - self.entry_price;
        match self.side {
            Side::Buy => price_diff * self.quantity,
            Side::Sell => -price_diff * self.quantity,
        }
    }

    /// Unleveraged price move in the position's favour, in percent.
    pub fn pnl_percentage(&self, price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        let move_pct = (price - self.entry_price) / self.entry_price * Decimal::from(100);
        match self.side {
            Side::Buy => move_pct,
            Side::Sell => -move_pct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(side: Side) -> Position {
        Position {
            id: 1,
            side,
            entry_price: dec!(100),
            entry_time: Utc::now(),
            entry_step: 0,
            quantity: dec!(2),
            margin: dec!(200),
            entry_fee: dec!(0.2),
            stop_loss: Some(dec!(95)),
            take_profit: Some(dec!(110)),
            peak_pnl_pct: Decimal::ZERO,
            strategy: "test".to_string(),
        }
    }

    #[test]
    fn test_pnl_long_and_short() {
        let long = position(Side::Buy);
        assert_eq!(long.calculate_pnl(dec!(105)), dec!(10));
        assert_eq!(long.pnl_percentage(dec!(105)), dec!(5));

        let short = position(Side::Sell);
        assert_eq!(short.calculate_pnl(dec!(105)), dec!(-10));
        assert_eq!(short.pnl_percentage(dec!(90)), dec!(10));
    }
}
