use rust_decimal::Decimal;
use super::Series;

/// Relative Strength Index with Wilder smoothing (factor 1/period).
#[derive(Debug, Clone)]
pub struct RSI {
    period: usize,
    avg_gain: Option<Decimal>,
    avg_loss: Option<Decimal>,
    prev_price: Option<Decimal>,
    seed_count: usize,
    seed_gain: Decimal,
    seed_loss: Decimal,
    value: Option<Decimal>,
}

impl RSI {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            avg_gain: None,
            avg_loss: None,
            prev_price: None,
            seed_count: 0,
            seed_gain: Decimal::ZERO,
            seed_loss: Decimal::ZERO,
            value: None,
        }
    }

    pub fn update(&mut self, price: Decimal) -> Option<Decimal> {
        if self.period == 0 {
            return None;
        }
        if let Some(prev) = self.prev_price {
            let change = price - prev;
            let gain = if change > Decimal::ZERO { change } else { Decimal::ZERO };
            let loss = if change < Decimal::ZERO { change.abs() } else { Decimal::ZERO };

            if self.seed_count < self.period {
                self.seed_count += 1;
                self.seed_gain += gain;
                self.seed_loss += loss;

                if self.seed_count == self.period {
                    let period_dec = Decimal::from(self.period);
                    self.avg_gain = Some(self.seed_gain / period_dec);
                    self.avg_loss = Some(self.seed_loss / period_dec);
                    self.value = self.calculate_rsi();
                }
            } else if let (Some(avg_gain), Some(avg_loss)) = (self.avg_gain, self.avg_loss) {
                let period_dec = Decimal::from(self.period);
                let new_avg_gain = (avg_gain * (period_dec - Decimal::ONE) + gain) / period_dec;
                let new_avg_loss = (avg_loss * (period_dec - Decimal::ONE) + loss) / period_dec;
                self.avg_gain = Some(new_avg_gain);
                self.avg_loss = Some(new_avg_loss);
                self.value = self.calculate_rsi();
            }
        }

        self.prev_price = Some(price);
        self.value
    }

    fn calculate_rsi(&self) -> Option<Decimal> {
        match (self.avg_gain, self.avg_loss) {
            (Some(avg_gain), Some(avg_loss)) => {
                if avg_loss.is_zero() && avg_gain.is_zero() {
                    // flat market
                    Some(Decimal::from(50))
                } else if avg_loss.is_zero() {
                    Some(Decimal::from(100))
                } else {
                    let rs = avg_gain / avg_loss;
                    Some(Decimal::from(100) - (Decimal::from(100) / (Decimal::ONE + rs)))
                }
            }
            _ => None,
        }
    }
}

pub fn rsi_series(prices: &[Decimal], period: usize) -> Series {
    let mut rsi = RSI::new(period);
    prices.iter().map(|p| rsi.update(*p)).collect()
}
