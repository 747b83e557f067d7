use rust_decimal::Decimal;
use super::Series;

/// Exponential moving average with multiplier 2/(period+1), seeded by the
/// simple average of the first `period` values.
#[derive(Debug, Clone)]
pub struct EMA {
    period: usize,
    multiplier: Decimal,
    value: Option<Decimal>,
    count: usize,
    sum: Decimal,
}

impl EMA {
    pub fn new(period: usize) -> Self {
        let multiplier = Decimal::from(2) / (Decimal::from(period) + Decimal::ONE);
        Self {
            period,
            multiplier,
            value: None,
            count: 0,
            sum: Decimal::ZERO,
        }
    }

    pub fn update(&mut self, price: Decimal) -> Option<Decimal> {
        if self.period == 0 {
            return None;
        }
        self.count += 1;

        if self.count < self.period {
            self.sum += price;
            return None;
        } else if self.count == self.period {
            self.sum += price;
            let sma = self.sum / Decimal::from(self.period);
            self.value = Some(sma);
            return self.value;
        }

        if let Some(prev_ema) = self.value {
            let new_ema = (price - prev_ema) * self.multiplier + prev_ema;
            self.value = Some(new_ema);
        }

        self.value
    }
}

pub fn ema_series(prices: &[Decimal], period: usize) -> Series {
    let mut ema = EMA::new(period);
    prices.iter().map(|p| ema.update(*p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_ema_seeded_by_sma() {
        let prices = vec![dec!(2), dec!(4), dec!(6), dec!(8)];
        let series = ema_series(&prices, 3);
        assert_eq!(series[0], None);
        assert_eq!(series[1], None);
        assert_eq!(series[2], Some(dec!(4)));
        // multiplier 0.5: (8 - 4) * 0.5 + 4
        assert_eq!(series[3], Some(dec!(6)));
    }

    #[test]
    fn test_ema_deterministic() {
        let prices: Vec<Decimal> = (1..50).map(|i| Decimal::from(i * 7 % 13)).collect();
        assert_eq!(ema_series(&prices, 10), ema_series(&prices, 10));
    }

    #[test]
    fn test_zero_period_never_ready() {
        let mut ema = EMA::new(0);
        for _ in 0..3 {
            assert_eq!(ema.update(dec!(1)), None);
        }
    }
}
