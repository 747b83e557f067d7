use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Series;
use crate::types::Candle;

/// Average True Range, seeded by the mean of the first `period` true ranges and
/// Wilder-smoothed afterwards.
#[derive(Debug, Clone)]
pub struct ATR {
    period: usize,
    prev_close: Option<Decimal>,
    seed_count: usize,
    seed_sum: Decimal,
    value: Option<Decimal>,
}

impl ATR {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev_close: None,
            seed_count: 0,
            seed_sum: Decimal::ZERO,
            value: None,
        }
    }

    pub fn update(&mut self, high: Decimal, low: Decimal, close: Decimal) -> Option<Decimal> {
        if self.period == 0 {
            return None;
        }
        let tr = true_range(high, low, self.prev_close);
        self.prev_close = Some(close);

        if self.seed_count < self.period {
            self.seed_count += 1;
            self.seed_sum += tr;
            if self.seed_count == self.period {
                self.value = Some(self.seed_sum / Decimal::from(self.period));
            }
            return self.value;
        }

        if let Some(prev_atr) = self.value {
            self.value = Some(wilder_step(prev_atr, tr, self.period));
        }

        self.value
    }
}

/// True range; the first bar (no previous close) uses high - low.
pub fn true_range(high: Decimal, low: Decimal, prev_close: Option<Decimal>) -> Decimal {
    let hl = high - low;
    match prev_close {
        Some(prev_close) => {
            let hc = (high - prev_close).abs();
            let lc = (low - prev_close).abs();
            hl.max(hc).max(lc)
        }
        None => hl,
    }
}

/// One step of Wilder smoothing: (prev * (n - 1) + value) / n.
pub fn wilder_step(prev: Decimal, value: Decimal, period: usize) -> Decimal {
    let period_dec = Decimal::from(period);
    (prev * (period_dec - Decimal::ONE) + value) / period_dec
}

pub fn atr_series(candles: &[Candle], period: usize) -> Series {
    let mut atr = ATR::new(period);
    candles
        .iter()
        .map(|c| atr.update(c.high, c.low, c.close))
        .collect()
}

/// Coarse volatility regime from ATR as a percentage of price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolatilityLevel {
    Low,
    Medium,
    High,
    Extreme,
}

impl VolatilityLevel {
    pub fn classify(atr: Decimal, price: Decimal) -> Self {
        if price.is_zero() {
            return VolatilityLevel::Low;
        }
        let atr_pct = (atr / price) * Decimal::from(100);

        if atr_pct > Decimal::from(5) {
            VolatilityLevel::Extreme
        } else if atr_pct > Decimal::from(3) {
            VolatilityLevel::High
        } else if atr_pct > Decimal::from(1) {
            VolatilityLevel::Medium
        } else {
            VolatilityLevel::Low
        }
    }

    /// Regime multiplier applied by the position sizer.
    pub fn position_size_factor(&self) -> Decimal {
        match self {
            VolatilityLevel::Low => Decimal::new(12, 1),    // 1.2x
            VolatilityLevel::Medium => Decimal::ONE,        // 1.0x
            VolatilityLevel::High => Decimal::new(7, 1),    // 0.7x
            VolatilityLevel::Extreme => Decimal::new(5, 1), // 0.5x
        }
    }
}
