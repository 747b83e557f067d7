//! ADX — Average Directional Index (Wilder).
//!
//! +DM/-DM and true range are Wilder-smoothed over `period`, giving +DI/-DI;
//! DX = 100 * |+DI - -DI| / (+DI + -DI) is Wilder-smoothed again into ADX.
//! First ADX value lands at index `2 * period - 1`.

use rust_decimal::Decimal;

use super::atr::{true_range, wilder_step};
use super::Series;
use crate::types::Candle;

#[derive(Debug, Clone, Default)]
struct WilderAverage {
    period: usize,
    seed_count: usize,
    seed_sum: Decimal,
    value: Option<Decimal>,
}

impl WilderAverage {
    fn new(period: usize) -> Self {
        Self {
            period,
            ..Default::default()
        }
    }

    fn update(&mut self, value: Decimal) -> Option<Decimal> {
        if self.period == 0 {
            return None;
        }
        match self.value {
            Some(prev) => self.value = Some(wilder_step(prev, value, self.period)),
            None => {
                self.seed_count += 1;
                self.seed_sum += value;
                if self.seed_count == self.period {
                    self.value = Some(self.seed_sum / Decimal::from(self.period));
                }
            }
        }
        self.value
    }
}

#[derive(Debug, Clone)]
pub struct ADX {
    period: usize,
    prev: Option<(Decimal, Decimal, Decimal)>,
    smoothed_tr: WilderAverage,
    smoothed_plus_dm: WilderAverage,
    smoothed_minus_dm: WilderAverage,
    smoothed_dx: WilderAverage,
    plus_di: Option<Decimal>,
    minus_di: Option<Decimal>,
    value: Option<Decimal>,
}

impl ADX {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev: None,
            smoothed_tr: WilderAverage::new(period),
            smoothed_plus_dm: WilderAverage::new(period),
            smoothed_minus_dm: WilderAverage::new(period),
            smoothed_dx: WilderAverage::new(period),
            plus_di: None,
            minus_di: None,
            value: None,
        }
    }

    pub fn update(&mut self, high: Decimal, low: Decimal, close: Decimal) -> Option<ADXOutput> {
        let Some((prev_high, prev_low, prev_close)) = self.prev.replace((high, low, close)) else {
            return None;
        };

        let up_move = high - prev_high;
        let down_move = prev_low - low;
        let plus_dm = if up_move > down_move && up_move > Decimal::ZERO {
            up_move
        } else {
            Decimal::ZERO
        };
        let minus_dm = if down_move > up_move && down_move > Decimal::ZERO {
            down_move
        } else {
            Decimal::ZERO
        };
        let tr = true_range(high, low, Some(prev_close));

        let smoothed_tr = self.smoothed_tr.update(tr);
        let smoothed_plus = self.smoothed_plus_dm.update(plus_dm);
        let smoothed_minus = self.smoothed_minus_dm.update(minus_dm);

        let (Some(str_), Some(sp), Some(sm)) = (smoothed_tr, smoothed_plus, smoothed_minus) else {
            return None;
        };
        if str_.is_zero() {
            return None;
        }

        let hundred = Decimal::from(100);
        let plus_di = hundred * sp / str_;
        let minus_di = hundred * sm / str_;
        self.plus_di = Some(plus_di);
        self.minus_di = Some(minus_di);

        let di_sum = plus_di + minus_di;
        let dx = if di_sum.is_zero() {
            Decimal::ZERO
        } else {
            hundred * (plus_di - minus_di).abs() / di_sum
        };

        self.value = self.smoothed_dx.update(dx);
        self.value.map(|adx| ADXOutput {
            adx,
            plus_di,
            minus_di,
        })
    }

    pub fn plus_di(&self) -> Option<Decimal> {
        self.plus_di
    }

    pub fn minus_di(&self) -> Option<Decimal> {
        self.minus_di
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ADXOutput {
    pub adx: Decimal,
    pub plus_di: Decimal,
    pub minus_di: Decimal,
}

#[derive(Debug, Clone, Default)]
pub struct AdxSeries {
    pub adx: Series,
    pub plus_di: Series,
    pub minus_di: Series,
}

pub fn adx_series(candles: &[Candle], period: usize) -> AdxSeries {
    let mut adx = ADX::new(period);
    let mut out = AdxSeries::default();
    for candle in candles {
        let output = adx.update(candle.high, candle.low, candle.close);
        out.adx.push(output.map(|o| o.adx));
        // DI lines are defined before ADX itself
        out.plus_di.push(adx.plus_di());
        out.minus_di.push(adx.minus_di());
    }
    out
}
