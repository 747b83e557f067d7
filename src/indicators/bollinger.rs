use rust_decimal::Decimal;
use std::collections::VecDeque;

use super::Series;

/// SMA(period) plus/minus `std_dev_multiplier` population standard deviations.
#[derive(Debug, Clone)]
pub struct BollingerBands {
    period: usize,
    std_dev_multiplier: Decimal,
    prices: VecDeque<Decimal>,
    output: Option<BollingerOutput>,
}

impl BollingerBands {
    pub fn new(period: usize, std_dev_multiplier: Decimal) -> Self {
        Self {
            period,
            std_dev_multiplier,
            prices: VecDeque::with_capacity(period),
            output: None,
        }
    }

    pub fn update(&mut self, price: Decimal) -> Option<BollingerOutput> {
        if self.period == 0 {
            return None;
        }
        self.prices.push_back(price);
        if self.prices.len() > self.period {
            self.prices.pop_front();
        }

        if self.prices.len() < self.period {
            return None;
        }

        let window: Vec<Decimal> = self.prices.iter().copied().collect();
        let middle = super::sma(&window, self.period)?;
        let std_dev = super::stddev(&window, self.period)?;

        let deviation = std_dev * self.std_dev_multiplier;
        let upper = middle + deviation;
        let lower = middle - deviation;

        let bandwidth = if !middle.is_zero() {
            Some((upper - lower) / middle * Decimal::from(100))
        } else {
            None
        };

        let band_range = upper - lower;
        let percent_b = if !band_range.is_zero() {
            Some((price - lower) / band_range)
        } else {
            None
        };

        self.output = Some(BollingerOutput {
            upper,
            middle,
            lower,
            bandwidth,
            percent_b,
        });
        self.output
    }

    pub fn upper(&self) -> Option<Decimal> {
        self.output.map(|o| o.upper)
    }

    pub fn middle(&self) -> Option<Decimal> {
        self.output.map(|o| o.middle)
    }

    pub fn lower(&self) -> Option<Decimal> {
        self.output.map(|o| o.lower)
    }

    pub fn percent_b(&self) -> Option<Decimal> {
        self.output.and_then(|o| o.percent_b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerOutput {
    pub upper: Decimal,
    pub middle: Decimal,
    pub lower: Decimal,
    /// (upper - lower) / middle * 100; undefined when middle is zero.
    pub bandwidth: Option<Decimal>,
    /// (price - lower) / (upper - lower); undefined for a zero-width band.
    pub percent_b: Option<Decimal>,
}

#[derive(Debug, Clone, Default)]
pub struct BollingerSeries {
    pub upper: Series,
    pub middle: Series,
    pub lower: Series,
    pub percent_b: Series,
    pub bandwidth: Series,
}

pub fn bollinger_series(
    prices: &[Decimal],
    period: usize,
    std_dev_multiplier: Decimal,
) -> BollingerSeries {
    let mut bands = BollingerBands::new(period, std_dev_multiplier);
    let mut out = BollingerSeries::default();

    for price in prices {
        let output = bands.update(*price);
        out.upper.push(output.map(|o| o.upper));
        out.middle.push(output.map(|o| o.middle));
        out.lower.push(output.map(|o| o.lower));
        out.percent_b.push(output.and_then(|o| o.percent_b));
        out.bandwidth.push(output.and_then(|o| o.bandwidth));
    }

    out
}
