use rust_decimal::Decimal;
use super::{ema::EMA, Series};

/// MACD line = EMA(fast) - EMA(slow); signal = EMA(MACD line, signal period);
/// histogram = MACD line - signal.
#[derive(Debug, Clone)]
pub struct MACD {
    fast_ema: EMA,
    slow_ema: EMA,
    signal_ema: EMA,
    macd_line: Option<Decimal>,
}

impl MACD {
    pub fn new(fast_period: usize, slow_period: usize, signal_period: usize) -> Self {
        Self {
            fast_ema: EMA::new(fast_period),
            slow_ema: EMA::new(slow_period),
            signal_ema: EMA::new(signal_period),
            macd_line: None,
        }
    }

    pub fn update(&mut self, price: Decimal) -> Option<MACDOutput> {
        let fast = self.fast_ema.update(price);
        let slow = self.slow_ema.update(price);

        if let (Some(f), Some(s)) = (fast, slow) {
            let macd_line = f - s;
            self.macd_line = Some(macd_line);

            if let Some(signal) = self.signal_ema.update(macd_line) {
                let histogram = macd_line - signal;

                return Some(MACDOutput {
                    macd_line,
                    signal_line: signal,
                    histogram,
                });
            }
        }

        None
    }

    pub fn macd_line(&self) -> Option<Decimal> {
        self.macd_line
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MACDOutput {
    pub macd_line: Decimal,
    pub signal_line: Decimal,
    pub histogram: Decimal,
}

/// The three MACD outputs, each aligned with the input prices.
#[derive(Debug, Clone, Default)]
pub struct MacdSeries {
    pub line: Series,
    pub signal: Series,
    pub histogram: Series,
}

pub fn macd_series(prices: &[Decimal], fast: usize, slow: usize, signal: usize) -> MacdSeries {
    let mut macd = MACD::new(fast, slow, signal);
    let mut out = MacdSeries {
        line: Vec::with_capacity(prices.len()),
        signal: Vec::with_capacity(prices.len()),
        histogram: Vec::with_capacity(prices.len()),
    };

    for price in prices {
        match macd.update(*price) {
            Some(output) => {
                out.line.push(Some(output.macd_line));
                out.signal.push(Some(output.signal_line));
                out.histogram.push(Some(output.histogram));
            }
            None => {
                out.line.push(macd.macd_line());
                out.signal.push(None);
                out.histogram.push(None);
            }
        }
    }

    out
}
