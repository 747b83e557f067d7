pub mod ema;
pub mod rsi;
pub mod macd;
pub mod bollinger;
pub mod atr;
pub mod adx;
pub mod volume;
pub mod cache;

pub use ema::*;
pub use rsi::*;
pub use macd::*;
pub use bollinger::*;
pub use atr::*;
pub use adx::*;
pub use volume::*;
pub use cache::*;

use rust_decimal::Decimal;

/// Indicator output aligned index-for-index with its input.
/// `None` marks the warm-up window (or any point where the value is undefined).
pub type Series = Vec<Option<Decimal>>;

/// Longest lookback accepted for an indicator period or timeframe factor.
pub const MAX_PERIOD: usize = 10_000;

/// One message per period outside `1..=MAX_PERIOD`.
pub fn check_periods(section: &str, periods: &[(&str, usize)]) -> Vec<String> {
    periods
        .iter()
        .filter(|(_, period)| *period == 0 || *period > MAX_PERIOD)
        .map(|(name, _)| format!("{}.{} must be between 1 and {}", section, name, MAX_PERIOD))
        .collect()
}

pub fn undefined_series(len: usize) -> Series {
    vec![None; len]
}

pub fn sma(values: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || values.len() < period {
        return None;
    }
    let sum: Decimal = values.iter().rev().take(period).sum();
    Some(sum / Decimal::from(period))
}

/// Population standard deviation over the last `period` values.
pub fn stddev(values: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || values.len() < period {
        return None;
    }
    let mean = sma(values, period)?;
    let variance: Decimal = values
        .iter()
        .rev()
        .take(period)
        .map(|v| {
            let diff = *v - mean;
            diff * diff
        })
        .sum::<Decimal>()
        / Decimal::from(period);

    Some(sqrt_decimal(variance))
}

/// Rolling simple moving average, aligned with `values`.
pub fn sma_series(values: &[Decimal], period: usize) -> Series {
    let mut out = undefined_series(values.len());
    if period == 0 {
        return out;
    }
    let divisor = Decimal::from(period);
    let mut window_sum = Decimal::ZERO;
    for (i, value) in values.iter().enumerate() {
        window_sum += *value;
        if i >= period {
            window_sum -= values[i - period];
        }
        if i + 1 >= period {
            out[i] = Some(window_sum / divisor);
        }
    }
    out
}

pub(crate) fn sqrt_decimal(value: Decimal) -> Decimal {
    if value.is_zero() || value.is_sign_negative() {
        return Decimal::ZERO;
    }

    let mut guess = value / Decimal::from(2);
    if guess.is_zero() {
        guess = value;
    }
    let epsilon = Decimal::new(1, 12);

    for _ in 0..100 {
        let new_guess = (guess + value / guess) / Decimal::from(2);
        if (new_guess - guess).abs() < epsilon {
            return new_guess;
        }
        guess = new_guess;
    }
    guess
}
