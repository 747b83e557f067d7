//! Per-run indicator storage.
//!
//! Series are computed once per run over the full, immutable candle slice and
//! then read through an [`IndicatorView`] that hides every index at or after the
//! step being decided.

use rayon::prelude::*;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use super::{
    adx_series, atr_series, bollinger_series, ema_series, macd_series, rsi_series, sma_series,
    undefined_series, volume_ratio_series, volume_sma_series, Series, MAX_PERIOD,
};
use crate::types::{closes, volumes, Candle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BollingerPart {
    Upper,
    Middle,
    Lower,
    PercentB,
    Bandwidth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MacdPart {
    Line,
    Signal,
    Histogram,
}

/// Every indicator the library can compute, with its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndicatorKey {
    Sma(usize),
    Ema(usize),
    Rsi(usize),
    Atr(usize),
    Adx(usize),
    PlusDi(usize),
    MinusDi(usize),
    Macd {
        part: MacdPart,
        fast: usize,
        slow: usize,
        signal: usize,
    },
    Bollinger {
        part: BollingerPart,
        period: usize,
        std_dev: Decimal,
    },
    VolumeSma(usize),
    VolumeRatio(usize),
}

impl IndicatorKey {
    pub fn macd_histogram(fast: usize, slow: usize, signal: usize) -> Self {
        IndicatorKey::Macd {
            part: MacdPart::Histogram,
            fast,
            slow,
            signal,
        }
    }

    pub fn bollinger(part: BollingerPart, period: usize, std_dev: Decimal) -> Self {
        IndicatorKey::Bollinger {
            part,
            period,
            std_dev,
        }
    }

    /// Index of the first defined value.
    pub fn warmup(&self) -> usize {
        match *self {
            IndicatorKey::Sma(p)
            | IndicatorKey::Ema(p)
            | IndicatorKey::Atr(p)
            | IndicatorKey::VolumeSma(p)
            | IndicatorKey::VolumeRatio(p) => p.saturating_sub(1),
            IndicatorKey::Rsi(p) | IndicatorKey::PlusDi(p) | IndicatorKey::MinusDi(p) => p,
            IndicatorKey::Adx(p) => p.saturating_mul(2).saturating_sub(1),
            IndicatorKey::Macd {
                part, slow, signal, ..
            } => match part {
                MacdPart::Line => slow.saturating_sub(1),
                MacdPart::Signal | MacdPart::Histogram => {
                    slow.saturating_sub(1).saturating_add(signal.saturating_sub(1))
                }
            },
            IndicatorKey::Bollinger { period, .. } => period.saturating_sub(1),
        }
    }

    pub fn compute(&self, candles: &[Candle]) -> Series {
        match *self {
            IndicatorKey::Sma(p) => sma_series(&closes(candles), p),
            IndicatorKey::Ema(p) => ema_series(&closes(candles), p),
            IndicatorKey::Rsi(p) => rsi_series(&closes(candles), p),
            IndicatorKey::Atr(p) => atr_series(candles, p),
            IndicatorKey::Adx(p) => adx_series(candles, p).adx,
            IndicatorKey::PlusDi(p) => adx_series(candles, p).plus_di,
            IndicatorKey::MinusDi(p) => adx_series(candles, p).minus_di,
            IndicatorKey::Macd {
                part,
                fast,
                slow,
                signal,
            } => {
                let macd = macd_series(&closes(candles), fast, slow, signal);
                match part {
                    MacdPart::Line => macd.line,
                    MacdPart::Signal => macd.signal,
                    MacdPart::Histogram => macd.histogram,
                }
            }
            IndicatorKey::Bollinger {
                part,
                period,
                std_dev,
            } => {
                let bands = bollinger_series(&closes(candles), period, std_dev);
                match part {
                    BollingerPart::Upper => bands.upper,
                    BollingerPart::Middle => bands.middle,
                    BollingerPart::Lower => bands.lower,
                    BollingerPart::PercentB => bands.percent_b,
                    BollingerPart::Bandwidth => bands.bandwidth,
                }
            }
            IndicatorKey::VolumeSma(p) => volume_sma_series(&volumes(candles), p),
            IndicatorKey::VolumeRatio(p) => volume_ratio_series(&volumes(candles), p),
        }
    }
}

impl fmt::Display for IndicatorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorKey::Sma(p) => write!(f, "sma_{}", p),
            IndicatorKey::Ema(p) => write!(f, "ema_{}", p),
            IndicatorKey::Rsi(p) => write!(f, "rsi_{}", p),
            IndicatorKey::Atr(p) => write!(f, "atr_{}", p),
            IndicatorKey::Adx(p) => write!(f, "adx_{}", p),
            IndicatorKey::PlusDi(p) => write!(f, "plus_di_{}", p),
            IndicatorKey::MinusDi(p) => write!(f, "minus_di_{}", p),
            IndicatorKey::Macd {
                part,
                fast,
                slow,
                signal,
            } => {
                let prefix = match part {
                    MacdPart::Line => "macd_line",
                    MacdPart::Signal => "macd_signal",
                    MacdPart::Histogram => "macd_hist",
                };
                write!(f, "{}_{}_{}_{}", prefix, fast, slow, signal)
            }
            IndicatorKey::Bollinger {
                part,
                period,
                std_dev,
            } => {
                let prefix = match part {
                    BollingerPart::Upper => "bb_upper",
                    BollingerPart::Middle => "bb_middle",
                    BollingerPart::Lower => "bb_lower",
                    BollingerPart::PercentB => "bb_pctb",
                    BollingerPart::Bandwidth => "bb_width",
                };
                write!(f, "{}_{}_{}", prefix, period, std_dev.normalize())
            }
            IndicatorKey::VolumeSma(p) => write!(f, "volume_sma_{}", p),
            IndicatorKey::VolumeRatio(p) => write!(f, "volume_ratio_{}", p),
        }
    }
}

fn parse_periods(params: &str, count: usize) -> Option<Vec<usize>> {
    let periods: Vec<usize> = params
        .split('_')
        .map(|p| p.parse::<usize>().ok().filter(|v| (1..=MAX_PERIOD).contains(v)))
        .collect::<Option<Vec<_>>>()?;
    (periods.len() == count).then_some(periods)
}

impl FromStr for IndicatorKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase();
        let invalid = || format!("Unknown indicator key: {}", s);

        // longest prefixes first so `volume_sma_` is not read as `sma_`
        const SINGLE: [(&str, fn(usize) -> IndicatorKey); 9] = [
            ("volume_ratio_", IndicatorKey::VolumeRatio),
            ("volume_sma_", IndicatorKey::VolumeSma),
            ("minus_di_", IndicatorKey::MinusDi),
            ("plus_di_", IndicatorKey::PlusDi),
            ("sma_", IndicatorKey::Sma),
            ("ema_", IndicatorKey::Ema),
            ("rsi_", IndicatorKey::Rsi),
            ("atr_", IndicatorKey::Atr),
            ("adx_", IndicatorKey::Adx),
        ];
        for (prefix, build) in SINGLE {
            if let Some(rest) = key.strip_prefix(prefix) {
                let periods = parse_periods(rest, 1).ok_or_else(invalid)?;
                return Ok(build(periods[0]));
            }
        }

        const MACD: [(&str, MacdPart); 3] = [
            ("macd_line_", MacdPart::Line),
            ("macd_signal_", MacdPart::Signal),
            ("macd_hist_", MacdPart::Histogram),
        ];
        for (prefix, part) in MACD {
            if let Some(rest) = key.strip_prefix(prefix) {
                let periods = parse_periods(rest, 3).ok_or_else(invalid)?;
                if periods[0] >= periods[1] {
                    return Err(invalid());
                }
                return Ok(IndicatorKey::Macd {
                    part,
                    fast: periods[0],
                    slow: periods[1],
                    signal: periods[2],
                });
            }
        }

        const BANDS: [(&str, BollingerPart); 5] = [
            ("bb_upper_", BollingerPart::Upper),
            ("bb_middle_", BollingerPart::Middle),
            ("bb_lower_", BollingerPart::Lower),
            ("bb_pctb_", BollingerPart::PercentB),
            ("bb_width_", BollingerPart::Bandwidth),
        ];
        for (prefix, part) in BANDS {
            if let Some(rest) = key.strip_prefix(prefix) {
                let (period, std_dev) = rest.split_once('_').ok_or_else(invalid)?;
                let period = parse_periods(period, 1).ok_or_else(invalid)?[0];
                let std_dev = Decimal::from_str(std_dev)
                    .ok()
                    .filter(|d| *d > Decimal::ZERO)
                    .ok_or_else(invalid)?;
                return Ok(IndicatorKey::Bollinger {
                    part,
                    period,
                    std_dev: std_dev.normalize(),
                });
            }
        }

        Err(invalid())
    }
}

/// A requested indicator. Keys that fail to parse are kept so that lookups
/// degrade to "undefined" instead of aborting the run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndicatorRef {
    Known(IndicatorKey),
    Unknown(String),
}

impl IndicatorRef {
    pub fn parse(key: &str) -> Self {
        match key.parse::<IndicatorKey>() {
            Ok(key) => IndicatorRef::Known(key),
            Err(e) => {
                warn!("{}; treating as undefined", e);
                IndicatorRef::Unknown(key.to_string())
            }
        }
    }

    pub fn warmup(&self) -> usize {
        match self {
            IndicatorRef::Known(key) => key.warmup(),
            IndicatorRef::Unknown(_) => 0,
        }
    }
}

impl From<IndicatorKey> for IndicatorRef {
    fn from(key: IndicatorKey) -> Self {
        IndicatorRef::Known(key)
    }
}

impl fmt::Display for IndicatorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorRef::Known(key) => key.fmt(f),
            IndicatorRef::Unknown(raw) => write!(f, "{} (unknown)", raw),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IndicatorCache {
    len: usize,
    series: HashMap<IndicatorRef, Series>,
}

impl IndicatorCache {
    /// Computes every distinct requested indicator. Distinct keys run in
    /// parallel; each series is still built front to back.
    pub fn precompute(candles: &[Candle], refs: &[IndicatorRef]) -> Self {
        let mut seen = HashSet::new();
        let distinct: Vec<&IndicatorRef> = refs.iter().filter(|r| seen.insert(*r)).collect();

        let series: HashMap<IndicatorRef, Series> = distinct
            .par_iter()
            .map(|r| {
                let values = match r {
                    IndicatorRef::Known(key) => key.compute(candles),
                    IndicatorRef::Unknown(_) => undefined_series(candles.len()),
                };
                ((*r).clone(), values)
            })
            .collect();

        debug!("Precomputed {} indicator series over {} candles", series.len(), candles.len());

        Self {
            len: candles.len(),
            series,
        }
    }

    /// The whole series, future bars included. Strategies read through [`IndicatorView`].
    pub fn full_series(&self, key: &IndicatorRef) -> Option<&Series> {
        self.series.get(key)
    }

    /// Read access limited to indices `< visible`.
    pub fn view(&self, visible: usize) -> IndicatorView<'_> {
        IndicatorView {
            cache: self,
            visible: visible.min(self.len),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IndicatorView<'a> {
    cache: &'a IndicatorCache,
    visible: usize,
}

impl<'a> IndicatorView<'a> {
    pub fn visible(&self) -> usize {
        self.visible
    }

    /// Value `bars_ago` bars before the newest visible one.
    pub fn value(&self, key: &IndicatorRef, bars_ago: usize) -> Option<Decimal> {
        let index = self.visible.checked_sub(bars_ago + 1)?;
        self.cache.full_series(key)?.get(index).copied().flatten()
    }

    pub fn latest(&self, key: &IndicatorRef) -> Option<Decimal> {
        self.value(key, 0)
    }

    pub fn series(&self, key: &IndicatorRef) -> &'a [Option<Decimal>] {
        match self.cache.full_series(key) {
            Some(series) => &series[..self.visible.min(series.len())],
            None => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn candles(n: usize) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let close = dec!(100) + Decimal::from(i as u32);
                Candle {
                    open_time: start + Duration::hours(i as i64),
                    close_time: start + Duration::hours(i as i64 + 1),
                    open: close - dec!(0.5),
                    high: close + dec!(1),
                    low: close - dec!(1),
                    close,
                    volume: dec!(10) + Decimal::from(i as u32),
                }
            })
            .collect()
    }

    #[test]
    fn test_parse_keys() {
        assert_eq!("ema_200".parse::<IndicatorKey>(), Ok(IndicatorKey::Ema(200)));
        assert_eq!("volume_ratio_20".parse::<IndicatorKey>(), Ok(IndicatorKey::VolumeRatio(20)));
        assert_eq!("plus_di_14".parse::<IndicatorKey>(), Ok(IndicatorKey::PlusDi(14)));
        assert_eq!(
            "macd_hist_12_26_9".parse::<IndicatorKey>(),
            Ok(IndicatorKey::macd_histogram(12, 26, 9))
        );
        assert_eq!(
            "BB_UPPER_20_2".parse::<IndicatorKey>(),
            Ok(IndicatorKey::bollinger(BollingerPart::Upper, 20, dec!(2)))
        );
        assert!("ema_0".parse::<IndicatorKey>().is_err());
        assert!("ema_10001".parse::<IndicatorKey>().is_err());
        assert!("adx_18446744073709551615".parse::<IndicatorKey>().is_err());
        assert!("ema_fast".parse::<IndicatorKey>().is_err());
        assert!("macd_hist_26_12_9".parse::<IndicatorKey>().is_err());
        assert!("supertrend_10".parse::<IndicatorKey>().is_err());
    }

    #[test]
    fn test_display_parses_back() {
        for raw in ["sma_50", "rsi_14", "macd_signal_12_26_9", "bb_pctb_20_2.5", "minus_di_7"] {
            let key: IndicatorKey = raw.parse().unwrap();
            assert_eq!(key.to_string(), raw);
        }
    }

    #[test]
    fn test_unknown_key_degrades_to_undefined() {
        let data = candles(30);
        let unknown = IndicatorRef::parse("hull_ma_9");
        assert!(matches!(unknown, IndicatorRef::Unknown(_)));

        let cache = IndicatorCache::precompute(&data, &[unknown.clone()]);
        assert_eq!(cache.full_series(&unknown).map(|s| s.len()), Some(30));
        assert_eq!(cache.view(30).latest(&unknown), None);
    }

    #[test]
    fn test_view_hides_current_and_future_bars() {
        let data = candles(30);
        let sma = IndicatorRef::from(IndicatorKey::Sma(3));
        let cache = IndicatorCache::precompute(&data, &[sma.clone(), sma.clone()]);

        let view = cache.view(10);
        // newest visible index is 9: mean of closes 107, 108, 109
        assert_eq!(view.latest(&sma), Some(dec!(108)));
        assert_eq!(view.value(&sma, 1), Some(dec!(107)));
        assert_eq!(view.series(&sma).len(), 10);
        assert_eq!(view.value(&sma, 10), None);
        assert_eq!(cache.view(0).latest(&sma), None);
    }

    #[test]
    fn test_warmup_matches_first_defined_index() {
        let data = candles(80);
        let keys = [
            IndicatorKey::Ema(10),
            IndicatorKey::Rsi(14),
            IndicatorKey::Atr(14),
            IndicatorKey::Adx(14),
            IndicatorKey::PlusDi(14),
            IndicatorKey::macd_histogram(12, 26, 9),
            IndicatorKey::bollinger(BollingerPart::Middle, 20, dec!(2)),
            IndicatorKey::VolumeRatio(20),
        ];
        for key in keys {
            let series = key.compute(&data);
            let first = series.iter().position(|v| v.is_some());
            assert_eq!(first, Some(key.warmup()), "{}", key);
        }
    }
}
