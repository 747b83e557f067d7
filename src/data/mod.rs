use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use crate::types::Candle;

/// Loads a candle file. `.json` is read as an array of candles, `.csv` as
/// `open_time,close_time,open,high,low,close,volume` rows; other extensions
/// are sniffed from the first character.
pub fn load_candles<P: AsRef<Path>>(path: P) -> Result<Vec<Candle>> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read candle file {}", path.display()))?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    let is_json = match extension.as_deref() {
        Some("json") => true,
        Some("csv") => false,
        _ => raw.trim_start().starts_with('['),
    };

    let candles = if is_json {
        parse_candles_json(&raw)
    } else {
        parse_candles_csv(raw.as_bytes())
    }
    .with_context(|| format!("Failed to parse candle file {}", path.display()))?;

    info!("Loaded {} candles from {}", candles.len(), path.display());
    Ok(candles)
}

pub fn parse_candles_json(raw: &str) -> Result<Vec<Candle>> {
    Ok(serde_json::from_str(raw)?)
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    open_time: String,
    close_time: String,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: String,
}

impl CsvRow {
    fn into_candle(self) -> Result<Candle> {
        Ok(Candle {
            open_time: parse_timestamp(&self.open_time)?,
            close_time: parse_timestamp(&self.close_time)?,
            open: parse_decimal("open", &self.open)?,
            high: parse_decimal("high", &self.high)?,
            low: parse_decimal("low", &self.low)?,
            close: parse_decimal("close", &self.close)?,
            volume: parse_decimal("volume", &self.volume)?,
        })
    }
}

pub fn parse_candles_csv<R: Read>(reader: R) -> Result<Vec<Candle>> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut candles = Vec::new();

    for (row, result) in csv_reader.deserialize::<CsvRow>().enumerate() {
        let record = result.with_context(|| format!("row {}", row + 1))?;
        candles.push(record.into_candle().with_context(|| format!("row {}", row + 1))?);
    }

    Ok(candles)
}

/// RFC 3339, or integer milliseconds since the Unix epoch.
fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(millis) = value.parse::<i64>() {
        return Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| anyhow!("timestamp {} out of range", millis));
    }
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp '{}'", value))
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal> {
    if value.is_empty() {
        bail!("missing {}", field);
    }
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .with_context(|| format!("invalid {} '{}'", field, value))
}
