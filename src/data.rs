//! Historical data loading
//!
//! Loads OHLCV candles from CSV files (datetime, open, high, low, close,
//! volume) for backtests and model training.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{info, warn};

use crate::types::Candle;

/// Load OHLCV data from a CSV file, dropping invalid bars with a warning
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Candle>> {
    let mut reader = csv::Reader::from_path(path.as_ref()).context("Failed to open CSV file")?;

    let mut candles = Vec::new();
    let mut dropped = 0usize;

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;

        let ts_str = record.get(0).context("Missing datetime column")?;
        let ts = ts_str
            .parse::<DateTime<Utc>>()
            .or_else(|_| {
                chrono::NaiveDateTime::parse_from_str(ts_str, "%Y-%m-%d %H:%M:%S")
                    .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
            })
            .with_context(|| format!("Failed to parse datetime: {ts_str}"))?;

        let field = |idx: usize, name: &str| -> Result<f64> {
            record
                .get(idx)
                .with_context(|| format!("Missing {name} column"))?
                .parse::<f64>()
                .with_context(|| format!("Failed to parse {name}"))
        };

        let candle = Candle {
            ts,
            open: field(1, "open")?,
            high: field(2, "high")?,
            low: field(3, "low")?,
            close: field(4, "close")?,
            volume: field(5, "volume").unwrap_or(0.0),
        };

        if candle.is_valid() {
            candles.push(candle);
        } else {
            dropped += 1;
        }
    }

    if dropped > 0 {
        warn!(dropped, "invalid candles dropped during load");
    }

    candles.sort_by_key(|c| c.ts);
    info!(
        count = candles.len(),
        path = %path.as_ref().display(),
        "candles loaded"
    );
    Ok(candles)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_csv(contents: &str) -> temppath::TempCsv {
        temppath::TempCsv::new(contents)
    }

    // Minimal scoped temp-file helper so tests clean up after themselves
    mod temppath {
        use std::path::PathBuf;

        pub struct TempCsv {
            pub path: PathBuf,
        }

        impl TempCsv {
            pub fn new(contents: &str) -> Self {
                let path = std::env::temp_dir().join(format!(
                    "gridai-test-{}-{}.csv",
                    std::process::id(),
                    crate::oms::next_order_id()
                ));
                std::fs::write(&path, contents).unwrap();
                Self { path }
            }
        }

        impl Drop for TempCsv {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }

    #[test]
    fn test_load_csv_parses_and_sorts() {
        let csv = write_csv(
            "datetime,open,high,low,close,volume\n\
             2024-01-01 00:10:00,101.0,102.0,100.0,101.5,3.0\n\
             2024-01-01 00:05:00,100.0,101.0,99.0,100.5,2.0\n",
        );

        let candles = load_csv(&csv.path).unwrap();
        assert_eq!(candles.len(), 2);
        assert!(candles[0].ts < candles[1].ts);
        assert_eq!(candles[0].close, 100.5);
    }

    #[test]
    fn test_load_csv_drops_invalid_bars() {
        let csv = write_csv(
            "datetime,open,high,low,close,volume\n\
             2024-01-01 00:05:00,100.0,99.0,101.0,100.5,2.0\n\
             2024-01-01 00:10:00,101.0,102.0,100.0,101.5,3.0\n",
        );

        let candles = load_csv(&csv.path).unwrap();
        assert_eq!(candles.len(), 1);
    }

    #[test]
    fn test_load_csv_defaults_missing_volume() {
        let csv = write_csv(
            "datetime,open,high,low,close\n\
             2024-01-01 00:05:00,100.0,101.0,99.0,100.5\n",
        );

        let candles = load_csv(&csv.path).unwrap();
        assert_eq!(candles[0].volume, 0.0);
    }
}
