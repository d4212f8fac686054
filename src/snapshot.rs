//! Per-tick market state
//!
//! `MarketSnapshot` is what one engine tick ingests; `IndicatorSnapshot` is
//! the derived indicator row persisted per timestamp on the canonical
//! timeframe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::indicators;
use crate::types::Candle;

/// Market state observed by one engine tick
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub ts: DateTime<Utc>,
    /// Last traded / close price used as the grid reference
    pub price: f64,
    /// Intrabar range of the bar that produced this snapshot
    pub low: f64,
    pub high: f64,
}

impl MarketSnapshot {
    pub fn from_candle(candle: &Candle) -> Self {
        Self {
            ts: candle.ts,
            price: candle.close,
            low: candle.low,
            high: candle.high,
        }
    }
}

/// One indicator row per timestamp, derived deterministically from the
/// trailing candle window. Never mutated after write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub ts: DateTime<Utc>,
    pub ema20: Option<f64>,
    pub ema50: Option<f64>,
    pub ema200: Option<f64>,
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_lower: Option<f64>,
    pub atr: Option<f64>,
    pub adx: Option<f64>,
}

impl IndicatorSnapshot {
    /// Compute the indicator row for the last bar of `candles`.
    ///
    /// Fields whose warm-up window exceeds the available history are None;
    /// callers that need a specific indicator check for it explicitly.
    pub fn compute(candles: &[Candle]) -> Option<Self> {
        let last = candles.last()?;

        let close: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let high: Vec<f64> = candles.iter().map(|c| c.high).collect();
        let low: Vec<f64> = candles.iter().map(|c| c.low).collect();

        let ema20 = indicators::ema(&close, 20);
        let ema50 = indicators::ema(&close, 50);
        let ema200 = indicators::ema(&close, 200);
        let rsi = indicators::rsi(&close, 14);
        let (macd_line, macd_signal) = indicators::macd(&close, 12, 26, 9);
        let (bb_upper, _, bb_lower) = indicators::bollinger_bands(&close, 20, 2.0);
        let atr = indicators::atr(&high, &low, &close, 14);
        let adx = indicators::adx(&high, &low, &close, 14);

        let tail = |v: &[Option<f64>]| v.last().copied().flatten();

        Some(Self {
            ts: last.ts,
            ema20: tail(&ema20),
            ema50: tail(&ema50),
            ema200: tail(&ema200),
            rsi: tail(&rsi),
            macd: tail(&macd_line),
            macd_signal: tail(&macd_signal),
            bb_upper: tail(&bb_upper),
            bb_lower: tail(&bb_lower),
            atr: tail(&atr),
            adx: tail(&adx),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn candles(n: usize) -> Vec<Candle> {
        let start = Utc::now() - Duration::minutes(5 * n as i64);
        (0..n)
            .map(|i| {
                let price = 100.0 + (i as f64 * 0.7).sin() * 2.0;
                Candle::new_unchecked(
                    start + Duration::minutes(5 * i as i64),
                    price,
                    price + 1.0,
                    price - 1.0,
                    price + 0.2,
                    10.0,
                )
            })
            .collect()
    }

    #[test]
    fn test_short_window_leaves_slow_fields_empty() {
        let snap = IndicatorSnapshot::compute(&candles(60)).unwrap();
        assert!(snap.ema20.is_some());
        assert!(snap.ema200.is_none());
    }

    #[test]
    fn test_full_window_populates_all_fields() {
        let snap = IndicatorSnapshot::compute(&candles(250)).unwrap();
        assert!(snap.ema20.is_some());
        assert!(snap.ema50.is_some());
        assert!(snap.ema200.is_some());
        assert!(snap.rsi.is_some());
        assert!(snap.macd.is_some());
        assert!(snap.macd_signal.is_some());
        assert!(snap.bb_upper.is_some());
        assert!(snap.bb_lower.is_some());
        assert!(snap.atr.is_some());
        assert!(snap.adx.is_some());
    }

    #[test]
    fn test_empty_window_yields_nothing() {
        assert!(IndicatorSnapshot::compute(&[]).is_none());
    }

    #[test]
    fn test_snapshot_from_candle() {
        let c = candles(1).pop().unwrap();
        let snap = MarketSnapshot::from_candle(&c);
        assert_eq!(snap.price, c.close);
        assert_eq!(snap.ts, c.ts);
    }
}
