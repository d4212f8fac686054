//! Trend gate
//!
//! Decides whether new grid entries are permitted this tick. A strong
//! directional trend (MA crossover confirmed by ADX, or RSI pinned at an
//! extreme while ADX is elevated) suspends new placements; existing open
//! orders are left to fill and unwind.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TrendConfig;
use crate::indicators;
use crate::types::Candle;

/// Directional market state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendState {
    Ranging,
    Bullish,
    Bearish,
    StrongBullish,
    StrongBearish,
}

/// Outcome of one trend evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendSignal {
    pub state: TrendState,
    pub ma_fast: f64,
    pub ma_slow: f64,
    pub rsi: f64,
    pub adx: f64,
    /// False while a strong trend suspends new grid entries
    pub permit_entry: bool,
    pub reason: String,
}

/// Moving-average / RSI / ADX evaluator gating grid entries
#[derive(Debug, Clone)]
pub struct TrendGate {
    config: TrendConfig,
}

impl TrendGate {
    pub fn new(config: TrendConfig) -> Self {
        Self { config }
    }

    /// Candles needed before the gate produces a signal
    pub fn min_candles(&self) -> usize {
        self.config
            .ma_slow_period
            .max(2 * self.config.adx_period)
            .max(self.config.rsi_period + 1)
    }

    /// Evaluate the gate over the trailing candle window.
    ///
    /// Returns None until enough history exists; the engine treats that as
    /// entry permitted (a cold start must be able to arm the first grid).
    pub fn evaluate(&self, candles: &[Candle]) -> Option<TrendSignal> {
        if candles.len() < self.min_candles() {
            return None;
        }

        let close: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let high: Vec<f64> = candles.iter().map(|c| c.high).collect();
        let low: Vec<f64> = candles.iter().map(|c| c.low).collect();

        let ma_fast = indicators::sma(&close, self.config.ma_fast_period)
            .last()
            .copied()
            .flatten()?;
        let ma_slow = indicators::sma(&close, self.config.ma_slow_period)
            .last()
            .copied()
            .flatten()?;
        let rsi = indicators::rsi(&close, self.config.rsi_period)
            .last()
            .copied()
            .flatten()?;
        let adx = indicators::adx(&high, &low, &close, self.config.adx_period)
            .last()
            .copied()
            .flatten()
            .unwrap_or(0.0);

        let strong = adx >= self.config.adx_strong_trend;
        let mut suspend = false;
        let mut reason = String::new();

        let state = if ma_fast > ma_slow {
            if strong {
                suspend = true;
                reason = format!("strong bullish trend (ADX={adx:.1})");
                TrendState::StrongBullish
            } else {
                TrendState::Bullish
            }
        } else if ma_fast < ma_slow {
            if strong {
                suspend = true;
                reason = format!("strong bearish trend (ADX={adx:.1})");
                TrendState::StrongBearish
            } else {
                TrendState::Bearish
            }
        } else {
            TrendState::Ranging
        };

        if strong && rsi >= self.config.rsi_overbought {
            suspend = true;
            reason = format!("overbought in strong trend (RSI={rsi:.1}, ADX={adx:.1})");
        } else if strong && rsi <= self.config.rsi_oversold {
            suspend = true;
            reason = format!("oversold in strong trend (RSI={rsi:.1}, ADX={adx:.1})");
        }

        let permit_entry = !(suspend && self.config.pause_on_strong_trend);

        debug!(
            ?state,
            ma_fast, ma_slow, rsi, adx, permit_entry, "trend gate evaluated"
        );

        Some(TrendSignal {
            state,
            ma_fast,
            ma_slow,
            rsi,
            adx,
            permit_entry,
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn gate() -> TrendGate {
        TrendGate::new(TrendConfig::default())
    }

    fn trending_candles(n: usize, step: f64) -> Vec<Candle> {
        let start = Utc::now();
        (0..n)
            .map(|i| {
                let price = 100.0 + i as f64 * step;
                Candle::new_unchecked(
                    start + Duration::minutes(5 * i as i64),
                    price,
                    price + step.abs().max(0.1),
                    price - step.abs().max(0.1),
                    price + step * 0.5,
                    1.0,
                )
            })
            .collect()
    }

    fn ranging_candles(n: usize) -> Vec<Candle> {
        let start = Utc::now();
        (0..n)
            .map(|i| {
                let price = 100.0 + ((i % 4) as f64 - 1.5) * 0.2;
                Candle::new_unchecked(
                    start + Duration::minutes(5 * i as i64),
                    price,
                    price + 0.3,
                    price - 0.3,
                    price,
                    1.0,
                )
            })
            .collect()
    }

    #[test]
    fn test_insufficient_history_yields_none() {
        assert!(gate().evaluate(&trending_candles(10, 1.0)).is_none());
    }

    #[test]
    fn test_strong_uptrend_suspends_entries() {
        let signal = gate().evaluate(&trending_candles(120, 2.0)).unwrap();
        assert!(matches!(
            signal.state,
            TrendState::StrongBullish | TrendState::Bullish
        ));
        if signal.adx >= 25.0 {
            assert!(!signal.permit_entry);
            assert!(!signal.reason.is_empty());
        }
    }

    #[test]
    fn test_ranging_market_permits_entries() {
        let signal = gate().evaluate(&ranging_candles(120)).unwrap();
        assert!(signal.permit_entry, "ranging market should permit entries");
    }

    #[test]
    fn test_pause_disabled_always_permits() {
        let mut cfg = TrendConfig::default();
        cfg.pause_on_strong_trend = false;
        let gate = TrendGate::new(cfg);
        let signal = gate.evaluate(&trending_candles(120, 2.0)).unwrap();
        assert!(signal.permit_entry);
    }
}
