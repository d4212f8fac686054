//! Volatility regime classification
//!
//! Wraps a trained model behind a fixed `classify` interface so the engine
//! never depends on how the model was produced. The shipped implementation
//! is a quantile-threshold model over six volatility features, fitted
//! offline by the `train` subcommand and stored as JSON.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::indicators;
use crate::types::Candle;

/// Discrete market volatility regime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Regime {
    Low,
    Medium,
    High,
}

impl Regime {
    pub fn as_str(self) -> &'static str {
        match self {
            Regime::Low => "low",
            Regime::Medium => "medium",
            Regime::High => "high",
        }
    }
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Regime::Low => "LOW",
            Regime::Medium => "MEDIUM",
            Regime::High => "HIGH",
        })
    }
}

/// Volatility features derived from the trailing candle window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureVector {
    pub atr_14: f64,
    /// Bollinger band width relative to the 20-bar mean
    pub bb_width: f64,
    pub variance_short: f64,
    pub variance_long: f64,
    pub returns_std: f64,
    /// Last bar's high-low range as a percentage of close
    pub range_pct: f64,
}

impl FeatureVector {
    /// Windows used by the long-variance feature dominate the warm-up
    pub const MIN_CANDLES: usize = 150;

    pub fn from_candles(candles: &[Candle]) -> Option<Self> {
        if candles.len() < Self::MIN_CANDLES {
            return None;
        }

        let close: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let high: Vec<f64> = candles.iter().map(|c| c.high).collect();
        let low: Vec<f64> = candles.iter().map(|c| c.low).collect();

        let atr_14 = indicators::atr(&high, &low, &close, 14)
            .last()
            .copied()
            .flatten()?;

        let (bb_upper, bb_mid, bb_lower) = indicators::bollinger_bands(&close, 20, 2.0);
        let bb_width = match (
            bb_upper.last().copied().flatten(),
            bb_mid.last().copied().flatten(),
            bb_lower.last().copied().flatten(),
        ) {
            (Some(u), Some(m), Some(l)) if m != 0.0 => (u - l) / m,
            _ => return None,
        };

        let variance_short = indicators::rolling_variance(&close, 12)
            .last()
            .copied()
            .flatten()?;
        let variance_long = indicators::rolling_variance(&close, 144)
            .last()
            .copied()
            .flatten()?;
        let returns_std = indicators::returns_std(&close, 24)
            .last()
            .copied()
            .flatten()?;

        let last = candles.last()?;
        let range_pct = if last.close != 0.0 {
            (last.high - last.low) / last.close * 100.0
        } else {
            0.0
        };

        Some(Self {
            atr_14,
            bb_width,
            variance_short,
            variance_long,
            returns_std,
            range_pct,
        })
    }
}

/// Inference contract for any regime model.
///
/// Implementations are pure functions of the feature vector; the engine can
/// swap a statistical, learned, or rule-based model without other changes.
pub trait RegimeClassifier: Send + Sync {
    fn classify(&self, features: &FeatureVector) -> EngineResult<(Regime, f64)>;
}

/// Adapter the engine talks to. Holds whatever model is loaded; classifying
/// with no model is a `ModelUnavailable` error that the engine maps to the
/// fail-safe default (High regime, zero confidence).
pub struct RegimeAdapter {
    model: Option<Box<dyn RegimeClassifier>>,
}

impl RegimeAdapter {
    pub fn unloaded() -> Self {
        Self { model: None }
    }

    pub fn with_model(model: Box<dyn RegimeClassifier>) -> Self {
        Self { model: Some(model) }
    }

    /// Load the quantile model from disk; missing files leave the adapter
    /// unloaded so the engine runs on the fail-safe default.
    pub fn load(path: impl AsRef<Path>) -> Self {
        match QuantileRegimeModel::load(&path) {
            Ok(model) => {
                info!("regime model loaded from {}", path.as_ref().display());
                Self::with_model(Box::new(model))
            }
            Err(e) => {
                warn!("regime model not loaded ({e}); running on fail-safe default");
                Self::unloaded()
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    pub fn classify(&self, features: &FeatureVector) -> EngineResult<(Regime, f64)> {
        match &self.model {
            Some(model) => {
                let (regime, confidence) = model.classify(features)?;
                Ok((regime, confidence.clamp(0.0, 1.0)))
            }
            None => Err(EngineError::ModelUnavailable(
                "no regime model loaded".to_string(),
            )),
        }
    }
}

/// ATR-quantile cut points fitted on historical candles.
///
/// The label scheme matches the training data: ATR at or below the 33rd
/// percentile is Low, at or above the 66th is High, Medium between.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantileRegimeModel {
    pub atr_low_cut: f64,
    pub atr_high_cut: f64,
}

impl QuantileRegimeModel {
    /// Fit cut points from a candle history
    pub fn fit(candles: &[Candle]) -> Option<Self> {
        let close: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let high: Vec<f64> = candles.iter().map(|c| c.high).collect();
        let low: Vec<f64> = candles.iter().map(|c| c.low).collect();

        let mut atrs: Vec<f64> = indicators::atr(&high, &low, &close, 14)
            .into_iter()
            .flatten()
            .collect();
        if atrs.len() < 3 {
            return None;
        }
        atrs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let quantile = |q: f64| {
            let idx = ((atrs.len() - 1) as f64 * q).round() as usize;
            atrs[idx]
        };

        Some(Self {
            atr_low_cut: quantile(0.33),
            atr_high_cut: quantile(0.66),
        })
    }

    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| EngineError::ModelUnavailable(e.to_string()))?;
        serde_json::from_str(&contents).map_err(|e| EngineError::ModelUnavailable(e.to_string()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path.as_ref(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Confidence grows with distance from the nearest cut point, scaled by
    /// the band width, floored at 0.5 (the classifier is never less sure
    /// than a coin flip about its own band).
    fn confidence(&self, atr: f64) -> f64 {
        let band = (self.atr_high_cut - self.atr_low_cut).max(f64::EPSILON);
        let margin = if atr <= self.atr_low_cut {
            self.atr_low_cut - atr
        } else if atr >= self.atr_high_cut {
            atr - self.atr_high_cut
        } else {
            (atr - self.atr_low_cut).min(self.atr_high_cut - atr)
        };
        (0.5 + margin / band).min(1.0)
    }
}

impl RegimeClassifier for QuantileRegimeModel {
    fn classify(&self, features: &FeatureVector) -> EngineResult<(Regime, f64)> {
        let atr = features.atr_14;
        let regime = if atr <= self.atr_low_cut {
            Regime::Low
        } else if atr >= self.atr_high_cut {
            Regime::High
        } else {
            Regime::Medium
        };
        Ok((regime, self.confidence(atr)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(atr: f64) -> FeatureVector {
        FeatureVector {
            atr_14: atr,
            bb_width: 0.02,
            variance_short: 1.0,
            variance_long: 1.5,
            returns_std: 0.01,
            range_pct: 0.5,
        }
    }

    fn model() -> QuantileRegimeModel {
        QuantileRegimeModel {
            atr_low_cut: 100.0,
            atr_high_cut: 300.0,
        }
    }

    #[test]
    fn test_classify_bands() {
        let m = model();
        assert_eq!(m.classify(&features(50.0)).unwrap().0, Regime::Low);
        assert_eq!(m.classify(&features(200.0)).unwrap().0, Regime::Medium);
        assert_eq!(m.classify(&features(500.0)).unwrap().0, Regime::High);
    }

    #[test]
    fn test_confidence_bounds() {
        let m = model();
        for atr in [0.0, 100.0, 150.0, 200.0, 300.0, 1000.0] {
            let (_, c) = m.classify(&features(atr)).unwrap();
            assert!((0.5..=1.0).contains(&c), "confidence {c} out of range");
        }
    }

    #[test]
    fn test_confidence_grows_with_margin() {
        let m = model();
        let (_, near) = m.classify(&features(310.0)).unwrap();
        let (_, far) = m.classify(&features(600.0)).unwrap();
        assert!(far > near);
    }

    #[test]
    fn test_unloaded_adapter_errors() {
        let adapter = RegimeAdapter::unloaded();
        let err = adapter.classify(&features(50.0)).unwrap_err();
        assert!(matches!(err, EngineError::ModelUnavailable(_)));
    }

    #[test]
    fn test_fit_orders_cut_points() {
        use chrono::{Duration, Utc};
        let start = Utc::now();
        let candles: Vec<Candle> = (0..120)
            .map(|i| {
                // Volatility ramps up over the history
                let spread = 1.0 + i as f64 * 0.1;
                let price = 100.0;
                Candle::new_unchecked(
                    start + Duration::minutes(5 * i as i64),
                    price,
                    price + spread,
                    price - spread,
                    price,
                    1.0,
                )
            })
            .collect();

        let model = QuantileRegimeModel::fit(&candles).unwrap();
        assert!(model.atr_low_cut < model.atr_high_cut);
    }
}
