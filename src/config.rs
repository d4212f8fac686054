//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files with environment
//! variable support for API credentials.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub trend: TrendConfig,
    #[serde(default)]
    pub regime: RegimeConfig,
    #[serde(default)]
    pub backtest: BacktestConfig,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;

        // Load API credentials from environment if not set
        if let Ok(api_key) = std::env::var("GRIDAI_API_KEY") {
            config.exchange.api_key = Some(api_key);
        }
        if let Ok(api_secret) = std::env::var("GRIDAI_API_SECRET") {
            config.exchange.api_secret = Some(api_secret);
        }

        Ok(config)
    }
}

/// Exchange configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
    pub symbol: String,
    /// Canonical candle timeframe the engine runs on
    pub timeframe: String,
    pub fee_rate: f64,
    pub assumed_slippage: f64,
    /// Engine tick cadence in seconds (live/paper mode)
    pub poll_interval_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            api_key: None,
            api_secret: None,
            symbol: "BTCUSDT".to_string(),
            timeframe: "5m".to_string(),
            fee_rate: 0.001, // 0.1%
            assumed_slippage: 0.0005,
            poll_interval_secs: 10,
        }
    }
}

/// Grid ladder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Number of levels per side of the reference price
    pub num_grids: u32,
    /// Per-order size in quote currency; level quantity = order_size / price
    pub order_size: f64,
    /// Spacing table by volatility regime, as fractions (0.005 = 0.5%)
    pub spacing: SpacingTable,
    /// Size multiplier applied when trading on the fail-safe regime default
    pub failsafe_size_factor: f64,
    /// Optional per-distance size multipliers (index = |level| - 1); the last
    /// entry applies to all levels beyond the table. Empty = uniform sizing.
    #[serde(default)]
    pub size_skew: Vec<f64>,
    /// Center drift (fraction of center price) that forces a regrid
    pub recalibration_drift_pct: f64,
    /// Live order price drift (fraction) tolerated before reconciliation
    /// cancels and re-places the level
    pub price_tolerance_pct: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        GridConfig {
            num_grids: 5,
            order_size: 50.0,
            spacing: SpacingTable::default(),
            failsafe_size_factor: 0.5,
            size_skew: Vec::new(),
            recalibration_drift_pct: 0.02,
            price_tolerance_pct: 0.001,
        }
    }
}

/// Explicit per-regime spacing table; values are fractions, not interpolated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpacingTable {
    pub low_pct: f64,
    pub medium_pct: f64,
    pub high_pct: f64,
}

impl Default for SpacingTable {
    fn default() -> Self {
        SpacingTable {
            low_pct: 0.005,
            medium_pct: 0.01,
            high_pct: 0.02,
        }
    }
}

/// Risk guardrail configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub initial_capital: f64,
    /// Drawdown from the running equity peak that force-liquidates, fraction
    pub max_drawdown_pct: f64,
    /// Max fraction of equity deployed as inventory plus open buy notional
    pub max_capital_pct: f64,
    /// Loss since session start (quote currency) that force-liquidates
    pub daily_loss_cap: f64,
    /// Hard circuit breaker: loss since session start as a fraction of
    /// starting equity, independent of the configured caps
    pub emergency_stop_pct: f64,
    pub max_orders_per_day: u32,
    pub retry_max_attempts: u32,
    /// Base backoff delay for rejected orders; doubles per attempt
    pub retry_backoff_ms: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        RiskConfig {
            initial_capital: 10_000.0,
            max_drawdown_pct: 0.15,
            max_capital_pct: 0.50,
            daily_loss_cap: 500.0,
            emergency_stop_pct: 0.10,
            max_orders_per_day: 200,
            retry_max_attempts: 5,
            retry_backoff_ms: 2_000,
        }
    }
}

/// Trend gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendConfig {
    pub ma_fast_period: usize,
    pub ma_slow_period: usize,
    pub rsi_period: usize,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    pub adx_period: usize,
    pub adx_strong_trend: f64,
    /// When false the gate always permits entries (diagnostics only)
    pub pause_on_strong_trend: bool,
}

impl Default for TrendConfig {
    fn default() -> Self {
        TrendConfig {
            ma_fast_period: 20,
            ma_slow_period: 50,
            rsi_period: 14,
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            adx_period: 14,
            adx_strong_trend: 25.0,
            pause_on_strong_trend: true,
        }
    }
}

/// Regime classifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeConfig {
    pub model_path: String,
    /// Minimum classifier confidence before regime output adjusts spacing
    pub confidence_threshold: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        RegimeConfig {
            model_path: "models/regime_model.json".to_string(),
            confidence_threshold: 0.6,
        }
    }
}

/// Backtest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub data_dir: String,
    pub results_dir: String,
    /// Candles of warm-up before the replay starts trading
    pub lookback: usize,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            data_dir: "data".to_string(),
            results_dir: "results".to_string(),
            lookback: 100,
        }
    }
}
