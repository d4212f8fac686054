//! Regime model training command
//!
//! Fits the ATR-quantile cut points on a candle history and writes the
//! model file the classifier adapter loads at startup.

use anyhow::{Context, Result};
use tracing::info;

use gridai::config::Config;
use gridai::data;
use gridai::regime::QuantileRegimeModel;

pub fn run(config_path: String, data_file: String, output: Option<String>) -> Result<()> {
    let config = Config::from_file(&config_path)
        .with_context(|| format!("Failed to load config from {config_path}"))?;

    let candles = data::load_csv(&data_file)
        .with_context(|| format!("Failed to load candles from {data_file}"))?;
    anyhow::ensure!(
        candles.len() >= 100,
        "need at least 100 candles to fit the regime model, got {}",
        candles.len()
    );

    let model = QuantileRegimeModel::fit(&candles)
        .context("not enough valid ATR samples to fit cut points")?;

    let model_path = output.unwrap_or(config.regime.model_path);
    model.save(&model_path)?;

    info!(
        candles = candles.len(),
        atr_low_cut = model.atr_low_cut,
        atr_high_cut = model.atr_high_cut,
        path = %model_path,
        "regime model fitted and saved"
    );
    println!("Regime model written to {model_path}");
    println!(
        "  ATR cut points: low <= {:.4} < medium < {:.4} <= high",
        model.atr_low_cut, model.atr_high_cut
    );

    Ok(())
}
