//! Backtest command

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use gridai::backtest::BacktestDriver;
use gridai::config::Config;
use gridai::data;

pub fn run(config_path: String, data_file: Option<String>, capital: Option<f64>) -> Result<()> {
    let mut config = Config::from_file(&config_path)
        .with_context(|| format!("Failed to load config from {config_path}"))?;
    if let Some(capital) = capital {
        config.risk.initial_capital = capital;
    }

    let data_path = match data_file {
        Some(path) => path,
        None => {
            let filename = format!(
                "{}_{}.csv",
                config.exchange.symbol, config.exchange.timeframe
            );
            Path::new(&config.backtest.data_dir)
                .join(filename)
                .to_string_lossy()
                .into_owned()
        }
    };

    let candles = data::load_csv(&data_path)
        .with_context(|| format!("Failed to load candles from {data_path}"))?;
    anyhow::ensure!(!candles.is_empty(), "no candles in {data_path}");

    info!(
        symbol = %config.exchange.symbol,
        candles = candles.len(),
        capital = config.risk.initial_capital,
        "starting backtest"
    );

    let result = BacktestDriver::new(config.clone()).run(&candles);
    let m = &result.metrics;

    println!("\n========== Backtest Results ==========");
    println!("Symbol:            {}", config.exchange.symbol);
    println!("Candles processed: {}", result.candles_processed);
    println!("Initial capital:   {:.2}", m.initial_capital);
    println!("Final equity:      {:.2}", m.final_equity);
    println!(
        "Total return:      {:.2} ({:+.2}%)",
        m.total_return, m.total_return_pct
    );
    println!("Max drawdown:      {:.2}%", m.max_drawdown_pct);
    println!("Sharpe ratio:      {:.4}", m.sharpe_ratio);
    println!("Sortino ratio:     {:.4}", m.sortino_ratio);
    println!("Win rate:          {:.2}%", m.win_rate_pct);
    println!("Profit factor:     {:.4}", m.profit_factor);
    println!("Trades:            {}", m.total_trades);
    println!("Total fees:        {:.2}", m.total_fees);
    if result.halted {
        println!("NOTE: session force-liquidated by a risk breach before the data ran out");
    }
    println!("======================================\n");

    std::fs::create_dir_all(&config.backtest.results_dir)?;
    let results_path = Path::new(&config.backtest.results_dir)
        .join(format!("backtest_{}.json", config.exchange.symbol));
    std::fs::write(&results_path, serde_json::to_string_pretty(&result.metrics)?)?;
    info!(path = %results_path.display(), "metrics written");

    Ok(())
}
