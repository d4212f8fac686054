//! GridAI - main entry point
//!
//! Subcommands:
//! - backtest: replay historical candles through the engine
//! - run: live or paper trading
//! - train: fit the regime model from historical candles

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "gridai")]
#[command(about = "Adaptive grid trading engine with regime-scaled spacing and backtesting", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay historical candles through the engine with simulated fills
    Backtest {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Candle CSV file (defaults to <data_dir>/<symbol>_<timeframe>.csv)
        #[arg(short, long)]
        data: Option<String>,

        /// Initial capital override
        #[arg(long)]
        capital: Option<f64>,
    },

    /// Run the trading engine against live market data
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Paper trading mode (simulated fills, no real orders)
        #[arg(long)]
        paper: bool,

        /// Live trading mode (CAUTION - REAL MONEY!)
        #[arg(long)]
        live: bool,

        /// Tick interval in seconds (defaults to the configured cadence)
        #[arg(long)]
        interval: Option<u64>,

        /// State database path
        #[arg(long, default_value = "state/gridai.db")]
        state_db: String,

        /// Acknowledge a halted (force-liquidated) checkpoint and start a
        /// fresh session
        #[arg(long)]
        reset_halt: bool,
    },

    /// Fit the regime model's quantile cut points from historical candles
    Train {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Candle CSV file to fit on
        #[arg(short, long)]
        data: String,

        /// Output model path (defaults to the configured model_path)
        #[arg(short, long)]
        output: Option<String>,
    },
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Logging initialized");
    info!("Log file: {}", log_path.display());

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Backtest { .. } => "backtest",
        Commands::Run { .. } => "run",
        Commands::Train { .. } => "train",
    };
    setup_logging(cli.verbose, command_name)?;

    match cli.command {
        Commands::Backtest {
            config,
            data,
            capital,
        } => commands::backtest::run(config, data, capital),

        Commands::Run {
            config,
            paper,
            live,
            interval,
            state_db,
            reset_halt,
        } => commands::run::run(config, paper, live, interval, state_db, reset_halt),

        Commands::Train {
            config,
            data,
            output,
        } => commands::train::run(config, data, output),
    }
}
