//! Live / paper trading command
//!
//! Runs the engine on a fixed tick cadence against live market data. Paper
//! mode simulates fills; live mode routes orders through the signed REST
//! client. One tick executes at a time; ctrl-c finishes the in-flight tick,
//! persists state, and exits without liquidating.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use gridai::config::Config;
use gridai::engine::{Engine, TickStatus};
use gridai::exchange::{PaperTradingClient, RestClient, TradingClient};
use gridai::regime::RegimeAdapter;
use gridai::state_manager::SqliteStateManager;
use gridai::types::Symbol;

const WARMUP_CANDLES: usize = 300;

pub fn run(
    config_path: String,
    paper: bool,
    live: bool,
    interval_secs: Option<u64>,
    state_db: String,
    reset_halt: bool,
) -> Result<()> {
    if !paper && !live {
        anyhow::bail!("Must specify either --paper or --live mode");
    }

    if live {
        warn!("LIVE TRADING MODE - REAL MONEY AT RISK");
        warn!("Press Ctrl+C within 5 seconds to abort...");
        std::thread::sleep(Duration::from_secs(5));
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_async(
        config_path,
        paper,
        interval_secs,
        state_db,
        reset_halt,
    ))
}

async fn run_async(
    config_path: String,
    paper: bool,
    interval_secs: Option<u64>,
    state_db: String,
    reset_halt: bool,
) -> Result<()> {
    dotenv::dotenv().ok();
    let config = Config::from_file(&config_path).context("Failed to load configuration")?;

    let mode = if paper { "PAPER" } else { "LIVE" };
    let symbol = Symbol::new(&config.exchange.symbol);
    let tick_secs = interval_secs.unwrap_or(config.exchange.poll_interval_secs);
    info!(mode, %symbol, tick_secs, "starting trading engine");

    let state = SqliteStateManager::new(&state_db)?;
    let checkpoint = state.load_checkpoint()?;

    let regime = RegimeAdapter::load(&config.regime.model_path);
    let mut engine = Engine::new(&config, regime, Some(state), true);

    if let Some(checkpoint) = checkpoint {
        if checkpoint.halted && !reset_halt {
            anyhow::bail!(
                "previous session ended in ForceLiquidate; restart requires --reset-halt"
            );
        }
        if checkpoint.halted {
            warn!("halted checkpoint acknowledged; starting a fresh session");
        } else {
            engine.restore(&checkpoint);
        }
    }

    // Market data always comes from the public endpoint; order routing
    // depends on the mode
    let feed = RestClient::new(String::new(), String::new());
    let mut trading: Box<dyn TradingClient> = if paper {
        Box::new(PaperTradingClient::new(
            config.exchange.fee_rate,
            config.exchange.assumed_slippage,
        ))
    } else {
        let api_key = config
            .exchange
            .api_key
            .clone()
            .context("api_key missing (set GRIDAI_API_KEY)")?;
        let api_secret = config
            .exchange
            .api_secret
            .clone()
            .context("api_secret missing (set GRIDAI_API_SECRET)")?;
        Box::new(RestClient::new(api_key, api_secret))
    };

    // Ctrl-c flips a flag; the tick loop finishes its in-flight tick,
    // persists, and exits without liquidating
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("shutdown requested; finishing the in-flight tick");
            shutdown_flag.store(true, Ordering::SeqCst);
        }
    });

    // The engine and its HTTP clients are blocking; run the tick loop on a
    // blocking worker so the runtime stays responsive to signals
    let timeframe = config.exchange.timeframe.clone();
    tokio::task::spawn_blocking(move || {
        match feed.fetch_recent_candles(&symbol, &timeframe, WARMUP_CANDLES) {
            Ok(history) => {
                info!(candles = history.len(), "warm-up history loaded");
                engine.warmup(&history);
            }
            Err(e) => warn!(error = %e, "warm-up fetch failed; indicators will build up live"),
        }

        info!("entering main trading loop");
        loop {
            if shutdown.load(Ordering::SeqCst) {
                engine.shutdown(chrono::Utc::now());
                break;
            }

            match feed.fetch_recent_candles(&symbol, &timeframe, 2) {
                Ok(candles) => {
                    if let Some(latest) = candles.last() {
                        let report = engine.tick(latest, trading.as_mut());
                        match report.status {
                            TickStatus::Liquidated => {
                                error!("session force-liquidated; halting until operator restart");
                                break;
                            }
                            TickStatus::Halted => {
                                error!("engine is halted; exiting");
                                break;
                            }
                            _ => {}
                        }
                    } else {
                        warn!("empty market data response; tick skipped");
                    }
                }
                Err(e) => warn!(error = %e, "market data fetch failed; tick skipped"),
            }

            std::thread::sleep(Duration::from_secs(tick_secs));
        }
    })
    .await?;

    info!("trading engine stopped");
    Ok(())
}
