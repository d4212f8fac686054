//! SQLite persistence
//!
//! Holds the append-only candle/indicator/trade-event history and the
//! engine checkpoint used for crash recovery. Checkpoint writes run inside a
//! transaction: either the new checkpoint lands or the prior one stays
//! intact.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::regime::Regime;
use crate::snapshot::IndicatorSnapshot;
use crate::types::{Candle, Money, Side, TradeEvent};

/// Engine state snapshot persisted at the end of every tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub ts: DateTime<Utc>,
    pub cycle: u64,
    pub equity: Money,
    pub realized_pnl: Money,
    pub net_quantity: Money,
    pub average_entry_price: Money,
    pub peak_equity: Money,
    pub halted: bool,
}

pub struct SqliteStateManager {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStateManager {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let manager = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        manager.create_tables()?;
        info!("SQLite state manager initialized at {}", db_path.display());
        Ok(manager)
    }

    /// In-memory database, for tests and throwaway runs
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let manager = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        manager.create_tables()?;
        Ok(manager)
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS candles (
                ts TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL DEFAULT 0,
                PRIMARY KEY (ts, timeframe)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS indicators (
                ts TEXT PRIMARY KEY,
                ema20 REAL, ema50 REAL, ema200 REAL,
                rsi REAL, macd REAL, macd_signal REAL,
                bb_upper REAL, bb_lower REAL,
                atr REAL, adx REAL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS trade_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts TEXT NOT NULL,
                trade_id TEXT NOT NULL,
                side TEXT NOT NULL,
                price TEXT NOT NULL,
                qty TEXT NOT NULL,
                fee TEXT NOT NULL,
                pnl TEXT NOT NULL,
                regime TEXT NOT NULL,
                confidence REAL NOT NULL,
                grid_level INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts TEXT NOT NULL,
                cycle INTEGER NOT NULL,
                equity TEXT NOT NULL,
                realized_pnl TEXT NOT NULL,
                net_quantity TEXT NOT NULL,
                average_entry_price TEXT NOT NULL,
                peak_equity TEXT NOT NULL,
                halted INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_trade_events_ts ON trade_events(ts)",
            [],
        )?;

        debug!("database schema created/verified");
        Ok(())
    }

    pub fn upsert_candle(&self, candle: &Candle, timeframe: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO candles (ts, timeframe, open, high, low, close, volume)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                candle.ts.to_rfc3339(),
                timeframe,
                candle.open,
                candle.high,
                candle.low,
                candle.close,
                candle.volume,
            ],
        )?;
        Ok(())
    }

    pub fn upsert_indicators(&self, snapshot: &IndicatorSnapshot) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO indicators
             (ts, ema20, ema50, ema200, rsi, macd, macd_signal, bb_upper, bb_lower, atr, adx)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                snapshot.ts.to_rfc3339(),
                snapshot.ema20,
                snapshot.ema50,
                snapshot.ema200,
                snapshot.rsi,
                snapshot.macd,
                snapshot.macd_signal,
                snapshot.bb_upper,
                snapshot.bb_lower,
                snapshot.atr,
                snapshot.adx,
            ],
        )?;
        Ok(())
    }

    /// Append one fill record; trade events are never updated or deleted
    pub fn append_trade_event(&self, event: &TradeEvent) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO trade_events
             (ts, trade_id, side, price, qty, fee, pnl, regime, confidence, grid_level)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                event.ts.to_rfc3339(),
                event.trade_id,
                event.side.as_str(),
                event.price.to_string(),
                event.qty.to_string(),
                event.fee.to_string(),
                event.pnl.to_string(),
                event.regime.as_str(),
                event.confidence,
                event.grid_level,
            ],
        )?;
        Ok(())
    }

    /// Persist a checkpoint transactionally; a failed write leaves the prior
    /// checkpoint as the latest row.
    pub fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO checkpoints
             (ts, cycle, equity, realized_pnl, net_quantity, average_entry_price, peak_equity, halted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                checkpoint.ts.to_rfc3339(),
                checkpoint.cycle as i64,
                checkpoint.equity.to_string(),
                checkpoint.realized_pnl.to_string(),
                checkpoint.net_quantity.to_string(),
                checkpoint.average_entry_price.to_string(),
                checkpoint.peak_equity.to_string(),
                checkpoint.halted as i64,
            ],
        )?;
        tx.commit()?;

        debug!(cycle = checkpoint.cycle, equity = %checkpoint.equity, "checkpoint saved");
        Ok(())
    }

    pub fn load_checkpoint(&self) -> Result<Option<Checkpoint>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT ts, cycle, equity, realized_pnl, net_quantity, average_entry_price, peak_equity, halted FROM checkpoints ORDER BY id DESC LIMIT 1")?;

        let result = stmt.query_row([], |row| {
            let ts: String = row.get(0)?;
            let money = |idx: usize| -> rusqlite::Result<String> { row.get(idx) };
            Ok((
                ts,
                row.get::<_, i64>(1)?,
                money(2)?,
                money(3)?,
                money(4)?,
                money(5)?,
                money(6)?,
                row.get::<_, i64>(7)?,
            ))
        });

        match result {
            Ok((ts, cycle, equity, realized, net, avg, peak, halted)) => {
                let parse_money = parse_money_str;
                let checkpoint = Checkpoint {
                    ts: DateTime::parse_from_rfc3339(&ts)
                        .map(|t| t.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    cycle: cycle as u64,
                    equity: parse_money(&equity),
                    realized_pnl: parse_money(&realized),
                    net_quantity: parse_money(&net),
                    average_entry_price: parse_money(&avg),
                    peak_equity: parse_money(&peak),
                    halted: halted != 0,
                };
                info!(cycle = checkpoint.cycle, "checkpoint restored");
                Ok(Some(checkpoint))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Most recent trade events, oldest first
    pub fn recent_trade_events(&self, limit: usize) -> Result<Vec<TradeEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT ts, trade_id, side, price, qty, fee, pnl, regime, confidence, grid_level
             FROM trade_events ORDER BY id DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, f64>(8)?,
                row.get::<_, i64>(9)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (ts, trade_id, side, price, qty, fee, pnl, regime, confidence, grid_level) = row?;
            events.push(TradeEvent {
                ts: DateTime::parse_from_rfc3339(&ts)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                trade_id,
                side: if side == "sell" { Side::Sell } else { Side::Buy },
                price: parse_money_str(&price),
                qty: parse_money_str(&qty),
                fee: parse_money_str(&fee),
                pnl: parse_money_str(&pnl),
                regime: match regime.as_str() {
                    "low" => Regime::Low,
                    "high" => Regime::High,
                    _ => Regime::Medium,
                },
                confidence,
                grid_level: grid_level as i32,
            });
        }
        events.reverse();
        Ok(events)
    }
}

fn parse_money_str(s: &str) -> Money {
    Money::from_str(s).unwrap_or(Money::ZERO)
}
