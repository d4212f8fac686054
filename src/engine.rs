//! Engine loop
//!
//! One tick, strict order: ingest snapshot, classify regime, evaluate the
//! trend gate, evaluate risk, liquidate-and-halt if risk demands it,
//! otherwise regenerate the grid, reconcile orders, apply observed fills,
//! append trade events, checkpoint. Risk always runs before new exposure is
//! added; liquidation excludes ordinary grid logic in the same tick. Exactly
//! one tick executes at a time: market data and fill notifications are
//! drained by this single consumer.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::exchange::TradingClient;
use crate::grid::{GridGenerator, GridPlan};
use crate::oms::manager::OrderManager;
use crate::position::PositionTracker;
use crate::regime::{FeatureVector, Regime, RegimeAdapter};
use crate::risk::{RiskDecision, RiskInputs, RiskManager, SessionContext};
use crate::snapshot::{IndicatorSnapshot, MarketSnapshot};
use crate::state_manager::{Checkpoint, SqliteStateManager};
use crate::trend::TrendGate;
use crate::types::{Candle, Money, Side, Symbol, TradeEvent};

/// Candle history the engine keeps for indicators and features
const MAX_WINDOW: usize = 400;

/// How a tick ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    Completed,
    /// Stale or invalid snapshot; nothing was changed this tick
    Skipped,
    /// Engine is halted from an earlier ForceLiquidate
    Halted,
    /// Risk demanded liquidation this tick; the session is now halted
    Liquidated,
}

/// What one tick did
#[derive(Debug, Clone)]
pub struct TickReport {
    pub ts: DateTime<Utc>,
    pub status: TickStatus,
    pub regime: Regime,
    pub confidence: f64,
    pub risk_decision: Option<RiskDecision>,
    pub entries_permitted: bool,
    pub equity: Money,
    pub capital_deployed: Money,
    pub placed: u32,
    pub cancelled: u32,
    pub degraded: u32,
    pub events: Vec<TradeEvent>,
}

/// The per-instrument trading engine: owns every core component and
/// sequences them. Nothing else mutates the position or the order set.
pub struct Engine {
    symbol: Symbol,
    timeframe: String,
    generator: GridGenerator,
    trend_gate: TrendGate,
    regime: RegimeAdapter,
    confidence_threshold: f64,
    failsafe_size_factor: f64,
    orders: OrderManager,
    position: PositionTracker,
    risk: RiskManager,
    session: SessionContext,
    state: Option<SqliteStateManager>,
    candles: Vec<Candle>,
    plan: Option<GridPlan>,
    /// Last classification that cleared the confidence threshold
    accepted_regime: (Regime, f64),
    degraded_last_tick: u32,
    halted: bool,
    last_ts: Option<DateTime<Utc>>,
    cycle: u64,
    trade_seq: u64,
}

impl Engine {
    pub fn new(
        config: &Config,
        regime: RegimeAdapter,
        state: Option<SqliteStateManager>,
        sleep_on_retry: bool,
    ) -> Self {
        let symbol = Symbol::new(&config.exchange.symbol);
        let initial_capital = Money::from_f64(config.risk.initial_capital);

        Self {
            symbol: symbol.clone(),
            timeframe: config.exchange.timeframe.clone(),
            generator: GridGenerator::new(config.grid.clone()),
            trend_gate: TrendGate::new(config.trend.clone()),
            regime,
            confidence_threshold: config.regime.confidence_threshold,
            failsafe_size_factor: config.grid.failsafe_size_factor,
            orders: OrderManager::new(
                symbol.clone(),
                config.risk.retry_max_attempts,
                config.risk.retry_backoff_ms,
                config.grid.price_tolerance_pct,
                sleep_on_retry,
            ),
            position: PositionTracker::new(symbol, initial_capital),
            risk: RiskManager::new(config.risk.clone()),
            session: SessionContext::new(initial_capital),
            state,
            candles: Vec::new(),
            plan: None,
            accepted_regime: (Regime::High, 0.0),
            degraded_last_tick: 0,
            halted: false,
            last_ts: None,
            cycle: 0,
            trade_seq: 0,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn position(&self) -> &PositionTracker {
        &self.position
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn open_order_count(&self) -> usize {
        self.orders.live_count()
    }

    /// Live orders, for inspection and monitoring
    pub fn open_orders(&self) -> Vec<&crate::oms::Order> {
        self.orders.open_orders()
    }

    /// Notional resting on the buy side right now
    pub fn open_buy_notional(&self) -> Money {
        self.orders.open_buy_notional()
    }

    /// Rehydrate position and session state from a persisted checkpoint.
    /// A checkpoint written after a ForceLiquidate keeps the engine halted:
    /// operator restart means a fresh session, not resuming a tripped one.
    pub fn restore(&mut self, checkpoint: &Checkpoint) {
        self.position.restore(
            checkpoint.net_quantity,
            checkpoint.average_entry_price,
            checkpoint.realized_pnl,
        );
        self.session = SessionContext::new(checkpoint.equity);
        self.session.observe(checkpoint.ts, checkpoint.peak_equity);
        self.halted = checkpoint.halted;
        self.cycle = checkpoint.cycle;
        info!(
            cycle = checkpoint.cycle,
            equity = %checkpoint.equity,
            halted = checkpoint.halted,
            "engine state restored from checkpoint"
        );
    }

    /// Process one market snapshot through the full pipeline.
    pub fn tick(&mut self, candle: &Candle, client: &mut dyn TradingClient) -> TickReport {
        let (regime, confidence) = self.accepted_regime;
        let mut report = TickReport {
            ts: candle.ts,
            status: TickStatus::Completed,
            regime,
            confidence,
            risk_decision: None,
            entries_permitted: false,
            equity: self.position.equity(),
            capital_deployed: Money::ZERO,
            placed: 0,
            cancelled: 0,
            degraded: 0,
            events: Vec::new(),
        };

        if self.halted {
            report.status = TickStatus::Halted;
            return report;
        }

        // (1) ingest snapshot; a stale or invalid bar is a data gap and the
        // grid must not be regenerated from it
        if let Err(gap) = self.ingest(candle) {
            warn!(error = %gap, "tick skipped");
            report.status = TickStatus::Skipped;
            return report;
        }
        let snapshot = MarketSnapshot::from_candle(candle);
        let price = Money::from_f64(snapshot.price);

        if let Some(row) = IndicatorSnapshot::compute(&self.candles) {
            self.persist("indicators", |s| s.upsert_indicators(&row));
        }

        // (2) classify regime
        let (regime, confidence, size_factor) = self.classify_regime();
        report.regime = regime;
        report.confidence = confidence;

        // (3) trend gate; cold starts permit entry so the first grid can arm
        let trend_permits = self
            .trend_gate
            .evaluate(&self.candles)
            .map(|s| s.permit_entry)
            .unwrap_or(true);

        // (4) risk, on marked-to-market state
        self.position.mark_to_market(price);
        let equity = self.position.equity();
        self.session.observe(snapshot.ts, equity);

        let capital_deployed = self
            .position
            .capital_deployed(self.orders.open_buy_notional(), price);
        let inputs = RiskInputs {
            equity,
            capital_deployed,
            daily_order_count: self.orders.daily_order_count(snapshot.ts),
            degraded_levels: self.degraded_last_tick,
        };
        let risk_report = self.risk.evaluate(&inputs, &self.session);
        report.risk_decision = Some(risk_report.decision);
        report.equity = equity;
        report.capital_deployed = capital_deployed;

        // (5) liquidation precedes and excludes ordinary grid logic
        if risk_report.decision == RiskDecision::ForceLiquidate {
            report.events = self.liquidate(client, &snapshot, regime, confidence);
            report.status = TickStatus::Liquidated;
            report.equity = self.position.equity();
            self.cycle += 1;
            self.checkpoint(snapshot.ts);
            return report;
        }

        // (6) regenerate grid; entries suppressed by the gate or by risk
        let allow_new = trend_permits && risk_report.decision == RiskDecision::Continue;
        report.entries_permitted = allow_new;

        let center = match &self.plan {
            Some(p) if !self.generator.should_recalibrate(p.center_price, price) => p.center_price,
            _ => price,
        };
        let inventory = self.position.position().inventory_value(price);
        let headroom = (self.risk.buy_headroom(equity, inventory)
            - self.orders.counter_buy_notional())
        .max(Money::ZERO);
        let plan = self
            .generator
            .generate(center, regime, size_factor, Some(headroom));

        // (7) reconcile live orders against the target
        let outcome = self.orders.reconcile(&plan, allow_new, client, snapshot.ts);
        self.degraded_last_tick = outcome.degraded_levels.len() as u32;
        report.placed = outcome.placed;
        report.cancelled = outcome.cancelled;
        report.degraded = self.degraded_last_tick;
        let spacing = plan.spacing;
        self.plan = Some(plan);

        // (8) apply fills observed this tick, (9) append trade events
        let fills = {
            let open = self.orders.open_orders();
            match client.poll_fills(&open, &snapshot) {
                Ok(fills) => fills,
                Err(e) => {
                    warn!(error = %e, "fill poll failed; retrying next tick");
                    Vec::new()
                }
            }
        };
        for fill in &fills {
            let Some(outcome) = self
                .orders
                .handle_fill(fill, spacing, allow_new, client, fill.ts)
            else {
                continue;
            };
            let pnl = self.position.apply_fill(fill);
            let event = self.record_event(fill.ts, fill.side, fill.price, fill.quantity, fill.fee, pnl, regime, confidence, outcome.order.grid_level);
            report.events.push(event);
        }

        self.position.mark_to_market(price);
        report.equity = self.position.equity();
        self.session.observe(snapshot.ts, report.equity);

        // (10) checkpoint
        self.cycle += 1;
        self.checkpoint(snapshot.ts);

        debug!(
            cycle = self.cycle,
            %regime,
            confidence,
            equity = %report.equity,
            placed = report.placed,
            cancelled = report.cancelled,
            fills = fills.len(),
            "tick complete"
        );

        report
    }

    /// Finish-of-session persistence; called on operator shutdown. No new
    /// orders, no liquidation.
    pub fn shutdown(&mut self, ts: DateTime<Utc>) {
        info!("engine shutting down; persisting final state");
        self.checkpoint(ts);
    }

    /// Preload candle history into the indicator window without trading.
    /// Used before the first live tick and by the backtest warm-up.
    pub fn warmup(&mut self, candles: &[Candle]) {
        for candle in candles {
            if let Err(e) = self.ingest(candle) {
                debug!(error = %e, "warm-up candle skipped");
            }
        }
    }

    fn ingest(&mut self, candle: &Candle) -> EngineResult<()> {
        candle
            .validate()
            .map_err(|e| EngineError::DataGap(e.to_string()))?;

        if let Some(last) = self.last_ts {
            if candle.ts <= last {
                return Err(EngineError::DataGap(format!(
                    "stale snapshot: {} <= {}",
                    candle.ts, last
                )));
            }
        }

        self.last_ts = Some(candle.ts);
        self.candles.push(candle.clone());
        if self.candles.len() > MAX_WINDOW {
            let excess = self.candles.len() - MAX_WINDOW;
            self.candles.drain(..excess);
        }

        let timeframe = self.timeframe.clone();
        self.persist("candle", |s| s.upsert_candle(candle, &timeframe));
        Ok(())
    }

    /// Classify the current regime, holding the last confident answer and
    /// falling back to the fail-safe default (High volatility, reduced size)
    /// when no model or not enough history is available.
    fn classify_regime(&mut self) -> (Regime, f64, f64) {
        let failsafe = (Regime::High, 0.0, self.failsafe_size_factor);

        let Some(features) = FeatureVector::from_candles(&self.candles) else {
            return failsafe;
        };

        match self.regime.classify(&features) {
            Ok((regime, confidence)) => {
                if confidence >= self.confidence_threshold {
                    self.accepted_regime = (regime, confidence);
                }
                let (r, c) = self.accepted_regime;
                (r, c, 1.0)
            }
            Err(EngineError::ModelUnavailable(reason)) => {
                debug!(%reason, "classifier unavailable; fail-safe regime");
                failsafe
            }
            Err(e) => {
                warn!(error = %e, "classifier failed; fail-safe regime");
                failsafe
            }
        }
    }

    /// Cancel everything and close the net position at market. The one path
    /// that bypasses the grid mechanic; terminal for the session.
    fn liquidate(
        &mut self,
        client: &mut dyn TradingClient,
        snapshot: &MarketSnapshot,
        regime: Regime,
        confidence: f64,
    ) -> Vec<TradeEvent> {
        error!("FORCE LIQUIDATE: cancelling all orders and closing position");
        self.halted = true;
        self.plan = None;

        let (cancelled, failed) = self.orders.cancel_all(client, snapshot.ts);
        if failed > 0 {
            error!(failed, "orders could not be cancelled during liquidation");
        }
        info!(cancelled, "open orders cancelled");

        let mut events = Vec::new();
        let net = self.position.position().net_quantity;
        if !net.is_zero() {
            let side = if net.is_positive() {
                Side::Sell
            } else {
                Side::Buy
            };
            match client.close_position(&self.symbol, side, net.abs(), snapshot) {
                Ok(fill) => {
                    let pnl = self.position.apply_fill(&fill);
                    let event = self.record_event(fill.ts, fill.side, fill.price, fill.quantity, fill.fee, pnl, regime, confidence, 0);
                    events.push(event);
                    info!(side = side.as_str(), qty = %fill.quantity, price = %fill.price, "position closed");
                }
                Err(e) => {
                    error!(error = %e, "market close failed during liquidation");
                }
            }
        }

        self.position.mark_to_market(Money::from_f64(snapshot.price));
        events
    }

    #[allow(clippy::too_many_arguments)]
    fn record_event(
        &mut self,
        ts: DateTime<Utc>,
        side: Side,
        price: Money,
        qty: Money,
        fee: Money,
        pnl: Money,
        regime: Regime,
        confidence: f64,
        grid_level: i32,
    ) -> TradeEvent {
        self.trade_seq += 1;
        let event = TradeEvent {
            ts,
            trade_id: format!("T-{}", self.trade_seq),
            side,
            price,
            qty,
            fee,
            pnl,
            regime,
            confidence,
            grid_level,
        };
        info!(
            trade = %event.trade_id,
            side = side.as_str(),
            %price,
            %qty,
            %pnl,
            grid_level,
            "trade event"
        );
        self.persist("trade_event", |s| s.append_trade_event(&event));
        event
    }

    fn checkpoint(&self, ts: DateTime<Utc>) {
        let position = self.position.position();
        let checkpoint = Checkpoint {
            ts,
            cycle: self.cycle,
            equity: self.position.equity(),
            realized_pnl: position.realized_pnl,
            net_quantity: position.net_quantity,
            average_entry_price: position.average_entry_price,
            peak_equity: self.session.peak_equity,
            halted: self.halted,
        };
        self.persist("checkpoint", |s| s.save_checkpoint(&checkpoint));
    }

    /// Run a persistence action, keeping the engine alive on failure: the
    /// prior checkpoint stays intact and in-memory state is still
    /// consistent, so trading continues.
    fn persist(&self, what: &str, action: impl FnOnce(&SqliteStateManager) -> anyhow::Result<()>) {
        if let Some(state) = &self.state {
            if let Err(e) = action(state) {
                warn!(what, error = %e, "persistence failure; prior state retained");
            }
        }
    }
}
