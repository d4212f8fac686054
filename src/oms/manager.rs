//! Order lifecycle management
//!
//! Reconciles the target grid against the live order set once per tick:
//! cancellations are issued and confirmed before any placement at the same
//! level, so the diff window can never double exposure. Full fills spawn the
//! counter order one grid step in the opposite direction; rejected calls are
//! retried with bounded exponential backoff and then surface the level as
//! degraded instead of being dropped silently.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::EngineResult;
use crate::exchange::TradingClient;
use crate::grid::{GridGenerator, GridPlan};
use crate::oms::types::{Fill, Order, OrderId, OrderKind};
use crate::types::{Money, Side, Symbol};

/// Result of one reconciliation pass
#[derive(Debug, Default, Clone)]
pub struct ReconcileOutcome {
    pub cancelled: u32,
    pub placed: u32,
    /// Levels whose exchange calls exhausted the retry budget this tick;
    /// reported to the risk layer as a degraded-grid condition
    pub degraded_levels: Vec<i32>,
}

/// Result of applying one fill notification
#[derive(Debug, Clone)]
pub struct FillOutcome {
    /// Order state after the fill was applied
    pub order: Order,
    pub fully_filled: bool,
    /// Counter order spawned by a full fill, if one was placed
    pub counter_id: Option<OrderId>,
}

/// Tracks the live order set and drives it toward the target grid
pub struct OrderManager {
    symbol: Symbol,
    orders: HashMap<OrderId, Order>,
    retry_max_attempts: u32,
    retry_backoff: Duration,
    /// Live mode sleeps between retries; backtests only record the schedule
    sleep_on_retry: bool,
    price_tolerance: f64,
    daily_order_count: u32,
    daily_date: Option<NaiveDate>,
}

impl OrderManager {
    pub fn new(
        symbol: Symbol,
        retry_max_attempts: u32,
        retry_backoff_ms: u64,
        price_tolerance: f64,
        sleep_on_retry: bool,
    ) -> Self {
        Self {
            symbol,
            orders: HashMap::new(),
            retry_max_attempts: retry_max_attempts.max(1),
            retry_backoff: Duration::from_millis(retry_backoff_ms),
            sleep_on_retry,
            price_tolerance,
            daily_order_count: 0,
            daily_date: None,
        }
    }

    /// Live (Pending or Open) orders
    pub fn open_orders(&self) -> Vec<&Order> {
        let mut orders: Vec<&Order> = self.orders.values().filter(|o| o.is_live()).collect();
        orders.sort_by_key(|o| o.id);
        orders
    }

    pub fn live_count(&self) -> usize {
        self.orders.values().filter(|o| o.is_live()).count()
    }

    /// Total notional of live buy orders (counts toward capital deployed)
    pub fn open_buy_notional(&self) -> Money {
        self.orders
            .values()
            .filter(|o| o.is_live() && o.side == Side::Buy)
            .map(|o| o.price * o.remaining)
            .sum()
    }

    /// Buy notional held by resting counter orders; these survive ladder
    /// reconciliation, so grid headroom must account for them separately
    pub fn counter_buy_notional(&self) -> Money {
        self.orders
            .values()
            .filter(|o| o.is_live() && o.side == Side::Buy && o.kind == OrderKind::Counter)
            .map(|o| o.price * o.remaining)
            .sum()
    }

    /// Orders placed today (UTC); resets when the date rolls over
    pub fn daily_order_count(&mut self, now: DateTime<Utc>) -> u32 {
        let today = now.date_naive();
        if self.daily_date != Some(today) {
            self.daily_date = Some(today);
            self.daily_order_count = 0;
        }
        self.daily_order_count
    }

    /// Align the live order set with the target plan.
    ///
    /// Stale ladder orders (level gone, side changed, price outside the
    /// tolerance band) are cancelled first; only then are missing levels
    /// placed. When `allow_new` is false the place pass is skipped entirely
    /// and existing orders stand.
    pub fn reconcile(
        &mut self,
        plan: &GridPlan,
        allow_new: bool,
        client: &mut dyn TradingClient,
        now: DateTime<Utc>,
    ) -> ReconcileOutcome {
        self.daily_order_count(now);
        let mut outcome = ReconcileOutcome::default();

        // Cancel pass: ladder orders that no longer match their target level
        let stale: Vec<OrderId> = self
            .orders
            .values()
            .filter(|o| o.is_live() && o.kind == OrderKind::GridLevel)
            .filter(|o| !self.matches_target(o, plan))
            .map(|o| o.id)
            .collect();

        for id in stale {
            let order = self.orders[&id].clone();
            match self.with_retry(|c| c.cancel_order(&order), client, "cancel") {
                Ok(()) => {
                    if let Some(o) = self.orders.get_mut(&id) {
                        o.cancel(now);
                    }
                    self.orders.remove(&id);
                    outcome.cancelled += 1;
                }
                Err(e) => {
                    // The level stays occupied; placing over it would double
                    // exposure, so it is degraded for this tick
                    warn!(level = order.grid_level, error = %e, "cancel failed, level degraded");
                    outcome.degraded_levels.push(order.grid_level);
                }
            }
        }

        if !allow_new {
            return outcome;
        }

        // Place pass: target levels with no live order at (level, side)
        for level in &plan.levels {
            if outcome.degraded_levels.contains(&level.index) {
                continue;
            }
            let occupied = self
                .orders
                .values()
                .any(|o| o.is_live() && o.grid_level == level.index && o.side == level.side);
            if occupied || level.size.is_zero() {
                continue;
            }

            let mut order = Order::new(
                self.symbol.clone(),
                level.side,
                level.price,
                level.size,
                level.index,
                OrderKind::GridLevel,
                now,
            );

            match self.with_retry(|c| c.place_order(&order), client, "place") {
                Ok(ack) => {
                    order.acknowledge(ack, now);
                    debug!(
                        level = level.index,
                        side = level.side.as_str(),
                        price = %level.price,
                        "order placed"
                    );
                    self.orders.insert(order.id, order);
                    outcome.placed += 1;
                    self.daily_order_count += 1;
                }
                Err(e) => {
                    order.reject(now);
                    warn!(level = level.index, error = %e, "placement rejected, level degraded");
                    outcome.degraded_levels.push(level.index);
                }
            }
        }

        outcome
    }

    /// Apply a fill notification to its order.
    ///
    /// A full fill removes the order from the live set and immediately
    /// places the counter order one grid step in the opposite direction at
    /// the filled notional net of fee. Counter buys add inventory, so they
    /// honor `allow_new_buys`; counter sells always dispose.
    pub fn handle_fill(
        &mut self,
        fill: &Fill,
        spacing: f64,
        allow_new_buys: bool,
        client: &mut dyn TradingClient,
        now: DateTime<Utc>,
    ) -> Option<FillOutcome> {
        let Some(order) = self.orders.get_mut(&fill.order_id) else {
            warn!(order_id = fill.order_id, "fill for unknown order ignored");
            return None;
        };

        let fully_filled = order.apply_fill(fill.quantity, now);
        let order_snapshot = order.clone();

        if !fully_filled {
            debug!(
                id = order_snapshot.id,
                remaining = %order_snapshot.remaining,
                "partial fill applied"
            );
            return Some(FillOutcome {
                order: order_snapshot,
                fully_filled: false,
                counter_id: None,
            });
        }

        self.orders.remove(&fill.order_id);

        let counter_side = fill.side.opposite();
        if counter_side == Side::Buy && !allow_new_buys {
            info!(
                level = order_snapshot.grid_level,
                "counter buy suppressed while entries are gated"
            );
            return Some(FillOutcome {
                order: order_snapshot,
                fully_filled: true,
                counter_id: None,
            });
        }

        let counter_price = GridGenerator::counter_price(fill.price, fill.side, spacing);
        let counter_size =
            ((fill.price * fill.quantity - fill.fee) / counter_price).round_dp(8);
        let counter_index = match fill.side {
            Side::Buy => order_snapshot.grid_level + 1,
            Side::Sell => order_snapshot.grid_level - 1,
        };

        if !counter_size.is_positive() {
            warn!(level = counter_index, "counter order size collapsed to zero");
            return Some(FillOutcome {
                order: order_snapshot,
                fully_filled: true,
                counter_id: None,
            });
        }

        let mut counter = Order::new(
            self.symbol.clone(),
            counter_side,
            counter_price,
            counter_size,
            counter_index,
            OrderKind::Counter,
            now,
        );

        let counter_id = match self.with_retry(|c| c.place_order(&counter), client, "counter") {
            Ok(ack) => {
                counter.acknowledge(ack, now);
                info!(
                    from = order_snapshot.grid_level,
                    to = counter_index,
                    side = counter_side.as_str(),
                    price = %counter_price,
                    "counter order placed"
                );
                let id = counter.id;
                self.orders.insert(id, counter);
                self.daily_order_count += 1;
                Some(id)
            }
            Err(e) => {
                warn!(level = counter_index, error = %e, "counter placement failed");
                None
            }
        };

        Some(FillOutcome {
            order: order_snapshot,
            fully_filled: true,
            counter_id,
        })
    }

    /// Cancel every live order; returns (cancelled, failed)
    pub fn cancel_all(&mut self, client: &mut dyn TradingClient, now: DateTime<Utc>) -> (u32, u32) {
        let ids: Vec<OrderId> = self
            .orders
            .values()
            .filter(|o| o.is_live())
            .map(|o| o.id)
            .collect();

        let mut cancelled = 0;
        let mut failed = 0;
        for id in ids {
            let order = self.orders[&id].clone();
            match self.with_retry(|c| c.cancel_order(&order), client, "cancel") {
                Ok(()) => {
                    if let Some(o) = self.orders.get_mut(&id) {
                        o.cancel(now);
                    }
                    self.orders.remove(&id);
                    cancelled += 1;
                }
                Err(e) => {
                    warn!(id, error = %e, "cancel failed during cancel-all");
                    failed += 1;
                }
            }
        }
        (cancelled, failed)
    }

    /// Whether a live ladder order still matches its target level
    fn matches_target(&self, order: &Order, plan: &GridPlan) -> bool {
        let Some(level) = plan.level(order.grid_level) else {
            return false;
        };
        if level.side != order.side {
            return false;
        }
        if level.price.is_zero() {
            return false;
        }
        let drift = ((order.price - level.price) / level.price).abs();
        drift <= Money::from_f64(self.price_tolerance)
    }

    /// Retry an exchange call with bounded exponential backoff
    fn with_retry<T>(
        &self,
        mut call: impl FnMut(&mut dyn TradingClient) -> EngineResult<T>,
        client: &mut dyn TradingClient,
        what: &str,
    ) -> EngineResult<T> {
        let mut attempt: u32 = 0;
        loop {
            match call(client) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < self.retry_max_attempts => {
                    let delay = self.retry_backoff * 2u32.saturating_pow(attempt);
                    warn!(
                        what,
                        attempt = attempt + 1,
                        max = self.retry_max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying exchange call"
                    );
                    if self.sleep_on_retry {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GridConfig, SpacingTable};
    use crate::error::EngineError;
    use crate::exchange::PaperTradingClient;
    use crate::grid::GridGenerator;
    use crate::regime::Regime;
    use crate::snapshot::MarketSnapshot;

    fn manager() -> OrderManager {
        OrderManager::new(Symbol::new("BTCUSDT"), 3, 1, 0.001, false)
    }

    fn plan(center: f64) -> GridPlan {
        let config = GridConfig {
            num_grids: 3,
            order_size: 50.0,
            spacing: SpacingTable {
                low_pct: 0.005,
                medium_pct: 0.01,
                high_pct: 0.02,
            },
            ..GridConfig::default()
        };
        GridGenerator::new(config).generate(Money::from_f64(center), Regime::Low, 1.0, None)
    }

    /// Client that rejects everything, for retry/degradation paths
    struct FailingClient {
        calls: u32,
    }

    impl TradingClient for FailingClient {
        fn place_order(&mut self, _order: &Order) -> EngineResult<String> {
            self.calls += 1;
            Err(EngineError::TransientExchange("down".into()))
        }
        fn cancel_order(&mut self, _order: &Order) -> EngineResult<()> {
            self.calls += 1;
            Err(EngineError::TransientExchange("down".into()))
        }
        fn poll_fills(
            &mut self,
            _open: &[&Order],
            _snapshot: &MarketSnapshot,
        ) -> EngineResult<Vec<Fill>> {
            Ok(Vec::new())
        }
        fn close_position(
            &mut self,
            _symbol: &Symbol,
            _side: Side,
            _quantity: Money,
            _snapshot: &MarketSnapshot,
        ) -> EngineResult<Fill> {
            Err(EngineError::TransientExchange("down".into()))
        }
    }

    #[test]
    fn test_initial_reconcile_places_every_level() {
        let mut mgr = manager();
        let mut client = PaperTradingClient::new(0.001, 0.0);
        let outcome = mgr.reconcile(&plan(50_000.0), true, &mut client, Utc::now());

        assert_eq!(outcome.placed, 6);
        assert_eq!(outcome.cancelled, 0);
        assert!(outcome.degraded_levels.is_empty());
        assert_eq!(mgr.live_count(), 6);
    }

    #[test]
    fn test_unchanged_target_is_a_no_op() {
        let mut mgr = manager();
        let mut client = PaperTradingClient::new(0.001, 0.0);
        let target = plan(50_000.0);
        mgr.reconcile(&target, true, &mut client, Utc::now());

        let outcome = mgr.reconcile(&target, true, &mut client, Utc::now());
        assert_eq!(outcome.placed, 0);
        assert_eq!(outcome.cancelled, 0);
    }

    #[test]
    fn test_moved_center_cancels_before_replacing() {
        let mut mgr = manager();
        let mut client = PaperTradingClient::new(0.001, 0.0);
        mgr.reconcile(&plan(50_000.0), true, &mut client, Utc::now());

        let outcome = mgr.reconcile(&plan(51_000.0), true, &mut client, Utc::now());
        assert_eq!(outcome.cancelled, 6);
        assert_eq!(outcome.placed, 6);
        assert_eq!(mgr.live_count(), 6);
    }

    #[test]
    fn test_entries_gated_leaves_orders_standing() {
        let mut mgr = manager();
        let mut client = PaperTradingClient::new(0.001, 0.0);
        mgr.reconcile(&plan(50_000.0), true, &mut client, Utc::now());

        let outcome = mgr.reconcile(&plan(50_000.0), false, &mut client, Utc::now());
        assert_eq!(outcome.placed, 0);
        assert_eq!(mgr.live_count(), 6);
    }

    #[test]
    fn test_rejected_placements_degrade_levels() {
        let mut mgr = manager();
        let mut client = FailingClient { calls: 0 };
        let outcome = mgr.reconcile(&plan(50_000.0), true, &mut client, Utc::now());

        assert_eq!(outcome.placed, 0);
        assert_eq!(outcome.degraded_levels.len(), 6);
        // Bounded retries: 3 attempts per level
        assert_eq!(client.calls, 18);
        assert_eq!(mgr.live_count(), 0);
    }

    #[test]
    fn test_full_buy_fill_spawns_sell_counter_one_step_up() {
        let mut mgr = manager();
        let mut client = PaperTradingClient::new(0.0, 0.0);
        mgr.reconcile(&plan(50_000.0), true, &mut client, Utc::now());

        let buy = mgr
            .open_orders()
            .into_iter()
            .find(|o| o.grid_level == -1)
            .unwrap()
            .clone();

        let fill = Fill {
            order_id: buy.id,
            side: Side::Buy,
            price: buy.price,
            quantity: buy.size,
            fee: Money::ZERO,
            ts: Utc::now(),
        };

        let outcome = mgr
            .handle_fill(&fill, 0.005, true, &mut client, Utc::now())
            .unwrap();
        assert!(outcome.fully_filled);
        let counter_id = outcome.counter_id.unwrap();

        let counter = mgr
            .open_orders()
            .into_iter()
            .find(|o| o.id == counter_id)
            .unwrap()
            .clone();
        assert_eq!(counter.side, Side::Sell);
        assert_eq!(counter.kind, OrderKind::Counter);
        assert_eq!(counter.price.to_f64(), 50_000.0);
        // Same notional at zero fee, up to quantity rounding
        let notional_diff = (counter.price * counter.size - buy.price * buy.size).abs();
        assert!(notional_diff <= Money::from_f64(0.001));
    }

    #[test]
    fn test_partial_fill_reduces_remaining_without_counter() {
        let mut mgr = manager();
        let mut client = PaperTradingClient::new(0.0, 0.0);
        mgr.reconcile(&plan(50_000.0), true, &mut client, Utc::now());

        let buy = mgr
            .open_orders()
            .into_iter()
            .find(|o| o.grid_level == -1)
            .unwrap()
            .clone();

        let fill = Fill {
            order_id: buy.id,
            side: Side::Buy,
            price: buy.price,
            quantity: buy.size * Money::from_f64(0.5),
            fee: Money::ZERO,
            ts: Utc::now(),
        };

        let outcome = mgr
            .handle_fill(&fill, 0.005, true, &mut client, Utc::now())
            .unwrap();
        assert!(!outcome.fully_filled);
        assert!(outcome.counter_id.is_none());
        assert_eq!(mgr.live_count(), 6);
    }

    #[test]
    fn test_counter_survives_reconcile_of_same_plan() {
        let mut mgr = manager();
        let mut client = PaperTradingClient::new(0.0, 0.0);
        let target = plan(50_000.0);
        mgr.reconcile(&target, true, &mut client, Utc::now());

        let buy = mgr
            .open_orders()
            .into_iter()
            .find(|o| o.grid_level == -1)
            .unwrap()
            .clone();
        let fill = Fill {
            order_id: buy.id,
            side: Side::Buy,
            price: buy.price,
            quantity: buy.size,
            fee: Money::ZERO,
            ts: Utc::now(),
        };
        mgr.handle_fill(&fill, 0.005, true, &mut client, Utc::now());

        // Re-arms the emptied buy level but leaves the resting counter alone
        let outcome = mgr.reconcile(&target, true, &mut client, Utc::now());
        assert_eq!(outcome.placed, 1);
        assert_eq!(outcome.cancelled, 0);
        assert!(mgr
            .open_orders()
            .iter()
            .any(|o| o.kind == OrderKind::Counter));
    }

    #[test]
    fn test_cancel_all_clears_live_set() {
        let mut mgr = manager();
        let mut client = PaperTradingClient::new(0.001, 0.0);
        mgr.reconcile(&plan(50_000.0), true, &mut client, Utc::now());

        let (cancelled, failed) = mgr.cancel_all(&mut client, Utc::now());
        assert_eq!(cancelled, 6);
        assert_eq!(failed, 0);
        assert_eq!(mgr.live_count(), 0);
    }

    #[test]
    fn test_daily_order_count_resets_on_new_day() {
        let mut mgr = manager();
        let mut client = PaperTradingClient::new(0.001, 0.0);
        let now = Utc::now();
        mgr.reconcile(&plan(50_000.0), true, &mut client, now);
        assert_eq!(mgr.daily_order_count(now), 6);

        let tomorrow = now + chrono::Duration::days(1);
        assert_eq!(mgr.daily_order_count(tomorrow), 0);
    }
}
