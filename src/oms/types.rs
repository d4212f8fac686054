//! Order and fill types
//!
//! Orders transition `Pending -> Open -> {Filled, Cancelled, Rejected}`.
//! Fills are explicit data carrying price, quantity, and fee; a partial fill
//! reduces the remaining size and leaves the order Open.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::{Money, Side, Symbol};

/// Order ID type - u64 for performance
pub type OrderId = u64;

static ORDER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate next order ID (thread-safe, lock-free)
pub fn next_order_id() -> OrderId {
    ORDER_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Order state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    /// Created, not yet acknowledged by the exchange/simulator
    Pending,
    /// Acknowledged and resting; partial fills keep the order here
    Open,
    /// Remaining size reached zero
    Filled,
    /// Cancelled during reconciliation or halt
    Cancelled,
    /// Rejected by the exchange after the retry budget was spent
    Rejected,
}

/// Why an order exists: a planned ladder level, or the counter leg spawned
/// by a fill. Reconciliation diffs only ladder orders against the target
/// plan; counter orders rest until filled or a full regrid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    GridLevel,
    Counter,
}

/// A tracked limit order at one grid level
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub price: Money,
    pub size: Money,
    pub remaining: Money,
    pub grid_level: i32,
    pub kind: OrderKind,
    pub state: OrderState,
    /// Identifier assigned by the exchange on acknowledgment
    pub exchange_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        symbol: Symbol,
        side: Side,
        price: Money,
        size: Money,
        grid_level: i32,
        kind: OrderKind,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: next_order_id(),
            symbol,
            side,
            price,
            size,
            remaining: size,
            grid_level,
            kind,
            state: OrderState::Pending,
            exchange_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Still resting on the book (or awaiting acknowledgment)
    pub fn is_live(&self) -> bool {
        matches!(self.state, OrderState::Pending | OrderState::Open)
    }

    /// Exchange/simulator acknowledgment: Pending -> Open
    pub fn acknowledge(&mut self, exchange_id: String, now: DateTime<Utc>) {
        self.exchange_id = Some(exchange_id);
        self.state = OrderState::Open;
        self.updated_at = now;
    }

    /// Apply a fill quantity; returns true when the order is fully filled.
    /// A quantity below the remaining size is a partial fill and leaves the
    /// order Open with reduced remaining.
    pub fn apply_fill(&mut self, quantity: Money, now: DateTime<Utc>) -> bool {
        let applied = quantity.min(self.remaining);
        self.remaining -= applied;
        self.updated_at = now;
        if self.remaining.is_zero() {
            self.state = OrderState::Filled;
            true
        } else {
            self.state = OrderState::Open;
            false
        }
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.state = OrderState::Cancelled;
        self.updated_at = now;
    }

    pub fn reject(&mut self, now: DateTime<Utc>) {
        self.state = OrderState::Rejected;
        self.updated_at = now;
    }
}

/// Fill notification from the exchange or the simulator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: OrderId,
    pub side: Side,
    pub price: Money,
    pub quantity: Money,
    pub fee: Money,
    pub ts: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> Order {
        Order::new(
            Symbol::new("BTCUSDT"),
            Side::Buy,
            Money::from_f64(50_000.0),
            Money::from_f64(0.001),
            -1,
            OrderKind::GridLevel,
            Utc::now(),
        )
    }

    #[test]
    fn test_order_id_generation_is_monotone() {
        let a = next_order_id();
        let b = next_order_id();
        assert!(b > a);
    }

    #[test]
    fn test_new_order_starts_pending_with_full_remaining() {
        let o = order();
        assert_eq!(o.state, OrderState::Pending);
        assert_eq!(o.remaining, o.size);
        assert!(o.is_live());
    }

    #[test]
    fn test_partial_fill_keeps_order_open() {
        let mut o = order();
        o.acknowledge("x-1".into(), Utc::now());

        let full = o.apply_fill(Money::from_f64(0.0004), Utc::now());
        assert!(!full);
        assert_eq!(o.state, OrderState::Open);
        assert_eq!(o.remaining, Money::from_f64(0.0006));
    }

    #[test]
    fn test_full_fill_terminates_order() {
        let mut o = order();
        o.acknowledge("x-1".into(), Utc::now());

        let full = o.apply_fill(Money::from_f64(0.001), Utc::now());
        assert!(full);
        assert_eq!(o.state, OrderState::Filled);
        assert!(!o.is_live());
    }

    #[test]
    fn test_overfill_clamps_to_remaining() {
        let mut o = order();
        o.acknowledge("x-1".into(), Utc::now());

        let full = o.apply_fill(Money::from_f64(0.005), Utc::now());
        assert!(full);
        assert_eq!(o.remaining, Money::ZERO);
    }
}
