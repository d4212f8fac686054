//! Order management
//!
//! Order/fill types and the per-tick reconciliation that keeps the live
//! order set aligned with the target grid.

pub mod manager;
pub mod types;

pub use manager::{FillOutcome, OrderManager, ReconcileOutcome};
pub use types::{next_order_id, Fill, Order, OrderId, OrderKind, OrderState};
