//! Position tracking
//!
//! Accumulates fills into a single net position with weighted-average-cost
//! accounting: fills that grow the position re-weight the average entry,
//! fills that shrink it realize PnL against that average. Fees reduce
//! realized PnL at fill time, never later.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::oms::types::Fill;
use crate::types::{Money, Side, Symbol};

/// The single mutable position aggregate, owned by the tracker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    /// Signed base-asset quantity; positive = long
    pub net_quantity: Money,
    pub average_entry_price: Money,
    /// Monotone-accumulating across fills, net of fees
    pub realized_pnl: Money,
    /// Recomputed from the mark price every tick
    pub unrealized_pnl: Money,
    pub fill_count: u64,
    pub total_fees: Money,
}

impl Position {
    fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            net_quantity: Money::ZERO,
            average_entry_price: Money::ZERO,
            realized_pnl: Money::ZERO,
            unrealized_pnl: Money::ZERO,
            fill_count: 0,
            total_fees: Money::ZERO,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.net_quantity.is_zero()
    }

    pub fn total_pnl(&self) -> Money {
        self.realized_pnl + self.unrealized_pnl
    }

    /// Value of held inventory at the mark price
    pub fn inventory_value(&self, mark_price: Money) -> Money {
        self.net_quantity.max(Money::ZERO) * mark_price
    }
}

/// Owns the position; the risk manager and grid generator only read it
pub struct PositionTracker {
    position: Position,
    initial_capital: Money,
}

impl PositionTracker {
    pub fn new(symbol: Symbol, initial_capital: Money) -> Self {
        Self {
            position: Position::new(symbol),
            initial_capital,
        }
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn initial_capital(&self) -> Money {
        self.initial_capital
    }

    /// Fold one fill into the position.
    ///
    /// Returns the realized PnL contribution of this fill (net of its fee),
    /// which is exactly what the corresponding TradeEvent records; summing
    /// those contributions reproduces `realized_pnl` with no drift.
    pub fn apply_fill(&mut self, fill: &Fill) -> Money {
        let pos = &mut self.position;
        let signed_qty = match fill.side {
            Side::Buy => fill.quantity,
            Side::Sell => -fill.quantity,
        };

        let mut contribution = -fill.fee;

        let same_direction = pos.net_quantity.is_zero()
            || (pos.net_quantity.is_positive() && signed_qty.is_positive())
            || (pos.net_quantity.is_negative() && signed_qty.is_negative());

        if same_direction {
            // Growing the position: re-weight the average entry
            let prev_abs = pos.net_quantity.abs();
            let new_abs = prev_abs + fill.quantity;
            pos.average_entry_price =
                (pos.average_entry_price * prev_abs + fill.price * fill.quantity) / new_abs;
            pos.net_quantity += signed_qty;
        } else {
            // Shrinking (possibly through zero): realize against the average
            let closing_qty = fill.quantity.min(pos.net_quantity.abs());
            let per_unit = if pos.net_quantity.is_positive() {
                fill.price - pos.average_entry_price
            } else {
                pos.average_entry_price - fill.price
            };
            contribution += per_unit * closing_qty;

            pos.net_quantity += signed_qty;

            if pos.net_quantity.is_zero() {
                pos.average_entry_price = Money::ZERO;
            } else if (pos.net_quantity.is_positive() && signed_qty.is_positive())
                || (pos.net_quantity.is_negative() && signed_qty.is_negative())
            {
                // Reversed through zero: the residue opens at the fill price
                pos.average_entry_price = fill.price;
            }
        }

        pos.realized_pnl += contribution;
        pos.total_fees += fill.fee;
        pos.fill_count += 1;

        debug!(
            side = fill.side.as_str(),
            price = %fill.price,
            qty = %fill.quantity,
            net = %pos.net_quantity,
            avg = %pos.average_entry_price,
            realized = %pos.realized_pnl,
            "fill applied"
        );

        contribution
    }

    /// Rehydrate the aggregate from a persisted checkpoint
    pub fn restore(
        &mut self,
        net_quantity: Money,
        average_entry_price: Money,
        realized_pnl: Money,
    ) {
        self.position.net_quantity = net_quantity;
        self.position.average_entry_price = average_entry_price;
        self.position.realized_pnl = realized_pnl;
    }

    /// Revalue held inventory at the mark price; returns unrealized PnL
    pub fn mark_to_market(&mut self, mark_price: Money) -> Money {
        let pos = &mut self.position;
        pos.unrealized_pnl = if pos.net_quantity.is_zero() {
            Money::ZERO
        } else {
            (mark_price - pos.average_entry_price) * pos.net_quantity
        };
        pos.unrealized_pnl
    }

    /// Account equity at the current mark
    pub fn equity(&self) -> Money {
        self.initial_capital + self.position.realized_pnl + self.position.unrealized_pnl
    }

    /// Capital at work: open buy notional plus held inventory value
    pub fn capital_deployed(&self, open_buy_notional: Money, mark_price: Money) -> Money {
        open_buy_notional + self.position.inventory_value(mark_price)
    }
}
