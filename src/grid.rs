//! Grid level generation
//!
//! Builds the target ladder of buy/sell levels around a reference price.
//! Spacing comes from an explicit per-regime table; sizing is uniform per
//! level (quote-denominated order size) with an optional configured skew
//! toward the center. Levels are ephemeral: superseded every regeneration,
//! never patched.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::GridConfig;
use crate::regime::Regime;
use crate::types::{Money, Side};

/// One price point of the ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridLevel {
    /// Signed offset from the center: negative below (buys), positive above
    pub index: i32,
    pub price: Money,
    pub side: Side,
    /// Base-asset quantity for the order at this level
    pub size: Money,
}

/// Target grid for one tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridPlan {
    pub center_price: Money,
    pub regime: Regime,
    /// Spacing actually applied, as a fraction
    pub spacing: f64,
    pub levels: Vec<GridLevel>,
}

impl GridPlan {
    pub fn buy_notional(&self) -> Money {
        self.levels
            .iter()
            .filter(|l| l.side == Side::Buy)
            .map(|l| l.price * l.size)
            .sum()
    }

    pub fn level(&self, index: i32) -> Option<&GridLevel> {
        self.levels.iter().find(|l| l.index == index)
    }
}

/// Deterministic grid builder
#[derive(Debug, Clone)]
pub struct GridGenerator {
    config: GridConfig,
}

impl GridGenerator {
    pub fn new(config: GridConfig) -> Self {
        Self { config }
    }

    /// Spacing fraction for a regime, straight from the configured table
    pub fn spacing_for(&self, regime: Regime) -> f64 {
        match regime {
            Regime::Low => self.config.spacing.low_pct,
            Regime::Medium => self.config.spacing.medium_pct,
            Regime::High => self.config.spacing.high_pct,
        }
    }

    /// Generate the target level set.
    ///
    /// Levels step multiplicatively outward from the reference price, up to
    /// `num_grids` per side. `size_factor` scales every level (the engine
    /// passes the fail-safe reduction when no regime model is loaded).
    /// `buy_headroom` caps total buy-side notional: outermost buy levels are
    /// dropped, never resized, until the remainder fits.
    pub fn generate(
        &self,
        reference_price: Money,
        regime: Regime,
        size_factor: f64,
        buy_headroom: Option<Money>,
    ) -> GridPlan {
        let spacing = self.spacing_for(regime);
        let down = Money::from_f64(1.0 - spacing);
        let up = Money::from_f64(1.0 + spacing);
        let order_size = Money::from_f64(self.config.order_size);
        let factor = Money::from_f64(size_factor);

        let mut levels = Vec::with_capacity(self.config.num_grids as usize * 2);

        let mut buy_price = reference_price;
        let mut sell_price = reference_price;
        for k in 1..=self.config.num_grids as i32 {
            buy_price = buy_price * down;
            sell_price = sell_price * up;

            let skew = Money::from_f64(self.skew_at(k as usize));

            let buy_rounded = buy_price.round_dp(2);
            levels.push(GridLevel {
                index: -k,
                price: buy_rounded,
                side: Side::Buy,
                size: (order_size * factor * skew / buy_rounded).round_dp(8),
            });

            let sell_rounded = sell_price.round_dp(2);
            levels.push(GridLevel {
                index: k,
                price: sell_rounded,
                side: Side::Sell,
                size: (order_size * factor * skew / sell_rounded).round_dp(8),
            });
        }

        if let Some(headroom) = buy_headroom {
            Self::trim_buys_to_headroom(&mut levels, headroom);
        }

        levels.sort_by_key(|l| l.index);

        debug!(
            center = %reference_price,
            %regime,
            spacing,
            levels = levels.len(),
            "grid generated"
        );

        GridPlan {
            center_price: reference_price,
            regime,
            spacing,
            levels,
        }
    }

    /// Counter price one grid step in the opposite direction of a fill.
    ///
    /// Dividing by the step factor inverts the multiplicative ladder, so a
    /// buy filled at 49,750 under 0.5% spacing counters at exactly 50,000.
    pub fn counter_price(fill_price: Money, filled_side: Side, spacing: f64) -> Money {
        let price = match filled_side {
            Side::Buy => fill_price / Money::from_f64(1.0 - spacing),
            Side::Sell => fill_price / Money::from_f64(1.0 + spacing),
        };
        price.round_dp(2)
    }

    /// Whether the center has drifted far enough to force a regrid
    pub fn should_recalibrate(&self, center_price: Money, current_price: Money) -> bool {
        if center_price.is_zero() {
            return true;
        }
        let drift = ((current_price - center_price) / center_price).abs();
        drift > Money::from_f64(self.config.recalibration_drift_pct)
    }

    /// Size multiplier at grid distance k (1-based); the last table entry
    /// extends to all farther levels, an empty table means uniform sizing.
    fn skew_at(&self, k: usize) -> f64 {
        if self.config.size_skew.is_empty() {
            return 1.0;
        }
        let idx = (k - 1).min(self.config.size_skew.len() - 1);
        self.config.size_skew[idx]
    }

    /// Drop outermost buy levels until their total notional fits `headroom`
    fn trim_buys_to_headroom(levels: &mut Vec<GridLevel>, headroom: Money) {
        loop {
            let buy_notional: Money = levels
                .iter()
                .filter(|l| l.side == Side::Buy)
                .map(|l| l.price * l.size)
                .sum();
            if buy_notional <= headroom {
                return;
            }
            // Outermost buy = most negative index
            let Some(pos) = levels
                .iter()
                .enumerate()
                .filter(|(_, l)| l.side == Side::Buy)
                .min_by_key(|(_, l)| l.index)
                .map(|(i, _)| i)
            else {
                return;
            };
            let dropped = levels.remove(pos);
            debug!(index = dropped.index, price = %dropped.price, "buy level dropped for capital headroom");
        }
    }
}
