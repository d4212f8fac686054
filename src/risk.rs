//! Risk guardrails
//!
//! A stateless per-tick evaluator over the position, session context, and
//! configured limits. Session-wide state (peak equity, session and day start
//! equity) lives in an explicit `SessionContext` passed into every call, so
//! the evaluator stays pure and testable. Each rule is independent; the most
//! severe decision wins.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::RiskConfig;
use crate::types::Money;

/// Per-tick verdict, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskDecision {
    Continue,
    /// Existing orders stand; no new exposure is added
    SuspendNewEntries,
    /// Cancel everything, close the net position, halt until operator restart
    ForceLiquidate,
}

/// One evaluated rule
#[derive(Debug, Clone, Serialize)]
pub struct RiskCheck {
    pub name: &'static str,
    pub decision: RiskDecision,
    pub value: f64,
    pub threshold: f64,
}

/// Everything the evaluator saw and decided this tick
#[derive(Debug, Clone, Serialize)]
pub struct RiskReport {
    pub decision: RiskDecision,
    pub checks: Vec<RiskCheck>,
}

impl RiskReport {
    pub fn breached(&self) -> impl Iterator<Item = &RiskCheck> {
        self.checks
            .iter()
            .filter(|c| c.decision != RiskDecision::Continue)
    }
}

/// Session-wide reference values carried across ticks.
///
/// Updated by the engine before each risk evaluation; the risk manager only
/// reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_start_equity: Money,
    pub day_start_equity: Money,
    pub peak_equity: Money,
    current_day: Option<NaiveDate>,
}

impl SessionContext {
    pub fn new(initial_equity: Money) -> Self {
        Self {
            session_start_equity: initial_equity,
            day_start_equity: initial_equity,
            peak_equity: initial_equity,
            current_day: None,
        }
    }

    /// Fold the tick's equity into the running peak and roll the daily
    /// baseline at UTC day boundaries.
    pub fn observe(&mut self, ts: DateTime<Utc>, equity: Money) {
        let day = ts.date_naive();
        if self.current_day != Some(day) {
            if self.current_day.is_some() {
                self.day_start_equity = equity;
            }
            self.current_day = Some(day);
        }
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
    }

    pub fn drawdown_pct(&self, equity: Money) -> f64 {
        if !self.peak_equity.is_positive() {
            return 0.0;
        }
        ((self.peak_equity - equity) / self.peak_equity).to_f64()
    }

    /// Loss accumulated since the daily baseline (positive = losing)
    pub fn daily_loss(&self, equity: Money) -> Money {
        self.day_start_equity - equity
    }

    /// Loss since session start as a fraction of starting equity
    pub fn session_loss_pct(&self, equity: Money) -> f64 {
        if !self.session_start_equity.is_positive() {
            return 0.0;
        }
        ((self.session_start_equity - equity) / self.session_start_equity).to_f64()
    }
}

/// Observed values the evaluator needs beyond the session context
#[derive(Debug, Clone)]
pub struct RiskInputs {
    pub equity: Money,
    pub capital_deployed: Money,
    pub daily_order_count: u32,
    pub degraded_levels: u32,
}

/// Stateless rule evaluator
#[derive(Debug, Clone)]
pub struct RiskManager {
    config: RiskConfig,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn evaluate(&self, inputs: &RiskInputs, session: &SessionContext) -> RiskReport {
        let mut checks = Vec::with_capacity(6);

        let drawdown = session.drawdown_pct(inputs.equity);
        checks.push(RiskCheck {
            name: "drawdown",
            decision: if drawdown >= self.config.max_drawdown_pct {
                RiskDecision::ForceLiquidate
            } else {
                RiskDecision::Continue
            },
            value: drawdown,
            threshold: self.config.max_drawdown_pct,
        });

        let daily_loss = session.daily_loss(inputs.equity).to_f64();
        checks.push(RiskCheck {
            name: "daily_loss",
            decision: if daily_loss >= self.config.daily_loss_cap {
                RiskDecision::ForceLiquidate
            } else {
                RiskDecision::Continue
            },
            value: daily_loss,
            threshold: self.config.daily_loss_cap,
        });

        // Hard circuit breaker, independent of the configured caps above
        let session_loss = session.session_loss_pct(inputs.equity);
        checks.push(RiskCheck {
            name: "emergency_stop",
            decision: if session_loss >= self.config.emergency_stop_pct {
                RiskDecision::ForceLiquidate
            } else {
                RiskDecision::Continue
            },
            value: session_loss,
            threshold: self.config.emergency_stop_pct,
        });

        let deployed_cap = inputs.equity * Money::from_f64(self.config.max_capital_pct);
        checks.push(RiskCheck {
            name: "capital_deployed",
            decision: if inputs.capital_deployed >= deployed_cap {
                RiskDecision::SuspendNewEntries
            } else {
                RiskDecision::Continue
            },
            value: inputs.capital_deployed.to_f64(),
            threshold: deployed_cap.to_f64(),
        });

        checks.push(RiskCheck {
            name: "daily_orders",
            decision: if inputs.daily_order_count >= self.config.max_orders_per_day {
                RiskDecision::SuspendNewEntries
            } else {
                RiskDecision::Continue
            },
            value: inputs.daily_order_count as f64,
            threshold: self.config.max_orders_per_day as f64,
        });

        checks.push(RiskCheck {
            name: "degraded_grid",
            decision: if inputs.degraded_levels > 0 {
                RiskDecision::SuspendNewEntries
            } else {
                RiskDecision::Continue
            },
            value: inputs.degraded_levels as f64,
            threshold: 0.0,
        });

        let decision = checks
            .iter()
            .map(|c| c.decision)
            .max()
            .unwrap_or(RiskDecision::Continue);

        if decision != RiskDecision::Continue {
            for check in checks.iter().filter(|c| c.decision == decision) {
                warn!(
                    rule = check.name,
                    value = check.value,
                    threshold = check.threshold,
                    ?decision,
                    "risk rule breached"
                );
            }
        }

        RiskReport { decision, checks }
    }

    /// How much buy-side notional the grid may still add under the cap
    pub fn buy_headroom(&self, equity: Money, capital_deployed: Money) -> Money {
        let cap = equity * Money::from_f64(self.config.max_capital_pct);
        (cap - capital_deployed).max(Money::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn risk() -> RiskManager {
        RiskManager::new(RiskConfig {
            initial_capital: 10_000.0,
            max_drawdown_pct: 0.15,
            max_capital_pct: 0.50,
            daily_loss_cap: 500.0,
            emergency_stop_pct: 0.10,
            max_orders_per_day: 200,
            ..RiskConfig::default()
        })
    }

    fn inputs(equity: f64, deployed: f64) -> RiskInputs {
        RiskInputs {
            equity: Money::from_f64(equity),
            capital_deployed: Money::from_f64(deployed),
            daily_order_count: 0,
            degraded_levels: 0,
        }
    }

    fn session(initial: f64) -> SessionContext {
        let mut s = SessionContext::new(Money::from_f64(initial));
        s.observe(Utc::now(), Money::from_f64(initial));
        s
    }

    #[test]
    fn test_healthy_session_continues() {
        let report = risk().evaluate(&inputs(10_000.0, 1_000.0), &session(10_000.0));
        assert_eq!(report.decision, RiskDecision::Continue);
        assert_eq!(report.breached().count(), 0);
    }

    #[test]
    fn test_exact_drawdown_threshold_liquidates() {
        let mut s = session(10_000.0);
        s.observe(Utc::now(), Money::from_f64(12_000.0));

        // 15% below the 12,000 peak, exactly at the limit
        let report = risk().evaluate(&inputs(10_200.0, 0.0), &s);
        assert_eq!(report.decision, RiskDecision::ForceLiquidate);
        assert!(report.breached().any(|c| c.name == "drawdown"));
    }

    #[test]
    fn test_daily_loss_cap_liquidates() {
        // 500 below the daily baseline; drawdown (5%) stays under its limit
        let report = risk().evaluate(&inputs(9_500.0, 0.0), &session(10_000.0));
        assert_eq!(report.decision, RiskDecision::ForceLiquidate);
        assert!(report.breached().any(|c| c.name == "daily_loss"));
    }

    #[test]
    fn test_emergency_stop_fires_independently() {
        let mut config = RiskConfig {
            daily_loss_cap: 1e9,
            max_drawdown_pct: 0.90,
            emergency_stop_pct: 0.10,
            ..RiskConfig::default()
        };
        config.initial_capital = 10_000.0;
        let risk = RiskManager::new(config);

        let report = risk.evaluate(&inputs(9_000.0, 0.0), &session(10_000.0));
        assert_eq!(report.decision, RiskDecision::ForceLiquidate);
        assert!(report.breached().any(|c| c.name == "emergency_stop"));
    }

    #[test]
    fn test_capital_cap_only_suspends() {
        let report = risk().evaluate(&inputs(10_000.0, 5_000.0), &session(10_000.0));
        assert_eq!(report.decision, RiskDecision::SuspendNewEntries);
    }

    #[test]
    fn test_degraded_grid_suspends() {
        let mut i = inputs(10_000.0, 0.0);
        i.degraded_levels = 2;
        let report = risk().evaluate(&i, &session(10_000.0));
        assert_eq!(report.decision, RiskDecision::SuspendNewEntries);
    }

    #[test]
    fn test_most_severe_decision_wins() {
        // Both the capital cap (suspend) and drawdown (liquidate) breached
        let mut s = session(10_000.0);
        s.observe(Utc::now(), Money::from_f64(12_000.0));
        let report = risk().evaluate(&inputs(9_000.0, 8_000.0), &s);
        assert_eq!(report.decision, RiskDecision::ForceLiquidate);
    }

    #[test]
    fn test_day_roll_resets_daily_baseline() {
        let mut s = session(10_000.0);
        let now = Utc::now();
        s.observe(now, Money::from_f64(9_700.0));
        assert_eq!(s.daily_loss(Money::from_f64(9_700.0)).to_f64(), 300.0);

        s.observe(now + Duration::days(1), Money::from_f64(9_700.0));
        assert_eq!(s.daily_loss(Money::from_f64(9_700.0)).to_f64(), 0.0);
    }

    #[test]
    fn test_buy_headroom_clamps_at_zero() {
        let r = risk();
        let headroom = r.buy_headroom(Money::from_f64(10_000.0), Money::from_f64(4_900.0));
        assert_eq!(headroom.to_f64(), 100.0);

        let exhausted = r.buy_headroom(Money::from_f64(10_000.0), Money::from_f64(6_000.0));
        assert_eq!(exhausted, Money::ZERO);
    }
}
