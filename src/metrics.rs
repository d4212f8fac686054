//! Performance metrics
//!
//! Computed from an equity curve and the TradeEvent stream. Live and
//! backtest mode emit structurally identical event streams, so the same
//! functions serve both.

use serde::{Deserialize, Serialize};

use crate::types::TradeEvent;

/// Annualization factor for 5-minute bars (252 trading days x 288 bars)
pub const PERIODS_PER_YEAR_5M: f64 = 252.0 * 288.0;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub initial_capital: f64,
    pub final_equity: f64,
    pub total_return: f64,
    pub total_return_pct: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub win_rate_pct: f64,
    pub profit_factor: f64,
    pub total_trades: usize,
    pub total_fees: f64,
}

/// Annualized Sharpe ratio over per-period simple returns
pub fn sharpe_ratio(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>()
        / (returns.len() - 1) as f64;
    let std_dev = variance.sqrt();
    if std_dev == 0.0 {
        return 0.0;
    }
    mean / std_dev * periods_per_year.sqrt()
}

/// Annualized Sortino ratio: mean return over downside deviation
pub fn sortino_ratio(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    if downside.is_empty() {
        return if mean > 0.0 { f64::INFINITY } else { 0.0 };
    }
    let down_mean = downside.iter().sum::<f64>() / downside.len() as f64;
    let down_var = downside
        .iter()
        .map(|r| (r - down_mean) * (r - down_mean))
        .sum::<f64>()
        / downside.len().saturating_sub(1).max(1) as f64;
    let down_std = down_var.sqrt();
    if down_std == 0.0 {
        return 0.0;
    }
    mean / down_std * periods_per_year.sqrt()
}

/// Largest peak-to-trough equity decline, in percent
pub fn max_drawdown_pct(equity_curve: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut max_dd = 0.0;
    for &equity in equity_curve {
        if equity > peak {
            peak = equity;
        }
        if peak > 0.0 {
            let dd = (peak - equity) / peak * 100.0;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}

/// Events that realized PnL beyond their own fee, i.e. closing fills
fn realizing_events(events: &[TradeEvent]) -> impl Iterator<Item = &TradeEvent> {
    events.iter().filter(|e| e.pnl != -e.fee)
}

/// Share of realizing fills that closed profitably, in percent
pub fn win_rate_pct(events: &[TradeEvent]) -> f64 {
    let mut total = 0usize;
    let mut wins = 0usize;
    for event in realizing_events(events) {
        total += 1;
        if event.pnl.is_positive() {
            wins += 1;
        }
    }
    if total == 0 {
        return 0.0;
    }
    wins as f64 / total as f64 * 100.0
}

/// Gross profit over gross loss across realizing fills
pub fn profit_factor(events: &[TradeEvent]) -> f64 {
    let mut gross_profit = 0.0;
    let mut gross_loss = 0.0;
    for event in realizing_events(events) {
        let pnl = event.pnl.to_f64();
        if pnl > 0.0 {
            gross_profit += pnl;
        } else {
            gross_loss += -pnl;
        }
    }
    if gross_loss == 0.0 {
        return if gross_profit > 0.0 { f64::INFINITY } else { 0.0 };
    }
    gross_profit / gross_loss
}

/// Full summary over an equity curve and its trade events
pub fn compute_all(
    equity_curve: &[f64],
    events: &[TradeEvent],
    initial_capital: f64,
    periods_per_year: f64,
) -> PerformanceMetrics {
    if equity_curve.is_empty() {
        return PerformanceMetrics {
            initial_capital,
            ..PerformanceMetrics::default()
        };
    }

    let returns: Vec<f64> = equity_curve
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();

    let final_equity = *equity_curve.last().unwrap_or(&initial_capital);
    let total_return = final_equity - initial_capital;
    let total_return_pct = if initial_capital > 0.0 {
        total_return / initial_capital * 100.0
    } else {
        0.0
    };

    PerformanceMetrics {
        initial_capital,
        final_equity,
        total_return,
        total_return_pct,
        max_drawdown_pct: max_drawdown_pct(equity_curve),
        sharpe_ratio: sharpe_ratio(&returns, periods_per_year),
        sortino_ratio: sortino_ratio(&returns, periods_per_year),
        win_rate_pct: win_rate_pct(events),
        profit_factor: profit_factor(events),
        total_trades: realizing_events(events).count(),
        total_fees: events.iter().map(|e| e.fee.to_f64()).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regime::Regime;
    use crate::types::{Money, Side};
    use chrono::Utc;

    fn event(pnl: f64, fee: f64) -> TradeEvent {
        TradeEvent {
            ts: Utc::now(),
            trade_id: "T-1".into(),
            side: Side::Sell,
            price: Money::from_f64(50_000.0),
            qty: Money::from_f64(0.001),
            fee: Money::from_f64(fee),
            pnl: Money::from_f64(pnl),
            regime: Regime::Medium,
            confidence: 0.7,
            grid_level: 1,
        }
    }

    #[test]
    fn test_max_drawdown_simple() {
        let curve = vec![100.0, 120.0, 90.0, 110.0];
        assert!((max_drawdown_pct(&curve) - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_max_drawdown_monotone_curve_is_zero() {
        let curve = vec![100.0, 101.0, 102.0];
        assert_eq!(max_drawdown_pct(&curve), 0.0);
    }

    #[test]
    fn test_sharpe_zero_for_flat_returns() {
        assert_eq!(sharpe_ratio(&[0.0, 0.0, 0.0], PERIODS_PER_YEAR_5M), 0.0);
    }

    #[test]
    fn test_sharpe_positive_for_steady_gains() {
        let returns = vec![0.001, 0.002, 0.0015, 0.0008];
        assert!(sharpe_ratio(&returns, PERIODS_PER_YEAR_5M) > 0.0);
    }

    #[test]
    fn test_win_rate_ignores_entry_fills() {
        // Entry fill: pnl is exactly -fee, not a closed trade
        let events = vec![event(-0.05, 0.05), event(10.0, 0.05), event(-4.0, 0.05)];
        assert!((win_rate_pct(&events) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_profit_factor() {
        let events = vec![event(10.0, 0.0), event(-5.0, 0.1)];
        assert!((profit_factor(&events) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_compute_all_counts_fees() {
        let curve = vec![10_000.0, 10_005.0, 10_001.0];
        let events = vec![event(-0.05, 0.05), event(5.0, 0.05)];
        let metrics = compute_all(&curve, &events, 10_000.0, PERIODS_PER_YEAR_5M);

        assert_eq!(metrics.total_trades, 1);
        assert!((metrics.total_fees - 0.1).abs() < 1e-9);
        assert!((metrics.final_equity - 10_001.0).abs() < 1e-9);
    }
}
