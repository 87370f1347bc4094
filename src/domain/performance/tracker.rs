use crate::domain::trading::types::TradeRecord;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;

/// Rolling trading statistics over a lookback window.
///
/// Sharpe and Sortino use the per-trade convention scaled by sqrt(365):
/// mean per-trade return over its standard deviation. Unusual, but it is the
/// convention this engine's sizing was calibrated against.
#[derive(Debug, Clone, Serialize)]
pub struct TradeStats {
    pub total_trades: usize,
    pub win_count: usize,
    pub loss_count: usize,
    pub win_rate: f64,
    pub avg_win_pct: f64,
    pub avg_loss_pct: f64,
    pub profit_factor: f64,
    pub expectancy_pct: f64,
    pub net_pnl_usd: Decimal,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown_pct: f64,
    pub largest_win_pct: f64,
    pub largest_loss_pct: f64,
    pub avg_hold_minutes: f64,
    pub lookback_days: i64,
}

impl TradeStats {
    /// Well-formed zero record for an empty window. Win rate defaults to 0.5
    /// so Kelly sizing degenerates to break-even.
    pub fn empty(lookback_days: i64) -> Self {
        Self {
            total_trades: 0,
            win_count: 0,
            loss_count: 0,
            win_rate: 0.5,
            avg_win_pct: 0.0,
            avg_loss_pct: 0.0,
            profit_factor: 0.0,
            expectancy_pct: 0.0,
            net_pnl_usd: Decimal::ZERO,
            sharpe_ratio: 0.0,
            sortino_ratio: 0.0,
            max_drawdown_pct: 0.0,
            largest_win_pct: 0.0,
            largest_loss_pct: 0.0,
            avg_hold_minutes: 0.0,
            lookback_days,
        }
    }
}

/// Append-only log of completed round trips. Statistics re-enter the
/// decision pipeline on the next tick through the position sizer.
#[derive(Debug, Default)]
pub struct PerformanceTracker {
    trades: Vec<TradeRecord>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self { trades: Vec::new() }
    }

    pub fn record(&mut self, trade: TradeRecord) {
        self.trades.push(trade);
    }

    pub fn trade_count(&self) -> usize {
        self.trades.len()
    }

    pub fn recent(&self, limit: usize) -> &[TradeRecord] {
        let start = self.trades.len().saturating_sub(limit);
        &self.trades[start..]
    }

    /// Computes statistics over trades whose exit falls within the window
    /// ending at `now`. `now` is passed in so backtests stay off the wall
    /// clock.
    pub fn statistics(&self, lookback_days: i64, now: DateTime<Utc>) -> TradeStats {
        let cutoff = now - Duration::days(lookback_days);
        let recent: Vec<&TradeRecord> =
            self.trades.iter().filter(|t| t.exit_time > cutoff).collect();

        if recent.is_empty() {
            return TradeStats::empty(lookback_days);
        }

        let wins: Vec<&&TradeRecord> = recent.iter().filter(|t| t.net_pnl > Decimal::ZERO).collect();
        let losses: Vec<&&TradeRecord> =
            recent.iter().filter(|t| t.net_pnl < Decimal::ZERO).collect();

        let total = recent.len();
        let win_rate = wins.len() as f64 / total as f64;

        let avg_win_pct = if wins.is_empty() {
            0.0
        } else {
            wins.iter().map(|t| t.pnl_pct).sum::<f64>() / wins.len() as f64
        };
        let avg_loss_pct = if losses.is_empty() {
            0.0
        } else {
            (losses.iter().map(|t| t.pnl_pct).sum::<f64>() / losses.len() as f64).abs()
        };

        let total_win: Decimal = wins.iter().map(|t| t.net_pnl).sum();
        let total_loss: Decimal = losses.iter().map(|t| t.net_pnl).sum::<Decimal>().abs();
        let profit_factor = if total_loss.is_zero() {
            f64::INFINITY
        } else {
            (total_win / total_loss).to_f64().unwrap_or(0.0)
        };

        let net_pnl_usd: Decimal = recent.iter().map(|t| t.net_pnl).sum();

        let returns: Vec<f64> = recent.iter().map(|t| t.pnl_pct).collect();
        let (sharpe_ratio, sortino_ratio) = sharpe_and_sortino(&returns);

        let max_drawdown_pct = max_drawdown(&returns);

        let expectancy_pct = win_rate * avg_win_pct - (1.0 - win_rate) * avg_loss_pct;

        let largest_win_pct = wins.iter().map(|t| t.pnl_pct).fold(0.0, f64::max);
        let largest_loss_pct = losses.iter().map(|t| t.pnl_pct).fold(0.0, f64::min);

        let avg_hold_minutes =
            recent.iter().map(|t| t.hold_minutes).sum::<f64>() / total as f64;

        TradeStats {
            total_trades: total,
            win_count: wins.len(),
            loss_count: losses.len(),
            win_rate,
            avg_win_pct,
            avg_loss_pct,
            profit_factor,
            expectancy_pct,
            net_pnl_usd,
            sharpe_ratio,
            sortino_ratio,
            max_drawdown_pct,
            largest_win_pct,
            largest_loss_pct,
            avg_hold_minutes,
            lookback_days,
        }
    }
}

fn sharpe_and_sortino(returns: &[f64]) -> (f64, f64) {
    if returns.len() < 2 {
        return (0.0, 0.0);
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    let annualization = 365.0_f64.sqrt();

    let sharpe = if std_dev > 1e-9 {
        mean / std_dev * annualization
    } else {
        0.0
    };

    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    let sortino = if downside.is_empty() {
        0.0
    } else {
        let downside_var =
            downside.iter().map(|r| r.powi(2)).sum::<f64>() / downside.len() as f64;
        let downside_std = downside_var.sqrt();
        if downside_std > 1e-9 {
            mean / downside_std * annualization
        } else {
            0.0
        }
    };

    (sharpe, sortino)
}

/// Maximum peak-to-trough decline over the cumulative-return series, in
/// percentage points.
fn max_drawdown(returns: &[f64]) -> f64 {
    let mut cumulative = 0.0;
    let mut peak = 0.0;
    let mut max_dd = 0.0;

    for r in returns {
        cumulative += r;
        if cumulative > peak {
            peak = cumulative;
        }
        let dd = peak - cumulative;
        if dd > max_dd {
            max_dd = dd;
        }
    }

    max_dd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::Regime;
    use rust_decimal_macros::dec;

    fn trade(net_pnl: Decimal, pnl_pct: f64, exit: DateTime<Utc>) -> TradeRecord {
        TradeRecord {
            symbol: "BTC/USDT".to_string(),
            entry_price: dec!(100),
            exit_price: dec!(100) + net_pnl,
            quantity: dec!(1),
            entry_time: exit - Duration::minutes(60),
            exit_time: exit,
            gross_pnl: net_pnl,
            fees: Decimal::ZERO,
            net_pnl,
            pnl_pct,
            hold_minutes: 60.0,
            confidence_at_entry: 0.7,
            regime_at_entry: Regime::TrendingUp,
        }
    }

    #[test]
    fn test_empty_window_defaults_to_breakeven_kelly() {
        let tracker = PerformanceTracker::new();
        let stats = tracker.statistics(30, Utc::now());
        assert_eq!(stats.total_trades, 0);
        assert_eq!(stats.win_rate, 0.5);
        assert_eq!(stats.net_pnl_usd, Decimal::ZERO);
    }

    #[test]
    fn test_win_rate_and_profit_factor() {
        let now = Utc::now();
        let mut tracker = PerformanceTracker::new();
        tracker.record(trade(dec!(10), 10.0, now));
        tracker.record(trade(dec!(10), 10.0, now));
        tracker.record(trade(dec!(-5), -5.0, now));

        let stats = tracker.statistics(30, now + Duration::minutes(1));
        assert!((stats.win_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((stats.profit_factor - 4.0).abs() < 1e-9);
        assert!((stats.avg_win_pct - 10.0).abs() < 1e-9);
        assert!((stats.avg_loss_pct - 5.0).abs() < 1e-9);
        // expectancy = 2/3 * 10 - 1/3 * 5 = 5.0
        assert!((stats.expectancy_pct - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_profit_factor_infinite_without_losses() {
        let now = Utc::now();
        let mut tracker = PerformanceTracker::new();
        tracker.record(trade(dec!(10), 10.0, now));
        let stats = tracker.statistics(30, now + Duration::minutes(1));
        assert!(stats.profit_factor.is_infinite());
    }

    #[test]
    fn test_lookback_window_excludes_old_trades() {
        let now = Utc::now();
        let mut tracker = PerformanceTracker::new();
        tracker.record(trade(dec!(10), 10.0, now - Duration::days(45)));
        tracker.record(trade(dec!(-5), -5.0, now));

        let stats = tracker.statistics(30, now + Duration::minutes(1));
        assert_eq!(stats.total_trades, 1);
        assert_eq!(stats.loss_count, 1);
    }

    #[test]
    fn test_max_drawdown_over_cumulative_returns() {
        // +10, -4, -3, +8 -> peak 10, trough 3, drawdown 7
        let dd = max_drawdown(&[10.0, -4.0, -3.0, 8.0]);
        assert!((dd - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_drawdown_zero_for_monotone_gains() {
        assert_eq!(max_drawdown(&[1.0, 2.0, 3.0]), 0.0);
    }
}
