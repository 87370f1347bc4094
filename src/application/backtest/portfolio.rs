use crate::domain::trading::types::TradeRecord;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;

/// One equity observation per processed market event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquityPoint {
    /// Milliseconds since epoch, from the candle feed (never the wall
    /// clock).
    pub timestamp: i64,
    pub equity: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestMetrics {
    pub initial_equity: Decimal,
    pub final_equity: Decimal,
    pub total_return_pct: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub total_trades: usize,
    pub completed_trades: usize,
}

/// Equity bookkeeping for a backtest run, plus the summary metrics computed
/// once the replay finishes. Sharpe/Sortino use per-bar returns with a
/// sqrt(252) annualization.
#[derive(Debug, Default)]
pub struct BacktestPortfolio {
    curve: Vec<EquityPoint>,
}

impl BacktestPortfolio {
    pub fn new() -> Self {
        Self { curve: Vec::new() }
    }

    pub fn observe(&mut self, timestamp: i64, equity: Decimal) {
        self.curve.push(EquityPoint { timestamp, equity });
    }

    pub fn curve(&self) -> &[EquityPoint] {
        &self.curve
    }

    pub fn into_curve(self) -> Vec<EquityPoint> {
        self.curve
    }

    pub fn metrics(&self, trades: &[TradeRecord], total_fills: usize) -> BacktestMetrics {
        let initial_equity = self
            .curve
            .first()
            .map(|p| p.equity)
            .unwrap_or(Decimal::ZERO);
        let final_equity = self
            .curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(Decimal::ZERO);

        let total_return_pct = if initial_equity.is_zero() {
            0.0
        } else {
            ((final_equity - initial_equity) / initial_equity * Decimal::ONE_HUNDRED)
                .to_f64()
                .unwrap_or(0.0)
        };

        let returns = self.per_bar_returns();
        let (sharpe_ratio, sortino_ratio) = annualized_ratios(&returns);
        let max_drawdown_pct = equity_max_drawdown(&self.curve);

        let wins: Vec<&TradeRecord> =
            trades.iter().filter(|t| t.net_pnl > Decimal::ZERO).collect();
        let losses: Vec<&TradeRecord> =
            trades.iter().filter(|t| t.net_pnl < Decimal::ZERO).collect();

        let win_rate = if trades.is_empty() {
            0.0
        } else {
            wins.len() as f64 / trades.len() as f64
        };

        let total_win: Decimal = wins.iter().map(|t| t.net_pnl).sum();
        let total_loss: Decimal = losses.iter().map(|t| t.net_pnl).sum::<Decimal>().abs();
        let profit_factor = if total_loss.is_zero() {
            if total_win.is_zero() { 0.0 } else { f64::INFINITY }
        } else {
            (total_win / total_loss).to_f64().unwrap_or(0.0)
        };

        BacktestMetrics {
            initial_equity,
            final_equity,
            total_return_pct,
            max_drawdown_pct,
            sharpe_ratio,
            sortino_ratio,
            win_rate,
            profit_factor,
            total_trades: total_fills,
            completed_trades: trades.len(),
        }
    }

    fn per_bar_returns(&self) -> Vec<f64> {
        let mut returns = Vec::with_capacity(self.curve.len().saturating_sub(1));
        for pair in self.curve.windows(2) {
            let prev = pair[0].equity.to_f64().unwrap_or(0.0);
            let curr = pair[1].equity.to_f64().unwrap_or(0.0);
            if prev.abs() > f64::EPSILON {
                returns.push((curr - prev) / prev);
            }
        }
        returns
    }
}

fn annualized_ratios(returns: &[f64]) -> (f64, f64) {
    if returns.len() < 2 {
        return (0.0, 0.0);
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();
    let annualization = 252.0_f64.sqrt();

    let sharpe = if std_dev > 1e-12 { mean / std_dev * annualization } else { 0.0 };

    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    let sortino = if downside.is_empty() {
        0.0
    } else {
        let downside_std = (downside.iter().map(|r| r.powi(2)).sum::<f64>()
            / downside.len() as f64)
            .sqrt();
        if downside_std > 1e-12 { mean / downside_std * annualization } else { 0.0 }
    };

    (sharpe, sortino)
}

fn equity_max_drawdown(curve: &[EquityPoint]) -> f64 {
    let mut peak = Decimal::ZERO;
    let mut max_dd = 0.0;
    for point in curve {
        if point.equity > peak {
            peak = point.equity;
        }
        if !peak.is_zero() {
            let dd = ((peak - point.equity) / peak * Decimal::ONE_HUNDRED)
                .to_f64()
                .unwrap_or(0.0);
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}
