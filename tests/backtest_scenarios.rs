//! Backtester scenario tests: determinism of the replay and behaviour on
//! canonical price paths.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tradepilot::application::backtest::engine::{BacktestConfig, BacktestEngine};
use tradepilot::domain::market::Timeframe;
use tradepilot::domain::trading::types::Candle;
use tradepilot::infrastructure::mock::MockMarketDataService;

fn monotone_up(bars: usize) -> Vec<Candle> {
    (0..bars)
        .map(|i| {
            let close = 100.0 + i as f64;
            let open = if i == 0 { close } else { 100.0 + (i - 1) as f64 };
            Candle {
                symbol: "BTC/USDT".to_string(),
                open: Decimal::from_f64_retain(open).unwrap(),
                high: Decimal::from_f64_retain(open.max(close) * 1.005).unwrap(),
                low: Decimal::from_f64_retain(open.min(close) * 0.995).unwrap(),
                close: Decimal::from_f64_retain(close).unwrap(),
                volume: dec!(1000),
                timestamp: 1_700_000_000_000 + (i as i64) * 3_600_000,
            }
        })
        .collect()
}

fn config() -> BacktestConfig {
    BacktestConfig {
        symbol: "BTC/USDT".to_string(),
        timeframe: Timeframe::OneHour,
        days: 30,
        initial_capital: dec!(10000),
        position_size_ratio: 0.95,
        fee_rate: dec!(0.001),
        slippage_rate: Decimal::ZERO,
        min_confidence: 0.65,
        seed: 42,
    }
}

#[test]
fn monotone_up_series_is_profitable_with_negligible_drawdown() {
    let candles = monotone_up(200);
    let report = BacktestEngine::new(config()).run(&candles);

    assert!(report.metrics.total_return_pct > 0.0);
    assert!(report.metrics.sharpe_ratio > 0.0);
    // Fees on entries are the only equity dips on a monotone series
    assert!(
        report.metrics.max_drawdown_pct < 1.0,
        "drawdown {} should be fee-sized only",
        report.metrics.max_drawdown_pct
    );
    assert!(report.metrics.total_trades > 0);
    // Every completed round trip on this path is a winner
    for trade in &report.trades {
        assert!(trade.net_pnl > Decimal::ZERO);
    }
}

#[test]
fn identical_inputs_produce_bit_identical_results() {
    let candles = monotone_up(200);

    let first = BacktestEngine::new(config()).run(&candles);
    let second = BacktestEngine::new(config()).run(&candles);

    assert_eq!(first.equity_curve, second.equity_curve, "equity curves must match exactly");
    assert_eq!(first.trades.len(), second.trades.len());
    for (a, b) in first.trades.iter().zip(second.trades.iter()) {
        assert_eq!(a.entry_time, b.entry_time);
        assert_eq!(a.exit_time, b.exit_time);
        assert_eq!(a.entry_price, b.entry_price);
        assert_eq!(a.exit_price, b.exit_price);
        assert_eq!(a.net_pnl, b.net_pnl);
    }
    assert_eq!(
        first.metrics.final_equity, second.metrics.final_equity,
        "metrics must be reproducible"
    );
}

#[test]
fn seeded_walk_replays_identically_across_engines() {
    // The seeded mock walk is the fixture for soak runs; the replay over it
    // must also be reproducible end to end
    let candles = MockMarketDataService::seeded_walk("BTC/USDT", 1234, 400, 250.0);
    let first = BacktestEngine::new(config()).run(&candles);
    let second = BacktestEngine::new(config()).run(&candles);

    assert_eq!(first.equity_curve, second.equity_curve);
    assert_eq!(first.trades.len(), second.trades.len());
}

#[test]
fn sideways_series_stays_flat() {
    let candles: Vec<Candle> = (0..200)
        .map(|i| Candle {
            symbol: "BTC/USDT".to_string(),
            open: dec!(100),
            high: dec!(100.5),
            low: dec!(99.5),
            close: dec!(100),
            volume: dec!(1000),
            timestamp: 1_700_000_000_000 + (i as i64) * 3_600_000,
        })
        .collect();

    let report = BacktestEngine::new(config()).run(&candles);
    assert_eq!(report.metrics.completed_trades, 0);
    assert_eq!(report.metrics.final_equity, dec!(10000));
    assert_eq!(report.metrics.total_return_pct, 0.0);
}
