//! End-to-end control-loop tests over mock ports: entry, forced stop-loss
//! exit, lifecycle idempotence and cancellation promptness.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tradepilot::application::trader::{BotRegistry, BotState};
use tradepilot::domain::market::Timeframe;
use tradepilot::domain::ports::{
    MarketDataService, NotificationService, TradeRepository, TradeStatus, TradingService,
};
use tradepilot::domain::trading::fees::FeeSettings;
use tradepilot::domain::trading::types::{BotConfig, Candle, OrderSide, RiskLevel};
use tradepilot::infrastructure::mock::{
    MemoryTradeRepository, MockMarketDataService, MockTradingService,
};
use tradepilot::infrastructure::notification::NullNotifier;

fn uptrend_candles(bars: usize) -> Vec<Candle> {
    (0..bars)
        .map(|i| {
            let close = 100.0 + i as f64 * 2.0;
            let open = if i == 0 { close } else { 100.0 + (i - 1) as f64 * 2.0 };
            Candle {
                symbol: "BTC/USDT".to_string(),
                open: Decimal::from_f64_retain(open).unwrap(),
                high: Decimal::from_f64_retain(open.max(close) * 1.01).unwrap(),
                low: Decimal::from_f64_retain(open.min(close) * 0.99).unwrap(),
                close: Decimal::from_f64_retain(close).unwrap(),
                volume: dec!(1000),
                timestamp: 1_700_000_000_000 + (i as i64) * 300_000,
            }
        })
        .collect()
}

fn crash_candles(bars: usize, from: f64) -> Vec<Candle> {
    (0..bars)
        .map(|i| {
            let close = from - i as f64 * 0.5;
            let open = if i == 0 { close } else { from - (i - 1) as f64 * 0.5 };
            Candle {
                symbol: "BTC/USDT".to_string(),
                open: Decimal::from_f64_retain(open).unwrap(),
                high: Decimal::from_f64_retain(open.max(close) * 1.01).unwrap(),
                low: Decimal::from_f64_retain(open.min(close) * 0.99).unwrap(),
                close: Decimal::from_f64_retain(close).unwrap(),
                volume: dec!(1000),
                timestamp: 1_700_100_000_000 + (i as i64) * 300_000,
            }
        })
        .collect()
}

struct Harness {
    registry: Arc<BotRegistry>,
    market: Arc<MockMarketDataService>,
    trading: Arc<MockTradingService>,
    trades: Arc<MemoryTradeRepository>,
    config_id: i64,
}

fn set_all_frames(market: &MockMarketDataService, candles: &[Candle]) {
    market.set_candles(Timeframe::FiveMin, candles.to_vec());
    for (tf, _) in Timeframe::alignment_set() {
        market.set_candles(tf, candles.to_vec());
    }
}

fn harness() -> Harness {
    let market = Arc::new(MockMarketDataService::new());
    set_all_frames(&market, &uptrend_candles(100));

    // Last close of the uptrend series is 298
    let trading = Arc::new(MockTradingService::new(dec!(100000), dec!(298)));
    let trades = Arc::new(MemoryTradeRepository::new());

    let fee_settings = FeeSettings {
        maker_fee: dec!(0.001),
        taker_fee: dec!(0.001),
        min_profit_multiple: dec!(1),
        max_trades_per_hour: 100,
        max_trades_per_day: 500,
        min_hold_time_minutes: 0,
    };

    let registry = Arc::new(BotRegistry::new(
        market.clone() as Arc<dyn MarketDataService>,
        trading.clone() as Arc<dyn TradingService>,
        trades.clone() as Arc<dyn TradeRepository>,
        Arc::new(NullNotifier) as Arc<dyn NotificationService>,
        Duration::from_millis(50),
        fee_settings,
    ));

    let config = BotConfig {
        id: 0,
        user_id: 1,
        name: "flow-test".to_string(),
        symbol: "BTC/USDT".to_string(),
        budget: dec!(10000),
        position_size_ratio: 0.95,
        min_confidence: 0.7,
        risk_level: RiskLevel::Moderate,
        max_daily_loss_pct: 5.0,
        paper_trading: true,
    };
    let config_id = registry.create_bot(config).unwrap();

    Harness { registry, market, trading, trades, config_id }
}

async fn wait_for<F>(mut predicate: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread")]
async fn strong_uptrend_opens_position_and_crash_forces_exit() {
    let h = harness();
    h.registry.start_bot(h.config_id).unwrap();

    // Entry: strong uptrend with aligned timeframes clears min_confidence
    let trading = h.trading.clone();
    let opened = wait_for(
        || trading.orders().iter().any(|o| o.side == OrderSide::Buy),
        3000,
    )
    .await;
    assert!(opened, "expected a BUY order");

    // Give the tick a moment to finish persisting and publishing state
    tokio::time::sleep(Duration::from_millis(150)).await;

    let open_row = h.trades.find_open("BTC/USDT").await.unwrap();
    assert!(open_row.is_some(), "open trade should be persisted");

    let status = h.registry.bot_status(h.config_id, 50).unwrap();
    assert_eq!(status.state, BotState::Running);
    assert!(status.current_position.is_some());
    assert!(status.breakeven.is_some());
    assert!(!status.activity_log.is_empty());

    // Crash 16% below entry: the stop-loss path must close despite any
    // fee-gate objection
    set_all_frames(&h.market, &crash_candles(100, 300.0));
    h.trading.set_fill_price(dec!(250));

    let trading = h.trading.clone();
    let closed = wait_for(
        || trading.orders().iter().any(|o| o.side == OrderSide::Sell),
        3000,
    )
    .await;
    assert!(closed, "expected a forced SELL order");

    let mut completed = false;
    let deadline = tokio::time::Instant::now() + Duration::from_millis(3000);
    while tokio::time::Instant::now() < deadline {
        let rows = h.trades.recent(10).await.unwrap();
        if rows.iter().any(|r| r.status == TradeStatus::Completed) {
            completed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(completed, "trade row should be marked completed");

    let status = h.registry.bot_status(h.config_id, 100).unwrap();
    assert!(status.current_position.is_none());
    assert!(
        status
            .activity_log
            .iter()
            .any(|entry| entry.message.contains("Position closed")),
        "activity log should record the close"
    );

    h.registry.stop_bot(h.config_id).unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn start_is_exclusive_and_stop_is_idempotent() {
    let h = harness();

    h.registry.start_bot(h.config_id).unwrap();
    let running = {
        let registry = h.registry.clone();
        let id = h.config_id;
        wait_for(
            move || registry.bot_status(id, 1).map(|s| s.state == BotState::Running).unwrap_or(false),
            2000,
        )
        .await
    };
    assert!(running);

    // Second start while running fails
    let err = h.registry.start_bot(h.config_id);
    assert!(err.is_err(), "second start should report AlreadyRunning");

    // Stop twice: both succeed
    h.registry.stop_bot(h.config_id).unwrap();
    h.registry.stop_bot(h.config_id).unwrap();

    let stopped = {
        let registry = h.registry.clone();
        let id = h.config_id;
        wait_for(
            move || registry.bot_status(id, 1).map(|s| s.state == BotState::Stopped).unwrap_or(false),
            2000,
        )
        .await
    };
    assert!(stopped, "loop should wind down after stop()");

    // A fresh run is allowed after a stop
    h.registry.start_bot(h.config_id).unwrap();
    h.registry.stop_bot(h.config_id).unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn market_data_failure_skips_tick_without_crashing() {
    let h = harness();
    h.market.set_fail_ohlcv(true);
    h.registry.start_bot(h.config_id).unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    let status = h.registry.bot_status(h.config_id, 100).unwrap();
    assert_eq!(status.state, BotState::Running, "fetch failures must not crash the loop");
    assert!(
        status
            .activity_log
            .iter()
            .any(|entry| entry.message.contains("Market data fetch failed")),
        "failure should be logged as an activity"
    );
    assert!(h.trading.orders().is_empty(), "no orders without market data");

    h.registry.stop_bot(h.config_id).unwrap();
}
