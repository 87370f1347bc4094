//! In-memory service implementations for tests and offline development.

use crate::domain::errors::{MarketDataError, TradingError};
use crate::domain::market::Timeframe;
use crate::domain::ports::{
    MarketDataService, TradeRepository, TradeRow, TradeStatus, TradingService,
};
use crate::domain::trading::types::{
    AccountBalances, BookLevel, Candle, Order, OrderBook, OrderSide, OrderStatus, OrderType,
    Ticker, TimeInForce,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Market data stub serving pre-loaded candle sets. Candles for the
/// requested timeframe are truncated to `limit`; the order book is a tight
/// synthetic two-sided book around the last close.
pub struct MockMarketDataService {
    candles: Mutex<HashMap<Timeframe, Vec<Candle>>>,
    fail_ohlcv: Mutex<bool>,
}

impl MockMarketDataService {
    pub fn new() -> Self {
        Self {
            candles: Mutex::new(HashMap::new()),
            fail_ohlcv: Mutex::new(false),
        }
    }

    pub fn with_candles(timeframe: Timeframe, candles: Vec<Candle>) -> Self {
        let service = Self::new();
        service.set_candles(timeframe, candles);
        service
    }

    pub fn set_candles(&self, timeframe: Timeframe, candles: Vec<Candle>) {
        self.candles
            .lock()
            .expect("mock candle store poisoned")
            .insert(timeframe, candles);
    }

    pub fn set_fail_ohlcv(&self, fail: bool) {
        *self.fail_ohlcv.lock().expect("mock flag poisoned") = fail;
    }

    /// Deterministic random-walk series for soak-style tests.
    pub fn seeded_walk(symbol: &str, seed: u64, bars: usize, start_price: f64) -> Vec<Candle> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut price = start_price;
        let mut candles = Vec::with_capacity(bars);
        for i in 0..bars {
            let drift: f64 = rng.random_range(-0.01..0.012);
            let open = price;
            price *= 1.0 + drift;
            let high = open.max(price) * 1.003;
            let low = open.min(price) * 0.997;
            let volume = rng.random_range(500.0..2000.0);
            candles.push(Candle {
                symbol: symbol.to_string(),
                open: Decimal::from_f64_retain(open).unwrap_or_default(),
                high: Decimal::from_f64_retain(high).unwrap_or_default(),
                low: Decimal::from_f64_retain(low).unwrap_or_default(),
                close: Decimal::from_f64_retain(price).unwrap_or_default(),
                volume: Decimal::from_f64_retain(volume).unwrap_or_default(),
                timestamp: 1_700_000_000_000 + (i as i64) * 300_000,
            });
        }
        candles
    }

    fn last_close(&self) -> Option<(String, Decimal)> {
        let candles = self.candles.lock().ok()?;
        candles
            .values()
            .next()
            .and_then(|series| series.last())
            .map(|c| (c.symbol.clone(), c.close))
    }
}

impl Default for MockMarketDataService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataService for MockMarketDataService {
    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, MarketDataError> {
        let (_, last) = self.last_close().ok_or(MarketDataError::BadSymbol {
            symbol: symbol.to_string(),
        })?;
        Ok(Ticker {
            symbol: symbol.to_string(),
            last,
            bid: last * Decimal::new(999, 3),
            ask: last * Decimal::new(1001, 3),
            high_24h: last,
            low_24h: last,
            volume_24h: Decimal::from(1_000_000),
        })
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, MarketDataError> {
        if *self.fail_ohlcv.lock().expect("mock flag poisoned") {
            return Err(MarketDataError::Network {
                reason: "mock failure injected".to_string(),
            });
        }
        let candles = self.candles.lock().expect("mock candle store poisoned");
        let series = candles.get(&timeframe).ok_or(MarketDataError::BadSymbol {
            symbol: symbol.to_string(),
        })?;
        let start = series.len().saturating_sub(limit);
        Ok(series[start..].to_vec())
    }

    async fn fetch_order_book(
        &self,
        symbol: &str,
        _depth: Option<usize>,
    ) -> Result<OrderBook, MarketDataError> {
        let (_, last) = self.last_close().ok_or(MarketDataError::BadSymbol {
            symbol: symbol.to_string(),
        })?;
        let spread = last * Decimal::new(1, 3);
        Ok(OrderBook {
            bids: vec![BookLevel { price: last - spread, quantity: Decimal::from(10) }],
            asks: vec![BookLevel { price: last + spread, quantity: Decimal::from(10) }],
        })
    }
}

/// Trading stub that fills every market order at a scripted price and keeps
/// simple balance accounting.
pub struct MockTradingService {
    fill_price: Mutex<Decimal>,
    orders: Mutex<Vec<Order>>,
    fail_orders: Mutex<bool>,
    cash: Mutex<Decimal>,
}

impl MockTradingService {
    pub fn new(initial_cash: Decimal, fill_price: Decimal) -> Self {
        Self {
            fill_price: Mutex::new(fill_price),
            orders: Mutex::new(Vec::new()),
            fail_orders: Mutex::new(false),
            cash: Mutex::new(initial_cash),
        }
    }

    pub fn set_fill_price(&self, price: Decimal) {
        *self.fill_price.lock().expect("mock fill price poisoned") = price;
    }

    pub fn set_fail_orders(&self, fail: bool) {
        *self.fail_orders.lock().expect("mock flag poisoned") = fail;
    }

    pub fn orders(&self) -> Vec<Order> {
        self.orders.lock().expect("mock order log poisoned").clone()
    }
}

#[async_trait]
impl TradingService for MockTradingService {
    async fn place_market(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<Order, TradingError> {
        if *self.fail_orders.lock().expect("mock flag poisoned") {
            return Err(TradingError::Rejected {
                reason: "mock rejection injected".to_string(),
            });
        }

        let price = *self.fill_price.lock().expect("mock fill price poisoned");
        let order = Order {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity,
            limit_price: None,
            status: OrderStatus::Filled,
            fill_price: Some(price),
            fee: Some(price * quantity * Decimal::new(1, 3)),
            timestamp: Utc::now().timestamp_millis(),
        };

        {
            let mut cash = self.cash.lock().expect("mock cash poisoned");
            let notional = price * quantity;
            match side {
                OrderSide::Buy => *cash -= notional,
                OrderSide::Sell => *cash += notional,
            }
        }

        self.orders
            .lock()
            .expect("mock order log poisoned")
            .push(order.clone());
        Ok(order)
    }

    async fn place_limit(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        _price: Decimal,
        _time_in_force: TimeInForce,
    ) -> Result<Order, TradingError> {
        self.place_market(symbol, side, quantity).await
    }

    async fn get_account(&self) -> Result<AccountBalances, TradingError> {
        Ok(AccountBalances {
            cash: *self.cash.lock().expect("mock cash poisoned"),
            ..Default::default()
        })
    }

    async fn get_open_orders(&self, _symbol: Option<&str>) -> Result<Vec<Order>, TradingError> {
        Ok(Vec::new())
    }

    async fn get_order(&self, _symbol: &str, order_id: &str) -> Result<Order, TradingError> {
        self.orders
            .lock()
            .expect("mock order log poisoned")
            .iter()
            .find(|o| o.id == order_id)
            .cloned()
            .ok_or(TradingError::InvalidOrder {
                reason: format!("unknown order {}", order_id),
            })
    }

    async fn cancel_order(&self, _symbol: &str, _order_id: &str) -> Result<(), TradingError> {
        Ok(())
    }
}

/// Trade store kept in a Vec; mirrors the SQLite adapter's semantics.
pub struct MemoryTradeRepository {
    rows: Mutex<Vec<TradeRow>>,
    next_id: Mutex<i64>,
}

impl MemoryTradeRepository {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            next_id: Mutex::new(1),
        }
    }
}

impl Default for MemoryTradeRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TradeRepository for MemoryTradeRepository {
    async fn insert(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        filled_price: Option<Decimal>,
        status: TradeStatus,
        timestamp: DateTime<Utc>,
    ) -> anyhow::Result<i64> {
        let mut next_id = self.next_id.lock().expect("memory repo poisoned");
        let id = *next_id;
        *next_id += 1;

        self.rows.lock().expect("memory repo poisoned").push(TradeRow {
            id,
            symbol: symbol.to_string(),
            side,
            quantity,
            price,
            filled_price,
            status,
            timestamp,
        });
        Ok(id)
    }

    async fn update_status(
        &self,
        id: i64,
        status: TradeStatus,
        filled_price: Option<Decimal>,
    ) -> anyhow::Result<()> {
        let mut rows = self.rows.lock().expect("memory repo poisoned");
        let row = rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| anyhow::anyhow!("Trade {} not found", id))?;
        row.status = status;
        if filled_price.is_some() {
            row.filled_price = filled_price;
        }
        Ok(())
    }

    async fn find_open(&self, symbol: &str) -> anyhow::Result<Option<TradeRow>> {
        let rows = self.rows.lock().expect("memory repo poisoned");
        Ok(rows
            .iter()
            .filter(|r| r.symbol == symbol && r.status == TradeStatus::Open)
            .max_by_key(|r| r.timestamp)
            .cloned())
    }

    async fn recent(&self, limit: i64) -> anyhow::Result<Vec<TradeRow>> {
        let rows = self.rows.lock().expect("memory repo poisoned");
        let mut sorted: Vec<TradeRow> = rows.clone();
        sorted.sort_by_key(|r| std::cmp::Reverse(r.timestamp));
        sorted.truncate(limit as usize);
        Ok(sorted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_seeded_walk_is_deterministic() {
        let a = MockMarketDataService::seeded_walk("BTC/USDT", 7, 50, 100.0);
        let b = MockMarketDataService::seeded_walk("BTC/USDT", 7, 50, 100.0);
        assert_eq!(a, b);

        let c = MockMarketDataService::seeded_walk("BTC/USDT", 8, 50, 100.0);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_mock_market_data_limit() {
        let candles = MockMarketDataService::seeded_walk("BTC/USDT", 1, 200, 100.0);
        let service = MockMarketDataService::with_candles(Timeframe::FiveMin, candles);
        let fetched = service
            .fetch_ohlcv("BTC/USDT", Timeframe::FiveMin, 50)
            .await
            .unwrap();
        assert_eq!(fetched.len(), 50);
    }

    #[tokio::test]
    async fn test_mock_trading_balance_accounting() {
        let service = MockTradingService::new(dec!(10000), dec!(100));
        service
            .place_market("BTC/USDT", OrderSide::Buy, dec!(10))
            .await
            .unwrap();
        let account = service.get_account().await.unwrap();
        assert_eq!(account.cash, dec!(9000));
    }
}
