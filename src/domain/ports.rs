use crate::domain::errors::{MarketDataError, TradingError};
use crate::domain::market::Timeframe;
use crate::domain::trading::types::{
    AccountBalances, Candle, Order, OrderBook, OrderSide, Ticker, TimeInForce,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// Need async_trait for async functions in traits
#[async_trait]
pub trait MarketDataService: Send + Sync {
    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, MarketDataError>;

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, MarketDataError>;

    async fn fetch_order_book(
        &self,
        symbol: &str,
        depth: Option<usize>,
    ) -> Result<OrderBook, MarketDataError>;
}

#[async_trait]
pub trait TradingService: Send + Sync {
    async fn place_market(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<Order, TradingError>;

    async fn place_limit(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        time_in_force: TimeInForce,
    ) -> Result<Order, TradingError>;

    async fn get_account(&self) -> Result<AccountBalances, TradingError>;

    async fn get_open_orders(&self, symbol: Option<&str>) -> Result<Vec<Order>, TradingError>;

    async fn get_order(&self, symbol: &str, order_id: &str) -> Result<Order, TradingError>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), TradingError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Open,
    Completed,
    Failed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "open",
            TradeStatus::Completed => "completed",
            TradeStatus::Failed => "failed",
        }
    }
}

/// Row shape of the persistent trade store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRow {
    pub id: i64,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub filled_price: Option<Decimal>,
    pub status: TradeStatus,
    pub timestamp: DateTime<Utc>,
}

/// Narrow contract over the trade store. Each bot owns its own handle; no
/// cross-bot sharing.
#[async_trait]
pub trait TradeRepository: Send + Sync {
    async fn insert(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        filled_price: Option<Decimal>,
        status: TradeStatus,
        timestamp: DateTime<Utc>,
    ) -> Result<i64>;

    async fn update_status(
        &self,
        id: i64,
        status: TradeStatus,
        filled_price: Option<Decimal>,
    ) -> Result<()>;

    async fn find_open(&self, symbol: &str) -> Result<Option<TradeRow>>;

    async fn recent(&self, limit: i64) -> Result<Vec<TradeRow>>;
}

/// Fire-and-forget sink; delivery failures are swallowed by implementations.
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn notify(&self, message: &str);
}
