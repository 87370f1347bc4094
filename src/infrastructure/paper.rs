use crate::application::backtest::exchange::SimulatedExchange;
use crate::domain::errors::TradingError;
use crate::domain::ports::{MarketDataService, TradingService};
use crate::domain::trading::types::{
    AccountBalances, Order, OrderSide, OrderStatus, OrderType, TimeInForce,
};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use tracing::info;
use uuid::Uuid;

/// Paper-trading adapter: implements the trading port against the simulated
/// exchange, with fills priced from the live ticker. Lets a bot run the full
/// control loop with virtual money.
pub struct PaperTradingService {
    market: Arc<dyn MarketDataService>,
    exchange: Mutex<SimulatedExchange>,
}

impl PaperTradingService {
    pub fn new(market: Arc<dyn MarketDataService>, initial_cash: Decimal) -> Self {
        Self {
            market,
            exchange: Mutex::new(SimulatedExchange::with_defaults(initial_cash)),
        }
    }

    async fn last_price(&self, symbol: &str) -> Result<Decimal, TradingError> {
        let ticker = self
            .market
            .fetch_ticker(symbol)
            .await
            .map_err(|e| TradingError::Network { reason: e.to_string() })?;
        if ticker.last.is_zero() {
            return Err(TradingError::InvalidOrder {
                reason: format!("no last price for {}", symbol),
            });
        }
        Ok(ticker.last)
    }

    fn order_shell(symbol: &str, side: OrderSide, quantity: Decimal) -> Order {
        Order {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity,
            limit_price: None,
            status: OrderStatus::Pending,
            fill_price: None,
            fee: None,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

#[async_trait]
impl TradingService for PaperTradingService {
    async fn place_market(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<Order, TradingError> {
        let price = self.last_price(symbol).await?;
        let mut order = Self::order_shell(symbol, side, quantity);

        let mut exchange = self
            .exchange
            .lock()
            .map_err(|_| TradingError::Rejected { reason: "paper exchange poisoned".to_string() })?;

        let now = Utc::now();
        let fill = match side {
            OrderSide::Buy => exchange.execute_buy(symbol, quantity * price, price, now)?,
            OrderSide::Sell => exchange.execute_sell(symbol, price, now)?.0,
        };

        order.status = OrderStatus::Filled;
        order.fill_price = Some(fill.fill_price);
        order.fee = Some(fill.commission);
        info!(
            "PaperTrading: {} {} {} @ {} (fee {})",
            side, quantity, symbol, fill.fill_price, fill.commission
        );
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
        // Limit orders degrade to marketable fills at the current price;
        // resting orders are not simulated
        self.place_market(symbol, side, quantity).await
    }

    async fn get_account(&self) -> Result<AccountBalances, TradingError> {
        let exchange = self
            .exchange
            .lock()
            .map_err(|_| TradingError::Rejected { reason: "paper exchange poisoned".to_string() })?;

        let mut balances = AccountBalances {
            cash: exchange.cash(),
            ..Default::default()
        };
        if let Some(position) = exchange.position() {
            balances.assets.insert("PAPER".to_string(), position.quantity);
        }
        Ok(balances)
    }

    async fn get_open_orders(&self, _symbol: Option<&str>) -> Result<Vec<Order>, TradingError> {
        // Market-only fills: nothing ever rests
        Ok(Vec::new())
    }

    async fn get_order(&self, symbol: &str, order_id: &str) -> Result<Order, TradingError> {
        Err(TradingError::InvalidOrder {
            reason: format!("paper order {} for {} is not retained", order_id, symbol),
        })
    }

    async fn cancel_order(&self, _symbol: &str, _order_id: &str) -> Result<(), TradingError> {
        Ok(())
    }
}
