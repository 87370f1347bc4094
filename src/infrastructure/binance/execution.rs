//! Binance Execution Service
//!
//! Signed REST adapter for the trading port:
//! - Market and limit orders
//! - Account balances and open-order management
//! - HMAC-SHA256 request signing with per-user credentials

use crate::domain::errors::TradingError;
use crate::domain::ports::TradingService;
use crate::domain::trading::types::{
    AccountBalances, Order, OrderSide, OrderStatus, OrderType, TimeInForce,
    denormalize_crypto_symbol,
};
use crate::infrastructure::core::http_client_factory::HttpClientFactory;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{info, warn};
use uuid::Uuid;

const RECV_WINDOW_MS: u64 = 5000;

/// Per-user API credentials. Loaded from the user record by the caller and
/// passed into the constructor; this service never reads process-global
/// secrets.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

pub struct BinanceExecutionService {
    client: ClientWithMiddleware,
    credentials: Credentials,
    base_url: String,
}

impl BinanceExecutionService {
    pub fn new(credentials: Credentials, base_url: String) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            credentials,
            base_url,
        }
    }

    /// HMAC-SHA256 signature over the canonical query string.
    fn sign_request(&self, query_string: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;

        let mut mac = HmacSha256::new_from_slice(self.credentials.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn signed_query(&self, mut params: Vec<(&'static str, String)>) -> String {
        params.push(("recvWindow", RECV_WINDOW_MS.to_string()));
        params.push(("timestamp", chrono::Utc::now().timestamp_millis().to_string()));

        let query_string: String = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        let signature = self.sign_request(&query_string);
        format!("{}&signature={}", query_string, signature)
    }

    async fn submit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        quantity: Decimal,
        price: Option<Decimal>,
        time_in_force: Option<TimeInForce>,
    ) -> Result<Order, TradingError> {
        let api_symbol = denormalize_crypto_symbol(symbol);
        let client_order_id = Uuid::new_v4().to_string();

        let mut params = vec![
            ("symbol", api_symbol.clone()),
            ("side", side.to_string()),
            ("type", order_type.to_string()),
            ("quantity", quantity.to_string()),
            ("newClientOrderId", client_order_id.clone()),
        ];
        if let (OrderType::Limit, Some(price)) = (order_type, price) {
            params.push(("price", price.to_string()));
            params.push((
                "timeInForce",
                time_in_force.unwrap_or(TimeInForce::Gtc).as_str().to_string(),
            ));
        }

        let url = format!("{}/api/v3/order?{}", self.base_url, self.signed_query(params));

        let response = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", &self.credentials.api_key)
            .send()
            .await
            .map_err(|e| TradingError::Network { reason: e.to_string() })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TradingError::Network { reason: e.to_string() })?;

        if !status.is_success() {
            warn!("BinanceExecution: order rejected ({}): {}", status, body);
            return Err(classify_order_error(status.as_u16(), body));
        }

        let raw: OrderResponse = serde_json::from_str(&body)
            .map_err(|e| TradingError::Rejected { reason: format!("unparseable response: {e}") })?;

        info!(
            "BinanceExecution: {} {} {} filled={:?}",
            side, quantity, symbol, raw.status
        );
        Ok(raw.into_order(symbol, side, order_type, quantity, client_order_id))
    }
}

#[derive(Debug, Deserialize)]
struct OrderFill {
    price: String,
    qty: String,
    commission: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(rename = "orderId")]
    order_id: Option<i64>,
    status: Option<String>,
    #[serde(rename = "transactTime")]
    transact_time: Option<i64>,
    price: Option<String>,
    #[serde(default)]
    fills: Vec<OrderFill>,
}

impl OrderResponse {
    fn into_order(
        self,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        quantity: Decimal,
        client_order_id: String,
    ) -> Order {
        let status = match self.status.as_deref() {
            Some("FILLED") | Some("PARTIALLY_FILLED") => OrderStatus::Filled,
            Some("CANCELED") | Some("CANCELLED") | Some("EXPIRED") => OrderStatus::Cancelled,
            Some("REJECTED") => OrderStatus::Rejected,
            _ => OrderStatus::Pending,
        };

        // Volume-weighted average over the fill legs
        let (fill_price, fee) = if self.fills.is_empty() {
            (None, None)
        } else {
            let mut notional = Decimal::ZERO;
            let mut qty = Decimal::ZERO;
            let mut fee = Decimal::ZERO;
            for fill in &self.fills {
                let p = fill.price.parse::<Decimal>().unwrap_or(Decimal::ZERO);
                let q = fill.qty.parse::<Decimal>().unwrap_or(Decimal::ZERO);
                notional += p * q;
                qty += q;
                fee += fill.commission.parse::<Decimal>().unwrap_or(Decimal::ZERO);
            }
            let avg = if qty.is_zero() { None } else { Some(notional / qty) };
            (avg, Some(fee))
        };

        Order {
            id: self
                .order_id
                .map(|id| id.to_string())
                .unwrap_or(client_order_id),
            symbol: symbol.to_string(),
            side,
            order_type,
            quantity,
            limit_price: self.price.and_then(|p| p.parse().ok()),
            status,
            fill_price,
            fee,
            timestamp: self.transact_time.unwrap_or_default(),
        }
    }
}

#[async_trait]
impl TradingService for BinanceExecutionService {
    async fn place_market(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<Order, TradingError> {
        self.submit_order(symbol, side, OrderType::Market, quantity, None, None)
            .await
    }

    async fn place_limit(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        time_in_force: TimeInForce,
    ) -> Result<Order, TradingError> {
        self.submit_order(
            symbol,
            side,
            OrderType::Limit,
            quantity,
            Some(price),
            Some(time_in_force),
        )
        .await
    }

    async fn get_account(&self) -> Result<AccountBalances, TradingError> {
        let url = format!(
            "{}/api/v3/account?{}",
            self.base_url,
            self.signed_query(Vec::new())
        );

        let response = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", &self.credentials.api_key)
            .send()
            .await
            .map_err(|e| TradingError::Network { reason: e.to_string() })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_order_error(status.as_u16(), body));
        }

        #[derive(Debug, Deserialize)]
        struct Balance {
            asset: String,
            free: String,
            locked: String,
        }

        #[derive(Debug, Deserialize)]
        struct Account {
            balances: Vec<Balance>,
        }

        let account: Account = response
            .json()
            .await
            .map_err(|e| TradingError::Network { reason: e.to_string() })?;

        let mut balances = AccountBalances::default();
        for b in account.balances {
            let free = b.free.parse::<Decimal>().unwrap_or(Decimal::ZERO);
            let locked = b.locked.parse::<Decimal>().unwrap_or(Decimal::ZERO);
            let total = free + locked;
            if total.is_zero() {
                continue;
            }
            if b.asset == "USDT" || b.asset == "USD" {
                balances.cash += total;
            } else {
                balances.assets.insert(b.asset, total);
            }
        }
        Ok(balances)
    }

    async fn get_open_orders(&self, symbol: Option<&str>) -> Result<Vec<Order>, TradingError> {
        let mut params = Vec::new();
        let api_symbol = symbol.map(denormalize_crypto_symbol);
        if let Some(ref s) = api_symbol {
            params.push(("symbol", s.clone()));
        }

        let url = format!(
            "{}/api/v3/openOrders?{}",
            self.base_url,
            self.signed_query(params)
        );

        let response = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", &self.credentials.api_key)
            .send()
            .await
            .map_err(|e| TradingError::Network { reason: e.to_string() })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_order_error(status.as_u16(), body));
        }

        let raw: Vec<OpenOrder> = response
            .json()
            .await
            .map_err(|e| TradingError::Network { reason: e.to_string() })?;

        Ok(raw.into_iter().map(OpenOrder::into_order).collect())
    }

    async fn get_order(&self, symbol: &str, order_id: &str) -> Result<Order, TradingError> {
        let api_symbol = denormalize_crypto_symbol(symbol);
        let params = vec![
            ("symbol", api_symbol),
            ("orderId", order_id.to_string()),
        ];
        let url = format!("{}/api/v3/order?{}", self.base_url, self.signed_query(params));

        let response = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", &self.credentials.api_key)
            .send()
            .await
            .map_err(|e| TradingError::Network { reason: e.to_string() })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_order_error(status.as_u16(), body));
        }

        let raw: OpenOrder = response
            .json()
            .await
            .map_err(|e| TradingError::Network { reason: e.to_string() })?;
        Ok(raw.into_order())
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), TradingError> {
        let api_symbol = denormalize_crypto_symbol(symbol);
        let params = vec![
            ("symbol", api_symbol),
            ("orderId", order_id.to_string()),
        ];
        let url = format!("{}/api/v3/order?{}", self.base_url, self.signed_query(params));

        let response = self
            .client
            .delete(&url)
            .header("X-MBX-APIKEY", &self.credentials.api_key)
            .send()
            .await
            .map_err(|e| TradingError::Network { reason: e.to_string() })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_order_error(status.as_u16(), body));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct OpenOrder {
    #[serde(rename = "orderId")]
    order_id: i64,
    symbol: String,
    side: String,
    #[serde(rename = "type")]
    order_type: String,
    #[serde(rename = "origQty")]
    orig_qty: String,
    price: Option<String>,
    status: String,
    time: Option<i64>,
}

impl OpenOrder {
    fn into_order(self) -> Order {
        Order {
            id: self.order_id.to_string(),
            symbol: self.symbol,
            side: if self.side == "SELL" { OrderSide::Sell } else { OrderSide::Buy },
            order_type: if self.order_type == "LIMIT" { OrderType::Limit } else { OrderType::Market },
            quantity: self.orig_qty.parse().unwrap_or(Decimal::ZERO),
            limit_price: self.price.and_then(|p| p.parse().ok()),
            status: match self.status.as_str() {
                "FILLED" => OrderStatus::Filled,
                "CANCELED" | "CANCELLED" | "EXPIRED" => OrderStatus::Cancelled,
                "REJECTED" => OrderStatus::Rejected,
                _ => OrderStatus::Pending,
            },
            fill_price: None,
            fee: None,
            timestamp: self.time.unwrap_or_default(),
        }
    }
}

/// Maps exchange error responses onto the trading error taxonomy.
fn classify_order_error(status: u16, body: String) -> TradingError {
    if status == 429 || status == 418 {
        return TradingError::RateLimited;
    }
    if body.contains("-2010") || body.to_lowercase().contains("insufficient") {
        return TradingError::InsufficientFunds {
            need: Decimal::ZERO,
            available: Decimal::ZERO,
        };
    }
    if status >= 500 {
        return TradingError::Network { reason: format!("HTTP {}: {}", status, body) };
    }
    TradingError::Rejected { reason: body }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> BinanceExecutionService {
        BinanceExecutionService::new(
            Credentials {
                api_key: "test-key".to_string(),
                api_secret: "test-secret".to_string(),
            },
            "http://localhost".to_string(),
        )
    }

    #[test]
    fn test_signature_is_deterministic_hex() {
        let svc = service();
        let sig1 = svc.sign_request("symbol=BTCUSDT&side=BUY");
        let sig2 = svc.sign_request("symbol=BTCUSDT&side=BUY");
        assert_eq!(sig1, sig2);
        assert_eq!(sig1.len(), 64);
        assert!(sig1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_signed_query_carries_timestamp_and_recv_window() {
        let svc = service();
        let query = svc.signed_query(vec![("symbol", "BTCUSDT".to_string())]);
        assert!(query.contains("symbol=BTCUSDT"));
        assert!(query.contains("recvWindow=5000"));
        assert!(query.contains("timestamp="));
        assert!(query.contains("&signature="));
    }

    #[test]
    fn test_order_error_classification() {
        assert!(matches!(classify_order_error(429, String::new()), TradingError::RateLimited));
        assert!(matches!(
            classify_order_error(400, "{\"code\":-2010,\"msg\":\"Account has insufficient balance\"}".to_string()),
            TradingError::InsufficientFunds { .. }
        ));
        assert!(matches!(
            classify_order_error(400, "bad qty".to_string()),
            TradingError::Rejected { .. }
        ));
    }

    #[test]
    fn test_fill_aggregation_volume_weighted() {
        let response = OrderResponse {
            order_id: Some(42),
            status: Some("FILLED".to_string()),
            transact_time: Some(1_700_000_000_000),
            price: None,
            fills: vec![
                OrderFill { price: "100".to_string(), qty: "1".to_string(), commission: "0.1".to_string() },
                OrderFill { price: "102".to_string(), qty: "1".to_string(), commission: "0.1".to_string() },
            ],
        };
        let order = response.into_order("BTC/USDT", OrderSide::Buy, OrderType::Market, Decimal::TWO, "cid".to_string());
        assert_eq!(order.id, "42");
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.fill_price, Some(Decimal::from(101)));
        assert_eq!(order.fee, Some(Decimal::from_str_exact("0.2").unwrap()));
    }
}
