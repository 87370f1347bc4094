//! Binance Market Data Service
//!
//! REST adapter for the market-data port:
//! - Klines, ticker and order-book depth
//! - Short-TTL response cache keyed by (call, args)
//! - Shared cooldown clock after rate-limit responses

use crate::domain::errors::MarketDataError;
use crate::domain::market::Timeframe;
use crate::domain::ports::MarketDataService;
use crate::domain::trading::types::{BookLevel, Candle, OrderBook, Ticker, denormalize_crypto_symbol};
use crate::infrastructure::core::http_client_factory::{HttpClientFactory, build_url_with_query};
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const COOLDOWN: Duration = Duration::from_secs(30);
const TICKER_TTL: Duration = Duration::from_secs(5);
const ORDER_BOOK_TTL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Ticker(String),
    OrderBook(String),
    Ohlcv(String, Timeframe, usize),
}

#[derive(Debug, Clone)]
enum CachedPayload {
    Ticker(Ticker),
    OrderBook(OrderBook),
    Ohlcv(Vec<Candle>),
}

struct CacheSlot {
    fetched_at: Instant,
    ttl: Duration,
    payload: CachedPayload,
}

pub struct BinanceMarketDataService {
    client: ClientWithMiddleware,
    base_url: String,
    cache: RwLock<HashMap<CacheKey, CacheSlot>>,
    /// Shared across all callers of this port instance; set on any
    /// rate-limit response.
    cooldown_until: Mutex<Option<Instant>>,
}

impl BinanceMarketDataService {
    pub fn new(base_url: String) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            base_url,
            cache: RwLock::new(HashMap::new()),
            cooldown_until: Mutex::new(None),
        }
    }

    /// Connectivity probe against the exchange clock.
    pub async fn server_time(&self) -> Result<i64, MarketDataError> {
        let url = format!("{}/api/v3/time", self.base_url);
        let response = self.client.get(&url).send().await.map_err(net_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(MarketDataError::Server {
                status: status.as_u16(),
                reason: response.text().await.unwrap_or_default(),
            });
        }

        #[derive(Deserialize)]
        struct ServerTime {
            #[serde(rename = "serverTime")]
            server_time: i64,
        }
        let time: ServerTime = response.json().await.map_err(|e| MarketDataError::Network {
            reason: e.to_string(),
        })?;
        Ok(time.server_time)
    }

    fn cached(&self, key: &CacheKey, ignore_ttl: bool) -> Option<CachedPayload> {
        let cache = self.cache.read().ok()?;
        let slot = cache.get(key)?;
        if ignore_ttl || slot.fetched_at.elapsed() < slot.ttl {
            Some(slot.payload.clone())
        } else {
            None
        }
    }

    fn store(&self, key: CacheKey, ttl: Duration, payload: CachedPayload) {
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(key, CacheSlot { fetched_at: Instant::now(), ttl, payload });
        }
    }

    fn in_cooldown(&self) -> bool {
        self.cooldown_until
            .lock()
            .ok()
            .and_then(|guard| *guard)
            .map(|until| Instant::now() < until)
            .unwrap_or(false)
    }

    fn enter_cooldown(&self) {
        if let Ok(mut guard) = self.cooldown_until.lock() {
            *guard = Some(Instant::now() + COOLDOWN);
        }
        warn!("BinanceMarketData: rate limited, cooling down for {:?}", COOLDOWN);
    }

    fn remaining_cooldown_secs(&self) -> u64 {
        self.cooldown_until
            .lock()
            .ok()
            .and_then(|guard| *guard)
            .map(|until| until.saturating_duration_since(Instant::now()).as_secs().max(1))
            .unwrap_or(COOLDOWN.as_secs())
    }

    /// Cache-through fetch honouring the cooldown: during cooldown the most
    /// recent cached value (fresh or stale) is served; with no cache the
    /// call fails as rate-limited.
    async fn fetch_with_cache<F>(
        &self,
        key: CacheKey,
        ttl: Duration,
        fetch: F,
    ) -> Result<CachedPayload, MarketDataError>
    where
        F: std::future::Future<Output = Result<CachedPayload, MarketDataError>>,
    {
        if let Some(hit) = self.cached(&key, false) {
            return Ok(hit);
        }

        if self.in_cooldown() {
            if let Some(stale) = self.cached(&key, true) {
                debug!("BinanceMarketData: serving stale cache during cooldown");
                return Ok(stale);
            }
            return Err(MarketDataError::RateLimited {
                retry_after_secs: self.remaining_cooldown_secs(),
            });
        }

        match fetch.await {
            Ok(payload) => {
                self.store(key, ttl, payload.clone());
                Ok(payload)
            }
            Err(e) if e.is_rate_limit() => {
                self.enter_cooldown();
                if let Some(stale) = self.cached(&key, true) {
                    return Ok(stale);
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_ticker_raw(&self, api_symbol: &str) -> Result<CachedPayload, MarketDataError> {
        let url = build_url_with_query(
            &format!("{}/api/v3/ticker/24hr", self.base_url),
            &[("symbol", api_symbol)],
        );
        let response = self.client.get(&url).send().await.map_err(net_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status.as_u16(), response.text().await.unwrap_or_default(), api_symbol));
        }

        #[derive(Debug, Deserialize)]
        struct Ticker24hr {
            symbol: String,
            #[serde(rename = "lastPrice")]
            last_price: String,
            #[serde(rename = "bidPrice")]
            bid_price: String,
            #[serde(rename = "askPrice")]
            ask_price: String,
            #[serde(rename = "highPrice")]
            high_price: String,
            #[serde(rename = "lowPrice")]
            low_price: String,
            #[serde(rename = "quoteVolume")]
            quote_volume: String,
        }

        let raw: Ticker24hr = response.json().await.map_err(|e| MarketDataError::Network {
            reason: e.to_string(),
        })?;

        Ok(CachedPayload::Ticker(Ticker {
            symbol: raw.symbol,
            last: parse_decimal(&raw.last_price),
            bid: parse_decimal(&raw.bid_price),
            ask: parse_decimal(&raw.ask_price),
            high_24h: parse_decimal(&raw.high_price),
            low_24h: parse_decimal(&raw.low_price),
            volume_24h: parse_decimal(&raw.quote_volume),
        }))
    }

    async fn fetch_ohlcv_raw(
        &self,
        symbol: &str,
        api_symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<CachedPayload, MarketDataError> {
        let limit_str = limit.to_string();
        let url = build_url_with_query(
            &format!("{}/api/v3/klines", self.base_url),
            &[
                ("symbol", api_symbol),
                ("interval", timeframe.to_binance_string()),
                ("limit", limit_str.as_str()),
            ],
        );

        let response = self.client.get(&url).send().await.map_err(net_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status.as_u16(), response.text().await.unwrap_or_default(), api_symbol));
        }

        // Kline format: [open_time, open, high, low, close, volume, ...]
        let klines: Vec<serde_json::Value> =
            response.json().await.map_err(|e| MarketDataError::Network { reason: e.to_string() })?;

        let candles: Vec<Candle> = klines
            .into_iter()
            .filter_map(|k| {
                let arr = k.as_array()?;
                if arr.len() < 6 {
                    return None;
                }
                Some(Candle {
                    symbol: symbol.to_string(),
                    timestamp: arr[0].as_i64()?,
                    open: parse_decimal(arr[1].as_str()?),
                    high: parse_decimal(arr[2].as_str()?),
                    low: parse_decimal(arr[3].as_str()?),
                    close: parse_decimal(arr[4].as_str()?),
                    volume: parse_decimal(arr[5].as_str()?),
                })
            })
            .collect();

        info!(
            "BinanceMarketData: fetched {} {} bars for {}",
            candles.len(),
            timeframe,
            symbol
        );
        Ok(CachedPayload::Ohlcv(candles))
    }

    async fn fetch_order_book_raw(
        &self,
        api_symbol: &str,
        depth: usize,
    ) -> Result<CachedPayload, MarketDataError> {
        let depth_str = depth.to_string();
        let url = build_url_with_query(
            &format!("{}/api/v3/depth", self.base_url),
            &[("symbol", api_symbol), ("limit", depth_str.as_str())],
        );

        let response = self.client.get(&url).send().await.map_err(net_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status.as_u16(), response.text().await.unwrap_or_default(), api_symbol));
        }

        #[derive(Debug, Deserialize)]
        struct Depth {
            bids: Vec<(String, String)>,
            asks: Vec<(String, String)>,
        }

        let raw: Depth = response.json().await.map_err(|e| MarketDataError::Network {
            reason: e.to_string(),
        })?;

        let to_levels = |levels: Vec<(String, String)>| {
            levels
                .into_iter()
                .map(|(price, quantity)| BookLevel {
                    price: parse_decimal(&price),
                    quantity: parse_decimal(&quantity),
                })
                .collect()
        };

        Ok(CachedPayload::OrderBook(OrderBook {
            bids: to_levels(raw.bids),
            asks: to_levels(raw.asks),
        }))
    }
}

#[async_trait]
impl MarketDataService for BinanceMarketDataService {
    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, MarketDataError> {
        let api_symbol = denormalize_crypto_symbol(symbol);
        let key = CacheKey::Ticker(api_symbol.clone());
        let payload = self
            .fetch_with_cache(key, TICKER_TTL, self.fetch_ticker_raw(&api_symbol))
            .await?;
        match payload {
            CachedPayload::Ticker(t) => Ok(t),
            _ => Err(MarketDataError::Network { reason: "cache payload mismatch".to_string() }),
        }
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, MarketDataError> {
        let api_symbol = denormalize_crypto_symbol(symbol);
        let key = CacheKey::Ohlcv(api_symbol.clone(), timeframe, limit);
        let payload = self
            .fetch_with_cache(
                key,
                timeframe.cache_ttl(),
                self.fetch_ohlcv_raw(symbol, &api_symbol, timeframe, limit),
            )
            .await?;
        match payload {
            CachedPayload::Ohlcv(candles) => Ok(candles),
            _ => Err(MarketDataError::Network { reason: "cache payload mismatch".to_string() }),
        }
    }

    async fn fetch_order_book(
        &self,
        symbol: &str,
        depth: Option<usize>,
    ) -> Result<OrderBook, MarketDataError> {
        let api_symbol = denormalize_crypto_symbol(symbol);
        let depth = depth.unwrap_or(20);
        let key = CacheKey::OrderBook(api_symbol.clone());
        let payload = self
            .fetch_with_cache(key, ORDER_BOOK_TTL, self.fetch_order_book_raw(&api_symbol, depth))
            .await?;
        match payload {
            CachedPayload::OrderBook(book) => Ok(book),
            _ => Err(MarketDataError::Network { reason: "cache payload mismatch".to_string() }),
        }
    }
}

fn parse_decimal(s: &str) -> Decimal {
    Decimal::from_str_exact(s).unwrap_or(Decimal::ZERO)
}

fn net_err(e: reqwest_middleware::Error) -> MarketDataError {
    MarketDataError::Network { reason: e.to_string() }
}

/// HTTP status classification. 429 (rate limit) and 418 (the exchange's
/// auto-ban teapot) both trigger the cooldown.
fn classify_status(status: u16, body: String, symbol: &str) -> MarketDataError {
    match status {
        429 | 418 => MarketDataError::RateLimited { retry_after_secs: COOLDOWN.as_secs() },
        400 if body.contains("-1121") => MarketDataError::BadSymbol { symbol: symbol.to_string() },
        400..=499 => MarketDataError::BadParams { reason: body },
        _ => MarketDataError::Server { status, reason: body },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(429, String::new(), "BTCUSDT"),
            MarketDataError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_status(418, String::new(), "BTCUSDT"),
            MarketDataError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_status(400, "{\"code\":-1121,\"msg\":\"Invalid symbol.\"}".to_string(), "NOPEUSDT"),
            MarketDataError::BadSymbol { .. }
        ));
        assert!(matches!(
            classify_status(400, "bad limit".to_string(), "BTCUSDT"),
            MarketDataError::BadParams { .. }
        ));
        assert!(matches!(
            classify_status(503, String::new(), "BTCUSDT"),
            MarketDataError::Server { status: 503, .. }
        ));
    }

    #[test]
    fn test_cooldown_clock() {
        let service = BinanceMarketDataService::new("http://localhost".to_string());
        assert!(!service.in_cooldown());
        service.enter_cooldown();
        assert!(service.in_cooldown());
        assert!(service.remaining_cooldown_secs() >= 1);
    }

    #[test]
    fn test_cache_serves_fresh_and_stale() {
        let service = BinanceMarketDataService::new("http://localhost".to_string());
        let key = CacheKey::Ticker("BTCUSDT".to_string());
        let ticker = Ticker {
            symbol: "BTCUSDT".to_string(),
            last: Decimal::from(50_000),
            bid: Decimal::from(49_999),
            ask: Decimal::from(50_001),
            high_24h: Decimal::ZERO,
            low_24h: Decimal::ZERO,
            volume_24h: Decimal::ZERO,
        };
        service.store(key.clone(), Duration::from_secs(0), CachedPayload::Ticker(ticker));

        // Zero TTL: a fresh read misses, a stale (cooldown) read hits
        assert!(service.cached(&key, false).is_none());
        assert!(service.cached(&key, true).is_some());
    }
}
