use crate::domain::market::regime::Regime;
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
        }
    }
}

/// Order lifecycle. Terminal states (everything except `Pending`) are never
/// mutated after the transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
    Rejected,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::Gtc => "GTC",
            TimeInForce::Ioc => "IOC",
            TimeInForce::Fok => "FOK",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub symbol: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    /// Milliseconds since epoch.
    pub timestamp: i64,
}

impl Candle {
    pub fn open_f64(&self) -> f64 {
        self.open.to_f64().unwrap_or(0.0)
    }

    pub fn high_f64(&self) -> f64 {
        self.high.to_f64().unwrap_or(0.0)
    }

    pub fn low_f64(&self) -> f64 {
        self.low.to_f64().unwrap_or(0.0)
    }

    pub fn close_f64(&self) -> f64 {
        self.close.to_f64().unwrap_or(0.0)
    }

    pub fn volume_f64(&self) -> f64 {
        self.volume.to_f64().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub high_24h: Decimal,
    pub low_24h: Decimal,
    pub volume_24h: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Order book snapshot. Bids are ordered descending by price, asks ascending.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    pub fn mid(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() || self.asks.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub status: OrderStatus,
    pub fill_price: Option<Decimal>,
    pub fee: Option<Decimal>,
    /// Milliseconds since epoch.
    pub timestamp: i64,
}

/// At most one open position exists per (user, symbol). Only `extreme_price`
/// is updated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: OrderSide,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub entry_time: DateTime<Utc>,
    pub extreme_price: Decimal,
}

impl Position {
    pub fn open(symbol: String, entry_price: Decimal, quantity: Decimal, entry_time: DateTime<Utc>) -> Self {
        Self {
            symbol,
            side: OrderSide::Buy,
            entry_price,
            quantity,
            entry_time,
            extreme_price: entry_price,
        }
    }

    /// Track the most favourable price seen since entry (max for BUY).
    pub fn update_extreme(&mut self, price: Decimal) {
        match self.side {
            OrderSide::Buy => {
                if price > self.extreme_price {
                    self.extreme_price = price;
                }
            }
            OrderSide::Sell => {
                if price < self.extreme_price {
                    self.extreme_price = price;
                }
            }
        }
    }

    pub fn notional(&self) -> Decimal {
        self.entry_price * self.quantity
    }

    pub fn pnl_pct(&self, current_price: Decimal) -> f64 {
        if self.entry_price.is_zero() {
            return 0.0;
        }
        ((current_price - self.entry_price) / self.entry_price * Decimal::ONE_HUNDRED)
            .to_f64()
            .unwrap_or(0.0)
    }
}

/// A completed round-trip, recorded only on full closure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: Decimal,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub gross_pnl: Decimal,
    pub fees: Decimal,
    pub net_pnl: Decimal,
    pub pnl_pct: f64,
    pub hold_minutes: f64,
    pub confidence_at_entry: f64,
    pub regime_at_entry: Regime,
}

#[derive(Debug, Clone, Default)]
pub struct AccountBalances {
    pub cash: Decimal,
    pub assets: std::collections::HashMap<String, Decimal>,
}

impl AccountBalances {
    pub fn asset(&self, symbol: &str) -> Decimal {
        // "BTC/USDT" holds its base asset under "BTC"
        let base = symbol.split('/').next().unwrap_or(symbol);
        self.assets.get(base).copied().unwrap_or(Decimal::ZERO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Conservative,
    Moderate,
    Aggressive,
}

impl FromStr for RiskLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "conservative" => Ok(RiskLevel::Conservative),
            "moderate" => Ok(RiskLevel::Moderate),
            "aggressive" => Ok(RiskLevel::Aggressive),
            _ => Err(anyhow!(
                "Invalid risk level: '{}'. Must be 'conservative', 'moderate' or 'aggressive'",
                s
            )),
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Conservative => write!(f, "conservative"),
            RiskLevel::Moderate => write!(f, "moderate"),
            RiskLevel::Aggressive => write!(f, "aggressive"),
        }
    }
}

/// Per-bot configuration. Immutable for the duration of a run; changing a
/// field requires stopping and restarting the control loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub symbol: String,
    pub budget: Decimal,
    pub position_size_ratio: f64,
    pub min_confidence: f64,
    pub risk_level: RiskLevel,
    pub max_daily_loss_pct: f64,
    pub paper_trading: bool,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            id: 0,
            user_id: 1,
            name: "Auto Bot".to_string(),
            symbol: "BTC/USDT".to_string(),
            budget: Decimal::from(10_000),
            position_size_ratio: 0.95,
            min_confidence: 0.7,
            risk_level: RiskLevel::Moderate,
            max_daily_loss_pct: 5.0,
            paper_trading: true,
        }
    }
}

impl BotConfig {
    pub fn validate(&self) -> Result<()> {
        if self.budget <= Decimal::ZERO {
            return Err(anyhow!("budget must be positive"));
        }
        if !(0.0..=1.0).contains(&self.position_size_ratio) || self.position_size_ratio == 0.0 {
            return Err(anyhow!("position_size_ratio must be in (0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(anyhow!("min_confidence must be in [0, 1]"));
        }
        Ok(())
    }
}

/// Converts an exchange symbol (BTCUSDT) to the normalized internal form
/// (BTC/USDT). Only USDT quote pairs are supported.
pub fn normalize_crypto_symbol(api_symbol: &str) -> Result<String> {
    if api_symbol.contains('/') {
        return Ok(api_symbol.to_string());
    }
    if let Some(base) = api_symbol.strip_suffix("USDT") {
        if base.is_empty() {
            return Err(anyhow!("Cannot normalize symbol: {}", api_symbol));
        }
        return Ok(format!("{}/USDT", base));
    }
    Err(anyhow!("Unsupported quote asset in symbol: {}", api_symbol))
}

/// Converts a normalized symbol (BTC/USDT) to the exchange form (BTCUSDT).
pub fn denormalize_crypto_symbol(symbol: &str) -> String {
    symbol.replace('/', "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_symbol_normalization_roundtrip() {
        assert_eq!(normalize_crypto_symbol("BTCUSDT").unwrap(), "BTC/USDT");
        assert_eq!(normalize_crypto_symbol("BTC/USDT").unwrap(), "BTC/USDT");
        assert_eq!(denormalize_crypto_symbol("BTC/USDT"), "BTCUSDT");
        assert!(normalize_crypto_symbol("USDT").is_err());
        assert!(normalize_crypto_symbol("BTCEUR").is_err());
    }

    #[test]
    fn test_order_book_top_of_book() {
        let book = OrderBook {
            bids: vec![BookLevel { price: dec!(99), quantity: dec!(1) }],
            asks: vec![BookLevel { price: dec!(101), quantity: dec!(2) }],
        };
        assert_eq!(book.mid(), Some(dec!(100)));
        assert_eq!(book.spread(), Some(dec!(2)));
    }

    #[test]
    fn test_position_extreme_is_monotone_for_buy() {
        let mut pos = Position::open("BTC/USDT".to_string(), dec!(100), dec!(1), Utc::now());
        pos.update_extreme(dec!(110));
        assert_eq!(pos.extreme_price, dec!(110));
        pos.update_extreme(dec!(105));
        assert_eq!(pos.extreme_price, dec!(110));
    }

    #[test]
    fn test_position_pnl_pct() {
        let pos = Position::open("BTC/USDT".to_string(), dec!(50000), dec!(0.19), Utc::now());
        assert!((pos.pnl_pct(dec!(52000)) - 4.0).abs() < 1e-9);
        assert!((pos.pnl_pct(dec!(48000)) + 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_bot_config_validation() {
        let config = BotConfig {
            id: 1,
            user_id: 1,
            name: "Auto Bot".to_string(),
            symbol: "BTC/USDT".to_string(),
            budget: dec!(10000),
            position_size_ratio: 0.95,
            min_confidence: 0.7,
            risk_level: RiskLevel::Moderate,
            max_daily_loss_pct: 5.0,
            paper_trading: true,
        };
        assert!(config.validate().is_ok());

        let mut bad = config.clone();
        bad.position_size_ratio = 1.5;
        assert!(bad.validate().is_err());
    }
}
