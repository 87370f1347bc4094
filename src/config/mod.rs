//! Configuration loading from environment variables, in three groups:
//! exchange connectivity, bot defaults and fee protection.

use crate::domain::trading::fees::FeeSettings;
use crate::domain::trading::types::{BotConfig, RiskLevel};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Settings {
    // Exchange
    pub binance_base_url: String,
    pub binance_api_key: String,
    pub binance_api_secret: String,

    // Engine
    pub database_url: String,
    pub tick_interval_secs: u64,

    // Default bot
    pub symbol: String,
    pub budget: Decimal,
    pub position_size_ratio: f64,
    pub min_confidence: f64,
    pub risk_level: RiskLevel,
    pub max_daily_loss_pct: f64,
    pub paper_trading: bool,

    // Fee protection
    pub fee_settings: FeeSettings,
}

impl Settings {
    /// Load configuration from environment variables (after `dotenvy` has
    /// populated them). Credentials have no defaults; everything else does.
    pub fn from_env() -> Result<Self> {
        let fee_settings = FeeSettings {
            maker_fee: parse_env_or("MAKER_FEE", FeeSettings::default().maker_fee)?,
            taker_fee: parse_env_or("TAKER_FEE", FeeSettings::default().taker_fee)?,
            min_profit_multiple: parse_env_or(
                "MIN_PROFIT_MULTIPLE",
                FeeSettings::default().min_profit_multiple,
            )?,
            max_trades_per_hour: parse_env_or("MAX_TRADES_PER_HOUR", 2u32)?,
            max_trades_per_day: parse_env_or("MAX_TRADES_PER_DAY", 10u32)?,
            min_hold_time_minutes: parse_env_or("MIN_HOLD_TIME_MINUTES", 30i64)?,
        };

        Ok(Self {
            binance_base_url: env::var("BINANCE_BASE_URL")
                .unwrap_or_else(|_| "https://api.binance.com".to_string()),
            binance_api_key: env::var("BINANCE_API_KEY").unwrap_or_default(),
            binance_api_secret: env::var("BINANCE_SECRET_KEY").unwrap_or_default(),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/tradepilot.db".to_string()),
            tick_interval_secs: parse_env_or("TICK_INTERVAL_SECS", 300u64)?,
            symbol: env::var("SYMBOL").unwrap_or_else(|_| "BTC/USDT".to_string()),
            budget: parse_env_or("BUDGET", Decimal::from(10_000))?,
            position_size_ratio: parse_env_or("POSITION_SIZE_RATIO", 0.95f64)?,
            min_confidence: parse_env_or("MIN_CONFIDENCE", 0.7f64)?,
            risk_level: parse_env_or("RISK_LEVEL", RiskLevel::Moderate)?,
            max_daily_loss_pct: parse_env_or("MAX_DAILY_LOSS_PCT", 5.0f64)?,
            paper_trading: parse_env_or("PAPER_TRADING", true)?,
            fee_settings,
        })
    }

    /// Bot configuration seeded from the environment defaults. The id is
    /// assigned by the registry.
    pub fn default_bot_config(&self) -> BotConfig {
        BotConfig {
            id: 0,
            user_id: 1,
            name: "Auto Bot".to_string(),
            symbol: self.symbol.clone(),
            budget: self.budget,
            position_size_ratio: self.position_size_ratio,
            min_confidence: self.min_confidence,
            risk_level: self.risk_level,
            max_daily_loss_pct: self.max_daily_loss_pct,
            paper_trading: self.paper_trading,
        }
    }
}

fn parse_env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid {}: {}", key, e))
            .with_context(|| format!("Failed to parse environment variable {}", key)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_env() {
        // Scoped to variables this test does not set
        let settings = Settings::from_env().expect("defaults should parse");
        assert_eq!(settings.tick_interval_secs, 300);
        assert!(settings.paper_trading);
        assert_eq!(settings.fee_settings.max_trades_per_day, 10);
    }

    #[test]
    fn test_default_bot_config_is_valid() {
        let settings = Settings::from_env().unwrap();
        assert!(settings.default_bot_config().validate().is_ok());
    }
}
