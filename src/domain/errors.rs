use rust_decimal::Decimal;
use thiserror::Error;

/// Errors surfaced by the market-data port.
#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Network error: {reason}")]
    Network { reason: String },

    #[error("Unknown symbol: {symbol}")]
    BadSymbol { symbol: String },

    #[error("Bad request parameters: {reason}")]
    BadParams { reason: String },

    #[error("Exchange server error (HTTP {status}): {reason}")]
    Server { status: u16, reason: String },

    #[error("Market data call timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
}

impl MarketDataError {
    /// Rate-limit responses trigger the port-wide cooldown.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, MarketDataError::RateLimited { .. })
    }
}

/// Errors surfaced by the trading port and the simulated exchange.
#[derive(Debug, Error)]
pub enum TradingError {
    #[error("Insufficient funds: need ${need}, available ${available}")]
    InsufficientFunds { need: Decimal, available: Decimal },

    #[error("Already in position for {symbol}")]
    AlreadyInPosition { symbol: String },

    #[error("No open position for {symbol}")]
    NoPosition { symbol: String },

    #[error("Invalid order: {reason}")]
    InvalidOrder { reason: String },

    #[error("Order rejected by exchange: {reason}")]
    Rejected { reason: String },

    #[error("Rate limited by exchange")]
    RateLimited,

    #[error("Network error: {reason}")]
    Network { reason: String },
}

/// Errors raised by the bot lifecycle / control surface.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("Bot {config_id} is already running")]
    AlreadyRunning { config_id: i64 },

    #[error("Unknown bot config: {config_id}")]
    NotFound { config_id: i64 },

    #[error("Invalid bot config: {reason}")]
    InvalidConfig { reason: String },
}

/// Internal pipeline stage failures. These never escape `analyze`; the
/// pipeline converts them into a HALT recommendation with fallback levels.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Insufficient candle history: have {have}, need {need}")]
    InsufficientHistory { have: usize, need: usize },

    #[error("Analysis stage '{stage}' failed: {reason}")]
    StageFailed { stage: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_formatting() {
        let err = TradingError::InsufficientFunds {
            need: dec!(100.50),
            available: dec!(20),
        };
        let msg = err.to_string();
        assert!(msg.contains("100.50"));
        assert!(msg.contains("20"));
    }

    #[test]
    fn test_rate_limit_detection() {
        assert!(MarketDataError::RateLimited { retry_after_secs: 30 }.is_rate_limit());
        assert!(
            !MarketDataError::Network {
                reason: "reset".to_string()
            }
            .is_rate_limit()
        );
    }
}
