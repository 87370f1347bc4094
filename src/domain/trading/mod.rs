pub mod fees;
pub mod types;

pub use fees::FeeSettings;
pub use types::{
    AccountBalances, BookLevel, BotConfig, Candle, Order, OrderBook, OrderSide, OrderStatus,
    OrderType, Position, RiskLevel, Ticker, TimeInForce, TradeRecord, denormalize_crypto_symbol,
    normalize_crypto_symbol,
};
