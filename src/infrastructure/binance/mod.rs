pub mod execution;
pub mod market_data;

pub use execution::{BinanceExecutionService, Credentials};
pub use market_data::BinanceMarketDataService;
