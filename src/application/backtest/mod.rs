pub mod engine;
pub mod exchange;
pub mod portfolio;

pub use engine::{BacktestConfig, BacktestEngine, BacktestReport};
pub use exchange::SimulatedExchange;
pub use portfolio::{BacktestMetrics, EquityPoint};
