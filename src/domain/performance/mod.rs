pub mod tracker;

pub use tracker::{PerformanceTracker, TradeStats};
