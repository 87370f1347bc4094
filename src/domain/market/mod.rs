pub mod regime;
pub mod timeframe;

pub use regime::Regime;
pub use timeframe::Timeframe;
