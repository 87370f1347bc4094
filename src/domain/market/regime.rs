use serde::{Deserialize, Serialize};
use std::fmt;

/// Categorical market state driving the pipeline's final action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    TrendingUp,
    TrendingDown,
    Sideways,
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Regime::TrendingUp => write!(f, "TRENDING_UP"),
            Regime::TrendingDown => write!(f, "TRENDING_DOWN"),
            Regime::Sideways => write!(f, "SIDEWAYS"),
        }
    }
}
