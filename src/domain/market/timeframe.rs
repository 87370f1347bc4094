use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Candle intervals supported by the market-data port. Matches the
/// exchange's kline interval set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    OneMin,
    ThreeMin,
    FiveMin,
    FifteenMin,
    ThirtyMin,
    OneHour,
    TwoHour,
    FourHour,
    SixHour,
    EightHour,
    TwelveHour,
    OneDay,
    ThreeDay,
    OneWeek,
    OneMonth,
}

impl Timeframe {
    /// Returns the duration of this timeframe in minutes.
    pub fn to_minutes(&self) -> u64 {
        match self {
            Timeframe::OneMin => 1,
            Timeframe::ThreeMin => 3,
            Timeframe::FiveMin => 5,
            Timeframe::FifteenMin => 15,
            Timeframe::ThirtyMin => 30,
            Timeframe::OneHour => 60,
            Timeframe::TwoHour => 120,
            Timeframe::FourHour => 240,
            Timeframe::SixHour => 360,
            Timeframe::EightHour => 480,
            Timeframe::TwelveHour => 720,
            Timeframe::OneDay => 1440,
            Timeframe::ThreeDay => 4320,
            Timeframe::OneWeek => 10080,
            // Calendar months vary; 30 days is close enough for cache math
            Timeframe::OneMonth => 43200,
        }
    }

    pub fn to_seconds(&self) -> i64 {
        (self.to_minutes() * 60) as i64
    }

    /// Converts to the exchange API interval string.
    pub fn to_binance_string(&self) -> &'static str {
        match self {
            Timeframe::OneMin => "1m",
            Timeframe::ThreeMin => "3m",
            Timeframe::FiveMin => "5m",
            Timeframe::FifteenMin => "15m",
            Timeframe::ThirtyMin => "30m",
            Timeframe::OneHour => "1h",
            Timeframe::TwoHour => "2h",
            Timeframe::FourHour => "4h",
            Timeframe::SixHour => "6h",
            Timeframe::EightHour => "8h",
            Timeframe::TwelveHour => "12h",
            Timeframe::OneDay => "1d",
            Timeframe::ThreeDay => "3d",
            Timeframe::OneWeek => "1w",
            Timeframe::OneMonth => "1M",
        }
    }

    /// How long a cached OHLCV response for this interval stays fresh.
    pub fn cache_ttl(&self) -> Duration {
        let secs = match self {
            Timeframe::OneMin => 30,
            Timeframe::ThreeMin | Timeframe::FiveMin => 60,
            Timeframe::FifteenMin => 120,
            Timeframe::ThirtyMin => 300,
            Timeframe::OneHour | Timeframe::TwoHour => 600,
            Timeframe::FourHour | Timeframe::SixHour | Timeframe::EightHour => 1800,
            _ => 3600,
        };
        Duration::from_secs(secs)
    }

    /// Timeframes used by the multi-timeframe alignment analysis, with their
    /// confluence weights.
    pub fn alignment_set() -> [(Timeframe, f64); 5] {
        [
            (Timeframe::FiveMin, 0.10),
            (Timeframe::FifteenMin, 0.15),
            (Timeframe::OneHour, 0.25),
            (Timeframe::FourHour, 0.25),
            (Timeframe::OneDay, 0.25),
        ]
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1M" => return Ok(Timeframe::OneMonth),
            _ => {}
        }
        match s.to_lowercase().as_str() {
            "1m" | "1min" => Ok(Timeframe::OneMin),
            "3m" | "3min" => Ok(Timeframe::ThreeMin),
            "5m" | "5min" => Ok(Timeframe::FiveMin),
            "15m" | "15min" => Ok(Timeframe::FifteenMin),
            "30m" | "30min" => Ok(Timeframe::ThirtyMin),
            "1h" | "1hour" => Ok(Timeframe::OneHour),
            "2h" => Ok(Timeframe::TwoHour),
            "4h" | "4hour" => Ok(Timeframe::FourHour),
            "6h" => Ok(Timeframe::SixHour),
            "8h" => Ok(Timeframe::EightHour),
            "12h" => Ok(Timeframe::TwelveHour),
            "1d" | "1day" => Ok(Timeframe::OneDay),
            "3d" => Ok(Timeframe::ThreeDay),
            "1w" | "1week" => Ok(Timeframe::OneWeek),
            _ => Err(anyhow!(
                "Invalid timeframe: '{}'. Valid options: 1m..1M exchange intervals",
                s
            )),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_binance_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_minutes() {
        assert_eq!(Timeframe::OneMin.to_minutes(), 1);
        assert_eq!(Timeframe::FiveMin.to_minutes(), 5);
        assert_eq!(Timeframe::FourHour.to_minutes(), 240);
        assert_eq!(Timeframe::OneDay.to_minutes(), 1440);
    }

    #[test]
    fn test_from_str() {
        assert_eq!(Timeframe::from_str("5m").unwrap(), Timeframe::FiveMin);
        assert_eq!(Timeframe::from_str("1h").unwrap(), Timeframe::OneHour);
        assert_eq!(Timeframe::from_str("1M").unwrap(), Timeframe::OneMonth);
        assert_eq!(Timeframe::from_str("1m").unwrap(), Timeframe::OneMin);
        assert!(Timeframe::from_str("7m").is_err());
    }

    #[test]
    fn test_cache_ttl_scales_with_interval() {
        assert_eq!(Timeframe::OneMin.cache_ttl(), Duration::from_secs(30));
        assert_eq!(Timeframe::FiveMin.cache_ttl(), Duration::from_secs(60));
        assert_eq!(Timeframe::OneHour.cache_ttl(), Duration::from_secs(600));
        assert_eq!(Timeframe::OneDay.cache_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn test_alignment_weights_sum_to_one() {
        let total: f64 = Timeframe::alignment_set().iter().map(|(_, w)| w).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }
}
