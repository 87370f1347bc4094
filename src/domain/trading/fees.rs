use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Exchange fee schedule plus the over-trading limits enforced by the fee
/// protection gate. Fees are fractions (0.001 = 0.1%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeSettings {
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
    /// Net profit must be at least this multiple of round-trip fees.
    pub min_profit_multiple: Decimal,
    pub max_trades_per_hour: u32,
    pub max_trades_per_day: u32,
    pub min_hold_time_minutes: i64,
}

impl Default for FeeSettings {
    fn default() -> Self {
        Self {
            maker_fee: dec!(0.001),
            taker_fee: dec!(0.001),
            min_profit_multiple: dec!(3.0),
            max_trades_per_hour: 2,
            max_trades_per_day: 10,
            min_hold_time_minutes: 30,
        }
    }
}

/// Partial update applied through the control surface; `None` keeps the
/// current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeeSettingsPatch {
    pub maker_fee: Option<Decimal>,
    pub taker_fee: Option<Decimal>,
    pub min_profit_multiple: Option<Decimal>,
    pub max_trades_per_hour: Option<u32>,
    pub max_trades_per_day: Option<u32>,
    pub min_hold_time_minutes: Option<i64>,
}

impl FeeSettings {
    pub fn apply(&mut self, patch: FeeSettingsPatch) {
        if let Some(v) = patch.maker_fee {
            self.maker_fee = v;
        }
        if let Some(v) = patch.taker_fee {
            self.taker_fee = v;
        }
        if let Some(v) = patch.min_profit_multiple {
            self.min_profit_multiple = v;
        }
        if let Some(v) = patch.max_trades_per_hour {
            self.max_trades_per_hour = v;
        }
        if let Some(v) = patch.max_trades_per_day {
            self.max_trades_per_day = v;
        }
        if let Some(v) = patch.min_hold_time_minutes {
            self.min_hold_time_minutes = v;
        }
    }

    /// Combined fee rate for a taker round trip (entry + exit).
    pub fn round_trip_rate(&self) -> Decimal {
        self.taker_fee + self.taker_fee
    }
}
