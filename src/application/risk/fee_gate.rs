use crate::domain::trading::fees::FeeSettings;
use crate::domain::trading::types::OrderSide;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::info;

/// Round-trip fee breakdown for a prospective trade.
#[derive(Debug, Clone, Serialize)]
pub struct FeeBreakdown {
    pub entry_fee: Decimal,
    pub exit_fee: Decimal,
    pub total: Decimal,
    pub pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfitBreakdown {
    pub gross: Decimal,
    pub fees: Decimal,
    pub net: Decimal,
    pub net_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakevenLevels {
    pub breakeven_price: Decimal,
    pub breakeven_pct: f64,
    pub min_profitable_price: Decimal,
    pub min_profitable_pct: f64,
}

/// Outcome of a gate check; `reason` is surfaced in the activity log.
#[derive(Debug, Clone, Serialize)]
pub struct GateDecision {
    pub allowed: bool,
    pub reason: String,
}

impl GateDecision {
    fn allow(reason: impl Into<String>) -> Self {
        Self { allowed: true, reason: reason.into() }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self { allowed: false, reason: reason.into() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FeeSummary {
    pub trades_24h: usize,
    pub buy_trades_24h: usize,
    pub sell_trades_24h: usize,
    pub volume_24h_usd: Decimal,
    pub fees_24h_usd: Decimal,
    pub net_profit_24h_usd: Decimal,
}

#[derive(Debug, Clone)]
struct GateTrade {
    timestamp: DateTime<Utc>,
    side: OrderSide,
    size_usd: Decimal,
    pnl_usd: Option<Decimal>,
}

const HISTORY_CAP: usize = 1000;

/// Central over-trading veto: breakeven math, a minimum profit multiple of
/// round-trip fees, hourly/daily frequency caps and a hold-time floor.
///
/// All clock-dependent checks take `now` explicitly so the gate stays
/// deterministic under test and replay.
#[derive(Debug)]
pub struct FeeProtection {
    settings: FeeSettings,
    history: VecDeque<GateTrade>,
    position_entry_time: Option<DateTime<Utc>>,
}

impl FeeProtection {
    pub fn new(settings: FeeSettings) -> Self {
        // The bounded ring undercounts 24h windows only beyond ~500
        // trades/day, far past any sane cap.
        debug_assert!(settings.max_trades_per_day <= 500);
        Self {
            settings,
            history: VecDeque::with_capacity(HISTORY_CAP),
            position_entry_time: None,
        }
    }

    pub fn settings(&self) -> &FeeSettings {
        &self.settings
    }

    /// Applies updated settings; trade history and hold-time state carry over.
    pub fn update_settings(&mut self, settings: FeeSettings) {
        self.settings = settings;
    }

    /// Fees for a full round trip: taker on entry, taker on the exit value.
    pub fn total_fees(&self, entry: Decimal, exit: Decimal, size_usd: Decimal) -> FeeBreakdown {
        let entry_fee = size_usd * self.settings.taker_fee;
        let exit_value = if entry.is_zero() {
            size_usd
        } else {
            size_usd * (exit / entry)
        };
        let exit_fee = exit_value * self.settings.taker_fee;
        let total = entry_fee + exit_fee;
        let pct = if size_usd.is_zero() {
            0.0
        } else {
            (total / size_usd * Decimal::ONE_HUNDRED).to_f64().unwrap_or(0.0)
        };
        FeeBreakdown { entry_fee, exit_fee, total, pct }
    }

    pub fn net_profit(&self, entry: Decimal, exit: Decimal, size_usd: Decimal) -> ProfitBreakdown {
        let gross = if entry.is_zero() {
            Decimal::ZERO
        } else {
            size_usd * ((exit - entry) / entry)
        };
        let fees = self.total_fees(entry, exit, size_usd).total;
        let net = gross - fees;
        let net_pct = if size_usd.is_zero() {
            0.0
        } else {
            (net / size_usd * Decimal::ONE_HUNDRED).to_f64().unwrap_or(0.0)
        };
        ProfitBreakdown { gross, fees, net, net_pct }
    }

    /// Frequency check for opening a new position.
    pub fn can_open(&self, now: DateTime<Utc>) -> GateDecision {
        let hour_ago = now - Duration::hours(1);
        let day_ago = now - Duration::days(1);

        let last_hour = self.history.iter().filter(|t| t.timestamp >= hour_ago).count();
        if last_hour >= self.settings.max_trades_per_hour as usize {
            return GateDecision::deny(format!(
                "Trade frequency blocked: {}/{} trades in the last hour",
                last_hour, self.settings.max_trades_per_hour
            ));
        }

        let last_day = self.history.iter().filter(|t| t.timestamp >= day_ago).count();
        if last_day >= self.settings.max_trades_per_day as usize {
            return GateDecision::deny(format!(
                "Trade frequency blocked: {}/{} trades in the last 24h",
                last_day, self.settings.max_trades_per_day
            ));
        }

        GateDecision::allow(format!(
            "Frequency OK ({}/hour, {}/day)",
            last_hour, last_day
        ))
    }

    /// Hold-time and profit-threshold check for closing. A forced close
    /// (stop loss, emergency) bypasses both.
    pub fn can_close(
        &self,
        entry: Decimal,
        current: Decimal,
        size_usd: Decimal,
        force: bool,
        now: DateTime<Utc>,
    ) -> GateDecision {
        if force {
            return GateDecision::allow("Force close (stop loss/emergency)");
        }

        if let Some(entered) = self.position_entry_time {
            let held = now - entered;
            let min_hold = Duration::minutes(self.settings.min_hold_time_minutes);
            if held < min_hold {
                let remaining = (min_hold - held).num_seconds() as f64 / 60.0;
                return GateDecision::deny(format!(
                    "Hold time blocked: {:.1} more minutes required (min {}m)",
                    remaining, self.settings.min_hold_time_minutes
                ));
            }
        }

        let profit = self.net_profit(entry, current, size_usd);
        let required = self.total_fees(entry, current, size_usd).total
            * self.settings.min_profit_multiple;

        if profit.net < required {
            return GateDecision::deny(format!(
                "Profit blocked: net ${:.2} below {}x fees (${:.2})",
                profit.net, self.settings.min_profit_multiple, required
            ));
        }

        GateDecision::allow(format!(
            "Net ${:.2} clears {}x fee threshold (${:.2})",
            profit.net, self.settings.min_profit_multiple, required
        ))
    }

    /// Appends to the bounded history; a BUY starts the hold-time clock, a
    /// SELL clears it.
    pub fn record_trade(
        &mut self,
        side: OrderSide,
        price: Decimal,
        size_usd: Decimal,
        pnl_usd: Option<Decimal>,
        now: DateTime<Utc>,
    ) {
        if self.history.len() == HISTORY_CAP {
            self.history.pop_front();
        }
        self.history.push_back(GateTrade { timestamp: now, side, size_usd, pnl_usd });

        match side {
            OrderSide::Buy => {
                self.position_entry_time = Some(now);
                info!("FeeProtection: recorded BUY @ {} (${} position)", price, size_usd);
            }
            OrderSide::Sell => {
                self.position_entry_time = None;
                info!(
                    "FeeProtection: recorded SELL @ {} (pnl {:?})",
                    price, pnl_usd
                );
            }
        }
    }

    pub fn breakeven(&self, entry: Decimal, _size_usd: Decimal) -> BreakevenLevels {
        let round_trip = self.settings.round_trip_rate();
        let breakeven_price = entry * (Decimal::ONE + round_trip);
        let min_rate = round_trip * self.settings.min_profit_multiple;
        let min_profitable_price = entry * (Decimal::ONE + min_rate);
        BreakevenLevels {
            breakeven_price,
            breakeven_pct: (round_trip * Decimal::ONE_HUNDRED).to_f64().unwrap_or(0.0),
            min_profitable_price,
            min_profitable_pct: (min_rate * Decimal::ONE_HUNDRED).to_f64().unwrap_or(0.0),
        }
    }

    pub fn fee_summary(&self, now: DateTime<Utc>) -> FeeSummary {
        let day_ago = now - Duration::days(1);
        let recent: Vec<&GateTrade> =
            self.history.iter().filter(|t| t.timestamp >= day_ago).collect();

        let volume: Decimal = recent.iter().map(|t| t.size_usd).sum();
        let fees = volume * self.settings.round_trip_rate() / Decimal::TWO;
        let profit: Decimal = recent.iter().filter_map(|t| t.pnl_usd).sum();

        FeeSummary {
            trades_24h: recent.len(),
            buy_trades_24h: recent.iter().filter(|t| t.side == OrderSide::Buy).count(),
            sell_trades_24h: recent.iter().filter(|t| t.side == OrderSide::Sell).count(),
            volume_24h_usd: volume,
            fees_24h_usd: fees,
            net_profit_24h_usd: profit - fees,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn gate() -> FeeProtection {
        FeeProtection::new(FeeSettings::default())
    }

    #[test]
    fn test_total_fees_round_trip() {
        let g = gate();
        // $9500 position, flat price: 0.1% each leg
        let fees = g.total_fees(dec!(50000), dec!(50000), dec!(9500));
        assert_eq!(fees.entry_fee, dec!(9.5));
        assert_eq!(fees.exit_fee, dec!(9.5));
        assert_eq!(fees.total, dec!(19));
        assert!((fees.pct - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_net_profit_subtracts_both_legs() {
        let g = gate();
        let profit = g.net_profit(dec!(50000), dec!(52000), dec!(9500));
        // gross = 9500 * 4% = 380; exit fee grows with exit value
        assert_eq!(profit.gross, dec!(380));
        assert!(profit.net < profit.gross);
        assert_eq!(profit.net, profit.gross - profit.fees);
    }

    #[test]
    fn test_hourly_frequency_cap() {
        let now = Utc::now();
        let mut g = gate();
        g.record_trade(OrderSide::Buy, dec!(100), dec!(1000), None, now);
        g.record_trade(OrderSide::Sell, dec!(101), dec!(1000), Some(dec!(5)), now);

        let decision = g.can_open(now);
        assert!(!decision.allowed);
        assert!(decision.reason.contains("blocked"));

        // Outside the hour window the cap clears (daily cap is 10)
        let later = now + Duration::hours(2);
        assert!(g.can_open(later).allowed);
    }

    #[test]
    fn test_daily_frequency_cap() {
        let now = Utc::now();
        let mut settings = FeeSettings::default();
        settings.max_trades_per_hour = 100;
        let mut g = FeeProtection::new(settings);
        for i in 0..10 {
            g.record_trade(
                OrderSide::Buy,
                dec!(100),
                dec!(10),
                None,
                now - Duration::minutes(i),
            );
        }
        let decision = g.can_open(now);
        assert!(!decision.allowed);
        assert!(decision.reason.contains("24h"));
    }

    #[test]
    fn test_min_hold_time_blocks_close() {
        let now = Utc::now();
        let mut g = gate();
        g.record_trade(OrderSide::Buy, dec!(100), dec!(1000), None, now);

        let decision = g.can_close(dec!(100), dec!(110), dec!(1000), false, now + Duration::minutes(5));
        assert!(!decision.allowed);
        assert!(decision.reason.contains("Hold time"));

        // After the floor elapses the (very profitable) close passes
        let decision = g.can_close(dec!(100), dec!(110), dec!(1000), false, now + Duration::minutes(31));
        assert!(decision.allowed);
    }

    #[test]
    fn test_profit_threshold_blocks_thin_close() {
        let now = Utc::now();
        // Raised fees and 3x multiple: the S2 scenario
        let mut settings = FeeSettings::default();
        settings.taker_fee = dec!(0.003);
        settings.min_hold_time_minutes = 0;
        let g = FeeProtection::new(settings);

        // 2% move: gross $190 on $9500, fees ~$58, required ~$174
        let decision = g.can_close(dec!(50000), dec!(51000), dec!(9500), false, now);
        assert!(!decision.allowed);
        assert!(decision.reason.contains("blocked"));
    }

    #[test]
    fn test_force_close_bypasses_hold_and_profit() {
        let now = Utc::now();
        let mut g = gate();
        g.record_trade(OrderSide::Buy, dec!(100), dec!(1000), None, now);

        // Deep loss, inside min-hold: only force passes
        let blocked = g.can_close(dec!(100), dec!(96), dec!(1000), false, now + Duration::minutes(1));
        assert!(!blocked.allowed);
        let forced = g.can_close(dec!(100), dec!(96), dec!(1000), true, now + Duration::minutes(1));
        assert!(forced.allowed);
        assert!(forced.reason.contains("Force close"));
    }

    #[test]
    fn test_sell_clears_hold_clock() {
        let now = Utc::now();
        let mut g = gate();
        g.record_trade(OrderSide::Buy, dec!(100), dec!(1000), None, now);
        g.record_trade(OrderSide::Sell, dec!(110), dec!(1000), Some(dec!(90)), now + Duration::hours(1));

        // No open position: hold-time check is vacuous
        let decision = g.can_close(dec!(100), dec!(120), dec!(1000), false, now + Duration::hours(1));
        assert!(decision.allowed);
    }

    #[test]
    fn test_breakeven_levels() {
        let g = gate();
        let levels = g.breakeven(dec!(50000), dec!(9500));
        assert_eq!(levels.breakeven_price, dec!(50100));
        assert!((levels.breakeven_pct - 0.2).abs() < 1e-9);
        assert_eq!(levels.min_profitable_price, dec!(50300));
    }

    #[test]
    fn test_history_ring_is_bounded() {
        let now = Utc::now();
        let mut settings = FeeSettings::default();
        settings.max_trades_per_hour = 10_000;
        settings.max_trades_per_day = 500;
        let mut g = FeeProtection::new(settings);
        for _ in 0..1100 {
            g.record_trade(OrderSide::Buy, dec!(1), dec!(1), None, now);
        }
        assert_eq!(g.history.len(), HISTORY_CAP);
    }

    #[test]
    fn test_fee_summary_counts_24h() {
        let now = Utc::now();
        let mut g = gate();
        g.record_trade(OrderSide::Buy, dec!(100), dec!(1000), None, now - Duration::hours(2));
        g.record_trade(OrderSide::Sell, dec!(105), dec!(1000), Some(dec!(48)), now - Duration::hours(1));
        g.record_trade(OrderSide::Buy, dec!(100), dec!(500), None, now - Duration::days(2));

        let summary = g.fee_summary(now);
        assert_eq!(summary.trades_24h, 2);
        assert_eq!(summary.buy_trades_24h, 1);
        assert_eq!(summary.volume_24h_usd, dec!(2000));
    }
}
