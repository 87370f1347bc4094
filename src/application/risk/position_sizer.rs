use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct SizedPosition {
    pub size_usd: Decimal,
    /// Final fraction of the account, in percent.
    pub size_pct: f64,
    pub kelly_fraction: f64,
    pub volatility_multiplier: f64,
    pub confidence_multiplier: f64,
}

const BASELINE_VOLATILITY: f64 = 0.02;
const MIN_POSITION_FRACTION: f64 = 0.005;

/// Half-Kelly sizing scaled down by volatility and signal confidence,
/// hard-capped at `max_risk_per_trade` of the account.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    max_risk_per_trade: f64,
}

impl Default for PositionSizer {
    fn default() -> Self {
        Self { max_risk_per_trade: 0.02 }
    }
}

impl PositionSizer {
    pub fn new(max_risk_per_trade: f64) -> Self {
        Self { max_risk_per_trade }
    }

    pub fn size(
        &self,
        account_balance: Decimal,
        win_rate: f64,
        avg_win_pct: f64,
        avg_loss_pct: f64,
        current_volatility: f64,
        confidence: f64,
    ) -> SizedPosition {
        if account_balance <= Decimal::ZERO {
            return SizedPosition {
                size_usd: Decimal::ZERO,
                size_pct: 0.0,
                kelly_fraction: 0.0,
                volatility_multiplier: 1.0,
                confidence_multiplier: 1.0,
            };
        }

        let avg_loss = if avg_loss_pct.abs() < f64::EPSILON { 2.0 } else { avg_loss_pct };

        // Kelly: f* = (p*b - q) / b with b the win/loss payoff ratio
        let b = if avg_loss > 0.0 { avg_win_pct / avg_loss } else { 2.0 };
        let kelly = if b > 0.0 {
            (win_rate * b - (1.0 - win_rate)) / b
        } else {
            0.0
        };

        // Half-Kelly, capped at 25% to bound leverage
        let half_kelly = (kelly / 2.0).clamp(0.0, 0.25);

        let volatility = if current_volatility.is_finite() {
            current_volatility.max(0.01)
        } else {
            BASELINE_VOLATILITY
        };
        let volatility_multiplier = (BASELINE_VOLATILITY / volatility).clamp(0.3, 1.0);

        let confidence_multiplier = confidence.max(0.5);

        let fraction = (half_kelly * volatility_multiplier * confidence_multiplier)
            .min(self.max_risk_per_trade);

        let size_from_fraction = account_balance
            * Decimal::from_f64_retain(fraction).unwrap_or_default();
        let min_position = account_balance
            * Decimal::from_f64_retain(MIN_POSITION_FRACTION).unwrap_or_default();
        let size_usd = size_from_fraction.max(min_position);

        let size_pct = (size_usd / account_balance).to_f64().unwrap_or(0.0) * 100.0;

        SizedPosition {
            size_usd,
            size_pct,
            kelly_fraction: half_kelly,
            volatility_multiplier,
            confidence_multiplier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_size_never_exceeds_max_risk() {
        let sizer = PositionSizer::default();
        // Extremely favourable edge
        let sized = sizer.size(dec!(10000), 0.9, 10.0, 2.0, 0.02, 1.0);
        assert!(sized.size_usd <= dec!(10000) * dec!(0.02) + dec!(0.01));
    }

    #[test]
    fn test_floor_at_half_percent() {
        let sizer = PositionSizer::default();
        // Negative edge: Kelly clamps to zero, floor applies
        let sized = sizer.size(dec!(10000), 0.2, 1.0, 5.0, 0.02, 0.5);
        assert_eq!(sized.size_usd, dec!(50));
        assert_eq!(sized.kelly_fraction, 0.0);
    }

    #[test]
    fn test_zero_balance_sizes_zero() {
        let sized = PositionSizer::default().size(Decimal::ZERO, 0.6, 3.0, 2.0, 0.02, 0.8);
        assert_eq!(sized.size_usd, Decimal::ZERO);
    }

    #[test]
    fn test_high_volatility_shrinks_size() {
        let sizer = PositionSizer::new(0.5);
        let calm = sizer.size(dec!(10000), 0.6, 4.0, 2.0, 0.02, 1.0);
        let stormy = sizer.size(dec!(10000), 0.6, 4.0, 2.0, 0.08, 1.0);
        assert!(stormy.size_usd < calm.size_usd);
        assert!((calm.volatility_multiplier - 1.0).abs() < 1e-9);
        assert!((stormy.volatility_multiplier - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_low_confidence_halves_at_most() {
        let sizer = PositionSizer::new(0.5);
        let sized = sizer.size(dec!(10000), 0.6, 4.0, 2.0, 0.02, 0.1);
        assert_eq!(sized.confidence_multiplier, 0.5);
    }

    #[test]
    fn test_breakeven_stats_produce_floor_size() {
        // win_rate 0.5 with symmetric payoffs: Kelly = 0
        let sized = PositionSizer::default().size(dec!(10000), 0.5, 2.0, 2.0, 0.02, 0.7);
        assert_eq!(sized.size_usd, dec!(50));
    }
}
