use crate::application::analysis::indicators;
use crate::domain::trading::types::{Candle, OrderSide};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopMethod {
    Atr,
    Swing,
    Floor,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopUpdate {
    pub stop_price: f64,
    pub distance_pct: f64,
    pub method: StopMethod,
    pub atr: f64,
    pub swing_level: f64,
    pub extreme_price: f64,
}

const ATR_PERIOD: usize = 14;
const SWING_LOOKBACK: usize = 10;

/// Trailing stop that adapts to volatility (ATR), structure (swing levels)
/// and a hard floor from entry. For a BUY the active stop is the tightest of
/// the three and never moves down while the position is open.
#[derive(Debug, Clone)]
pub struct AdaptiveStop {
    entry_price: f64,
    side: OrderSide,
    atr_multiplier: f64,
    extreme_price: f64,
    current_stop: Option<f64>,
}

impl AdaptiveStop {
    pub fn new(entry_price: f64, side: OrderSide) -> Self {
        Self::with_multiplier(entry_price, side, 2.5)
    }

    pub fn with_multiplier(entry_price: f64, side: OrderSide, atr_multiplier: f64) -> Self {
        Self {
            entry_price,
            side,
            atr_multiplier,
            extreme_price: entry_price,
            current_stop: None,
        }
    }

    pub fn stop_price(&self) -> Option<f64> {
        self.current_stop
    }

    pub fn extreme_price(&self) -> f64 {
        self.extreme_price
    }

    /// Recomputes the stop for the latest price. Candidates for BUY:
    /// extreme - k*ATR, swing low * 0.998, entry * 0.97; active stop is the
    /// max of those, clamped to never retreat.
    pub fn update(&mut self, candles: &[Candle], current_price: f64) -> StopUpdate {
        match self.side {
            OrderSide::Buy => {
                if current_price > self.extreme_price {
                    self.extreme_price = current_price;
                }
            }
            OrderSide::Sell => {
                if current_price < self.extreme_price {
                    self.extreme_price = current_price;
                }
            }
        }

        let atr = self.atr_with_fallback(candles, current_price);
        let swing_level = self.swing_level(candles);

        let (atr_stop, swing_stop, floor_stop) = match self.side {
            OrderSide::Buy => (
                self.extreme_price - atr * self.atr_multiplier,
                swing_level * 0.998,
                self.entry_price * 0.97,
            ),
            OrderSide::Sell => (
                self.extreme_price + atr * self.atr_multiplier,
                swing_level * 1.002,
                self.entry_price * 1.03,
            ),
        };

        let mut stop = match self.side {
            OrderSide::Buy => atr_stop.max(swing_stop).max(floor_stop),
            OrderSide::Sell => atr_stop.min(swing_stop).min(floor_stop),
        };

        // Trailing invariant: the stop only ever tightens
        if let Some(prev) = self.current_stop {
            stop = match self.side {
                OrderSide::Buy => stop.max(prev),
                OrderSide::Sell => stop.min(prev),
            };
        }
        self.current_stop = Some(stop);

        let method = if (stop - atr_stop).abs() < f64::EPSILON {
            StopMethod::Atr
        } else if (stop - swing_stop).abs() < f64::EPSILON {
            StopMethod::Swing
        } else {
            StopMethod::Floor
        };

        let distance_pct = if current_price.abs() > f64::EPSILON {
            match self.side {
                OrderSide::Buy => (current_price - stop) / current_price * 100.0,
                OrderSide::Sell => (stop - current_price) / current_price * 100.0,
            }
        } else {
            0.0
        };

        StopUpdate {
            stop_price: stop,
            distance_pct,
            method,
            atr,
            swing_level,
            extreme_price: self.extreme_price,
        }
    }

    /// Returns the trigger reason when the stop is breached.
    pub fn should_exit(&self, current_price: f64) -> Option<String> {
        let stop = self.current_stop?;
        let breached = match self.side {
            OrderSide::Buy => current_price <= stop,
            OrderSide::Sell => current_price >= stop,
        };
        if breached {
            Some(format!(
                "Stop loss hit: price {:.4} crossed stop {:.4}",
                current_price, stop
            ))
        } else {
            None
        }
    }

    fn atr_with_fallback(&self, candles: &[Candle], current_price: f64) -> f64 {
        let atr = indicators::atr(candles, ATR_PERIOD);
        if atr.is_finite() && atr > 0.0 {
            return atr;
        }
        // Degraded data: price range over the window, then 1% of price
        if candles.len() >= 2 {
            let high = candles.iter().map(|c| c.high_f64()).fold(f64::MIN, f64::max);
            let low = candles.iter().map(|c| c.low_f64()).fold(f64::MAX, f64::min);
            let range = (high - low) / ATR_PERIOD as f64;
            if range.is_finite() && range > 0.0 {
                return range;
            }
        }
        current_price * 0.01
    }

    fn swing_level(&self, candles: &[Candle]) -> f64 {
        if candles.is_empty() {
            return self.entry_price;
        }
        let window = &candles[candles.len().saturating_sub(SWING_LOOKBACK)..];
        let level = match self.side {
            OrderSide::Buy => window.iter().map(|c| c.low_f64()).fold(f64::MAX, f64::min),
            OrderSide::Sell => window.iter().map(|c| c.high_f64()).fold(f64::MIN, f64::max),
        };
        if level.is_finite() { level } else { self.entry_price }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::analysis::indicators::test_support::candles_from_closes;

    #[test]
    fn test_stop_initialized_below_entry_for_buy() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64 * 0.1).collect();
        let candles = candles_from_closes(&closes);
        let mut stop = AdaptiveStop::new(103.0, OrderSide::Buy);
        let update = stop.update(&candles, 103.0);
        assert!(update.stop_price < 103.0);
        // Never worse than -3% from entry
        assert!(update.stop_price >= 103.0 * 0.97 - 1e-9);
    }

    #[test]
    fn test_stop_trails_up_with_price() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let candles = candles_from_closes(&closes);
        let mut stop = AdaptiveStop::new(100.0, OrderSide::Buy);
        let first = stop.update(&candles, 110.0).stop_price;
        let second = stop.update(&candles, 129.0).stop_price;
        assert!(second > first);
        assert_eq!(stop.extreme_price(), 129.0);
    }

    #[test]
    fn test_stop_is_monotone_even_when_volatility_expands() {
        let calm: Vec<f64> = (0..30).map(|i| 100.0 + i as f64 * 0.2).collect();
        let mut stop = AdaptiveStop::new(100.0, OrderSide::Buy);
        let tight = stop.update(&candles_from_closes(&calm), 106.0).stop_price;

        // Wild swings would widen the raw ATR stop; the active stop holds
        let wild: Vec<f64> = (0..30)
            .map(|i| 100.0 + if i % 2 == 0 { 10.0 } else { -10.0 })
            .collect();
        let held = stop.update(&candles_from_closes(&wild), 106.0).stop_price;
        assert!(held >= tight);
    }

    #[test]
    fn test_exit_triggered_on_breach() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64 * 0.1).collect();
        let candles = candles_from_closes(&closes);
        let mut stop = AdaptiveStop::new(103.0, OrderSide::Buy);
        let update = stop.update(&candles, 103.0);

        assert!(stop.should_exit(update.stop_price + 1.0).is_none());
        let reason = stop.should_exit(update.stop_price - 0.01);
        assert!(reason.is_some());
        assert!(reason.unwrap().contains("Stop loss hit"));
    }

    #[test]
    fn test_no_exit_before_first_update() {
        let stop = AdaptiveStop::new(100.0, OrderSide::Buy);
        assert!(stop.should_exit(1.0).is_none());
    }

    #[test]
    fn test_empty_candles_use_price_fallback() {
        let mut stop = AdaptiveStop::new(100.0, OrderSide::Buy);
        let update = stop.update(&[], 100.0);
        // ATR falls back to 1% of price; floor stop dominates
        assert!(update.stop_price >= 97.0 - 1e-9);
        assert!(update.atr > 0.0);
    }
}
