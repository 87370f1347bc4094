use crate::application::analysis::indicators;
use crate::domain::trading::types::Candle;
use serde::Serialize;

pub use crate::domain::market::regime::Regime;

#[derive(Debug, Clone, Serialize)]
pub struct RegimeAssessment {
    pub regime: Regime,
    pub confidence: f64,
    pub adx: f64,
    pub bb_width: f64,
    pub allow_mean_reversion: bool,
}

impl RegimeAssessment {
    /// Neutral assessment used on the pipeline's fallback path.
    pub fn sideways_default() -> Self {
        Self {
            regime: Regime::Sideways,
            confidence: 0.0,
            adx: DEFAULT_ADX,
            bb_width: DEFAULT_BB_WIDTH,
            allow_mean_reversion: false,
        }
    }
}

const DEFAULT_ADX: f64 = 25.0;
const DEFAULT_MA_RATIO: f64 = 1.0;
const DEFAULT_BB_WIDTH: f64 = 0.02;

/// Rule-based regime classifier over ADX and the SMA20/SMA50 ratio.
pub struct RegimeDetector {
    adx_period: usize,
}

impl Default for RegimeDetector {
    fn default() -> Self {
        Self { adx_period: 14 }
    }
}

impl RegimeDetector {
    pub fn new(adx_period: usize) -> Self {
        Self { adx_period }
    }

    pub fn detect(&self, candles: &[Candle]) -> RegimeAssessment {
        let mut adx = indicators::adx(candles, self.adx_period);
        if !adx.is_finite() {
            adx = DEFAULT_ADX;
        }

        let sma20 = indicators::sma(candles, 20);
        let sma50 = indicators::sma(candles, 50);
        let mut ma_ratio = sma20 / sma50;
        if !ma_ratio.is_finite() || sma50.abs() < f64::EPSILON {
            ma_ratio = DEFAULT_MA_RATIO;
        }

        let mut bb_width = indicators::bollinger_width(candles, 20, 2.0);
        if !bb_width.is_finite() {
            bb_width = DEFAULT_BB_WIDTH;
        }

        let regime = if adx < 20.0 {
            Regime::Sideways
        } else if adx > 40.0 {
            if ma_ratio > 1.0 {
                Regime::TrendingUp
            } else {
                Regime::TrendingDown
            }
        } else {
            // Moderate ADX: direction from the MA ratio with a 2% dead-band
            if ma_ratio > 1.02 {
                Regime::TrendingUp
            } else if ma_ratio < 0.98 {
                Regime::TrendingDown
            } else {
                Regime::Sideways
            }
        };

        // Mean reversion only makes sense in a range wide enough to clear fees
        let allow_mean_reversion = regime == Regime::Sideways && bb_width > 0.015;

        RegimeAssessment {
            regime,
            confidence: 0.7,
            adx,
            bb_width,
            allow_mean_reversion,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::analysis::indicators::test_support::candles_from_closes;

    #[test]
    fn test_strong_uptrend_detected() {
        let closes: Vec<f64> = (0..100).map(|i| 100.0 + i as f64 * 2.0).collect();
        let assessment = RegimeDetector::default().detect(&candles_from_closes(&closes));
        assert_eq!(assessment.regime, Regime::TrendingUp);
        assert_eq!(assessment.confidence, 0.7);
        assert!(assessment.adx > 20.0);
    }

    #[test]
    fn test_strong_downtrend_detected() {
        let closes: Vec<f64> = (0..100).map(|i| 400.0 - i as f64 * 2.0).collect();
        let assessment = RegimeDetector::default().detect(&candles_from_closes(&closes));
        assert_eq!(assessment.regime, Regime::TrendingDown);
    }

    #[test]
    fn test_flat_series_is_sideways() {
        let assessment = RegimeDetector::default().detect(&candles_from_closes(&[100.0; 100]));
        assert_eq!(assessment.regime, Regime::Sideways);
    }

    #[test]
    fn test_short_history_falls_back_to_defaults() {
        // Too few candles for ADX/SMA50: NaN substitution gives adx=25,
        // ratio=1.0 -> inside the dead-band -> Sideways
        let assessment = RegimeDetector::default().detect(&candles_from_closes(&[100.0; 10]));
        assert_eq!(assessment.regime, Regime::Sideways);
        assert_eq!(assessment.adx, 25.0);
        assert_eq!(assessment.bb_width, 0.02);
    }
}
