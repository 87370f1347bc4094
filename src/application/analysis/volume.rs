use crate::application::analysis::indicators;
use crate::domain::trading::types::Candle;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VolumeSignal {
    StrongBullish,
    Bullish,
    Neutral,
    Bearish,
    StrongBearish,
}

#[derive(Debug, Clone, Serialize)]
pub struct VolumeAssessment {
    /// Combined score in [0, 1]; 0.5 is neutral.
    pub score: f64,
    pub signal: VolumeSignal,
    pub should_trade: bool,
    pub vwap_score: f64,
    pub obv_score: f64,
    pub spike_score: f64,
    pub trend_score: f64,
    pub vwap: f64,
    pub obv_change_pct: f64,
    pub volume_ratio: f64,
}

impl VolumeAssessment {
    pub fn neutral() -> Self {
        Self {
            score: 0.5,
            signal: VolumeSignal::Neutral,
            should_trade: true,
            vwap_score: 0.5,
            obv_score: 0.5,
            spike_score: 0.5,
            trend_score: 0.5,
            vwap: f64::NAN,
            obv_change_pct: 0.0,
            volume_ratio: 1.0,
        }
    }
}

/// Volume structure analysis: VWAP position, OBV trend, spike detection and
/// the 10-vs-20 bar volume trend, combined 30/30/20/20.
pub struct VolumeAnalyzer;

impl VolumeAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, candles: &[Candle]) -> VolumeAssessment {
        if candles.len() < 21 {
            return VolumeAssessment::neutral();
        }

        let (vwap_score, vwap) = self.vwap_score(candles);
        let (obv_score, obv_change_pct) = self.obv_score(candles);
        let (spike_score, volume_ratio) = self.spike_score(candles);
        let trend_score = self.trend_score(candles);

        let score =
            vwap_score * 0.30 + obv_score * 0.30 + spike_score * 0.20 + trend_score * 0.20;

        let (signal, should_trade) = if score > 0.65 {
            (VolumeSignal::StrongBullish, true)
        } else if score > 0.50 {
            (VolumeSignal::Bullish, true)
        } else if score < 0.35 {
            (VolumeSignal::StrongBearish, false)
        } else if score < 0.50 {
            (VolumeSignal::Bearish, false)
        } else {
            (VolumeSignal::Neutral, true)
        };

        VolumeAssessment {
            score,
            signal,
            should_trade,
            vwap_score,
            obv_score,
            spike_score,
            trend_score,
            vwap,
            obv_change_pct,
            volume_ratio,
        }
    }

    /// Price above VWAP is bullish: 0.5 + clamp(distance * 50, 0, 0.5).
    fn vwap_score(&self, candles: &[Candle]) -> (f64, f64) {
        let vwap = indicators::vwap(candles);
        let price = candles.last().map(|c| c.close_f64()).unwrap_or(0.0);
        if !vwap.is_finite() || vwap.abs() < f64::EPSILON {
            return (0.5, f64::NAN);
        }

        let distance = (price - vwap) / vwap;
        let score = if distance > 0.0 {
            0.5 + (distance * 50.0).min(0.5)
        } else {
            0.5 + (distance * 50.0).max(-0.5)
        };
        (score, vwap)
    }

    /// 20-bar OBV change: accumulation above +10% scores 0.7, distribution
    /// below -10% scores 0.3.
    fn obv_score(&self, candles: &[Candle]) -> (f64, f64) {
        let series = indicators::obv(candles);
        let current = match series.last() {
            Some(v) => *v,
            None => return (0.5, 0.0),
        };
        let past = if series.len() > 20 {
            series[series.len() - 21]
        } else {
            series[0]
        };

        let change = if past.abs() > f64::EPSILON {
            (current - past) / past.abs()
        } else {
            0.0
        };

        let score = if change > 0.1 {
            0.7
        } else if change > 0.0 {
            0.6
        } else if change < -0.1 {
            0.3
        } else if change < 0.0 {
            0.4
        } else {
            0.5
        };

        (score, change * 100.0)
    }

    /// Volume relative to its 20-bar mean, weighed by the direction of the
    /// last price move.
    fn spike_score(&self, candles: &[Candle]) -> (f64, f64) {
        let window = &candles[candles.len() - 20..];
        let avg = window.iter().map(|c| c.volume_f64()).sum::<f64>() / 20.0;
        let current = candles.last().map(|c| c.volume_f64()).unwrap_or(0.0);

        let ratio = if avg > f64::EPSILON { current / avg } else { 1.0 };

        let price_change = {
            let last = candles[candles.len() - 1].close_f64();
            let prev = candles[candles.len() - 2].close_f64();
            if prev.abs() > f64::EPSILON { (last - prev) / prev } else { 0.0 }
        };

        let score = if ratio > 2.0 {
            if price_change > 0.0 { 0.8 } else { 0.3 }
        } else if ratio > 1.5 {
            if price_change > 0.0 { 0.65 } else { 0.4 }
        } else {
            0.5
        };

        (score, ratio)
    }

    /// Recent 10-bar mean volume against the prior 20 bars.
    fn trend_score(&self, candles: &[Candle]) -> f64 {
        let n = candles.len();
        let recent = &candles[n - 10..];
        let recent_mean = recent.iter().map(|c| c.volume_f64()).sum::<f64>() / 10.0;

        let older = if n > 30 {
            &candles[n - 30..n - 10]
        } else {
            &candles[..10.min(n)]
        };
        let older_mean =
            older.iter().map(|c| c.volume_f64()).sum::<f64>() / older.len().max(1) as f64;

        let trend = if older_mean > f64::EPSILON {
            (recent_mean - older_mean) / older_mean
        } else {
            0.0
        };

        if trend > 0.2 {
            0.7
        } else if trend > 0.0 {
            0.6
        } else if trend < -0.2 {
            0.4
        } else if trend < 0.0 {
            0.45
        } else {
            0.5
        }
    }
}

impl Default for VolumeAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::analysis::indicators::test_support::candles_with_volume;

    #[test]
    fn test_short_series_is_neutral() {
        let candles = candles_with_volume(&[100.0; 5], &[1000.0; 5]);
        let assessment = VolumeAnalyzer::new().analyze(&candles);
        assert_eq!(assessment.signal, VolumeSignal::Neutral);
        assert!(assessment.should_trade);
    }

    #[test]
    fn test_accumulation_scores_bullish() {
        // Rising closes on rising volume: price above VWAP, OBV climbing
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let volumes: Vec<f64> = (0..60).map(|i| 1000.0 + i as f64 * 50.0).collect();
        let assessment = VolumeAnalyzer::new().analyze(&candles_with_volume(&closes, &volumes));
        assert!(assessment.score > 0.5, "score was {}", assessment.score);
        assert!(assessment.should_trade);
    }

    #[test]
    fn test_distribution_scores_bearish() {
        let closes: Vec<f64> = (0..60).map(|i| 200.0 - i as f64).collect();
        let volumes: Vec<f64> = vec![2000.0; 60];
        let assessment = VolumeAnalyzer::new().analyze(&candles_with_volume(&closes, &volumes));
        assert!(assessment.score < 0.5, "score was {}", assessment.score);
        assert!(!assessment.should_trade);
    }

    #[test]
    fn test_bullish_volume_spike_detected() {
        let mut volumes = vec![1000.0; 60];
        *volumes.last_mut().unwrap() = 3000.0;
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64 * 0.1).collect();
        let assessment = VolumeAnalyzer::new().analyze(&candles_with_volume(&closes, &volumes));
        assert!(assessment.volume_ratio > 2.0);
        assert_eq!(assessment.spike_score, 0.8);
    }
}
