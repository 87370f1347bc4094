use crate::application::analysis::indicators;
use crate::domain::market::Timeframe;
use crate::domain::trading::types::Candle;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrendBias {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeframeSignal {
    pub timeframe: Timeframe,
    pub trend: TrendBias,
    pub strength: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MtfAlignment {
    StrongBullish,
    WeakBullish,
    StrongBearish,
    WeakBearish,
    Mixed,
}

#[derive(Debug, Clone, Serialize)]
pub struct MtfAssessment {
    pub alignment: MtfAlignment,
    pub confidence: f64,
    pub bullish_score: f64,
    pub bearish_score: f64,
    pub signals: Vec<TimeframeSignal>,
    pub timeframes_analyzed: usize,
}

impl MtfAssessment {
    pub fn is_strong(&self) -> bool {
        matches!(
            self.alignment,
            MtfAlignment::StrongBullish | MtfAlignment::StrongBearish
        )
    }
}

/// Weighted triple-EMA trend confluence across 5m/15m/1h/4h/1d.
///
/// Operates on pre-fetched candle sets so the analysis itself stays pure;
/// a missing or short timeframe contributes a neutral signal instead of
/// aborting the aggregate.
pub struct MultiTimeframeAnalyzer;

impl MultiTimeframeAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, frames: &HashMap<Timeframe, Vec<Candle>>) -> MtfAssessment {
        let mut signals = Vec::with_capacity(5);

        for (timeframe, weight) in Timeframe::alignment_set() {
            let signal = match frames.get(&timeframe) {
                Some(candles) if candles.len() >= 50 => {
                    self.analyze_timeframe(candles, timeframe, weight)
                }
                _ => TimeframeSignal {
                    timeframe,
                    trend: TrendBias::Neutral,
                    strength: 0.5,
                    weight,
                },
            };
            signals.push(signal);
        }

        let bullish_score: f64 = signals
            .iter()
            .filter(|s| s.trend == TrendBias::Bullish)
            .map(|s| s.weight * s.strength)
            .sum();
        let bearish_score: f64 = signals
            .iter()
            .filter(|s| s.trend == TrendBias::Bearish)
            .map(|s| s.weight * (1.0 - s.strength))
            .sum();
        let neutral_weight: f64 = signals
            .iter()
            .filter(|s| s.trend == TrendBias::Neutral)
            .map(|s| s.weight)
            .sum();

        let (total_bullish, total_bearish) = if neutral_weight < 1.0 {
            (
                bullish_score / (1.0 - neutral_weight),
                bearish_score / (1.0 - neutral_weight),
            )
        } else {
            (0.0, 0.0)
        };

        let (alignment, confidence) = if total_bullish > 0.7 {
            (MtfAlignment::StrongBullish, total_bullish)
        } else if total_bullish > 0.5 {
            (MtfAlignment::WeakBullish, total_bullish * 0.8)
        } else if total_bearish > 0.7 {
            (MtfAlignment::StrongBearish, total_bearish)
        } else if total_bearish > 0.5 {
            (MtfAlignment::WeakBearish, total_bearish * 0.8)
        } else {
            (MtfAlignment::Mixed, 0.5)
        };

        let timeframes_analyzed = signals
            .iter()
            .filter(|s| s.trend != TrendBias::Neutral)
            .count();

        MtfAssessment {
            alignment,
            confidence,
            bullish_score,
            bearish_score,
            signals,
            timeframes_analyzed,
        }
    }

    /// Triple EMA (9, 21, 50): bullish iff EMA9 > EMA21 > EMA50 and price
    /// above EMA9, symmetric for bearish.
    fn analyze_timeframe(
        &self,
        candles: &[Candle],
        timeframe: Timeframe,
        weight: f64,
    ) -> TimeframeSignal {
        let price = match candles.last() {
            Some(c) => c.close_f64(),
            None => {
                return TimeframeSignal { timeframe, trend: TrendBias::Neutral, strength: 0.5, weight };
            }
        };

        let ema9 = indicators::ema(candles, 9);
        let ema21 = indicators::ema(candles, 21);
        let ema50 = indicators::ema(candles, 50);

        if !ema9.is_finite() || !ema21.is_finite() || !ema50.is_finite() || price <= 0.0 {
            return TimeframeSignal { timeframe, trend: TrendBias::Neutral, strength: 0.5, weight };
        }

        let bullish = ema9 > ema21 && ema21 > ema50 && price > ema9;
        let bearish = ema9 < ema21 && ema21 < ema50 && price < ema9;

        let ema_spread = (ema9 - ema50).abs() / price;
        let strength = (ema_spread * 50.0).min(1.0);

        let momentum = if candles.len() >= 10 {
            let past = candles[candles.len() - 10].close_f64();
            if past.abs() > f64::EPSILON {
                ((price - past) / past).abs() * 10.0
            } else {
                0.0
            }
        } else {
            0.0
        };

        let combined = ((strength + momentum) / 2.0).min(1.0);

        let (trend, trend_strength) = if bullish {
            (TrendBias::Bullish, 0.5 + combined / 2.0)
        } else if bearish {
            (TrendBias::Bearish, 0.5 - combined / 2.0)
        } else {
            (TrendBias::Neutral, 0.5)
        };

        TimeframeSignal {
            timeframe,
            trend,
            strength: trend_strength,
            weight,
        }
    }
}

impl Default for MultiTimeframeAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
