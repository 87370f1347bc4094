use crate::application::analysis::indicators;
use crate::application::analysis::multi_timeframe::{MtfAssessment, MultiTimeframeAnalyzer};
use crate::application::analysis::patterns::{
    PatternAssessment, PatternScanner, ReversalDirection,
};
use crate::application::analysis::regime::{Regime, RegimeAssessment, RegimeDetector};
use crate::application::analysis::volume::{VolumeAnalyzer, VolumeAssessment};
use crate::application::risk::position_sizer::PositionSizer;
use crate::domain::market::Timeframe;
use crate::domain::performance::TradeStats;
use crate::domain::trading::types::{Candle, OrderBook};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Action {
    Buy,
    Sell,
    Hold,
    Halt,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Buy => write!(f, "BUY"),
            Action::Sell => write!(f, "SELL"),
            Action::Hold => write!(f, "HOLD"),
            Action::Halt => write!(f, "HALT"),
        }
    }
}

/// Dynamic stop/target distances. Take profit is always twice the stop
/// distance, so the reward:risk is 2.0 by construction.
#[derive(Debug, Clone, Serialize)]
pub struct RiskLevels {
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub risk_reward: f64,
}

impl RiskLevels {
    pub fn fallback() -> Self {
        Self { stop_loss_pct: 2.0, take_profit_pct: 4.0, risk_reward: 2.0 }
    }
}

/// Per-stage reports. Every recommendation carries all of them, including on
/// early exits, so downstream consumers never see missing sections.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleReports {
    pub regime: RegimeAssessment,
    pub mtf: Option<MtfAssessment>,
    pub volume: VolumeAssessment,
    pub reversal: PatternAssessment,
    pub risk_levels: RiskLevels,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub action: Action,
    pub confidence: f64,
    pub reason: String,
    pub current_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub risk_reward: f64,
    pub size_usd: Decimal,
    pub size_pct: f64,
    pub modules: ModuleReports,
}

/// Everything the pipeline needs for one evaluation. The caller pre-fetches
/// market data; the pipeline itself performs no I/O and is deterministic.
pub struct AnalysisInput<'a> {
    pub symbol: &'a str,
    pub candles: &'a [Candle],
    pub timeframes: Option<&'a HashMap<Timeframe, Vec<Candle>>>,
    pub order_book: Option<&'a OrderBook>,
    pub balance: Decimal,
    pub stats: &'a TradeStats,
    pub confidence_override: Option<f64>,
}

const MIN_CANDLES: usize = 30;
const ATR_STOP_MULTIPLIER: f64 = 2.5;

/// Staged, veto-capable decision chain:
/// regime -> multi-timeframe -> volume -> patterns -> risk levels -> sizing.
///
/// Total: every input yields a fully populated recommendation, with HALT and
/// fallback levels on the failure path.
pub struct DecisionPipeline {
    regime_detector: RegimeDetector,
    mtf_analyzer: MultiTimeframeAnalyzer,
    volume_analyzer: VolumeAnalyzer,
    pattern_scanner: PatternScanner,
    sizer: PositionSizer,
}

impl DecisionPipeline {
    pub fn new() -> Self {
        Self {
            regime_detector: RegimeDetector::default(),
            mtf_analyzer: MultiTimeframeAnalyzer::new(),
            volume_analyzer: VolumeAnalyzer::new(),
            pattern_scanner: PatternScanner::new(),
            sizer: PositionSizer::default(),
        }
    }

    pub fn analyze(&self, input: &AnalysisInput<'_>) -> Recommendation {
        let current_price = input
            .candles
            .last()
            .map(|c| c.close)
            .unwrap_or(Decimal::ZERO);

        if input.candles.len() < MIN_CANDLES || current_price.is_zero() {
            warn!(
                "DecisionPipeline: insufficient history for {} ({} candles)",
                input.symbol,
                input.candles.len()
            );
            return self.halt_fallback(
                current_price,
                input.balance,
                format!(
                    "Analysis error: insufficient history ({} candles)",
                    input.candles.len()
                ),
            );
        }

        // 1. Regime + patterns (patterns feed both the sideways veto and
        //    stage 4)
        let regime = self.regime_detector.detect(input.candles);
        let mut reversal = self.pattern_scanner.scan(input.candles, input.order_book);

        if regime.regime == Regime::Sideways && !reversal.has_patterns() {
            debug!("DecisionPipeline: {} sideways with no patterns", input.symbol);
            return self.finish(
                input,
                Action::Halt,
                0.0,
                "Not tradeable: sideways market without reversal patterns".to_string(),
                current_price,
                regime,
                None,
                VolumeAssessment::neutral(),
                reversal,
                self.risk_levels(input.candles, current_price),
            );
        }

        // 2. Multi-timeframe confluence (optional, bounded bonus)
        let mtf = input.timeframes.map(|frames| self.mtf_analyzer.analyze(frames));
        let mtf_bonus = match &mtf {
            Some(a) if a.is_strong() => 0.15,
            _ => 0.0,
        };

        // 3. Volume veto
        let volume = self.volume_analyzer.analyze(input.candles);
        if volume.score < 0.35 {
            return self.finish(
                input,
                Action::Hold,
                0.0,
                format!("Volume too negative (score {:.2})", volume.score),
                current_price,
                regime,
                mtf,
                volume,
                reversal,
                self.risk_levels(input.candles, current_price),
            );
        }

        // 4. Patterns, with a trend-following pseudo-pattern when the regime
        //    and volume agree but no candlestick pattern printed
        if !reversal.has_patterns() {
            match regime.regime {
                Regime::TrendingUp if volume.score >= 0.5 => {
                    reversal.reversal = Some(ReversalDirection::Bullish);
                    reversal.confidence = reversal.confidence.max(0.6);
                }
                Regime::TrendingDown if volume.score <= 0.5 => {
                    reversal.reversal = Some(ReversalDirection::Bearish);
                    reversal.confidence = reversal.confidence.max(0.6);
                }
                _ => {
                    return self.finish(
                        input,
                        Action::Hold,
                        0.0,
                        "No clear patterns".to_string(),
                        current_price,
                        regime,
                        mtf,
                        volume,
                        reversal,
                        self.risk_levels(input.candles, current_price),
                    );
                }
            }
        }

        // 5. Risk levels
        let risk_levels = self.risk_levels(input.candles, current_price);

        // 6. Final action and confidence
        let (action, reason) = match regime.regime {
            Regime::TrendingUp => (Action::Buy, format!("Uptrend with {} volume", signal_label(&volume))),
            Regime::TrendingDown => (Action::Sell, format!("Downtrend with {} volume", signal_label(&volume))),
            Regime::Sideways => (Action::Hold, "Sideways range".to_string()),
        };

        let confidence = match input.confidence_override {
            Some(c) => c.clamp(0.0, 0.95),
            None => {
                let volume_adj = (volume.score - 0.5).clamp(-0.2, 0.2);
                (0.7 + volume_adj + mtf_bonus).clamp(0.0, 0.95)
            }
        };

        self.finish(
            input, action, confidence, reason, current_price, regime, mtf, volume, reversal,
            risk_levels,
        )
    }

    /// Assembles the final recommendation, including position sizing from
    /// the latest performance statistics.
    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        input: &AnalysisInput<'_>,
        action: Action,
        confidence: f64,
        reason: String,
        current_price: Decimal,
        regime: RegimeAssessment,
        mtf: Option<MtfAssessment>,
        volume: VolumeAssessment,
        reversal: PatternAssessment,
        risk_levels: RiskLevels,
    ) -> Recommendation {
        let volatility = indicators::returns_volatility(input.candles);
        let sized = self.sizer.size(
            input.balance,
            input.stats.win_rate,
            input.stats.avg_win_pct,
            input.stats.avg_loss_pct,
            volatility,
            confidence,
        );

        let (stop_loss, take_profit) =
            price_levels(current_price, risk_levels.stop_loss_pct, risk_levels.take_profit_pct);

        Recommendation {
            action,
            confidence,
            reason,
            current_price,
            stop_loss,
            take_profit,
            stop_loss_pct: risk_levels.stop_loss_pct,
            take_profit_pct: risk_levels.take_profit_pct,
            risk_reward: risk_levels.risk_reward,
            size_usd: sized.size_usd,
            size_pct: sized.size_pct,
            modules: ModuleReports { regime, mtf, volume, reversal, risk_levels },
        }
    }

    /// ATR-scaled stop/target distances; TP is twice the stop distance.
    fn risk_levels(&self, candles: &[Candle], current_price: Decimal) -> RiskLevels {
        let atr = indicators::atr(candles, 14);
        let price = current_price.to_f64().unwrap_or(0.0);
        if !atr.is_finite() || atr <= 0.0 || price <= 0.0 {
            return RiskLevels::fallback();
        }

        let volatility = indicators::returns_volatility(candles);
        let vol_mult = if volatility.is_finite() {
            (volatility / 0.02).clamp(0.5, 1.5)
        } else {
            1.0
        };

        let stop_loss_pct = (atr / price * ATR_STOP_MULTIPLIER * vol_mult * 100.0).clamp(0.5, 10.0);
        RiskLevels {
            stop_loss_pct,
            take_profit_pct: stop_loss_pct * 2.0,
            risk_reward: 2.0,
        }
    }

    /// Full fallback recommendation for the error path: HALT with safe
    /// defaults (SL 2%, TP 4%, 1% of balance), all module sections present.
    fn halt_fallback(&self, current_price: Decimal, balance: Decimal, reason: String) -> Recommendation {
        let risk_levels = RiskLevels::fallback();
        let (stop_loss, take_profit) =
            price_levels(current_price, risk_levels.stop_loss_pct, risk_levels.take_profit_pct);
        let size_usd = balance * Decimal::new(1, 2); // 1%

        Recommendation {
            action: Action::Halt,
            confidence: 0.0,
            reason,
            current_price,
            stop_loss,
            take_profit,
            stop_loss_pct: risk_levels.stop_loss_pct,
            take_profit_pct: risk_levels.take_profit_pct,
            risk_reward: risk_levels.risk_reward,
            size_usd,
            size_pct: 1.0,
            modules: ModuleReports {
                regime: RegimeAssessment::sideways_default(),
                mtf: None,
                volume: VolumeAssessment::neutral(),
                reversal: PatternAssessment::none(),
                risk_levels,
            },
        }
    }
}

impl Default for DecisionPipeline {
    fn default() -> Self {
        Self::new()
    }
}

fn signal_label(volume: &VolumeAssessment) -> &'static str {
    use crate::application::analysis::volume::VolumeSignal::*;
    match volume.signal {
        StrongBullish => "strongly bullish",
        Bullish => "bullish",
        Neutral => "neutral",
        Bearish => "bearish",
        StrongBearish => "strongly bearish",
    }
}

fn price_levels(price: Decimal, stop_loss_pct: f64, take_profit_pct: f64) -> (Decimal, Decimal) {
    let sl = Decimal::from_f64_retain(stop_loss_pct / 100.0).unwrap_or_default();
    let tp = Decimal::from_f64_retain(take_profit_pct / 100.0).unwrap_or_default();
    (price * (Decimal::ONE - sl), price * (Decimal::ONE + tp))
}
