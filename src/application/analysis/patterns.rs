use crate::domain::trading::types::{Candle, OrderBook};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CandlePattern {
    Hammer,
    BullishEngulfing,
    MorningStar,
    ShootingStar,
    BearishEngulfing,
    EveningStar,
}

impl CandlePattern {
    pub fn is_bullish(&self) -> bool {
        matches!(
            self,
            CandlePattern::Hammer | CandlePattern::BullishEngulfing | CandlePattern::MorningStar
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReversalDirection {
    Bullish,
    Bearish,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatternAssessment {
    pub bullish: Vec<CandlePattern>,
    pub bearish: Vec<CandlePattern>,
    /// Top-10 order book imbalance in [-1, 1]; positive favours bids.
    pub imbalance: f64,
    pub reversal: Option<ReversalDirection>,
    pub confidence: f64,
}

impl PatternAssessment {
    pub fn none() -> Self {
        Self {
            bullish: Vec::new(),
            bearish: Vec::new(),
            imbalance: 0.0,
            reversal: None,
            confidence: 0.0,
        }
    }

    pub fn has_patterns(&self) -> bool {
        !self.bullish.is_empty() || !self.bearish.is_empty()
    }
}

/// Candlestick reversal patterns over the last one to three candles, plus
/// top-of-book imbalance confirmation.
pub struct PatternScanner;

impl PatternScanner {
    pub fn new() -> Self {
        Self
    }

    pub fn scan(&self, candles: &[Candle], order_book: Option<&OrderBook>) -> PatternAssessment {
        if candles.len() < 3 {
            return PatternAssessment::none();
        }

        let mut bullish = Vec::new();
        let mut bearish = Vec::new();

        let last = Body::of(&candles[candles.len() - 1]);
        let prev = Body::of(&candles[candles.len() - 2]);
        let third = Body::of(&candles[candles.len() - 3]);

        if is_hammer(&last) {
            bullish.push(CandlePattern::Hammer);
        }
        if is_shooting_star(&last) {
            bearish.push(CandlePattern::ShootingStar);
        }
        // Engulfing directions are mutually exclusive: the detection requires
        // opposite body colours on the two candles.
        if is_bullish_engulfing(&prev, &last) {
            bullish.push(CandlePattern::BullishEngulfing);
        } else if is_bearish_engulfing(&prev, &last) {
            bearish.push(CandlePattern::BearishEngulfing);
        }
        if is_morning_star(&third, &prev, &last) {
            bullish.push(CandlePattern::MorningStar);
        }
        if is_evening_star(&third, &prev, &last) {
            bearish.push(CandlePattern::EveningStar);
        }

        let imbalance = order_book.map(book_imbalance).unwrap_or(0.0);

        let reversal = if bullish.len() >= 2 || (!bullish.is_empty() && imbalance > 0.3) {
            Some(ReversalDirection::Bullish)
        } else if bearish.len() >= 2 || (!bearish.is_empty() && imbalance < -0.3) {
            Some(ReversalDirection::Bearish)
        } else {
            None
        };

        let confidence =
            (((bullish.len() + bearish.len()) as f64) / 3.0 + imbalance.abs()).min(1.0);

        PatternAssessment {
            bullish,
            bearish,
            imbalance,
            reversal,
            confidence,
        }
    }
}

impl Default for PatternScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Decomposed candle geometry in f64.
struct Body {
    open: f64,
    close: f64,
    body: f64,
    upper_shadow: f64,
    lower_shadow: f64,
    range: f64,
}

impl Body {
    fn of(candle: &Candle) -> Self {
        let open = candle.open_f64();
        let close = candle.close_f64();
        let high = candle.high_f64();
        let low = candle.low_f64();
        Self {
            open,
            close,
            body: (close - open).abs(),
            upper_shadow: high - open.max(close),
            lower_shadow: open.min(close) - low,
            range: high - low,
        }
    }

    fn is_up(&self) -> bool {
        self.close > self.open
    }

    fn is_down(&self) -> bool {
        self.close < self.open
    }

    fn midpoint(&self) -> f64 {
        (self.open + self.close) / 2.0
    }
}

fn is_hammer(c: &Body) -> bool {
    c.range > f64::EPSILON && c.lower_shadow >= c.body * 2.0 && c.upper_shadow <= c.body
}

fn is_shooting_star(c: &Body) -> bool {
    c.range > f64::EPSILON && c.upper_shadow >= c.body * 2.0 && c.lower_shadow <= c.body
}

fn is_bullish_engulfing(prev: &Body, last: &Body) -> bool {
    prev.is_down() && last.is_up() && last.close >= prev.open && last.open <= prev.close
}

fn is_bearish_engulfing(prev: &Body, last: &Body) -> bool {
    prev.is_up() && last.is_down() && last.open >= prev.close && last.close <= prev.open
}

fn is_morning_star(first: &Body, middle: &Body, last: &Body) -> bool {
    first.is_down()
        && middle.body < first.body * 0.5
        && last.is_up()
        && last.close > first.midpoint()
}

fn is_evening_star(first: &Body, middle: &Body, last: &Body) -> bool {
    first.is_up()
        && middle.body < first.body * 0.5
        && last.is_down()
        && last.close < first.midpoint()
}

/// (bid depth - ask depth) / total over the top ten levels of each side.
fn book_imbalance(book: &OrderBook) -> f64 {
    let bid_qty: Decimal = book.bids.iter().take(10).map(|l| l.quantity).sum();
    let ask_qty: Decimal = book.asks.iter().take(10).map(|l| l.quantity).sum();
    let total = bid_qty + ask_qty;
    if total.is_zero() {
        return 0.0;
    }
    ((bid_qty - ask_qty) / total).to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trading::types::BookLevel;
    use rust_decimal_macros::dec;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            symbol: "BTC/USDT".to_string(),
            open: Decimal::from_f64_retain(open).unwrap(),
            high: Decimal::from_f64_retain(high).unwrap(),
            low: Decimal::from_f64_retain(low).unwrap(),
            close: Decimal::from_f64_retain(close).unwrap(),
            volume: dec!(1000),
            timestamp: 0,
        }
    }

    fn neutral() -> Candle {
        candle(100.0, 101.0, 99.5, 100.5)
    }

    #[test]
    fn test_hammer_detected() {
        let candles = vec![neutral(), neutral(), candle(100.0, 100.6, 95.0, 100.5)];
        let assessment = PatternScanner::new().scan(&candles, None);
        assert!(assessment.bullish.contains(&CandlePattern::Hammer));
    }

    #[test]
    fn test_engulfing_directions_are_exclusive() {
        // Bearish candle then a larger bullish candle engulfing its body
        let candles = vec![neutral(), candle(102.0, 102.5, 99.5, 100.0), candle(99.8, 103.0, 99.5, 102.5)];
        let assessment = PatternScanner::new().scan(&candles, None);
        assert!(assessment.bullish.contains(&CandlePattern::BullishEngulfing));
        assert!(!assessment.bearish.contains(&CandlePattern::BearishEngulfing));
    }

    #[test]
    fn test_morning_star_detected() {
        let candles = vec![
            candle(110.0, 110.5, 99.0, 100.0),  // long bearish
            candle(100.0, 100.5, 99.0, 99.8),   // small body
            candle(100.0, 112.0, 99.5, 111.0),  // bullish close above midpoint
        ];
        let assessment = PatternScanner::new().scan(&candles, None);
        assert!(assessment.bullish.contains(&CandlePattern::MorningStar));
    }

    #[test]
    fn test_single_pattern_with_bid_imbalance_fires_reversal() {
        let candles = vec![neutral(), neutral(), candle(100.0, 100.6, 95.0, 100.5)];
        let book = OrderBook {
            bids: vec![BookLevel { price: dec!(100), quantity: dec!(90) }],
            asks: vec![BookLevel { price: dec!(101), quantity: dec!(10) }],
        };
        let assessment = PatternScanner::new().scan(&candles, Some(&book));
        assert!(assessment.imbalance > 0.3);
        assert_eq!(assessment.reversal, Some(ReversalDirection::Bullish));
        assert!(assessment.confidence > 0.0);
    }

    #[test]
    fn test_no_patterns_on_flat_candles() {
        let candles = vec![neutral(), neutral(), neutral()];
        let assessment = PatternScanner::new().scan(&candles, None);
        assert!(!assessment.has_patterns());
        assert!(assessment.reversal.is_none());
    }
}
