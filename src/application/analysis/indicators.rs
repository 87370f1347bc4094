//! Indicator helpers over candle slices.
//!
//! Moving averages, RSI and Bollinger come from the `ta` crate; ATR, ADX,
//! VWAP and OBV are computed directly because their windowing here differs
//! from the streaming defaults. All math is f64; monetary precision is not
//! required at this layer.

use crate::domain::trading::types::Candle;
use ta::Next;
use ta::indicators::{BollingerBands, ExponentialMovingAverage, RelativeStrengthIndex};

/// Last value of an EMA over closes. Returns NaN when the series is shorter
/// than the period.
pub fn ema(candles: &[Candle], period: usize) -> f64 {
    if candles.len() < period || period == 0 {
        return f64::NAN;
    }
    let mut ema = match ExponentialMovingAverage::new(period) {
        Ok(e) => e,
        Err(_) => return f64::NAN,
    };
    let mut last = f64::NAN;
    for c in candles {
        last = ema.next(c.close_f64());
    }
    last
}

/// Simple moving average of the last `period` closes.
pub fn sma(candles: &[Candle], period: usize) -> f64 {
    if candles.len() < period || period == 0 {
        return f64::NAN;
    }
    let window = &candles[candles.len() - period..];
    window.iter().map(|c| c.close_f64()).sum::<f64>() / period as f64
}

pub fn rsi(candles: &[Candle], period: usize) -> f64 {
    if candles.len() < period + 1 {
        return f64::NAN;
    }
    let mut rsi = match RelativeStrengthIndex::new(period) {
        Ok(r) => r,
        Err(_) => return f64::NAN,
    };
    let mut last = f64::NAN;
    for c in candles {
        last = rsi.next(c.close_f64());
    }
    last
}

/// Bollinger band width relative to the middle band: (upper - lower) / mid.
pub fn bollinger_width(candles: &[Candle], period: usize, multiplier: f64) -> f64 {
    if candles.len() < period {
        return f64::NAN;
    }
    let mut bb = match BollingerBands::new(period, multiplier) {
        Ok(b) => b,
        Err(_) => return f64::NAN,
    };
    let mut out = None;
    for c in candles {
        out = Some(bb.next(c.close_f64()));
    }
    match out {
        Some(o) if o.average.abs() > f64::EPSILON => (o.upper - o.lower) / o.average,
        _ => f64::NAN,
    }
}

/// Average True Range over the trailing window (simple average of TR, the
/// same approximation used for regime volatility scoring).
pub fn atr(candles: &[Candle], period: usize) -> f64 {
    if candles.len() < period + 1 {
        return f64::NAN;
    }

    let mut tr_sum = 0.0;
    let start = candles.len() - period;
    for i in start..candles.len() {
        let high = candles[i].high_f64();
        let low = candles[i].low_f64();
        let prev_close = candles[i - 1].close_f64();

        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());
        tr_sum += tr;
    }

    tr_sum / period as f64
}

/// ADX with Wilder smoothing. Needs roughly 2x period candles; NaN otherwise.
pub fn adx(candles: &[Candle], period: usize) -> f64 {
    if candles.len() < period * 2 + 1 {
        return f64::NAN;
    }

    let mut trs = Vec::with_capacity(candles.len() - 1);
    let mut plus_dms = Vec::with_capacity(candles.len() - 1);
    let mut minus_dms = Vec::with_capacity(candles.len() - 1);

    for i in 1..candles.len() {
        let high = candles[i].high_f64();
        let low = candles[i].low_f64();
        let prev_high = candles[i - 1].high_f64();
        let prev_low = candles[i - 1].low_f64();
        let prev_close = candles[i - 1].close_f64();

        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());
        trs.push(tr);

        let up_move = high - prev_high;
        let down_move = prev_low - low;
        plus_dms.push(if up_move > down_move && up_move > 0.0 { up_move } else { 0.0 });
        minus_dms.push(if down_move > up_move && down_move > 0.0 { down_move } else { 0.0 });
    }

    let wilder = |values: &[f64]| -> Vec<f64> {
        let mut smoothed = Vec::with_capacity(values.len());
        let mut acc: f64 = values[..period].iter().sum();
        smoothed.push(acc);
        for v in &values[period..] {
            acc = acc - acc / period as f64 + v;
            smoothed.push(acc);
        }
        smoothed
    };

    let tr_s = wilder(&trs);
    let plus_s = wilder(&plus_dms);
    let minus_s = wilder(&minus_dms);

    let mut dxs = Vec::with_capacity(tr_s.len());
    for i in 0..tr_s.len() {
        if tr_s[i].abs() < f64::EPSILON {
            dxs.push(0.0);
            continue;
        }
        let plus_di = 100.0 * plus_s[i] / tr_s[i];
        let minus_di = 100.0 * minus_s[i] / tr_s[i];
        let di_sum = plus_di + minus_di;
        dxs.push(if di_sum.abs() < f64::EPSILON {
            0.0
        } else {
            100.0 * (plus_di - minus_di).abs() / di_sum
        });
    }

    if dxs.len() < period {
        return f64::NAN;
    }

    // ADX = Wilder average of DX
    let mut adx = dxs[..period].iter().sum::<f64>() / period as f64;
    for dx in &dxs[period..] {
        adx = (adx * (period - 1) as f64 + dx) / period as f64;
    }
    adx
}

/// Volume-weighted average price over the whole slice.
pub fn vwap(candles: &[Candle]) -> f64 {
    let mut pv = 0.0;
    let mut vol = 0.0;
    for c in candles {
        let typical = (c.high_f64() + c.low_f64() + c.close_f64()) / 3.0;
        pv += typical * c.volume_f64();
        vol += c.volume_f64();
    }
    if vol.abs() < f64::EPSILON { f64::NAN } else { pv / vol }
}

/// On-balance volume series (cumulative signed volume).
pub fn obv(candles: &[Candle]) -> Vec<f64> {
    let mut series = Vec::with_capacity(candles.len());
    let mut acc = 0.0;
    for i in 0..candles.len() {
        if i > 0 {
            let diff = candles[i].close_f64() - candles[i - 1].close_f64();
            if diff > 0.0 {
                acc += candles[i].volume_f64();
            } else if diff < 0.0 {
                acc -= candles[i].volume_f64();
            }
        }
        series.push(acc);
    }
    series
}

/// Standard deviation of simple close-to-close returns; the volatility input
/// for position sizing.
pub fn returns_volatility(candles: &[Candle]) -> f64 {
    if candles.len() < 3 {
        return f64::NAN;
    }
    let mut returns = Vec::with_capacity(candles.len() - 1);
    for i in 1..candles.len() {
        let prev = candles[i - 1].close_f64();
        if prev.abs() > f64::EPSILON {
            returns.push((candles[i].close_f64() - prev) / prev);
        }
    }
    if returns.len() < 2 {
        return f64::NAN;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance =
        returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use rust_decimal::Decimal;

    /// Builds a candle series from close prices with a fixed 1% high/low band
    /// and constant volume. Timestamps are 5-minute spaced.
    pub fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        candles_with_volume(closes, &vec![1000.0; closes.len()])
    }

    pub fn candles_with_volume(closes: &[f64], volumes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .zip(volumes.iter())
            .enumerate()
            .map(|(i, (&close, &volume))| {
                let open = if i == 0 { close } else { closes[i - 1] };
                let high = open.max(close) * 1.01;
                let low = open.min(close) * 0.99;
                Candle {
                    symbol: "BTC/USDT".to_string(),
                    open: Decimal::from_f64_retain(open).unwrap_or_default(),
                    high: Decimal::from_f64_retain(high).unwrap_or_default(),
                    low: Decimal::from_f64_retain(low).unwrap_or_default(),
                    close: Decimal::from_f64_retain(close).unwrap_or_default(),
                    volume: Decimal::from_f64_retain(volume).unwrap_or_default(),
                    timestamp: 1_700_000_000_000 + (i as i64) * 300_000,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_sma_and_ema_track_price() {
        let candles = candles_from_closes(&[1.0; 60]);
        assert!((sma(&candles, 20) - 1.0).abs() < 1e-9);
        assert!((ema(&candles, 9) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_short_series_returns_nan() {
        let candles = candles_from_closes(&[1.0, 2.0, 3.0]);
        assert!(sma(&candles, 20).is_nan());
        assert!(atr(&candles, 14).is_nan());
        assert!(adx(&candles, 14).is_nan());
    }

    #[test]
    fn test_adx_high_in_strong_trend() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + i as f64 * 2.0).collect();
        let candles = candles_from_closes(&closes);
        let value = adx(&candles, 14);
        assert!(value > 25.0, "strong trend should yield elevated ADX, got {value}");
    }

    #[test]
    fn test_obv_rises_on_up_closes() {
        let candles = candles_from_closes(&[1.0, 2.0, 3.0, 4.0]);
        let series = obv(&candles);
        assert_eq!(series.len(), 4);
        assert!(series.last().unwrap() > &0.0);
    }

    #[test]
    fn test_vwap_of_flat_series_is_price() {
        let candles = candles_from_closes(&[100.0; 30]);
        let value = vwap(&candles);
        // typical price = (high + low + close) / 3 with the 1% band
        assert!((value - 100.0).abs() < 1.0);
    }

    #[test]
    fn test_volatility_zero_for_constant_prices() {
        let candles = candles_from_closes(&[50.0; 30]);
        assert!(returns_volatility(&candles).abs() < 1e-12);
    }
}
