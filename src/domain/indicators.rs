//! Pure indicator functions.
//!
//! Standard oscillators (RSI, MACD, Bollinger width, ATR) are built on the `ta` crate's
//! streaming indicators, fed one close price at a time exactly the way
//! `application::analyst::Analyst` and `application::feature_engineering_service` feed theirs
//! (construct once per call, `.next(price)` across the whole window, keep the final value --
//! these are one-shot pure functions rather than per-symbol stateful indicators, so each call
//! rebuilds and refeeds). ADX has no equivalent in `ta` 0.5's indicator set, so it stays
//! hand-rolled Wilder DMI/ADX, same as the domain-specific ones (CVD, efficiency ratio, Hurst
//! exponent, fractal dimension index, smart-money classification, breakout-quality). None of
//! them know about any compute library's internal numeric types beyond what's fed through --
//! everything comes in and goes out as `f64`, so the JSON/record boundary never has to convert.

use crate::domain::market::Candle;
use rust_decimal::prelude::ToPrimitive;
use ta::indicators::{AverageTrueRange, BollingerBands, MovingAverageConvergenceDivergence, RelativeStrengthIndex};
use ta::Next;

fn close(c: &Candle) -> f64 {
    c.close.to_f64().unwrap_or(0.0)
}

/// Wilder-smoothed RSI over `period` bars via `ta::RelativeStrengthIndex`. Returns 50.0
/// (neutral) if there is not enough history.
pub fn rsi(candles: &[Candle], period: usize) -> f64 {
    if candles.len() < period + 1 {
        return 50.0;
    }
    let Ok(mut indicator) = RelativeStrengthIndex::new(period) else {
        return 50.0;
    };
    let mut value = 50.0;
    for c in candles {
        value = indicator.next(close(c));
    }
    value
}

/// True range for one bar given the previous close. Still used by the hand-rolled ADX below.
fn true_range(c: &Candle, prev_close: f64) -> f64 {
    let high = c.high.to_f64().unwrap_or(0.0);
    let low = c.low.to_f64().unwrap_or(0.0);
    (high - low).max((high - prev_close).abs()).max((low - prev_close).abs())
}

/// Average True Range (absolute price units) over `period` bars via `ta::AverageTrueRange`,
/// fed close-only the same way `Analyst`'s per-symbol ATR is.
pub fn atr(candles: &[Candle], period: usize) -> f64 {
    if candles.len() < period + 1 {
        return 0.0;
    }
    let Ok(mut indicator) = AverageTrueRange::new(period) else {
        return 0.0;
    };
    let mut value = 0.0;
    for c in candles {
        value = indicator.next(close(c));
    }
    value
}

/// ATR expressed as a percentage of the latest close.
pub fn atr_pct(candles: &[Candle], period: usize) -> f64 {
    let Some(last) = candles.last() else { return 0.0 };
    let px = close(last);
    if px <= 0.0 {
        return 0.0;
    }
    atr(candles, period) / px * 100.0
}

/// Wilder's ADX over `period` bars (default 14). Returns 0.0 if there is not enough history.
/// Hand-rolled: `ta` 0.5 has no ADX/DMI indicator, unlike RSI/ATR/MACD/Bollinger above.
pub fn adx(candles: &[Candle], period: usize) -> f64 {
    if candles.len() < period * 2 {
        return 0.0;
    }
    let n = candles.len();
    let mut plus_dm = vec![0.0; n];
    let mut minus_dm = vec![0.0; n];
    let mut tr = vec![0.0; n];

    for i in 1..n {
        let up = candles[i].high.to_f64().unwrap_or(0.0) - candles[i - 1].high.to_f64().unwrap_or(0.0);
        let down = candles[i - 1].low.to_f64().unwrap_or(0.0) - candles[i].low.to_f64().unwrap_or(0.0);
        plus_dm[i] = if up > down && up > 0.0 { up } else { 0.0 };
        minus_dm[i] = if down > up && down > 0.0 { down } else { 0.0 };
        tr[i] = true_range(&candles[i], close(&candles[i - 1]));
    }

    let smooth = |series: &[f64]| -> f64 {
        let sum: f64 = series[1..=period].iter().sum();
        let mut smoothed = sum;
        for &v in series.iter().skip(period + 1) {
            smoothed = smoothed - (smoothed / period as f64) + v;
        }
        smoothed
    };

    let smoothed_tr = smooth(&tr);
    if smoothed_tr == 0.0 {
        return 0.0;
    }
    let smoothed_plus = smooth(&plus_dm);
    let smoothed_minus = smooth(&minus_dm);

    let plus_di = 100.0 * smoothed_plus / smoothed_tr;
    let minus_di = 100.0 * smoothed_minus / smoothed_tr;
    let di_sum = plus_di + minus_di;
    if di_sum == 0.0 {
        return 0.0;
    }
    100.0 * (plus_di - minus_di).abs() / di_sum
}

/// MACD line, signal line, and the histogram value from the previous bar (for cross
/// detection), via `ta::MovingAverageConvergenceDivergence`.
pub fn macd(candles: &[Candle], fast: usize, slow: usize, signal: usize) -> (f64, f64, f64) {
    if candles.len() < slow + signal {
        return (0.0, 0.0, 0.0);
    }
    let Ok(mut indicator) = MovingAverageConvergenceDivergence::new(fast, slow, signal) else {
        return (0.0, 0.0, 0.0);
    };
    let mut prev = None;
    let mut last = None;
    for c in candles {
        prev = last;
        last = Some(indicator.next(close(c)));
    }
    let last = last.expect("candles non-empty, checked above");
    let prev_hist = prev.map(|p| p.histogram).unwrap_or(last.histogram);
    (last.macd, last.signal, prev_hist)
}

/// Bollinger band width as a fraction of the middle band: `(upper - lower) / middle`, via
/// `ta::BollingerBands`.
pub fn bollinger_width_pct(candles: &[Candle], period: usize, std_dev_mult: f64) -> f64 {
    if candles.len() < period {
        return 0.0;
    }
    let Ok(mut indicator) = BollingerBands::new(period, std_dev_mult) else {
        return 0.0;
    };
    let mut last = None;
    for c in candles {
        last = Some(indicator.next(close(c)));
    }
    let last = last.expect("candles non-empty, checked above");
    if last.average == 0.0 {
        return 0.0;
    }
    (last.upper - last.lower) / last.average * 100.0
}

/// Cumulative volume delta: signed running sum of volume, sign taken from each bar's
/// close-vs-open direction. Grounded on the glossary definition of CVD.
pub fn calculate_cvd(candles: &[Candle]) -> Vec<f64> {
    let mut cvd = Vec::with_capacity(candles.len());
    let mut running = 0.0;
    for c in candles {
        let open = c.open.to_f64().unwrap_or(0.0);
        let vol = c.volume.to_f64().unwrap_or(0.0);
        let signed = if close(c) >= open { vol } else { -vol };
        running += signed;
        cvd.push(running);
    }
    cvd
}

/// CVD divergence over `window` bars: compares the sign of price change to the sign of
/// cumulative-volume-delta change; `strength` is proportional to `|cvd_delta|`, and
/// `fake_breakout` flags price moving >= 3% against a CVD delta magnitude >= 10.
pub struct CvdDivergence {
    pub strength: f64,
    pub fake_breakout: bool,
    pub price_change_pct: f64,
    pub cvd_delta: f64,
}

pub fn cvd_divergence(candles: &[Candle], window: usize) -> CvdDivergence {
    if candles.len() < window + 1 {
        return CvdDivergence { strength: 0.0, fake_breakout: false, price_change_pct: 0.0, cvd_delta: 0.0 };
    }
    let cvd = calculate_cvd(candles);
    let start = candles.len() - window;
    let price_start = close(&candles[start]);
    let price_end = close(&candles[candles.len() - 1]);
    let price_change_pct = if price_start != 0.0 {
        (price_end - price_start) / price_start * 100.0
    } else {
        0.0
    };
    let cvd_delta = cvd[cvd.len() - 1] - cvd[start];

    let diverges = (price_change_pct > 0.0 && cvd_delta < 0.0) || (price_change_pct < 0.0 && cvd_delta > 0.0);
    let strength = if diverges { cvd_delta.abs() } else { 0.0 };
    let fake_breakout = price_change_pct.abs() >= 3.0 && cvd_delta.abs() >= 10.0 && diverges;

    CvdDivergence { strength, fake_breakout, price_change_pct, cvd_delta }
}

/// Efficiency ratio: `|net move| / sum(|per-bar moves|)` over the last `period` bars.
/// Close to 1.0 for a clean trend, close to 0.0 for pure noise.
pub fn efficiency_ratio(candles: &[Candle], period: usize) -> f64 {
    if candles.len() < period + 1 {
        return 0.0;
    }
    let window = &candles[candles.len() - period - 1..];
    let net_move = (close(&window[window.len() - 1]) - close(&window[0])).abs();
    let noise: f64 = window.windows(2).map(|w| (close(&w[1]) - close(&w[0])).abs()).sum();
    if noise == 0.0 {
        0.0
    } else {
        net_move / noise
    }
}

/// Rescaled-range Hurst exponent estimate over the trailing `period` closes.
/// > 0.5 persistent/trending, < 0.5 mean-reverting, ~0.5 random walk.
pub fn hurst_exponent(candles: &[Candle], period: usize) -> f64 {
    if candles.len() < period + 1 || period < 8 {
        return 0.5;
    }
    let window = &candles[candles.len() - period - 1..];
    let log_returns: Vec<f64> = window
        .windows(2)
        .map(|w| {
            let (a, b) = (close(&w[0]), close(&w[1]));
            if a > 0.0 && b > 0.0 { (b / a).ln() } else { 0.0 }
        })
        .collect();

    let n = log_returns.len();
    let mean = log_returns.iter().sum::<f64>() / n as f64;
    let mut cumulative = 0.0;
    let mut max_dev = f64::MIN;
    let mut min_dev = f64::MAX;
    for r in &log_returns {
        cumulative += r - mean;
        max_dev = max_dev.max(cumulative);
        min_dev = min_dev.min(cumulative);
    }
    let range = max_dev - min_dev;
    let variance = log_returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n as f64;
    let std_dev = variance.sqrt();
    if std_dev == 0.0 || range == 0.0 {
        return 0.5;
    }
    let rescaled_range = range / std_dev;
    (rescaled_range.ln() / (n as f64).ln()).clamp(0.0, 1.0)
}

/// Fractal dimension index over `period` bars via the box-counting proxy
/// `FDI = 2 - H` derived from the Hurst exponent. ≈1.0 trending, ≈1.5 noisy.
pub fn fractal_dimension(candles: &[Candle], period: usize) -> f64 {
    2.0 - hurst_exponent(candles, period)
}

/// Smart-money classification from (price change %, open-interest change %, volume ratio).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmartMoneyClass {
    Accumulation,
    Distribution,
    Squeeze,
    Liquidation,
    Neutral,
}

pub fn smart_money_analysis(price_change_pct: f64, oi_change_pct: f64, volume_ratio: f64) -> SmartMoneyClass {
    let rising_price = price_change_pct > 0.5;
    let falling_price = price_change_pct < -0.5;
    let rising_oi = oi_change_pct > 2.0;
    let falling_oi = oi_change_pct < -2.0;
    let high_volume = volume_ratio >= 1.5;

    if rising_price && rising_oi && high_volume {
        SmartMoneyClass::Accumulation
    } else if falling_price && rising_oi && high_volume {
        SmartMoneyClass::Distribution
    } else if falling_oi && high_volume {
        SmartMoneyClass::Liquidation
    } else if !rising_oi && !falling_oi && volume_ratio < 0.8 {
        SmartMoneyClass::Squeeze
    } else {
        SmartMoneyClass::Neutral
    }
}

/// Composite breakout-quality bundle used by C6 step 1 ("compute CVD, ER, Hurst in one pass").
pub struct BreakoutQuality {
    pub cvd: CvdDivergence,
    pub efficiency_ratio: f64,
    pub hurst: f64,
    pub fdi: f64,
    pub score: f64,
}

/// Overall 0-100 breakout-quality score: rewards high efficiency ratio and trending Hurst,
/// penalises a CVD-flagged fake breakout.
pub fn breakout_quality(candles: &[Candle]) -> BreakoutQuality {
    let cvd = cvd_divergence(candles, 20);
    let er = efficiency_ratio(candles, 20);
    let hurst = hurst_exponent(candles, 30);
    let fdi = fractal_dimension(candles, 30);

    let mut score = er * 50.0 + (hurst - 0.5).max(0.0) * 100.0;
    if cvd.fake_breakout {
        score -= 40.0;
    }
    let score = score.clamp(0.0, 100.0);

    BreakoutQuality { cvd, efficiency_ratio: er, hurst, fdi, score }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn candle(close_px: Decimal) -> Candle {
        Candle {
            timestamp: Utc::now(),
            open: close_px,
            high: close_px,
            low: close_px,
            close: close_px,
            volume: dec!(100),
        }
    }

    #[test]
    fn rsi_neutral_without_enough_history() {
        let candles = vec![candle(dec!(100))];
        assert_eq!(rsi(&candles, 14), 50.0);
    }

    #[test]
    fn rsi_monotone_rise_is_near_100() {
        let candles: Vec<Candle> = (1..=20).map(|i| candle(Decimal::from(100 + i))).collect();
        assert!(rsi(&candles, 14) > 95.0);
    }

    #[test]
    fn efficiency_ratio_perfect_trend_is_one() {
        let candles: Vec<Candle> = (0..10).map(|i| candle(Decimal::from(100 + i))).collect();
        assert!((efficiency_ratio(&candles, 9) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cvd_divergence_flags_fake_breakout() {
        let mut candles = Vec::new();
        for i in 0..25 {
            let px = Decimal::from(100 + i);
            candles.push(Candle {
                timestamp: Utc::now(),
                open: px,
                high: px,
                low: px - dec!(1),
                close: px - dec!(1),
                volume: dec!(50),
            });
        }
        let div = cvd_divergence(&candles, 20);
        assert!(div.cvd_delta < 0.0);
    }

    #[test]
    fn smart_money_accumulation_requires_all_three_signals() {
        assert_eq!(smart_money_analysis(1.0, 3.0, 2.0), SmartMoneyClass::Accumulation);
        assert_eq!(smart_money_analysis(1.0, 3.0, 0.5), SmartMoneyClass::Neutral);
    }
}
