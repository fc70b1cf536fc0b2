//! Trend-anticipation detector (§4.2.2): catches an emerging trend before it fully commits,
//! from a moderate RSI band confirmed by a majority of eight supporting conditions.

use super::{DetectionContext, SignalDetector};
use crate::domain::adaptive_stops::{calculate_adaptive_stops, SupportResistance};
use crate::domain::signals::{Candidate, DetectorOutcome, RejectReason, Side, SignalKind};
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;

const STAGE: &str = "trend_anticipation_detector";
const FDI_SUPPRESSION_THRESHOLD: f64 = 1.45;
const MIN_CONDITIONS: u32 = 3;
const EMIT_THRESHOLD: f64 = 0.75;

pub struct TrendAnticipationDetector;

impl SignalDetector for TrendAnticipationDetector {
    fn name(&self) -> &'static str {
        STAGE
    }

    fn detect(&self, ctx: &DetectionContext) -> DetectorOutcome {
        let m = ctx.metrics;
        let f = ctx.facts;

        let side = match direction(m.rsi) {
            Some(s) => s,
            None => return DetectorOutcome::Reject(RejectReason::new(STAGE, "RSI outside trend-anticipation bands")),
        };

        if f.fdi >= FDI_SUPPRESSION_THRESHOLD {
            return DetectorOutcome::Reject(RejectReason::new(STAGE, "FDI too high, market is range-bound"));
        }

        let conditions = count_conditions(ctx, side);
        if conditions < MIN_CONDITIONS {
            return DetectorOutcome::Reject(RejectReason::new(
                STAGE,
                format!("only {conditions}/8 supporting conditions met, need >= {MIN_CONDITIONS}"),
            ));
        }

        let score = self.score(ctx, conditions);
        if score < EMIT_THRESHOLD {
            return DetectorOutcome::Reject(RejectReason::new(STAGE, "composite score below emission threshold"));
        }

        let price_f64 = m.price.to_f64().unwrap_or(0.0);
        let stops = stops_from_support_resistance(price_f64, side, f.near_support_or_resistance);

        DetectorOutcome::Emit(Candidate {
            symbol: m.symbol.clone(),
            side,
            score,
            detected_price: m.price,
            rsi: m.rsi,
            adx: m.adx,
            volume_ratio: m.volume_ratio,
            bb_width_pct: m.bb_width_pct,
            atr_pct: m.atr_pct,
            kind: SignalKind::TrendAnticipation,
            stops,
            momentum_5m_pct: f.momentum_5m_pct,
            momentum_15m_pct: f.momentum_15m_pct,
            metrics: m.clone(),
            btc_snapshot: ctx.btc.clone(),
            detected_at: Utc::now(),
        })
    }
}

impl TrendAnticipationDetector {
    /// Base 0.55 plus a bounded per-condition bonus and a smart-money bonus, clamped to
    /// `[0, 1]`. The bonus schedule intentionally saturates well under 1.0 on conditions
    /// alone; pushing past the 0.75 emission threshold most often needs the smart-money bonus.
    fn score(&self, ctx: &DetectionContext, conditions: u32) -> f64 {
        let mut score = 0.55;
        score += (conditions as f64 - MIN_CONDITIONS as f64).max(0.0) * 0.05;
        if ctx.facts.bullish_candle_pattern {
            score += 0.05;
        }
        if smart_money_bonus(ctx) {
            score += 0.1;
        }
        score.clamp(0.0, 1.0)
    }
}

/// RSI-band direction: long in `[15, 25]` (oversold recovering), short in `[75, 85]`
/// (overbought rolling over).
fn direction(rsi: f64) -> Option<Side> {
    if (15.0..=25.0).contains(&rsi) {
        Some(Side::Long)
    } else if (75.0..=85.0).contains(&rsi) {
        Some(Side::Short)
    } else {
        None
    }
}

/// Counts how many of the eight supporting conditions hold for `side`. At least 3 are
/// required to proceed past the gate.
fn count_conditions(ctx: &DetectionContext, side: Side) -> u32 {
    let m = ctx.metrics;
    let f = ctx.facts;
    let mut n = 0;

    // 1. ADX rising out of chop (>18, anticipating trend strengthening).
    if m.adx > 18.0 {
        n += 1;
    }
    // 2. Volume picking up.
    if m.volume_ratio > 1.2 {
        n += 1;
    }
    // 3. MACD cross in the candidate's favour.
    let macd_favours = match side {
        Side::Long => m.macd_bull_cross(),
        Side::Short => m.macd_bear_cross(),
    };
    if macd_favours {
        n += 1;
    }
    // 4. Bollinger band compression resolving (width expanding off a squeeze).
    if m.bb_width_pct > 2.0 {
        n += 1;
    }
    // 5. Price sitting near a support/resistance level.
    if f.near_support_or_resistance {
        n += 1;
    }
    // 6. Candlestick pattern confirming direction.
    if f.bullish_candle_pattern {
        n += 1;
    }
    // 7. Short-horizon momentum already turning the candidate's way.
    let momentum_favours = match side {
        Side::Long => f.momentum_5m_pct > 0.0,
        Side::Short => f.momentum_5m_pct < 0.0,
    };
    if momentum_favours {
        n += 1;
    }
    // 8. Fresh range/start-of-session breakout context.
    if f.startup_breakout {
        n += 1;
    }

    n
}

/// Smart-money bonus: low FDI (trending, not fractal noise) plus a confirming momentum
/// reading on the longer 15m horizon.
fn smart_money_bonus(ctx: &DetectionContext) -> bool {
    ctx.facts.fdi < 1.3 && ctx.facts.momentum_15m_pct.abs() > 0.1
}

/// Support/resistance anchored stop: entry ± 0.5%, clamped to a 2% max SL and a 6% TP, per
/// §4.2.2's tighter risk budget for an anticipatory (not yet confirmed) entry.
fn stops_from_support_resistance(
    price: f64,
    side: Side,
    near_support_or_resistance: bool,
) -> crate::domain::adaptive_stops::AdaptiveStops {
    let sr = if near_support_or_resistance {
        match side {
            Side::Long => Some(SupportResistance { support: price * 0.995, resistance: price * 1.06 }),
            Side::Short => Some(SupportResistance { support: price * 0.94, resistance: price * 1.005 }),
        }
    } else {
        None
    };

    let atr_approx = price * 0.005;
    let mut stops = calculate_adaptive_stops(
        price,
        atr_approx,
        side,
        crate::domain::market::VolatilityState::Normal,
        crate::domain::market::BtcTrend::Neutral,
        sr,
    );

    stops.sl_pct = stops.sl_pct.min(2.0);
    stops.tp_pct = stops.tp_pct.min(6.0);
    let (sl_price, tp_price) = match side {
        Side::Long => (price * (1.0 - stops.sl_pct / 100.0), price * (1.0 + stops.tp_pct / 100.0)),
        Side::Short => (price * (1.0 + stops.sl_pct / 100.0), price * (1.0 - stops.tp_pct / 100.0)),
    };
    stops.sl_price = sl_price;
    stops.tp_price = tp_price;
    stops.risk_reward_ratio = stops.tp_pct / stops.sl_pct;
    stops
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::detectors::{ExternalFactors, TrendFacts};
    use crate::domain::market::{BtcSnapshot, SymbolMetrics};

    fn facts(overrides: impl FnOnce(&mut TrendFacts)) -> TrendFacts {
        let mut f = TrendFacts {
            still_trending: false,
            momentum_weakening: false,
            divergence_matches_side: false,
            divergence_strength: 0.0,
            near_support_or_resistance: false,
            fdi: 1.5,
            bullish_candle_pattern: false,
            startup_breakout: false,
            momentum_5m_pct: 0.0,
            momentum_15m_pct: 0.0,
        };
        overrides(&mut f);
        f
    }

    fn metrics(rsi: f64) -> SymbolMetrics {
        SymbolMetrics {
            symbol: "ETH/USDT:USDT".to_string(),
            price: rust_decimal::Decimal::new(2000, 0),
            rsi,
            adx: 20.0,
            volume_ratio: 1.5,
            bb_width_pct: 3.0,
            atr_pct: 2.0,
            change_24h_pct: 0.0,
            quote_volume_24h: rust_decimal::Decimal::ZERO,
            funding_rate: 0.0,
            macd_line: 1.0,
            macd_signal: 0.5,
            macd_hist_prev: -0.2,
            orderbook: crate::domain::market::OrderBookSnapshot {
                bid_depth: rust_decimal::Decimal::ONE,
                ask_depth: rust_decimal::Decimal::ONE,
            },
        }
    }

    #[test]
    fn high_fdi_suppresses_emission() {
        let detector = TrendAnticipationDetector;
        let m = metrics(20.0);
        let f = facts(|f| f.fdi = 1.6);
        let btc = BtcSnapshot::unknown();
        let ctx = DetectionContext { metrics: &m, btc: &btc, facts: &f, external: ExternalFactors::default() };
        assert!(matches!(detector.detect(&ctx), DetectorOutcome::Reject(_)));
    }

    #[test]
    fn enough_conditions_and_low_fdi_emits() {
        let detector = TrendAnticipationDetector;
        let m = metrics(20.0);
        let f = facts(|f| {
            f.fdi = 1.1;
            f.near_support_or_resistance = true;
            f.bullish_candle_pattern = true;
            f.momentum_5m_pct = 0.5;
            f.momentum_15m_pct = 0.5;
        });
        let btc = BtcSnapshot::unknown();
        let ctx = DetectionContext { metrics: &m, btc: &btc, facts: &f, external: ExternalFactors::default() };
        assert!(matches!(detector.detect(&ctx), DetectorOutcome::Emit(_)));
    }

    #[test]
    fn rsi_outside_bands_rejects() {
        let detector = TrendAnticipationDetector;
        let m = metrics(50.0);
        let f = facts(|_| {});
        let btc = BtcSnapshot::unknown();
        let ctx = DetectionContext { metrics: &m, btc: &btc, facts: &f, external: ExternalFactors::default() };
        assert!(matches!(detector.detect(&ctx), DetectorOutcome::Reject(_)));
    }
}
