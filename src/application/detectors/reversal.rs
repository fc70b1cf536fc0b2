//! Reversal detector (§4.2.1): RSI-extreme mean-reversion entries confirmed by momentum
//! exhaustion, divergence, or a volume spike.

use super::{DetectionContext, SignalDetector};
use crate::domain::adaptive_stops::calculate_adaptive_stops;
use crate::domain::market::BtcTrend;
use crate::domain::signals::{Candidate, DetectorOutcome, RejectReason, Side, SignalKind};
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;

pub struct ReversalDetector {
    pub weight_sentiment: f64,
    pub weight_funding: f64,
    pub weight_macro: f64,
    pub weight_orderbook: f64,
    pub weight_oi: f64,
}

impl Default for ReversalDetector {
    fn default() -> Self {
        Self {
            weight_sentiment: 0.05,
            weight_funding: 0.05,
            weight_macro: 0.05,
            weight_orderbook: 0.05,
            weight_oi: 0.05,
        }
    }
}

const STAGE: &str = "reversal_detector";

impl SignalDetector for ReversalDetector {
    fn name(&self) -> &'static str {
        STAGE
    }

    fn detect(&self, ctx: &DetectionContext) -> DetectorOutcome {
        let m = ctx.metrics;

        if m.adx < 15.0 && m.volume_ratio < 1.5 {
            return DetectorOutcome::Reject(RejectReason::new(STAGE, "ADX < 15 and volume-ratio < 1.5"));
        }

        let (side, extreme) = match direction(m.rsi) {
            Some(d) => d,
            None => return DetectorOutcome::Reject(RejectReason::new(STAGE, "RSI outside reversal bands")),
        };

        let f = ctx.facts;
        let should_emit = if extreme {
            f.momentum_weakening || f.divergence_matches_side || m.volume_ratio > 1.5
        } else {
            let strong_divergence = f.divergence_matches_side && f.divergence_strength > 0.4;
            let volume_and_weakening = m.volume_ratio > 2.0 && f.momentum_weakening;
            if f.still_trending && !f.divergence_matches_side {
                false
            } else {
                strong_divergence || volume_and_weakening
            }
        };

        if !should_emit {
            return DetectorOutcome::Reject(RejectReason::new(STAGE, "emission conditions not met"));
        }

        let score = self.score(ctx, extreme);
        let price_f64 = m.price.to_f64().unwrap_or(0.0);
        let atr = m.atr_pct / 100.0 * price_f64;
        let stops = calculate_adaptive_stops(
            price_f64,
            atr,
            side,
            ctx.btc.volatility_state,
            ctx.btc.trend,
            None,
        );

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
            kind: SignalKind::Reversal,
            stops,
            momentum_5m_pct: f.momentum_5m_pct,
            momentum_15m_pct: f.momentum_15m_pct,
            metrics: m.clone(),
            btc_snapshot: ctx.btc.clone(),
            detected_at: Utc::now(),
        })
    }
}

impl ReversalDetector {
    fn score(&self, ctx: &DetectionContext, _extreme: bool) -> f64 {
        let e = ctx.external;
        let mut score = 0.75;
        score += (e.sentiment - 0.5) * self.weight_sentiment;
        score += (e.funding_score - 0.5) * self.weight_funding;
        score += (e.macro_score - 0.5) * self.weight_macro;
        score += (e.orderbook_score - 0.5) * self.weight_orderbook;
        score += (e.oi_score - 0.5) * self.weight_oi;
        score += e.correlation_adjustment;
        score.clamp(0.0, 1.0)
    }
}

/// RSI-band direction decision. Returns `(side, is_extreme)`.
/// Exactly 20 is accepted as long/normal; 20.01 is not (§8 boundary behaviour).
fn direction(rsi: f64) -> Option<(Side, bool)> {
    if rsi <= 15.0 {
        Some((Side::Long, true))
    } else if rsi <= 20.0 {
        Some((Side::Long, false))
    } else if rsi >= 85.0 {
        Some((Side::Short, true))
    } else if rsi >= 80.0 {
        Some((Side::Short, false))
    } else {
        None
    }
}

/// `still_trending`: price still makes a new low (long case) / new high (short case) across
/// the last 5 candles vs. the previous 5.
pub fn still_trending(closes: &[f64], side: Side) -> bool {
    if closes.len() < 10 {
        return false;
    }
    let n = closes.len();
    let recent = &closes[n - 5..];
    let previous = &closes[n - 10..n - 5];
    match side {
        Side::Long => {
            let recent_min = recent.iter().cloned().fold(f64::MAX, f64::min);
            let previous_min = previous.iter().cloned().fold(f64::MAX, f64::min);
            recent_min < previous_min
        }
        Side::Short => {
            let recent_max = recent.iter().cloned().fold(f64::MIN, f64::max);
            let previous_max = previous.iter().cloned().fold(f64::MIN, f64::max);
            recent_max > previous_max
        }
    }
}

/// `momentum_weakening`: of the last 6 inter-candle changes, at least 3 show decaying
/// magnitude in the against-direction, and at least one of the two most recent comparisons
/// does too. Per §9's open question, this follows the *intent* ("last 3 of 6 show decay")
/// rather than a literal transcription of the source's reversed index arithmetic.
pub fn momentum_weakening(closes: &[f64], side: Side) -> bool {
    if closes.len() < 8 {
        return false;
    }
    let n = closes.len();
    // Oldest-first deltas over the trailing 7 closes -> 6 inter-candle changes.
    let deltas: Vec<f64> = closes[n - 7..].windows(2).map(|w| w[1] - w[0]).collect();

    let against_magnitude = |delta: f64| -> f64 {
        match side {
            Side::Long => (-delta).max(0.0),
            Side::Short => delta.max(0.0),
        }
    };
    let magnitudes: Vec<f64> = deltas.iter().map(|&d| against_magnitude(d)).collect();

    let mut decaying_count = 0;
    let mut recent_decaying = 0;
    for i in 1..magnitudes.len() {
        let decaying = magnitudes[i] < magnitudes[i - 1];
        if decaying {
            decaying_count += 1;
            if i >= magnitudes.len() - 2 {
                recent_decaying += 1;
            }
        }
    }
    decaying_count >= 3 && recent_decaying >= 1
}

/// `true` when the current volatility state maps to a crash/moon style environment and the
/// BTC trend opposes the candidate side strongly — used by callers wiring up `TrendFacts`.
pub fn btc_opposes(side: Side, trend: BtcTrend) -> bool {
    matches!(
        (side, trend),
        (Side::Long, BtcTrend::Crash) | (Side::Short, BtcTrend::Moon)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsi_exactly_20_is_accepted_as_long_normal() {
        assert_eq!(direction(20.0), Some((Side::Long, false)));
    }

    #[test]
    fn rsi_20_01_is_rejected() {
        assert_eq!(direction(20.01), None);
    }

    #[test]
    fn rsi_15_is_extreme_long() {
        assert_eq!(direction(15.0), Some((Side::Long, true)));
    }

    #[test]
    fn momentum_weakening_detects_decay_on_monotone_then_decaying_series() {
        // Rising then decelerating: against-direction (short side) magnitudes decay.
        let closes = vec![100.0, 110.0, 117.0, 121.0, 123.0, 124.0, 124.5, 124.7];
        assert!(momentum_weakening(&closes, Side::Short));
    }

    #[test]
    fn still_trending_detects_new_low_for_long() {
        let closes = vec![110.0, 109.0, 108.0, 107.0, 106.0, 105.0, 104.0, 103.0, 102.0, 101.0];
        assert!(still_trending(&closes, Side::Long));
    }
}
