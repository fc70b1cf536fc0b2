//! Observation Queue / Watcher (C5, §4.5). Holds an approved candidate for a short tactical
//! window and, on each eligible tick, re-checks fast deterministic rules before asking the
//! premium LLM for a final pricing decision.

use crate::domain::market::VolatilityState;
use crate::domain::observation::{ObservationRow, ObservationStatus};
use crate::domain::ports::{PromptKind, ReviewPrompt, SignalReviewer};
use crate::domain::signals::{Side, SignalKind};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

/// Fast-path decision produced by the hard-rules timing gate before any LLM call is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingDecision {
    Yes,
    Wait,
    Abandon,
}

/// A minimal live read needed to evaluate the timing gate and, on `Yes`, to build the
/// pricing prompt.
#[derive(Debug, Clone)]
pub struct LiveSnapshot {
    pub price: f64,
    pub rsi: f64,
    pub volume_ratio: f64,
    pub atr_pct: f64,
    pub adx: f64,
    pub macd_bull_cross: bool,
    pub macd_bear_cross: bool,
    pub orderbook_bid_share: f64,
    pub btc_5bar_trend_pct: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct TimingThresholds {
    pub price_abandon_pct: f64,
    pub price_miss_pct: f64,
}

impl Default for TimingThresholds {
    fn default() -> Self {
        Self { price_abandon_pct: 1.5, price_miss_pct: 1.0 }
    }
}

/// §4.5 step 2: volatility multiplier from ATR%, trend-anticipation rows excluded by default.
pub fn volatility_multiplier(kind: SignalKind, atr_pct: f64) -> f64 {
    if matches!(kind, SignalKind::TrendAnticipation) {
        return 1.0;
    }
    if atr_pct < 1.5 {
        0.8
    } else if atr_pct < 2.5 {
        1.0
    } else if atr_pct < 3.5 {
        1.5
    } else {
        2.0
    }
}

/// §4.5 step 2 core gate. `price_move_pct` is signed: positive favours the row's side.
pub fn timing_gate(
    row: &ObservationRow,
    live: &LiveSnapshot,
    thresholds: TimingThresholds,
) -> TimingDecision {
    let mult = volatility_multiplier(row.kind, live.atr_pct);
    let abandon_pct = thresholds.price_abandon_pct * mult;
    let miss_pct = thresholds.price_miss_pct * mult;

    let detected: f64 = row.detected_price.try_into().unwrap_or(live.price);
    let raw_move_pct = if detected != 0.0 { (live.price - detected) / detected * 100.0 } else { 0.0 };
    let against_move_pct = match row.side {
        Side::Long => -raw_move_pct,
        Side::Short => raw_move_pct,
    };

    match row.kind {
        SignalKind::TrendAnticipation => {
            if against_move_pct > abandon_pct {
                return TimingDecision::Abandon;
            }
            if -against_move_pct > miss_pct {
                return TimingDecision::Abandon;
            }
            let rsi_sane = match row.side {
                Side::Long => live.rsi <= 75.0,
                Side::Short => live.rsi >= 25.0,
            };
            if !rsi_sane {
                return TimingDecision::Abandon;
            }
            TimingDecision::Yes
        }
        SignalKind::Reversal | SignalKind::HighVol => {
            let extreme = match row.side {
                Side::Long => row.detected_rsi <= 15.0,
                Side::Short => row.detected_rsi >= 85.0,
            };
            let (abandon_scale, recovery_band) = if extreme {
                (1.5, if row.side == Side::Long { 60.0 } else { 40.0 })
            } else {
                (1.0, if row.side == Side::Long { 55.0 } else { 45.0 })
            };

            if against_move_pct > abandon_pct * abandon_scale {
                return TimingDecision::Abandon;
            }

            let recovered = match row.side {
                Side::Long => live.rsi > recovery_band,
                Side::Short => live.rsi < recovery_band,
            };
            if recovered {
                return TimingDecision::Abandon;
            }

            if -against_move_pct > miss_pct {
                return TimingDecision::Wait;
            }

            TimingDecision::Yes
        }
    }
}

/// §4.5 step 6 result: one of the three non-WAIT pricing dispositions.
#[derive(Debug, Clone)]
pub enum PricingDecision {
    ExecuteLimit { offset_pct: f64 },
    ExecuteMarket,
    Abandon { reason: String },
}

/// Shape of the pricing LLM's JSON reply, parsed out of `ReviewResponse::reasoning` the same
/// way `high_vol_track::PricingResponse` and `position_supervisor::PositionReviewResponse` do.
#[derive(Debug, Deserialize)]
struct PricingLlmResponse {
    action: String,
    #[serde(default)]
    offset_pct: f64,
    #[serde(default)]
    reason: String,
}

/// Turns the pricing LLM's free-form `reasoning` field into a `PricingDecision`. Falls back to
/// an immediate market execution when the reply isn't parseable JSON -- the reviewer already
/// said `approved`, so the fallback favours acting over silently dropping the signal.
fn parse_pricing_decision(reasoning: &str) -> PricingDecision {
    let Ok(parsed) = serde_json::from_str::<PricingLlmResponse>(reasoning) else {
        return PricingDecision::ExecuteMarket;
    };
    match parsed.action.to_ascii_lowercase().as_str() {
        "limit" => PricingDecision::ExecuteLimit { offset_pct: parsed.offset_pct },
        "abandon" => PricingDecision::Abandon { reason: parsed.reason },
        _ => PricingDecision::ExecuteMarket,
    }
}

pub struct Watcher {
    pub uniqueness_window_minutes: i64,
    pub thresholds: TimingThresholds,
    reviewer: Arc<dyn SignalReviewer>,
}

impl Watcher {
    pub fn new(reviewer: Arc<dyn SignalReviewer>) -> Self {
        Self { uniqueness_window_minutes: 10, thresholds: TimingThresholds::default(), reviewer }
    }

    /// Per-tick entry point for one row. Callers skip rows where `now - last_check < 60s`
    /// before calling this. Returns `Some(decision)` once the pricing LLM has actually been
    /// asked (§4.5 step 6); `None` on every earlier exit (terminal, expired, wait, abandon
    /// before the prompt, or an unreachable reviewer).
    pub async fn process_tick(
        &self,
        row: &mut ObservationRow,
        live: &LiveSnapshot,
        now: DateTime<Utc>,
    ) -> Option<PricingDecision> {
        if row.status.is_terminal() {
            return None;
        }
        if row.is_expired(now) {
            row.status = ObservationStatus::Expired;
            return None;
        }

        match timing_gate(row, live, self.thresholds) {
            TimingDecision::Wait => {
                row.last_check_at = now;
                None
            }
            TimingDecision::Abandon => {
                row.status = ObservationStatus::Abandoned;
                None
            }
            TimingDecision::Yes => {
                let prompt = build_pricing_prompt(row, live);
                let decision = match self.reviewer.review(prompt).await {
                    Ok(resp) if resp.approved => {
                        let decision = parse_pricing_decision(&resp.reasoning);
                        row.status = match decision {
                            PricingDecision::Abandon { .. } => ObservationStatus::Abandoned,
                            PricingDecision::ExecuteLimit { .. } | PricingDecision::ExecuteMarket => {
                                ObservationStatus::Triggered
                            }
                        };
                        Some(decision)
                    }
                    Ok(resp) => {
                        row.status = ObservationStatus::Abandoned;
                        Some(PricingDecision::Abandon { reason: resp.reasoning })
                    }
                    Err(_) => {
                        row.status = ObservationStatus::Abandoned;
                        None
                    }
                };
                row.last_check_at = now;
                decision
            }
        }
    }
}

fn build_pricing_prompt(row: &ObservationRow, live: &LiveSnapshot) -> ReviewPrompt {
    let body = format!(
        "symbol={} side={:?} kind={} price={:.6} rsi={:.1} volume_ratio={:.2} atr_pct={:.2} adx={:.1} \
         macd_bull_cross={} macd_bear_cross={} orderbook_bid_share={:.2} btc_5bar_trend_pct={:.2}",
        row.symbol,
        row.side,
        row.kind.as_str(),
        live.price,
        live.rsi,
        live.volume_ratio,
        live.atr_pct,
        live.adx,
        live.macd_bull_cross,
        live.macd_bear_cross,
        live.orderbook_bid_share,
        live.btc_5bar_trend_pct,
    );
    ReviewPrompt { kind: PromptKind::Pricing, body }
}

/// Translates volatility state into the conservative default multiplier when no live ATR%
/// reading is available yet (startup edge case).
pub fn default_multiplier_for_state(state: VolatilityState) -> f64 {
    match state {
        VolatilityState::Low => 0.8,
        VolatilityState::Normal => 1.0,
        VolatilityState::High => 1.5,
        VolatilityState::Extreme => 2.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::adaptive_stops::calculate_adaptive_stops;
    use crate::domain::market::BtcTrend;
    use crate::domain::signals::Candidate;
    use rust_decimal::Decimal;

    fn candidate(side: Side, kind: SignalKind, rsi: f64) -> Candidate {
        let metrics = crate::domain::market::SymbolMetrics {
            symbol: "ETH/USDT:USDT".into(),
            price: Decimal::new(2000, 0),
            rsi,
            adx: 20.0,
            volume_ratio: 1.5,
            bb_width_pct: 2.0,
            atr_pct: 2.0,
            change_24h_pct: 0.0,
            quote_volume_24h: Decimal::ZERO,
            funding_rate: 0.0,
            macd_line: 0.0,
            macd_signal: 0.0,
            macd_hist_prev: 0.0,
            orderbook: crate::domain::market::OrderBookSnapshot { bid_depth: Decimal::ONE, ask_depth: Decimal::ONE },
        };
        let stops = calculate_adaptive_stops(2000.0, 40.0, side, VolatilityState::Normal, BtcTrend::Neutral, None);
        Candidate {
            symbol: "ETH/USDT:USDT".into(),
            side,
            score: 0.8,
            detected_price: Decimal::new(2000, 0),
            rsi,
            adx: 20.0,
            volume_ratio: 1.5,
            bb_width_pct: 2.0,
            atr_pct: 2.0,
            kind,
            stops,
            momentum_5m_pct: 0.0,
            momentum_15m_pct: 0.0,
            metrics,
            btc_snapshot: crate::domain::market::BtcSnapshot::unknown(),
            detected_at: Utc::now(),
        }
    }

    fn row(side: Side, kind: SignalKind, rsi: f64) -> ObservationRow {
        ObservationRow::from_candidate(1, &candidate(side, kind, rsi), Utc::now()).unwrap()
    }

    #[test]
    fn large_against_move_abandons_reversal() {
        let r = row(Side::Long, SignalKind::Reversal, 12.0);
        let live = LiveSnapshot {
            price: 1900.0,
            rsi: 12.0,
            volume_ratio: 1.5,
            atr_pct: 2.0,
            adx: 20.0,
            macd_bull_cross: false,
            macd_bear_cross: false,
            orderbook_bid_share: 0.5,
            btc_5bar_trend_pct: 0.0,
        };
        assert_eq!(timing_gate(&r, &live, TimingThresholds::default()), TimingDecision::Abandon);
    }

    #[test]
    fn rsi_recovery_past_band_abandons_long_reversal() {
        let r = row(Side::Long, SignalKind::Reversal, 12.0);
        let live = LiveSnapshot {
            price: 2000.0,
            rsi: 65.0,
            volume_ratio: 1.5,
            atr_pct: 2.0,
            adx: 20.0,
            macd_bull_cross: false,
            macd_bear_cross: false,
            orderbook_bid_share: 0.5,
            btc_5bar_trend_pct: 0.0,
        };
        assert_eq!(timing_gate(&r, &live, TimingThresholds::default()), TimingDecision::Abandon);
    }

    #[test]
    fn small_favourable_move_yields_yes() {
        let r = row(Side::Long, SignalKind::Reversal, 12.0);
        let live = LiveSnapshot {
            price: 2001.0,
            rsi: 20.0,
            volume_ratio: 1.5,
            atr_pct: 2.0,
            adx: 20.0,
            macd_bull_cross: false,
            macd_bear_cross: false,
            orderbook_bid_share: 0.5,
            btc_5bar_trend_pct: 0.0,
        };
        assert_eq!(timing_gate(&r, &live, TimingThresholds::default()), TimingDecision::Yes);
    }
}
