//! Candidate and signal-kind types shared by the detectors (C2/C6), the deduplicator (C3),
//! and the AI reviewer (C4).

use crate::domain::adaptive_stops::AdaptiveStops;
use crate::domain::market::{BtcSnapshot, SymbolMetrics};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

/// Tagged variant over the three signal classes this system detects. Each variant's
/// capability set (hard-rule gate, prompt builder, timing gate, default stops) is dispatched
/// through the `SignalCapabilities` trait in `application::detectors` rather than through
/// conditional blocks keyed on a string kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    Reversal,
    TrendAnticipation,
    HighVol,
}

impl SignalKind {
    /// Dedup priority rank: higher wins when two kinds collide on the same symbol within
    /// the cooldown window (§4.3 rule 4). `trend_continuation` is treated as unreachable
    /// per §9 and intentionally has no variant.
    pub fn priority_rank(self) -> u8 {
        match self {
            SignalKind::TrendAnticipation => 3,
            SignalKind::Reversal => 2,
            SignalKind::HighVol => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SignalKind::Reversal => "reversal",
            SignalKind::TrendAnticipation => "trend_anticipation",
            SignalKind::HighVol => "high_vol_accumulation",
        }
    }
}

/// C2 detector output: transient, destroyed at end of cycle unless promoted into an
/// `ObservationRow` by C4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub symbol: String,
    pub side: Side,
    pub score: f64,
    pub detected_price: Decimal,
    pub rsi: f64,
    pub adx: f64,
    pub volume_ratio: f64,
    pub bb_width_pct: f64,
    pub atr_pct: f64,
    pub kind: SignalKind,
    pub stops: AdaptiveStops,
    pub momentum_5m_pct: f64,
    pub momentum_15m_pct: f64,
    pub metrics: SymbolMetrics,
    pub btc_snapshot: BtcSnapshot,
    pub detected_at: DateTime<Utc>,
}

/// Structured rejection reason a detector or gate returns instead of raising — per §9's
/// "exceptions as control flow" ban, nothing in the pipeline uses `Result::Err` for a
/// business-logic rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectReason {
    pub stage: &'static str,
    pub reason: String,
}

impl RejectReason {
    pub fn new(stage: &'static str, reason: impl Into<String>) -> Self {
        Self { stage, reason: reason.into() }
    }
}

/// A detector never panics or returns `Result::Err` for a business rejection; it always
/// yields one of these two outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DetectorOutcome {
    Emit(Candidate),
    Reject(RejectReason),
}
