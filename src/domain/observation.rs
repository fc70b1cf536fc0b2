//! C5 watcher state: the tiered observation window between AI approval and order placement.

use crate::domain::signals::{Candidate, Side, SignalKind};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObservationStatus {
    Watching,
    Ready,
    Triggered,
    Expired,
    Abandoned,
    DuplicateSkipped,
}

impl ObservationStatus {
    /// Terminal statuses are write-once per the `ObservationRow` invariant.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ObservationStatus::Watching | ObservationStatus::Ready)
    }
}

/// Row lifetime in minutes by kind/RSI-extremity, per §4.5.
pub fn expiry_minutes(kind: SignalKind, rsi: f64, side: Side) -> i64 {
    match kind {
        SignalKind::TrendAnticipation => 8,
        SignalKind::Reversal => {
            let extreme = match side {
                Side::Long => rsi <= 15.0,
                Side::Short => rsi >= 85.0,
            };
            if extreme { 5 } else { 8 }
        }
        SignalKind::HighVol => 8,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationRow {
    pub id: i64,
    pub symbol: String,
    pub side: Side,
    pub kind: SignalKind,
    pub detected_price: Decimal,
    pub detected_rsi: f64,
    pub detected_adx: f64,
    pub initial_sl: Decimal,
    pub initial_tp: Decimal,
    /// Opaque JSON payload of the originating `Candidate`, stored verbatim at the store
    /// boundary — nothing downstream parses fields out of it except for replay/debug tooling.
    pub candidate_payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expiry_minutes: i64,
    pub last_check_at: DateTime<Utc>,
    pub status: ObservationStatus,
}

impl ObservationRow {
    pub fn from_candidate(id: i64, candidate: &Candidate, now: DateTime<Utc>) -> anyhow::Result<Self> {
        let expiry = expiry_minutes(candidate.kind, candidate.rsi, candidate.side);
        Ok(Self {
            id,
            symbol: candidate.symbol.clone(),
            side: candidate.side,
            kind: candidate.kind,
            detected_price: candidate.detected_price,
            detected_rsi: candidate.rsi,
            detected_adx: candidate.adx,
            initial_sl: Decimal::try_from(candidate.stops.sl_price)?,
            initial_tp: Decimal::try_from(candidate.stops.tp_price)?,
            candidate_payload: serde_json::to_value(candidate)?,
            created_at: now,
            expiry_minutes: expiry,
            last_check_at: now,
            status: ObservationStatus::Watching,
        })
    }

    /// `true` once wall-clock has passed `created_at + expiry_minutes`, regardless of
    /// whether a tick ran exactly at the boundary (§8 boundary behaviour).
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.created_at + chrono::Duration::minutes(self.expiry_minutes)
    }
}
