//! C6 high-volatility track state: an independent observation pool, disjoint universe,
//! own readiness/health scoring and its own order-management lane inside C8.

use crate::domain::signals::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HighVolStatus {
    Watching,
    Ready,
    LimitPlaced,
    Filled,
    Expired,
    Abandoned,
    Stopped,
    Profit,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BbVolumeMomentumTrend {
    Squeezing,
    Expanding,
    Neutral,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighVolSignal {
    pub id: i64,
    pub symbol: String,
    pub side: Side,
    pub signal_price: Decimal,
    pub proposed_entry: Decimal,
    pub sl: Decimal,
    pub tp: Decimal,
    pub change_24h_pct: f64,
    pub quote_volume_24h: Decimal,
    pub atr_pct: f64,
    pub readiness_score: f64,
    pub readiness_rationale: Vec<String>,
    pub health_score: f64,
    pub peak_readiness_score: f64,
    pub bb_trend: BbVolumeMomentumTrend,
    pub warning_count: u32,
    pub cvd_divergence_tag: bool,
    pub cvd_score: f64,
    pub efficiency_ratio: f64,
    pub hurst: f64,
    pub breakout_quality_score: f64,
    pub fake_breakout: bool,
    pub status: HighVolStatus,
    pub limit_order_id: Option<String>,
    pub filled_at: Option<DateTime<Utc>>,
    pub current_pnl_fraction: f64,
    pub strategy_tag: String,
    pub ai_review_count: u32,
    pub created_at: DateTime<Utc>,
}

impl HighVolSignal {
    /// Invariant: `status = limit_placed` implies a live limit order id is cached.
    pub fn has_consistent_limit_state(&self) -> bool {
        if self.status == HighVolStatus::LimitPlaced {
            self.limit_order_id.is_some()
        } else {
            true
        }
    }
}
