//! C4 AI-reviewer types: the hard-rule gate's context/outcome shapes and the persisted
//! Emitted Signal Row.
//!
//! `HardRule` generalizes the teacher's `domain::risk::filters::validator_trait::RiskValidator`
//! idiom (`name()`/`validate()`/`is_enabled()`/`priority()`) from an async portfolio-risk
//! predicate into a synchronous pure predicate, matching `hard_rules_engine.py`'s
//! `HardRule`/`HardRulesEngine` shape: rules are pure, ordered, and individually toggleable.

use crate::domain::market::BtcSnapshot;
use crate::domain::signals::{Candidate, Side, SignalKind};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Block,
    Warn,
}

/// The constructed, flattened context every hard rule reads from. Built once per candidate
/// by `build_context` (mirrors `hard_rules_engine.py::build_context`) so individual rules
/// never reach back into the `Candidate`/`SymbolMetrics` structs directly.
#[derive(Debug, Clone)]
pub struct ReviewContext {
    pub symbol: String,
    pub side: Side,
    pub kind: SignalKind,
    pub score: f64,
    pub rsi: f64,
    pub adx: f64,
    pub volume_ratio: f64,
    pub bb_width_pct: f64,
    pub atr_pct: f64,
    pub sl_pct: f64,
    pub change_24h_pct: f64,
    pub funding_rate: f64,
    pub funding_zscore: f64,
    pub orderbook_depth_score: f64,
    pub estimated_slippage_pct: f64,
    pub macd_bull_cross: bool,
    pub macd_bear_cross: bool,
    pub divergence_matches_side: bool,
    pub divergence_strength: f64,
    pub fdi: Option<f64>,
    pub btc: BtcSnapshot,
    /// Free-form extras so kind-specific rules (trend-anticipation FDI/BTC-direction checks)
    /// don't force every rule to thread new named fields through the shared context.
    pub extra: HashMap<String, f64>,
}

impl ReviewContext {
    #[allow(clippy::too_many_arguments)]
    pub fn from_candidate(
        candidate: &Candidate,
        funding_zscore: f64,
        estimated_slippage_pct: f64,
        divergence_matches_side: bool,
        divergence_strength: f64,
        fdi: Option<f64>,
    ) -> Self {
        Self {
            symbol: candidate.symbol.clone(),
            side: candidate.side,
            kind: candidate.kind,
            score: candidate.score,
            rsi: candidate.rsi,
            adx: candidate.adx,
            volume_ratio: candidate.volume_ratio,
            bb_width_pct: candidate.bb_width_pct,
            atr_pct: candidate.atr_pct,
            sl_pct: candidate.stops.sl_pct,
            change_24h_pct: candidate.metrics.change_24h_pct,
            funding_rate: candidate.metrics.funding_rate,
            funding_zscore,
            orderbook_depth_score: candidate.metrics.orderbook.depth_score(),
            estimated_slippage_pct,
            macd_bull_cross: candidate.metrics.macd_bull_cross(),
            macd_bear_cross: candidate.metrics.macd_bear_cross(),
            divergence_matches_side,
            divergence_strength,
            fdi,
            btc: candidate.btc_snapshot.clone(),
            extra: HashMap::new(),
        }
    }
}

/// One rule's verdict. `pass` carries no payload; a miss carries the templated reason.
#[derive(Debug, Clone)]
pub enum RuleOutcome {
    Pass,
    Miss { reason: String },
}

/// Aggregate result of running the whole rule set against a context.
#[derive(Debug, Clone, Default)]
pub struct HardRuleReport {
    pub blocked_by: Option<(String, String)>,
    pub warnings: Vec<(String, String)>,
}

impl HardRuleReport {
    pub fn passed(&self) -> bool {
        self.blocked_by.is_none()
    }
}

/// AI-review output shape (§4.4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResponse {
    pub approved: bool,
    pub confidence: f64,
    pub side: Side,
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
    Closed,
}

/// Persisted on C4 approval, updated by C5 (trigger), C8 (fill), C7 (exit).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmittedSignalRow {
    pub id: i64,
    pub symbol: String,
    pub side: Side,
    pub entry: Option<Decimal>,
    pub sl: Option<Decimal>,
    pub tp: Option<Decimal>,
    pub rsi: f64,
    pub adx: f64,
    pub score: f64,
    pub entry_ai_source: Option<String>,
    pub timing_ai_source: Option<String>,
    pub order_type: Option<String>,
    pub order_status: OrderStatus,
    pub fill_price: Option<Decimal>,
    pub fill_time: Option<DateTime<Utc>>,
    pub exit_price: Option<Decimal>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_reason: Option<String>,
    pub final_pnl_pct: Option<f64>,
    pub holding_minutes: Option<i64>,
    pub created_at: DateTime<Utc>,
}
