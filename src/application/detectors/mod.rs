//! C2 signal detectors. Both the reversal and trend-anticipation detectors (and C6's
//! high-vol entry filter) implement the shared `SignalDetector` trait, mirroring the
//! teacher's `TradingStrategy`-style strategy trait: one `detect` call returns an explicit
//! outcome rather than raising for a business-logic rejection (§9 design note).

pub mod reversal;
pub mod trend_anticipation;

use crate::domain::market::{BtcSnapshot, SymbolMetrics};
use crate::domain::signals::DetectorOutcome;

/// Recent candle-derived helper facts a detector needs beyond the flat `SymbolMetrics`
/// bundle — kept separate so `SymbolMetrics` itself stays a plain serializable record.
#[derive(Debug, Clone, Copy)]
pub struct TrendFacts {
    pub still_trending: bool,
    pub momentum_weakening: bool,
    pub divergence_matches_side: bool,
    pub divergence_strength: f64,
    pub near_support_or_resistance: bool,
    pub fdi: f64,
    pub bullish_candle_pattern: bool,
    pub startup_breakout: bool,
    pub momentum_5m_pct: f64,
    pub momentum_15m_pct: f64,
}

/// External quality signals the scoring formula weights as `(value - 0.5)` deltas.
/// Their own transport (sentiment feed, OI feed) is explicitly out of scope (§1); callers
/// that have no such feed pass 0.5 (neutral, contributes nothing).
#[derive(Debug, Clone, Copy)]
pub struct ExternalFactors {
    pub sentiment: f64,
    pub funding_score: f64,
    pub macro_score: f64,
    pub orderbook_score: f64,
    pub oi_score: f64,
    pub correlation_adjustment: f64,
}

impl Default for ExternalFactors {
    fn default() -> Self {
        Self {
            sentiment: 0.5,
            funding_score: 0.5,
            macro_score: 0.5,
            orderbook_score: 0.5,
            oi_score: 0.5,
            correlation_adjustment: 0.0,
        }
    }
}

pub struct DetectionContext<'a> {
    pub metrics: &'a SymbolMetrics,
    pub btc: &'a BtcSnapshot,
    pub facts: &'a TrendFacts,
    pub external: ExternalFactors,
}

pub trait SignalDetector: Send + Sync {
    fn detect(&self, ctx: &DetectionContext) -> DetectorOutcome;
    fn name(&self) -> &'static str;
}
