//! Market data value types shared by detectors, the watcher, and the position supervisor.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One OHLCV bar. Timestamp is the bar open time, always UTC.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Top-of-book snapshot, used for depth-floor and slippage checks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub bid_depth: Decimal,
    pub ask_depth: Decimal,
}

impl OrderBookSnapshot {
    /// Fraction of total visible depth on the bid side, in `[0, 1]`.
    pub fn bid_share(&self) -> f64 {
        let total = self.bid_depth + self.ask_depth;
        if total.is_zero() {
            0.5
        } else {
            (self.bid_depth / total).to_string().parse().unwrap_or(0.5)
        }
    }

    /// C4 order-book depth floor score: min(bid_share, ask_share) normalised so a balanced
    /// book scores close to 1.0 and a one-sided book scores close to 0.0.
    pub fn depth_score(&self) -> f64 {
        let share = self.bid_share();
        1.0 - (share - 0.5).abs() * 2.0
    }
}

/// BTC volatility regime label, drives adaptive-stop environment multipliers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolatilityState {
    Low,
    Normal,
    High,
    Extreme,
}

/// BTC directional regime label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BtcTrend {
    Crash,
    Bearish,
    Neutral,
    Bullish,
    Moon,
}

/// One-cycle-stable BTC context record produced by C1's `snapshot_btc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BtcSnapshot {
    pub price: Decimal,
    pub change_1h_pct: f64,
    pub change_4h_pct: f64,
    pub trend: BtcTrend,
    pub rsi: f64,
    pub momentum_15m_pct: f64,
    pub volatility_state: VolatilityState,
    pub reversal_risk: bool,
    pub recommended_action: String,
    /// `true` unless this is a stale/fallback record.
    pub updated: bool,
    pub cache_age_sec: u64,
}

impl BtcSnapshot {
    /// Conservative neutral record returned when there is no cache and the fetch failed.
    pub fn unknown() -> Self {
        Self {
            price: Decimal::ZERO,
            change_1h_pct: 0.0,
            change_4h_pct: 0.0,
            trend: BtcTrend::Neutral,
            rsi: 50.0,
            momentum_15m_pct: 0.0,
            volatility_state: VolatilityState::Normal,
            reversal_risk: false,
            recommended_action: "neutral".to_string(),
            updated: false,
            cache_age_sec: 0,
        }
    }

    /// Returns a stale copy of `self` annotated with the failed-fetch metadata, matching
    /// C1's "return the last cached record annotated with `updated=false`" contract.
    pub fn stale(&self, cache_age_sec: u64) -> Self {
        let mut copy = self.clone();
        copy.updated = false;
        copy.cache_age_sec = cache_age_sec;
        copy
    }
}

/// Per-symbol indicator bundle computed once per cycle by C1/C2 and consumed widely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolMetrics {
    pub symbol: String,
    pub price: Decimal,
    pub rsi: f64,
    pub adx: f64,
    pub volume_ratio: f64,
    pub bb_width_pct: f64,
    pub atr_pct: f64,
    pub change_24h_pct: f64,
    pub quote_volume_24h: Decimal,
    pub funding_rate: f64,
    pub macd_line: f64,
    pub macd_signal: f64,
    pub macd_hist_prev: f64,
    pub orderbook: OrderBookSnapshot,
}

impl SymbolMetrics {
    /// `true` on a bullish MACD cross this bar (histogram flips from negative to positive).
    pub fn macd_bull_cross(&self) -> bool {
        self.macd_hist_prev < 0.0 && (self.macd_line - self.macd_signal) >= 0.0
    }

    /// `true` on a bearish MACD cross this bar.
    pub fn macd_bear_cross(&self) -> bool {
        self.macd_hist_prev > 0.0 && (self.macd_line - self.macd_signal) <= 0.0
    }
}
