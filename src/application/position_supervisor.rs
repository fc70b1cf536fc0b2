//! Position Supervisor (C7, §4.7). Runs every cycle over every live position, maintaining
//! the Position Record map and driving the tiered trailing stop, dynamic take-profit,
//! reversal exit, and periodic AI position review.
//!
//! Generalizes the teacher's `application::risk_management::trailing_stops::StopState`
//! single-ATR-multiple state machine into a consumer of the fixed tier table in
//! `domain::position`.

use crate::application::order_executor::{AlgoOrderCache, OrderExecutor};
use crate::domain::errors::CoreError;
use crate::domain::ports::{ExchangeClient, OrderRequest, OrderType, PromptKind, ReviewPrompt, SignalReviewer};
use crate::domain::position::{highest_applicable_tier, PositionRecord, StrategyTag, Tier, DEFAULT_TIERS};
use crate::domain::signals::Side;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, warn};

const EMERGENCY_SL_PCT: f64 = 0.02;
const BREAKEVEN_TRIGGER_PCT: f64 = 0.01;
const BREAKEVEN_BUFFER_PCT: f64 = 0.002;
const TRAILING_TRIGGER_PCT: f64 = 0.01;
const TRAILING_DISTANCE_PCT: f64 = 0.01;
const TP_EXTEND_MOMENTUM_PCT: f64 = 1.0;
const TP_TIGHTEN_MOMENTUM_PCT: f64 = -0.5;
const TP_TIGHTEN_MIN_PNL: f64 = 0.02;
const REVIEW_MIN_HOLD_MINUTES: i64 = 10;
const STAGE: &str = "position_supervisor";

/// Live per-tick reading the coordinator supplies; this supervisor never reaches back into
/// the exchange for market data directly, only for order-management calls.
#[derive(Debug, Clone)]
pub struct PositionTick {
    pub price: Decimal,
    pub rsi_5m: f64,
    pub macd_bull_cross: bool,
    pub macd_bear_cross: bool,
    pub momentum_short_pct: f64,
    pub volume_ratio: f64,
    pub btc_5bar_change_pct: f64,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExitReason {
    EmergencySl,
    ReversalExit,
    AiClose,
    TierCollapse,
}

#[derive(Debug, Clone)]
pub struct ExitEvent {
    pub reason: ExitReason,
    pub exit_price: Decimal,
    pub final_pnl_pct: f64,
}

#[derive(Debug, Deserialize)]
struct PositionReviewResponse {
    action: String,
    new_sl_price: Option<f64>,
    #[serde(default)]
    new_tp_price: Option<f64>,
    #[serde(default)]
    reasoning: String,
}

pub struct PositionSupervisorConfig {
    pub tiered_stop_enabled: bool,
    pub review_interval_sec: i64,
}

impl Default for PositionSupervisorConfig {
    fn default() -> Self {
        Self { tiered_stop_enabled: true, review_interval_sec: 300 }
    }
}

pub struct PositionSupervisor {
    exchange: Arc<dyn ExchangeClient>,
    executor: Arc<OrderExecutor>,
    reviewer: Arc<dyn SignalReviewer>,
    config: PositionSupervisorConfig,
}

impl PositionSupervisor {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        executor: Arc<OrderExecutor>,
        reviewer: Arc<dyn SignalReviewer>,
        config: PositionSupervisorConfig,
    ) -> Self {
        Self { exchange, executor, reviewer, config }
    }

    /// Synthesises a Position Record for a venue position the map doesn't yet know about
    /// (startup reconciliation). Falls back to the conservative ±2%/±6% default stops if no
    /// live algo order can be recovered.
    pub fn reconcile_unknown_position(
        &self,
        symbol: &str,
        side: Side,
        entry_price: Decimal,
        contracts: Decimal,
        cached_sl: Option<Decimal>,
        cached_tp: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> PositionRecord {
        let entry_f = entry_price.to_f64().unwrap_or(0.0);
        let (default_sl, default_tp) = match side {
            Side::Long => (entry_f * 0.98, entry_f * 1.06),
            Side::Short => (entry_f * 1.02, entry_f * 0.94),
        };
        let sl = cached_sl.unwrap_or(Decimal::try_from(default_sl).unwrap_or_default());
        let tp = cached_tp.unwrap_or(Decimal::try_from(default_tp).unwrap_or_default());

        warn!(stage = STAGE, symbol, "synthesising position record during startup reconciliation");

        PositionRecord {
            symbol: symbol.to_string(),
            side,
            entry_price,
            contracts,
            original_sl: sl,
            original_tp: tp,
            current_sl: sl,
            current_tp: tp,
            highest_favorable_price: entry_price,
            highest_pnl_fraction: 0.0,
            current_tier_index: -1,
            breakeven_set: false,
            trailing_activated: false,
            tp_extended: false,
            tp_tightened: false,
            last_momentum_check_at: None,
            last_ai_review_at: None,
            strategy_tag: StrategyTag::Synced,
            opened_at: now,
        }
    }

    /// Runs the full per-symbol algorithm (§4.7 steps 1-9) in order. Returns `Some(ExitEvent)`
    /// if the position closed this tick; the caller is responsible for removing the record
    /// from the position map and updating the Emitted Signal Row.
    pub async fn tick(
        &self,
        record: &mut PositionRecord,
        cache: &mut AlgoOrderCache,
        tick: &PositionTick,
    ) -> Option<ExitEvent> {
        record.update_peak(tick.price);
        let pnl = record.pnl_fraction(tick.price);

        // 2. Emergency flat.
        if pnl <= -EMERGENCY_SL_PCT {
            return self.close_position(record, cache, tick.price, pnl, ExitReason::EmergencySl).await;
        }

        // 3. Stop-loss verification: recreate if the cache has lost track of the live SL id.
        if cache.get(&record.symbol).and_then(|e| e.sl_id.as_ref()).is_none() {
            if let Err(e) = self
                .executor
                .update_stop_loss(cache, &record.symbol, record.side, record.current_sl, Some(record.current_tp))
                .await
            {
                error!(stage = STAGE, symbol = %record.symbol, error = %e, "stop-loss verification recreate failed");
            }
        }

        // 4. Tiered trailing stop (mutually exclusive with steps 5/6).
        if self.config.tiered_stop_enabled {
            self.apply_tiered_stop(record, cache).await;
        } else {
            self.apply_breakeven(record, cache, pnl).await;
            self.apply_simple_trailing(record, cache, tick.price, pnl).await;
        }

        // 7. Dynamic take-profit.
        self.apply_dynamic_tp(record, cache, tick).await;

        // 8. Reversal detection.
        if reversal_triggered(record, tick) {
            return self.close_position(record, cache, tick.price, pnl, ExitReason::ReversalExit).await;
        }

        // 9. AI position review.
        if self.review_due(record, tick.now, pnl, tick) {
            if let Some(exit) = self.ai_review(record, cache, tick, pnl).await {
                return Some(exit);
            }
        }

        None
    }

    async fn apply_tiered_stop(&self, record: &mut PositionRecord, cache: &mut AlgoOrderCache) {
        let Some(tier_idx) = highest_applicable_tier(DEFAULT_TIERS, record.highest_pnl_fraction) else { return };
        if tier_idx as i32 <= record.current_tier_index {
            return;
        }
        let tier: Tier = DEFAULT_TIERS[tier_idx];
        let candidate_sl = locked_sl_price(record, tier.lock);
        if record.try_tighten_sl(candidate_sl) {
            record.try_advance_tier(tier_idx as i32);
            if let Err(e) = self
                .executor
                .update_stop_loss(cache, &record.symbol, record.side, record.current_sl, Some(record.current_tp))
                .await
            {
                error!(stage = STAGE, symbol = %record.symbol, error = %e, "tiered stop update failed after 3 retries");
            }
        }
    }

    async fn apply_breakeven(&self, record: &mut PositionRecord, cache: &mut AlgoOrderCache, pnl: f64) {
        if record.breakeven_set || pnl < BREAKEVEN_TRIGGER_PCT {
            return;
        }
        let entry_f = record.entry_price.to_f64().unwrap_or(0.0);
        let buffer = match record.side {
            Side::Long => entry_f * (1.0 + BREAKEVEN_BUFFER_PCT),
            Side::Short => entry_f * (1.0 - BREAKEVEN_BUFFER_PCT),
        };
        if let Ok(candidate_sl) = Decimal::try_from(buffer) {
            if record.try_tighten_sl(candidate_sl) {
                record.breakeven_set = true;
                let _ = self.executor.update_stop_loss(cache, &record.symbol, record.side, record.current_sl, Some(record.current_tp)).await;
            }
        }
    }

    async fn apply_simple_trailing(&self, record: &mut PositionRecord, cache: &mut AlgoOrderCache, price: Decimal, pnl: f64) {
        if !record.trailing_activated {
            if pnl >= TRAILING_TRIGGER_PCT {
                record.trailing_activated = true;
            } else {
                return;
            }
        }
        let peak_f = record.highest_favorable_price.to_f64().unwrap_or(0.0);
        let trail = match record.side {
            Side::Long => peak_f * (1.0 - TRAILING_DISTANCE_PCT),
            Side::Short => peak_f * (1.0 + TRAILING_DISTANCE_PCT),
        };
        let _ = price;
        if let Ok(candidate_sl) = Decimal::try_from(trail) {
            if record.try_tighten_sl(candidate_sl) {
                let _ = self.executor.update_stop_loss(cache, &record.symbol, record.side, record.current_sl, Some(record.current_tp)).await;
            }
        }
    }

    async fn apply_dynamic_tp(&self, record: &mut PositionRecord, cache: &mut AlgoOrderCache, tick: &PositionTick) {
        let should_check = record
            .last_momentum_check_at
            .map(|last| tick.now - last >= Duration::seconds(30))
            .unwrap_or(true);
        if !should_check {
            return;
        }
        record.last_momentum_check_at = Some(tick.now);

        let entry_f = record.entry_price.to_f64().unwrap_or(0.0);
        let tp_f = record.current_tp.to_f64().unwrap_or(entry_f);
        let momentum = tick.momentum_short_pct;
        let pnl = record.pnl_fraction(tick.price);

        if momentum > TP_EXTEND_MOMENTUM_PCT && !record.tp_extended {
            let tp_distance = (tp_f - entry_f).abs();
            let new_tp = match record.side {
                Side::Long => tp_f + tp_distance * 0.15,
                Side::Short => tp_f - tp_distance * 0.15,
            };
            if let Ok(new_tp_dec) = Decimal::try_from(new_tp) {
                record.current_tp = new_tp_dec;
                record.tp_extended = true;
                let _ = self.executor.update_stop_loss(cache, &record.symbol, record.side, record.current_sl, Some(record.current_tp)).await;
            }
        } else if momentum < TP_TIGHTEN_MOMENTUM_PCT && pnl >= TP_TIGHTEN_MIN_PNL && !record.tp_tightened {
            let current_price_f = tick.price.to_f64().unwrap_or(entry_f);
            let new_tp = match record.side {
                Side::Long => current_price_f * 1.01,
                Side::Short => current_price_f * 0.99,
            };
            if let Ok(new_tp_dec) = Decimal::try_from(new_tp) {
                record.current_tp = new_tp_dec;
                record.tp_tightened = true;
                let _ = self.executor.update_stop_loss(cache, &record.symbol, record.side, record.current_sl, Some(record.current_tp)).await;
            }
        }
    }

    fn review_due(&self, record: &PositionRecord, now: DateTime<Utc>, pnl: f64, tick: &PositionTick) -> bool {
        let due_by_interval = record
            .last_ai_review_at
            .map(|last| now - last >= Duration::seconds(self.config.review_interval_sec))
            .unwrap_or(true);
        if !due_by_interval {
            return false;
        }
        let held_long_enough = now - record.opened_at >= Duration::minutes(REVIEW_MIN_HOLD_MINUTES);
        let notable_condition = (-0.01..=0.02).contains(&pnl)
            || tick.btc_5bar_change_pct.abs() >= 1.0
            || tick.volume_ratio >= 2.0;
        held_long_enough || notable_condition
    }

    async fn ai_review(
        &self,
        record: &mut PositionRecord,
        cache: &mut AlgoOrderCache,
        tick: &PositionTick,
        pnl: f64,
    ) -> Option<ExitEvent> {
        record.last_ai_review_at = Some(tick.now);
        let prompt = ReviewPrompt {
            kind: PromptKind::PositionReview,
            body: format!(
                "symbol={} side={:?} pnl_pct={:.2} rsi_5m={:.1} momentum_pct={:.2} btc_5bar_change_pct={:.2}",
                record.symbol, record.side, pnl * 100.0, tick.rsi_5m, tick.momentum_short_pct, tick.btc_5bar_change_pct
            ),
        };

        let resp = match self.reviewer.review(prompt).await {
            Ok(r) => r,
            Err(_) => return None,
        };

        let Ok(parsed) = serde_json::from_str::<PositionReviewResponse>(&resp.reasoning) else {
            return self.apply_coarse_action(record, cache, &resp.reasoning, pnl, tick).await;
        };
        self.apply_parsed_action(record, cache, &parsed, pnl, tick).await
    }

    async fn apply_coarse_action(
        &self,
        record: &mut PositionRecord,
        cache: &mut AlgoOrderCache,
        action: &str,
        pnl: f64,
        tick: &PositionTick,
    ) -> Option<ExitEvent> {
        match action {
            "close" => {
                self.tighten_instead_of_close(record, cache, tick.price).await;
                None
            }
            "breakeven" if pnl > 0.01 => {
                self.apply_breakeven(record, cache, pnl).await;
                None
            }
            _ => None,
        }
    }

    async fn apply_parsed_action(
        &self,
        record: &mut PositionRecord,
        cache: &mut AlgoOrderCache,
        parsed: &PositionReviewResponse,
        pnl: f64,
        tick: &PositionTick,
    ) -> Option<ExitEvent> {
        match parsed.action.as_str() {
            // "close" is rewritten to tighten_sl to avoid slippage-on-panic.
            "close" => {
                self.tighten_instead_of_close(record, cache, tick.price).await;
                None
            }
            "tighten_sl" => {
                if let Some(sl) = parsed.new_sl_price.and_then(|v| Decimal::try_from(v).ok()) {
                    if record.try_tighten_sl(sl) {
                        let _ = self.executor.update_stop_loss(cache, &record.symbol, record.side, record.current_sl, Some(record.current_tp)).await;
                    }
                }
                None
            }
            "extend_tp" => {
                if let Some(tp) = parsed.new_tp_price.and_then(|v| Decimal::try_from(v).ok()) {
                    record.current_tp = tp;
                    let _ = self.executor.update_stop_loss(cache, &record.symbol, record.side, record.current_sl, Some(record.current_tp)).await;
                }
                None
            }
            "breakeven" if pnl > 0.01 => {
                self.apply_breakeven(record, cache, pnl).await;
                None
            }
            _ => None,
        }
    }

    async fn tighten_instead_of_close(&self, record: &mut PositionRecord, cache: &mut AlgoOrderCache, price: Decimal) {
        let price_f = price.to_f64().unwrap_or(0.0);
        let new_sl = match record.side {
            Side::Long => price_f * 0.997,
            Side::Short => price_f * 1.003,
        };
        if let Ok(sl) = Decimal::try_from(new_sl) {
            if record.try_tighten_sl(sl) {
                let _ = self.executor.update_stop_loss(cache, &record.symbol, record.side, record.current_sl, Some(record.current_tp)).await;
            }
        }
    }

    async fn close_position(
        &self,
        record: &mut PositionRecord,
        cache: &mut AlgoOrderCache,
        exit_price: Decimal,
        pnl: f64,
        reason: ExitReason,
    ) -> Option<ExitEvent> {
        if let Some(entry) = cache.get(&record.symbol).cloned() {
            let ids: Vec<(String, String)> = [entry.sl_id, entry.tp_id]
                .into_iter()
                .flatten()
                .map(|id| (record.symbol.clone(), id))
                .collect();
            if !ids.is_empty() {
                let _ = self.exchange.cancel_algo(&ids).await;
            }
        }
        cache.clear(&record.symbol);

        let close_req = OrderRequest {
            symbol: record.symbol.clone(),
            side: record.side.opposite(),
            order_type: OrderType::Market,
            amount: record.contracts,
            price: None,
            reduce_only: true,
        };
        if let Err(e) = self.exchange.create_order(close_req).await {
            error!(stage = STAGE, symbol = %record.symbol, error = %e, "exit market-close failed");
        }

        Some(ExitEvent { reason, exit_price, final_pnl_pct: pnl * 100.0 })
    }

    /// Post-reversal counter-trade (§4.6 track 2 optional). Callers invoke this after
    /// `close_position` returns a profitable `ReversalExit`/`AiClose`; capacity/margin checks
    /// are the caller's responsibility via `OrderExecutor::precheck`.
    pub fn counter_trade_eligible(&self, exit: &ExitEvent, min_profit_pct: f64) -> bool {
        matches!(exit.reason, ExitReason::ReversalExit | ExitReason::AiClose) && exit.final_pnl_pct >= min_profit_pct
    }
}

/// SL price implied by a tier's locked-in PnL fraction.
fn locked_sl_price(record: &PositionRecord, lock_fraction: f64) -> Decimal {
    let entry_f = record.entry_price.to_f64().unwrap_or(0.0);
    let price = match record.side {
        Side::Long => entry_f * (1.0 + lock_fraction),
        Side::Short => entry_f * (1.0 - lock_fraction),
    };
    Decimal::try_from(price).unwrap_or(record.current_sl)
}

/// §4.7 step 8: RSI crossing side-specific thresholds (long 65/75, short 35/25 depending on
/// strategy tag) or an opposite-polarity MACD cross.
fn reversal_triggered(record: &PositionRecord, tick: &PositionTick) -> bool {
    let (loose, tight) = match record.strategy_tag {
        StrategyTag::HighVolatility => (65.0, 75.0),
        _ => (65.0, 75.0),
    };
    match record.side {
        Side::Long => tick.rsi_5m >= tight || (tick.rsi_5m >= loose && tick.macd_bear_cross),
        Side::Short => {
            let (loose_s, tight_s) = (35.0, 25.0);
            let _ = tight;
            tick.rsi_5m <= tight_s || (tick.rsi_5m <= loose_s && tick.macd_bull_cross)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::StrategyTag;
    use rust_decimal_macros::dec;

    fn sample_position() -> PositionRecord {
        PositionRecord {
            symbol: "BTC/USDT:USDT".into(),
            side: Side::Long,
            entry_price: dec!(50000),
            contracts: dec!(0.1),
            original_sl: dec!(48500),
            original_tp: dec!(53000),
            current_sl: dec!(48500),
            current_tp: dec!(53000),
            highest_favorable_price: dec!(50000),
            highest_pnl_fraction: 0.0,
            current_tier_index: -1,
            breakeven_set: false,
            trailing_activated: false,
            tp_extended: false,
            tp_tightened: false,
            last_momentum_check_at: None,
            last_ai_review_at: None,
            strategy_tag: StrategyTag::Reversal,
            opened_at: Utc::now(),
        }
    }

    #[test]
    fn locked_sl_price_respects_side() {
        let record = sample_position();
        let sl = locked_sl_price(&record, 0.012);
        assert!(sl > record.entry_price);
    }

    #[test]
    fn reversal_triggers_on_extreme_rsi_long() {
        let record = sample_position();
        let tick = PositionTick {
            price: dec!(51000),
            rsi_5m: 80.0,
            macd_bull_cross: false,
            macd_bear_cross: false,
            momentum_short_pct: 0.0,
            volume_ratio: 1.0,
            btc_5bar_change_pct: 0.0,
            now: Utc::now(),
        };
        assert!(reversal_triggered(&record, &tick));
    }

    #[test]
    fn no_reversal_when_rsi_mid_range() {
        let record = sample_position();
        let tick = PositionTick {
            price: dec!(51000),
            rsi_5m: 55.0,
            macd_bull_cross: false,
            macd_bear_cross: false,
            momentum_short_pct: 0.0,
            volume_ratio: 1.0,
            btc_5bar_change_pct: 0.0,
            now: Utc::now(),
        };
        assert!(!reversal_triggered(&record, &tick));
    }
}
