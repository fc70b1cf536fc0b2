//! High-Volatility Track (C6, §4.6). A parallel pipeline to the main detectors: its own
//! universe discovery, its own bounded observation pool, its own readiness/health scoring,
//! and its own lane into C8. Grounded on the same `SignalDetector`-style gate-then-score
//! shape as `application::detectors`, generalized to a multi-tick pool instead of a
//! one-shot emit/reject.

use crate::application::order_executor::{AlgoOrderCache, OrderExecutor};
use crate::domain::errors::CoreError;
use crate::domain::high_vol::{BbVolumeMomentumTrend, HighVolSignal, HighVolStatus};
use crate::domain::indicators::{bollinger_width_pct, breakout_quality, cvd_divergence, efficiency_ratio};
use crate::domain::market::Candle;
use crate::domain::ports::{OrderAck, OrderType, PromptKind, ReviewPrompt, SignalReviewer};
use crate::domain::signals::Side;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

const STAGE: &str = "high_vol_track";
pub const POOL_CAPACITY: usize = 10;
const HEALTH_EVICT_THRESHOLD: f64 = 40.0;
pub const READY_THRESHOLD: f64 = 75.0;
const FAKE_BREAKOUT_STRENGTH_MAX: f64 = 60.0;
const MIN_EFFICIENCY_RATIO: f64 = 0.2;
const VALID_SEC_DEFAULT: i64 = 300;
const MAX_AI_REVIEWS_DEFAULT: u32 = 3;
const BREAKEVEN_TRIGGER_PCT: f64 = 0.004;
const COUNTER_TRADE_MIN_PROFIT_PCT_DEFAULT: f64 = 0.5;

/// Everything the hard filter and scoring stages need beyond the raw candle history.
#[derive(Debug, Clone)]
pub struct HighVolCandidateFacts {
    pub symbol: String,
    pub price: Decimal,
    pub change_24h_pct: f64,
    pub quote_volume_24h: Decimal,
    pub price_change_5m_pct: f64,
    pub volume_ratio_short: f64,
    pub volume_ratio_mid: f64,
    pub near_support_or_resistance: bool,
    pub btc_volatility_extreme_or_high: bool,
    pub correlation_to_btc: f64,
    pub candlestick_breakout_pattern: bool,
    pub rsi: f64,
    pub expected_rsi_direction_up: bool,
}

/// Result of the hard filter (§4.6 "Hard filter"). `Err` carries the rejection reason.
pub fn hard_filter(facts: &HighVolCandidateFacts, candles: &[Candle]) -> Result<(), String> {
    let abs_change = facts.change_24h_pct.abs();
    if !(8.0..=40.0).contains(&abs_change) {
        return Err(format!("24h change {abs_change:.2}% outside [8%, 40%]"));
    }
    if facts.quote_volume_24h < Decimal::new(2_000_000, 0) {
        return Err("24h quote volume below 2M".to_string());
    }
    if facts.price_change_5m_pct.abs() > 3.0 {
        return Err("5m price change already exceeds 3%, already broken out".to_string());
    }

    let width_history = bb_width_history(candles, 20, 20);
    if !width_history.is_empty() {
        let mean: f64 = width_history.iter().sum::<f64>() / width_history.len() as f64;
        let current = *width_history.last().unwrap();
        if mean > 0.0 && current > 1.3 * mean {
            return Err("BB width already exceeds 1.3x its 20-bar mean, already broken out".to_string());
        }
    }

    let cvd = cvd_divergence(candles, 20);
    if cvd.strength > FAKE_BREAKOUT_STRENGTH_MAX {
        return Err(format!("CVD divergence strength {:.1} flags a fake breakout", cvd.strength));
    }

    let er = efficiency_ratio(candles, 20);
    if er < MIN_EFFICIENCY_RATIO {
        return Err(format!("efficiency ratio {er:.2} below {MIN_EFFICIENCY_RATIO}"));
    }

    Ok(())
}

/// Rolling Bollinger-width series, one value per trailing bar over the last `lookback` bars.
fn bb_width_history(candles: &[Candle], period: usize, lookback: usize) -> Vec<f64> {
    let n = candles.len();
    if n < period + lookback {
        return Vec::new();
    }
    (0..lookback)
        .map(|i| {
            let end = n - lookback + i + 1;
            bollinger_width_pct(&candles[..end], period, 2.0)
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct ReadinessScore {
    pub total: f64,
    pub rationale: Vec<String>,
}

/// §4.6 readiness score: four components, each capped at 25.
pub fn readiness_score(facts: &HighVolCandidateFacts, candles: &[Candle]) -> ReadinessScore {
    let mut total = 0.0;
    let mut rationale = Vec::new();

    let squeeze = squeeze_component(candles);
    total += squeeze;
    rationale.push(format!("squeeze={squeeze:.1}/25"));

    let volume = volume_regime_component(facts.volume_ratio_short, facts.volume_ratio_mid);
    total += volume;
    rationale.push(format!("volume_regime={volume:.1}/25"));

    let proximity = sr_proximity_component(facts.near_support_or_resistance);
    total += proximity;
    rationale.push(format!("sr_proximity={proximity:.1}/25"));

    let regime = btc_regime_component(facts.btc_volatility_extreme_or_high, facts.correlation_to_btc);
    total += regime;
    rationale.push(format!("btc_regime={regime:.1}/25"));

    ReadinessScore { total, rationale }
}

/// Bollinger squeeze percentile over the last 100 bars: a current width near the bottom of
/// its own recent distribution scores highest (most compressed, closest to breaking out).
fn squeeze_component(candles: &[Candle]) -> f64 {
    let history = bb_width_history(candles, 20, 100);
    if history.is_empty() {
        return 12.5;
    }
    let current = *history.last().unwrap();
    let below = history.iter().filter(|&&w| w <= current).count();
    let percentile = below as f64 / history.len() as f64;
    (1.0 - percentile) * 25.0
}

/// Rewards either a volume surge or unusually dry volume — both precede a breakout in the
/// right regime — over a volume ratio sitting near its neutral baseline.
fn volume_regime_component(ratio_short: f64, ratio_mid: f64) -> f64 {
    let deviation = ((ratio_short - 1.0).abs() + (ratio_mid - 1.0).abs()) / 2.0;
    (deviation / 1.5).clamp(0.0, 1.0) * 25.0
}

fn sr_proximity_component(near_support_or_resistance: bool) -> f64 {
    if near_support_or_resistance {
        25.0
    } else {
        5.0
    }
}

/// Favours a calm BTC backdrop (not extreme/high volatility) with low correlation drag;
/// a chaotic BTC regime or a highly correlated symbol makes an independent breakout less
/// reliable.
fn btc_regime_component(btc_volatility_extreme_or_high: bool, correlation_to_btc: f64) -> f64 {
    let base = if btc_volatility_extreme_or_high { 10.0 } else { 22.0 };
    base * (1.0 - correlation_to_btc.clamp(0.0, 1.0) * 0.3)
}

/// §4.6 "Breakout precursors": any one of these promotes a row straight to `ready`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BreakoutPrecursors {
    pub extreme_squeeze_with_volume_surge: bool,
    pub bb_breach_with_volume: bool,
    pub candlestick_pattern: bool,
    pub first_expansion_after_squeeze: bool,
}

impl BreakoutPrecursors {
    pub fn any(&self) -> bool {
        self.extreme_squeeze_with_volume_surge
            || self.bb_breach_with_volume
            || self.candlestick_pattern
            || self.first_expansion_after_squeeze
    }
}

/// If any precursor fired, raises the row's readiness straight to the trigger threshold and
/// flips it to `ready` (§4.6 "Breakout precursors promote a row to ready"). No-op otherwise.
pub fn promote_on_precursor(row: &mut HighVolSignal, precursors: BreakoutPrecursors) -> bool {
    if !precursors.any() || row.status != HighVolStatus::Watching {
        return false;
    }
    row.readiness_score = row.readiness_score.max(READY_THRESHOLD);
    row.status = HighVolStatus::Ready;
    true
}

pub fn detect_precursors(facts: &HighVolCandidateFacts, candles: &[Candle], bb_trend: BbVolumeMomentumTrend) -> BreakoutPrecursors {
    let width_history = bb_width_history(candles, 20, 20);
    let squeeze_percentile = if width_history.is_empty() {
        0.5
    } else {
        let current = *width_history.last().unwrap();
        width_history.iter().filter(|&&w| w <= current).count() as f64 / width_history.len() as f64
    };

    let volume_surge = facts.volume_ratio_short >= 1.5;
    let extreme_squeeze = squeeze_percentile <= 0.1;

    BreakoutPrecursors {
        extreme_squeeze_with_volume_surge: extreme_squeeze && volume_surge,
        bb_breach_with_volume: squeeze_percentile >= 0.9 && volume_surge,
        candlestick_pattern: facts.candlestick_breakout_pattern,
        first_expansion_after_squeeze: matches!(bb_trend, BbVolumeMomentumTrend::Expanding) && squeeze_percentile <= 0.25,
    }
}

/// §4.6 health score: five equally-weighted (20 each) signals recomputed every tick. Rows
/// below `HEALTH_EVICT_THRESHOLD` are evicted from the pool.
pub struct HealthInputs {
    pub bb_regime_changed: bool,
    pub volume_dying_or_surging: bool,
    pub momentum_reversed: bool,
    pub broke_anchoring_level: bool,
    pub drift_from_pool_entry_pct: f64,
}

pub fn health_score(inputs: &HealthInputs) -> f64 {
    let mut score = 100.0;
    if inputs.bb_regime_changed {
        score -= 20.0;
    }
    if inputs.volume_dying_or_surging {
        score -= 20.0;
    }
    if inputs.momentum_reversed {
        score -= 20.0;
    }
    if inputs.broke_anchoring_level {
        score -= 20.0;
    }
    let drift_penalty = (inputs.drift_from_pool_entry_pct.abs() / 2.0 * 20.0).min(20.0);
    score -= drift_penalty;
    score.clamp(0.0, 100.0)
}

/// Result of a successful `on_ready` placement: the venue ack plus the side/size the caller
/// needs to build a `PositionRecord` if the fill landed immediately.
#[derive(Debug, Clone)]
pub struct HighVolEntry {
    pub ack: OrderAck,
    pub contracts: Decimal,
    pub side: Side,
}

#[derive(Debug, Deserialize)]
struct PricingResponse {
    direction: String,
    #[serde(default)]
    entry_offset_pct: f64,
    #[serde(default)]
    take_profit_pct: f64,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    reasoning: String,
}

pub struct HighVolTrackConfig {
    pub valid_sec: i64,
    pub max_ai_reviews: u32,
    pub total_capital: Decimal,
    pub max_position_pct: f64,
    pub max_position_usdt: Decimal,
    pub min_position_usdt: Decimal,
    pub amount_precision: u32,
    pub venue_min_amount: Decimal,
    pub counter_trade_min_profit_pct: f64,
}

impl Default for HighVolTrackConfig {
    fn default() -> Self {
        Self {
            valid_sec: VALID_SEC_DEFAULT,
            max_ai_reviews: MAX_AI_REVIEWS_DEFAULT,
            total_capital: Decimal::new(10_000, 0),
            max_position_pct: 0.05,
            max_position_usdt: Decimal::new(2_000, 0),
            min_position_usdt: Decimal::new(50, 0),
            amount_precision: 3,
            venue_min_amount: Decimal::new(1, 3),
            counter_trade_min_profit_pct: COUNTER_TRADE_MIN_PROFIT_PCT_DEFAULT,
        }
    }
}

pub struct HighVolTrack {
    reviewer: Arc<dyn SignalReviewer>,
    executor: Arc<OrderExecutor>,
    config: HighVolTrackConfig,
}

impl HighVolTrack {
    pub fn new(reviewer: Arc<dyn SignalReviewer>, executor: Arc<OrderExecutor>, config: HighVolTrackConfig) -> Self {
        Self { reviewer, executor, config }
    }

    /// §4.6 "On ready" steps 1-7. Returns `Ok(Some(entry))` on a successful atomic placement
    /// (`entry.ack.filled` tells the caller whether the position is live immediately or still
    /// a resting limit order), `Ok(None)` if the row should return to `watching` (abandoned
    /// this pass but not retired), or `Err` on an exhausted re-pricing budget / placement
    /// failure.
    pub async fn on_ready(
        &self,
        row: &mut HighVolSignal,
        candles: &[Candle],
        atr_pct: f64,
        now: DateTime<Utc>,
    ) -> Result<Option<HighVolEntry>, CoreError> {
        let bundle = breakout_quality(candles);

        if bundle.cvd.fake_breakout && bundle.score < 40.0 {
            row.status = HighVolStatus::Abandoned;
            return Ok(None);
        }

        row.ai_review_count += 1;
        if row.ai_review_count > self.config.max_ai_reviews {
            row.status = HighVolStatus::Expired;
            return Ok(None);
        }

        let prompt = build_pricing_prompt(row, &bundle);
        let resp = self
            .reviewer
            .review(prompt)
            .await
            .map_err(|e| CoreError::AiUnavailable { reason: e.to_string() })?;

        let parsed: PricingResponse = serde_json::from_str(&resp.reasoning)
            .unwrap_or(PricingResponse { direction: "unclear".into(), entry_offset_pct: 0.0, take_profit_pct: 0.0, confidence: 0.0, reasoning: resp.reasoning.clone() });

        let side = match parsed.direction.as_str() {
            "long" => Side::Long,
            "short" => Side::Short,
            _ => {
                row.status = HighVolStatus::Watching;
                return Ok(None);
            }
        };

        let offset_cap = if bundle.fdi >= 1.40 {
            parsed.entry_offset_pct.max(2.0)
        } else if bundle.fdi <= 1.25 {
            parsed.entry_offset_pct.min(1.5)
        } else {
            parsed.entry_offset_pct
        };

        let sl_pct = sl_pct_from_atr_bucket(atr_pct);
        let price_f = row.signal_price.to_f64().unwrap_or(0.0);
        let entry_f = match side {
            Side::Long => price_f * (1.0 - offset_cap / 100.0),
            Side::Short => price_f * (1.0 + offset_cap / 100.0),
        };
        let (sl_f, tp_f) = match side {
            Side::Long => (entry_f * (1.0 - sl_pct / 100.0), entry_f * (1.0 + parsed.take_profit_pct.max(sl_pct * 1.8) / 100.0)),
            Side::Short => (entry_f * (1.0 + sl_pct / 100.0), entry_f * (1.0 - parsed.take_profit_pct.max(sl_pct * 1.8) / 100.0)),
        };

        let entry = Decimal::try_from(entry_f).unwrap_or(row.signal_price);
        let sl = Decimal::try_from(sl_f).unwrap_or(row.sl);
        let tp = Decimal::try_from(tp_f).unwrap_or(row.tp);

        let contracts = position_size(&self.config, row.change_24h_pct.abs(), entry);
        if contracts < self.config.venue_min_amount {
            row.status = HighVolStatus::Abandoned;
            return Ok(None);
        }

        row.proposed_entry = entry;
        row.sl = sl;
        row.tp = tp;

        Ok(Some(self.place_entry(row, side, contracts, entry, sl, tp, now).await?))
    }

    async fn place_entry(
        &self,
        row: &mut HighVolSignal,
        side: Side,
        contracts: Decimal,
        entry: Decimal,
        sl: Decimal,
        tp: Decimal,
        now: DateTime<Utc>,
    ) -> Result<HighVolEntry, CoreError> {
        let mut cache = AlgoOrderCache::default();
        let ack = self
            .executor
            .create_order_with_sl_tp(&mut cache, &row.symbol, side, OrderType::Limit, contracts, Some(entry), sl, tp)
            .await?;
        row.limit_order_id = Some(ack.order_id.clone());
        row.status = if ack.filled { HighVolStatus::Filled } else { HighVolStatus::LimitPlaced };
        row.filled_at = ack.filled.then_some(now);
        info!(stage = STAGE, symbol = %row.symbol, order_id = %ack.order_id, filled = ack.filled, "high-vol limit entry placed");
        Ok(HighVolEntry { ack, contracts, side })
    }

    /// §4.6 "Post-reversal counter-trade" analogue for track 2: opens a standard-size
    /// opposite limit order with a fixed 2%/4% SL/TP after a profitable close.
    pub async fn counter_trade(&self, symbol: &str, closed_side: Side, final_pnl_pct: f64, price: Decimal) -> Result<Option<String>, CoreError> {
        if final_pnl_pct < self.config.counter_trade_min_profit_pct {
            return Ok(None);
        }
        let side = closed_side.opposite();
        let price_f = price.to_f64().unwrap_or(0.0);
        let (sl_f, tp_f) = match side {
            Side::Long => (price_f * 0.98, price_f * 1.04),
            Side::Short => (price_f * 1.02, price_f * 0.96),
        };
        let contracts = position_size(&self.config, 0.0, price);
        if contracts < self.config.venue_min_amount {
            return Ok(None);
        }
        let mut cache = AlgoOrderCache::default();
        let ack = self
            .executor
            .create_order_with_sl_tp(
                &mut cache,
                symbol,
                side,
                OrderType::Market,
                contracts,
                None,
                Decimal::try_from(sl_f).unwrap_or_default(),
                Decimal::try_from(tp_f).unwrap_or_default(),
            )
            .await?;
        Ok(Some(ack.order_id))
    }

    /// §4.6 "Orders that do not fill within `valid_sec` are cancelled". Returns `true` if
    /// the row timed out and was returned to `watching` (or retired, if out of re-pricing
    /// budget).
    pub fn check_timeout(&self, row: &mut HighVolSignal, placed_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if row.status != HighVolStatus::LimitPlaced {
            return false;
        }
        if (now - placed_at).num_seconds() < self.config.valid_sec {
            return false;
        }
        warn!(stage = STAGE, symbol = %row.symbol, "limit order unfilled past valid_sec window");
        row.limit_order_id = None;
        row.status = if row.ai_review_count >= self.config.max_ai_reviews {
            HighVolStatus::Expired
        } else {
            HighVolStatus::Ready
        };
        true
    }
}

fn build_pricing_prompt(row: &HighVolSignal, bundle: &crate::domain::indicators::BreakoutQuality) -> ReviewPrompt {
    let body = format!(
        "symbol={} readiness={:.1} health={:.1} change_24h_pct={:.2} atr_pct={:.2} cvd_delta={:.2} \
         fake_breakout={} efficiency_ratio={:.2} hurst={:.2} fdi={:.2} breakout_quality_score={:.1}",
        row.symbol,
        row.readiness_score,
        row.health_score,
        row.change_24h_pct,
        row.atr_pct,
        bundle.cvd.cvd_delta,
        bundle.cvd.fake_breakout,
        bundle.efficiency_ratio,
        bundle.hurst,
        bundle.fdi,
        bundle.score,
    );
    ReviewPrompt { kind: PromptKind::HighVol, body }
}

/// §4.6 step 5: SL% by ATR% bucket, hard-capped at 2%.
fn sl_pct_from_atr_bucket(atr_pct: f64) -> f64 {
    if atr_pct < 1.0 {
        1.2
    } else if atr_pct < 2.0 {
        1.6
    } else {
        2.0
    }
}

/// §4.6 step 6: position sizing, halved in the 20-40% 24h-volatility band, snapped to
/// exchange amount precision, rejected (returns 0) below venue minimum by the caller.
fn position_size(config: &HighVolTrackConfig, abs_change_24h_pct: f64, entry: Decimal) -> Decimal {
    let mut margin = (config.total_capital * Decimal::try_from(config.max_position_pct).unwrap_or_default())
        .min(config.max_position_usdt);
    margin = margin.max(config.min_position_usdt);

    if (20.0..40.0).contains(&abs_change_24h_pct) {
        margin /= Decimal::TWO;
    }

    let leverage = crate::domain::adaptive_stops::calculate_safe_leverage(
        2.0,
        crate::domain::market::VolatilityState::Normal,
        crate::domain::market::BtcTrend::Neutral,
    );

    if entry.is_zero() {
        return Decimal::ZERO;
    }
    let raw_contracts = margin * Decimal::from(leverage) / entry;
    snap_to_precision(raw_contracts, config.amount_precision)
}

fn snap_to_precision(amount: Decimal, precision: u32) -> Decimal {
    amount.round_dp(precision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn flat_candles(n: usize, price: i64) -> Vec<Candle> {
        (0..n)
            .map(|_| Candle {
                timestamp: Utc::now(),
                open: Decimal::from(price),
                high: Decimal::from(price),
                low: Decimal::from(price),
                close: Decimal::from(price),
                volume: dec!(1000),
            })
            .collect()
    }

    fn sample_facts() -> HighVolCandidateFacts {
        HighVolCandidateFacts {
            symbol: "DOGE/USDT:USDT".into(),
            price: dec!(0.2),
            change_24h_pct: 12.0,
            quote_volume_24h: Decimal::new(5_000_000, 0),
            price_change_5m_pct: 0.5,
            volume_ratio_short: 2.0,
            volume_ratio_mid: 1.8,
            near_support_or_resistance: true,
            btc_volatility_extreme_or_high: false,
            correlation_to_btc: 0.3,
            candlestick_breakout_pattern: true,
            rsi: 55.0,
            expected_rsi_direction_up: true,
        }
    }

    #[test]
    fn hard_filter_rejects_small_24h_change() {
        let mut facts = sample_facts();
        facts.change_24h_pct = 3.0;
        let candles = flat_candles(50, 100);
        assert!(hard_filter(&facts, &candles).is_err());
    }

    #[test]
    fn hard_filter_rejects_thin_volume() {
        let mut facts = sample_facts();
        facts.quote_volume_24h = Decimal::new(100_000, 0);
        let candles = flat_candles(50, 100);
        assert!(hard_filter(&facts, &candles).is_err());
    }

    #[test]
    fn hard_filter_passes_clean_candidate() {
        let facts = sample_facts();
        let candles = flat_candles(150, 100);
        assert!(hard_filter(&facts, &candles).is_ok());
    }

    #[test]
    fn readiness_score_caps_each_component_at_25() {
        let facts = sample_facts();
        let candles = flat_candles(150, 100);
        let score = readiness_score(&facts, &candles);
        assert!(score.total <= 100.0);
        assert_eq!(score.rationale.len(), 4);
    }

    #[test]
    fn health_score_drops_per_negative_signal() {
        let healthy = health_score(&HealthInputs {
            bb_regime_changed: false,
            volume_dying_or_surging: false,
            momentum_reversed: false,
            broke_anchoring_level: false,
            drift_from_pool_entry_pct: 0.0,
        });
        assert_eq!(healthy, 100.0);

        let unhealthy = health_score(&HealthInputs {
            bb_regime_changed: true,
            volume_dying_or_surging: true,
            momentum_reversed: false,
            broke_anchoring_level: false,
            drift_from_pool_entry_pct: 0.0,
        });
        assert_eq!(unhealthy, 60.0);
        assert!(unhealthy < HEALTH_EVICT_THRESHOLD + 30.0);
    }

    #[test]
    fn sl_pct_bucket_hard_caps_at_2_pct() {
        assert_eq!(sl_pct_from_atr_bucket(10.0), 2.0);
        assert!(sl_pct_from_atr_bucket(0.5) < 2.0);
    }

    #[test]
    fn position_size_halves_in_high_volatility_band() {
        let config = HighVolTrackConfig::default();
        let normal = position_size(&config, 10.0, dec!(1));
        let halved = position_size(&config, 25.0, dec!(1));
        assert!(halved < normal);
    }
}
