//! ATR- and regime-aware stop-loss / take-profit sizing, consumed by the detectors (§4.2)
//! and used as the fallback when the position supervisor synthesises a record on startup
//! reconciliation.

use crate::domain::market::{BtcTrend, VolatilityState};
use crate::domain::signals::Side;
use serde::{Deserialize, Serialize};

/// ATR%-bucketed volatility category. Ordering mirrors the spec's category table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopCategory {
    UltraStable,
    Stable,
    Normal,
    Volatile,
    Extreme,
}

impl StopCategory {
    fn from_atr_pct(atr_pct: f64) -> Self {
        if atr_pct < 1.5 {
            StopCategory::UltraStable
        } else if atr_pct < 3.0 {
            StopCategory::Stable
        } else if atr_pct < 5.0 {
            StopCategory::Normal
        } else if atr_pct < 8.0 {
            StopCategory::Volatile
        } else {
            StopCategory::Extreme
        }
    }

    fn base_multipliers(self) -> (f64, f64) {
        match self {
            StopCategory::UltraStable => (2.0, 4.0),
            StopCategory::Stable => (2.5, 5.0),
            StopCategory::Normal => (3.0, 6.0),
            StopCategory::Volatile => (3.5, 7.0),
            StopCategory::Extreme => (4.0, 8.0),
        }
    }

    fn max_leverage(self) -> u32 {
        match self {
            StopCategory::UltraStable => 10,
            StopCategory::Stable => 8,
            StopCategory::Normal => 5,
            StopCategory::Volatile => 3,
            StopCategory::Extreme => 2,
        }
    }
}

/// Context needed for the optional support/resistance snap (20th/80th percentile over the
/// trailing window of candle lows/highs).
pub struct SupportResistance {
    pub support: f64,
    pub resistance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveStops {
    pub sl_pct: f64,
    pub tp_pct: f64,
    pub sl_price: f64,
    pub tp_price: f64,
    pub category: StopCategory,
    pub atr_pct: f64,
    pub max_leverage: u32,
    pub risk_reward_ratio: f64,
    pub support_adjusted: bool,
}

const MIN_SL_PCT: f64 = 0.8;
const MAX_SL_PCT: f64 = 20.0;
const MIN_TP_PCT: f64 = 1.5;
const MAX_TP_PCT: f64 = 50.0;
const MIN_RISK_REWARD: f64 = 1.8;

/// Core algorithm. `price`/`atr` must both be `> 0`; otherwise callers get the conservative
/// 3%/6% default. `support_resistance` is optional and only tightens the stop, never widens it.
pub fn calculate_adaptive_stops(
    price: f64,
    atr: f64,
    side: Side,
    btc_volatility: VolatilityState,
    btc_trend: BtcTrend,
    support_resistance: Option<SupportResistance>,
) -> AdaptiveStops {
    if price <= 0.0 || atr <= 0.0 {
        return default_stops(side, price);
    }

    let atr_pct = atr / price * 100.0;
    let category = StopCategory::from_atr_pct(atr_pct);
    let (base_sl_mult, base_tp_mult) = category.base_multipliers();

    let (mut env_sl_mult, mut env_tp_mult) = match btc_volatility {
        VolatilityState::Extreme => (1.5, 0.8),
        VolatilityState::High => (1.3, 0.9),
        VolatilityState::Low => (0.8, 1.0),
        VolatilityState::Normal => (1.0, 1.0),
    };
    if matches!(btc_trend, BtcTrend::Crash | BtcTrend::Moon) {
        env_sl_mult *= 1.2;
    }
    let _ = &mut env_tp_mult; // env_tp_mult is only ever read below, kept mutable to mirror source shape

    let mut sl_pct = atr_pct * base_sl_mult * env_sl_mult;
    let mut tp_pct = atr_pct * base_tp_mult * env_tp_mult;

    sl_pct = sl_pct.clamp(MIN_SL_PCT, MAX_SL_PCT);
    tp_pct = tp_pct.clamp(MIN_TP_PCT, MAX_TP_PCT);

    if tp_pct < sl_pct * MIN_RISK_REWARD {
        tp_pct = sl_pct * MIN_RISK_REWARD;
        if tp_pct > MAX_TP_PCT {
            tp_pct = MAX_TP_PCT;
            sl_pct = tp_pct / MIN_RISK_REWARD;
        }
    }

    let mut support_adjusted = false;
    if let Some(sr) = support_resistance {
        match side {
            Side::Long => {
                let sl_price_calc = price * (1.0 - sl_pct / 100.0);
                if sl_price_calc < sr.support * 0.98 {
                    let new_sl_pct = (price - sr.support * 1.02) / price * 100.0;
                    if (MIN_SL_PCT..=MAX_SL_PCT).contains(&new_sl_pct) {
                        sl_pct = new_sl_pct;
                        support_adjusted = true;
                        tp_pct = tp_pct.max(sl_pct * MIN_RISK_REWARD);
                    }
                }
            }
            Side::Short => {
                let sl_price_calc = price * (1.0 + sl_pct / 100.0);
                if sl_price_calc > sr.resistance * 1.02 {
                    let new_sl_pct = (sr.resistance * 0.98 - price) / price * 100.0;
                    if (MIN_SL_PCT..=MAX_SL_PCT).contains(&new_sl_pct) {
                        sl_pct = new_sl_pct;
                        support_adjusted = true;
                        tp_pct = tp_pct.max(sl_pct * MIN_RISK_REWARD);
                    }
                }
            }
        }
    }

    let (sl_price, tp_price) = match side {
        Side::Long => (price * (1.0 - sl_pct / 100.0), price * (1.0 + tp_pct / 100.0)),
        Side::Short => (price * (1.0 + sl_pct / 100.0), price * (1.0 - tp_pct / 100.0)),
    };

    AdaptiveStops {
        sl_pct,
        tp_pct,
        sl_price,
        tp_price,
        category,
        atr_pct,
        max_leverage: category.max_leverage(),
        risk_reward_ratio: tp_pct / sl_pct,
        support_adjusted,
    }
}

fn default_stops(side: Side, price: f64) -> AdaptiveStops {
    let (sl_pct, tp_pct) = (3.0, 6.0);
    let (sl_price, tp_price) = match side {
        Side::Long => (price * 0.97, price * 1.06),
        Side::Short => (price * 1.03, price * 0.94),
    };
    AdaptiveStops {
        sl_pct,
        tp_pct,
        sl_price,
        tp_price,
        category: StopCategory::Normal,
        atr_pct: 0.0,
        max_leverage: 5,
        risk_reward_ratio: 2.0,
        support_adjusted: false,
    }
}

/// Leverage cap independent of the full stops calculation — used by the watcher/C6 when only
/// a leverage recommendation is needed, not the full SL/TP bundle.
pub fn calculate_safe_leverage(atr_pct: f64, volatility_state: VolatilityState, btc_trend: BtcTrend) -> u32 {
    let mut leverage = StopCategory::from_atr_pct(atr_pct).max_leverage();
    match volatility_state {
        VolatilityState::Extreme => leverage = leverage.min(3),
        VolatilityState::High => leverage = leverage.min(5),
        _ => {}
    }
    if matches!(btc_trend, BtcTrend::Crash | BtcTrend::Moon) {
        leverage = leverage.min(3);
    }
    leverage.clamp(1, 20)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_inputs_use_conservative_default() {
        let stops = calculate_adaptive_stops(0.0, 1.0, Side::Long, VolatilityState::Normal, BtcTrend::Neutral, None);
        assert_eq!(stops.sl_pct, 3.0);
        assert_eq!(stops.tp_pct, 6.0);
    }

    #[test]
    fn atr_pct_exactly_1_5_buckets_as_stable_not_ultra_stable() {
        // price=100, atr=1.5 -> atr_pct = 1.5 exactly
        let stops = calculate_adaptive_stops(100.0, 1.5, Side::Long, VolatilityState::Normal, BtcTrend::Neutral, None);
        assert_eq!(stops.category, StopCategory::Stable);
    }

    #[test]
    fn extreme_btc_volatility_widens_sl_and_tightens_tp() {
        let base = calculate_adaptive_stops(200.0, 8.0, Side::Long, VolatilityState::Normal, BtcTrend::Neutral, None);
        let extreme = calculate_adaptive_stops(200.0, 8.0, Side::Long, VolatilityState::Extreme, BtcTrend::Neutral, None);
        assert!(extreme.sl_pct > base.sl_pct);
        assert!(extreme.tp_pct < base.tp_pct);
    }

    #[test]
    fn risk_reward_floor_is_enforced() {
        let stops = calculate_adaptive_stops(100.0, 0.5, Side::Long, VolatilityState::Low, BtcTrend::Neutral, None);
        assert!(stops.risk_reward_ratio >= MIN_RISK_REWARD - 1e-9);
    }

    #[test]
    fn support_snap_only_tightens_long_stop_within_bounds() {
        let stops = calculate_adaptive_stops(
            200.0,
            8.0,
            Side::Long,
            VolatilityState::Normal,
            BtcTrend::Neutral,
            Some(SupportResistance { support: 196.0, resistance: 210.0 }),
        );
        assert!(stops.sl_price >= 196.0 * 0.98);
    }

    #[test]
    fn crash_trend_additionally_widens_sl() {
        let stable = calculate_adaptive_stops(200.0, 4.0, Side::Long, VolatilityState::Normal, BtcTrend::Neutral, None);
        let crash = calculate_adaptive_stops(200.0, 4.0, Side::Long, VolatilityState::Normal, BtcTrend::Crash, None);
        assert!(crash.sl_pct > stable.sl_pct);
    }
}
