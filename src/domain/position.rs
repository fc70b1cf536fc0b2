//! C7 position supervisor state: the tiered trailing-stop table and the live Position Record.
//!
//! Generalizes the teacher's `application::risk_management::trailing_stops::StopState`
//! single-ATR-multiple state machine into the spec's fixed `{trigger, lock}` tier table,
//! preserving the same monotonicity invariant (peak only rises, stop only tightens).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyTag {
    Reversal,
    Trend,
    HighVolatility,
    Synced,
}

/// One `(trigger_pnl_fraction, lock_pnl_fraction)` pair. `trigger` is the favourable PnL
/// fraction that unlocks this tier; `lock` is the PnL fraction the stop is pulled up to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tier {
    pub trigger: f64,
    pub lock: f64,
}

/// Default tier table per §4.7 item 4.
pub const DEFAULT_TIERS: &[Tier] = &[
    Tier { trigger: 0.004, lock: 0.001 },
    Tier { trigger: 0.01, lock: 0.003 },
    Tier { trigger: 0.02, lock: 0.012 },
    Tier { trigger: 0.03, lock: 0.022 },
    Tier { trigger: 0.05, lock: 0.04 },
    Tier { trigger: 0.08, lock: 0.07 },
    Tier { trigger: 0.12, lock: 0.11 },
    Tier { trigger: 0.20, lock: 0.19 },
    Tier { trigger: 0.30, lock: 0.29 },
    Tier { trigger: 0.40, lock: 0.39 },
    Tier { trigger: 0.50, lock: 0.48 },
];

/// Highest tier index whose `trigger` the given `peak` PnL fraction has reached, or `None`
/// if no tier has been reached yet. Index is into `DEFAULT_TIERS` (or a caller-supplied table).
pub fn highest_applicable_tier(tiers: &[Tier], peak_pnl_fraction: f64) -> Option<usize> {
    tiers.iter().rposition(|t| peak_pnl_fraction >= t.trigger)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRecord {
    pub symbol: String,
    pub side: crate::domain::signals::Side,
    pub entry_price: Decimal,
    pub contracts: Decimal,
    pub original_sl: Decimal,
    pub original_tp: Decimal,
    pub current_sl: Decimal,
    pub current_tp: Decimal,
    pub highest_favorable_price: Decimal,
    pub highest_pnl_fraction: f64,
    /// `-1` = no tier reached yet.
    pub current_tier_index: i32,
    pub breakeven_set: bool,
    pub trailing_activated: bool,
    pub tp_extended: bool,
    pub tp_tightened: bool,
    pub last_momentum_check_at: Option<DateTime<Utc>>,
    pub last_ai_review_at: Option<DateTime<Utc>>,
    pub strategy_tag: StrategyTag,
    pub opened_at: DateTime<Utc>,
}

impl PositionRecord {
    /// PnL fraction relative to entry, sign-adjusted for side. Positive is favourable.
    pub fn pnl_fraction(&self, current_price: Decimal) -> f64 {
        let entry: f64 = self.entry_price.try_into().unwrap_or(0.0);
        let px: f64 = current_price.try_into().unwrap_or(0.0);
        if entry == 0.0 {
            return 0.0;
        }
        match self.side {
            crate::domain::signals::Side::Long => (px - entry) / entry,
            crate::domain::signals::Side::Short => (entry - px) / entry,
        }
    }

    /// Attempts to move the current SL to `candidate_sl`. Returns `false` (no-op) if doing so
    /// would violate the monotone-favourable-direction invariant (§3 Position Record, §7
    /// `invariant_violation`).
    pub fn try_tighten_sl(&mut self, candidate_sl: Decimal) -> bool {
        let improves = match self.side {
            crate::domain::signals::Side::Long => candidate_sl > self.current_sl,
            crate::domain::signals::Side::Short => candidate_sl < self.current_sl,
        };
        if improves {
            self.current_sl = candidate_sl;
        }
        improves
    }

    /// Attempts to advance the stored tier index. Returns `false` if `new_index` does not
    /// strictly exceed the current one (tier index is monotone non-decreasing).
    pub fn try_advance_tier(&mut self, new_index: i32) -> bool {
        if new_index > self.current_tier_index {
            self.current_tier_index = new_index;
            true
        } else {
            false
        }
    }

    pub fn update_peak(&mut self, current_price: Decimal) {
        let favourable = match self.side {
            crate::domain::signals::Side::Long => current_price > self.highest_favorable_price,
            crate::domain::signals::Side::Short => {
                current_price < self.highest_favorable_price || self.highest_favorable_price.is_zero()
            }
        };
        if favourable {
            self.highest_favorable_price = current_price;
        }
        let pnl = self.pnl_fraction(current_price);
        if pnl > self.highest_pnl_fraction {
            self.highest_pnl_fraction = pnl;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::signals::Side;
    use rust_decimal_macros::dec;

    fn sample_long() -> PositionRecord {
        PositionRecord {
            symbol: "SOL/USDT:USDT".into(),
            side: Side::Long,
            entry_price: dec!(200),
            contracts: dec!(1),
            original_sl: dec!(193.2),
            original_tp: dec!(210.8),
            current_sl: dec!(193.2),
            current_tp: dec!(210.8),
            highest_favorable_price: dec!(200),
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
    fn tier_climbs_with_rising_peak() {
        assert_eq!(highest_applicable_tier(DEFAULT_TIERS, 0.0), None);
        assert_eq!(highest_applicable_tier(DEFAULT_TIERS, 0.004), Some(0));
        assert_eq!(highest_applicable_tier(DEFAULT_TIERS, 0.01), Some(1));
        assert_eq!(highest_applicable_tier(DEFAULT_TIERS, 0.02), Some(2));
        assert_eq!(highest_applicable_tier(DEFAULT_TIERS, 0.03), Some(3));
    }

    #[test]
    fn sl_cannot_move_backward_for_a_long() {
        let mut pos = sample_long();
        assert!(pos.try_tighten_sl(dec!(202)));
        assert_eq!(pos.current_sl, dec!(202));
        assert!(!pos.try_tighten_sl(dec!(198)));
        assert_eq!(pos.current_sl, dec!(202));
    }

    #[test]
    fn tier_index_cannot_regress() {
        let mut pos = sample_long();
        assert!(pos.try_advance_tier(2));
        assert!(!pos.try_advance_tier(1));
        assert_eq!(pos.current_tier_index, 2);
    }
}
