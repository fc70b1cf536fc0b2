//! C3 deduplicator (§4.3): suppresses repeat candidates for the same symbol within a
//! cooldown window, breaking ties by kind priority and, within the same kind, by score.

use crate::domain::signals::{Candidate, Side};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct Entry {
    side: Side,
    score: f64,
    priority: u8,
    seen_at: DateTime<Utc>,
}

/// Keyed on symbol only — two different kinds on the same symbol still collide (§4.3 rule 4),
/// so there is exactly one live entry per symbol at a time.
pub struct Deduplicator {
    cooldown_minutes: i64,
    entries: HashMap<String, Entry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupDecision {
    Admit,
    SuppressDuplicate,
    SuppressLowerPriority,
}

impl Deduplicator {
    pub fn new(cooldown_minutes: i64) -> Self {
        Self { cooldown_minutes, entries: HashMap::new() }
    }

    /// Rule 1: no entry yet, or the existing entry has expired -> admit.
    /// Rule 2: same side within cooldown -> suppress as a plain duplicate.
    /// Rule 3/4: opposite side or different kind within cooldown -> the higher `priority_rank`
    /// wins; on a tie, the higher score wins; a loss suppresses the newcomer without touching
    /// the stored entry.
    /// Rule 5: admitting always refreshes `seen_at` to the new candidate's detection time.
    /// Rule 6: entries are evicted lazily, once stale by more than `2 * cooldown_minutes`,
    /// the next time that symbol is looked up (`evict_stale` below), not on a timer.
    pub fn evaluate(&mut self, candidate: &Candidate) -> DedupDecision {
        let now = candidate.detected_at;
        self.evict_stale(now);

        let incoming_priority = candidate.kind.priority_rank();

        let decision = match self.entries.get(&candidate.symbol) {
            None => DedupDecision::Admit,
            Some(existing) => {
                let expired = now - existing.seen_at >= chrono::Duration::minutes(self.cooldown_minutes);
                if expired {
                    DedupDecision::Admit
                } else if existing.side == candidate.side && existing.priority == incoming_priority {
                    DedupDecision::SuppressDuplicate
                } else if incoming_priority > existing.priority {
                    DedupDecision::Admit
                } else if incoming_priority == existing.priority && candidate.score > existing.score {
                    DedupDecision::Admit
                } else {
                    DedupDecision::SuppressLowerPriority
                }
            }
        };

        if matches!(decision, DedupDecision::Admit) {
            self.entries.insert(
                candidate.symbol.clone(),
                Entry { side: candidate.side, score: candidate.score, priority: incoming_priority, seen_at: now },
            );
        }

        decision
    }

    fn evict_stale(&mut self, now: DateTime<Utc>) {
        let cutoff = chrono::Duration::minutes(self.cooldown_minutes * 2);
        self.entries.retain(|_, entry| now - entry.seen_at < cutoff);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::adaptive_stops::calculate_adaptive_stops;
    use crate::domain::market::{BtcSnapshot, OrderBookSnapshot, SymbolMetrics, VolatilityState, BtcTrend};
    use crate::domain::signals::SignalKind;
    use rust_decimal::Decimal;

    fn candidate(symbol: &str, side: Side, kind: SignalKind, score: f64, at: DateTime<Utc>) -> Candidate {
        let metrics = SymbolMetrics {
            symbol: symbol.to_string(),
            price: Decimal::new(100, 0),
            rsi: 30.0,
            adx: 20.0,
            volume_ratio: 1.0,
            bb_width_pct: 2.0,
            atr_pct: 2.0,
            change_24h_pct: 0.0,
            quote_volume_24h: Decimal::ZERO,
            funding_rate: 0.0,
            macd_line: 0.0,
            macd_signal: 0.0,
            macd_hist_prev: 0.0,
            orderbook: OrderBookSnapshot { bid_depth: Decimal::ONE, ask_depth: Decimal::ONE },
        };
        let stops = calculate_adaptive_stops(100.0, 2.0, side, VolatilityState::Normal, BtcTrend::Neutral, None);
        Candidate {
            symbol: symbol.to_string(),
            side,
            score,
            detected_price: Decimal::new(100, 0),
            rsi: 30.0,
            adx: 20.0,
            volume_ratio: 1.0,
            bb_width_pct: 2.0,
            atr_pct: 2.0,
            kind,
            stops,
            momentum_5m_pct: 0.0,
            momentum_15m_pct: 0.0,
            metrics,
            btc_snapshot: BtcSnapshot::unknown(),
            detected_at: at,
        }
    }

    #[test]
    fn first_sighting_is_admitted() {
        let mut dedup = Deduplicator::new(10);
        let now = Utc::now();
        let c = candidate("BTC/USDT:USDT", Side::Long, SignalKind::Reversal, 0.8, now);
        assert_eq!(dedup.evaluate(&c), DedupDecision::Admit);
    }

    #[test]
    fn same_side_within_cooldown_is_suppressed() {
        let mut dedup = Deduplicator::new(10);
        let now = Utc::now();
        let c1 = candidate("BTC/USDT:USDT", Side::Long, SignalKind::Reversal, 0.8, now);
        dedup.evaluate(&c1);
        let c2 = candidate("BTC/USDT:USDT", Side::Long, SignalKind::Reversal, 0.9, now + chrono::Duration::minutes(2));
        assert_eq!(dedup.evaluate(&c2), DedupDecision::SuppressDuplicate);
    }

    #[test]
    fn higher_priority_kind_wins_within_cooldown() {
        let mut dedup = Deduplicator::new(10);
        let now = Utc::now();
        let c1 = candidate("BTC/USDT:USDT", Side::Long, SignalKind::HighVol, 0.9, now);
        dedup.evaluate(&c1);
        let c2 = candidate("BTC/USDT:USDT", Side::Short, SignalKind::Reversal, 0.5, now + chrono::Duration::minutes(2));
        assert_eq!(dedup.evaluate(&c2), DedupDecision::Admit);
    }

    #[test]
    fn lower_priority_kind_is_suppressed() {
        let mut dedup = Deduplicator::new(10);
        let now = Utc::now();
        let c1 = candidate("BTC/USDT:USDT", Side::Long, SignalKind::TrendAnticipation, 0.5, now);
        dedup.evaluate(&c1);
        let c2 = candidate("BTC/USDT:USDT", Side::Short, SignalKind::HighVol, 0.99, now + chrono::Duration::minutes(2));
        assert_eq!(dedup.evaluate(&c2), DedupDecision::SuppressLowerPriority);
    }

    #[test]
    fn expired_entry_is_admitted_again() {
        let mut dedup = Deduplicator::new(10);
        let now = Utc::now();
        let c1 = candidate("BTC/USDT:USDT", Side::Long, SignalKind::Reversal, 0.8, now);
        dedup.evaluate(&c1);
        let c2 = candidate("BTC/USDT:USDT", Side::Long, SignalKind::Reversal, 0.8, now + chrono::Duration::minutes(11));
        assert_eq!(dedup.evaluate(&c2), DedupDecision::Admit);
    }

    #[test]
    fn stale_entries_are_evicted_after_double_cooldown() {
        let mut dedup = Deduplicator::new(10);
        let now = Utc::now();
        let c1 = candidate("BTC/USDT:USDT", Side::Long, SignalKind::Reversal, 0.8, now);
        dedup.evaluate(&c1);
        let c2 = candidate("ETH/USDT:USDT", Side::Long, SignalKind::Reversal, 0.8, now + chrono::Duration::minutes(21));
        dedup.evaluate(&c2);
        assert_eq!(dedup.len(), 1);
    }
}
