//! Per-symbol funding-rate history tail, consumed by C4.2 to compute a z-score.
//!
//! Grounded on `original_source/core/claude_reviewer.py`'s module-scope `_FUNDING_HISTORY`
//! dict, generalized per §9 into a field owned by the `Coordinator` rather than a global.

use std::collections::{HashMap, VecDeque};

const CAPACITY: usize = 90;
const MIN_SAMPLES_FOR_ZSCORE: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct FundingHistory {
    per_symbol: HashMap<String, VecDeque<f64>>,
}

impl FundingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, symbol: &str, rate: f64) {
        let buf = self.per_symbol.entry(symbol.to_string()).or_default();
        buf.push_back(rate);
        while buf.len() > CAPACITY {
            buf.pop_front();
        }
    }

    /// `(current - mean) / stdev` over the stored tail. Returns `0.0` if there are fewer
    /// than 5 samples or the tail has zero variance.
    pub fn zscore(&self, symbol: &str, current: f64) -> f64 {
        let Some(history) = self.per_symbol.get(symbol) else { return 0.0 };
        funding_zscore(history.iter().copied(), current)
    }
}

/// Pure z-score computation, split out from `FundingHistory::zscore` so it can be unit
/// tested against arbitrary iterators without constructing the ring buffer.
pub fn funding_zscore(history: impl Iterator<Item = f64> + Clone, current: f64) -> f64 {
    let samples: Vec<f64> = history.collect();
    if samples.len() < MIN_SAMPLES_FOR_ZSCORE {
        return 0.0;
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    let variance = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / samples.len() as f64;
    let stdev = variance.sqrt();
    if stdev == 0.0 {
        0.0
    } else {
        (current - mean) / stdev
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zscore_is_zero_below_minimum_samples() {
        let mut hist = FundingHistory::new();
        hist.record("BTC/USDT:USDT", 0.0001);
        hist.record("BTC/USDT:USDT", 0.0002);
        assert_eq!(hist.zscore("BTC/USDT:USDT", 0.0005), 0.0);
    }

    #[test]
    fn zscore_is_zero_for_constant_history() {
        let mut hist = FundingHistory::new();
        for _ in 0..10 {
            hist.record("BTC/USDT:USDT", 0.0001);
        }
        assert_eq!(hist.zscore("BTC/USDT:USDT", 0.0001), 0.0);
    }

    #[test]
    fn capacity_is_bounded_at_90() {
        let mut hist = FundingHistory::new();
        for i in 0..200 {
            hist.record("BTC/USDT:USDT", i as f64);
        }
        assert_eq!(hist.per_symbol.get("BTC/USDT:USDT").unwrap().len(), CAPACITY);
    }

    #[test]
    fn outlier_yields_large_zscore() {
        let mut hist = FundingHistory::new();
        for _ in 0..20 {
            hist.record("DOGE/USDT:USDT", 0.0001);
        }
        let z = hist.zscore("DOGE/USDT:USDT", 0.01);
        assert!(z > 5.0);
    }
}
