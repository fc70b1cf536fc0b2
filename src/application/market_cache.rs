//! C1 Market Snapshot Cache: one-cycle-stable views of BTC context, universe candles, and
//! per-symbol funding rate. Grounded on the teacher's `MarketDataService` port, generalized
//! to own TTL caching itself instead of delegating straight to the exchange on every call.

use crate::domain::market::{BtcSnapshot, Candle};
use crate::domain::ports::ExchangeClient;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::warn;

const BTC_TTL: Duration = Duration::from_secs(60);
const UNIVERSE_TTL_TRACK1: Duration = Duration::from_secs(30 * 60);
const UNIVERSE_TTL_TRACK2: Duration = Duration::from_secs(5 * 60);

/// Built-in static majors list, the fallback when universe discovery fails (§4.1).
pub const STATIC_MAJORS: &[&str] = &[
    "BTC/USDT:USDT",
    "ETH/USDT:USDT",
    "SOL/USDT:USDT",
    "BNB/USDT:USDT",
    "XRP/USDT:USDT",
];

struct TtlEntry<T> {
    value: T,
    fetched_at: DateTime<Utc>,
}

pub struct MarketSnapshotCache {
    exchange: Arc<dyn ExchangeClient>,
    fanout: Arc<Semaphore>,
    btc: tokio::sync::RwLock<Option<TtlEntry<BtcSnapshot>>>,
    universe_track1: tokio::sync::RwLock<Option<TtlEntry<Vec<String>>>>,
    universe_track2: tokio::sync::RwLock<Option<TtlEntry<Vec<String>>>>,
}

impl MarketSnapshotCache {
    pub fn new(exchange: Arc<dyn ExchangeClient>, fanout_permits: usize) -> Self {
        Self {
            exchange,
            fanout: Arc::new(Semaphore::new(fanout_permits.max(1))),
            btc: tokio::sync::RwLock::new(None),
            universe_track1: tokio::sync::RwLock::new(None),
            universe_track2: tokio::sync::RwLock::new(None),
        }
    }

    /// Returns the cached BTC record if within TTL; otherwise fetches, and on failure falls
    /// back to the stale cached record annotated `updated=false`, or the conservative
    /// "unknown" neutral if there is no cache at all.
    pub async fn snapshot_btc(&self) -> BtcSnapshot {
        {
            let guard = self.btc.read().await;
            if let Some(entry) = guard.as_ref() {
                let age = Utc::now() - entry.fetched_at;
                if age.num_seconds() < BTC_TTL.as_secs() as i64 {
                    return entry.value.clone();
                }
            }
        }

        match self.exchange.fetch_btc_snapshot().await {
            Ok(snapshot) => {
                let mut guard = self.btc.write().await;
                *guard = Some(TtlEntry { value: snapshot.clone(), fetched_at: Utc::now() });
                snapshot
            }
            Err(e) => {
                warn!(stage = "market_cache", error = %e, "btc snapshot fetch failed");
                let guard = self.btc.read().await;
                match guard.as_ref() {
                    Some(entry) => {
                        let age = (Utc::now() - entry.fetched_at).num_seconds().max(0) as u64;
                        entry.value.stale(age)
                    }
                    None => BtcSnapshot::unknown(),
                }
            }
        }
    }

    /// Fetches candle histories concurrently under bounded parallelism. Symbols below
    /// `min_candles` are dropped from the result; the function always returns whatever
    /// succeeded rather than aborting on a partial failure.
    pub async fn snapshot_candles(
        &self,
        symbols: &[String],
        timeframe: &str,
        limit: usize,
        min_candles: usize,
    ) -> HashMap<String, Vec<Candle>> {
        let tasks = symbols.iter().cloned().map(|symbol| {
            let exchange = self.exchange.clone();
            let permit = self.fanout.clone();
            let timeframe = timeframe.to_string();
            async move {
                let _permit = permit.acquire_owned().await.ok()?;
                match exchange.fetch_candles(&symbol, &timeframe, limit).await {
                    Ok(candles) if candles.len() >= min_candles => Some((symbol, candles)),
                    Ok(_) => None,
                    Err(e) => {
                        warn!(stage = "market_cache", symbol = %symbol, error = %e, "candle fetch failed");
                        None
                    }
                }
            }
        });

        join_all(tasks).await.into_iter().flatten().collect()
    }

    /// Prefers one bulk venue call; on failure, falls back to per-symbol neutrals
    /// (rate 0.0) rather than aborting the cycle.
    pub async fn snapshot_funding(&self, symbols: &[String]) -> HashMap<String, f64> {
        match self.exchange.fetch_funding_rates_bulk(symbols).await {
            Ok(map) => map,
            Err(e) => {
                warn!(stage = "market_cache", error = %e, "bulk funding fetch failed, using neutrals");
                symbols.iter().map(|s| (s.clone(), 0.0)).collect()
            }
        }
    }

    /// Cached universe discovery. `track2` selects the wider, shorter-TTL universe used by
    /// the high-volatility track.
    pub async fn universe(&self, track2: bool, discover: impl Fn() -> Vec<String>) -> Vec<String> {
        let (lock, ttl) = if track2 {
            (&self.universe_track2, UNIVERSE_TTL_TRACK2)
        } else {
            (&self.universe_track1, UNIVERSE_TTL_TRACK1)
        };

        {
            let guard = lock.read().await;
            if let Some(entry) = guard.as_ref() {
                let age = Utc::now() - entry.fetched_at;
                if age.num_seconds() < ttl.as_secs() as i64 {
                    return entry.value.clone();
                }
            }
        }

        let discovered = discover();
        let universe = if discovered.is_empty() {
            STATIC_MAJORS.iter().map(|s| s.to_string()).collect()
        } else {
            discovered
        };

        let mut guard = lock.write().await;
        *guard = Some(TtlEntry { value: universe.clone(), fetched_at: Utc::now() });
        universe
    }
}
