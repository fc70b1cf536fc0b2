//! Push-based metrics reporter.
//!
//! Periodically outputs a JSON snapshot of open positions to stdout and refreshes the
//! Prometheus gauges backing them. No HTTP server, no incoming requests.

use crate::application::coordinator::Coordinator;
use crate::domain::position::PositionRecord;
use crate::infrastructure::observability::metrics::Metrics;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub positions: Vec<PositionSnapshot>,
}

#[derive(Serialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub side: String,
    pub entry_price: f64,
    pub current_tier_index: i32,
    pub pnl_fraction: f64,
}

pub struct MetricsReporter {
    coordinator: Arc<Coordinator>,
    metrics: Metrics,
    start_time: Instant,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(coordinator: Arc<Coordinator>, metrics: Metrics, interval_seconds: u64) -> Self {
        Self { coordinator, metrics, start_time: Instant::now(), interval: Duration::from_secs(interval_seconds) }
    }

    /// Runs forever, outputting a snapshot every `interval_seconds`. Intended to be spawned
    /// alongside the coordinator's cycle loop.
    pub async fn run(self) {
        info!(interval = ?self.interval, "metrics reporter starting");
        loop {
            tokio::time::sleep(self.interval).await;
            match self.collect_snapshot().await {
                Ok(snapshot) => match serde_json::to_string(&snapshot) {
                    Ok(json) => {
                        println!("METRICS_JSON:{json}");
                        info!(positions = snapshot.positions.len(), uptime_s = snapshot.uptime_seconds, "metrics snapshot");
                    }
                    Err(e) => warn!(error = %e, "failed to serialize metrics snapshot"),
                },
                Err(e) => warn!(error = %e, "failed to collect metrics snapshot"),
            }
        }
    }

    async fn collect_snapshot(&self) -> anyhow::Result<MetricsSnapshot> {
        let positions = self.coordinator.positions_snapshot().await;
        let uptime = self.start_time.elapsed().as_secs();

        let snapshots: Vec<PositionSnapshot> = positions
            .values()
            .map(Self::to_snapshot)
            .collect();

        self.metrics.positions_count.set(positions.len() as f64);
        for p in &snapshots {
            self.metrics.set_position_pnl(&p.symbol, p.pnl_fraction);
        }
        self.metrics.uptime_seconds.set(uptime as f64);

        Ok(MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: uptime,
            version: env!("CARGO_PKG_VERSION").to_string(),
            positions: snapshots,
        })
    }

    fn to_snapshot(p: &PositionRecord) -> PositionSnapshot {
        let entry_price = p.entry_price.to_f64().unwrap_or(0.0);
        PositionSnapshot {
            symbol: p.symbol.clone(),
            side: format!("{:?}", p.side),
            entry_price,
            current_tier_index: p.current_tier_index,
            pnl_fraction: p.highest_pnl_fraction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::coordinator::{Coordinator, CoordinatorConfig};
    use crate::application::high_vol_track::{HighVolTrack, HighVolTrackConfig};
    use crate::application::market_cache::MarketSnapshotCache;
    use crate::application::position_supervisor::{PositionSupervisor, PositionSupervisorConfig};
    use crate::application::review::ReviewPipeline;
    use crate::application::review::hard_rules::{HardRuleConfig, HardRulesEngine};
    use crate::application::review::llm::FallbackReviewer;
    use crate::application::watcher::Watcher;
    use crate::domain::ports::{ExchangeClient, SignalReviewer};
    use crate::infrastructure::exchange::MockExchangeClient;
    use crate::infrastructure::persistence::repositories::{
        SqliteHighVolRepository, SqliteSignalRepository, SqliteTrainingRepository, SqliteWatchRepository,
    };
    use std::sync::Arc;

    struct NoopReviewer;

    #[async_trait::async_trait]
    impl SignalReviewer for NoopReviewer {
        async fn review(
            &self,
            _prompt: crate::domain::ports::ReviewPrompt,
        ) -> anyhow::Result<crate::domain::review::ReviewResponse> {
            anyhow::bail!("noop reviewer never approves")
        }

        fn name(&self) -> &'static str {
            "noop"
        }
    }

    async fn test_coordinator() -> Arc<Coordinator> {
        let exchange: Arc<dyn ExchangeClient> = Arc::new(MockExchangeClient::default());
        let reviewer: Arc<dyn SignalReviewer> = Arc::new(NoopReviewer);
        let fallback = FallbackReviewer::new(reviewer.clone(), reviewer.clone());
        let market_cache = MarketSnapshotCache::new(exchange.clone(), 4);
        let watcher = Watcher::new(reviewer.clone());
        let high_vol = HighVolTrack::new(
            reviewer.clone(),
            Arc::new(crate::application::order_executor::OrderExecutor::new(exchange.clone())),
            HighVolTrackConfig::default(),
        );
        let position_supervisor = PositionSupervisor::new(
            exchange.clone(),
            Arc::new(crate::application::order_executor::OrderExecutor::new(exchange.clone())),
            reviewer.clone(),
            PositionSupervisorConfig::default(),
        );

        let signals_db = crate::infrastructure::persistence::database::init_signals_db("sqlite::memory:")
            .await
            .expect("in-memory signals db");
        let watch_db = crate::infrastructure::persistence::database::init_watch_db("sqlite::memory:")
            .await
            .expect("in-memory watch db");
        let high_vol_db = crate::infrastructure::persistence::database::init_high_vol_db("sqlite::memory:")
            .await
            .expect("in-memory high-vol db");
        let training_db = crate::infrastructure::persistence::database::init_training_db("sqlite::memory:")
            .await
            .expect("in-memory training db");

        Arc::new(Coordinator::new(
            CoordinatorConfig::default(),
            exchange,
            market_cache,
            ReviewPipeline::new(HardRulesEngine::new(HardRuleConfig::default()), fallback),
            watcher,
            high_vol,
            position_supervisor,
            Arc::new(SqliteSignalRepository::new(signals_db)),
            Arc::new(SqliteWatchRepository::new(watch_db)),
            Arc::new(SqliteHighVolRepository::new(high_vol_db)),
            Arc::new(SqliteTrainingRepository::new(training_db)),
        ))
    }

    #[tokio::test]
    async fn empty_position_map_yields_empty_snapshot() {
        let coordinator = test_coordinator().await;
        let metrics = Metrics::new().expect("failed to create metrics");
        let reporter = MetricsReporter::new(coordinator, metrics, 60);

        let snapshot = reporter.collect_snapshot().await.expect("failed to collect snapshot");
        assert!(snapshot.positions.is_empty());
        assert!(!snapshot.timestamp.is_empty());
    }

    #[test]
    fn snapshot_serializes_with_symbol_and_side() {
        let snapshot = MetricsSnapshot {
            timestamp: "2026-07-27T00:00:00Z".to_string(),
            uptime_seconds: 3600,
            version: "0.1.0".to_string(),
            positions: vec![PositionSnapshot {
                symbol: "BTC/USDT:USDT".to_string(),
                side: "Long".to_string(),
                entry_price: 65000.0,
                current_tier_index: 2,
                pnl_fraction: 0.05,
            }],
        };

        let json = serde_json::to_string(&snapshot).expect("failed to serialize");
        assert!(json.contains("BTC/USDT:USDT"));
        assert!(json.contains("Long"));
    }
}
