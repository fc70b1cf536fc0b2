//! Repository traits, one per persistent store (§6), following the teacher's
//! `TradeRepository`/`CandleRepository` async-trait pattern.

use crate::domain::high_vol::HighVolSignal;
use crate::domain::observation::ObservationRow;
use crate::domain::review::EmittedSignalRow;
use anyhow::Result;
use async_trait::async_trait;

/// `signals.db`: `pushed_signals` (emitted-signal rows) plus the append-only `signals` /
/// `auto_trades` / `outcomes` tables used only by reporting (out of scope per §1, but the
/// write paths this crate needs are in scope).
#[async_trait]
pub trait SignalRepository: Send + Sync {
    async fn insert(&self, row: &EmittedSignalRow) -> Result<i64>;
    async fn update(&self, row: &EmittedSignalRow) -> Result<()>;
    async fn find(&self, id: i64) -> Result<Option<EmittedSignalRow>>;
    async fn find_pending_by_symbol(&self, symbol: &str) -> Result<Vec<EmittedSignalRow>>;
}

/// `watch_signals.db`.
#[async_trait]
pub trait WatchRepository: Send + Sync {
    async fn insert(&self, row: &ObservationRow) -> Result<i64>;
    async fn update(&self, row: &ObservationRow) -> Result<()>;
    async fn find_watching(&self) -> Result<Vec<ObservationRow>>;
    /// 10-minute (symbol, side) uniqueness guard on insert (§4.5 "On insert").
    async fn has_recent(&self, symbol: &str, side_label: &str, within_minutes: i64) -> Result<bool>;
}

/// `high_vol_track.db`.
#[async_trait]
pub trait HighVolRepository: Send + Sync {
    async fn insert(&self, row: &HighVolSignal) -> Result<i64>;
    async fn update(&self, row: &HighVolSignal) -> Result<()>;
    async fn find_active(&self) -> Result<Vec<HighVolSignal>>;
    async fn count_active(&self) -> Result<usize>;
}

/// `xgboost_training.db`: pending-signal / finalised-training-sample data collection side
/// channel. Independent of live trading; writes here must never block or fail a cycle.
#[async_trait]
pub trait TrainingRepository: Send + Sync {
    async fn record_pending(&self, symbol: &str, payload: &serde_json::Value) -> Result<()>;
    async fn record_finalized(&self, symbol: &str, payload: &serde_json::Value) -> Result<()>;
}
