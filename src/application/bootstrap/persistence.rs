use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::domain::repositories::{HighVolRepository, SignalRepository, TrainingRepository, WatchRepository};
use crate::infrastructure::persistence::database::{
    init_high_vol_db, init_signals_db, init_training_db, init_watch_db,
};
use crate::infrastructure::persistence::repositories::{
    SqliteHighVolRepository, SqliteSignalRepository, SqliteTrainingRepository, SqliteWatchRepository,
};

/// The four independent SQLite stores (§6) plus the repository trait objects wrapping them,
/// ready for `Coordinator::new`.
pub struct PersistenceHandle {
    pub signal_repository: Arc<dyn SignalRepository>,
    pub watch_repository: Arc<dyn WatchRepository>,
    pub high_vol_repository: Arc<dyn HighVolRepository>,
    pub training_repository: Arc<dyn TrainingRepository>,
}

pub struct PersistenceBootstrap;

impl PersistenceBootstrap {
    /// Reads DB URLs from `SIGNALS_DB_URL`/`WATCH_DB_URL`/`HIGH_VOL_DB_URL`/`TRAINING_DB_URL`,
    /// each defaulting to a local `data/*.db` sqlite file.
    pub async fn init() -> Result<PersistenceHandle> {
        let signals_url = std::env::var("SIGNALS_DB_URL").unwrap_or_else(|_| "sqlite://data/signals.db".to_string());
        let watch_url = std::env::var("WATCH_DB_URL").unwrap_or_else(|_| "sqlite://data/watch_signals.db".to_string());
        let high_vol_url = std::env::var("HIGH_VOL_DB_URL").unwrap_or_else(|_| "sqlite://data/high_vol_track.db".to_string());
        let training_url = std::env::var("TRAINING_DB_URL").unwrap_or_else(|_| "sqlite://data/xgboost_training.db".to_string());

        Self::init_with_urls(&signals_url, &watch_url, &high_vol_url, &training_url).await
    }

    /// Same as [`Self::init`] but takes explicit URLs, e.g. the `[database]` section of a
    /// loaded `TradingConfig`, instead of reading the environment directly.
    pub async fn init_with_urls(
        signals_url: &str,
        watch_url: &str,
        high_vol_url: &str,
        training_url: &str,
    ) -> Result<PersistenceHandle> {
        info!(signals_url, watch_url, high_vol_url, training_url, "initializing sqlite stores");

        let signals_db = init_signals_db(signals_url).await?;
        let watch_db = init_watch_db(watch_url).await?;
        let high_vol_db = init_high_vol_db(high_vol_url).await?;
        let training_db = init_training_db(training_url).await?;

        Ok(PersistenceHandle {
            signal_repository: Arc::new(SqliteSignalRepository::new(signals_db)),
            watch_repository: Arc::new(SqliteWatchRepository::new(watch_db)),
            high_vol_repository: Arc::new(SqliteHighVolRepository::new(high_vol_db)),
            training_repository: Arc::new(SqliteTrainingRepository::new(training_db)),
        })
    }
}
