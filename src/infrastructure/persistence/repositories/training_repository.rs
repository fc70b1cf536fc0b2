use crate::domain::repositories::TrainingRepository;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

pub struct SqliteTrainingRepository {
    db: Database,
}

impl SqliteTrainingRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn record(&self, symbol: &str, stage: &str, payload: &serde_json::Value) -> Result<()> {
        sqlx::query("INSERT INTO training_samples (symbol, stage, payload, created_at) VALUES (?, ?, ?, ?)")
            .bind(symbol)
            .bind(stage)
            .bind(payload.to_string())
            .bind(Utc::now().to_rfc3339())
            .execute(&self.db.pool)
            .await
            .context("inserting training_samples row")?;
        Ok(())
    }
}

#[async_trait]
impl TrainingRepository for SqliteTrainingRepository {
    /// This is a side channel (§6): a write failure here is logged and swallowed rather than
    /// propagated, since it must never block or fail a live trading cycle.
    async fn record_pending(&self, symbol: &str, payload: &serde_json::Value) -> Result<()> {
        if let Err(e) = self.record(symbol, "pending", payload).await {
            warn!(symbol, error = %e, "failed to record pending training sample");
        }
        Ok(())
    }

    async fn record_finalized(&self, symbol: &str, payload: &serde_json::Value) -> Result<()> {
        if let Err(e) = self.record(symbol, "finalized", payload).await {
            warn!(symbol, error = %e, "failed to record finalized training sample");
        }
        Ok(())
    }
}
