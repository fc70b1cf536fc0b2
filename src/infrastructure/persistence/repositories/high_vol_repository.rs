use crate::domain::high_vol::HighVolSignal;
use crate::domain::repositories::HighVolRepository;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

pub struct SqliteHighVolRepository {
    db: Database,
}

impl SqliteHighVolRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl HighVolRepository for SqliteHighVolRepository {
    async fn insert(&self, row: &HighVolSignal) -> Result<i64> {
        let payload = serde_json::to_string(row).context("serializing HighVolSignal")?;
        let status = format!("{:?}", row.status);
        let now = Utc::now().to_rfc3339();
        let rec = sqlx::query(
            "INSERT INTO high_vol_track (symbol, payload, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&row.symbol)
        .bind(&payload)
        .bind(&status)
        .bind(&now)
        .bind(&now)
        .execute(&self.db.pool)
        .await
        .context("inserting high_vol_track row")?;
        Ok(rec.last_insert_rowid())
    }

    async fn update(&self, row: &HighVolSignal) -> Result<()> {
        let payload = serde_json::to_string(row).context("serializing HighVolSignal")?;
        let status = format!("{:?}", row.status);
        sqlx::query("UPDATE high_vol_track SET status = ?, payload = ?, updated_at = ? WHERE symbol = ? AND status != 'Expired' AND status != 'Abandoned'")
            .bind(&status)
            .bind(&payload)
            .bind(Utc::now().to_rfc3339())
            .bind(&row.symbol)
            .execute(&self.db.pool)
            .await
            .context("updating high_vol_track row")?;
        Ok(())
    }

    async fn find_active(&self) -> Result<Vec<HighVolSignal>> {
        let rows = sqlx::query(
            "SELECT payload FROM high_vol_track WHERE status NOT IN ('Expired', 'Abandoned', 'Stopped', 'Profit', 'Timeout')",
        )
        .fetch_all(&self.db.pool)
        .await
        .context("fetching high_vol_track rows")?;
        rows.into_iter().map(|r| decode(r.get::<String, _>("payload"))).collect()
    }

    async fn count_active(&self) -> Result<usize> {
        let row = sqlx::query(
            "SELECT COUNT(*) as n FROM high_vol_track WHERE status NOT IN ('Expired', 'Abandoned', 'Stopped', 'Profit', 'Timeout')",
        )
        .fetch_one(&self.db.pool)
        .await
        .context("counting active high_vol_track rows")?;
        Ok(row.get::<i64, _>("n") as usize)
    }
}

fn decode(payload: String) -> Result<HighVolSignal> {
    serde_json::from_str(&payload).context("decoding HighVolSignal payload")
}
