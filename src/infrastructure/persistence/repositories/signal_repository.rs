use crate::domain::review::EmittedSignalRow;
use crate::domain::repositories::SignalRepository;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;

pub struct SqliteSignalRepository {
    db: Database,
}

impl SqliteSignalRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SignalRepository for SqliteSignalRepository {
    async fn insert(&self, row: &EmittedSignalRow) -> Result<i64> {
        let payload = serde_json::to_string(row).context("serializing EmittedSignalRow")?;
        let status = format!("{:?}", row.order_status);
        sqlx::query(
            "INSERT INTO pushed_signals (id, symbol, order_status, payload, created_at) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET order_status = excluded.order_status, payload = excluded.payload",
        )
        .bind(row.id)
        .bind(&row.symbol)
        .bind(&status)
        .bind(&payload)
        .bind(row.created_at.to_rfc3339())
        .execute(&self.db.pool)
        .await
        .context("inserting pushed_signals row")?;
        Ok(row.id)
    }

    async fn update(&self, row: &EmittedSignalRow) -> Result<()> {
        let payload = serde_json::to_string(row).context("serializing EmittedSignalRow")?;
        let status = format!("{:?}", row.order_status);
        sqlx::query("UPDATE pushed_signals SET order_status = ?, payload = ? WHERE id = ?")
            .bind(&status)
            .bind(&payload)
            .bind(row.id)
            .execute(&self.db.pool)
            .await
            .context("updating pushed_signals row")?;
        Ok(())
    }

    async fn find(&self, id: i64) -> Result<Option<EmittedSignalRow>> {
        let row = sqlx::query("SELECT payload FROM pushed_signals WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db.pool)
            .await
            .context("fetching pushed_signals row")?;
        row.map(|r| decode(r.get::<String, _>("payload"))).transpose()
    }

    async fn find_pending_by_symbol(&self, symbol: &str) -> Result<Vec<EmittedSignalRow>> {
        let rows = sqlx::query("SELECT payload FROM pushed_signals WHERE symbol = ? AND order_status != 'Closed' ORDER BY created_at DESC")
            .bind(symbol)
            .fetch_all(&self.db.pool)
            .await
            .context("fetching pending pushed_signals rows")?;
        rows.into_iter().map(|r| decode(r.get::<String, _>("payload"))).collect()
    }
}

fn decode(payload: String) -> Result<EmittedSignalRow> {
    serde_json::from_str(&payload).context("decoding EmittedSignalRow payload")
}
