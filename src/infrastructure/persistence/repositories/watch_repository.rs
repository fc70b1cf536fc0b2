use crate::domain::observation::ObservationRow;
use crate::domain::repositories::WatchRepository;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::Row;

pub struct SqliteWatchRepository {
    db: Database,
}

impl SqliteWatchRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl WatchRepository for SqliteWatchRepository {
    async fn insert(&self, row: &ObservationRow) -> Result<i64> {
        let payload = serde_json::to_string(row).context("serializing ObservationRow")?;
        let side = format!("{:?}", row.side);
        let status = format!("{:?}", row.status);
        sqlx::query(
            "INSERT INTO watch_signals (id, symbol, side, status, payload, created_at) VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET status = excluded.status, payload = excluded.payload",
        )
        .bind(row.id)
        .bind(&row.symbol)
        .bind(&side)
        .bind(&status)
        .bind(&payload)
        .bind(row.created_at.to_rfc3339())
        .execute(&self.db.pool)
        .await
        .context("inserting watch_signals row")?;
        Ok(row.id)
    }

    async fn update(&self, row: &ObservationRow) -> Result<()> {
        let payload = serde_json::to_string(row).context("serializing ObservationRow")?;
        let status = format!("{:?}", row.status);
        sqlx::query("UPDATE watch_signals SET status = ?, payload = ? WHERE id = ?")
            .bind(&status)
            .bind(&payload)
            .bind(row.id)
            .execute(&self.db.pool)
            .await
            .context("updating watch_signals row")?;
        Ok(())
    }

    async fn find_watching(&self) -> Result<Vec<ObservationRow>> {
        let rows = sqlx::query("SELECT payload FROM watch_signals WHERE status IN ('Watching', 'Ready')")
            .fetch_all(&self.db.pool)
            .await
            .context("fetching watch_signals rows")?;
        rows.into_iter().map(|r| decode(r.get::<String, _>("payload"))).collect()
    }

    async fn has_recent(&self, symbol: &str, side_label: &str, within_minutes: i64) -> Result<bool> {
        let cutoff = (Utc::now() - Duration::minutes(within_minutes)).to_rfc3339();
        let row = sqlx::query(
            "SELECT COUNT(*) as n FROM watch_signals WHERE symbol = ? AND side = ? AND created_at >= ?",
        )
        .bind(symbol)
        .bind(side_label_to_variant(side_label))
        .bind(cutoff)
        .fetch_one(&self.db.pool)
        .await
        .context("checking watch_signals recency")?;
        Ok(row.get::<i64, _>("n") > 0)
    }
}

/// `has_recent`'s `side_label` parameter is lower-case (`"long"`/`"short"`, matching the
/// `Candidate` call site); the stored column uses the `Side` debug form (`"Long"`/`"Short"`).
fn side_label_to_variant(side_label: &str) -> &'static str {
    if side_label.eq_ignore_ascii_case("long") {
        "Long"
    } else {
        "Short"
    }
}

fn decode(payload: String) -> Result<ObservationRow> {
    serde_json::from_str(&payload).context("decoding ObservationRow payload")
}
