use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::fs;
use tracing::info;

/// One `SqlitePool` per store. Each of the four stores (`signals.db`, `watch_signals.db`,
/// `high_vol_track.db`, `xgboost_training.db`) gets its own `Database`, opened WAL with a
/// 30s busy timeout so the coordinator's writes never collide with a concurrent reporting
/// query against the same file.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn open(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(30_000));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("failed to connect to sqlite database")?;

        info!(db_url, "opened sqlite database");
        Ok(Self { pool })
    }

    /// Runs `ALTER TABLE ... ADD COLUMN ...`, tolerating "duplicate column name" so repeated
    /// startups against an already-migrated file are no-ops.
    pub async fn add_column_if_missing(&self, statement: &str) -> Result<()> {
        if let Err(e) = sqlx::query(statement).execute(&self.pool).await {
            let msg = e.to_string();
            if !msg.contains("duplicate column name") {
                return Err(e).context(format!("migration failed: {statement}"));
            }
        }
        Ok(())
    }
}

/// `pushed_signals` stores the full `EmittedSignalRow` as a JSON payload alongside the
/// columns the repository's query methods actually filter on — the teacher's candle/order
/// tables use explicit typed columns throughout, but those rows have no further consumer
/// inside this crate's scope (reporting is out of scope per `spec.md` §1), so a payload
/// column avoids a hand-maintained column-by-column mapping for a store nothing here reads
/// back field-by-field.
pub async fn init_signals_db(db_url: &str) -> Result<Database> {
    let db = Database::open(db_url).await?;
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pushed_signals (
            id INTEGER PRIMARY KEY,
            symbol TEXT NOT NULL,
            order_status TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_pushed_signals_symbol ON pushed_signals (symbol, order_status);
        "#,
    )
    .execute(&db.pool)
    .await
    .context("failed to create pushed_signals table")?;
    info!("signals.db schema ready");
    Ok(db)
}

pub async fn init_watch_db(db_url: &str) -> Result<Database> {
    let db = Database::open(db_url).await?;
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS watch_signals (
            id INTEGER PRIMARY KEY,
            symbol TEXT NOT NULL,
            side TEXT NOT NULL,
            status TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_watch_signals_symbol_side_time ON watch_signals (symbol, side, created_at);
        "#,
    )
    .execute(&db.pool)
    .await
    .context("failed to create watch_signals table")?;
    info!("watch_signals.db schema ready");
    Ok(db)
}

pub async fn init_high_vol_db(db_url: &str) -> Result<Database> {
    let db = Database::open(db_url).await?;
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS high_vol_track (
            id INTEGER PRIMARY KEY,
            symbol TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_high_vol_track_status ON high_vol_track (status);
        "#,
    )
    .execute(&db.pool)
    .await
    .context("failed to create high_vol_track table")?;
    info!("high_vol_track.db schema ready");
    Ok(db)
}

pub async fn init_training_db(db_url: &str) -> Result<Database> {
    let db = Database::open(db_url).await?;
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS training_samples (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            symbol TEXT NOT NULL,
            stage TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_training_samples_symbol_stage ON training_samples (symbol, stage);
        "#,
    )
    .execute(&db.pool)
    .await
    .context("failed to create training_samples table")?;
    info!("xgboost_training.db schema ready");
    Ok(db)
}
