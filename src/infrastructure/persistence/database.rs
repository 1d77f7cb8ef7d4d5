use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// SQLite handle shared by the repositories. Schema is created on boot;
/// WAL mode for concurrent readers alongside the loader's writes.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("connect to SQLite database")?;

        info!("connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS candles (
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                ts INTEGER NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume TEXT NOT NULL,
                provenance TEXT NOT NULL,
                PRIMARY KEY (symbol, timeframe, ts)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("create candles table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_candles_key_time
            ON candles (symbol, timeframe, ts);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("create candle index")?;

        // Audit columns (bot_raw_outputs, validation_flags, feature_snapshot)
        // are JSON text blobs; they are read back whole, never queried into.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS predictions (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                horizon_minutes INTEGER NOT NULL,
                produced_at INTEGER NOT NULL,
                reference_price REAL NOT NULL,
                overall_confidence REAL NOT NULL,
                outcome TEXT NOT NULL,
                predicted_series TEXT NOT NULL,
                bot_contributions TEXT NOT NULL,
                bot_raw_outputs TEXT NOT NULL,
                validation_flags TEXT NOT NULL,
                feature_snapshot TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_predictions_key_time
            ON predictions (symbol, timeframe, produced_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("create predictions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trainings (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                bot_name TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                finished_at INTEGER,
                status TEXT NOT NULL,
                data_points_used INTEGER NOT NULL DEFAULT 0,
                test_rmse REAL,
                test_mae REAL,
                baseline_rmses TEXT NOT NULL DEFAULT '{}',
                model_size_bytes INTEGER NOT NULL DEFAULT 0,
                training_period TEXT,
                drift_score REAL,
                error_message TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_trainings_model
            ON trainings (symbol, timeframe, bot_name, started_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("create trainings table")?;

        Ok(())
    }
}
