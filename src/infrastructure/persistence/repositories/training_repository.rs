use crate::domain::market::Timeframe;
use crate::domain::repositories::TrainingRepository;
use crate::domain::training::{TrainingRecord, TrainingStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::str::FromStr;
use uuid::Uuid;

pub struct SqliteTrainingRepository {
    pool: SqlitePool,
}

impl SqliteTrainingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn ts_opt(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| Utc.timestamp_opt(s, 0).single())
}

fn row_to_record(row: &SqliteRow) -> Result<TrainingRecord> {
    let id: String = row.try_get("id")?;
    let timeframe: String = row.try_get("timeframe")?;
    let status: String = row.try_get("status")?;
    let started: i64 = row.try_get("started_at")?;
    let finished: Option<i64> = row.try_get("finished_at")?;
    let data_points: i64 = row.try_get("data_points_used")?;
    let model_size: i64 = row.try_get("model_size_bytes")?;

    Ok(TrainingRecord {
        id: Uuid::parse_str(&id)?,
        symbol: row.try_get("symbol")?,
        timeframe: Timeframe::from_str(&timeframe)?,
        bot_name: row.try_get("bot_name")?,
        started_at: Utc
            .timestamp_opt(started, 0)
            .single()
            .context("training row has invalid started_at")?,
        finished_at: ts_opt(finished),
        status: TrainingStatus::from_str(&status)?,
        data_points_used: data_points as u64,
        test_rmse: row.try_get("test_rmse")?,
        test_mae: row.try_get("test_mae")?,
        baseline_rmses: serde_json::from_str(row.try_get("baseline_rmses")?)
            .context("decode baseline_rmses")?,
        model_size_bytes: model_size as u64,
        training_period: row.try_get("training_period")?,
        drift_score: row.try_get("drift_score")?,
        error_message: row.try_get("error_message")?,
    })
}

#[async_trait]
impl TrainingRepository for SqliteTrainingRepository {
    async fn insert(&self, record: &TrainingRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trainings (
                id, symbol, timeframe, bot_name, started_at, finished_at,
                status, data_points_used, test_rmse, test_mae, baseline_rmses,
                model_size_bytes, training_period, drift_score, error_message
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.symbol)
        .bind(record.timeframe.to_string())
        .bind(&record.bot_name)
        .bind(record.started_at.timestamp())
        .bind(record.finished_at.map(|t| t.timestamp()))
        .bind(record.status.as_str())
        .bind(record.data_points_used as i64)
        .bind(record.test_rmse)
        .bind(record.test_mae)
        .bind(serde_json::to_string(&record.baseline_rmses)?)
        .bind(record.model_size_bytes as i64)
        .bind(&record.training_period)
        .bind(record.drift_score)
        .bind(&record.error_message)
        .execute(&self.pool)
        .await
        .context("insert training record")?;
        Ok(())
    }

    async fn update(&self, record: &TrainingRecord) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE trainings SET
                finished_at = ?, status = ?, data_points_used = ?,
                test_rmse = ?, test_mae = ?, baseline_rmses = ?,
                model_size_bytes = ?, training_period = ?, drift_score = ?,
                error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(record.finished_at.map(|t| t.timestamp()))
        .bind(record.status.as_str())
        .bind(record.data_points_used as i64)
        .bind(record.test_rmse)
        .bind(record.test_mae)
        .bind(serde_json::to_string(&record.baseline_rmses)?)
        .bind(record.model_size_bytes as i64)
        .bind(&record.training_period)
        .bind(record.drift_score)
        .bind(&record.error_message)
        .bind(record.id.to_string())
        .execute(&self.pool)
        .await
        .context("update training record")?;
        Ok(())
    }

    async fn archive_completed(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bot_name: &str,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE trainings SET status = 'archived'
            WHERE symbol = ? AND timeframe = ? AND bot_name = ? AND status = 'completed'
            "#,
        )
        .bind(symbol)
        .bind(timeframe.to_string())
        .bind(bot_name)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn latest_per_model(&self) -> Result<Vec<TrainingRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT t.* FROM trainings t
            JOIN (
                SELECT symbol, timeframe, bot_name, MAX(started_at) AS latest
                FROM trainings
                WHERE status != 'archived'
                GROUP BY symbol, timeframe, bot_name
            ) m ON t.symbol = m.symbol
               AND t.timeframe = m.timeframe
               AND t.bot_name = m.bot_name
               AND t.started_at = m.latest
            WHERE t.status != 'archived'
            ORDER BY t.symbol, t.timeframe, t.bot_name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn find_latest(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bot_name: &str,
    ) -> Result<Option<TrainingRecord>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM trainings
            WHERE symbol = ? AND timeframe = ? AND bot_name = ? AND status != 'archived'
            ORDER BY started_at DESC LIMIT 1
            "#,
        )
        .bind(symbol)
        .bind(timeframe.to_string())
        .bind(bot_name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn delete_model(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bot_name: &str,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM trainings
            WHERE symbol = ? AND timeframe = ? AND bot_name = ?
            "#,
        )
        .bind(symbol)
        .bind(timeframe.to_string())
        .bind(bot_name)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
