use crate::domain::forecast::{PredictionOutcome, PredictionRecord};
use crate::domain::market::Timeframe;
use crate::domain::repositories::PredictionRepository;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::str::FromStr;
use uuid::Uuid;

pub struct SqlitePredictionRepository {
    pool: SqlitePool,
}

impl SqlitePredictionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &SqliteRow) -> Result<PredictionRecord> {
    let id: String = row.try_get("id")?;
    let timeframe: String = row.try_get("timeframe")?;
    let produced_secs: i64 = row.try_get("produced_at")?;
    let outcome: String = row.try_get("outcome")?;
    let horizon: i64 = row.try_get("horizon_minutes")?;

    Ok(PredictionRecord {
        id: Uuid::parse_str(&id)?,
        symbol: row.try_get("symbol")?,
        timeframe: Timeframe::from_str(&timeframe)?,
        horizon_minutes: horizon as u32,
        produced_at: Utc
            .timestamp_opt(produced_secs, 0)
            .single()
            .context("prediction row has invalid produced_at")?,
        reference_price: row.try_get("reference_price")?,
        overall_confidence: row.try_get("overall_confidence")?,
        outcome: match outcome.as_str() {
            "merged" => PredictionOutcome::Merged,
            _ => PredictionOutcome::NoValidPrediction,
        },
        predicted_series: serde_json::from_str(row.try_get("predicted_series")?)
            .context("decode predicted_series")?,
        bot_contributions: serde_json::from_str(row.try_get("bot_contributions")?)
            .context("decode bot_contributions")?,
        raw_bot_outputs: serde_json::from_str(row.try_get("bot_raw_outputs")?)
            .context("decode bot_raw_outputs")?,
        validation_flags: serde_json::from_str(row.try_get("validation_flags")?)
            .context("decode validation_flags")?,
        feature_snapshot: serde_json::from_str(row.try_get("feature_snapshot")?)
            .context("decode feature_snapshot")?,
    })
}

#[async_trait]
impl PredictionRepository for SqlitePredictionRepository {
    async fn save(&self, record: &PredictionRecord) -> Result<()> {
        let outcome = match record.outcome {
            PredictionOutcome::Merged => "merged",
            PredictionOutcome::NoValidPrediction => "no_valid_prediction",
        };
        sqlx::query(
            r#"
            INSERT INTO predictions (
                id, symbol, timeframe, horizon_minutes, produced_at,
                reference_price, overall_confidence, outcome,
                predicted_series, bot_contributions, bot_raw_outputs,
                validation_flags, feature_snapshot
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.symbol)
        .bind(record.timeframe.to_string())
        .bind(record.horizon_minutes as i64)
        .bind(record.produced_at.timestamp())
        .bind(record.reference_price)
        .bind(record.overall_confidence)
        .bind(outcome)
        .bind(serde_json::to_string(&record.predicted_series)?)
        .bind(serde_json::to_string(&record.bot_contributions)?)
        .bind(serde_json::to_string(&record.raw_bot_outputs)?)
        .bind(serde_json::to_string(&record.validation_flags)?)
        .bind(serde_json::to_string(&record.feature_snapshot)?)
        .execute(&self.pool)
        .await
        .context("insert prediction")?;
        Ok(())
    }

    async fn find_latest(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<PredictionRecord>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM predictions
            WHERE symbol = ? AND timeframe = ?
            ORDER BY produced_at DESC LIMIT 1
            "#,
        )
        .bind(symbol)
        .bind(timeframe.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn find_since(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: DateTime<Utc>,
    ) -> Result<Vec<PredictionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM predictions
            WHERE symbol = ? AND timeframe = ? AND produced_at >= ?
            ORDER BY produced_at ASC
            "#,
        )
        .bind(symbol)
        .bind(timeframe.to_string())
        .bind(since.timestamp())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }
}
