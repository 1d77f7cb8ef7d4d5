use crate::domain::market::{Candle, Provenance, Timeframe};
use crate::domain::repositories::CandleRepository;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::str::FromStr;

pub struct SqliteCandleRepository {
    pool: SqlitePool,
}

impl SqliteCandleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_candle(row: &SqliteRow) -> Result<Candle> {
    let ts_secs: i64 = row.try_get("ts")?;
    let ts = Utc
        .timestamp_opt(ts_secs, 0)
        .single()
        .context("candle row has invalid timestamp")?;
    let timeframe: String = row.try_get("timeframe")?;
    Ok(Candle {
        symbol: row.try_get("symbol")?,
        timeframe: Timeframe::from_str(&timeframe)?,
        ts,
        open: Decimal::from_str(row.try_get("open")?)?,
        high: Decimal::from_str(row.try_get("high")?)?,
        low: Decimal::from_str(row.try_get("low")?)?,
        close: Decimal::from_str(row.try_get("close")?)?,
        volume: Decimal::from_str(row.try_get("volume")?)?,
        // Rows read back are store observations regardless of how they
        // first arrived; provenance is a merge tie-break, not lineage.
        provenance: Provenance::Db,
    })
}

#[async_trait]
impl CandleRepository for SqliteCandleRepository {
    async fn upsert_batch(&self, candles: &[Candle]) -> Result<u64> {
        if candles.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        for candle in candles {
            sqlx::query(
                r#"
                INSERT INTO candles (symbol, timeframe, ts, open, high, low, close, volume, provenance)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(symbol, timeframe, ts) DO UPDATE SET
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume,
                    provenance = excluded.provenance
                "#,
            )
            .bind(&candle.symbol)
            .bind(candle.timeframe.to_string())
            .bind(candle.ts.timestamp())
            .bind(candle.open.to_string())
            .bind(candle.high.to_string())
            .bind(candle.low.to_string())
            .bind(candle.close.to_string())
            .bind(candle.volume.to_string())
            .bind(candle.provenance.as_str())
            .execute(&mut *tx)
            .await
            .context("upsert candle")?;
        }
        tx.commit().await.context("commit candle batch")?;
        Ok(candles.len() as u64)
    }

    async fn find_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM candles
            WHERE symbol = ? AND timeframe = ? AND ts >= ? AND ts <= ?
            ORDER BY ts ASC
            "#,
        )
        .bind(symbol)
        .bind(timeframe.to_string())
        .bind(from.timestamp())
        .bind(to.timestamp())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_candle).collect()
    }

    async fn find_latest(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<Candle>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM candles
            WHERE symbol = ? AND timeframe = ?
            ORDER BY ts DESC LIMIT 1
            "#,
        )
        .bind(symbol)
        .bind(timeframe.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_candle).transpose()
    }
}
