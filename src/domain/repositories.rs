//! Repository traits separating the services from SQLite. The SQLite
//! implementations live under `infrastructure/persistence/repositories`.

use crate::domain::forecast::PredictionRecord;
use crate::domain::market::{Candle, Timeframe};
use crate::domain::training::TrainingRecord;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Candle durability. The Window Loader is the only writer.
#[async_trait]
pub trait CandleRepository: Send + Sync {
    /// Insert or replace by `(symbol, timeframe, ts)`. Returns rows written.
    async fn upsert_batch(&self, candles: &[Candle]) -> Result<u64>;

    /// Candles in `[from, to]`, ascending by timestamp.
    async fn find_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;

    async fn find_latest(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<Candle>>;
}

#[async_trait]
pub trait PredictionRepository: Send + Sync {
    /// Atomic single-row insert including the audit columns.
    async fn save(&self, record: &PredictionRecord) -> Result<()>;

    async fn find_latest(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<PredictionRecord>>;

    /// Records produced at or after `since`, ascending, for drift scoring.
    async fn find_since(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: DateTime<Utc>,
    ) -> Result<Vec<PredictionRecord>>;
}

#[async_trait]
pub trait TrainingRepository: Send + Sync {
    async fn insert(&self, record: &TrainingRecord) -> Result<()>;

    /// Overwrite the row with the record's current state.
    async fn update(&self, record: &TrainingRecord) -> Result<()>;

    /// Mark every completed record for the triple as archived. Returns
    /// rows touched.
    async fn archive_completed(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bot_name: &str,
    ) -> Result<u64>;

    /// Most recent non-archived record per `(symbol, timeframe, bot_name)`.
    async fn latest_per_model(&self) -> Result<Vec<TrainingRecord>>;

    async fn find_latest(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bot_name: &str,
    ) -> Result<Option<TrainingRecord>>;

    /// Drop all records for the triple. Returns rows removed.
    async fn delete_model(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bot_name: &str,
    ) -> Result<u64>;
}
