#![allow(dead_code)]

//! Shared fixtures for the integration tests: a temp-dir backed config,
//! an open calendar pinned to a known Monday, and repository/loader
//! builders over mock providers.

use candlecast::application::window_loader::WindowLoader;
use candlecast::config::Config;
use candlecast::domain::market::{Candle, Provenance, Timeframe, TradingCalendar};
use candlecast::domain::ports::CandleProvider;
use candlecast::domain::repositories::{
    CandleRepository, PredictionRepository, TrainingRepository,
};
use candlecast::infrastructure::mock::OpenCalendar;
use candlecast::infrastructure::observability::Metrics;
use candlecast::infrastructure::persistence::Database;
use candlecast::infrastructure::persistence::repositories::{
    SqliteCandleRepository, SqlitePredictionRepository, SqliteTrainingRepository,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::sync::Arc;
use tempfile::TempDir;

/// Monday 2025-06-02, midday UTC. The `OpenCalendar` treats every day as
/// one midnight-to-midnight session, so plain UTC-aligned candles are
/// valid for every timeframe.
pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap()
}

pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::from_env().expect("defaults parse");
    config.database_url = format!("sqlite://{}/test.db", dir.path().display());
    config.archive_root = dir.path().join("archive");
    config.model_root = dir.path().join("models");
    config.min_window_candles = 10;
    config.drift.min_candles = 10;
    config.bot_predict_timeout_secs = 1;
    config.force_stop_timeout_secs = 2;
    config
}

pub struct Harness {
    pub config: Config,
    pub calendar: Arc<OpenCalendar>,
    pub candle_repo: Arc<dyn CandleRepository>,
    pub prediction_repo: Arc<dyn PredictionRepository>,
    pub training_repo: Arc<dyn TrainingRepository>,
    pub metrics: Metrics,
}

impl Harness {
    pub async fn new(dir: &TempDir) -> Self {
        let config = test_config(dir);
        let database = Database::new(&config.database_url).await.expect("database");
        Self {
            config,
            calendar: Arc::new(OpenCalendar::at(test_now())),
            candle_repo: Arc::new(SqliteCandleRepository::new(database.pool.clone())),
            prediction_repo: Arc::new(SqlitePredictionRepository::new(database.pool.clone())),
            training_repo: Arc::new(SqliteTrainingRepository::new(database.pool)),
            metrics: Metrics::new().expect("metrics"),
        }
    }

    pub fn loader(&self, providers: Vec<Arc<dyn CandleProvider>>) -> Arc<WindowLoader> {
        let calendar: Arc<dyn TradingCalendar> = self.calendar.clone();
        Arc::new(WindowLoader::new(
            &self.config,
            Arc::clone(&self.candle_repo),
            providers,
            calendar,
            self.metrics.clone(),
        ))
    }

    /// Seed the store with flat 5m candles ending just before `test_now`.
    pub async fn seed_candles(&self, symbol: &str, n: usize, price: f64) -> Vec<Candle> {
        let candles = stored_candles(symbol, Timeframe::FiveMin, n, price, test_now());
        self.candle_repo
            .upsert_batch(&candles)
            .await
            .expect("seed candles");
        candles
    }
}

/// `n` flat candles ending one period before `end`, ascending.
pub fn stored_candles(
    symbol: &str,
    timeframe: Timeframe,
    n: usize,
    price: f64,
    end: DateTime<Utc>,
) -> Vec<Candle> {
    let step = timeframe.seconds();
    let p = Decimal::from_f64(price).expect("finite price");
    (0..n)
        .map(|i| Candle {
            symbol: symbol.to_string(),
            timeframe,
            ts: end - Duration::seconds(step * (n as i64 - i as i64)),
            open: p,
            high: p,
            low: p,
            close: p,
            volume: Decimal::from(500),
            provenance: Provenance::Db,
        })
        .collect()
}

/// Poll until `check` passes or the deadline expires.
pub async fn wait_until<F, Fut>(timeout_ms: u64, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = std::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
    loop {
        if check().await {
            return;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "condition not met within {}ms",
            timeout_ms
        );
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}
