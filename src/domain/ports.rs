use crate::domain::errors::ServiceError;
use crate::domain::forecast::BotForecast;
use crate::domain::market::{Timeframe, WindowSlice};
use crate::domain::training::{TrainOutcome, TrainParams};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch};

/// Candle as handed back by an upstream provider, before canonicalization.
/// The timestamp keeps the provider's zone attached; conversion to UTC and
/// every validity check happen in the loader's canonicalization pass.
#[derive(Debug, Clone)]
pub struct RawCandle {
    pub ts: DateTime<FixedOffset>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Upstream market-data adapter. Implementations normalize one provider's
/// response shape and nothing else.
#[async_trait]
pub trait CandleProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RawCandle>, ServiceError>;
}

/// Cooperative cancellation token. Bots poll it at safe checkpoints; the
/// training queue trips the paired handle on force-stop.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when cancellation is signalled (or the handle is dropped
    /// mid-run, which counts as cancellation).
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// A token that can never fire, for callers without a cancel path.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        // Keep the sender alive forever so the token never reads as dropped.
        std::mem::forget(tx);
        Self { rx }
    }
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Lightweight progress tick a bot emits mid-training. The queue worker
/// enriches ticks with job identity before they reach the hub.
#[derive(Debug, Clone)]
pub struct TrainTick {
    pub batch: u32,
    pub total_batches: u32,
    pub message: String,
}

pub type ProgressSink = mpsc::Sender<TrainTick>;

/// Uniform capability surface for forecasting bots. The orchestrator and
/// the training queue know nothing beyond this contract.
#[async_trait]
pub trait ForecastBot: Send + Sync {
    fn name(&self) -> &str;

    /// Minimum candles of history the bot needs to produce a forecast.
    fn min_history(&self) -> usize;

    /// Forecast `horizon_minutes` ahead from a read-only window copy.
    async fn predict(
        &self,
        window: &WindowSlice,
        horizon_minutes: u32,
    ) -> Result<BotForecast, ServiceError>;

    /// Train on a window. Must poll `cancel` at safe points and bail out
    /// with `ServiceError::Cancelled`; progress reports go to `progress`
    /// on a best-effort basis.
    async fn train(
        &self,
        window: &WindowSlice,
        params: &TrainParams,
        cancel: CancelToken,
        progress: ProgressSink,
    ) -> Result<TrainOutcome, ServiceError>;

    /// Remove any persisted model artifact for the pair. Returns whether
    /// an artifact existed.
    async fn clear(&self, symbol: &str, timeframe: Timeframe) -> Result<bool, ServiceError>;
}
