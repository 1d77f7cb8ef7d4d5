//! Test doubles for the provider, bot and calendar seams. Compiled into
//! the crate (not `#[cfg(test)]`) so integration tests under `tests/`
//! can use them too.

use crate::domain::errors::ServiceError;
use crate::domain::forecast::{BotForecast, PredictedPoint};
use crate::domain::market::{Timeframe, TradingCalendar, WindowSlice};
use crate::domain::ports::{CancelToken, CandleProvider, ForecastBot, ProgressSink, RawCandle, TrainTick};
use crate::domain::training::{TrainOutcome, TrainParams};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::collections::VecDeque;
use std::sync::{Mutex, RwLock};
use std::time::Duration;

/// Always-open calendar with a pinned clock: sessions run midnight to
/// midnight UTC every day, so plain UTC alignment is valid.
pub struct OpenCalendar {
    now: RwLock<DateTime<Utc>>,
}

impl OpenCalendar {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    pub fn set_now(&self, now: DateTime<Utc>) {
        *self.now.write().expect("clock lock poisoned") = now;
    }
}

impl TradingCalendar for OpenCalendar {
    fn session_open(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc())
    }

    fn session_close(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        date.succ_opt()?.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc())
    }

    fn trading_date(&self, ts: DateTime<Utc>) -> NaiveDate {
        ts.date_naive()
    }

    fn now(&self) -> DateTime<Utc> {
        *self.now.read().expect("clock lock poisoned")
    }
}

type ProviderResponse = Result<Vec<RawCandle>, String>;

/// Scripted provider: responses are popped per call in order; once the
/// script runs dry every further call returns an empty batch. Calls are
/// recorded for range assertions.
pub struct MockProvider {
    name: String,
    responses: Mutex<VecDeque<ProviderResponse>>,
    calls: Mutex<Vec<(String, Timeframe, DateTime<Utc>, DateTime<Utc>)>>,
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            responses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push_candles(&self, candles: Vec<RawCandle>) {
        self.responses
            .lock()
            .expect("responses lock poisoned")
            .push_back(Ok(candles));
    }

    pub fn push_error(&self, message: impl Into<String>) {
        self.responses
            .lock()
            .expect("responses lock poisoned")
            .push_back(Err(message.into()));
    }

    pub fn calls(&self) -> Vec<(String, Timeframe, DateTime<Utc>, DateTime<Utc>)> {
        self.calls.lock().expect("calls lock poisoned").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock poisoned").len()
    }
}

#[async_trait]
impl CandleProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RawCandle>, ServiceError> {
        self.calls
            .lock()
            .expect("calls lock poisoned")
            .push((symbol.to_string(), timeframe, from, to));
        let next = self
            .responses
            .lock()
            .expect("responses lock poisoned")
            .pop_front();
        match next {
            Some(Ok(candles)) => Ok(candles),
            Some(Err(message)) => Err(ServiceError::UpstreamFailure {
                last_error: message,
            }),
            None => Ok(Vec::new()),
        }
    }
}

/// Aligned raw candles for provider scripts: `n` periods starting at
/// `start`, flat at `price` with a tiny body.
pub fn raw_candles(
    start: DateTime<Utc>,
    timeframe: Timeframe,
    n: usize,
    price: f64,
) -> Vec<RawCandle> {
    (0..n)
        .map(|i| {
            let p = Decimal::from_f64(price).expect("finite price");
            let spread = Decimal::from_f64(price * 0.001).expect("finite spread");
            RawCandle {
                ts: (start + ChronoDuration::seconds(timeframe.seconds() * i as i64))
                    .fixed_offset(),
                open: p,
                high: p + spread,
                low: p - spread,
                close: p,
                volume: Decimal::from(1000),
            }
        })
        .collect()
}

enum MockBehavior {
    /// Absolute prices interpolated from `first` to `last` across steps.
    Linear { first: f64, last: f64 },
    /// Series flat at the window's last close.
    Flat,
    /// Sleep before answering flat; used for timeout tests.
    Slow(Duration),
    Error(String),
}

/// Scripted forecast bot covering the orchestrator and queue seams.
pub struct MockBot {
    name: String,
    confidence: f64,
    min_history: usize,
    behavior: MockBehavior,
    /// Per-epoch delay during train; long delays plus `stubborn` model a
    /// bot that misses its cancellation checkpoint.
    epoch_delay: Duration,
    stubborn: bool,
}

impl MockBot {
    pub fn linear(name: impl Into<String>, first: f64, last: f64, confidence: f64) -> Self {
        Self {
            name: name.into(),
            confidence,
            min_history: 1,
            behavior: MockBehavior::Linear { first, last },
            epoch_delay: Duration::from_millis(1),
            stubborn: false,
        }
    }

    pub fn flat(name: impl Into<String>, confidence: f64) -> Self {
        Self {
            name: name.into(),
            confidence,
            min_history: 1,
            behavior: MockBehavior::Flat,
            epoch_delay: Duration::from_millis(1),
            stubborn: false,
        }
    }

    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            confidence: 0.0,
            min_history: 1,
            behavior: MockBehavior::Error(message.into()),
            epoch_delay: Duration::from_millis(1),
            stubborn: false,
        }
    }

    pub fn slow(name: impl Into<String>, delay: Duration, confidence: f64) -> Self {
        Self {
            name: name.into(),
            confidence,
            min_history: 1,
            behavior: MockBehavior::Slow(delay),
            epoch_delay: Duration::from_millis(1),
            stubborn: false,
        }
    }

    pub fn with_min_history(mut self, min_history: usize) -> Self {
        self.min_history = min_history;
        self
    }

    pub fn with_epoch_delay(mut self, delay: Duration) -> Self {
        self.epoch_delay = delay;
        self
    }

    /// Ignore the cancel token entirely.
    pub fn stubborn(mut self) -> Self {
        self.stubborn = true;
        self
    }

    fn series(&self, window: &WindowSlice, horizon_minutes: u32) -> Vec<PredictedPoint> {
        let Some(last) = window.last() else {
            return Vec::new();
        };
        let steps = (horizon_minutes / window.timeframe().minutes()).max(1) as usize;
        let step_secs = window.timeframe().seconds();
        let (first, final_price) = match &self.behavior {
            MockBehavior::Linear { first, last } => (*first, *last),
            _ => (last.close_f64(), last.close_f64()),
        };
        (0..steps)
            .map(|i| {
                let frac = if steps == 1 {
                    1.0
                } else {
                    i as f64 / (steps - 1) as f64
                };
                PredictedPoint {
                    ts: last.ts + ChronoDuration::seconds(step_secs * (i as i64 + 1)),
                    price: first + (final_price - first) * frac,
                    confidence: self.confidence,
                }
            })
            .collect()
    }
}

#[async_trait]
impl ForecastBot for MockBot {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_history(&self) -> usize {
        self.min_history
    }

    async fn predict(
        &self,
        window: &WindowSlice,
        horizon_minutes: u32,
    ) -> Result<BotForecast, ServiceError> {
        match &self.behavior {
            MockBehavior::Error(message) => Err(ServiceError::Internal(anyhow::anyhow!(
                "{}",
                message
            ))),
            MockBehavior::Slow(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(BotForecast {
                    series: self.series(window, horizon_minutes),
                    confidence: self.confidence,
                })
            }
            _ => Ok(BotForecast {
                series: self.series(window, horizon_minutes),
                confidence: self.confidence,
            }),
        }
    }

    async fn train(
        &self,
        window: &WindowSlice,
        params: &TrainParams,
        cancel: CancelToken,
        progress: ProgressSink,
    ) -> Result<TrainOutcome, ServiceError> {
        let total = params.epochs.max(1);
        for epoch in 0..total {
            if !self.stubborn && cancel.is_cancelled() {
                return Err(ServiceError::Cancelled);
            }
            tokio::time::sleep(self.epoch_delay).await;
            let _ = progress
                .send(TrainTick {
                    batch: epoch + 1,
                    total_batches: total,
                    message: format!("epoch {}/{}", epoch + 1, total),
                })
                .await;
        }
        if !self.stubborn && cancel.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }
        Ok(TrainOutcome {
            data_points_used: window.len() as u64,
            test_rmse: 1.0,
            test_mae: 0.8,
            model_size_bytes: 64,
            artifact_path: None,
        })
    }

    async fn clear(&self, _symbol: &str, _timeframe: Timeframe) -> Result<bool, ServiceError> {
        Ok(false)
    }
}

/// Convenience for unit tests: a window of flat candles aligned to the
/// `OpenCalendar` (UTC midnight sessions).
pub fn flat_window(
    symbol: &str,
    timeframe: Timeframe,
    start: DateTime<Utc>,
    n: usize,
    price: f64,
) -> WindowSlice {
    use crate::domain::market::{Candle, Provenance};
    let candles = (0..n)
        .map(|i| {
            let p = Decimal::from_f64(price).expect("finite price");
            Candle {
                symbol: symbol.to_string(),
                timeframe,
                ts: start + ChronoDuration::seconds(timeframe.seconds() * i as i64),
                open: p,
                high: p,
                low: p,
                close: p,
                volume: Decimal::from(100),
                provenance: Provenance::Db,
            }
        })
        .collect();
    WindowSlice::new(symbol, timeframe, candles).expect("aligned flat window")
}

pub fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0)
        .single()
        .expect("valid test timestamp")
}
