//! Model health: recency, realized-error drift and baseline comparison,
//! computed nightly and on demand for the models report.
//!
//! Drift compares each bot's raw predicted points from the last seven
//! days against realized closes from the store:
//! `(recent_rmse - training_rmse) / training_rmse`.

use crate::application::baselines::rmse;
use crate::domain::health::{Health, HealthThresholds, ModelReport, classify};
use crate::domain::market::{Timeframe, TradingCalendar};
use crate::domain::repositories::{CandleRepository, PredictionRepository, TrainingRepository};
use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const DRIFT_WINDOW_DAYS: i64 = 7;

pub struct HealthMonitor {
    training_repo: Arc<dyn TrainingRepository>,
    prediction_repo: Arc<dyn PredictionRepository>,
    candle_repo: Arc<dyn CandleRepository>,
    calendar: Arc<dyn TradingCalendar>,
    thresholds: HealthThresholds,
}

impl HealthMonitor {
    pub fn new(
        training_repo: Arc<dyn TrainingRepository>,
        prediction_repo: Arc<dyn PredictionRepository>,
        candle_repo: Arc<dyn CandleRepository>,
        calendar: Arc<dyn TradingCalendar>,
        thresholds: HealthThresholds,
    ) -> Self {
        Self {
            training_repo,
            prediction_repo,
            candle_repo,
            calendar,
            thresholds,
        }
    }

    /// Realized one-to-one error of `bot_name`'s recent predictions.
    /// `None` when no predicted point has a realized counterpart yet.
    pub async fn recent_rmse(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bot_name: &str,
    ) -> Result<Option<f64>> {
        let now = self.calendar.now();
        let since = now - ChronoDuration::days(DRIFT_WINDOW_DAYS);

        let predictions = self
            .prediction_repo
            .find_since(symbol, timeframe, since)
            .await?;
        if predictions.is_empty() {
            return Ok(None);
        }

        let realized: HashMap<DateTime<Utc>, f64> = self
            .candle_repo
            .find_range(symbol, timeframe, since, now)
            .await?
            .into_iter()
            .map(|c| (c.ts, c.close_f64()))
            .collect();

        let mut errors = Vec::new();
        for prediction in &predictions {
            if let Some(series) = prediction.raw_bot_outputs.get(bot_name) {
                for point in series.iter().filter(|p| p.ts <= now) {
                    if let Some(actual) = realized.get(&point.ts) {
                        errors.push(point.price - actual);
                    }
                }
            }
        }
        if errors.is_empty() {
            return Ok(None);
        }
        Ok(Some(rmse(errors)))
    }

    pub async fn drift_score(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bot_name: &str,
        training_rmse: f64,
    ) -> Result<Option<f64>> {
        if !training_rmse.is_finite() || training_rmse <= 0.0 {
            return Ok(None);
        }
        let recent = self.recent_rmse(symbol, timeframe, bot_name).await?;
        Ok(recent.map(|r| (r - training_rmse) / training_rmse))
    }

    pub async fn models_report(&self) -> Result<Vec<ModelReport>> {
        let now = self.calendar.now();
        let mut report = Vec::new();

        for record in self.training_repo.latest_per_model().await? {
            let reference = record.finished_at.unwrap_or(record.started_at);
            let age_hours = (now - reference).num_hours();

            let (recent, drift) = match record.test_rmse {
                Some(training_rmse) if training_rmse > 0.0 => {
                    let recent = self
                        .recent_rmse(&record.symbol, record.timeframe, &record.bot_name)
                        .await?;
                    let drift = recent.map(|r| (r - training_rmse) / training_rmse);
                    (recent, drift)
                }
                _ => (None, record.drift_score),
            };

            let health = classify(&record, age_hours, drift, &self.thresholds);
            report.push(ModelReport {
                record,
                age_hours,
                recent_rmse: recent,
                drift_score: drift,
                health,
            });
        }
        Ok(report)
    }

    /// Nightly sweep: recompute drift, persist it on the training rows and
    /// log anything red.
    pub fn spawn_nightly(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(24 * 3600));
            ticker.tick().await; // immediate first pass
            loop {
                if let Err(e) = self.sweep().await {
                    warn!("health sweep failed: {}", e);
                }
                ticker.tick().await;
            }
        })
    }

    async fn sweep(&self) -> Result<()> {
        let report = self.models_report().await?;
        let red = report.iter().filter(|r| r.health == Health::Red).count();
        for entry in &report {
            if entry.drift_score != entry.record.drift_score {
                let mut updated = entry.record.clone();
                updated.drift_score = entry.drift_score;
                self.training_repo.update(&updated).await?;
            }
        }
        info!(
            "health sweep: {} models, {} red",
            report.len(),
            red
        );
        Ok(())
    }
}
