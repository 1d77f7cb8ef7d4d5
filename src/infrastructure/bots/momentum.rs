//! Rule-based momentum extrapolator. Smooths recent closes with an EMA,
//! estimates a per-step slope and projects it forward with damping. The
//! train contract calibrates the EMA span against a holdout instead of
//! fitting weights, so the bot exercises the full training pipeline with
//! negligible compute.

use crate::domain::errors::ServiceError;
use crate::domain::forecast::{BotForecast, PredictedPoint};
use crate::domain::market::{Timeframe, WindowSlice};
use crate::domain::ports::{CancelToken, ForecastBot, ProgressSink, TrainTick};
use crate::domain::training::{TrainOutcome, TrainParams};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

const DEFAULT_SPAN: usize = 20;
const SLOPE_DAMPING: f64 = 0.92;
const CANDIDATE_SPANS: &[usize] = &[8, 12, 16, 20, 28, 40];

pub struct MomentumBot {
    model_root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct MomentumArtifact {
    ema_span: usize,
    damping: f64,
    test_rmse: f64,
    trained_at: chrono::DateTime<Utc>,
}

impl MomentumBot {
    pub fn new(model_root: impl Into<PathBuf>) -> Self {
        Self {
            model_root: model_root.into(),
        }
    }

    fn artifact_path(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        let safe: String = symbol
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect();
        self.model_root
            .join("momentum")
            .join(format!("{}_{}.json", safe, timeframe))
    }

    fn load_span(&self, symbol: &str, timeframe: Timeframe) -> usize {
        let path = self.artifact_path(symbol, timeframe);
        match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<MomentumArtifact>(&bytes)
                .map(|a| a.ema_span)
                .unwrap_or(DEFAULT_SPAN),
            Err(_) => DEFAULT_SPAN,
        }
    }
}

fn ema(closes: &[f64], span: usize) -> f64 {
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut value = closes[0];
    for close in &closes[1..] {
        value = alpha * close + (1.0 - alpha) * value;
    }
    value
}

fn slope(closes: &[f64], span: usize) -> f64 {
    if closes.len() < 2 {
        return 0.0;
    }
    let lookback = span.min(closes.len() - 1).max(1);
    let recent = &closes[closes.len() - lookback - 1..];
    let diffs: Vec<f64> = recent.windows(2).map(|w| w[1] - w[0]).collect();
    diffs.iter().sum::<f64>() / diffs.len() as f64
}

/// One-step-ahead forecast used both for live prediction seeding and for
/// holdout evaluation during span calibration.
fn one_step(closes: &[f64], span: usize) -> f64 {
    ema(closes, span) + slope(closes, span)
}

fn residual_confidence(closes: &[f64], span: usize) -> f64 {
    let n = closes.len().min(span * 2).max(4);
    let tail = &closes[closes.len() - n..];
    let mut sq = 0.0;
    let mut count = 0usize;
    for i in 1..tail.len() {
        let predicted = one_step(&tail[..i], span);
        let err = (tail[i] - predicted) / tail[i];
        sq += err * err;
        count += 1;
    }
    if count == 0 {
        return 0.5;
    }
    let rmse = (sq / count as f64).sqrt();
    (1.0 / (1.0 + 60.0 * rmse)).clamp(0.05, 0.95)
}

#[async_trait]
impl ForecastBot for MomentumBot {
    fn name(&self) -> &str {
        "momentum"
    }

    fn min_history(&self) -> usize {
        30
    }

    async fn predict(
        &self,
        window: &WindowSlice,
        horizon_minutes: u32,
    ) -> Result<BotForecast, ServiceError> {
        let closes = window.closes_f64();
        if closes.len() < self.min_history() {
            return Err(ServiceError::InsufficientCoverage {
                symbol: window.symbol().to_string(),
                timeframe: window.timeframe(),
                got: closes.len(),
                need: self.min_history(),
            });
        }
        let last = window
            .last()
            .ok_or_else(|| ServiceError::Internal(anyhow::anyhow!("empty window")))?;

        let span = self.load_span(window.symbol(), window.timeframe());
        let step_secs = window.timeframe().seconds();
        let steps = (horizon_minutes / window.timeframe().minutes()).max(1);
        let confidence = residual_confidence(&closes, span);

        let base = ema(&closes, span);
        let step_slope = slope(&closes, span);

        let mut series = Vec::with_capacity(steps as usize);
        let mut price = base;
        for i in 0..steps {
            price += step_slope * SLOPE_DAMPING.powi(i as i32 + 1);
            series.push(PredictedPoint {
                ts: last.ts + chrono::Duration::seconds(step_secs * (i as i64 + 1)),
                price,
                confidence,
            });
        }

        debug!(
            "momentum predict {} {}: span={} slope={:.4} conf={:.2}",
            window.symbol(),
            window.timeframe(),
            span,
            step_slope,
            confidence
        );
        Ok(BotForecast { series, confidence })
    }

    async fn train(
        &self,
        window: &WindowSlice,
        params: &TrainParams,
        cancel: CancelToken,
        progress: ProgressSink,
    ) -> Result<TrainOutcome, ServiceError> {
        let closes = window.closes_f64();
        if closes.len() < self.min_history() * 2 {
            return Err(ServiceError::TrainingFailed {
                message: format!(
                    "need at least {} candles to calibrate, got {}",
                    self.min_history() * 2,
                    closes.len()
                ),
            });
        }

        let split = closes.len() * 4 / 5;
        let total = params.epochs.max(1);
        let mut best: Option<(usize, f64)> = None;

        for epoch in 0..total {
            if cancel.is_cancelled() {
                return Err(ServiceError::Cancelled);
            }
            let span = CANDIDATE_SPANS[epoch as usize % CANDIDATE_SPANS.len()];

            let mut sq = 0.0;
            for i in split..closes.len() {
                let predicted = one_step(&closes[..i], span);
                let err = closes[i] - predicted;
                sq += err * err;
            }
            let rmse = (sq / (closes.len() - split) as f64).sqrt();
            if best.map(|(_, b)| rmse < b).unwrap_or(true) {
                best = Some((span, rmse));
            }

            let _ = progress
                .send(TrainTick {
                    batch: epoch + 1,
                    total_batches: total,
                    message: format!("span {} rmse {:.4}", span, rmse),
                })
                .await;
            // Calibration is cheap; yield so cancellation stays responsive.
            tokio::task::yield_now().await;
        }

        let (span, test_rmse) = best.ok_or_else(|| ServiceError::TrainingFailed {
            message: "no candidate span evaluated".to_string(),
        })?;

        let mut abs = 0.0;
        for i in split..closes.len() {
            abs += (closes[i] - one_step(&closes[..i], span)).abs();
        }
        let test_mae = abs / (closes.len() - split) as f64;

        let artifact = MomentumArtifact {
            ema_span: span,
            damping: SLOPE_DAMPING,
            test_rmse,
            trained_at: Utc::now(),
        };
        let path = self.artifact_path(window.symbol(), window.timeframe());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))?;
        }
        let bytes =
            serde_json::to_vec_pretty(&artifact).map_err(|e| ServiceError::Internal(e.into()))?;
        std::fs::write(&path, &bytes).map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))?;

        info!(
            "momentum calibrated {} {}: span={} rmse={:.4}",
            window.symbol(),
            window.timeframe(),
            span,
            test_rmse
        );
        Ok(TrainOutcome {
            data_points_used: closes.len() as u64,
            test_rmse,
            test_mae,
            model_size_bytes: bytes.len() as u64,
            artifact_path: Some(path.to_string_lossy().into_owned()),
        })
    }

    async fn clear(&self, symbol: &str, timeframe: Timeframe) -> Result<bool, ServiceError> {
        let path = self.artifact_path(symbol, timeframe);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
