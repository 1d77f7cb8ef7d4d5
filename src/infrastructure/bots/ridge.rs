//! Trainable regression bot: ridge regression over lagged returns via
//! smartcore, one-step-ahead model applied iteratively across the horizon.
//! Artifacts are serde_json blobs on disk, reloaded lazily per
//! `(symbol, timeframe)`.

use crate::domain::errors::ServiceError;
use crate::domain::forecast::{BotForecast, PredictedPoint};
use crate::domain::market::{Timeframe, WindowSlice};
use crate::domain::ports::{CancelToken, ForecastBot, ProgressSink, TrainTick};
use crate::domain::training::{TrainOutcome, TrainParams};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::linear::ridge_regression::{RidgeRegression, RidgeRegressionParameters};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::{debug, info, warn};

const LAG: usize = 8;
const ALPHA_GRID: &[f64] = &[0.01, 0.1, 0.5, 1.0, 5.0, 10.0];

type Model = RidgeRegression<f64, f64, DenseMatrix<f64>, Vec<f64>>;

#[derive(Serialize, Deserialize)]
struct RidgeArtifact {
    lag: usize,
    alpha: f64,
    test_rmse: f64,
    trained_at: chrono::DateTime<Utc>,
    model: Model,
}

pub struct RidgeBot {
    model_root: PathBuf,
    loaded: RwLock<HashMap<(String, Timeframe), std::sync::Arc<RidgeArtifact>>>,
}

impl RidgeBot {
    pub fn new(model_root: impl Into<PathBuf>) -> Self {
        Self {
            model_root: model_root.into(),
            loaded: RwLock::new(HashMap::new()),
        }
    }

    fn artifact_path(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        let safe: String = symbol
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect();
        self.model_root
            .join("ridge")
            .join(format!("{}_{}.json", safe, timeframe))
    }

    fn load_artifact(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Option<std::sync::Arc<RidgeArtifact>> {
        let key = (symbol.to_string(), timeframe);
        if let Ok(cache) = self.loaded.read()
            && let Some(artifact) = cache.get(&key)
        {
            return Some(std::sync::Arc::clone(artifact));
        }

        let path = self.artifact_path(symbol, timeframe);
        let bytes = std::fs::read(&path).ok()?;
        match serde_json::from_slice::<RidgeArtifact>(&bytes) {
            Ok(artifact) => {
                let artifact = std::sync::Arc::new(artifact);
                if let Ok(mut cache) = self.loaded.write() {
                    cache.insert(key, std::sync::Arc::clone(&artifact));
                }
                Some(artifact)
            }
            Err(e) => {
                warn!("ridge: failed to decode artifact {:?}: {}", path, e);
                None
            }
        }
    }

    fn evict(&self, symbol: &str, timeframe: Timeframe) {
        if let Ok(mut cache) = self.loaded.write() {
            cache.remove(&(symbol.to_string(), timeframe));
        }
    }
}

fn returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .map(|w| if w[0] != 0.0 { w[1] / w[0] - 1.0 } else { 0.0 })
        .collect()
}

/// Lagged-return design matrix: row i holds returns[i..i+LAG], target is
/// returns[i+LAG].
fn dataset(rets: &[f64], lag: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
    let mut rows = Vec::new();
    let mut targets = Vec::new();
    for i in 0..rets.len().saturating_sub(lag) {
        rows.push(rets[i..i + lag].to_vec());
        targets.push(rets[i + lag]);
    }
    (rows, targets)
}

fn fit(rows: &[Vec<f64>], targets: &[f64], alpha: f64) -> Result<Model, ServiceError> {
    let x = DenseMatrix::from_2d_vec(&rows.to_vec()).map_err(|e| ServiceError::TrainingFailed {
        message: format!("matrix creation failed: {}", e),
    })?;
    RidgeRegression::fit(
        &x,
        &targets.to_vec(),
        RidgeRegressionParameters::default().with_alpha(alpha),
    )
    .map_err(|e| ServiceError::TrainingFailed {
        message: format!("ridge fit failed: {}", e),
    })
}

fn predict_one(model: &Model, lags: &[f64]) -> Result<f64, ServiceError> {
    let x = DenseMatrix::from_2d_vec(&vec![lags.to_vec()]).map_err(|e| {
        ServiceError::Internal(anyhow::anyhow!("matrix creation failed: {}", e))
    })?;
    let predicted = model
        .predict(&x)
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("ridge predict failed: {}", e)))?;
    predicted
        .first()
        .copied()
        .ok_or_else(|| ServiceError::Internal(anyhow::anyhow!("ridge returned empty prediction")))
}

/// Price-scale holdout metrics for a fitted model: walk the holdout one
/// step at a time predicting the next close.
fn holdout_metrics(
    model: &Model,
    closes: &[f64],
    rets: &[f64],
    lag: usize,
    split: usize,
) -> Result<(f64, f64), ServiceError> {
    let mut sq = 0.0;
    let mut abs = 0.0;
    let mut count = 0usize;
    for i in split..rets.len() {
        if i < lag {
            continue;
        }
        let predicted_ret = predict_one(model, &rets[i - lag..i])?;
        // rets[i] = closes[i+1]/closes[i] - 1
        let predicted_close = closes[i] * (1.0 + predicted_ret);
        let actual_close = closes[i + 1];
        let err = actual_close - predicted_close;
        sq += err * err;
        abs += err.abs();
        count += 1;
    }
    if count == 0 {
        return Err(ServiceError::TrainingFailed {
            message: "holdout is empty".to_string(),
        });
    }
    Ok(((sq / count as f64).sqrt(), abs / count as f64))
}

#[async_trait]
impl ForecastBot for RidgeBot {
    fn name(&self) -> &str {
        "ridge"
    }

    fn min_history(&self) -> usize {
        60
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
        let rets = returns(&closes);

        // Prefer the trained artifact; fall back to an ephemeral fit on
        // the window so predictions work before first training.
        let (model, confidence) = match self.load_artifact(window.symbol(), window.timeframe()) {
            Some(artifact) => {
                let rel = artifact.test_rmse / closes.last().copied().unwrap_or(1.0).max(1e-9);
                let confidence = (1.0 / (1.0 + 80.0 * rel)).clamp(0.05, 0.95);
                (ArtifactOrLocal::Artifact(artifact), confidence)
            }
            None => {
                debug!(
                    "ridge: no artifact for {} {}, fitting ephemeral model",
                    window.symbol(),
                    window.timeframe()
                );
                let (rows, targets) = dataset(&rets, LAG);
                if rows.is_empty() {
                    return Err(ServiceError::InsufficientCoverage {
                        symbol: window.symbol().to_string(),
                        timeframe: window.timeframe(),
                        got: closes.len(),
                        need: LAG + 2,
                    });
                }
                (ArtifactOrLocal::Local(fit(&rows, &targets, 1.0)?), 0.35)
            }
        };

        let step_secs = window.timeframe().seconds();
        let steps = (horizon_minutes / window.timeframe().minutes()).max(1);

        let mut lag_buf: Vec<f64> = rets[rets.len().saturating_sub(LAG)..].to_vec();
        while lag_buf.len() < LAG {
            lag_buf.insert(0, 0.0);
        }
        let mut price = last.close_f64();
        let mut series = Vec::with_capacity(steps as usize);
        for i in 0..steps {
            let next_ret = predict_one(model.as_ref(), &lag_buf)?;
            price *= 1.0 + next_ret;
            lag_buf.remove(0);
            lag_buf.push(next_ret);
            series.push(PredictedPoint {
                ts: last.ts + chrono::Duration::seconds(step_secs * (i as i64 + 1)),
                price,
                confidence,
            });
        }

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
                    "need at least {} candles, got {}",
                    self.min_history() * 2,
                    closes.len()
                ),
            });
        }
        let rets = returns(&closes);
        let split = rets.len() * 4 / 5;
        let (all_rows, all_targets) = dataset(&rets[..split], LAG);
        if all_rows.len() < params.batch_size as usize {
            return Err(ServiceError::TrainingFailed {
                message: "training split smaller than one batch".to_string(),
            });
        }

        let total = params.epochs.max(1);
        let mut best: Option<(f64, f64, Model)> = None;

        for epoch in 0..total {
            if cancel.is_cancelled() {
                return Err(ServiceError::Cancelled);
            }
            let alpha = ALPHA_GRID[epoch as usize % ALPHA_GRID.len()];
            let model = fit(&all_rows, &all_targets, alpha)?;
            let (rmse, _) = holdout_metrics(&model, &closes, &rets, LAG, split)?;

            if best.as_ref().map(|(_, b, _)| rmse < *b).unwrap_or(true) {
                best = Some((alpha, rmse, model));
            }
            let _ = progress
                .send(TrainTick {
                    batch: epoch + 1,
                    total_batches: total,
                    message: format!("alpha {} rmse {:.4}", alpha, rmse),
                })
                .await;
            tokio::task::yield_now().await;
        }

        let (alpha, test_rmse, model) = best.ok_or_else(|| ServiceError::TrainingFailed {
            message: "no alpha evaluated".to_string(),
        })?;
        let (_, test_mae) = holdout_metrics(&model, &closes, &rets, LAG, split)?;

        let artifact = RidgeArtifact {
            lag: LAG,
            alpha,
            test_rmse,
            trained_at: Utc::now(),
            model,
        };
        let path = self.artifact_path(window.symbol(), window.timeframe());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))?;
        }
        let bytes =
            serde_json::to_vec(&artifact).map_err(|e| ServiceError::Internal(e.into()))?;
        std::fs::write(&path, &bytes).map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))?;
        self.evict(window.symbol(), window.timeframe());

        info!(
            "ridge trained {} {}: alpha={} rmse={:.4} ({} bytes)",
            window.symbol(),
            window.timeframe(),
            alpha,
            test_rmse,
            bytes.len()
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
        self.evict(symbol, timeframe);
        let path = self.artifact_path(symbol, timeframe);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

enum ArtifactOrLocal {
    Artifact(std::sync::Arc<RidgeArtifact>),
    Local(Model),
}

impl ArtifactOrLocal {
    fn as_ref(&self) -> &Model {
        match self {
            ArtifactOrLocal::Artifact(a) => &a.model,
            ArtifactOrLocal::Local(m) => m,
        }
    }
}
