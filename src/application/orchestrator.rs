//! Prediction orchestrator: fan a request out to the selected bots in
//! parallel, gate and sanitize each raw output, merge the survivors by
//! confidence-weighted mean, persist the full audit record and publish it.
//! Per-bot failures never fail the request; a request with zero survivors
//! still persists a `no_valid_prediction` record.

use crate::application::features::compute_snapshot;
use crate::application::window_loader::{LoadOptions, WindowLoader};
use crate::config::Config;
use crate::domain::errors::ServiceError;
use crate::domain::forecast::{
    BotContribution, BotForecast, BotValidation, PredictedPoint, PredictionOutcome,
    PredictionRecord,
};
use crate::domain::market::Timeframe;
use crate::domain::repositories::PredictionRepository;
use crate::domain::validation::{
    DriftLimits, RejectReason, envelope_gate, sanitize_series, series_gates,
};
use crate::infrastructure::bots::BotRegistry;
use crate::infrastructure::hub::SubscriptionHub;
use crate::infrastructure::observability::Metrics;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

pub struct PredictRequest {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub horizon_minutes: u32,
    /// Defaults to every registered bot; order breaks merge ties.
    pub selected_bots: Option<Vec<String>>,
    pub use_cache: bool,
}

struct BotRun {
    name: String,
    raw: Option<BotForecast>,
    validation: BotValidation,
    /// Series that cleared the gates (possibly sanitized), if any.
    accepted_series: Option<Vec<PredictedPoint>>,
    confidence: f64,
}

pub struct PredictionOrchestrator {
    loader: Arc<WindowLoader>,
    bots: Arc<BotRegistry>,
    prediction_repo: Arc<dyn PredictionRepository>,
    hub: Arc<SubscriptionHub>,
    metrics: Metrics,
    limits: DriftLimits,
    bot_timeout: Duration,
    lookback_days: i64,
}

impl PredictionOrchestrator {
    pub fn new(
        config: &Config,
        loader: Arc<WindowLoader>,
        bots: Arc<BotRegistry>,
        prediction_repo: Arc<dyn PredictionRepository>,
        hub: Arc<SubscriptionHub>,
        metrics: Metrics,
    ) -> Self {
        Self {
            loader,
            bots,
            prediction_repo,
            hub,
            metrics,
            limits: config.drift,
            bot_timeout: Duration::from_secs(config.bot_predict_timeout_secs),
            lookback_days: config.default_lookback_days,
        }
    }

    pub async fn predict(&self, request: PredictRequest) -> Result<PredictionRecord, ServiceError> {
        let selected = match &request.selected_bots {
            Some(names) => names.clone(),
            None => self.bots.names(),
        };
        if selected.is_empty() {
            return Err(ServiceError::NotFound {
                what: "no bots registered".to_string(),
            });
        }

        let window = self
            .loader
            .load_lookback(
                &request.symbol,
                request.timeframe,
                self.lookback_days,
                LoadOptions {
                    bypass_cache: !request.use_cache,
                    skip_min_check: false,
                },
            )
            .await?;

        let last = window
            .last()
            .ok_or_else(|| ServiceError::DataUnavailable {
                symbol: request.symbol.clone(),
                timeframe: request.timeframe,
            })?;
        let reference_price = last.close_f64();
        let produced_at = last.ts;
        let feature_snapshot = compute_snapshot(&window);

        // Fan out with a wall-clock budget per bot. Every invocation gets
        // its own read-only window copy.
        let mut handles = Vec::with_capacity(selected.len());
        for name in &selected {
            let name = name.clone();
            let bot = self.bots.get(&name);
            let window = window.clone();
            let horizon = request.horizon_minutes;
            let budget = self.bot_timeout;
            handles.push(tokio::spawn(async move {
                let Some(bot) = bot else {
                    let err = ServiceError::NotFound {
                        what: format!("bot {}", name),
                    };
                    return (name, Err(err));
                };
                match timeout(budget, bot.predict(&window, horizon)).await {
                    Ok(result) => (name, result),
                    Err(_) => (
                        name.clone(),
                        Err(ServiceError::Timeout {
                            what: format!("bot {} predict", name),
                            seconds: budget.as_secs(),
                        }),
                    ),
                }
            }));
        }

        let mut runs = Vec::with_capacity(handles.len());
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok((name, result)) => {
                    runs.push(self.gate_bot(name, result, produced_at, reference_price));
                }
                Err(e) => warn!("bot task panicked: {}", e),
            }
        }

        for run in &runs {
            for reason in &run.validation.reasons {
                self.metrics
                    .bot_rejections_total
                    .with_label_values(&[&run.name, reason.as_str()])
                    .inc();
            }
        }

        let survivors: Vec<&BotRun> =
            runs.iter().filter(|r| r.accepted_series.is_some()).collect();

        let record = if survivors.is_empty() {
            self.metrics
                .predictions_total
                .with_label_values(&["no_valid_prediction"])
                .inc();
            self.build_record(&request, &runs, Vec::new(), 0.0, reference_price, produced_at,
                feature_snapshot, PredictionOutcome::NoValidPrediction)
        } else {
            let merged = merge_survivors(&survivors, &selected);
            let overall = overall_confidence(&survivors, selected.len());
            self.metrics
                .predictions_total
                .with_label_values(&["merged"])
                .inc();
            self.build_record(&request, &runs, merged, overall, reference_price, produced_at,
                feature_snapshot, PredictionOutcome::Merged)
        };

        self.prediction_repo
            .save(&record)
            .await
            .map_err(ServiceError::Internal)?;
        self.hub
            .publish_prediction(&record, self.limits.envelope)
            .await;

        info!(
            "prediction {} {} horizon={}m: {:?} ({}/{} bots, confidence {:.2})",
            record.symbol,
            record.timeframe,
            record.horizon_minutes,
            record.outcome,
            record.survivors().len(),
            selected.len(),
            record.overall_confidence
        );
        Ok(record)
    }

    /// Gates 1-2, one sanitization attempt, then the envelope gate.
    fn gate_bot(
        &self,
        name: String,
        result: Result<BotForecast, ServiceError>,
        produced_at: chrono::DateTime<chrono::Utc>,
        reference_price: f64,
    ) -> BotRun {
        let forecast = match result {
            Ok(forecast) => forecast,
            Err(e) => {
                let reason = match e {
                    ServiceError::Timeout { .. } => RejectReason::TimedOut,
                    _ => RejectReason::BotError,
                };
                warn!("bot {} dropped: {}", name, e);
                return BotRun {
                    name,
                    raw: None,
                    validation: BotValidation::rejected(vec![reason]),
                    accepted_series: None,
                    confidence: 0.0,
                };
            }
        };

        let confidence = forecast.confidence.clamp(0.0, 1.0);
        let mut reasons = series_gates(
            &forecast.series,
            produced_at,
            reference_price,
            &self.limits.bot_clamp,
        );
        let mut sanitized = false;
        let mut candidate = forecast.series.clone();

        if !reasons.is_empty() {
            candidate = sanitize_series(&forecast.series, reference_price, &self.limits.bot_clamp);
            sanitized = true;
            let after = series_gates(
                &candidate,
                produced_at,
                reference_price,
                &self.limits.bot_clamp,
            );
            if !after.is_empty() {
                // Unrepairable (schema-level) failure.
                return BotRun {
                    name,
                    raw: Some(forecast),
                    validation: BotValidation { reasons, sanitized },
                    accepted_series: None,
                    confidence,
                };
            }
        }

        let envelope = envelope_gate(&candidate, reference_price, &self.limits.envelope);
        if !envelope.is_empty() {
            reasons.extend(envelope);
            return BotRun {
                name,
                raw: Some(forecast),
                validation: BotValidation { reasons, sanitized },
                accepted_series: None,
                confidence,
            };
        }

        BotRun {
            name,
            raw: Some(forecast),
            validation: BotValidation { reasons, sanitized },
            accepted_series: Some(candidate),
            confidence,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_record(
        &self,
        request: &PredictRequest,
        runs: &[BotRun],
        predicted_series: Vec<PredictedPoint>,
        overall_confidence: f64,
        reference_price: f64,
        produced_at: chrono::DateTime<chrono::Utc>,
        feature_snapshot: crate::domain::forecast::FeatureSnapshot,
        outcome: PredictionOutcome,
    ) -> PredictionRecord {
        let accepted_total: f64 = runs
            .iter()
            .filter(|r| r.accepted_series.is_some())
            .map(|r| r.confidence)
            .sum();

        let mut bot_contributions = BTreeMap::new();
        let mut raw_bot_outputs = BTreeMap::new();
        let mut validation_flags = BTreeMap::new();

        for run in runs {
            let accepted = run.accepted_series.is_some();
            let weight = if accepted && accepted_total > 0.0 {
                run.confidence / accepted_total
            } else if accepted {
                // All-zero confidences: highest self-confidence wins, and
                // with equal zeros the selected order decides; give the
                // first accepted bot full weight.
                let first_accepted = runs.iter().find(|r| r.accepted_series.is_some());
                if first_accepted.map(|r| r.name == run.name).unwrap_or(false) {
                    1.0
                } else {
                    0.0
                }
            } else {
                0.0
            };
            bot_contributions.insert(
                run.name.clone(),
                BotContribution {
                    weight,
                    confidence: run.confidence,
                    accepted,
                },
            );
            if let Some(raw) = &run.raw {
                raw_bot_outputs.insert(run.name.clone(), raw.series.clone());
            } else {
                raw_bot_outputs.insert(run.name.clone(), Vec::new());
            }
            validation_flags.insert(run.name.clone(), run.validation.clone());
        }

        PredictionRecord {
            id: Uuid::new_v4(),
            symbol: request.symbol.clone(),
            timeframe: request.timeframe,
            horizon_minutes: request.horizon_minutes,
            produced_at,
            reference_price,
            predicted_series,
            overall_confidence,
            bot_contributions,
            raw_bot_outputs,
            validation_flags,
            feature_snapshot,
            outcome,
        }
    }
}

/// Confidence-weighted mean per timestep across the surviving series,
/// truncated to the shortest survivor. All-zero weights fall back to the
/// highest self-confidence, ties broken by `selected` order.
fn merge_survivors(survivors: &[&BotRun], selected: &[String]) -> Vec<PredictedPoint> {
    let total: f64 = survivors.iter().map(|r| r.confidence).sum();

    if total <= 0.0 {
        let mut ordered: Vec<&&BotRun> = survivors.iter().collect();
        ordered.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| position(selected, &a.name).cmp(&position(selected, &b.name)))
        });
        return ordered
            .first()
            .and_then(|r| r.accepted_series.clone())
            .unwrap_or_default();
    }

    let min_len = survivors
        .iter()
        .filter_map(|r| r.accepted_series.as_ref().map(|s| s.len()))
        .min()
        .unwrap_or(0);

    (0..min_len)
        .map(|i| {
            let mut price = 0.0;
            let mut point_confidence = 0.0;
            let mut ts = None;
            for run in survivors {
                let series = run.accepted_series.as_ref().expect("survivor has series");
                let weight = run.confidence / total;
                price += series[i].price * weight;
                point_confidence += series[i].confidence * weight;
                if ts.is_none() {
                    ts = Some(series[i].ts);
                }
            }
            PredictedPoint {
                ts: ts.expect("at least one survivor"),
                price,
                confidence: point_confidence.clamp(0.0, 1.0),
            }
        })
        .collect()
}

/// Weighted mean of survivor confidences scaled by the survivor ratio:
/// fewer survivors, lower confidence.
fn overall_confidence(survivors: &[&BotRun], requested: usize) -> f64 {
    if survivors.is_empty() || requested == 0 {
        return 0.0;
    }
    let total: f64 = survivors.iter().map(|r| r.confidence).sum();
    let weighted = if total > 0.0 {
        survivors.iter().map(|r| r.confidence * r.confidence / total).sum()
    } else {
        0.0
    };
    let ratio = survivors.len() as f64 / requested as f64;
    (weighted * ratio).clamp(0.0, 1.0)
}

fn position(selected: &[String], name: &str) -> usize {
    selected
        .iter()
        .position(|s| s == name)
        .unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(name: &str, confidence: f64, prices: &[f64]) -> BotRun {
        let series: Vec<PredictedPoint> = prices
            .iter()
            .enumerate()
            .map(|(i, p)| PredictedPoint {
                ts: crate::infrastructure::mock::utc(2025, 6, 2, 5, 0)
                    + chrono::Duration::minutes(5 * (i as i64 + 1)),
                price: *p,
                confidence,
            })
            .collect();
        BotRun {
            name: name.to_string(),
            raw: None,
            validation: BotValidation::clean(),
            accepted_series: Some(series),
            confidence,
        }
    }

    #[test]
    fn merge_weights_by_confidence() {
        let a = run("a", 0.75, &[100.0, 100.0]);
        let b = run("b", 0.25, &[104.0, 108.0]);
        let merged = merge_survivors(&[&a, &b], &["a".to_string(), "b".to_string()]);
        assert_eq!(merged.len(), 2);
        assert!((merged[0].price - 101.0).abs() < 1e-9);
        assert!((merged[1].price - 102.0).abs() < 1e-9);
    }

    #[test]
    fn zero_weights_fall_back_to_selection_order() {
        let a = run("a", 0.0, &[100.0]);
        let b = run("b", 0.0, &[110.0]);
        let merged = merge_survivors(&[&a, &b], &["b".to_string(), "a".to_string()]);
        assert_eq!(merged[0].price, 110.0);
    }

    #[test]
    fn survivor_ratio_scales_confidence() {
        let a = run("a", 0.8, &[100.0]);
        // One survivor of two requested: 0.8 * 0.5.
        let overall = overall_confidence(&[&a], 2);
        assert!((overall - 0.4).abs() < 1e-9);
    }

    #[test]
    fn truncates_to_shortest_survivor() {
        let a = run("a", 0.5, &[100.0, 101.0, 102.0]);
        let b = run("b", 0.5, &[100.0, 103.0]);
        let merged = merge_survivors(&[&a, &b], &["a".to_string(), "b".to_string()]);
        assert_eq!(merged.len(), 2);
    }
}
