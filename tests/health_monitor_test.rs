mod common;

use candlecast::application::health_monitor::HealthMonitor;
use candlecast::domain::forecast::{
    BotContribution, BotValidation, FeatureSnapshot, PredictedPoint, PredictionOutcome,
    PredictionRecord,
};
use candlecast::domain::health::Health;
use candlecast::domain::market::{Timeframe, TradingCalendar};
use candlecast::domain::training::{TrainParams, TrainingJob, TrainingRecord, TrainingStatus};
use chrono::Duration;
use common::{Harness, test_now};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

fn monitor(harness: &Harness) -> HealthMonitor {
    let calendar: Arc<dyn TradingCalendar> = harness.calendar.clone();
    HealthMonitor::new(
        Arc::clone(&harness.training_repo),
        Arc::clone(&harness.prediction_repo),
        Arc::clone(&harness.candle_repo),
        calendar,
        harness.config.health,
    )
}

fn completed_record(bot: &str, rmse: f64, finished_hours_ago: i64) -> TrainingRecord {
    let job = TrainingJob::new(
        "ACME",
        Timeframe::FiveMin,
        bot,
        TrainParams::default(),
        test_now(),
    );
    let mut record = TrainingRecord::started(&job, test_now() - Duration::hours(finished_hours_ago + 1));
    record.status = TrainingStatus::Completed;
    record.finished_at = Some(test_now() - Duration::hours(finished_hours_ago));
    record.test_rmse = Some(rmse);
    record.test_mae = Some(rmse * 0.8);
    record.data_points_used = 500;
    record
}

/// A persisted prediction whose raw output for `bot` misses every
/// realized close by exactly `error`.
fn prediction_with_error(
    bot: &str,
    candle_ts: Vec<chrono::DateTime<chrono::Utc>>,
    realized: f64,
    error: f64,
) -> PredictionRecord {
    let series: Vec<PredictedPoint> = candle_ts
        .iter()
        .map(|ts| PredictedPoint {
            ts: *ts,
            price: realized + error,
            confidence: 0.5,
        })
        .collect();
    let mut raw = BTreeMap::new();
    raw.insert(bot.to_string(), series.clone());
    let mut contributions = BTreeMap::new();
    contributions.insert(
        bot.to_string(),
        BotContribution {
            weight: 1.0,
            confidence: 0.5,
            accepted: true,
        },
    );
    let mut flags = BTreeMap::new();
    flags.insert(bot.to_string(), BotValidation::clean());

    PredictionRecord {
        id: Uuid::new_v4(),
        symbol: "ACME".to_string(),
        timeframe: Timeframe::FiveMin,
        horizon_minutes: 60,
        produced_at: candle_ts.first().copied().unwrap() - Duration::minutes(5),
        reference_price: realized,
        predicted_series: series,
        overall_confidence: 0.5,
        bot_contributions: contributions,
        raw_bot_outputs: raw,
        validation_flags: flags,
        feature_snapshot: FeatureSnapshot::default(),
        outcome: PredictionOutcome::Merged,
    }
}

#[tokio::test]
async fn sustained_drift_promotes_to_red() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(&dir).await;

    // Realized closes at 100; the bot predicted 102.4 throughout, so the
    // recent RMSE is 2.4 against a training RMSE of 1.0 -> drift 1.4.
    let candles = harness.seed_candles("ACME", 50, 100.0).await;
    let ts: Vec<_> = candles[candles.len() - 12..].iter().map(|c| c.ts).collect();

    harness
        .training_repo
        .insert(&completed_record("ridge", 1.0, 2))
        .await
        .unwrap();
    harness
        .prediction_repo
        .save(&prediction_with_error("ridge", ts, 100.0, 2.4))
        .await
        .unwrap();

    let report = monitor(&harness).models_report().await.unwrap();
    assert_eq!(report.len(), 1);
    let entry = &report[0];
    assert_eq!(entry.record.bot_name, "ridge");
    assert!((entry.recent_rmse.unwrap() - 2.4).abs() < 1e-9);
    assert!((entry.drift_score.unwrap() - 1.4).abs() < 1e-9);
    assert_eq!(entry.health, Health::Red);
}

#[tokio::test]
async fn fresh_accurate_model_is_green() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(&dir).await;

    let candles = harness.seed_candles("ACME", 50, 100.0).await;
    let ts: Vec<_> = candles[candles.len() - 12..].iter().map(|c| c.ts).collect();

    harness
        .training_repo
        .insert(&completed_record("ridge", 1.0, 2))
        .await
        .unwrap();
    // Recent error 1.05 vs training 1.0 -> drift 0.05, well under yellow.
    harness
        .prediction_repo
        .save(&prediction_with_error("ridge", ts, 100.0, 1.05))
        .await
        .unwrap();

    let report = monitor(&harness).models_report().await.unwrap();
    assert_eq!(report[0].health, Health::Green);
}

#[tokio::test]
async fn stale_model_without_predictions_degrades_by_age() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(&dir).await;

    harness
        .training_repo
        .insert(&completed_record("momentum", 1.0, 30))
        .await
        .unwrap();

    let report = monitor(&harness).models_report().await.unwrap();
    let entry = &report[0];
    // No realized data yet: drift unknown, age alone puts it at yellow.
    assert!(entry.recent_rmse.is_none());
    assert_eq!(entry.health, Health::Yellow);
}

#[tokio::test]
async fn failed_training_is_red_regardless_of_age() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(&dir).await;

    let mut record = completed_record("momentum", 1.0, 1);
    record.status = TrainingStatus::Failed;
    record.error_message = Some("forced_cancel".to_string());
    record.test_rmse = None;
    harness.training_repo.insert(&record).await.unwrap();

    let report = monitor(&harness).models_report().await.unwrap();
    assert_eq!(report[0].health, Health::Red);
}
