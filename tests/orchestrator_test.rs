mod common;

use candlecast::application::orchestrator::{PredictRequest, PredictionOrchestrator};
use candlecast::domain::forecast::PredictionOutcome;
use candlecast::domain::market::Timeframe;
use candlecast::domain::ports::CandleProvider;
use candlecast::domain::validation::RejectReason;
use candlecast::infrastructure::bots::BotRegistry;
use candlecast::infrastructure::hub::SubscriptionHub;
use candlecast::infrastructure::mock::{MockBot, MockProvider};
use common::Harness;
use std::sync::Arc;
use std::time::Duration;

async fn orchestrator(harness: &Harness, registry: BotRegistry) -> Arc<PredictionOrchestrator> {
    let provider = Arc::new(MockProvider::new("primary"));
    let loader = harness.loader(vec![provider as Arc<dyn CandleProvider>]);
    let hub = Arc::new(SubscriptionHub::new(Duration::from_millis(500)));
    Arc::new(PredictionOrchestrator::new(
        &harness.config,
        loader,
        Arc::new(registry),
        Arc::clone(&harness.prediction_repo),
        hub,
        harness.metrics.clone(),
    ))
}

#[tokio::test]
async fn drifting_bot_is_rejected_and_survivor_ratio_applies() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(&dir).await;
    harness.seed_candles("ACME", 120, 100.0).await;

    // Bot A drifts 2% at most; bot B runs 50-100% away from reference.
    let mut registry = BotRegistry::new();
    registry.register(Arc::new(MockBot::linear("bot_a", 101.0, 102.0, 0.8)));
    registry.register(Arc::new(MockBot::linear("bot_b", 150.0, 200.0, 0.9)));

    let orchestrator = orchestrator(&harness, registry).await;
    let record = orchestrator
        .predict(PredictRequest {
            symbol: "ACME".to_string(),
            timeframe: Timeframe::FiveMin,
            horizon_minutes: 60,
            selected_bots: Some(vec!["bot_a".to_string(), "bot_b".to_string()]),
            use_cache: true,
        })
        .await
        .unwrap();

    assert_eq!(record.outcome, PredictionOutcome::Merged);
    assert_eq!(record.survivors(), vec!["bot_a"]);
    assert!(record.bot_contributions["bot_a"].accepted);
    assert!(!record.bot_contributions["bot_b"].accepted);
    assert!(
        record.validation_flags["bot_b"]
            .reasons
            .contains(&RejectReason::TotalDriftExceeded)
    );

    // overall = bot_a confidence scaled by the 1/2 survivor ratio.
    assert!((record.overall_confidence - 0.4).abs() < 1e-9);

    // Raw outputs are retained for both bots regardless of acceptance.
    assert_eq!(record.raw_bot_outputs.len(), 2);
    assert_eq!(record.raw_bot_outputs["bot_b"].first().unwrap().price, 150.0);

    // Merged series is bot_a's alone and obeys the envelope.
    assert_eq!(record.predicted_series.len(), 12);
    for point in &record.predicted_series {
        assert!(point.ts >= record.produced_at);
        assert!((point.price - record.reference_price).abs() / record.reference_price <= 0.12);
    }
}

#[tokio::test]
async fn slow_bot_times_out_and_rest_survive() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(&dir).await;
    harness.seed_candles("ACME", 120, 100.0).await;

    let mut registry = BotRegistry::new();
    registry.register(Arc::new(MockBot::flat("steady", 0.6)));
    registry.register(Arc::new(MockBot::slow(
        "sleepy",
        Duration::from_millis(1800),
        0.9,
    )));

    let orchestrator = orchestrator(&harness, registry).await;
    let record = orchestrator
        .predict(PredictRequest {
            symbol: "ACME".to_string(),
            timeframe: Timeframe::FiveMin,
            horizon_minutes: 30,
            selected_bots: None,
            use_cache: true,
        })
        .await
        .unwrap();

    assert_eq!(record.survivors(), vec!["steady"]);
    assert!(
        record.validation_flags["sleepy"]
            .reasons
            .contains(&RejectReason::TimedOut)
    );
}

#[tokio::test]
async fn zero_survivors_still_persists_an_audit_record() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(&dir).await;
    harness.seed_candles("ACME", 120, 100.0).await;

    let mut registry = BotRegistry::new();
    registry.register(Arc::new(MockBot::linear("wild", 400.0, 500.0, 0.9)));
    registry.register(Arc::new(MockBot::failing("broken", "shape mismatch")));

    let orchestrator = orchestrator(&harness, registry).await;
    let record = orchestrator
        .predict(PredictRequest {
            symbol: "ACME".to_string(),
            timeframe: Timeframe::FiveMin,
            horizon_minutes: 60,
            selected_bots: None,
            use_cache: true,
        })
        .await
        .unwrap();

    assert_eq!(record.outcome, PredictionOutcome::NoValidPrediction);
    assert!(record.predicted_series.is_empty());
    assert_eq!(record.overall_confidence, 0.0);
    assert!(record.survivors().is_empty());
    assert!(
        record.validation_flags["broken"]
            .reasons
            .contains(&RejectReason::BotError)
    );

    // Audit record is queryable afterwards.
    let stored = harness
        .prediction_repo
        .find_latest("ACME", Timeframe::FiveMin)
        .await
        .unwrap()
        .expect("record persisted");
    assert_eq!(stored.id, record.id);
    assert_eq!(stored.outcome, PredictionOutcome::NoValidPrediction);
    assert_eq!(stored.raw_bot_outputs.len(), 2);
}

#[tokio::test]
async fn merged_record_round_trips_through_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(&dir).await;
    harness.seed_candles("ACME", 120, 100.0).await;

    let mut registry = BotRegistry::new();
    registry.register(Arc::new(MockBot::linear("bot_a", 100.5, 101.0, 0.7)));
    registry.register(Arc::new(MockBot::linear("bot_b", 99.5, 99.0, 0.3)));

    let orchestrator = orchestrator(&harness, registry).await;
    let record = orchestrator
        .predict(PredictRequest {
            symbol: "ACME".to_string(),
            timeframe: Timeframe::FiveMin,
            horizon_minutes: 30,
            selected_bots: None,
            use_cache: true,
        })
        .await
        .unwrap();

    assert_eq!(record.survivors().len(), 2);
    // Weighted between the two bots, tilted towards bot_a.
    let first = record.predicted_series.first().unwrap();
    assert!(first.price > 99.5 && first.price < 100.5);

    let stored = harness
        .prediction_repo
        .find_latest("ACME", Timeframe::FiveMin)
        .await
        .unwrap()
        .expect("record persisted");
    assert_eq!(stored.predicted_series, record.predicted_series);
    assert_eq!(stored.bot_contributions, record.bot_contributions);
    assert_eq!(stored.feature_snapshot, record.feature_snapshot);
}
