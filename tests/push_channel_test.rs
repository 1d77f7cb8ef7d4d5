mod common;

use candlecast::application::health_monitor::HealthMonitor;
use candlecast::application::orchestrator::{PredictRequest, PredictionOrchestrator};
use candlecast::application::training_queue::TrainingQueue;
use candlecast::domain::events::HubEvent;
use candlecast::domain::market::{Timeframe, TradingCalendar};
use candlecast::domain::ports::CandleProvider;
use candlecast::domain::training::{TrainParams, TrainingJob, TrainingStatus};
use candlecast::infrastructure::bots::BotRegistry;
use candlecast::infrastructure::hub::SubscriptionHub;
use candlecast::infrastructure::mock::{MockBot, MockProvider};
use common::{Harness, test_now, wait_until};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn subscriber_receives_prediction_updates_for_its_topic() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(&dir).await;
    harness.seed_candles("ACME", 120, 100.0).await;

    let hub = Arc::new(SubscriptionHub::new(Duration::from_millis(500)));
    let mut registry = BotRegistry::new();
    registry.register(Arc::new(MockBot::flat("steady", 0.7)));

    let provider = Arc::new(MockProvider::new("primary"));
    let loader = harness.loader(vec![provider as Arc<dyn CandleProvider>]);
    let orchestrator = PredictionOrchestrator::new(
        &harness.config,
        loader,
        Arc::new(registry),
        Arc::clone(&harness.prediction_repo),
        Arc::clone(&hub),
        harness.metrics.clone(),
    );

    let (client, mut rx) = hub.register().await;
    hub.subscribe(client, "ACME", Timeframe::FiveMin).await;
    assert!(matches!(rx.recv().await, Some(HubEvent::Subscribed { .. })));

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

    match rx.recv().await {
        Some(HubEvent::PredictionUpdate { prediction, limits }) => {
            assert_eq!(prediction.id, record.id);
            assert_eq!(prediction.symbol, "ACME");
            // The emitted contract carries the envelope for client-side
            // re-verification.
            assert_eq!(limits.total_max_pct, harness.config.drift.envelope.total_max_pct);
        }
        other => panic!(
            "expected prediction update, got {:?}",
            other.map(|e| serde_json::to_string(&e))
        ),
    }
}

#[tokio::test]
async fn training_progress_flows_to_every_client() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(&dir).await;
    harness.seed_candles("SYM", 120, 100.0).await;

    let hub = Arc::new(SubscriptionHub::new(Duration::from_millis(500)));
    let mut registry = BotRegistry::new();
    registry.register(Arc::new(
        MockBot::flat("bot_a", 0.5).with_epoch_delay(Duration::from_millis(10)),
    ));

    let provider = Arc::new(MockProvider::new("primary"));
    let loader = harness.loader(vec![provider as Arc<dyn CandleProvider>]);
    let calendar: Arc<dyn TradingCalendar> = harness.calendar.clone();
    let health = Arc::new(HealthMonitor::new(
        Arc::clone(&harness.training_repo),
        Arc::clone(&harness.prediction_repo),
        Arc::clone(&harness.candle_repo),
        Arc::clone(&calendar),
        harness.config.health,
    ));
    let queue = Arc::new(TrainingQueue::new(
        &harness.config,
        loader,
        Arc::new(registry),
        Arc::clone(&harness.training_repo),
        health,
        Arc::clone(&hub),
        calendar,
        harness.metrics.clone(),
    ));

    // A client with no topic subscription still gets training broadcasts.
    let (_client, mut rx) = hub.register().await;

    let job = TrainingJob::new(
        "SYM",
        Timeframe::FiveMin,
        "bot_a",
        TrainParams {
            epochs: 4,
            batch_size: 8,
        },
        test_now(),
    );
    let job_id = job.id;
    queue.enqueue(vec![job]).await;

    wait_until(5000, || async {
        queue.status().await.completed_count == 1
    })
    .await;

    // Drain events: expect at least a start, epoch ticks in order, and a
    // terminal completed event, all for our job.
    let mut batches = Vec::new();
    let mut saw_completed = false;
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(200), rx.recv()).await
    {
        if let HubEvent::TrainingProgress(progress) = event {
            assert_eq!(progress.training_id, job_id);
            assert_eq!(progress.symbol, "SYM");
            batches.push(progress.batch);
            if progress.status == TrainingStatus::Completed {
                saw_completed = true;
                assert!((progress.progress_percent - 100.0).abs() < 1e-9);
            }
        }
    }
    assert!(saw_completed, "terminal completed event missing");
    let epoch_ticks: Vec<_> = batches.iter().filter(|b| **b > 0 && **b <= 4).collect();
    assert!(!epoch_ticks.is_empty());
    let mut sorted = epoch_ticks.clone();
    sorted.sort();
    assert_eq!(epoch_ticks, sorted, "progress ticks arrived out of order");
}
