mod common;

use candlecast::application::window_loader::LoadOptions;
use candlecast::domain::errors::ServiceError;
use candlecast::domain::market::{Provenance, Timeframe};
use candlecast::domain::ports::CandleProvider;
use candlecast::infrastructure::mock::{MockProvider, raw_candles};
use chrono::Duration;
use common::{Harness, test_now};
use rust_decimal::Decimal;
use std::sync::Arc;

#[tokio::test]
async fn upstream_failover_serves_fallback_and_writes_through() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(&dir).await;

    let primary = Arc::new(MockProvider::new("primary"));
    let fallback = Arc::new(MockProvider::new("fallback"));
    let from = test_now() - Duration::hours(10);
    primary.push_candles(Vec::new()); // primary comes back empty for XYZ
    fallback.push_candles(raw_candles(from, Timeframe::FiveMin, 100, 50.0));

    let loader = harness.loader(vec![primary.clone() as Arc<dyn CandleProvider>, fallback.clone()]);
    let slice = loader
        .load("XYZ", Timeframe::FiveMin, from, test_now(), LoadOptions::default())
        .await
        .unwrap();

    assert_eq!(slice.len(), 100);
    assert!(slice.candles().iter().all(|c| c.provenance == Provenance::Fallback));
    assert_eq!(primary.call_count(), 1);
    assert_eq!(fallback.call_count(), 1);

    // Write-through: the store now holds the candles.
    let stored = harness
        .candle_repo
        .find_range("XYZ", Timeframe::FiveMin, from, test_now())
        .await
        .unwrap();
    assert_eq!(stored.len(), 100);
}

#[tokio::test]
async fn scroll_back_fetches_only_the_missing_head() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(&dir).await;

    // Store covers [t1, t2]; ask for [t1 - 24h, t2].
    let seeded = harness.seed_candles("ACME", 50, 100.0).await;
    let t1 = seeded.first().unwrap().ts;
    let t2 = seeded.last().unwrap().ts;
    let from = t1 - Duration::hours(24);

    let provider = Arc::new(MockProvider::new("primary"));
    provider.push_candles(raw_candles(from, Timeframe::FiveMin, 288, 99.0));

    let loader = harness.loader(vec![provider.clone() as Arc<dyn CandleProvider>]);
    let slice = loader
        .load("ACME", Timeframe::FiveMin, from, t2, LoadOptions::default())
        .await
        .unwrap();

    // Upstream was asked only for the uncovered head.
    let calls = provider.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].2, from);
    assert!(calls[0].3 <= t1);

    assert_eq!(slice.first().unwrap().ts, from);
    assert_eq!(slice.last().unwrap().ts, t2);
    // Merged, deduplicated, strictly ascending.
    for pair in slice.candles().windows(2) {
        assert!(pair[0].ts < pair[1].ts);
    }
}

#[tokio::test]
async fn repeat_load_is_bit_equal_and_cached() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(&dir).await;

    let provider = Arc::new(MockProvider::new("primary"));
    let from = test_now() - Duration::hours(5);
    provider.push_candles(raw_candles(from, Timeframe::FiveMin, 60, 42.0));

    let loader = harness.loader(vec![provider.clone() as Arc<dyn CandleProvider>]);
    let first = loader
        .load("ACME", Timeframe::FiveMin, from, test_now(), LoadOptions::default())
        .await
        .unwrap();
    let second = loader
        .load("ACME", Timeframe::FiveMin, from, test_now(), LoadOptions::default())
        .await
        .unwrap();

    assert_eq!(first, second);
    // Second answer came from the hot tier.
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn canonicalization_rejects_invalid_candles() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(&dir).await;

    let provider = Arc::new(MockProvider::new("primary"));
    let from = test_now() - Duration::hours(4);
    let mut raw = raw_candles(from, Timeframe::FiveMin, 20, 100.0);

    // Future candle beyond the +1h clamp.
    let mut future = raw_candles(test_now() + Duration::hours(3), Timeframe::FiveMin, 1, 100.0);
    raw.append(&mut future);
    // Misaligned timestamp.
    let mut skewed = raw_candles(from + Duration::seconds(90), Timeframe::FiveMin, 1, 100.0);
    raw.append(&mut skewed);
    // Inverted OHLC.
    let mut broken = raw_candles(from + Duration::hours(2), Timeframe::FiveMin, 1, 100.0);
    broken[0].low = Decimal::from(200);
    raw.append(&mut broken);

    provider.push_candles(raw);

    let loader = harness.loader(vec![provider as Arc<dyn CandleProvider>]);
    let slice = loader
        .load("ACME", Timeframe::FiveMin, from, test_now(), LoadOptions::default())
        .await
        .unwrap();

    assert_eq!(slice.len(), 20);
    let limit = test_now() + Duration::hours(1);
    assert!(slice.candles().iter().all(|c| c.ts <= limit));
    assert!(slice.candles().iter().all(|c| c.ohlc_valid()));
    assert!(slice.candles().iter().all(|c| c.ts.timestamp() % 300 == 0));
}

#[tokio::test]
async fn empty_everything_is_data_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(&dir).await;
    let provider = Arc::new(MockProvider::new("primary"));

    let loader = harness.loader(vec![provider as Arc<dyn CandleProvider>]);
    let result = loader
        .load(
            "NOPE",
            Timeframe::FiveMin,
            test_now() - Duration::hours(3),
            test_now(),
            LoadOptions::default(),
        )
        .await;
    assert!(matches!(result, Err(ServiceError::DataUnavailable { .. })));
}

#[tokio::test]
async fn thin_results_are_insufficient_coverage() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(&dir).await;

    let provider = Arc::new(MockProvider::new("primary"));
    let from = test_now() - Duration::hours(3);
    provider.push_candles(raw_candles(from, Timeframe::FiveMin, 4, 10.0));

    let loader = harness.loader(vec![provider as Arc<dyn CandleProvider>]);
    let result = loader
        .load("ACME", Timeframe::FiveMin, from, test_now(), LoadOptions::default())
        .await;
    match result {
        Err(ServiceError::InsufficientCoverage { got, need, .. }) => {
            assert_eq!(got, 4);
            assert_eq!(need, 10);
        }
        other => panic!("expected InsufficientCoverage, got {:?}", other.map(|s| s.len())),
    }
}

#[tokio::test]
async fn all_providers_error_surfaces_upstream_failure() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(&dir).await;

    let primary = Arc::new(MockProvider::new("primary"));
    let fallback = Arc::new(MockProvider::new("fallback"));
    primary.push_error("rate limited");
    fallback.push_error("maintenance window");

    let loader = harness.loader(vec![
        primary as Arc<dyn CandleProvider>,
        fallback as Arc<dyn CandleProvider>,
    ]);
    let result = loader
        .load(
            "ACME",
            Timeframe::FiveMin,
            test_now() - Duration::hours(3),
            test_now(),
            LoadOptions::default(),
        )
        .await;
    match result {
        Err(ServiceError::UpstreamFailure { last_error }) => {
            assert!(last_error.contains("maintenance window"));
        }
        other => panic!("expected UpstreamFailure, got {:?}", other.map(|s| s.len())),
    }
}

#[tokio::test]
async fn fetch_latest_returns_newest_candle() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(&dir).await;
    let seeded = harness.seed_candles("ACME", 40, 101.5).await;

    let provider = Arc::new(MockProvider::new("primary"));
    let loader = harness.loader(vec![provider as Arc<dyn CandleProvider>]);

    let latest = loader.fetch_latest("ACME", Timeframe::FiveMin).await.unwrap();
    assert_eq!(latest.ts, seeded.last().unwrap().ts);
}

#[tokio::test]
async fn clear_caches_forces_refetch_from_store() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(&dir).await;

    let provider = Arc::new(MockProvider::new("primary"));
    let from = test_now() - Duration::hours(5);
    provider.push_candles(raw_candles(from, Timeframe::FiveMin, 60, 42.0));

    let loader = harness.loader(vec![provider.clone() as Arc<dyn CandleProvider>]);
    let first = loader
        .load("ACME", Timeframe::FiveMin, from, test_now(), LoadOptions::default())
        .await
        .unwrap();
    loader.clear_caches().await;
    let second = loader
        .load("ACME", Timeframe::FiveMin, from, test_now(), LoadOptions::default())
        .await
        .unwrap();

    // Same data, now served by the store (provider script is exhausted,
    // further calls return empty batches).
    assert_eq!(first.len(), second.len());
    assert!(second.candles().iter().all(|c| c.provenance == Provenance::Db));
}
