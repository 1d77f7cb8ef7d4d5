//! Deterministic rolling-window loader over the tiered store:
//! hot TTL cache -> warm LRU -> persistent store -> cold archive ->
//! primary upstream -> fallback upstream. Every candle that enters the
//! system passes through `canonicalize` here, nowhere else: parse-to-UTC,
//! future clamp, session membership, boundary alignment, OHLC invariants,
//! dedup. The loader is also the only writer of candles to the store.

use crate::config::Config;
use crate::domain::errors::ServiceError;
use crate::domain::market::{Candle, Provenance, Timeframe, TradingCalendar, WindowSlice};
use crate::domain::ports::{CandleProvider, RawCandle};
use crate::infrastructure::cache::{ColdArchive, HotCache, WarmCache, WindowKey};
use crate::infrastructure::observability::Metrics;
use crate::domain::repositories::CandleRepository;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    pub bypass_cache: bool,
    /// Skip the minimum-coverage check; used by `fetch_latest`.
    pub skip_min_check: bool,
}

pub struct WindowLoader {
    hot: HotCache,
    warm: WarmCache,
    archive: ColdArchive,
    candle_repo: Arc<dyn CandleRepository>,
    providers: Vec<Arc<dyn CandleProvider>>,
    calendar: Arc<dyn TradingCalendar>,
    metrics: Metrics,
    min_candles: usize,
    hot_ttl_recent: Duration,
    hot_ttl_historic: Duration,
    /// Serializes write-through per (symbol, timeframe) so persisted
    /// candles stay strictly increasing under concurrent loads.
    write_locks: Mutex<HashMap<(String, Timeframe), Arc<Mutex<()>>>>,
}

impl WindowLoader {
    pub fn new(
        config: &Config,
        candle_repo: Arc<dyn CandleRepository>,
        providers: Vec<Arc<dyn CandleProvider>>,
        calendar: Arc<dyn TradingCalendar>,
        metrics: Metrics,
    ) -> Self {
        Self {
            hot: HotCache::new(),
            warm: WarmCache::new(config.warm_capacity),
            archive: ColdArchive::new(config.archive_root.clone()),
            candle_repo,
            providers,
            calendar,
            metrics,
            min_candles: config.min_window_candles,
            hot_ttl_recent: Duration::from_secs(config.hot_ttl_recent_secs),
            hot_ttl_historic: Duration::from_secs(config.hot_ttl_historic_secs),
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Load a validated window for `[from, to]`.
    pub async fn load(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        options: LoadOptions,
    ) -> Result<WindowSlice, ServiceError> {
        let now = self.calendar.now();
        let to = to.min(now + ChronoDuration::hours(1));
        if from >= to {
            return Err(ServiceError::DataUnavailable {
                symbol: symbol.to_string(),
                timeframe,
            });
        }
        let key = WindowKey::rounded(symbol, timeframe, from, to);

        if !options.bypass_cache {
            if let Some(slice) = self.hot.get(&key).await {
                self.tier_lookup("hot", true);
                return Ok((*slice).clone());
            }
            self.tier_lookup("hot", false);

            if let Some(slice) = self.warm.get(&key).await {
                self.tier_lookup("warm", true);
                let ttl = self.ttl_for(to, now);
                self.hot.put(key.clone(), Arc::clone(&slice), ttl).await;
                return Ok((*slice).clone());
            }
            self.tier_lookup("warm", false);
        }

        let stored = self
            .candle_repo
            .find_range(symbol, timeframe, from, to)
            .await
            .map_err(ServiceError::Internal)?;
        self.tier_lookup("store", !stored.is_empty());

        let mut merged =
            WindowSlice::assemble(symbol, timeframe, vec![stored]).map_err(internal)?;

        // Cold archive for the uncovered edges.
        let mut archive_batches = Vec::new();
        for (gap_from, gap_to) in self.edge_gaps(&merged, from, to, now) {
            let rows = self
                .archive
                .read_range(symbol, timeframe, gap_from, gap_to)
                .map_err(ServiceError::Internal)?;
            self.tier_lookup("archive", !rows.is_empty());
            if !rows.is_empty() {
                archive_batches.push(self.canonicalize_candles(rows, timeframe, now));
            }
        }
        if !archive_batches.is_empty() {
            archive_batches.insert(0, merged.candles().to_vec());
            merged = WindowSlice::assemble(symbol, timeframe, archive_batches).map_err(internal)?;
        }

        // Upstream for what is still missing.
        let mut fresh = Vec::new();
        for (gap_from, gap_to) in self.edge_gaps(&merged, from, to, now) {
            let candles = self
                .fetch_upstream(symbol, timeframe, gap_from, gap_to, now)
                .await?;
            fresh.extend(candles);
        }

        if !fresh.is_empty() {
            self.write_through(symbol, timeframe, &fresh).await?;
            merged = WindowSlice::assemble(
                symbol,
                timeframe,
                vec![merged.candles().to_vec(), fresh],
            )
            .map_err(internal)?;
        }

        if merged.is_empty() {
            return Err(ServiceError::DataUnavailable {
                symbol: symbol.to_string(),
                timeframe,
            });
        }
        if !options.skip_min_check && merged.len() < self.min_candles {
            return Err(ServiceError::InsufficientCoverage {
                symbol: symbol.to_string(),
                timeframe,
                got: merged.len(),
                need: self.min_candles,
            });
        }

        let shared = Arc::new(merged);
        let ttl = self.ttl_for(to, now);
        self.hot.put(key.clone(), Arc::clone(&shared), ttl).await;
        self.warm.put(key, Arc::clone(&shared)).await;
        Ok((*shared).clone())
    }

    /// Load the default rolling lookback window ending now.
    pub async fn load_lookback(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        lookback_days: i64,
        options: LoadOptions,
    ) -> Result<WindowSlice, ServiceError> {
        let now = self.calendar.now();
        self.load(
            symbol,
            timeframe,
            now - ChronoDuration::days(lookback_days),
            now,
            options,
        )
        .await
    }

    /// Newest candle through the same pipeline, unbounded upward edge.
    pub async fn fetch_latest(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Candle, ServiceError> {
        let now = self.calendar.now();
        let lookback_days = match timeframe {
            Timeframe::OneDay => 15,
            _ => 7,
        };
        let slice = self
            .load(
                symbol,
                timeframe,
                now - ChronoDuration::days(lookback_days),
                now,
                LoadOptions {
                    bypass_cache: true,
                    skip_min_check: true,
                },
            )
            .await?;
        slice
            .last()
            .cloned()
            .ok_or_else(|| ServiceError::DataUnavailable {
                symbol: symbol.to_string(),
                timeframe,
            })
    }

    pub async fn clear_caches(&self) {
        self.hot.clear().await;
        self.warm.clear().await;
        info!("candle caches cleared");
    }

    /// Uncovered head/tail ranges of `slice` against the request bounds.
    /// Interior gaps are expected (holidays, closed sessions) and are not
    /// refetched. The tail gap is clipped to `now` so a request with a
    /// future edge does not poll upstream for candles that cannot exist
    /// yet.
    fn edge_gaps(
        &self,
        slice: &WindowSlice,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        if slice.is_empty() {
            return vec![(from, to)];
        }
        let mut gaps = Vec::new();
        if let Some(gap) = slice.head_gap(from) {
            gaps.push(gap);
        }
        if let Some((gap_from, gap_to)) = slice.tail_gap(to.min(now)) {
            gaps.push((gap_from, gap_to));
        }
        gaps
    }

    /// Provider failover with per-timeframe chunking. The first provider
    /// in the configured order stamps `Provenance::Primary`, the rest
    /// `Provenance::Fallback`.
    async fn fetch_upstream(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Candle>, ServiceError> {
        let mut collected = Vec::new();
        let mut any_success = false;
        let mut last_error: Option<String> = None;

        let chunk = ChronoDuration::days(timeframe.max_span_days());
        let mut chunk_from = from;
        while chunk_from < to {
            let chunk_to = (chunk_from + chunk).min(to);

            for (index, provider) in self.providers.iter().enumerate() {
                match provider
                    .fetch_candles(symbol, timeframe, chunk_from, chunk_to)
                    .await
                {
                    Ok(raw) if raw.is_empty() => {
                        self.upstream_outcome(provider.name(), "empty");
                        any_success = true;
                    }
                    Ok(raw) => {
                        self.upstream_outcome(provider.name(), "ok");
                        any_success = true;
                        let provenance = if index == 0 {
                            Provenance::Primary
                        } else {
                            Provenance::Fallback
                        };
                        let candles =
                            self.canonicalize(symbol, timeframe, raw, provenance, now);
                        debug!(
                            "{}: {} candles for {} {} [{} - {}]",
                            provider.name(),
                            candles.len(),
                            symbol,
                            timeframe,
                            chunk_from,
                            chunk_to
                        );
                        if !candles.is_empty() {
                            collected.extend(candles);
                            break;
                        }
                    }
                    Err(e) => {
                        self.upstream_outcome(provider.name(), "error");
                        warn!(
                            "{} failed for {} {}: {}",
                            provider.name(),
                            symbol,
                            timeframe,
                            e
                        );
                        last_error = Some(format!("{}: {}", provider.name(), e));
                    }
                }
            }

            chunk_from = chunk_to;
        }

        if !any_success && collected.is_empty() {
            if let Some(last_error) = last_error {
                return Err(ServiceError::UpstreamFailure { last_error });
            }
        }
        Ok(collected)
    }

    /// The canonicalization pipeline for raw provider candles.
    fn canonicalize(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        raw: Vec<RawCandle>,
        provenance: Provenance,
        now: DateTime<Utc>,
    ) -> Vec<Candle> {
        let mut out: Vec<Candle> = Vec::with_capacity(raw.len());
        let mut rejected = 0usize;
        let future_limit = now + ChronoDuration::hours(1);

        for r in raw {
            let ts = r.ts.with_timezone(&Utc);
            let candle = Candle {
                symbol: symbol.to_string(),
                timeframe,
                ts,
                open: r.open,
                high: r.high,
                low: r.low,
                close: r.close,
                volume: r.volume,
                provenance,
            };
            if ts > future_limit
                || !self.calendar.in_session(ts)
                || !self.calendar.is_aligned(timeframe, ts)
                || !candle.ohlc_valid()
            {
                rejected += 1;
                continue;
            }
            out.push(candle);
        }
        if rejected > 0 {
            debug!(
                "canonicalize dropped {} of {} candles for {} {}",
                rejected,
                rejected + out.len(),
                symbol,
                timeframe
            );
        }
        out.sort_by_key(|c| c.ts);
        out.dedup_by_key(|c| c.ts);
        out
    }

    /// Re-validation for already-typed candles coming out of the archive.
    fn canonicalize_candles(
        &self,
        candles: Vec<Candle>,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> Vec<Candle> {
        let future_limit = now + ChronoDuration::hours(1);
        let mut out: Vec<Candle> = candles
            .into_iter()
            .filter(|c| {
                c.ts <= future_limit
                    && self.calendar.in_session(c.ts)
                    && self.calendar.is_aligned(timeframe, c.ts)
                    && c.ohlc_valid()
            })
            .collect();
        out.sort_by_key(|c| c.ts);
        out.dedup_by_key(|c| c.ts);
        out
    }

    /// Persist freshly fetched candles and append them to the archive,
    /// serialized per key.
    async fn write_through(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        fresh: &[Candle],
    ) -> Result<(), ServiceError> {
        let lock = {
            let mut locks = self.write_locks.lock().await;
            Arc::clone(
                locks
                    .entry((symbol.to_string(), timeframe))
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        let _guard = lock.lock().await;

        self.candle_repo
            .upsert_batch(fresh)
            .await
            .map_err(ServiceError::Internal)?;
        self.archive
            .append(symbol, timeframe, fresh)
            .map_err(ServiceError::Internal)?;
        debug!(
            "write-through: {} candles for {} {}",
            fresh.len(),
            symbol,
            timeframe
        );
        Ok(())
    }

    fn ttl_for(&self, to: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
        if to >= now - ChronoDuration::hours(24) {
            self.hot_ttl_recent
        } else {
            self.hot_ttl_historic
        }
    }

    fn tier_lookup(&self, tier: &str, hit: bool) {
        self.metrics
            .cache_lookups_total
            .with_label_values(&[tier, if hit { "hit" } else { "miss" }])
            .inc();
    }

    fn upstream_outcome(&self, provider: &str, outcome: &str) {
        self.metrics
            .upstream_fetches_total
            .with_label_values(&[provider, outcome])
            .inc();
    }
}

fn internal(e: crate::domain::market::window::WindowError) -> ServiceError {
    ServiceError::Internal(anyhow::anyhow!(e))
}
