use crate::domain::market::{Timeframe, WindowSlice};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Cache key for a window request with bounds rounded to whole periods,
/// so near-identical requests coalesce onto one entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub from_ts: i64,
    pub to_ts: i64,
}

impl WindowKey {
    pub fn rounded(
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Self {
        let step = timeframe.seconds();
        Self {
            symbol: symbol.to_string(),
            timeframe,
            from_ts: from.timestamp() - from.timestamp().rem_euclid(step),
            to_ts: to.timestamp() - to.timestamp().rem_euclid(step),
        }
    }
}

struct Entry {
    slice: Arc<WindowSlice>,
    inserted: Instant,
    ttl: Duration,
}

const SHARDS: usize = 16;

/// Hot tier: shared TTL map of immutable window snapshots, sharded by key
/// hash so concurrent symbols never contend on one lock. Entries for
/// windows touching recent data get a short TTL; purely historical
/// windows live longer. Expired entries are dropped lazily on access.
pub struct HotCache {
    shards: Vec<RwLock<HashMap<WindowKey, Entry>>>,
}

impl HotCache {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &WindowKey) -> &RwLock<HashMap<WindowKey, Entry>> {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % SHARDS]
    }

    pub async fn get(&self, key: &WindowKey) -> Option<Arc<WindowSlice>> {
        let shard = self.shard(key);
        {
            let entries = shard.read().await;
            match entries.get(key) {
                Some(entry) if entry.inserted.elapsed() < entry.ttl => {
                    return Some(Arc::clone(&entry.slice));
                }
                Some(_) => {}
                None => return None,
            }
        }
        // Expired: take the write lock only for the removal.
        shard.write().await.remove(key);
        None
    }

    pub async fn put(&self, key: WindowKey, slice: Arc<WindowSlice>, ttl: Duration) {
        self.shard(&key).write().await.insert(
            key,
            Entry {
                slice,
                inserted: Instant::now(),
                ttl,
            },
        );
    }

    pub async fn clear(&self) {
        for shard in &self.shards {
            shard.write().await.clear();
        }
    }

    pub async fn len(&self) -> usize {
        let mut total = 0;
        for shard in &self.shards {
            total += shard.read().await.len();
        }
        total
    }
}

impl Default for HotCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::Candle;
    use chrono::TimeZone;

    fn slice() -> Arc<WindowSlice> {
        Arc::new(WindowSlice::new("ACME", Timeframe::FiveMin, Vec::<Candle>::new()).unwrap())
    }

    fn key() -> WindowKey {
        WindowKey::rounded(
            "ACME",
            Timeframe::FiveMin,
            Utc.with_ymd_and_hms(2025, 6, 2, 3, 47, 12).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 2, 9, 58, 3).unwrap(),
        )
    }

    #[test]
    fn keys_round_to_period_boundaries() {
        let k = key();
        assert_eq!(k.from_ts % 300, 0);
        assert_eq!(k.to_ts % 300, 0);
        let again = WindowKey::rounded(
            "ACME",
            Timeframe::FiveMin,
            Utc.with_ymd_and_hms(2025, 6, 2, 3, 46, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 2, 9, 59, 59).unwrap(),
        );
        assert_eq!(k, again);
    }

    #[tokio::test]
    async fn expires_after_ttl() {
        let cache = HotCache::new();
        cache.put(key(), slice(), Duration::from_millis(10)).await;
        assert!(cache.get(&key()).await.is_some());
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(cache.get(&key()).await.is_none());
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn clear_empties_everything() {
        let cache = HotCache::new();
        cache.put(key(), slice(), Duration::from_secs(60)).await;
        cache.clear().await;
        assert!(cache.get(&key()).await.is_none());
    }
}
