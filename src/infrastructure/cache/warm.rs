use super::hot::WindowKey;
use crate::domain::market::WindowSlice;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Warm tier: bounded in-process LRU of window snapshots. Sized around a
/// hundred entries; hit promotes to most-recent, insert evicts the oldest.
pub struct WarmCache {
    capacity: usize,
    inner: Mutex<WarmInner>,
}

struct WarmInner {
    map: HashMap<WindowKey, Arc<WindowSlice>>,
    order: VecDeque<WindowKey>,
}

impl WarmCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(WarmInner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub async fn get(&self, key: &WindowKey) -> Option<Arc<WindowSlice>> {
        let mut inner = self.inner.lock().await;
        let hit = inner.map.get(key).cloned();
        if hit.is_some() {
            if let Some(pos) = inner.order.iter().position(|k| k == key) {
                inner.order.remove(pos);
            }
            inner.order.push_back(key.clone());
        }
        hit
    }

    pub async fn put(&self, key: WindowKey, slice: Arc<WindowSlice>) {
        let mut inner = self.inner.lock().await;
        if inner.map.insert(key.clone(), slice).is_none() {
            inner.order.push_back(key);
        } else if let Some(pos) = inner.order.iter().position(|k| *k == key) {
            inner.order.remove(pos);
            inner.order.push_back(key);
        }
        while inner.map.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.map.remove(&oldest);
            } else {
                break;
            }
        }
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.map.clear();
        inner.order.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::{Candle, Timeframe};
    use chrono::{TimeZone, Utc};

    fn key(symbol: &str) -> WindowKey {
        WindowKey::rounded(
            symbol,
            Timeframe::FiveMin,
            Utc.with_ymd_and_hms(2025, 6, 2, 4, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap(),
        )
    }

    fn slice(symbol: &str) -> Arc<WindowSlice> {
        Arc::new(WindowSlice::new(symbol, Timeframe::FiveMin, Vec::<Candle>::new()).unwrap())
    }

    #[tokio::test]
    async fn evicts_least_recently_used() {
        let cache = WarmCache::new(2);
        cache.put(key("A"), slice("A")).await;
        cache.put(key("B"), slice("B")).await;

        // Touch A so B becomes the eviction candidate.
        assert!(cache.get(&key("A")).await.is_some());
        cache.put(key("C"), slice("C")).await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.get(&key("B")).await.is_none());
        assert!(cache.get(&key("A")).await.is_some());
        assert!(cache.get(&key("C")).await.is_some());
    }

    #[tokio::test]
    async fn reinsert_updates_in_place() {
        let cache = WarmCache::new(2);
        cache.put(key("A"), slice("A")).await;
        cache.put(key("A"), slice("A")).await;
        assert_eq!(cache.len().await, 1);
    }
}
