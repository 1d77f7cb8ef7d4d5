//! Subscription hub: per-(symbol, timeframe) subscriber sets with push
//! delivery over bounded per-subscriber queues. Candle and prediction
//! events are topic-keyed; training progress is broadcast to every
//! registered client. A subscriber that stays slow past the grace period
//! is dropped; reconnecting is the client's responsibility and
//! subscriptions do not survive a disconnect.

use crate::domain::events::{HubEvent, TrainingProgress};
use crate::domain::forecast::PredictionRecord;
use crate::domain::market::{Candle, Timeframe};
use crate::domain::validation::ValidationLimits;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

pub type ClientId = Uuid;

const SUBSCRIBER_QUEUE: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicKey {
    pub symbol: String,
    pub timeframe: Timeframe,
}

struct ClientHandle {
    tx: mpsc::Sender<HubEvent>,
}

#[derive(Default)]
struct HubState {
    clients: HashMap<ClientId, ClientHandle>,
    topics: HashMap<TopicKey, HashSet<ClientId>>,
    by_client: HashMap<ClientId, TopicKey>,
}

pub struct SubscriptionHub {
    state: RwLock<HubState>,
    publish_grace: Duration,
}

impl SubscriptionHub {
    pub fn new(publish_grace: Duration) -> Self {
        Self {
            state: RwLock::new(HubState::default()),
            publish_grace,
        }
    }

    /// Register a connection and hand back its event queue. Call
    /// `unregister` on disconnect.
    pub async fn register(&self) -> (ClientId, mpsc::Receiver<HubEvent>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let mut state = self.state.write().await;
        state.clients.insert(id, ClientHandle { tx });
        debug!("hub: client {} registered", id);
        (id, rx)
    }

    pub async fn unregister(&self, client: ClientId) {
        let mut state = self.state.write().await;
        remove_client(&mut state, client);
        debug!("hub: client {} unregistered", client);
    }

    /// Point the client at a topic, replacing any prior subscription
    /// atomically, and acknowledge on the client's own queue.
    pub async fn subscribe(&self, client: ClientId, symbol: &str, timeframe: Timeframe) {
        let key = TopicKey {
            symbol: symbol.to_string(),
            timeframe,
        };
        let ack = {
            let mut state = self.state.write().await;
            if !state.clients.contains_key(&client) {
                return;
            }
            if let Some(previous) = state.by_client.insert(client, key.clone()) {
                if let Some(members) = state.topics.get_mut(&previous) {
                    members.remove(&client);
                    if members.is_empty() {
                        state.topics.remove(&previous);
                    }
                }
            }
            state.topics.entry(key.clone()).or_default().insert(client);
            state.clients.get(&client).map(|h| h.tx.clone())
        };

        info!("hub: client {} -> {}/{}", client, symbol, timeframe);
        if let Some(tx) = ack {
            let _ = tx
                .send(HubEvent::Subscribed {
                    symbol: symbol.to_string(),
                    timeframe,
                })
                .await;
        }
    }

    /// Remove the client from its topic but keep the connection alive.
    pub async fn unsubscribe(&self, client: ClientId) {
        let mut state = self.state.write().await;
        if let Some(key) = state.by_client.remove(&client)
            && let Some(members) = state.topics.get_mut(&key)
        {
            members.remove(&client);
            if members.is_empty() {
                state.topics.remove(&key);
            }
        }
    }

    pub async fn publish_candle(&self, candle: &Candle) {
        let key = TopicKey {
            symbol: candle.symbol.clone(),
            timeframe: candle.timeframe,
        };
        let event = HubEvent::CandleUpdate {
            symbol: candle.symbol.clone(),
            timeframe: candle.timeframe,
            candle: candle.clone(),
        };
        self.deliver_topic(&key, event).await;
    }

    /// `limits` is the envelope the merger enforced; it rides along so
    /// clients can re-verify before rendering.
    pub async fn publish_prediction(&self, prediction: &PredictionRecord, limits: ValidationLimits) {
        let key = TopicKey {
            symbol: prediction.symbol.clone(),
            timeframe: prediction.timeframe,
        };
        let event = HubEvent::PredictionUpdate {
            prediction: prediction.clone(),
            limits,
        };
        self.deliver_topic(&key, event).await;
    }

    /// Training progress is not symbol-keyed; every registered client
    /// receives it.
    pub async fn broadcast_training(&self, progress: TrainingProgress) {
        let targets: Vec<(ClientId, mpsc::Sender<HubEvent>)> = {
            let state = self.state.read().await;
            state
                .clients
                .iter()
                .map(|(id, h)| (*id, h.tx.clone()))
                .collect()
        };
        let event = HubEvent::TrainingProgress(progress);
        self.send_all(targets, event).await;
    }

    async fn deliver_topic(&self, key: &TopicKey, event: HubEvent) {
        let targets: Vec<(ClientId, mpsc::Sender<HubEvent>)> = {
            let state = self.state.read().await;
            let Some(members) = state.topics.get(key) else {
                return;
            };
            members
                .iter()
                .filter_map(|id| state.clients.get(id).map(|h| (*id, h.tx.clone())))
                .collect()
        };
        self.send_all(targets, event).await;
    }

    /// Best-effort fanout. `try_send` first; a full queue gets one timed
    /// send within the grace period, then the subscriber is dropped.
    async fn send_all(&self, targets: Vec<(ClientId, mpsc::Sender<HubEvent>)>, event: HubEvent) {
        let mut dead = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => dead.push(id),
                Err(mpsc::error::TrySendError::Full(ev)) => {
                    match tokio::time::timeout(self.publish_grace, tx.send(ev)).await {
                        Ok(Ok(())) => {}
                        _ => dead.push(id),
                    }
                }
            }
        }
        if !dead.is_empty() {
            let mut state = self.state.write().await;
            for id in dead {
                info!("hub: dropping slow or closed subscriber {}", id);
                remove_client(&mut state, id);
            }
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.state.read().await.clients.len()
    }

    /// Topics with at least one subscriber, for the live refresher.
    pub async fn active_topics(&self) -> Vec<TopicKey> {
        self.state.read().await.topics.keys().cloned().collect()
    }
}

fn remove_client(state: &mut HubState, client: ClientId) {
    state.clients.remove(&client);
    if let Some(key) = state.by_client.remove(&client)
        && let Some(members) = state.topics.get_mut(&key)
    {
        members.remove(&client);
        if members.is_empty() {
            state.topics.remove(&key);
        }
    }
}

/// Shared handle type used across the services.
pub type SharedHub = Arc<SubscriptionHub>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::Provenance;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn candle(symbol: &str, minute: u32) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            timeframe: Timeframe::FiveMin,
            ts: Utc.with_ymd_and_hms(2025, 6, 2, 4, minute, 0).unwrap(),
            open: dec!(100),
            high: dec!(101),
            low: dec!(99),
            close: dec!(100.5),
            volume: dec!(10),
            provenance: Provenance::Primary,
        }
    }

    #[tokio::test]
    async fn topic_events_arrive_in_publish_order() {
        let hub = SubscriptionHub::new(Duration::from_millis(100));
        let (id, mut rx) = hub.register().await;
        hub.subscribe(id, "ACME", Timeframe::FiveMin).await;

        assert!(matches!(rx.recv().await, Some(HubEvent::Subscribed { .. })));

        for minute in [0, 5, 10] {
            hub.publish_candle(&candle("ACME", minute)).await;
        }
        for expected in [0, 5, 10] {
            match rx.recv().await {
                Some(HubEvent::CandleUpdate { candle, .. }) => {
                    assert_eq!(candle.ts.format("%M").to_string(), format!("{:02}", expected));
                }
                other => panic!("unexpected event: {:?}", other.map(|e| serde_json::to_string(&e))),
            }
        }
    }

    #[tokio::test]
    async fn unsubscribed_client_receives_nothing_more() {
        let hub = SubscriptionHub::new(Duration::from_millis(100));
        let (id, mut rx) = hub.register().await;
        hub.subscribe(id, "ACME", Timeframe::FiveMin).await;
        let _ = rx.recv().await; // ack

        hub.unsubscribe(id).await;
        hub.publish_candle(&candle("ACME", 0)).await;

        let outcome = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(outcome.is_err(), "no event should arrive after unsubscribe");
    }

    #[tokio::test]
    async fn resubscribe_replaces_topic_atomically() {
        let hub = SubscriptionHub::new(Duration::from_millis(100));
        let (id, mut rx) = hub.register().await;
        hub.subscribe(id, "ACME", Timeframe::FiveMin).await;
        let _ = rx.recv().await;
        hub.subscribe(id, "XYZ", Timeframe::FiveMin).await;
        let _ = rx.recv().await;

        hub.publish_candle(&candle("ACME", 0)).await;
        hub.publish_candle(&candle("XYZ", 5)).await;

        match rx.recv().await {
            Some(HubEvent::CandleUpdate { symbol, .. }) => assert_eq!(symbol, "XYZ"),
            other => panic!("unexpected: {:?}", other.map(|e| serde_json::to_string(&e))),
        }
        assert_eq!(hub.active_topics().await.len(), 1);
    }

    #[tokio::test]
    async fn slow_subscriber_is_dropped() {
        let hub = SubscriptionHub::new(Duration::from_millis(20));
        let (id, rx) = hub.register().await;
        hub.subscribe(id, "ACME", Timeframe::FiveMin).await;
        // Never drain rx: the ack plus queue capacity fill up, then the
        // grace period expires.
        for minute in 0..40 {
            hub.publish_candle(&candle("ACME", minute % 60)).await;
        }
        assert_eq!(hub.subscriber_count().await, 0);
        drop(rx);
    }

    #[tokio::test]
    async fn training_broadcast_reaches_all_clients() {
        let hub = SubscriptionHub::new(Duration::from_millis(100));
        let (a, mut rx_a) = hub.register().await;
        let (_b, mut rx_b) = hub.register().await;
        hub.subscribe(a, "ACME", Timeframe::FiveMin).await;
        let _ = rx_a.recv().await;

        hub.broadcast_training(crate::domain::events::TrainingProgress {
            training_id: Uuid::new_v4(),
            bot_name: "ridge".to_string(),
            symbol: "ACME".to_string(),
            timeframe: Timeframe::FiveMin,
            status: crate::domain::training::TrainingStatus::Running,
            batch: 1,
            total_batches: 4,
            progress_percent: 25.0,
            message: "epoch 1/4".to_string(),
        })
        .await;

        assert!(matches!(
            rx_a.recv().await,
            Some(HubEvent::TrainingProgress(_))
        ));
        assert!(matches!(
            rx_b.recv().await,
            Some(HubEvent::TrainingProgress(_))
        ));
    }
}
