//! Composition root: builds every component from the immutable config and
//! owns the background tasks (nightly health sweep, live candle refresher).

use crate::application::health_monitor::HealthMonitor;
use crate::application::orchestrator::PredictionOrchestrator;
use crate::application::training_queue::TrainingQueue;
use crate::application::window_loader::WindowLoader;
use crate::config::{Config, ProviderKind};
use crate::domain::market::{IstEquityCalendar, TradingCalendar};
use crate::domain::ports::CandleProvider;
use crate::domain::repositories::{CandleRepository, PredictionRepository, TrainingRepository};
use crate::infrastructure::bots::{BotRegistry, MomentumBot, RidgeBot};
use crate::infrastructure::core::http_client_factory::build_client;
use crate::infrastructure::hub::SubscriptionHub;
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::persistence::Database;
use crate::infrastructure::persistence::repositories::{
    SqliteCandleRepository, SqlitePredictionRepository, SqliteTrainingRepository,
};
use crate::infrastructure::upstream::{UpstoxProvider, YahooProvider};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct Application {
    pub config: Config,
    pub calendar: Arc<dyn TradingCalendar>,
    pub loader: Arc<WindowLoader>,
    pub orchestrator: Arc<PredictionOrchestrator>,
    pub training_queue: Arc<TrainingQueue>,
    pub health_monitor: Arc<HealthMonitor>,
    pub hub: Arc<SubscriptionHub>,
    pub bots: Arc<BotRegistry>,
    pub candle_repo: Arc<dyn CandleRepository>,
    pub prediction_repo: Arc<dyn PredictionRepository>,
    pub training_repo: Arc<dyn TrainingRepository>,
    pub metrics: Metrics,
}

impl Application {
    pub async fn build(config: Config) -> Result<Arc<Self>> {
        let database = Database::new(&config.database_url).await?;
        let candle_repo: Arc<dyn CandleRepository> =
            Arc::new(SqliteCandleRepository::new(database.pool.clone()));
        let prediction_repo: Arc<dyn PredictionRepository> =
            Arc::new(SqlitePredictionRepository::new(database.pool.clone()));
        let training_repo: Arc<dyn TrainingRepository> =
            Arc::new(SqliteTrainingRepository::new(database.pool.clone()));

        let calendar: Arc<dyn TradingCalendar> =
            Arc::new(IstEquityCalendar::new(config.holidays.clone()));
        let metrics = Metrics::new()?;

        let client = build_client(Duration::from_secs(config.upstream_timeout_secs));
        let mut providers: Vec<Arc<dyn CandleProvider>> = Vec::new();
        for kind in &config.provider_order {
            match kind {
                ProviderKind::Upstox => providers.push(Arc::new(UpstoxProvider::new(
                    client.clone(),
                    config.upstox_base_url.clone(),
                    config.upstox_access_token.clone(),
                ))),
                ProviderKind::Yahoo => providers.push(Arc::new(YahooProvider::new(
                    client.clone(),
                    config.yahoo_base_url.clone(),
                ))),
            }
        }
        info!(
            "providers: {:?}",
            providers.iter().map(|p| p.name().to_string()).collect::<Vec<_>>()
        );

        let loader = Arc::new(WindowLoader::new(
            &config,
            Arc::clone(&candle_repo),
            providers,
            Arc::clone(&calendar),
            metrics.clone(),
        ));

        let mut registry = BotRegistry::new();
        registry.register(Arc::new(MomentumBot::new(config.model_root.clone())));
        registry.register(Arc::new(RidgeBot::new(config.model_root.clone())));
        let bots = Arc::new(registry);
        info!("bots registered: {:?}", bots.names());

        let hub = Arc::new(SubscriptionHub::new(Duration::from_millis(
            config.publish_grace_ms,
        )));

        let orchestrator = Arc::new(PredictionOrchestrator::new(
            &config,
            Arc::clone(&loader),
            Arc::clone(&bots),
            Arc::clone(&prediction_repo),
            Arc::clone(&hub),
            metrics.clone(),
        ));

        let health_monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&training_repo),
            Arc::clone(&prediction_repo),
            Arc::clone(&candle_repo),
            Arc::clone(&calendar),
            config.health,
        ));

        let training_queue = Arc::new(TrainingQueue::new(
            &config,
            Arc::clone(&loader),
            Arc::clone(&bots),
            Arc::clone(&training_repo),
            Arc::clone(&health_monitor),
            Arc::clone(&hub),
            Arc::clone(&calendar),
            metrics.clone(),
        ));

        Ok(Arc::new(Self {
            config,
            calendar,
            loader,
            orchestrator,
            training_queue,
            health_monitor,
            hub,
            bots,
            candle_repo,
            prediction_repo,
            training_repo,
            metrics,
        }))
    }

    /// Spawn the nightly health sweep and the live candle refresher.
    pub fn start_background(self: &Arc<Self>) {
        Arc::clone(&self.health_monitor).spawn_nightly();

        let app = Arc::clone(self);
        tokio::spawn(async move {
            app.refresh_loop().await;
        });
    }

    /// Poll the newest candle for every topic with subscribers and push
    /// fresh ones through the hub.
    async fn refresh_loop(self: Arc<Self>) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.live_refresh_secs.max(5)));
        let mut last_published: HashMap<(String, crate::domain::market::Timeframe), chrono::DateTime<chrono::Utc>> =
            HashMap::new();
        loop {
            ticker.tick().await;
            self.metrics
                .hub_subscribers
                .set(self.hub.subscriber_count().await as f64);

            for topic in self.hub.active_topics().await {
                match self
                    .loader
                    .fetch_latest(&topic.symbol, topic.timeframe)
                    .await
                {
                    Ok(candle) => {
                        let key = (topic.symbol.clone(), topic.timeframe);
                        let is_new = last_published
                            .get(&key)
                            .map(|prev| candle.ts > *prev)
                            .unwrap_or(true);
                        if is_new {
                            last_published.insert(key, candle.ts);
                            self.hub.publish_candle(&candle).await;
                        }
                    }
                    Err(e) => {
                        warn!(
                            "live refresh failed for {}/{}: {}",
                            topic.symbol, topic.timeframe, e
                        );
                    }
                }
            }
        }
    }
}
