//! Prometheus metrics, `candlecast_` prefix, exposed on `/metrics`.

use prometheus::{
    CounterVec, Gauge, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Window lookups by tier and result (hit/miss).
    pub cache_lookups_total: CounterVec,
    /// Upstream fetches by provider and outcome (ok/error/empty).
    pub upstream_fetches_total: CounterVec,
    /// Predictions by outcome (merged/no_valid_prediction/error).
    pub predictions_total: CounterVec,
    /// Per-bot rejections by reason tag.
    pub bot_rejections_total: CounterVec,
    /// Trainings by terminal status (completed/failed).
    pub trainings_total: CounterVec,
    /// Currently connected hub subscribers.
    pub hub_subscribers: GenericGauge<AtomicF64>,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let cache_lookups_total = CounterVec::new(
            Opts::new("candlecast_cache_lookups_total", "Window lookups by tier"),
            &["tier", "result"],
        )?;
        registry.register(Box::new(cache_lookups_total.clone()))?;

        let upstream_fetches_total = CounterVec::new(
            Opts::new(
                "candlecast_upstream_fetches_total",
                "Upstream fetches by provider and outcome",
            ),
            &["provider", "outcome"],
        )?;
        registry.register(Box::new(upstream_fetches_total.clone()))?;

        let predictions_total = CounterVec::new(
            Opts::new("candlecast_predictions_total", "Predictions by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(predictions_total.clone()))?;

        let bot_rejections_total = CounterVec::new(
            Opts::new(
                "candlecast_bot_rejections_total",
                "Per-bot validation rejections by reason",
            ),
            &["bot", "reason"],
        )?;
        registry.register(Box::new(bot_rejections_total.clone()))?;

        let trainings_total = CounterVec::new(
            Opts::new("candlecast_trainings_total", "Trainings by terminal status"),
            &["status"],
        )?;
        registry.register(Box::new(trainings_total.clone()))?;

        let hub_subscribers = Gauge::with_opts(Opts::new(
            "candlecast_hub_subscribers",
            "Currently connected hub subscribers",
        ))?;
        registry.register(Box::new(hub_subscribers.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            cache_lookups_total,
            upstream_fetches_total,
            predictions_total,
            bot_rejections_total,
            trainings_total,
            hub_subscribers,
        })
    }

    /// Text exposition for the `/metrics` route.
    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        Ok(encoder.encode_to_string(&self.registry.gather())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_render() {
        let metrics = Metrics::new().unwrap();
        metrics
            .cache_lookups_total
            .with_label_values(&["hot", "hit"])
            .inc();
        metrics
            .predictions_total
            .with_label_values(&["merged"])
            .inc();
        let text = metrics.render().unwrap();
        assert!(text.contains("candlecast_cache_lookups_total"));
        assert!(text.contains("candlecast_predictions_total"));
    }
}
