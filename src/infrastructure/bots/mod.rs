pub mod momentum;
pub mod ridge;

use crate::domain::ports::ForecastBot;
use std::collections::BTreeMap;
use std::sync::Arc;

pub use momentum::MomentumBot;
pub use ridge::RidgeBot;

/// Bots registered at startup, looked up by name. The orchestrator and
/// the training queue see only the `ForecastBot` contract.
#[derive(Default)]
pub struct BotRegistry {
    bots: BTreeMap<String, Arc<dyn ForecastBot>>,
}

impl BotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, bot: Arc<dyn ForecastBot>) {
        self.bots.insert(bot.name().to_string(), bot);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ForecastBot>> {
        self.bots.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.bots.keys().cloned().collect()
    }

    /// Largest history requirement across the registry, used by the
    /// orchestrator to size its window load.
    pub fn max_min_history(&self) -> usize {
        self.bots
            .values()
            .map(|b| b.min_history())
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::MockBot;

    #[test]
    fn lookup_and_sizing() {
        let mut registry = BotRegistry::new();
        registry.register(Arc::new(MockBot::flat("alpha", 0.9).with_min_history(50)));
        registry.register(Arc::new(MockBot::flat("beta", 0.5)));

        assert!(registry.get("alpha").is_some());
        assert!(registry.get("gamma").is_none());
        assert_eq!(registry.names(), vec!["alpha", "beta"]);
        assert_eq!(registry.max_min_history(), 50);
    }
}
