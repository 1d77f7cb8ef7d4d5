use crate::domain::health::HealthThresholds;
use crate::domain::validation::{DriftLimits, ValidationLimits};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Which upstream adapter backs a slot in the provider order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Upstox,
    Yahoo,
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "upstox" => Ok(ProviderKind::Upstox),
            "yahoo" => Ok(ProviderKind::Yahoo),
            other => anyhow::bail!("unknown provider: {} (expected upstox|yahoo)", other),
        }
    }
}

/// Immutable runtime configuration, loaded once at boot and plumbed into
/// each component at construction. Changing a knob means a restart.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    pub archive_root: PathBuf,
    pub model_root: PathBuf,

    /// Failover order; the first entry is the primary.
    pub provider_order: Vec<ProviderKind>,
    pub upstox_base_url: String,
    pub yahoo_base_url: String,
    pub upstox_access_token: String,

    pub upstream_timeout_secs: u64,
    pub bot_predict_timeout_secs: u64,
    /// Training wall-clock budget is `epochs * this`.
    pub train_epoch_budget_secs: u64,
    pub force_stop_timeout_secs: u64,
    /// Grace period for one slow hub subscriber before it is dropped.
    pub publish_grace_ms: u64,

    pub hot_ttl_recent_secs: u64,
    pub hot_ttl_historic_secs: u64,
    pub warm_capacity: usize,

    pub default_lookback_days: i64,
    pub min_window_candles: usize,
    pub live_refresh_secs: u64,

    pub drift: DriftLimits,
    pub health: HealthThresholds,
    pub holidays: Vec<NaiveDate>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let provider_order = env_or("PROVIDER_ORDER", "upstox,yahoo")
            .split(',')
            .map(|s| s.trim().parse())
            .collect::<Result<Vec<ProviderKind>>>()
            .context("PROVIDER_ORDER")?;
        anyhow::ensure!(!provider_order.is_empty(), "PROVIDER_ORDER must not be empty");

        let holidays = env::var("EXCHANGE_HOLIDAYS")
            .unwrap_or_default()
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").context("EXCHANGE_HOLIDAYS"))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            bind_addr: env_or("BIND_ADDR", "127.0.0.1:8800"),
            database_url: env_or("DATABASE_URL", "sqlite://data/candlecast.db"),
            archive_root: PathBuf::from(env_or("ARCHIVE_ROOT", "data/archive")),
            model_root: PathBuf::from(env_or("MODEL_ROOT", "data/models")),

            provider_order,
            upstox_base_url: env_or("UPSTOX_BASE_URL", "https://api.upstox.com"),
            yahoo_base_url: env_or("YAHOO_BASE_URL", "https://query1.finance.yahoo.com"),
            upstox_access_token: env_or("UPSTOX_ACCESS_TOKEN", ""),

            upstream_timeout_secs: env_parse("UPSTREAM_TIMEOUT_SECS", 30)?,
            bot_predict_timeout_secs: env_parse("BOT_PREDICT_TIMEOUT_SECS", 10)?,
            train_epoch_budget_secs: env_parse("TRAIN_EPOCH_BUDGET_SECS", 60)?,
            force_stop_timeout_secs: env_parse("FORCE_STOP_TIMEOUT_SECS", 15)?,
            publish_grace_ms: env_parse("PUBLISH_GRACE_MS", 2000)?,

            hot_ttl_recent_secs: env_parse("HOT_TTL_RECENT_SECS", 30)?,
            hot_ttl_historic_secs: env_parse("HOT_TTL_HISTORIC_SECS", 600)?,
            warm_capacity: env_parse("WARM_CACHE_CAPACITY", 100)?,

            default_lookback_days: env_parse("DEFAULT_LOOKBACK_DAYS", 75)?,
            min_window_candles: env_parse("MIN_WINDOW_CANDLES", 30)?,
            live_refresh_secs: env_parse("LIVE_REFRESH_SECS", 30)?,

            drift: DriftLimits {
                bot_clamp: ValidationLimits {
                    step_max_pct: env_parse("STEP_MAX_PCT", 8.0)?,
                    total_max_pct: env_parse("TOTAL_MAX_PCT", 15.0)?,
                },
                envelope: ValidationLimits {
                    step_max_pct: env_parse("ENVELOPE_STEP_PCT", 6.0)?,
                    total_max_pct: env_parse("ENVELOPE_TOTAL_PCT", 12.0)?,
                },
                min_candles: env_parse("MIN_WINDOW_CANDLES", 30)?,
            },
            health: HealthThresholds {
                drift_yellow: env_parse("DRIFT_YELLOW", 0.2)?,
                drift_red: env_parse("DRIFT_RED", 0.5)?,
                age_yellow_hours: env_parse("MODEL_AGE_YELLOW_HOURS", 24)?,
                age_red_hours: env_parse("MODEL_AGE_RED_HOURS", 48)?,
            },
            holidays,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {}: {}", key, e)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        // Clamp must contain the envelope (sanitization has to be able to
        // pull a series inside the merger gate).
        let config = Config::from_env().unwrap();
        assert!(
            config.drift.bot_clamp.step_max_pct >= config.drift.envelope.step_max_pct
        );
        assert!(
            config.drift.bot_clamp.total_max_pct >= config.drift.envelope.total_max_pct
        );
        assert_eq!(config.provider_order[0], ProviderKind::Upstox);
    }

    #[test]
    fn provider_kind_parses() {
        assert_eq!("Yahoo".parse::<ProviderKind>().unwrap(), ProviderKind::Yahoo);
        assert!("bloomberg".parse::<ProviderKind>().is_err());
    }
}
