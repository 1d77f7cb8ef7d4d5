use crate::domain::market::Timeframe;
use crate::domain::validation::RejectReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One step of a forecast series.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PredictedPoint {
    pub ts: DateTime<Utc>,
    pub price: f64,
    pub confidence: f64,
}

/// What a bot hands back from its predict contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotForecast {
    pub series: Vec<PredictedPoint>,
    pub confidence: f64,
}

/// Per-bot audit entry in the merged record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BotContribution {
    pub weight: f64,
    pub confidence: f64,
    pub accepted: bool,
}

/// Validation outcome per bot, recorded whether or not the bot survived.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BotValidation {
    pub reasons: Vec<RejectReason>,
    pub sanitized: bool,
}

impl BotValidation {
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn rejected(reasons: Vec<RejectReason>) -> Self {
        Self {
            reasons,
            sanitized: false,
        }
    }
}

/// Key indicator values captured from the input window at produce time.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FeatureSnapshot {
    pub last_close: f64,
    pub return_1: Option<f64>,
    pub rsi_14: Option<f64>,
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub ema_20: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_hist: Option<f64>,
    pub atr_14: Option<f64>,
    /// Close position inside the window's high-low range, 0..1.
    pub range_position: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionOutcome {
    Merged,
    NoValidPrediction,
}

/// A persisted forecast with full audit state: raw outputs are kept for
/// every invoked bot regardless of acceptance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub id: Uuid,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub horizon_minutes: u32,
    pub produced_at: DateTime<Utc>,
    /// Close of the last input candle.
    pub reference_price: f64,
    pub predicted_series: Vec<PredictedPoint>,
    pub overall_confidence: f64,
    pub bot_contributions: BTreeMap<String, BotContribution>,
    pub raw_bot_outputs: BTreeMap<String, Vec<PredictedPoint>>,
    pub validation_flags: BTreeMap<String, BotValidation>,
    pub feature_snapshot: FeatureSnapshot,
    pub outcome: PredictionOutcome,
}

impl PredictionRecord {
    pub fn survivors(&self) -> Vec<&str> {
        self.bot_contributions
            .iter()
            .filter(|(_, c)| c.accepted)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}
