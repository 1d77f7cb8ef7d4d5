use crate::domain::forecast::PredictionRecord;
use crate::domain::market::{Candle, Timeframe};
use crate::domain::training::TrainingStatus;
use crate::domain::validation::ValidationLimits;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Periodic progress report for a running training job, forwarded through
/// the hub's broadcast channel so UIs can render progress bars.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingProgress {
    pub training_id: Uuid,
    pub bot_name: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub status: TrainingStatus,
    pub batch: u32,
    pub total_batches: u32,
    pub progress_percent: f64,
    pub message: String,
}

/// Everything the hub can push to a client. The wire `type` tags match the
/// push-channel contract exactly.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum HubEvent {
    #[serde(rename = "candle:update")]
    CandleUpdate {
        symbol: String,
        timeframe: Timeframe,
        candle: Candle,
    },
    #[serde(rename = "prediction:update")]
    PredictionUpdate {
        prediction: PredictionRecord,
        /// Envelope bounds consumers re-verify against before display.
        limits: ValidationLimits,
    },
    #[serde(rename = "training:progress")]
    TrainingProgress(TrainingProgress),
    #[serde(rename = "subscribed")]
    Subscribed { symbol: String, timeframe: Timeframe },
}
