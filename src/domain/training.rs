use crate::domain::market::Timeframe;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Archived,
}

impl TrainingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingStatus::Queued => "queued",
            TrainingStatus::Running => "running",
            TrainingStatus::Completed => "completed",
            TrainingStatus::Failed => "failed",
            TrainingStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for TrainingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TrainingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "queued" => Ok(TrainingStatus::Queued),
            "running" => Ok(TrainingStatus::Running),
            "completed" => Ok(TrainingStatus::Completed),
            "failed" => Ok(TrainingStatus::Failed),
            "archived" => Ok(TrainingStatus::Archived),
            other => anyhow::bail!("unknown training status: {}", other),
        }
    }
}

/// Hyperparameters handed to a bot's train contract.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrainParams {
    pub epochs: u32,
    pub batch_size: u32,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            epochs: 20,
            batch_size: 32,
        }
    }
}

/// Queue entry. Two jobs with the same `dedup_key` never coexist in the
/// queue plus running slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingJob {
    /// Becomes the training record's id once the job starts.
    pub id: Uuid,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bot_name: String,
    pub epochs: u32,
    pub batch_size: u32,
    pub requested_at: DateTime<Utc>,
}

impl TrainingJob {
    pub fn new(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        bot_name: impl Into<String>,
        params: TrainParams,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            timeframe,
            bot_name: bot_name.into(),
            epochs: params.epochs,
            batch_size: params.batch_size,
            requested_at,
        }
    }

    pub fn dedup_key(&self) -> String {
        format!("{}:{}:{}", self.symbol, self.timeframe, self.bot_name)
    }

    pub fn params(&self) -> TrainParams {
        TrainParams {
            epochs: self.epochs,
            batch_size: self.batch_size,
        }
    }
}

/// What a bot's train contract reports on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainOutcome {
    pub data_points_used: u64,
    pub test_rmse: f64,
    pub test_mae: f64,
    pub model_size_bytes: u64,
    pub artifact_path: Option<String>,
}

/// One completed or failed training attempt, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub id: Uuid,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bot_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: TrainingStatus,
    pub data_points_used: u64,
    pub test_rmse: Option<f64>,
    pub test_mae: Option<f64>,
    pub baseline_rmses: BTreeMap<String, f64>,
    pub model_size_bytes: u64,
    /// Human-readable span of the training window, e.g. "2025-03-01..2025-06-02".
    pub training_period: Option<String>,
    pub drift_score: Option<f64>,
    pub error_message: Option<String>,
}

impl TrainingRecord {
    pub fn started(job: &TrainingJob, now: DateTime<Utc>) -> Self {
        Self {
            id: job.id,
            symbol: job.symbol.clone(),
            timeframe: job.timeframe,
            bot_name: job.bot_name.clone(),
            started_at: now,
            finished_at: None,
            status: TrainingStatus::Running,
            data_points_used: 0,
            test_rmse: None,
            test_mae: None,
            baseline_rmses: BTreeMap::new(),
            model_size_bytes: 0,
            training_period: None,
            drift_score: None,
            error_message: None,
        }
    }
}

/// Snapshot returned by the queue's Status verb.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    pub is_running: bool,
    pub is_paused: bool,
    pub current: Option<TrainingJob>,
    pub queue_length: usize,
    pub completed_count: u64,
    pub failed_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_key_covers_the_triple() {
        let job = TrainingJob::new(
            "ACME",
            Timeframe::FiveMin,
            "ridge",
            TrainParams {
                epochs: 10,
                batch_size: 16,
            },
            Utc::now(),
        );
        assert_eq!(job.dedup_key(), "ACME:5m:ridge");
    }

    #[test]
    fn status_roundtrip() {
        for s in [
            TrainingStatus::Queued,
            TrainingStatus::Running,
            TrainingStatus::Completed,
            TrainingStatus::Failed,
            TrainingStatus::Archived,
        ] {
            let parsed: TrainingStatus = s.as_str().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }
}
