use crate::domain::training::{TrainingRecord, TrainingStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Green,
    Yellow,
    Red,
}

/// Thresholds for classifying a model; drift bounds are the
/// yellow and red cut-offs, ages are in hours.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HealthThresholds {
    pub drift_yellow: f64,
    pub drift_red: f64,
    pub age_yellow_hours: i64,
    pub age_red_hours: i64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            drift_yellow: 0.2,
            drift_red: 0.5,
            age_yellow_hours: 24,
            age_red_hours: 48,
        }
    }
}

/// One row of the models report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelReport {
    pub record: TrainingRecord,
    pub age_hours: i64,
    pub recent_rmse: Option<f64>,
    /// Freshly computed; may differ from the persisted `record.drift_score`.
    pub drift_score: Option<f64>,
    pub health: Health,
}

/// Derivation rules:
/// red if failed, too old, or drifted past the red bound;
/// yellow if aging or mildly drifted; green otherwise, but only with
/// valid metrics present.
pub fn classify(
    record: &TrainingRecord,
    age_hours: i64,
    drift_score: Option<f64>,
    thresholds: &HealthThresholds,
) -> Health {
    if record.status == TrainingStatus::Failed
        || age_hours >= thresholds.age_red_hours
        || drift_score.map(|d| d >= thresholds.drift_red).unwrap_or(false)
    {
        return Health::Red;
    }

    let aging = age_hours >= thresholds.age_yellow_hours;
    let drifting = drift_score
        .map(|d| d >= thresholds.drift_yellow)
        .unwrap_or(false);
    let metrics_valid = record
        .test_rmse
        .map(|r| r.is_finite() && r >= 0.0)
        .unwrap_or(false);

    if aging || drifting || !metrics_valid {
        Health::Yellow
    } else {
        Health::Green
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::Timeframe;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn record(status: TrainingStatus, rmse: Option<f64>) -> TrainingRecord {
        TrainingRecord {
            id: Uuid::new_v4(),
            symbol: "ACME".to_string(),
            timeframe: Timeframe::FiveMin,
            bot_name: "ridge".to_string(),
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
            status,
            data_points_used: 500,
            test_rmse: rmse,
            test_mae: rmse,
            baseline_rmses: BTreeMap::new(),
            model_size_bytes: 1024,
            training_period: None,
            drift_score: None,
            error_message: None,
        }
    }

    const T: HealthThresholds = HealthThresholds {
        drift_yellow: 0.2,
        drift_red: 0.5,
        age_yellow_hours: 24,
        age_red_hours: 48,
    };

    #[test]
    fn fresh_valid_model_is_green() {
        let r = record(TrainingStatus::Completed, Some(1.0));
        assert_eq!(classify(&r, 2, Some(0.1), &T), Health::Green);
    }

    #[test]
    fn aging_or_drifting_is_yellow() {
        let r = record(TrainingStatus::Completed, Some(1.0));
        assert_eq!(classify(&r, 30, Some(0.1), &T), Health::Yellow);
        assert_eq!(classify(&r, 2, Some(0.3), &T), Health::Yellow);
    }

    #[test]
    fn failed_old_or_heavily_drifted_is_red() {
        assert_eq!(
            classify(&record(TrainingStatus::Failed, None), 1, None, &T),
            Health::Red
        );
        let r = record(TrainingStatus::Completed, Some(1.0));
        assert_eq!(classify(&r, 48, Some(0.1), &T), Health::Red);
        // Realized RMSE 2.4 vs training RMSE 1.0 -> drift 1.4 -> red.
        assert_eq!(classify(&r, 2, Some(1.4), &T), Health::Red);
    }

    #[test]
    fn missing_metrics_never_green() {
        let r = record(TrainingStatus::Completed, None);
        assert_eq!(classify(&r, 1, Some(0.0), &T), Health::Yellow);
    }
}
