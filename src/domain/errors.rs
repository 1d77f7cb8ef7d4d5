use crate::domain::market::Timeframe;
use crate::domain::validation::RejectReason;
use thiserror::Error;

/// Service-level error taxonomy. `kind()` yields the stable strings that
/// appear in the wire error envelope, so variants may be renamed without
/// breaking clients.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("no market data available for {symbol} {timeframe}")]
    DataUnavailable { symbol: String, timeframe: Timeframe },

    #[error("insufficient coverage for {symbol} {timeframe}: {got} candles, need {need}")]
    InsufficientCoverage {
        symbol: String,
        timeframe: Timeframe,
        got: usize,
        need: usize,
    },

    #[error("all upstream providers failed: {last_error}")]
    UpstreamFailure { last_error: String },

    #[error("validation failed: {}", format_reasons(.reasons))]
    ValidationFailed { reasons: Vec<RejectReason> },

    #[error("no bot survived validation for {symbol} {timeframe}")]
    NoValidPrediction { symbol: String, timeframe: Timeframe },

    #[error("training failed: {message}")]
    TrainingFailed { message: String },

    #[error("training already queued or running for {key}")]
    DuplicateJob { key: String },

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("{what} timed out after {seconds}s")]
    Timeout { what: String, seconds: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

fn format_reasons(reasons: &[RejectReason]) -> String {
    reasons
        .iter()
        .map(|r| r.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl ServiceError {
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::DataUnavailable { .. } => "data_unavailable",
            ServiceError::InsufficientCoverage { .. } => "insufficient_coverage",
            ServiceError::UpstreamFailure { .. } => "upstream_failure",
            ServiceError::ValidationFailed { .. } => "validation_failed",
            ServiceError::NoValidPrediction { .. } => "no_valid_prediction",
            ServiceError::TrainingFailed { .. } => "training_failed",
            ServiceError::DuplicateJob { .. } => "duplicate_job",
            ServiceError::NotFound { .. } => "not_found",
            ServiceError::Timeout { .. } => "timeout",
            ServiceError::Cancelled => "cancelled",
            ServiceError::Internal(_) => "internal",
        }
    }
}
