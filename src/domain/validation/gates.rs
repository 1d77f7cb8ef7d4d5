//! Drift and sanity gates between bots, merger, persistence and client.
//!
//! Gates are pure functions over a forecast series (or an input window) so
//! the orchestrator, the training worker and the client contract all apply
//! literally the same checks.

use crate::domain::forecast::PredictedPoint;
use crate::domain::market::WindowSlice;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Structured rejection reason recorded in `validation_flags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    SchemaMissing,
    FutureTimestamp,
    NonMonotonic,
    OhlcInvalid,
    NanOrInf,
    NegativePrice,
    StepDriftExceeded,
    TotalDriftExceeded,
    EnvelopeExceeded,
    TimedOut,
    BotError,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::SchemaMissing => "schema_missing",
            RejectReason::FutureTimestamp => "future_timestamp",
            RejectReason::NonMonotonic => "non_monotonic",
            RejectReason::OhlcInvalid => "ohlc_invalid",
            RejectReason::NanOrInf => "nan_or_inf",
            RejectReason::NegativePrice => "negative_price",
            RejectReason::StepDriftExceeded => "step_drift_exceeded",
            RejectReason::TotalDriftExceeded => "total_drift_exceeded",
            RejectReason::EnvelopeExceeded => "envelope_exceeded",
            RejectReason::TimedOut => "timed_out",
            RejectReason::BotError => "bot_error",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Percent bounds for one gate level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ValidationLimits {
    /// Max change between neighbouring predicted points, percent.
    pub step_max_pct: f64,
    /// Max drift of any point from the reference price, percent.
    pub total_max_pct: f64,
}

/// Both gate levels. The per-bot clamp must contain the envelope so a
/// sanitized series can still pass the merger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DriftLimits {
    pub bot_clamp: ValidationLimits,
    pub envelope: ValidationLimits,
    pub min_candles: usize,
}

impl Default for DriftLimits {
    fn default() -> Self {
        Self {
            bot_clamp: ValidationLimits {
                step_max_pct: 8.0,
                total_max_pct: 15.0,
            },
            envelope: ValidationLimits {
                step_max_pct: 6.0,
                total_max_pct: 12.0,
            },
            min_candles: 30,
        }
    }
}

/// Gate 1 for input windows: enough samples and well-formed members.
/// Ordering is already a `WindowSlice` invariant.
pub fn window_gate(window: &WindowSlice, min_candles: usize) -> Vec<RejectReason> {
    let mut reasons = Vec::new();
    if window.len() < min_candles {
        reasons.push(RejectReason::SchemaMissing);
    }
    if window.candles().iter().any(|c| !c.ohlc_valid()) {
        reasons.push(RejectReason::OhlcInvalid);
    }
    reasons
}

/// Gates 1+2 for one bot's raw series: schema then sanity.
pub fn series_gates(
    series: &[PredictedPoint],
    produced_at: DateTime<Utc>,
    reference_price: f64,
    limits: &ValidationLimits,
) -> Vec<RejectReason> {
    let mut reasons = Vec::new();

    if series.is_empty() {
        return vec![RejectReason::SchemaMissing];
    }
    if series.first().map(|p| p.ts < produced_at).unwrap_or(false) {
        reasons.push(RejectReason::NonMonotonic);
    }
    if series.windows(2).any(|w| w[0].ts >= w[1].ts) {
        reasons.push(RejectReason::NonMonotonic);
    }

    if series
        .iter()
        .any(|p| !p.price.is_finite() || !p.confidence.is_finite())
    {
        reasons.push(RejectReason::NanOrInf);
    }
    if series.iter().any(|p| p.price <= 0.0) {
        reasons.push(RejectReason::NegativePrice);
    }

    if step_violation(series, limits.step_max_pct) {
        reasons.push(RejectReason::StepDriftExceeded);
    }
    if total_violation(series, reference_price, limits.total_max_pct) {
        reasons.push(RejectReason::TotalDriftExceeded);
    }

    reasons.dedup();
    reasons
}

/// Gate 3, applied at the merger with the tighter envelope. Any breach
/// rejects the whole bot output.
pub fn envelope_gate(
    series: &[PredictedPoint],
    reference_price: f64,
    envelope: &ValidationLimits,
) -> Vec<RejectReason> {
    if series.is_empty() {
        return vec![RejectReason::SchemaMissing];
    }
    if step_violation(series, envelope.step_max_pct)
        || total_violation(series, reference_price, envelope.total_max_pct)
    {
        vec![RejectReason::EnvelopeExceeded]
    } else {
        Vec::new()
    }
}

fn step_violation(series: &[PredictedPoint], step_max_pct: f64) -> bool {
    series.windows(2).any(|w| {
        let prev = w[0].price;
        prev > 0.0 && ((w[1].price - prev) / prev).abs() * 100.0 > step_max_pct + f64::EPSILON
    })
}

fn total_violation(series: &[PredictedPoint], reference_price: f64, total_max_pct: f64) -> bool {
    if reference_price <= 0.0 {
        return true;
    }
    series.iter().any(|p| {
        ((p.price - reference_price) / reference_price).abs() * 100.0 > total_max_pct + f64::EPSILON
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn pt(minute: u32, price: f64) -> PredictedPoint {
        PredictedPoint {
            ts: Utc.with_ymd_and_hms(2025, 6, 2, 5, minute, 0).unwrap(),
            price,
            confidence: 0.8,
        }
    }

    fn produced_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 5, 0, 0).unwrap()
    }

    const LIMITS: ValidationLimits = ValidationLimits {
        step_max_pct: 8.0,
        total_max_pct: 15.0,
    };

    #[test]
    fn clean_series_passes() {
        let series = vec![pt(5, 100.0), pt(10, 101.0), pt(15, 102.0)];
        assert!(series_gates(&series, produced_at(), 100.0, &LIMITS).is_empty());
    }

    #[test]
    fn empty_series_is_schema_missing() {
        assert_eq!(
            series_gates(&[], produced_at(), 100.0, &LIMITS),
            vec![RejectReason::SchemaMissing]
        );
    }

    #[test]
    fn stale_or_unordered_timestamps() {
        let series = vec![pt(10, 100.0), pt(5, 100.0)];
        assert!(
            series_gates(&series, produced_at(), 100.0, &LIMITS)
                .contains(&RejectReason::NonMonotonic)
        );

        // Series starting before produced_at is equally unusable.
        let early = vec![pt(5, 100.0)];
        let late_produce = Utc.with_ymd_and_hms(2025, 6, 2, 5, 7, 0).unwrap();
        assert!(
            series_gates(&early, late_produce, 100.0, &LIMITS)
                .contains(&RejectReason::NonMonotonic)
        );
    }

    #[test]
    fn nan_and_negative_prices() {
        let series = vec![pt(5, f64::NAN)];
        assert!(series_gates(&series, produced_at(), 100.0, &LIMITS).contains(&RejectReason::NanOrInf));

        let series = vec![pt(5, -3.0)];
        assert!(
            series_gates(&series, produced_at(), 100.0, &LIMITS)
                .contains(&RejectReason::NegativePrice)
        );
    }

    #[test]
    fn step_and_total_drift() {
        let series = vec![pt(5, 100.0), pt(10, 112.0)];
        assert!(
            series_gates(&series, produced_at(), 100.0, &LIMITS)
                .contains(&RejectReason::StepDriftExceeded)
        );

        let series = vec![pt(5, 150.0), pt(10, 160.0)];
        let reasons = series_gates(&series, produced_at(), 100.0, &LIMITS);
        assert!(reasons.contains(&RejectReason::TotalDriftExceeded));
    }

    #[test]
    fn envelope_is_tighter() {
        let envelope = ValidationLimits {
            step_max_pct: 6.0,
            total_max_pct: 12.0,
        };
        // 13% off reference: inside the 15% clamp, outside the 12% envelope.
        let series = vec![pt(5, 106.0), pt(10, 113.0)];
        assert!(series_gates(&series, produced_at(), 100.0, &LIMITS).is_empty());
        assert_eq!(
            envelope_gate(&series, 100.0, &envelope),
            vec![RejectReason::EnvelopeExceeded]
        );
    }
}
