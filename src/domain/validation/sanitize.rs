//! One-shot repair pass for a series that failed the sanity gate.
//!
//! Clamps each step to the per-bot step bound, then clamps the running
//! value into the total-drift band around the reference price. The result
//! must still clear the envelope gate or the bot is dropped.

use super::gates::ValidationLimits;
use crate::domain::forecast::PredictedPoint;

pub fn sanitize_series(
    series: &[PredictedPoint],
    reference_price: f64,
    limits: &ValidationLimits,
) -> Vec<PredictedPoint> {
    if reference_price <= 0.0 {
        return Vec::new();
    }

    let band_lo = reference_price * (1.0 - limits.total_max_pct / 100.0);
    let band_hi = reference_price * (1.0 + limits.total_max_pct / 100.0);
    let step = limits.step_max_pct / 100.0;

    let mut out = Vec::with_capacity(series.len());
    let mut prev = reference_price;
    for point in series {
        let raw = if point.price.is_finite() && point.price > 0.0 {
            point.price
        } else {
            prev
        };
        let stepped = raw.clamp(prev * (1.0 - step), prev * (1.0 + step));
        let bounded = stepped.clamp(band_lo, band_hi);
        out.push(PredictedPoint {
            ts: point.ts,
            price: bounded,
            confidence: point.confidence.clamp(0.0, 1.0),
        });
        prev = bounded;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::validation::gates::{RejectReason, series_gates};
    use chrono::{TimeZone, Utc};

    fn pt(minute: u32, price: f64) -> PredictedPoint {
        PredictedPoint {
            ts: Utc.with_ymd_and_hms(2025, 6, 2, 5, minute, 0).unwrap(),
            price,
            confidence: 0.7,
        }
    }

    const LIMITS: ValidationLimits = ValidationLimits {
        step_max_pct: 8.0,
        total_max_pct: 15.0,
    };

    #[test]
    fn wild_series_is_pulled_into_band() {
        let produced = Utc.with_ymd_and_hms(2025, 6, 2, 5, 0, 0).unwrap();
        let series = vec![pt(5, 150.0), pt(10, 200.0), pt(15, 40.0)];
        let cleaned = sanitize_series(&series, 100.0, &LIMITS);

        let reasons = series_gates(&cleaned, produced, 100.0, &LIMITS);
        assert!(reasons.is_empty(), "sanitized series still trips: {:?}", reasons);
        assert!(cleaned.iter().all(|p| p.price <= 115.0 && p.price >= 85.0));
    }

    #[test]
    fn non_finite_points_inherit_previous_value() {
        let series = vec![pt(5, f64::NAN), pt(10, 101.0)];
        let cleaned = sanitize_series(&series, 100.0, &LIMITS);
        assert_eq!(cleaned[0].price, 100.0);
        assert_eq!(cleaned[1].price, 101.0);
    }

    #[test]
    fn in_band_series_is_untouched() {
        let series = vec![pt(5, 101.0), pt(10, 102.5)];
        let cleaned = sanitize_series(&series, 100.0, &LIMITS);
        assert_eq!(cleaned[0].price, 101.0);
        assert_eq!(cleaned[1].price, 102.5);
    }

    #[test]
    fn schema_failures_are_not_repairable() {
        // Sanitization fixes values, not ordering; the caller drops the bot.
        let produced = Utc.with_ymd_and_hms(2025, 6, 2, 5, 0, 0).unwrap();
        let series = vec![pt(10, 100.0), pt(5, 100.0)];
        let cleaned = sanitize_series(&series, 100.0, &LIMITS);
        assert!(
            series_gates(&cleaned, produced, 100.0, &LIMITS)
                .contains(&RejectReason::NonMonotonic)
        );
    }
}
