//! Trivial reference forecasters a trained bot must beat: last-value,
//! moving-average and linear-trend, evaluated one step ahead over the
//! same holdout split the bots use.

use std::collections::BTreeMap;

const MA_PERIOD: usize = 10;
const TREND_POINTS: usize = 10;

pub fn rmse(errors: impl IntoIterator<Item = f64>) -> f64 {
    let mut sq = 0.0;
    let mut count = 0usize;
    for e in errors {
        sq += e * e;
        count += 1;
    }
    if count == 0 {
        return f64::NAN;
    }
    (sq / count as f64).sqrt()
}

pub fn mae(errors: impl IntoIterator<Item = f64>) -> f64 {
    let mut abs = 0.0;
    let mut count = 0usize;
    for e in errors {
        abs += e.abs();
        count += 1;
    }
    if count == 0 {
        return f64::NAN;
    }
    abs / count as f64
}

fn last_value(history: &[f64]) -> Option<f64> {
    history.last().copied()
}

fn moving_average(history: &[f64]) -> Option<f64> {
    if history.is_empty() {
        return None;
    }
    let n = history.len().min(MA_PERIOD);
    let tail = &history[history.len() - n..];
    Some(tail.iter().sum::<f64>() / n as f64)
}

/// Least-squares line through the last few points, extrapolated one step.
fn linear_trend(history: &[f64]) -> Option<f64> {
    if history.len() < 2 {
        return last_value(history);
    }
    let n = history.len().min(TREND_POINTS);
    let tail = &history[history.len() - n..];
    let nf = n as f64;
    let sum_x: f64 = (0..n).map(|i| i as f64).sum();
    let sum_y: f64 = tail.iter().sum();
    let sum_xy: f64 = tail.iter().enumerate().map(|(i, y)| i as f64 * y).sum();
    let sum_x2: f64 = (0..n).map(|i| (i as f64) * (i as f64)).sum();
    let denom = nf * sum_x2 - sum_x * sum_x;
    if denom.abs() < f64::EPSILON {
        return last_value(history);
    }
    let slope = (nf * sum_xy - sum_x * sum_y) / denom;
    let intercept = (sum_y - slope * sum_x) / nf;
    Some(intercept + slope * nf)
}

/// One-step-ahead RMSE per baseline over `closes[split..]`.
pub fn baseline_rmses(closes: &[f64], split: usize) -> BTreeMap<String, f64> {
    let mut errors: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for i in split.max(1)..closes.len() {
        let history = &closes[..i];
        let actual = closes[i];
        for (name, predicted) in [
            ("last_value", last_value(history)),
            ("moving_average", moving_average(history)),
            ("linear_trend", linear_trend(history)),
        ] {
            if let Some(p) = predicted {
                errors.entry(name).or_default().push(actual - p);
            }
        }
    }
    errors
        .into_iter()
        .map(|(name, errs)| (name.to_string(), rmse(errs)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_series_has_zero_error() {
        let closes = vec![100.0; 50];
        let rmses = baseline_rmses(&closes, 40);
        assert_eq!(rmses.len(), 3);
        for (name, value) in &rmses {
            assert!(*value < 1e-9, "{} rmse should be ~0, got {}", name, value);
        }
    }

    #[test]
    fn linear_trend_wins_on_a_ramp() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let rmses = baseline_rmses(&closes, 45);
        let trend = rmses["linear_trend"];
        let last = rmses["last_value"];
        let ma = rmses["moving_average"];
        assert!(trend < last, "trend {} should beat last-value {}", trend, last);
        assert!(last < ma, "last-value {} should beat MA {}", last, ma);
    }

    #[test]
    fn rmse_and_mae_basics() {
        assert!((rmse([3.0, -4.0]) - (12.5f64).sqrt()).abs() < 1e-12);
        assert_eq!(mae([3.0, -4.0]), 3.5);
        assert!(rmse(std::iter::empty::<f64>()).is_nan());
    }
}
