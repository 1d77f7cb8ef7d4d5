pub mod gates;
pub mod sanitize;

pub use gates::{DriftLimits, RejectReason, ValidationLimits, envelope_gate, series_gates, window_gate};
pub use sanitize::sanitize_series;
