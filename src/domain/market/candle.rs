use super::timeframe::Timeframe;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Which tier produced a candle. Higher rank wins when two observations
/// exist for the same `(symbol, timeframe, ts)` during a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Cache,
    Db,
    Fallback,
    Primary,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Primary => "primary",
            Provenance::Fallback => "fallback",
            Provenance::Db => "db",
            Provenance::Cache => "cache",
        }
    }
}

impl std::str::FromStr for Provenance {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "primary" => Ok(Provenance::Primary),
            "fallback" => Ok(Provenance::Fallback),
            "db" => Ok(Provenance::Db),
            "cache" => Ok(Provenance::Cache),
            other => anyhow::bail!("unknown provenance: {}", other),
        }
    }
}

/// One OHLCV observation. Never mutated after construction; a newer
/// observation for the same key replaces the record wholesale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub ts: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub provenance: Provenance,
}

impl Candle {
    /// `low <= {open, close} <= high`, all prices positive, volume
    /// non-negative. Timestamp checks live in the loader's
    /// canonicalization pass, which owns the calendar.
    pub fn ohlc_valid(&self) -> bool {
        self.low > Decimal::ZERO
            && self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
            && self.volume >= Decimal::ZERO
    }

    pub fn close_f64(&self) -> f64 {
        self.close.to_f64().unwrap_or(0.0)
    }

    pub fn open_f64(&self) -> f64 {
        self.open.to_f64().unwrap_or(0.0)
    }

    pub fn high_f64(&self) -> f64 {
        self.high.to_f64().unwrap_or(0.0)
    }

    pub fn low_f64(&self) -> f64 {
        self.low.to_f64().unwrap_or(0.0)
    }

    pub fn volume_f64(&self) -> f64 {
        self.volume.to_f64().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn candle(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Candle {
        Candle {
            symbol: "ACME".to_string(),
            timeframe: Timeframe::FiveMin,
            ts: Utc.with_ymd_and_hms(2025, 6, 2, 3, 45, 0).unwrap(),
            open,
            high,
            low,
            close,
            volume: dec!(1000),
            provenance: Provenance::Primary,
        }
    }

    #[test]
    fn accepts_well_formed_ohlc() {
        assert!(candle(dec!(100), dec!(102), dec!(99), dec!(101)).ohlc_valid());
    }

    #[test]
    fn rejects_inverted_range() {
        assert!(!candle(dec!(100), dec!(99), dec!(101), dec!(100)).ohlc_valid());
        assert!(!candle(dec!(100), dec!(101), dec!(99), dec!(102)).ohlc_valid());
        assert!(!candle(dec!(0), dec!(1), dec!(0), dec!(1)).ohlc_valid());
    }

    #[test]
    fn provenance_ranking_prefers_fresher_tiers() {
        assert!(Provenance::Primary > Provenance::Fallback);
        assert!(Provenance::Fallback > Provenance::Db);
        assert!(Provenance::Db > Provenance::Cache);
    }
}
