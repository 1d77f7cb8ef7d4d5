use anyhow::{Result, anyhow};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Candle interval lengths supported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    OneMin,
    #[serde(rename = "5m")]
    FiveMin,
    #[serde(rename = "15m")]
    FifteenMin,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHour,
    #[serde(rename = "1d")]
    OneDay,
}

impl Timeframe {
    pub fn minutes(&self) -> u32 {
        match self {
            Timeframe::OneMin => 1,
            Timeframe::FiveMin => 5,
            Timeframe::FifteenMin => 15,
            Timeframe::OneHour => 60,
            Timeframe::FourHour => 240,
            Timeframe::OneDay => 1440,
        }
    }

    pub fn seconds(&self) -> i64 {
        self.minutes() as i64 * 60
    }

    /// Maximum span a single upstream request may cover for this interval.
    /// Wider ranges are chunked into consecutive requests of this size.
    pub fn max_span_days(&self) -> i64 {
        match self {
            Timeframe::OneMin => 5,
            Timeframe::FiveMin | Timeframe::FifteenMin => 60,
            Timeframe::OneHour | Timeframe::FourHour => 730,
            Timeframe::OneDay => 3650,
        }
    }

    /// Interval token used by the primary (Upstox-style) historical API.
    pub fn primary_interval(&self) -> &'static str {
        match self {
            Timeframe::OneMin => "1minute",
            Timeframe::FiveMin => "5minute",
            Timeframe::FifteenMin => "15minute",
            Timeframe::OneHour => "60minute",
            Timeframe::FourHour => "240minute",
            Timeframe::OneDay => "day",
        }
    }

    /// Interval token used by the fallback (Yahoo-style) chart API.
    /// `None` means the fallback cannot serve this interval at all.
    pub fn fallback_interval(&self) -> Option<&'static str> {
        match self {
            Timeframe::OneMin => Some("1m"),
            Timeframe::FiveMin => Some("5m"),
            Timeframe::FifteenMin => Some("15m"),
            Timeframe::OneHour => Some("60m"),
            Timeframe::FourHour => None,
            Timeframe::OneDay => Some("1d"),
        }
    }

    /// Start of the period containing `ts`, anchored to the given session
    /// open. Intraday periods count from the session open so that e.g. NSE
    /// hourly candles land on 09:15, 10:15, ... rather than on UTC hours.
    pub fn period_start(&self, ts: DateTime<Utc>, session_open: DateTime<Utc>) -> DateTime<Utc> {
        if *self == Timeframe::OneDay {
            return session_open;
        }
        let offset = (ts - session_open).num_seconds();
        if offset < 0 {
            return session_open;
        }
        let aligned = offset - offset % self.seconds();
        session_open + chrono::Duration::seconds(aligned)
    }

    /// Whether `ts` is a valid candle-open instant relative to `session_open`.
    pub fn is_aligned(&self, ts: DateTime<Utc>, session_open: DateTime<Utc>) -> bool {
        if *self == Timeframe::OneDay {
            return ts == session_open;
        }
        let offset = (ts - session_open).num_seconds();
        offset >= 0 && offset % self.seconds() == 0
    }

    pub fn all() -> &'static [Timeframe] {
        &[
            Timeframe::OneMin,
            Timeframe::FiveMin,
            Timeframe::FifteenMin,
            Timeframe::OneHour,
            Timeframe::FourHour,
            Timeframe::OneDay,
        ]
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Timeframe::OneMin => "1m",
            Timeframe::FiveMin => "5m",
            Timeframe::FifteenMin => "15m",
            Timeframe::OneHour => "1h",
            Timeframe::FourHour => "4h",
            Timeframe::OneDay => "1d",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1m" => Ok(Timeframe::OneMin),
            "5m" => Ok(Timeframe::FiveMin),
            "15m" => Ok(Timeframe::FifteenMin),
            "1h" => Ok(Timeframe::OneHour),
            "4h" => Ok(Timeframe::FourHour),
            "1d" => Ok(Timeframe::OneDay),
            other => Err(anyhow!("unknown timeframe: {}", other)),
        }
    }
}
