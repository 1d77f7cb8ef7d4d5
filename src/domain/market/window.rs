use super::candle::Candle;
use super::timeframe::Timeframe;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WindowError {
    #[error("candle {index} belongs to {found}/{found_tf}, window is {expected}/{expected_tf}")]
    MixedSeries {
        index: usize,
        found: String,
        found_tf: Timeframe,
        expected: String,
        expected_tf: Timeframe,
    },
    #[error("candle timestamps not strictly increasing at index {index}")]
    OutOfOrder { index: usize },
}

/// Ordered, deduplicated candle sequence for one `(symbol, timeframe)`.
/// The constructor is the only way in, so holding a `WindowSlice` is proof
/// of the ordering invariant. Returned by value; callers never share.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WindowSlice {
    symbol: String,
    timeframe: Timeframe,
    candles: Vec<Candle>,
}

impl WindowSlice {
    pub fn new(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        candles: Vec<Candle>,
    ) -> Result<Self, WindowError> {
        let symbol = symbol.into();
        for (i, c) in candles.iter().enumerate() {
            if c.symbol != symbol || c.timeframe != timeframe {
                return Err(WindowError::MixedSeries {
                    index: i,
                    found: c.symbol.clone(),
                    found_tf: c.timeframe,
                    expected: symbol,
                    expected_tf: timeframe,
                });
            }
            if i > 0 && candles[i - 1].ts >= c.ts {
                return Err(WindowError::OutOfOrder { index: i });
            }
        }
        Ok(Self {
            symbol,
            timeframe,
            candles,
        })
    }

    /// Merge any number of candle batches into a slice. Within one
    /// timestamp the observation with the highest provenance rank wins;
    /// on equal rank the later batch wins.
    pub fn assemble(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        batches: Vec<Vec<Candle>>,
    ) -> Result<Self, WindowError> {
        let symbol = symbol.into();
        let mut by_ts: BTreeMap<DateTime<Utc>, Candle> = BTreeMap::new();
        for batch in batches {
            for candle in batch {
                match by_ts.get(&candle.ts) {
                    Some(existing) if existing.provenance > candle.provenance => {}
                    _ => {
                        by_ts.insert(candle.ts, candle);
                    }
                }
            }
        }
        Self::new(symbol, timeframe, by_ts.into_values().collect())
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn first(&self) -> Option<&Candle> {
        self.candles.first()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn closes_f64(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close_f64()).collect()
    }

    /// Last `n` candles as a new slice.
    pub fn tail(&self, n: usize) -> WindowSlice {
        let start = self.candles.len().saturating_sub(n);
        WindowSlice {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
            candles: self.candles[start..].to_vec(),
        }
    }

    /// Uncovered head range when this slice is asked to serve
    /// `[from, to]`: the loader backfills only `[from, first)` rather than
    /// refetching what it already holds.
    pub fn head_gap(&self, from: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let first = self.first()?.ts;
        if from + chrono::Duration::seconds(self.timeframe.seconds()) <= first {
            Some((from, first))
        } else {
            None
        }
    }

    /// Uncovered tail range when serving `[from, to]`.
    pub fn tail_gap(&self, to: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let last = self.last()?.ts;
        let next = last + chrono::Duration::seconds(self.timeframe.seconds());
        if next < to { Some((next, to)) } else { None }
    }
}
