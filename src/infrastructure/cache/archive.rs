use crate::domain::market::{Candle, Provenance, Timeframe};
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

/// Cold tier: append-only CSV archive, one file per `(symbol, timeframe)`
/// under the archive root. Consulted when the persistent store has gaps;
/// rows read back carry `Provenance::Cache`.
pub struct ColdArchive {
    root: PathBuf,
}

impl ColdArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn file_path(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        // Symbols may carry exchange prefixes like "NSE:ACME".
        let safe: String = symbol
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect();
        self.root.join(format!("{}_{}.csv", safe, timeframe))
    }

    /// Append candles newer than the file's last row. Returns rows written.
    pub fn append(&self, symbol: &str, timeframe: Timeframe, candles: &[Candle]) -> Result<u64> {
        if candles.is_empty() {
            return Ok(0);
        }
        fs::create_dir_all(&self.root).context("create archive root")?;
        let path = self.file_path(symbol, timeframe);
        let last_archived = self.last_ts(&path)?;

        let fresh: Vec<&Candle> = candles
            .iter()
            .filter(|c| last_archived.map(|t| c.ts > t).unwrap_or(true))
            .collect();
        if fresh.is_empty() {
            return Ok(0);
        }

        let exists = path.exists();
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open archive file {:?}", path))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(!exists)
            .from_writer(file);

        if !exists {
            writer.write_record(["ts", "open", "high", "low", "close", "volume"])?;
        }
        for candle in &fresh {
            writer.write_record([
                candle.ts.timestamp().to_string(),
                candle.open.to_string(),
                candle.high.to_string(),
                candle.low.to_string(),
                candle.close.to_string(),
                candle.volume.to_string(),
            ])?;
        }
        writer.flush()?;
        debug!(
            "archived {} candles for {} {} -> {:?}",
            fresh.len(),
            symbol,
            timeframe,
            path
        );
        Ok(fresh.len() as u64)
    }

    /// Candles in `[from, to]`, ascending. Unparseable rows are skipped
    /// with a warning rather than failing the read.
    pub fn read_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let path = self.file_path(symbol, timeframe);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&path)
            .with_context(|| format!("open archive file {:?}", path))?;

        let mut out = Vec::new();
        for row in reader.records() {
            let row = row?;
            match parse_row(&row, symbol, timeframe) {
                Some(candle) if candle.ts >= from && candle.ts <= to => out.push(candle),
                Some(_) => {}
                None => warn!("skipping malformed archive row in {:?}", path),
            }
        }
        out.sort_by_key(|c| c.ts);
        out.dedup_by_key(|c| c.ts);
        Ok(out)
    }

    fn last_ts(&self, path: &Path) -> Result<Option<DateTime<Utc>>> {
        if !path.exists() {
            return Ok(None);
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)?;
        let mut last = None;
        for row in reader.records() {
            let row = row?;
            if let Some(raw) = row.get(0)
                && let Ok(secs) = raw.parse::<i64>()
                && let Some(ts) = Utc.timestamp_opt(secs, 0).single()
            {
                last = Some(last.map_or(ts, |prev: DateTime<Utc>| prev.max(ts)));
            }
        }
        Ok(last)
    }
}

fn parse_row(row: &csv::StringRecord, symbol: &str, timeframe: Timeframe) -> Option<Candle> {
    let secs: i64 = row.get(0)?.parse().ok()?;
    let ts = Utc.timestamp_opt(secs, 0).single()?;
    Some(Candle {
        symbol: symbol.to_string(),
        timeframe,
        ts,
        open: Decimal::from_str(row.get(1)?).ok()?,
        high: Decimal::from_str(row.get(2)?).ok()?,
        low: Decimal::from_str(row.get(3)?).ok()?,
        close: Decimal::from_str(row.get(4)?).ok()?,
        volume: Decimal::from_str(row.get(5)?).ok()?,
        provenance: Provenance::Cache,
    })
}
