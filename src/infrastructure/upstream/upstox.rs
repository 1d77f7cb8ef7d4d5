//! Primary upstream: Upstox-style historical candle API.
//!
//! Response shape:
//! `{"status":"success","data":{"candles":[["2025-06-02T09:15:00+05:30",o,h,l,c,v,oi], ...]}}`
//! with rows ordered newest-first and timestamps in exchange-local time.

use crate::domain::errors::ServiceError;
use crate::domain::market::Timeframe;
use crate::domain::ports::{CandleProvider, RawCandle};
use crate::infrastructure::core::CircuitBreaker;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

pub struct UpstoxProvider {
    client: ClientWithMiddleware,
    base_url: String,
    access_token: String,
    breaker: CircuitBreaker,
}

#[derive(Deserialize)]
struct UpstoxResponse {
    status: String,
    #[serde(default)]
    data: Option<UpstoxData>,
}

#[derive(Deserialize)]
struct UpstoxData {
    #[serde(default)]
    candles: Vec<Vec<Value>>,
}

impl UpstoxProvider {
    pub fn new(client: ClientWithMiddleware, base_url: String, access_token: String) -> Self {
        Self {
            client,
            base_url,
            access_token,
            breaker: CircuitBreaker::new("upstox", Duration::from_secs(60)),
        }
    }

    async fn fetch_inner(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RawCandle>, ServiceError> {
        let url = format!(
            "{}/v2/historical-candle/{}/{}/{}/{}",
            self.base_url,
            symbol,
            timeframe.primary_interval(),
            to.format("%Y-%m-%d"),
            from.format("%Y-%m-%d"),
        );
        debug!("upstox fetch: {}", url);

        let mut request = self.client.get(&url).header("Accept", "application/json");
        if !self.access_token.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.access_token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ServiceError::UpstreamFailure {
                last_error: format!("upstox request: {}", e),
            })?;

        if !response.status().is_success() {
            return Err(ServiceError::UpstreamFailure {
                last_error: format!("upstox status {}", response.status()),
            });
        }

        let body: UpstoxResponse =
            response
                .json()
                .await
                .map_err(|e| ServiceError::UpstreamFailure {
                    last_error: format!("upstox decode: {}", e),
                })?;

        if body.status != "success" {
            return Err(ServiceError::UpstreamFailure {
                last_error: format!("upstox status field: {}", body.status),
            });
        }

        let rows = body.data.map(|d| d.candles).unwrap_or_default();
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            match parse_row(&row) {
                Some(candle) => out.push(candle),
                None => warn!("upstox: skipping malformed candle row for {}", symbol),
            }
        }
        // Newest-first on the wire; hand back ascending.
        out.reverse();
        Ok(out)
    }
}

fn parse_row(row: &[Value]) -> Option<RawCandle> {
    if row.len() < 6 {
        return None;
    }
    let ts = DateTime::parse_from_rfc3339(row[0].as_str()?).ok()?;
    Some(RawCandle {
        ts,
        open: decimal(&row[1])?,
        high: decimal(&row[2])?,
        low: decimal(&row[3])?,
        close: decimal(&row[4])?,
        volume: decimal(&row[5])?,
    })
}

fn decimal(v: &Value) -> Option<Decimal> {
    match v {
        Value::Number(n) => Decimal::from_f64(n.as_f64()?),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl CandleProvider for UpstoxProvider {
    fn name(&self) -> &str {
        "upstox"
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RawCandle>, ServiceError> {
        self.breaker
            .run(self.fetch_inner(symbol, timeframe, from, to))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_wire_row() {
        let row = vec![
            json!("2025-06-02T09:15:00+05:30"),
            json!(100.5),
            json!(101.0),
            json!(99.75),
            json!(100.25),
            json!(125000),
            json!(0),
        ];
        let candle = parse_row(&row).unwrap();
        // 09:15 IST == 03:45 UTC
        assert_eq!(candle.ts.with_timezone(&Utc).to_rfc3339(), "2025-06-02T03:45:00+00:00");
        assert_eq!(candle.close.to_string(), "100.25");
    }

    #[test]
    fn short_or_garbled_rows_are_rejected() {
        assert!(parse_row(&[json!("2025-06-02T09:15:00+05:30")]).is_none());
        let row = vec![
            json!("not a timestamp"),
            json!(1),
            json!(1),
            json!(1),
            json!(1),
            json!(1),
        ];
        assert!(parse_row(&row).is_none());
    }
}
