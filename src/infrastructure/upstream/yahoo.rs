//! Fallback upstream: Yahoo-style chart API. Arrays are index-aligned and
//! may contain nulls where the exchange printed no trade; such slots are
//! dropped here rather than forwarded as zero-priced candles.

use crate::domain::errors::ServiceError;
use crate::domain::market::Timeframe;
use crate::domain::ports::{CandleProvider, RawCandle};
use crate::infrastructure::core::CircuitBreaker;
use crate::infrastructure::core::http_client_factory::url_with_query;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub struct YahooProvider {
    client: ClientWithMiddleware,
    base_url: String,
    breaker: CircuitBreaker,
}

#[derive(Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Deserialize)]
struct ChartError {
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Deserialize)]
struct Indicators {
    quote: Vec<Quote>,
}

#[derive(Deserialize, Default)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

impl YahooProvider {
    pub fn new(client: ClientWithMiddleware, base_url: String) -> Self {
        Self {
            client,
            base_url,
            breaker: CircuitBreaker::new("yahoo", Duration::from_secs(60)),
        }
    }

    async fn fetch_inner(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RawCandle>, ServiceError> {
        let interval = timeframe
            .fallback_interval()
            .ok_or_else(|| ServiceError::UpstreamFailure {
                last_error: format!("yahoo does not serve {} candles", timeframe),
            })?;

        let url = url_with_query(
            &format!("{}/v8/finance/chart/{}", self.base_url, symbol),
            &[
                ("interval", interval),
                ("period1", &from.timestamp().to_string()),
                ("period2", &to.timestamp().to_string()),
                ("includePrePost", "false"),
            ],
        );
        debug!("yahoo fetch: {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ServiceError::UpstreamFailure {
                last_error: format!("yahoo request: {}", e),
            })?;

        if !response.status().is_success() {
            return Err(ServiceError::UpstreamFailure {
                last_error: format!("yahoo status {}", response.status()),
            });
        }

        let body: ChartResponse =
            response
                .json()
                .await
                .map_err(|e| ServiceError::UpstreamFailure {
                    last_error: format!("yahoo decode: {}", e),
                })?;

        if let Some(err) = body.chart.error {
            return Err(ServiceError::UpstreamFailure {
                last_error: format!("yahoo error: {}", err.description),
            });
        }

        let result = body
            .chart
            .result
            .and_then(|mut r| if r.is_empty() { None } else { Some(r.remove(0)) })
            .ok_or_else(|| ServiceError::UpstreamFailure {
                last_error: "yahoo: empty result".to_string(),
            })?;

        Ok(flatten(result))
    }
}

fn flatten(result: ChartResult) -> Vec<RawCandle> {
    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
    let mut out = Vec::with_capacity(result.timestamp.len());
    for (i, secs) in result.timestamp.iter().enumerate() {
        let Some(ts) = Utc.timestamp_opt(*secs, 0).single() else {
            continue;
        };
        let (Some(open), Some(high), Some(low), Some(close)) = (
            field(&quote.open, i),
            field(&quote.high, i),
            field(&quote.low, i),
            field(&quote.close, i),
        ) else {
            continue;
        };
        let volume = field(&quote.volume, i).unwrap_or(Decimal::ZERO);
        out.push(RawCandle {
            ts: ts.fixed_offset(),
            open,
            high,
            low,
            close,
            volume,
        });
    }
    out
}

fn field(values: &[Option<f64>], i: usize) -> Option<Decimal> {
    values.get(i).copied().flatten().and_then(Decimal::from_f64)
}

#[async_trait]
impl CandleProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo"
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
