//! REST surface. Handlers stay thin: parse, delegate to the services,
//! map `ServiceError` into the `{error, message, detail?}` envelope.

use crate::application::features::compute_snapshot;
use crate::application::orchestrator::PredictRequest;
use crate::application::system::Application;
use crate::application::window_loader::LoadOptions;
use crate::domain::errors::ServiceError;
use crate::domain::market::{Candle, Timeframe};
use crate::domain::training::{TrainParams, TrainingJob};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn build_router(app: Arc<Application>) -> Router {
    Router::new()
        .route("/api/candles", get(get_window))
        .route("/api/candles/latest", get(get_latest_candle))
        .route("/api/predict", post(trigger_prediction))
        .route("/api/predictions/latest", get(get_latest_prediction))
        .route("/api/ta", get(get_ta))
        .route("/api/train", post(train_bot))
        .route("/api/train/auto", post(start_auto_training))
        .route("/api/train/control", post(training_control))
        .route("/api/train/status", get(training_status))
        .route("/api/models/report", get(models_report))
        .route("/api/models", delete(clear_model))
        .route("/api/cache/clear", post(clear_cache))
        .route("/metrics", get(metrics))
        .route("/ws", get(super::ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app)
}

/// Error envelope: `{error, message, detail?}` with the stable kind
/// strings, mapped onto status codes.
pub enum ApiError {
    BadRequest(String),
    Service(ServiceError),
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        Self::Service(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message, detail) = match self {
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                "bad_request",
                message,
                None,
            ),
            ApiError::Service(e) => {
                let status = match &e {
                    ServiceError::NotFound { .. } => StatusCode::NOT_FOUND,
                    ServiceError::DuplicateJob { .. } => StatusCode::CONFLICT,
                    ServiceError::ValidationFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    ServiceError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                    ServiceError::DataUnavailable { .. }
                    | ServiceError::InsufficientCoverage { .. }
                    | ServiceError::UpstreamFailure { .. } => StatusCode::BAD_GATEWAY,
                    ServiceError::Cancelled => StatusCode::CONFLICT,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let detail = match &e {
                    ServiceError::ValidationFailed { reasons } => Some(json!(
                        reasons.iter().map(|r| r.as_str()).collect::<Vec<_>>()
                    )),
                    _ => None,
                };
                (status, e.kind(), e.to_string(), detail)
            }
        };
        let body = json!({
            "error": kind,
            "message": message,
            "detail": detail,
        });
        (status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError::BadRequest(message.into())
}

#[derive(Deserialize)]
struct WindowQuery {
    symbol: String,
    timeframe: Timeframe,
    limit: Option<usize>,
    from_ts: Option<i64>,
    to_ts: Option<i64>,
    bypass_cache: Option<bool>,
}

async fn get_window(
    State(app): State<Arc<Application>>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<Vec<Candle>>, ApiError> {
    let now = app.calendar.now();
    let to = parse_ts(query.to_ts)?.unwrap_or(now);
    let from = match parse_ts(query.from_ts)? {
        Some(from) => from,
        None => to - chrono::Duration::days(app.config.default_lookback_days),
    };
    let options = LoadOptions {
        bypass_cache: query.bypass_cache.unwrap_or(false),
        skip_min_check: true,
    };
    let slice = app
        .loader
        .load(&query.symbol, query.timeframe, from, to, options)
        .await?;
    let candles = match query.limit {
        Some(limit) => slice.tail(limit).candles().to_vec(),
        None => slice.candles().to_vec(),
    };
    Ok(Json(candles))
}

#[derive(Deserialize)]
struct KeyQuery {
    symbol: String,
    timeframe: Timeframe,
}

async fn get_latest_candle(
    State(app): State<Arc<Application>>,
    Query(query): Query<KeyQuery>,
) -> Result<Json<Candle>, ApiError> {
    let candle = app.loader.fetch_latest(&query.symbol, query.timeframe).await?;
    Ok(Json(candle))
}

#[derive(Deserialize)]
struct PredictBody {
    symbol: String,
    timeframe: Timeframe,
    horizon_minutes: u32,
    selected_bots: Option<Vec<String>>,
    use_cache: Option<bool>,
}

async fn trigger_prediction(
    State(app): State<Arc<Application>>,
    Json(body): Json<PredictBody>,
) -> Result<Response, ApiError> {
    if body.horizon_minutes == 0 {
        return Err(bad_request("horizon_minutes must be positive"));
    }
    let record = app
        .orchestrator
        .predict(PredictRequest {
            symbol: body.symbol,
            timeframe: body.timeframe,
            horizon_minutes: body.horizon_minutes,
            selected_bots: body.selected_bots,
            use_cache: body.use_cache.unwrap_or(true),
        })
        .await?;
    Ok(Json(record).into_response())
}

async fn get_latest_prediction(
    State(app): State<Arc<Application>>,
    Query(query): Query<KeyQuery>,
) -> Result<Response, ApiError> {
    let record = app
        .prediction_repo
        .find_latest(&query.symbol, query.timeframe)
        .await
        .map_err(ServiceError::Internal)?;
    Ok(Json(record).into_response())
}

async fn get_ta(
    State(app): State<Arc<Application>>,
    Query(query): Query<KeyQuery>,
) -> Result<Response, ApiError> {
    let slice = app
        .loader
        .load_lookback(
            &query.symbol,
            query.timeframe,
            app.config.default_lookback_days,
            LoadOptions::default(),
        )
        .await?;
    Ok(Json(compute_snapshot(&slice)).into_response())
}

#[derive(Deserialize)]
struct TrainBody {
    symbol: String,
    timeframe: Timeframe,
    bot_name: String,
    epochs: Option<u32>,
    batch_size: Option<u32>,
}

#[derive(Serialize)]
struct TrainResponse {
    training_id: uuid::Uuid,
    status: &'static str,
}

async fn train_bot(
    State(app): State<Arc<Application>>,
    Json(body): Json<TrainBody>,
) -> Result<Json<TrainResponse>, ApiError> {
    if app.bots.get(&body.bot_name).is_none() {
        return Err(ApiError::Service(ServiceError::NotFound {
            what: format!("bot {}", body.bot_name),
        }));
    }
    let defaults = TrainParams::default();
    let job = TrainingJob::new(
        body.symbol,
        body.timeframe,
        body.bot_name,
        TrainParams {
            epochs: body.epochs.unwrap_or(defaults.epochs),
            batch_size: body.batch_size.unwrap_or(defaults.batch_size),
        },
        app.calendar.now(),
    );
    let key = job.dedup_key();
    let training_id = job.id;
    let busy = app.training_queue.is_busy().await;

    let outcome = app.training_queue.enqueue(vec![job]).await;
    if outcome.admitted == 0 {
        return Err(ApiError::Service(ServiceError::DuplicateJob { key }));
    }
    Ok(Json(TrainResponse {
        training_id,
        status: if busy { "queued" } else { "started" },
    }))
}

#[derive(Deserialize)]
struct AutoTrainBody {
    symbols: Vec<String>,
    timeframes: Vec<Timeframe>,
    bots: Vec<String>,
    epochs: Option<u32>,
    batch_size: Option<u32>,
}

#[derive(Serialize)]
struct AutoTrainResponse {
    queue_size: usize,
    admitted: usize,
    duplicates: usize,
}

async fn start_auto_training(
    State(app): State<Arc<Application>>,
    Json(body): Json<AutoTrainBody>,
) -> Result<Json<AutoTrainResponse>, ApiError> {
    let defaults = TrainParams::default();
    let params = TrainParams {
        epochs: body.epochs.unwrap_or(defaults.epochs),
        batch_size: body.batch_size.unwrap_or(defaults.batch_size),
    };
    let now = app.calendar.now();

    let mut jobs = Vec::new();
    for symbol in &body.symbols {
        for timeframe in &body.timeframes {
            for bot in &body.bots {
                if app.bots.get(bot).is_none() {
                    return Err(ApiError::Service(ServiceError::NotFound {
                        what: format!("bot {}", bot),
                    }));
                }
                jobs.push(TrainingJob::new(symbol.clone(), *timeframe, bot.clone(), params, now));
            }
        }
    }
    let outcome = app.training_queue.enqueue(jobs).await;
    Ok(Json(AutoTrainResponse {
        queue_size: outcome.queue_size,
        admitted: outcome.admitted,
        duplicates: outcome.duplicates,
    }))
}

#[derive(Deserialize)]
struct ControlBody {
    action: String,
}

async fn training_control(
    State(app): State<Arc<Application>>,
    Json(body): Json<ControlBody>,
) -> Result<Response, ApiError> {
    let status = match body.action.as_str() {
        "pause" => app.training_queue.pause().await,
        "resume" => app.training_queue.resume().await,
        "stop" => app.training_queue.stop().await,
        "force-stop" => app.training_queue.force_stop().await,
        other => {
            return Err(bad_request(format!(
                "unknown action {} (expected pause|resume|stop|force-stop)",
                other
            )));
        }
    };
    Ok(Json(status).into_response())
}

async fn training_status(State(app): State<Arc<Application>>) -> Response {
    Json(app.training_queue.status().await).into_response()
}

async fn models_report(State(app): State<Arc<Application>>) -> Result<Response, ApiError> {
    let report = app
        .health_monitor
        .models_report()
        .await
        .map_err(ServiceError::Internal)?;
    Ok(Json(report).into_response())
}

#[derive(Deserialize)]
struct ClearModelQuery {
    symbol: String,
    timeframe: Timeframe,
    bot_name: String,
}

async fn clear_model(
    State(app): State<Arc<Application>>,
    Query(query): Query<ClearModelQuery>,
) -> Result<Response, ApiError> {
    let bot = app
        .bots
        .get(&query.bot_name)
        .ok_or_else(|| ApiError::Service(ServiceError::NotFound {
            what: format!("bot {}", query.bot_name),
        }))?;

    let removed_rows = app
        .training_repo
        .delete_model(&query.symbol, query.timeframe, &query.bot_name)
        .await
        .map_err(ServiceError::Internal)?;
    let removed_artifact = bot.clear(&query.symbol, query.timeframe).await?;

    Ok(Json(json!({
        "removed": removed_rows + u64::from(removed_artifact),
    }))
    .into_response())
}

async fn clear_cache(State(app): State<Arc<Application>>) -> StatusCode {
    app.loader.clear_caches().await;
    StatusCode::NO_CONTENT
}

async fn metrics(State(app): State<Arc<Application>>) -> Response {
    match app.metrics.render() {
        Ok(text) => text.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

fn parse_ts(secs: Option<i64>) -> Result<Option<DateTime<Utc>>, ApiError> {
    match secs {
        None => Ok(None),
        Some(secs) => Utc
            .timestamp_opt(secs, 0)
            .single()
            .map(Some)
            .ok_or_else(|| bad_request(format!("invalid unix timestamp {}", secs))),
    }
}
