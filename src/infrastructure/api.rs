//! API Server
//!
//! Classification, caption, metrics and internal status routes over a
//! shared [`AppState`]. The timing middleware wraps everything.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::captions::{CaptionError, CaptionFetcher, CaptionRewriter, RewriteError};
use crate::core::validation::{
    validate_caption, validate_post_url, validate_sentiment, Platform, ValidationError,
};
use crate::inference::{ClassifierError, PoolError, WorkerPool};
use crate::infrastructure::config::Config;
use crate::infrastructure::health::HealthRegistry;
use crate::infrastructure::metrics::ResponseTimeTracker;
use crate::infrastructure::timing::{track_response_time, TimingState};
use crate::SocioLensError;

/// Shared application state, built once at startup
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<WorkerPool>,
    pub tracker: Arc<ResponseTimeTracker>,
    pub health: Arc<HealthRegistry>,
    pub fetcher: Arc<dyn CaptionFetcher>,
    pub rewriter: Arc<dyn CaptionRewriter>,
    pub config: Arc<Config>,
}

impl AppState {
    fn collaborator_timeout(&self) -> Duration {
        Duration::from_secs(self.config.server.request_timeout_secs)
    }
}

/// Handler errors, rendered as `{"detail": "..."}`
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadGateway(String),
    #[error("{0}")]
    GatewayTimeout(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn timeout(what: &str, limit: Duration) -> Self {
        ApiError::GatewayTimeout(format!("{} did not respond within {:?}", what, limit))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(target: "api", "{} - {}", status, self);
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<PoolError> for ApiError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::Closed | PoolError::AcquireTimeout(_) | PoolError::QueueFull(_) => {
                ApiError::Unavailable(e.to_string())
            }
            PoolError::Config(_) | PoolError::Load { .. } | PoolError::Inconsistent => {
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl From<ClassifierError> for ApiError {
    fn from(e: ClassifierError) -> Self {
        ApiError::BadGateway(e.to_string())
    }
}

impl From<CaptionError> for ApiError {
    fn from(e: CaptionError) -> Self {
        match e {
            CaptionError::NotFound => ApiError::NotFound(e.to_string()),
            CaptionError::FetchFailed(_) | CaptionError::Http(_) => ApiError::BadGateway(e.to_string()),
        }
    }
}

impl From<RewriteError> for ApiError {
    fn from(e: RewriteError) -> Self {
        match e {
            RewriteError::MissingApiKey(_) => ApiError::Unavailable(e.to_string()),
            RewriteError::Request(_) | RewriteError::Provider { .. } | RewriteError::Empty => {
                ApiError::BadGateway(e.to_string())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PostInput {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct SentimentResponse {
    pub input_text: String,
    pub predicted_label: String,
    pub confidence: f64,
    pub all_scores: BTreeMap<String, f64>,
}

#[derive(Debug, Deserialize)]
pub struct PostUrlInput {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct OptimizeInput {
    pub caption: String,
    pub sentiment: String,
}

#[derive(Debug, Serialize)]
pub struct CaptionResponse {
    pub caption: String,
}

#[derive(Debug, Serialize)]
pub struct WorkersResponse {
    pub status: &'static str,
    pub ready: bool,
    pub num_gpus: usize,
    pub available_workers: usize,
}

#[derive(Debug, Deserialize)]
pub struct EndpointQuery {
    pub endpoint: Option<String>,
}

impl EndpointQuery {
    /// The requested endpoint; an empty value means "all"
    fn selected(&self) -> Option<&str> {
        self.endpoint.as_deref().filter(|endpoint| !endpoint.is_empty())
    }
}

#[derive(Debug, Deserialize)]
pub struct TimeSeriesQuery {
    pub endpoint: String,
}

/// Build the application router with all middleware installed
pub fn build_router(state: AppState) -> Router {
    let timing = TimingState {
        tracker: Arc::clone(&state.tracker),
        slow_request_ms: state.config.metrics.slow_request_ms,
    };
    let cors = if state.config.server.cors_permissive {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/", get(root))
        // Service endpoints
        .route("/service/sentiment/base", post(classify_sentiment))
        .route("/service/caption/instagram", post(fetch_instagram_caption))
        .route("/service/caption/optimize", post(optimize_caption))
        // Internal status
        .route("/internal/pid", get(pid))
        .route("/internal/health", get(health))
        .route("/internal/workers", get(workers))
        // Metrics
        .route("/metrics/stats", get(metrics_stats))
        .route("/metrics/timeseries", get(metrics_timeseries))
        .route("/metrics/summary", get(metrics_summary))
        .route("/metrics/clear", post(metrics_clear))
        .layer(cors)
        // Outermost: times everything above
        .layer(middleware::from_fn_with_state(timing, track_response_time))
        .with_state(state)
}

/// Serve on an already bound listener
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<(), SocioLensError>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!(target: "api", "API Server stopped");
    Ok(())
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "msg": "SocioLens ASGI server" }))
}

/// Handler for POST /service/sentiment/base
///
/// Input is validated before a worker is taken. The worker goes back to the
/// pool on every exit path, including collaborator timeouts.
async fn classify_sentiment(
    State(state): State<AppState>,
    Json(post): Json<PostInput>,
) -> Result<Json<SentimentResponse>, ApiError> {
    let text = post.text.trim();
    validate_caption(text, &state.config.validation)?;

    let limit = state.collaborator_timeout();
    let worker = state.pool.acquire().await?;
    let outcome = tokio::time::timeout(limit, worker.classify(text)).await;
    let worker_id = worker.id();
    worker.release();

    let classification = outcome.map_err(|_| ApiError::timeout("Sentiment model", limit))??;

    tracing::info!(
        target: "api",
        "Sentiment classified on worker {}: {} ({})",
        worker_id,
        classification.label,
        classification.confidence
    );

    Ok(Json(SentimentResponse {
        input_text: text.to_string(),
        predicted_label: classification.label,
        confidence: classification.confidence,
        all_scores: classification.scores,
    }))
}

/// Handler for POST /service/caption/instagram
async fn fetch_instagram_caption(
    State(state): State<AppState>,
    Json(input): Json<PostUrlInput>,
) -> Result<Json<CaptionResponse>, ApiError> {
    let url = input.url.trim();
    validate_post_url(url, Platform::Instagram)?;

    let limit = state.collaborator_timeout();
    let caption = tokio::time::timeout(limit, state.fetcher.fetch_caption(url))
        .await
        .map_err(|_| ApiError::timeout("Instagram", limit))??;

    Ok(Json(CaptionResponse { caption }))
}

/// Handler for POST /service/caption/optimize
async fn optimize_caption(
    State(state): State<AppState>,
    Json(input): Json<OptimizeInput>,
) -> Result<Json<CaptionResponse>, ApiError> {
    let caption = input.caption.trim();
    let sentiment = input.sentiment.trim();
    validate_caption(caption, &state.config.validation)?;
    validate_sentiment(sentiment)?;

    let limit = state.collaborator_timeout();
    let caption = tokio::time::timeout(limit, state.rewriter.rewrite(caption, sentiment))
        .await
        .map_err(|_| ApiError::timeout("Rewrite provider", limit))??;

    Ok(Json(CaptionResponse { caption }))
}

async fn pid() -> Json<serde_json::Value> {
    Json(json!({ "pid": std::process::id() }))
}

/// Latest health snapshot; never triggers a sample
async fn health(State(state): State<AppState>) -> Response {
    Json(state.health.snapshot()).into_response()
}

async fn workers(State(state): State<AppState>) -> Json<WorkersResponse> {
    Json(WorkersResponse {
        status: "ok",
        ready: state.pool.is_ready(),
        num_gpus: state.pool.size(),
        available_workers: state.pool.available(),
    })
}

async fn metrics_stats(
    State(state): State<AppState>,
    Query(query): Query<EndpointQuery>,
) -> Result<Response, ApiError> {
    match query.selected() {
        Some(endpoint) => {
            let stats = state.tracker.stats(endpoint);
            if stats.count == 0 {
                return Err(ApiError::NotFound(format!("No data found for endpoint: {}", endpoint)));
            }
            Ok(Json(stats).into_response())
        }
        None => {
            let endpoints = state.tracker.all_stats();
            Ok(Json(json!({
                "total_endpoints": endpoints.len(),
                "endpoints": endpoints,
            }))
            .into_response())
        }
    }
}

async fn metrics_timeseries(
    State(state): State<AppState>,
    Query(query): Query<TimeSeriesQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let data = state.tracker.time_series(&query.endpoint);
    if data.is_empty() {
        return Err(ApiError::NotFound(format!(
            "No data found for endpoint: {}",
            query.endpoint
        )));
    }

    Ok(Json(json!({
        "endpoint": query.endpoint,
        "count": data.len(),
        "data": data,
    })))
}

async fn metrics_summary(State(state): State<AppState>) -> Response {
    Json(state.tracker.summary()).into_response()
}

async fn metrics_clear(
    State(state): State<AppState>,
    Query(query): Query<EndpointQuery>,
) -> Json<serde_json::Value> {
    let selected = query.selected();
    state.tracker.clear(selected);

    let target = selected.unwrap_or("all endpoints");
    tracing::info!(target: "api", "Cleared metrics for {}", target);

    Json(json!({
        "status": "success",
        "message": format!("Cleared metrics for {}", target),
    }))
}
