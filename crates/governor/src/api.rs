//! HTTP API for health checks, Prometheus metrics and governor state

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use governor_lib::{
    health::ComponentStatus,
    history::HistorySummary,
    telemetry::ExportFormat,
    Governor, GovernorError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub governor: Arc<Governor>,
}

impl AppState {
    pub fn new(governor: Arc<Governor>) -> Self {
        Self { governor }
    }
}

/// Errors rendered as `{"error": "..."}`
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unavailable(String),
    Internal(String),
}

impl From<GovernorError> for ApiError {
    fn from(err: GovernorError) -> Self {
        match err {
            GovernorError::Storage(e) => ApiError::Unavailable(e.to_string()),
            GovernorError::Export(msg) => ApiError::Internal(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorBody { error })).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Optimization history plus its per-reason tally
#[derive(Serialize)]
pub struct HistoryResponse<T> {
    pub summary: HistorySummary,
    pub events: Vec<T>,
}

/// Condensed view of every component
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub environment: String,
    pub storage_engine: String,
    pub ready: bool,
    pub parallelism_ceiling: usize,
    pub active_tests: usize,
    pub max_connections: Option<u32>,
    pub skip_conditions: usize,
    pub tests_skipped: u64,
    pub tests_recorded: usize,
}

#[derive(Debug, Deserialize)]
pub struct FormatQuery {
    pub format: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExportResponse {
    pub format: String,
    pub path: String,
    pub records: usize,
}

const DEFAULT_HISTORY_LIMIT: usize = 100;

fn wants_text(query: &FormatQuery) -> ApiResult<bool> {
    match query.format.as_deref() {
        None | Some("json") => Ok(false),
        Some("text") | Some("txt") => Ok(true),
        Some(other) => Err(ApiError::BadRequest(format!(
            "unsupported format {:?}, expected json or text",
            other
        ))),
    }
}

fn text_response(body: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.governor.health().health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still admitting tests
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.governor.health().readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics from the governor's own registry
async fn metrics(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    let body = state
        .governor
        .metrics()
        .encode_text()
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
        body,
    )
        .into_response())
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let governor = &state.governor;
    let skips = governor.skips().get_skip_statistics();

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: governor.settings().environment.clone(),
        storage_engine: governor.storage().engine().to_string(),
        ready: governor.health().readiness().await.ready,
        parallelism_ceiling: governor.parallelism().ceiling(),
        active_tests: governor.parallelism().active_count(),
        max_connections: governor.storage().pool_stats().ok().map(|s| s.max_open),
        skip_conditions: governor.skips().condition_count(),
        tests_skipped: skips.total_skipped,
        tests_recorded: governor.telemetry().len(),
    })
}

async fn pool_metrics(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.governor.pool().get_current_metrics()?))
}

async fn pool_history(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let pool = state.governor.pool();
    Json(HistoryResponse {
        summary: pool.history_summary(),
        events: pool.optimization_history(),
    })
}

async fn pool_optimize(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let event = state.governor.pool().optimize_connections()?;
    info!(reason = %event.reason, "Pool optimization triggered via API");
    Ok(Json(event))
}

async fn parallelism_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.governor.parallelism().get_current_metrics())
}

async fn parallelism_history(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let parallelism = state.governor.parallelism();
    Json(HistoryResponse {
        summary: parallelism.history_summary(),
        events: parallelism.get_optimization_history(),
    })
}

async fn parallelism_optimize(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let event = state.governor.parallelism().optimize_parallelism();
    info!(reason = %event.reason, "Parallelism optimization triggered via API");
    Json(event)
}

async fn skip_statistics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.governor.skips().get_skip_statistics())
}

async fn skip_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Json(state.governor.skips().get_skip_history(limit))
}

async fn skip_report(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FormatQuery>,
) -> ApiResult<Response> {
    let report = state.governor.skips().generate_skip_report();
    if wants_text(&query)? {
        Ok(text_response(report.to_string()))
    } else {
        Ok(Json(report).into_response())
    }
}

async fn skip_optimize(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.governor.skips().optimize_skip_conditions())
}

async fn summary(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FormatQuery>,
) -> ApiResult<Response> {
    let summary = state.governor.telemetry().generate_summary();
    if wants_text(&query)? {
        Ok(text_response(summary.to_string()))
    } else {
        Ok(Json(summary).into_response())
    }
}

async fn export(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FormatQuery>,
) -> ApiResult<Json<ExportResponse>> {
    let format: ExportFormat = query
        .format
        .as_deref()
        .unwrap_or("json")
        .parse()
        .map_err(|e: GovernorError| ApiError::BadRequest(e.to_string()))?;

    let path = state.governor.export_metrics(format).await.map_err(|e| {
        warn!(error = %e, format = format.as_str(), "Metrics export failed");
        ApiError::from(e)
    })?;

    Ok(Json(ExportResponse {
        format: format.as_str().to_string(),
        path: path.display().to_string(),
        records: state.governor.telemetry().len(),
    }))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let v1 = Router::new()
        .route("/status", get(status))
        .route("/pool", get(pool_metrics))
        .route("/pool/history", get(pool_history))
        .route("/pool/optimize", post(pool_optimize))
        .route("/parallelism", get(parallelism_metrics))
        .route("/parallelism/history", get(parallelism_history))
        .route("/parallelism/optimize", post(parallelism_optimize))
        .route("/skips", get(skip_statistics))
        .route("/skips/history", get(skip_history))
        .route("/skips/report", get(skip_report))
        .route("/skips/optimize", post(skip_optimize))
        .route("/summary", get(summary))
        .route("/export", post(export));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .nest("/api/v1", v1)
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
