use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::compose::{is_digest_name, list_digests, read_digest, DigestFile};
use crate::pipeline::{ControlError, ControllerStatus, PipelineController, RunReport, StartError};
use crate::store::PipelineRun;
use crate::trends::{HistoryPoint, TrendAggregator, TrendSummary};

const DEFAULT_RUN_TYPE: &str = "full";

#[derive(Clone)]
pub struct AppState {
    controller: PipelineController,
    trends: Arc<TrendAggregator>,
}

impl AppState {
    pub fn new(controller: PipelineController) -> Self {
        let p = controller.pipeline();
        let trends = Arc::new(TrendAggregator::new(p.store.clone(), p.catalog.clone()));
        Self { controller, trends }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/pipeline/run", post(start_run))
        .route("/pipeline/pause", post(pause_run))
        .route("/pipeline/resume", post(resume_run))
        .route("/pipeline/cancel", post(cancel_run))
        .route("/pipeline/status", get(run_status))
        .route("/pipeline/runs", get(list_runs))
        .route("/trends", get(trend_summary))
        .route("/trends/{key}/history", get(trend_history))
        .route("/digests", get(digest_archive))
        .route("/digests/{file}/preview", get(digest_preview))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Store failures surface as 500 with the error chain in the body.
struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(error = %format!("{:#}", self.0), "api request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("{:#}", self.0) })),
        )
            .into_response()
    }
}

fn conflict(msg: impl ToString) -> Response {
    (StatusCode::CONFLICT, Json(json!({ "error": msg.to_string() }))).into_response()
}

#[derive(Deserialize)]
struct RunParams {
    #[serde(default)]
    run_type: Option<String>,
}

async fn start_run(State(state): State<AppState>, Query(q): Query<RunParams>) -> Response {
    let run_type = q
        .run_type
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_RUN_TYPE.to_string());
    match state.controller.start(&run_type) {
        Ok(_) => (
            StatusCode::ACCEPTED,
            Json(json!({ "status": "started", "run_type": run_type })),
        )
            .into_response(),
        Err(e @ StartError::AlreadyRunning) => conflict(e),
    }
}

fn control_response(res: Result<(), ControlError>, done: &str) -> Response {
    match res {
        Ok(()) => Json(json!({ "status": done })).into_response(),
        Err(e) => conflict(e),
    }
}

async fn pause_run(State(state): State<AppState>) -> Response {
    control_response(state.controller.pause(), "paused")
}

async fn resume_run(State(state): State<AppState>) -> Response {
    control_response(state.controller.resume(), "resumed")
}

async fn cancel_run(State(state): State<AppState>) -> Response {
    control_response(state.controller.cancel(), "cancelling")
}

#[derive(Serialize)]
struct StatusResp {
    #[serde(flatten)]
    status: ControllerStatus,
    last_report: Option<RunReport>,
}

async fn run_status(State(state): State<AppState>) -> Json<StatusResp> {
    Json(StatusResp {
        status: state.controller.status(),
        last_report: state.controller.last_report(),
    })
}

#[derive(Deserialize)]
struct LimitParams {
    limit: Option<usize>,
}

async fn list_runs(
    State(state): State<AppState>,
    Query(q): Query<LimitParams>,
) -> Result<Json<Vec<PipelineRun>>, ApiError> {
    let limit = q.limit.unwrap_or(20).clamp(1, 200);
    let runs = state.controller.pipeline().store.runs(limit).await?;
    Ok(Json(runs))
}

async fn trend_summary(
    State(state): State<AppState>,
    Query(q): Query<LimitParams>,
) -> Result<Json<TrendSummary>, ApiError> {
    let limit = q.limit.unwrap_or(50).clamp(1, 500);
    Ok(Json(state.trends.trend_summary(limit).await?))
}

#[derive(Deserialize)]
struct HistoryParams {
    weeks: Option<usize>,
}

#[derive(Serialize)]
struct HistoryResp {
    key: String,
    points: Vec<HistoryPoint>,
}

async fn trend_history(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(q): Query<HistoryParams>,
) -> Result<Json<HistoryResp>, ApiError> {
    let weeks = q.weeks.unwrap_or(12).clamp(1, 104);
    let points = state.trends.trend_history(&key, weeks).await?;
    Ok(Json(HistoryResp { key, points }))
}

async fn digest_archive(State(state): State<AppState>) -> Result<Json<Vec<DigestFile>>, ApiError> {
    Ok(Json(list_digests(&state.controller.pipeline().digest_dir).await?))
}

async fn digest_preview(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> Result<Response, ApiError> {
    if !is_digest_name(&file) {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid digest name" })),
        )
            .into_response());
    }
    let dir = &state.controller.pipeline().digest_dir;
    Ok(match read_digest(dir, &file).await? {
        Some(html) => Html(html).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("digest '{file}' not found") })),
        )
            .into_response(),
    })
}
