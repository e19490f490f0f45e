//! John DAO server: the scheduled glue functions and their status endpoints.

pub mod background;
pub mod config;
pub mod jobs;
pub mod twitter;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use johndao_db::{last_job_run, DbPool};
use serde_json::{json, Value};
use thiserror::Error;
use tower_http::trace::TraceLayer;

/// Names of the scheduled jobs.
pub const JOB_BACKUP_USERS: &str = "backup_users";
pub const JOB_SCHEDULE_TWEET: &str = "schedule_tweet";

/// Application state shared across request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
}

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Handler for `GET /jobs/{job}`: the most recent run of a scheduled job.
async fn last_run_handler(
    State(state): State<AppState>,
    Path(job): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let name = job.clone();
    let run = tokio::task::spawn_blocking(move || {
        let conn = state
            .pool
            .get()
            .map_err(|e| ApiError::InternalServerError(format!("db connection failed: {e}")))?;
        last_job_run(&conn, &name).map_err(|e| ApiError::InternalServerError(e.to_string()))
    })
    .await
    .map_err(|e| ApiError::InternalServerError(e.to_string()))??;

    let run = run.ok_or_else(|| ApiError::NotFound(format!("no recorded run of {job}")))?;
    Ok(Json(json!({
        "job": run.job,
        "startedAt": run.started_at.to_rfc3339(),
        "finishedAt": run.finished_at.to_rfc3339(),
        "success": run.success,
        "detail": run.detail,
    })))
}

/// Builds the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/jobs/{job}", get(last_run_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
