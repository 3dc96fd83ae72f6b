//! HTTP API for background lesson generation.
//!
//! Clients submit a request, then poll the job until it is terminal and
//! fetch a preview or a zip of the result.
//!
//! # Endpoints
//!
//! - `POST /api/lessons` - Submit a generation request
//! - `GET /api/lessons` - List jobs, newest first
//! - `GET /api/lessons/:id` - Job status, progress and result
//! - `GET /api/lessons/:id/preview` - File listing and README of a completed job
//! - `GET /api/lessons/:id/download` - Zip archive of a completed job
//! - `POST /api/lessons/:id/cancel` - Request cancellation
//! - `DELETE /api/lessons/:id` - Delete a finished job and its output
//! - `GET /api/health` - Liveness
//!
//! # Example
//!
//! ```no_run
//! use lesson_orchestrator::{create_router, AppState, Config};
//!
//! # async fn example() {
//! let router = create_router(AppState::new(Config::default()));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await.unwrap();
//! axum::serve(listener, router).await.unwrap();
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::{
    Config, GenerationRequest, Job, JobProgress, JobResult, JobStatus, LessonError,
    LessonPreview, TaskManager,
};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Response body for a submitted request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLessonResponse {
    /// Identifier to poll.
    pub lesson_id: String,
    /// Always `pending`.
    pub status: JobStatus,
    /// Human-readable note.
    pub message: String,
}

/// Full state of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonStatusResponse {
    /// Job identifier.
    pub lesson_id: String,
    /// Current status.
    pub status: JobStatus,
    /// Current progress.
    pub progress: JobProgress,
    /// Requested topics.
    pub topics: Vec<String>,
    /// Whether cancellation was requested.
    pub cancel_requested: bool,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job last changed.
    pub updated_at: DateTime<Utc>,
    /// When processing started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Result of a completed job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    /// Error of a failed job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Job> for LessonStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            lesson_id: job.id,
            status: job.status,
            progress: job.progress,
            topics: job.topics,
            cancel_requested: job.cancel_requested,
            created_at: job.created_at,
            updated_at: job.updated_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            result: job.result,
            error: job.error,
        }
    }
}

/// One entry of the job listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonSummary {
    /// Job identifier.
    pub lesson_id: String,
    /// Current status.
    pub status: JobStatus,
    /// Completion percentage.
    pub percent: u8,
    /// Requested topics.
    pub topics: Vec<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
}

/// Response body for the job listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonListResponse {
    /// Jobs, newest first.
    pub lessons: Vec<LessonSummary>,
    /// Number of entries returned.
    pub total: usize,
}

/// Query parameters for the job listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    /// Only jobs with this status.
    pub status: Option<String>,
    /// Maximum number of jobs, 50 by default.
    pub limit: Option<usize>,
}

/// Response body for a deleted job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteLessonResponse {
    /// Job identifier.
    pub lesson_id: String,
    /// Always `true`.
    pub deleted: bool,
    /// Output paths that were removed.
    pub removed_paths: Vec<PathBuf>,
}

/// Response body for the health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `ok`.
    pub status: String,
    /// Crate version.
    pub version: String,
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for the HTTP server.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Job registry and runner.
    pub manager: TaskManager,
}

impl AppState {
    /// Creates state with a fresh task manager.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            manager: TaskManager::new(config),
        }
    }

    /// Creates state around an existing task manager.
    #[must_use]
    pub const fn with_manager(manager: TaskManager) -> Self {
        Self { manager }
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Internal error type for API handlers.
#[derive(Debug)]
enum ApiError {
    /// The request was rejected before a job was created.
    Validation(String),
    /// No job with this id.
    NotFound(String),
    /// The job is not in a state that allows this operation.
    Conflict(String),
    /// Anything else.
    Internal(String),
}

impl From<LessonError> for ApiError {
    fn from(err: LessonError) -> Self {
        match err {
            LessonError::JobNotFound { .. } => Self::NotFound(err.to_string()),
            LessonError::JobNotTerminal { .. }
            | LessonError::JobNotCompleted { .. }
            | LessonError::JobAlreadyFinished { .. } => Self::Conflict(err.to_string()),
            e if e.is_validation() => Self::Validation(e.to_string()),
            e => Self::Internal(e.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with all API endpoints.
///
/// Routes live under `/api`, with permissive CORS and request tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/lessons", post(handle_create).get(handle_list))
        .route("/lessons/:id", get(handle_status).delete(handle_delete))
        .route("/lessons/:id/preview", get(handle_preview))
        .route("/lessons/:id/download", get(handle_download))
        .route("/lessons/:id/cancel", post(handle_cancel))
        .route("/health", get(handle_health));

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for `POST /api/lessons`.
async fn handle_create(
    State(state): State<Arc<AppState>>,
    body: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateLessonResponse>), ApiError> {
    let Json(request) = body?;
    info!(
        topics = ?request.topics,
        modules = request.modules,
        ai = request.ai,
        "Received lesson generation request"
    );

    let job = state.manager.submit(request).await.map_err(|e| {
        warn!(error = %e, "Lesson generation request rejected");
        ApiError::from(e)
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateLessonResponse {
            message: format!(
                "Generating {} topic(s); poll /api/lessons/{} for progress",
                job.topics.len(),
                job.id
            ),
            lesson_id: job.id,
            status: job.status,
        }),
    ))
}

/// Handler for `GET /api/lessons`.
async fn handle_list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<LessonListResponse>, ApiError> {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(JobStatus::parse(raw).ok_or_else(|| {
            ApiError::Validation(format!(
                "Unknown status '{raw}'; expected pending, processing, completed or failed"
            ))
        })?),
    };

    let lessons: Vec<LessonSummary> = state
        .manager
        .list(status, query.limit)
        .await
        .into_iter()
        .map(|job| LessonSummary {
            lesson_id: job.id,
            status: job.status,
            percent: job.progress.percent,
            topics: job.topics,
            created_at: job.created_at,
        })
        .collect();

    Ok(Json(LessonListResponse {
        total: lessons.len(),
        lessons,
    }))
}

/// Handler for `GET /api/lessons/:id`.
async fn handle_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<LessonStatusResponse>, ApiError> {
    let job = state.manager.status(&id).await?;
    Ok(Json(job.into()))
}

/// Handler for `GET /api/lessons/:id/preview`.
async fn handle_preview(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<LessonPreview>, ApiError> {
    Ok(Json(state.manager.preview(&id).await?))
}

/// Handler for `GET /api/lessons/:id/download`.
async fn handle_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let bytes = state.manager.archive(&id).await?;
    info!(job_id = %id, bytes = bytes.len(), "Serving lesson archive");

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{id}.zip\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// Handler for `POST /api/lessons/:id/cancel`.
async fn handle_cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<LessonStatusResponse>, ApiError> {
    let job = state.manager.cancel(&id).await?;
    Ok(Json(job.into()))
}

/// Handler for `DELETE /api/lessons/:id`.
async fn handle_delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeleteLessonResponse>, ApiError> {
    let removed_paths = state.manager.delete(&id).await?;
    Ok(Json(DeleteLessonResponse {
        lesson_id: id,
        deleted: true,
        removed_paths,
    }))
}

/// Handler for `GET /api/health`.
async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============================================================================
// Tests
// ============================================================================
