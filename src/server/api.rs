use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::warn;

use super::hub::BroadcastHub;
use super::ws::Keepalive;
use crate::board::Board;
use crate::errors::SyncError;
use crate::snapshot::{Snapshot, load_snapshot};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub hub: Arc<BroadcastHub>,
    pub tasks_path: PathBuf,
    pub keepalive: Keepalive,
}

pub type SharedState = Arc<AppState>;

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound { path: PathBuf },
    Internal { path: PathBuf, details: String },
}

impl ApiError {
    fn from_sync(err: SyncError, tasks_path: &Path) -> Self {
        match err.into_fetch_error() {
            SyncError::InitialFetchNotFound { path } => ApiError::NotFound { path },
            SyncError::InitialFetchFailed { path, reason } => ApiError::Internal {
                path,
                details: reason,
            },
            other => ApiError::Internal {
                path: tasks_path.to_path_buf(),
                details: other.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound { path } => (
                StatusCode::NOT_FOUND,
                serde_json::json!({
                    "error": "Tasks file not found",
                    "path": path.display().to_string(),
                }),
            ),
            ApiError::Internal { path, details } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({
                    "error": "Failed to read tasks file",
                    "path": path.display().to_string(),
                    "details": details,
                }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/tasks", get(get_tasks))
        .route("/api/board", get(get_board))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn read_tasks(path: PathBuf) -> Result<Snapshot, ApiError> {
    let fallback = path.clone();
    tokio::task::spawn_blocking(move || load_snapshot(&path).map_err(|e| ApiError::from_sync(e, &path)))
        .await
        .map_err(|e| ApiError::Internal {
            path: fallback,
            details: e.to_string(),
        })?
}

/// Initial fetch: the tasks file as it is on disk right now.
async fn get_tasks(State(state): State<SharedState>) -> Result<Json<Snapshot>, ApiError> {
    let snapshot = read_tasks(state.tasks_path.clone()).await?;
    Ok(Json(snapshot))
}

/// Board view of the latest published snapshot, or of the file when
/// nothing has been published yet.
async fn get_board(State(state): State<SharedState>) -> Json<Board> {
    if let Some(current) = state.hub.current() {
        return Json(Board::from_snapshot(&current));
    }
    let snapshot = match read_tasks(state.tasks_path.clone()).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(error = ?e, "board requested before tasks file was readable");
            Snapshot::empty()
        }
    };
    Json(Board::from_snapshot(&snapshot))
}

// ── Tests ─────────────────────────────────────────────────────────────
