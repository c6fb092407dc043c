use crate::config::types::{ExecutionRequest, ExecutionResponse, OutcomeKind};
use crate::server::error::{AppError, AppResult};
use crate::server::AppState;
use crate::store::FileInfo;
use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Instant;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "Code Executor Service", "status": "running" }))
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

/// Executions block on the child, so they run on the blocking pool. The clock
/// starts here, so time queued for a blocking thread is part of the run.
async fn execute(
    State(state): State<AppState>,
    Json(request): Json<ExecutionRequest>,
) -> AppResult<Json<ExecutionResponse>> {
    let accepted = Instant::now();
    let runtime = state.runtime.clone();
    let outcome =
        tokio::task::spawn_blocking(move || runtime.handle_since(request, accepted)).await??;

    if outcome.kind == OutcomeKind::OrchestrationFailure {
        return Err(AppError::Internal(
            outcome.stderr.unwrap_or_else(|| "Execution error".to_string()),
        ));
    }
    Ok(Json(outcome.to_response()))
}

#[derive(Debug, Deserialize)]
pub struct SaveRequest {
    pub code: String,
    pub filename: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileListResponse {
    pub files: Vec<FileInfo>,
    pub count: usize,
}

async fn save_file(
    State(state): State<AppState>,
    Json(request): Json<SaveRequest>,
) -> AppResult<Json<Value>> {
    let store = state.store.clone();
    let filename = request.filename.clone();
    tokio::task::spawn_blocking(move || store.save(&request.filename, &request.code)).await??;
    Ok(Json(
        json!({ "message": "File saved successfully", "filename": filename }),
    ))
}

async fn list_files(State(state): State<AppState>) -> AppResult<Json<FileListResponse>> {
    let store = state.store.clone();
    let files = tokio::task::spawn_blocking(move || store.list()).await??;
    Ok(Json(FileListResponse {
        count: files.len(),
        files,
    }))
}

async fn load_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> AppResult<Json<Value>> {
    let store = state.store.clone();
    let name = filename.clone();
    let code = tokio::task::spawn_blocking(move || store.load(&name)).await??;
    Ok(Json(json!({ "code": code, "filename": filename })))
}

async fn delete_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> AppResult<Json<Value>> {
    let store = state.store.clone();
    let name = filename.clone();
    tokio::task::spawn_blocking(move || store.delete(&name)).await??;
    Ok(Json(
        json!({ "message": "File deleted successfully", "filename": filename }),
    ))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/execute", post(execute))
        .route("/save", post(save_file))
        .route("/files", get(list_files))
        .route("/load/{filename}", get(load_file))
        .route("/delete/{filename}", delete(delete_file))
        .with_state(state)
}
