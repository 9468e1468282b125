use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use common::{
    EnqueueBatchRequest, EnqueueBatchResponse, EnqueueRequest, EnqueueResponse, QueueSnapshot,
    TaskStatusView, WorkerSummary,
};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::SchedulerError;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/tasks", post(enqueue_task))
        .route("/api/v1/tasks/batch", post(enqueue_batch))
        .route("/api/v1/tasks/:id", get(get_task_status))
        .route("/api/v1/workers", get(list_workers))
        .route("/api/v1/stats", get(stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn internal(e: SchedulerError) -> StatusCode {
    warn!("error del almacén: {}", e);
    StatusCode::INTERNAL_SERVER_ERROR
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

// Encola una URL semilla
async fn enqueue_task(
    State(state): State<AppState>,
    Json(req): Json<EnqueueRequest>,
) -> Result<Json<EnqueueResponse>, StatusCode> {
    if req.url.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let task_id = state
        .manager
        .enqueue(&req.url, req.options)
        .await
        .map_err(internal)?;

    Ok(Json(EnqueueResponse { task_id }))
}

// Encola varias URLs con las mismas opciones
async fn enqueue_batch(
    State(state): State<AppState>,
    Json(req): Json<EnqueueBatchRequest>,
) -> Result<Json<EnqueueBatchResponse>, StatusCode> {
    if req.urls.is_empty() || req.urls.iter().any(|u| u.trim().is_empty()) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let task_ids = state
        .manager
        .enqueue_batch(&req.urls, req.options)
        .await
        .map_err(internal)?;

    info!("lote recibido por HTTP: {} tareas", task_ids.len());
    Ok(Json(EnqueueBatchResponse { task_ids }))
}

async fn get_task_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskStatusView>, StatusCode> {
    match state.manager.status(&id).await.map_err(internal)? {
        Some(view) => Ok(Json(view)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

async fn list_workers(
    State(state): State<AppState>,
) -> Result<Json<Vec<WorkerSummary>>, StatusCode> {
    let workers = state.manager.list_workers().await.map_err(internal)?;
    Ok(Json(workers))
}

async fn stats(State(state): State<AppState>) -> Result<Json<QueueSnapshot>, StatusCode> {
    let snap = state.manager.snapshot().await.map_err(internal)?;
    Ok(Json(snap))
}
