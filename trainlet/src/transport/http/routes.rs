//! HTTP route handlers.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::notebook::{Cell, CellType, TrainingRun};
use crate::service::{ExecuteOutcome, NotebookService, ServiceError};
use crate::version::VersionInfo;

impl IntoResponse for ServiceError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize)]
struct HealthCheckResponse {
    status: &'static str,
    active_sessions: usize,
    version: VersionInfo,
}

#[derive(Debug, Deserialize)]
struct CreateRunRequest {
    session_name: String,
    working_directory: PathBuf,
}

#[derive(Debug, Deserialize)]
struct AddCellRequest {
    #[serde(rename = "type")]
    cell_type: CellType,
}

#[derive(Debug, Serialize)]
struct CellsResponse {
    cells: Vec<Cell>,
}

#[derive(Debug, Deserialize)]
struct UpdateCellRequest {
    new_code: String,
}

#[derive(Debug, Deserialize)]
struct RejectCellRequest {
    reason: String,
}

#[derive(Debug, Serialize)]
struct CleanupResponse {
    stopped: bool,
}

async fn health_check(State(service): State<Arc<NotebookService>>) -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "READY",
        active_sessions: service.registry().active(),
        version: VersionInfo::new(),
    })
}

async fn create_run(
    State(service): State<Arc<NotebookService>>,
    Json(request): Json<CreateRunRequest>,
) -> Result<(StatusCode, Json<TrainingRun>), ServiceError> {
    let run = service
        .create_run(&request.session_name, request.working_directory)
        .await?;
    Ok((StatusCode::CREATED, Json(run)))
}

async fn add_cell(
    State(service): State<Arc<NotebookService>>,
    Path(run_id): Path<String>,
    Json(request): Json<AddCellRequest>,
) -> Result<(StatusCode, Json<Cell>), ServiceError> {
    let cell = service.add_cell(&run_id, request.cell_type).await?;
    Ok((StatusCode::CREATED, Json(cell)))
}

async fn list_cells(
    State(service): State<Arc<NotebookService>>,
    Path(run_id): Path<String>,
) -> Result<Json<CellsResponse>, ServiceError> {
    let cells = service.list_cells(&run_id).await?;
    Ok(Json(CellsResponse { cells }))
}

async fn update_cell(
    State(service): State<Arc<NotebookService>>,
    Path((run_id, cell_id)): Path<(String, Uuid)>,
    Json(request): Json<UpdateCellRequest>,
) -> Result<Json<Cell>, ServiceError> {
    let cell = service
        .update_cell(&run_id, cell_id, request.new_code)
        .await?;
    Ok(Json(cell))
}

async fn approve_cell(
    State(service): State<Arc<NotebookService>>,
    Path((run_id, cell_id)): Path<(String, Uuid)>,
) -> Result<Json<Cell>, ServiceError> {
    let cell = service.approve_cell(&run_id, cell_id).await?;
    Ok(Json(cell))
}

async fn reject_cell(
    State(service): State<Arc<NotebookService>>,
    Path((run_id, cell_id)): Path<(String, Uuid)>,
    Json(request): Json<RejectCellRequest>,
) -> Result<Json<Cell>, ServiceError> {
    let cell = service
        .reject_cell(&run_id, cell_id, &request.reason)
        .await?;
    Ok(Json(cell))
}

async fn delete_cell(
    State(service): State<Arc<NotebookService>>,
    Path((run_id, cell_id)): Path<(String, Uuid)>,
) -> Result<StatusCode, ServiceError> {
    service.delete_cell(&run_id, cell_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn execute_cell(
    State(service): State<Arc<NotebookService>>,
    Path((run_id, cell_id)): Path<(String, Uuid)>,
) -> Result<Json<ExecuteOutcome>, ServiceError> {
    let outcome = service.execute_cell(&run_id, cell_id).await?;
    Ok(Json(outcome))
}

async fn cleanup_session(
    State(service): State<Arc<NotebookService>>,
    Path(run_id): Path<String>,
) -> Json<CleanupResponse> {
    let stopped = service.cleanup_session(&run_id).await;
    Json(CleanupResponse { stopped })
}

pub fn routes(service: Arc<NotebookService>) -> Router {
    Router::new()
        .route("/health-check", get(health_check))
        .route("/runs", post(create_run))
        .route("/runs/{run_id}/cells", post(add_cell).get(list_cells))
        .route(
            "/runs/{run_id}/cells/{cell_id}",
            put(update_cell).delete(delete_cell),
        )
        .route("/runs/{run_id}/cells/{cell_id}/approve", post(approve_cell))
        .route("/runs/{run_id}/cells/{cell_id}/reject", post(reject_cell))
        .route("/runs/{run_id}/cells/{cell_id}/execute", post(execute_cell))
        .route("/runs/{run_id}/session/cleanup", post(cleanup_session))
        .with_state(service)
}
