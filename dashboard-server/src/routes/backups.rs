use crate::error::AppError;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use backup_engine::{ArchiveDescriptor, CredentialRestoreReport, OperationState, RESTART_REQUIRED_MESSAGE};
use futures_util::TryStreamExt;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::io::{StreamReader, SyncIoBridge};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_backups).post(create_backup).delete(purge_backups))
        .route("/state", get(operation_state))
        // Size is enforced by the engine's counted copy.
        .route("/upload", post(upload_backup).layer(DefaultBodyLimit::disable()))
        .route("/{name}", axum::routing::delete(delete_backup))
        .route("/{name}/restore", post(restore_backup))
}

async fn list_backups(State(state): State<Arc<AppState>>) -> Result<Json<Vec<ArchiveDescriptor>>, AppError> {
    Ok(Json(state.backups.list_backups().await?))
}

async fn create_backup(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<ArchiveDescriptor>), AppError> {
    let created = state.backups.create_backup(&state.config.app_version).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn upload_backup(
    State(state): State<Arc<AppState>>,
    body: Body,
) -> Result<(StatusCode, Json<ArchiveDescriptor>), AppError> {
    let stream = body.into_data_stream().map_err(std::io::Error::other);
    let reader = SyncIoBridge::new(StreamReader::new(stream));
    let uploaded = state
        .backups
        .import_backup(reader, &state.config.app_version)
        .await?;
    Ok((StatusCode::CREATED, Json(uploaded)))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PurgeResponse {
    deleted: usize,
}

async fn purge_backups(State(state): State<Arc<AppState>>) -> Result<Json<PurgeResponse>, AppError> {
    let deleted = state.backups.purge_backups().await?;
    Ok(Json(PurgeResponse { deleted }))
}

async fn delete_backup(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<StatusCode, AppError> {
    state.backups.delete_backup(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RestoreResponse {
    #[serde(flatten)]
    report: CredentialRestoreReport,
    restart_required: bool,
    message: &'static str,
}

async fn restore_backup(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<RestoreResponse>, AppError> {
    let report = state
        .backups
        .restore_backup(&name, &state.config.app_version)
        .await?;
    Ok(Json(RestoreResponse {
        report,
        restart_required: true,
        message: RESTART_REQUIRED_MESSAGE,
    }))
}

async fn operation_state(State(state): State<Arc<AppState>>) -> Json<OperationState> {
    Json(state.backups.operation_state())
}
