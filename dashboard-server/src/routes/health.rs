use crate::state::AppState;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(health))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let operation = state.backups.operation_state();
    Json(json!({
        "status": "ok",
        "version": state.config.app_version,
        "restartRequired": state.backups.restart_gate().is_restart_required(),
        "maintenance": operation.operation.as_str(),
    }))
}
