pub mod backups;
pub mod health;

use crate::state::AppState;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api/backups", backups::router())
        .nest("/api/health", health::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_state;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn call(state: &Arc<AppState>, method: &str, uri: &str) -> anyhow::Result<(StatusCode, serde_json::Value)> {
        let request = Request::builder().method(method).uri(uri).body(Body::empty())?;
        let response = create_router(state.clone()).oneshot(request).await?;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, json))
    }

    #[tokio::test]
    async fn test_create_list_and_delete_over_http() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let state = test_state(&dir)?;

        let (status, created) = call(&state, "POST", "/api/backups").await?;
        assert_eq!(status, StatusCode::CREATED);
        let name = created["name"].as_str().unwrap_or_default().to_string();
        assert_eq!(created["kind"], "manual");

        let (status, listed) = call(&state, "GET", "/api/backups").await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().map(Vec::len), Some(1));

        let (status, op) = call(&state, "GET", "/api/backups/state").await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(op["isBusy"], false);
        assert_eq!(op["lastSuccess"], true);

        let (status, _) = call(&state, "DELETE", &format!("/api/backups/{name}")).await?;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = call(&state, "DELETE", &format!("/api/backups/{name}")).await?;
        assert_eq!(status, StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn test_bad_name_and_bad_upload() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let state = test_state(&dir)?;

        let (status, body) = call(&state, "DELETE", "/api/backups/notes.txt").await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap_or_default().contains("Invalid backup name"));

        let request = Request::builder()
            .method("POST")
            .uri("/api/backups/upload")
            .body(Body::from("definitely not a zip"))?;
        let response = create_router(state.clone()).oneshot(request).await?;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        Ok(())
    }

    #[tokio::test]
    async fn test_restart_required_is_reported_and_enforced() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let state = test_state(&dir)?;

        let (_, health) = call(&state, "GET", "/api/health").await?;
        assert_eq!(health["restartRequired"], false);

        state.backups.restart_gate().mark_required()?;
        let (_, health) = call(&state, "GET", "/api/health").await?;
        assert_eq!(health["restartRequired"], true);

        let (status, body) = call(&state, "POST", "/api/backups").await?;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], backup_engine::RESTART_REQUIRED_MESSAGE);
        Ok(())
    }
}
