//! Session admin handlers

use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use happy_session::SessionError;
use happy_types::{KilledSession, SessionListing};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    sessions: Vec<SessionListing>,
}

#[derive(Debug, Serialize)]
pub struct KillAllResponse {
    killed: Vec<KilledSession>,
}

pub async fn list(State(state): State<AppState>) -> Json<SessionListResponse> {
    let sessions = state.registry.list_all().await;
    Json(SessionListResponse { sessions })
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    match state.registry.delete_by_id(&id).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(SessionError::NotFound(_)) => Err(StatusCode::NOT_FOUND),
        Err(SessionError::ShuttingDown) => Err(StatusCode::SERVICE_UNAVAILABLE),
        Err(e) => {
            tracing::error!("Failed to delete session {}: {}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn kill_all(State(state): State<AppState>) -> Json<KillAllResponse> {
    let killed = state.registry.kill_all().await;
    Json(KillAllResponse { killed })
}

#[cfg(test)]
mod tests {
    use crate::{router, AppState};
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use happy_session::backend::memory::MemoryBackend;
    use happy_session::{RegistryConfig, SessionRegistry, StateStore};
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn setup(dir: &std::path::Path) -> (SessionRegistry, MemoryBackend) {
        let backend = MemoryBackend::new();
        let registry = SessionRegistry::new(
            Arc::new(backend.clone()),
            StateStore::in_dir(dir),
            RegistryConfig::default(),
        );
        registry.init().await;
        (registry, backend)
    }

    async fn call(registry: &SessionRegistry, method: Method, uri: &str) -> (StatusCode, Value) {
        let app = router(AppState::new(registry.clone()));
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_list_sessions() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (registry, _backend) = setup(temp_dir.path()).await;
        let record = registry.resolve(None, None, false).await.unwrap();

        let (status, json) = call(&registry, Method::GET, "/api/sessions").await;
        assert_eq!(status, StatusCode::OK);
        let sessions = json["sessions"].as_array().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0]["id"], record.id());
        assert_eq!(sessions[0]["status"], "detached");
    }

    #[tokio::test]
    async fn test_delete_session() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (registry, backend) = setup(temp_dir.path()).await;
        let record = registry.resolve(None, None, false).await.unwrap();

        let uri = format!("/api/sessions/{}", record.id());
        let (status, _) = call(&registry, Method::DELETE, &uri).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(backend.last().unwrap().is_killed());

        let (status, _) = call(&registry, Method::DELETE, &uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_after_shutdown_is_refused() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (registry, _backend) = setup(temp_dir.path()).await;
        let record = registry.resolve(None, None, false).await.unwrap();
        registry.shutdown().await;

        let uri = format!("/api/sessions/{}", record.id());
        let (status, _) = call(&registry, Method::DELETE, &uri).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (_, json) = call(&registry, Method::GET, "/api/sessions").await;
        assert_eq!(json["sessions"][0]["status"], "saved");
    }

    #[tokio::test]
    async fn test_kill_all() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (registry, backend) = setup(temp_dir.path()).await;
        registry.resolve(None, None, false).await.unwrap();
        registry.resolve(None, None, false).await.unwrap();

        let (status, json) = call(&registry, Method::POST, "/api/sessions/kill-all").await;
        assert_eq!(status, StatusCode::OK);
        let killed = json["killed"].as_array().unwrap();
        assert_eq!(killed.len(), 2);
        assert!(killed.iter().all(|k| k["pid"].is_u64()));
        assert!(backend.processes().iter().all(|p| p.is_killed()));
        assert!(registry.list_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_health() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (registry, _backend) = setup(temp_dir.path()).await;
        let (status, json) = call(&registry, Method::GET, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }
}
