//! Happy Server
//!
//! Serves persistent terminal sessions over WebSocket, plus a small admin API
//! for listing and killing them.

pub mod config;
pub mod handlers;

use axum::{
    routing::{delete, get, post},
    Router,
};
use happy_session::SessionRegistry;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
}

impl AppState {
    pub fn new(registry: SessionRegistry) -> Self {
        Self { registry }
    }
}

/// Build the HTTP router
pub fn router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health))
        // WebSocket endpoint
        .route("/ws", get(handlers::ws::handler))
        // Admin routes
        .nest("/api", api_routes())
        // Layers
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", get(handlers::sessions::list))
        .route("/sessions/kill-all", post(handlers::sessions::kill_all))
        .route("/sessions/:id", delete(handlers::sessions::delete))
}
