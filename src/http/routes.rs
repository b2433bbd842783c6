use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Session lifecycle
        .route("/sessions", post(handlers::create_session))
        .route("/sessions/:session_id/join", post(handlers::join_session))
        .route("/sessions/leave", post(handlers::leave_session))
        // Local media controls
        .route("/media", put(handlers::set_media))
        // Read model
        .route("/state", get(handlers::get_state))
        .route("/subtitles", get(handlers::get_subtitles))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
