use super::handlers;
use super::state::AppState;
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Session lifecycle
        .route("/sessions", post(handlers::create_session))
        .route("/sessions/:session_id", delete(handlers::delete_session))
        .route("/sessions/:session_id/start", post(handlers::start_session))
        // Session queries
        .route(
            "/sessions/:session_id/status",
            get(handlers::get_session_status),
        )
        .route(
            "/sessions/:session_id/recording",
            get(handlers::get_session_recording),
        )
        // Browser front ends run on another origin
        .layer(CorsLayer::permissive())
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
