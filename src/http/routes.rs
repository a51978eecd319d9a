use super::handlers;
use super::state::AppState;
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Conversation lifecycle
        .route("/conversations", post(handlers::create_conversation))
        .route(
            "/conversations/:conversation_id/stop",
            post(handlers::stop_conversation),
        )
        // Roster
        .route(
            "/conversations/:conversation_id/participants",
            post(handlers::add_participant),
        )
        .route(
            "/conversations/:conversation_id/participants/:user_id",
            delete(handlers::remove_participant),
        )
        // Conversation queries
        .route(
            "/conversations/:conversation_id/status",
            get(handlers::get_conversation_status),
        )
        .route(
            "/conversations/:conversation_id/transcript",
            get(handlers::get_conversation_transcript),
        )
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
