use super::handlers;
use super::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let upload_limit = state.max_upload_bytes;

    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Question tasks
        .route("/transcript/task", post(handlers::create_task))
        .route("/transcript/task/:task_id", get(handlers::get_task_status))
        .route("/transcript/task/:task_id/stream", get(handlers::stream_task))
        // Transcripts
        .route("/transcript/load", post(handlers::load_transcript))
        .route(
            "/transcript/history/:conversation_id",
            get(handlers::get_history),
        )
        // Uploads
        .route(
            "/conversations/upload",
            post(handlers::upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/conversations/processing/:file_hash",
            get(handlers::get_processing_status),
        )
        // Conversation metadata
        .route("/conversations/list", get(handlers::list_conversations))
        .route("/conversations/clear", delete(handlers::clear_all))
        .route(
            "/conversations/:conversation_uuid",
            delete(handlers::delete_conversation),
        )
        .route(
            "/conversations/:conversation_uuid/messages",
            get(handlers::list_messages),
        )
        .route(
            "/conversations/:conversation_uuid/suggestions",
            get(handlers::get_suggestions),
        )
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
