//! Router configuration for the HTTP API.

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::handlers;
use super::AppState;

/// Upper bound on an uploaded paper.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // Papers
        .route("/api/papers", post(handlers::upload_paper))
        .route("/api/papers/:paper_key/extract", post(handlers::extract_paper))
        // Question bank and topic catalog
        .route("/api/questions", get(handlers::list_questions))
        .route(
            "/api/topics",
            get(handlers::list_topics).post(handlers::add_topic),
        )
        .route("/api/topics/label", post(handlers::label_topics))
        // Quizzes
        .route("/api/quizzes", post(handlers::create_quiz))
        .route("/api/quizzes/:id", get(handlers::get_quiz))
        .route("/api/quizzes/:id/answers", post(handlers::submit_answer))
        .route("/api/quizzes/:id/analytics", get(handlers::quiz_analytics))
        // Blobs
        .route("/files/*key", get(handlers::serve_file))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
