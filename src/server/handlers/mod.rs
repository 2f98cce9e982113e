//! HTTP request handlers for the API.

mod files;
mod papers;
mod questions;
mod quizzes;

use axum::{response::IntoResponse, Json};
use serde_json::json;

// Re-export handlers for use by the router
pub use files::serve_file;
pub use papers::{extract_paper, upload_paper};
pub use questions::{add_topic, label_topics, list_questions, list_topics};
pub use quizzes::{create_quiz, get_quiz, quiz_analytics, submit_answer};

/// Liveness probe.
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
