//! Blob serving for stores without their own public endpoint.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

use super::super::AppState;

fn content_type(key: &str) -> &'static str {
    match key.rsplit('.').next().map(str::to_ascii_lowercase).as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// `GET /files/*key`
pub async fn serve_file(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    match state.deps.store.get(&key).await {
        Ok(Some(bytes)) => ([(header::CONTENT_TYPE, content_type(&key))], bytes).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "File not found").into_response(),
        Err(e) => {
            tracing::warn!("Failed to serve {}: {}", key, e);
            (StatusCode::NOT_FOUND, "File not found").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::content_type;

    #[test]
    fn content_types_by_extension() {
        assert_eq!(content_type("p/page_1.png"), "image/png");
        assert_eq!(content_type("p/questions.json"), "application/json");
        assert_eq!(content_type("p/"), "application/octet-stream");
    }
}
