//! Mapping of library errors onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::error::ExamError;

/// Error returned by every API handler.
#[derive(Debug)]
pub enum ApiError {
    Exam(ExamError),
    /// Malformed request that never reached the library.
    BadRequest(String),
    /// A collaborator the endpoint needs is not configured.
    Unavailable(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<ExamError> for ApiError {
    fn from(e: ExamError) -> Self {
        ApiError::Exam(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Exam(ExamError::MissingFields(fields)) => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": format!("Missing required fields: {}", fields.join(", ")),
                    "missing_fields": fields,
                }),
            ),
            ApiError::Exam(e @ ExamError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, json!({ "error": e.to_string() }))
            }
            ApiError::Exam(
                e @ (ExamError::NotAPdf { .. }
                | ExamError::CorruptPdf { .. }
                | ExamError::PasswordRequired { .. }
                | ExamError::EmptyPdf { .. }
                | ExamError::InvalidConfig(_)),
            ) => (StatusCode::BAD_REQUEST, json!({ "error": e.to_string() })),
            ApiError::Exam(e) => {
                error!("Request failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": e.to_string() }),
                )
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, json!({ "error": msg }))
            }
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        let missing = ApiError::from(ExamError::MissingFields(vec!["subject".into()]));
        assert_eq!(missing.into_response().status(), StatusCode::BAD_REQUEST);

        let not_found = ApiError::from(ExamError::NotFound {
            entity: "quiz",
            id: "3".into(),
        });
        assert_eq!(not_found.into_response().status(), StatusCode::NOT_FOUND);

        let internal = ApiError::from(ExamError::Database("locked".into()));
        assert_eq!(
            internal.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
