//! Question bank and topic catalog handlers.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use super::super::error::{ApiError, ApiResult};
use super::super::AppState;
use crate::db::QuestionFilter;
use crate::error::ExamError;
use crate::extract::label_stored_questions;
use crate::pipeline::labeller::LabelReport;
use crate::types::{Question, TopicLabel};

/// Subject filter parameters.
#[derive(Debug, Deserialize)]
pub struct SubjectParams {
    pub subject: Option<String>,
}

/// Body of `POST /api/topics/label`.
#[derive(Debug, Deserialize)]
pub struct LabelRequest {
    #[serde(default)]
    pub subject: String,
}

/// `GET /api/questions?subject&banding&level&topic&paper_name`
pub async fn list_questions(
    State(state): State<AppState>,
    Query(filter): Query<QuestionFilter>,
) -> ApiResult<Json<Vec<Question>>> {
    Ok(Json(state.deps.db.list_questions(filter).await?))
}

/// `GET /api/topics?subject`
pub async fn list_topics(
    State(state): State<AppState>,
    Query(params): Query<SubjectParams>,
) -> ApiResult<Json<Vec<TopicLabel>>> {
    let subject = params.subject.filter(|s| !s.trim().is_empty());
    Ok(Json(state.deps.db.list_topics(subject.as_deref()).await?))
}

/// `POST /api/topics`
pub async fn add_topic(
    State(state): State<AppState>,
    Json(topic): Json<TopicLabel>,
) -> ApiResult<(StatusCode, Json<TopicLabel>)> {
    let stored = state.deps.db.upsert_topic(topic).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

/// `POST /api/topics/label`: label stored questions that have no topic.
pub async fn label_topics(
    State(state): State<AppState>,
    Json(req): Json<LabelRequest>,
) -> ApiResult<Json<LabelReport>> {
    if req.subject.trim().is_empty() {
        return Err(ExamError::MissingFields(vec!["subject".into()]).into());
    }
    let Some(ref embedder) = state.deps.embedder else {
        return Err(ApiError::Unavailable(
            "no embedding provider is configured".into(),
        ));
    };
    let report = label_stored_questions(
        &state.deps.db,
        embedder.as_ref(),
        &req.subject,
        &state.config.label_retry,
    )
    .await?;
    Ok(Json(report))
}
