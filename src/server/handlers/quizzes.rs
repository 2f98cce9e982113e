//! Quiz folders, answers and analytics.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use super::super::error::ApiResult;
use super::super::AppState;
use crate::quiz;
use crate::types::{AnswerSubmission, AttemptOutcome, Question, QuizAnalytics, QuizFolder};

/// Body of `POST /api/quizzes`.
#[derive(Debug, Deserialize)]
pub struct CreateQuizRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub question_ids: Vec<i64>,
}

/// A quiz folder together with its questions in quiz order.
#[derive(Debug, Serialize)]
pub struct QuizDetail {
    #[serde(flatten)]
    pub quiz: QuizFolder,
    pub questions: Vec<Question>,
}

pub async fn create_quiz(
    State(state): State<AppState>,
    Json(req): Json<CreateQuizRequest>,
) -> ApiResult<(StatusCode, Json<QuizFolder>)> {
    let quiz = state
        .deps
        .db
        .create_quiz(&req.name, &req.subject, req.question_ids)
        .await?;
    Ok((StatusCode::CREATED, Json(quiz)))
}

pub async fn get_quiz(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<QuizDetail>> {
    let quiz = state.deps.db.get_quiz(id).await?;
    let questions = state.deps.db.quiz_questions(id).await?;
    Ok(Json(QuizDetail { quiz, questions }))
}

/// `POST /api/quizzes/:id/answers`
pub async fn submit_answer(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(submission): Json<AnswerSubmission>,
) -> ApiResult<Json<AttemptOutcome>> {
    let outcome = quiz::submit_answer(
        &state.deps.db,
        Some(state.deps.model.as_ref()),
        id,
        &submission,
    )
    .await?;
    Ok(Json(outcome))
}

pub async fn quiz_analytics(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<QuizAnalytics>> {
    Ok(Json(state.deps.db.quiz_analytics(id).await?))
}
