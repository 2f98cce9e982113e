//! Answer submission: grade, record, explain.

use crate::db::Database;
use crate::error::ExamError;
use crate::model::VisionModel;
use crate::prompts::{explanation_user_message, EXPLANATION_PROMPT};
use crate::types::{AnswerSubmission, AttemptOutcome, Question};
use tracing::{info, warn};

/// `true` when `selected` names the question's answer key.
///
/// Compares option letters case-insensitively and ignores surrounding
/// brackets, so `"(b)"` matches a key of `"B"`. A question without an
/// answer key can never be answered correctly.
pub fn is_correct(question: &Question, selected: &str) -> bool {
    let normalise = |s: &str| {
        s.trim()
            .trim_matches(|c: char| c == '(' || c == ')' || c == '.')
            .trim()
            .to_ascii_uppercase()
    };
    match question.answer_key.as_deref() {
        Some(key) if !key.trim().is_empty() => normalise(key) == normalise(selected),
        _ => false,
    }
}

/// Grade a submission, update the question's counters and, for a wrong
/// answer, ask the model for a short explanation.
///
/// A failed explanation call is logged and leaves `explanation` empty; the
/// attempt is recorded either way.
pub async fn submit_answer(
    db: &Database,
    model: Option<&dyn VisionModel>,
    quiz_id: i64,
    submission: &AnswerSubmission,
) -> Result<AttemptOutcome, ExamError> {
    let missing: Vec<String> = [
        ("student", submission.student.as_str()),
        ("selected_option", submission.selected_option.as_str()),
    ]
    .into_iter()
    .filter(|(_, v)| v.trim().is_empty())
    .map(|(k, _)| k.to_string())
    .collect();
    if !missing.is_empty() {
        return Err(ExamError::MissingFields(missing));
    }

    let question = db.get_question(submission.question_id).await?;
    let correct = is_correct(&question, &submission.selected_option);

    db.record_attempt(
        quiz_id,
        submission.question_id,
        submission.student.trim(),
        submission.selected_option.trim(),
        correct,
    )
    .await?;
    info!(
        "Quiz {}: {} answered question {} ({})",
        quiz_id,
        submission.student.trim(),
        submission.question_id,
        if correct { "correct" } else { "wrong" }
    );

    let explanation = match (correct, model, question.answer_key.as_deref()) {
        (false, Some(model), Some(key)) => {
            explain(model, &question, submission.selected_option.trim(), key).await
        }
        _ => None,
    };

    Ok(AttemptOutcome {
        question_id: submission.question_id,
        correct,
        correct_answer: question.answer_key.clone(),
        explanation,
    })
}

async fn explain(
    model: &dyn VisionModel,
    question: &Question,
    selected: &str,
    correct: &str,
) -> Option<String> {
    let options: Vec<(String, String)> = question
        .answer_options
        .iter()
        .map(|o| (o.option.clone(), o.text.render()))
        .collect();
    let user = explanation_user_message(&question.question_text, &options, selected, correct);
    match model.complete(EXPLANATION_PROMPT, &user).await {
        Ok(text) if !text.is_empty() => Some(text),
        Ok(_) => None,
        Err(e) => {
            warn!(
                "No explanation for question {}: {}",
                question.id.unwrap_or_default(),
                e
            );
            None
        }
    }
}
