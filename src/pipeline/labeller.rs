//! Topic labelling by embedding similarity.
//!
//! Catalog descriptions are embedded once per batch; every question text is
//! embedded on its own call so one oversized or rejected question cannot
//! fail its neighbours. The nearest catalog entry by cosine similarity
//! becomes the question's `topic_label`.

use crate::error::ExamError;
use crate::model::Embedder;
use crate::retry::RetryPolicy;
use crate::types::{Question, TopicLabel};
use serde::Serialize;
use tracing::{debug, info, warn};

/// `dot(a, b) / (|a| · |b|)`.
///
/// Returns 0.0 for mismatched lengths or a zero-norm vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}

/// Index and score of the most similar catalog vector.
///
/// Ties go to the earliest entry.
pub fn nearest_topic(query: &[f32], catalog: &[Vec<f32>]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, candidate) in catalog.iter().enumerate() {
        let score = cosine_similarity(query, candidate);
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((idx, score)),
        }
    }
    best
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelAssignment {
    pub question_number: u32,
    pub topic: String,
    pub score: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LabelReport {
    pub assigned: Vec<LabelAssignment>,
    /// Question numbers whose embedding kept failing; their topic is untouched.
    pub skipped: Vec<u32>,
}

/// Text embedded for a catalog entry.
fn catalog_text(topic: &TopicLabel) -> String {
    if topic.description.trim().is_empty() {
        format!("{} {}", topic.topic, topic.sub_topic).trim().to_string()
    } else {
        topic.description.clone()
    }
}

/// Label every question with its nearest catalog topic.
///
/// Failing to embed the catalog fails the batch. Failing to embed a single
/// question (after `policy` retries) skips that question.
pub async fn label_questions(
    embedder: &dyn Embedder,
    catalog: &[TopicLabel],
    questions: &mut [Question],
    policy: &RetryPolicy,
) -> Result<LabelReport, ExamError> {
    let mut report = LabelReport::default();
    if catalog.is_empty() || questions.is_empty() {
        warn!(
            "Nothing to label: {} catalog entries, {} questions",
            catalog.len(),
            questions.len()
        );
        return Ok(report);
    }

    let texts: Vec<String> = catalog.iter().map(catalog_text).collect();
    let catalog_vectors = policy
        .run("embed topic catalog", || embedder.embed(&texts))
        .await?;
    if catalog_vectors.len() != catalog.len() {
        return Err(ExamError::EmbeddingFailed(format!(
            "expected {} catalog vectors, got {}",
            catalog.len(),
            catalog_vectors.len()
        )));
    }

    for question in questions.iter_mut() {
        let input = vec![question.question_text.clone()];
        let what = format!("embed question {}", question.question_number);
        let vector = match policy.run(&what, || embedder.embed(&input)).await {
            Ok(mut v) if v.len() == 1 => v.remove(0),
            Ok(v) => {
                warn!(
                    "Skipping question {}: embedder returned {} vectors",
                    question.question_number,
                    v.len()
                );
                report.skipped.push(question.question_number);
                continue;
            }
            Err(e) => {
                warn!("Skipping question {}: {}", question.question_number, e);
                report.skipped.push(question.question_number);
                continue;
            }
        };

        if let Some((idx, score)) = nearest_topic(&vector, &catalog_vectors) {
            let topic = catalog[idx].topic.clone();
            debug!(
                "Question {} → '{}' (similarity {:.3})",
                question.question_number, topic, score
            );
            question.topic_label = Some(topic.clone());
            report.assigned.push(LabelAssignment {
                question_number: question.question_number,
                topic,
                score,
            });
        }
    }

    info!(
        "Labelled {} questions, skipped {}",
        report.assigned.len(),
        report.skipped.len()
    );
    Ok(report)
}
