//! Question rows: insert, filter, topic updates.

use super::{json_column, to_json_text, Database};
use crate::error::ExamError;
use crate::types::Question;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const COLUMNS: &str = "id, paper_name, subject, banding, level, page_number, question_number, \
     question_text, answer_options, image_paths, topic_label, answer_key, \
     wrong_count, attempt_count, difficulty";

/// Optional filters for listing questions; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionFilter {
    pub subject: Option<String>,
    pub banding: Option<String>,
    pub level: Option<String>,
    pub topic: Option<String>,
    pub paper_name: Option<String>,
}

pub(crate) fn row_to_question(row: &Row<'_>) -> rusqlite::Result<Question> {
    Ok(Question {
        id: Some(row.get(0)?),
        paper_name: row.get(1)?,
        subject: row.get(2)?,
        banding: row.get(3)?,
        level: row.get(4)?,
        page_number: row.get(5)?,
        question_number: row.get(6)?,
        question_text: row.get(7)?,
        answer_options: json_column(row, 8)?,
        image_paths: json_column(row, 9)?,
        topic_label: row.get(10)?,
        answer_key: row.get(11)?,
        wrong_count: row.get(12)?,
        attempt_count: row.get(13)?,
        difficulty: row.get(14)?,
    })
}

/// Insert questions, skipping any `(paper_name, question_number)` already stored.
///
/// Returns how many rows were actually inserted.
pub fn insert_questions(conn: &mut Connection, questions: &[Question]) -> Result<usize, ExamError> {
    let now = Utc::now();
    let tx = conn.transaction()?;
    let mut inserted = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO questions (paper_name, subject, banding, level, page_number, \
             question_number, question_text, answer_options, image_paths, topic_label, \
             answer_key, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
             ON CONFLICT (paper_name, question_number) DO NOTHING",
        )?;
        for q in questions {
            inserted += stmt.execute(params![
                q.paper_name,
                q.subject,
                q.banding,
                q.level,
                q.page_number,
                q.question_number,
                q.question_text,
                to_json_text(&q.answer_options)?,
                to_json_text(&q.image_paths)?,
                q.topic_label,
                q.answer_key,
                now,
            ])?;
        }
    }
    tx.commit()?;
    Ok(inserted)
}

pub fn list_questions(conn: &Connection, filter: &QuestionFilter) -> Result<Vec<Question>, ExamError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM questions \
         WHERE (?1 IS NULL OR subject = ?1) \
           AND (?2 IS NULL OR banding = ?2) \
           AND (?3 IS NULL OR level = ?3) \
           AND (?4 IS NULL OR topic_label = ?4) \
           AND (?5 IS NULL OR paper_name = ?5) \
         ORDER BY paper_name, question_number"
    ))?;
    let rows = stmt.query_map(
        params![
            filter.subject,
            filter.banding,
            filter.level,
            filter.topic,
            filter.paper_name
        ],
        row_to_question,
    )?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

pub fn get_question(conn: &Connection, id: i64) -> Result<Question, ExamError> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM questions WHERE id = ?1"),
        params![id],
        row_to_question,
    )
    .optional()?
    .ok_or_else(|| ExamError::NotFound {
        entity: "question",
        id: id.to_string(),
    })
}

/// Questions of a subject that have no topic yet.
pub fn unlabelled_questions(conn: &Connection, subject: &str) -> Result<Vec<Question>, ExamError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM questions \
         WHERE subject = ?1 AND (topic_label IS NULL OR topic_label = '') \
         ORDER BY paper_name, question_number"
    ))?;
    let rows = stmt.query_map(params![subject], row_to_question)?;
    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

/// Set topics by question id; returns the number of rows updated.
pub fn set_topics(conn: &mut Connection, topics: &[(i64, String)]) -> Result<usize, ExamError> {
    let tx = conn.transaction()?;
    let mut updated = 0;
    {
        let mut stmt = tx.prepare("UPDATE questions SET topic_label = ?2 WHERE id = ?1")?;
        for (id, topic) in topics {
            updated += stmt.execute(params![id, topic])?;
        }
    }
    tx.commit()?;
    Ok(updated)
}

impl Database {
    pub async fn insert_questions(&self, questions: Vec<Question>) -> Result<usize, ExamError> {
        let total = questions.len();
        let inserted = self
            .run(move |conn| insert_questions(conn, &questions))
            .await?;
        if inserted < total {
            info!(
                "Stored {} new questions ({} already present)",
                inserted,
                total - inserted
            );
        } else {
            debug!("Stored {} questions", inserted);
        }
        Ok(inserted)
    }

    pub async fn list_questions(&self, filter: QuestionFilter) -> Result<Vec<Question>, ExamError> {
        self.run(move |conn| list_questions(conn, &filter)).await
    }

    pub async fn get_question(&self, id: i64) -> Result<Question, ExamError> {
        self.run(move |conn| get_question(conn, id)).await
    }

    pub async fn unlabelled_questions(&self, subject: &str) -> Result<Vec<Question>, ExamError> {
        let subject = subject.to_string();
        self.run(move |conn| unlabelled_questions(conn, &subject)).await
    }

    pub async fn set_topics(&self, topics: Vec<(i64, String)>) -> Result<usize, ExamError> {
        self.run(move |conn| set_topics(conn, &topics)).await
    }
}
