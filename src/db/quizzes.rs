//! Quiz folders and recorded answers.

use super::questions::row_to_question;
use super::Database;
use crate::error::ExamError;
use crate::types::{Question, QuizFolder};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

/// Create a quiz over existing questions, preserving the given order.
///
/// Duplicate ids are collapsed to their first position.
pub fn create_quiz(
    conn: &mut Connection,
    name: &str,
    subject: &str,
    question_ids: &[i64],
) -> Result<QuizFolder, ExamError> {
    let missing: Vec<String> = [("name", name), ("subject", subject)]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| k.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ExamError::MissingFields(missing));
    }

    let mut ids: Vec<i64> = Vec::with_capacity(question_ids.len());
    for id in question_ids {
        if !ids.contains(id) {
            ids.push(*id);
        }
    }

    let created_at = Utc::now();
    let tx = conn.transaction()?;
    for id in &ids {
        let exists: bool = tx.query_row(
            "SELECT EXISTS (SELECT 1 FROM questions WHERE id = ?1)",
            params![id],
            |r| r.get(0),
        )?;
        if !exists {
            return Err(ExamError::NotFound {
                entity: "question",
                id: id.to_string(),
            });
        }
    }

    tx.execute(
        "INSERT INTO quizzes (name, subject, created_at) VALUES (?1, ?2, ?3)",
        params![name.trim(), subject.trim(), created_at],
    )?;
    let quiz_id = tx.last_insert_rowid();
    {
        let mut stmt = tx.prepare(
            "INSERT INTO quiz_questions (quiz_id, question_id, position) VALUES (?1, ?2, ?3)",
        )?;
        for (position, id) in ids.iter().enumerate() {
            stmt.execute(params![quiz_id, id, position as i64])?;
        }
    }
    tx.commit()?;

    Ok(QuizFolder {
        id: quiz_id,
        name: name.trim().to_string(),
        subject: subject.trim().to_string(),
        question_ids: ids,
        created_at,
    })
}

pub fn get_quiz(conn: &Connection, quiz_id: i64) -> Result<QuizFolder, ExamError> {
    let header = conn
        .query_row(
            "SELECT name, subject, created_at FROM quizzes WHERE id = ?1",
            params![quiz_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, DateTime<Utc>>(2)?,
                ))
            },
        )
        .optional()?;
    let Some((name, subject, created_at)) = header else {
        return Err(ExamError::NotFound {
            entity: "quiz",
            id: quiz_id.to_string(),
        });
    };

    let mut stmt = conn.prepare(
        "SELECT question_id FROM quiz_questions WHERE quiz_id = ?1 ORDER BY position",
    )?;
    let question_ids = stmt
        .query_map(params![quiz_id], |r| r.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;

    Ok(QuizFolder {
        id: quiz_id,
        name,
        subject,
        question_ids,
        created_at,
    })
}

/// The quiz's questions in quiz order.
pub fn quiz_questions(conn: &Connection, quiz_id: i64) -> Result<Vec<Question>, ExamError> {
    let mut stmt = conn.prepare(
        "SELECT q.id, q.paper_name, q.subject, q.banding, q.level, q.page_number, \
         q.question_number, q.question_text, q.answer_options, q.image_paths, q.topic_label, \
         q.answer_key, q.wrong_count, q.attempt_count, q.difficulty \
         FROM quiz_questions qq JOIN questions q ON q.id = qq.question_id \
         WHERE qq.quiz_id = ?1 ORDER BY qq.position",
    )?;
    let rows = stmt.query_map(params![quiz_id], row_to_question)?;
    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

/// Record one answer: an attempt row plus the question's counters.
///
/// `attempt_count` always increments, `wrong_count` only when wrong, and
/// `difficulty` is refreshed to `wrong_count / attempt_count`.
pub fn record_attempt(
    conn: &mut Connection,
    quiz_id: i64,
    question_id: i64,
    student: &str,
    selected_option: &str,
    correct: bool,
) -> Result<(), ExamError> {
    let tx = conn.transaction()?;
    let in_quiz: bool = tx.query_row(
        "SELECT EXISTS (SELECT 1 FROM quiz_questions WHERE quiz_id = ?1 AND question_id = ?2)",
        params![quiz_id, question_id],
        |r| r.get(0),
    )?;
    if !in_quiz {
        return Err(ExamError::NotFound {
            entity: "quiz question",
            id: format!("{quiz_id}/{question_id}"),
        });
    }

    tx.execute(
        "INSERT INTO attempts (quiz_id, question_id, student, selected_option, correct, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![quiz_id, question_id, student, selected_option, correct, Utc::now()],
    )?;
    tx.execute(
        "UPDATE questions SET \
             attempt_count = attempt_count + 1, \
             wrong_count = wrong_count + ?2, \
             difficulty = CAST(wrong_count + ?2 AS REAL) / (attempt_count + 1) \
         WHERE id = ?1",
        params![question_id, if correct { 0 } else { 1 }],
    )?;
    tx.commit()?;
    Ok(())
}

impl Database {
    pub async fn create_quiz(
        &self,
        name: &str,
        subject: &str,
        question_ids: Vec<i64>,
    ) -> Result<QuizFolder, ExamError> {
        let (name, subject) = (name.to_string(), subject.to_string());
        self.run(move |conn| create_quiz(conn, &name, &subject, &question_ids))
            .await
    }

    pub async fn get_quiz(&self, quiz_id: i64) -> Result<QuizFolder, ExamError> {
        self.run(move |conn| get_quiz(conn, quiz_id)).await
    }

    pub async fn quiz_questions(&self, quiz_id: i64) -> Result<Vec<Question>, ExamError> {
        self.run(move |conn| {
            get_quiz(conn, quiz_id)?;
            quiz_questions(conn, quiz_id)
        })
        .await
    }

    pub async fn record_attempt(
        &self,
        quiz_id: i64,
        question_id: i64,
        student: &str,
        selected_option: &str,
        correct: bool,
    ) -> Result<(), ExamError> {
        let (student, selected) = (student.to_string(), selected_option.to_string());
        self.run(move |conn| record_attempt(conn, quiz_id, question_id, &student, &selected, correct))
            .await
    }
}
