//! Quiz analytics computed with SQL aggregates over recorded attempts.
//!
//! A student's score is the number of distinct quiz questions they answered
//! correctly at least once; "answered" counts distinct questions attempted.
//! A student has completed the quiz once every question has an attempt.

use super::Database;
use crate::error::ExamError;
use crate::types::{HardestItem, QuizAnalytics, StudentScore};
use rusqlite::{params, Connection, OptionalExtension};

pub fn quiz_analytics(conn: &Connection, quiz_id: i64) -> Result<QuizAnalytics, ExamError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM quizzes WHERE id = ?1)",
        params![quiz_id],
        |r| r.get(0),
    )?;
    if !exists {
        return Err(ExamError::NotFound {
            entity: "quiz",
            id: quiz_id.to_string(),
        });
    }

    let question_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM quiz_questions WHERE quiz_id = ?1",
        params![quiz_id],
        |r| r.get(0),
    )?;

    let mut stmt = conn.prepare(
        "SELECT student, \
                COUNT(DISTINCT question_id), \
                COUNT(DISTINCT CASE WHEN correct = 1 THEN question_id END) \
         FROM attempts WHERE quiz_id = ?1 \
         GROUP BY student ORDER BY student",
    )?;
    let student_scores = stmt
        .query_map(params![quiz_id], |r| {
            Ok(StudentScore {
                student: r.get(0)?,
                answered: r.get(1)?,
                correct: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let (mean_score, min_score, max_score): (Option<f64>, Option<u32>, Option<u32>) = conn
        .query_row(
            "SELECT AVG(score), MIN(score), MAX(score) FROM ( \
                 SELECT COUNT(DISTINCT CASE WHEN correct = 1 THEN question_id END) AS score \
                 FROM attempts WHERE quiz_id = ?1 GROUP BY student)",
            params![quiz_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )?;

    let completed: i64 = conn.query_row(
        "SELECT COUNT(*) FROM ( \
             SELECT student FROM attempts WHERE quiz_id = ?1 \
             GROUP BY student HAVING COUNT(DISTINCT question_id) >= ?2)",
        params![quiz_id, question_count],
        |r| r.get(0),
    )?;

    let students = student_scores.len();
    let completion_rate = if students == 0 || question_count == 0 {
        0.0
    } else {
        completed as f64 / students as f64
    };

    let hardest_question = conn
        .query_row(
            "SELECT q.paper_name || ' Q' || q.question_number, a.question_id, \
                    SUM(1 - a.correct) AS wrong, COUNT(*) AS attempts \
             FROM attempts a JOIN questions q ON q.id = a.question_id \
             WHERE a.quiz_id = ?1 \
             GROUP BY a.question_id \
             ORDER BY CAST(SUM(1 - a.correct) AS REAL) / COUNT(*) DESC, SUM(1 - a.correct) DESC, a.question_id ASC \
             LIMIT 1",
            params![quiz_id],
            |r| hardest_item(r, true),
        )
        .optional()?;

    let hardest_topic = conn
        .query_row(
            "SELECT COALESCE(NULLIF(q.topic_label, ''), 'Unlabelled') AS topic, NULL, \
                    SUM(1 - a.correct) AS wrong, COUNT(*) AS attempts \
             FROM attempts a JOIN questions q ON q.id = a.question_id \
             WHERE a.quiz_id = ?1 \
             GROUP BY topic \
             ORDER BY CAST(SUM(1 - a.correct) AS REAL) / COUNT(*) DESC, SUM(1 - a.correct) DESC, topic ASC \
             LIMIT 1",
            params![quiz_id],
            |r| hardest_item(r, false),
        )
        .optional()?;

    Ok(QuizAnalytics {
        quiz_id,
        question_count: question_count as usize,
        students,
        completion_rate,
        mean_score: mean_score.unwrap_or(0.0),
        min_score,
        max_score,
        hardest_topic,
        hardest_question,
        student_scores,
    })
}

fn hardest_item(r: &rusqlite::Row<'_>, with_id: bool) -> rusqlite::Result<HardestItem> {
    let wrong: u32 = r.get(2)?;
    let attempts: u32 = r.get(3)?;
    Ok(HardestItem {
        label: r.get(0)?,
        question_id: if with_id { r.get(1)? } else { None },
        wrong,
        attempts,
        wrong_rate: if attempts == 0 {
            0.0
        } else {
            wrong as f64 / attempts as f64
        },
    })
}

impl Database {
    pub async fn quiz_analytics(&self, quiz_id: i64) -> Result<QuizAnalytics, ExamError> {
        self.run(move |conn| quiz_analytics(conn, quiz_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::questions::tests::sample;
    use crate::db::QuestionFilter;

    #[tokio::test]
    async fn aggregates_over_attempts() {
        let db = Database::open_in_memory().unwrap();
        db.insert_questions(vec![
            sample("AES", "Science", 1, Some("A")),
            sample("AES", "Science", 2, Some("B")),
        ])
        .await
        .unwrap();
        let ids: Vec<i64> = db
            .list_questions(QuestionFilter::default())
            .await
            .unwrap()
            .into_iter()
            .filter_map(|q| q.id)
            .collect();
        db.set_topics(vec![(ids[0], "Plants".into()), (ids[1], "Magnets".into())])
            .await
            .unwrap();
        let quiz = db.create_quiz("W1", "Science", ids.clone()).await.unwrap();

        // amy: both right; ben: q1 right, q2 wrong; cara: q2 wrong only.
        db.record_attempt(quiz.id, ids[0], "amy", "A", true).await.unwrap();
        db.record_attempt(quiz.id, ids[1], "amy", "B", true).await.unwrap();
        db.record_attempt(quiz.id, ids[0], "ben", "A", true).await.unwrap();
        db.record_attempt(quiz.id, ids[1], "ben", "D", false).await.unwrap();
        db.record_attempt(quiz.id, ids[1], "cara", "C", false).await.unwrap();

        let a = db.quiz_analytics(quiz.id).await.unwrap();
        assert_eq!(a.question_count, 2);
        assert_eq!(a.students, 3);
        assert!((a.completion_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((a.mean_score - 1.0).abs() < 1e-9);
        assert_eq!(a.min_score, Some(0));
        assert_eq!(a.max_score, Some(2));

        let hq = a.hardest_question.unwrap();
        assert_eq!(hq.question_id, Some(ids[1]));
        assert_eq!((hq.wrong, hq.attempts), (2, 3));
        assert_eq!(hq.label, "AES_Science_Standard_P6 Q2");
        assert_eq!(a.hardest_topic.unwrap().label, "Magnets");

        let cara = a.student_scores.iter().find(|s| s.student == "cara").unwrap();
        assert_eq!((cara.answered, cara.correct), (1, 0));
    }

    #[tokio::test]
    async fn empty_quiz_has_zeroed_analytics() {
        let db = Database::open_in_memory().unwrap();
        let quiz = db.create_quiz("Empty", "Science", Vec::new()).await.unwrap();
        let a = db.quiz_analytics(quiz.id).await.unwrap();
        assert_eq!(a.students, 0);
        assert_eq!(a.completion_rate, 0.0);
        assert_eq!(a.min_score, None);
        assert!(a.hardest_question.is_none());
    }

    #[tokio::test]
    async fn unknown_quiz() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.quiz_analytics(7).await.unwrap_err(),
            ExamError::NotFound { entity: "quiz", .. }
        ));
    }
}
