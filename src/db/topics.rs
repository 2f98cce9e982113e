//! Topic catalog: curriculum reference data used by the labeller.

use super::Database;
use crate::error::ExamError;
use crate::types::TopicLabel;
use rusqlite::{params, Connection, Row};

fn row_to_topic(row: &Row<'_>) -> rusqlite::Result<TopicLabel> {
    Ok(TopicLabel {
        id: Some(row.get(0)?),
        subject: row.get(1)?,
        topic: row.get(2)?,
        sub_topic: row.get(3)?,
        description: row.get(4)?,
    })
}

/// Add a catalog entry, or update the description of an existing
/// `(subject, topic, sub_topic)`.
pub fn upsert_topic(conn: &Connection, topic: &TopicLabel) -> Result<TopicLabel, ExamError> {
    let missing: Vec<String> = [
        ("subject", &topic.subject),
        ("topic", &topic.topic),
        ("description", &topic.description),
    ]
    .into_iter()
    .filter(|(_, v)| v.trim().is_empty())
    .map(|(k, _)| k.to_string())
    .collect();
    if !missing.is_empty() {
        return Err(ExamError::MissingFields(missing));
    }

    conn.execute(
        "INSERT INTO topic_labels (subject, topic, sub_topic, description) \
         VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT (subject, topic, sub_topic) DO UPDATE SET description = excluded.description",
        params![
            topic.subject.trim(),
            topic.topic.trim(),
            topic.sub_topic.trim(),
            topic.description.trim()
        ],
    )?;
    let stored = conn.query_row(
        "SELECT id, subject, topic, sub_topic, description FROM topic_labels \
         WHERE subject = ?1 AND topic = ?2 AND sub_topic = ?3",
        params![topic.subject.trim(), topic.topic.trim(), topic.sub_topic.trim()],
        row_to_topic,
    )?;
    Ok(stored)
}

/// Catalog entries in insertion order, optionally restricted to a subject.
///
/// Order matters: the labeller breaks similarity ties by catalog position.
pub fn list_topics(conn: &Connection, subject: Option<&str>) -> Result<Vec<TopicLabel>, ExamError> {
    let mut stmt = conn.prepare(
        "SELECT id, subject, topic, sub_topic, description FROM topic_labels \
         WHERE (?1 IS NULL OR subject = ?1) ORDER BY id",
    )?;
    let rows = stmt.query_map(params![subject], row_to_topic)?;
    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

impl Database {
    pub async fn upsert_topic(&self, topic: TopicLabel) -> Result<TopicLabel, ExamError> {
        self.run(move |conn| upsert_topic(conn, &topic)).await
    }

    pub async fn list_topics(&self, subject: Option<&str>) -> Result<Vec<TopicLabel>, ExamError> {
        let subject = subject.map(str::to_string);
        self.run(move |conn| list_topics(conn, subject.as_deref()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(subject: &str, name: &str, description: &str) -> TopicLabel {
        TopicLabel {
            id: None,
            subject: subject.into(),
            topic: name.into(),
            sub_topic: String::new(),
            description: description.into(),
        }
    }

    #[tokio::test]
    async fn upsert_updates_description() {
        let db = Database::open_in_memory().unwrap();
        let first = db
            .upsert_topic(topic("Science", "Magnets", "poles"))
            .await
            .unwrap();
        let again = db
            .upsert_topic(topic("Science", "Magnets", "poles and attraction"))
            .await
            .unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(again.description, "poles and attraction");
        assert_eq!(db.list_topics(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_by_subject_in_insertion_order() {
        let db = Database::open_in_memory().unwrap();
        for (s, t) in [("Science", "Plants"), ("Maths", "Fractions"), ("Science", "Cells")] {
            db.upsert_topic(topic(s, t, "d")).await.unwrap();
        }
        let names: Vec<String> = db
            .list_topics(Some("Science"))
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.topic)
            .collect();
        assert_eq!(names, vec!["Plants", "Cells"]);
    }

    #[tokio::test]
    async fn blank_fields_are_rejected() {
        let db = Database::open_in_memory().unwrap();
        let err = db.upsert_topic(topic("Science", " ", "")).await.unwrap_err();
        match err {
            ExamError::MissingFields(fields) => assert_eq!(fields, vec!["topic", "description"]),
            other => panic!("unexpected {other:?}"),
        }
    }
}
