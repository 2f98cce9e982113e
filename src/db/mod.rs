//! Question bank persistence: pooled SQLite.
//!
//! One [`Database`] handle is opened at process start and cloned into every
//! consumer (pipeline, HTTP handlers); clones share the r2d2 pool. Queries
//! are plain functions over `&Connection` in the submodules, and
//! [`Database::run`] moves each call onto Tokio's blocking pool so SQLite
//! I/O never stalls the async workers.

pub mod analytics;
pub mod questions;
pub mod quizzes;
pub mod topics;

pub use questions::QuestionFilter;

use crate::error::ExamError;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub type DbPool = Pool<SqliteConnectionManager>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS questions (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    paper_name      TEXT    NOT NULL,
    subject         TEXT    NOT NULL,
    banding         TEXT    NOT NULL,
    level           TEXT    NOT NULL,
    page_number     INTEGER NOT NULL,
    question_number INTEGER NOT NULL,
    question_text   TEXT    NOT NULL,
    answer_options  TEXT    NOT NULL DEFAULT '[]',
    image_paths     TEXT    NOT NULL DEFAULT '[]',
    topic_label     TEXT,
    answer_key      TEXT,
    wrong_count     INTEGER NOT NULL DEFAULT 0,
    attempt_count   INTEGER NOT NULL DEFAULT 0,
    difficulty      REAL,
    created_at      TEXT    NOT NULL,
    UNIQUE (paper_name, question_number)
);
CREATE INDEX IF NOT EXISTS idx_questions_filter
    ON questions (subject, banding, level, topic_label);

CREATE TABLE IF NOT EXISTS topic_labels (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    subject     TEXT NOT NULL,
    topic       TEXT NOT NULL,
    sub_topic   TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL,
    UNIQUE (subject, topic, sub_topic)
);

CREATE TABLE IF NOT EXISTS quizzes (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    name       TEXT NOT NULL,
    subject    TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS quiz_questions (
    quiz_id     INTEGER NOT NULL REFERENCES quizzes(id) ON DELETE CASCADE,
    question_id INTEGER NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
    position    INTEGER NOT NULL,
    PRIMARY KEY (quiz_id, question_id)
);

CREATE TABLE IF NOT EXISTS attempts (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    quiz_id         INTEGER NOT NULL REFERENCES quizzes(id) ON DELETE CASCADE,
    question_id     INTEGER NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
    student         TEXT    NOT NULL,
    selected_option TEXT    NOT NULL,
    correct         INTEGER NOT NULL,
    created_at      TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_attempts_quiz ON attempts (quiz_id, student);
"#;

/// Shared handle to the question bank.
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("connections", &self.pool.state().connections)
            .finish()
    }
}

impl Database {
    /// Open (creating if needed) a database file and apply the schema.
    pub fn open(path: &Path) -> Result<Self, ExamError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                ExamError::Database(format!("create {}: {e}", parent.display()))
            })?;
        }
        info!("Opening question bank at {}", path.display());

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "busy_timeout", 3000i64)?;
            Ok(())
        });
        let pool = Pool::builder()
            .max_size(8)
            .min_idle(Some(1))
            .connection_timeout(Duration::from_secs(10))
            .build(manager)?;
        Self::with_pool(pool)
    }

    /// A private in-memory database.
    ///
    /// Every SQLite `:memory:` connection is its own database, so the pool
    /// holds exactly one connection.
    pub fn open_in_memory() -> Result<Self, ExamError> {
        let manager = SqliteConnectionManager::memory().with_init(|conn| {
            conn.pragma_update(None, "foreign_keys", "ON")?;
            Ok(())
        });
        let pool = Pool::builder().max_size(1).build(manager)?;
        Self::with_pool(pool)
    }

    fn with_pool(pool: DbPool) -> Result<Self, ExamError> {
        let conn = pool.get()?;
        conn.execute_batch(SCHEMA)?;
        debug!("Schema applied");
        drop(conn);
        Ok(Self { pool })
    }

    /// Run `f` with a pooled connection on the blocking thread pool.
    pub async fn run<T, F>(&self, f: F) -> Result<T, ExamError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, ExamError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| ExamError::Internal(format!("Database task panicked: {e}")))?
    }
}

/// Decode a JSON text column into `T`.
pub(crate) fn json_column<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Encode a value for a JSON text column.
pub(crate) fn to_json_text<T: serde::Serialize>(value: &T) -> Result<String, ExamError> {
    serde_json::to_string(value).map_err(|e| ExamError::Internal(format!("serialise column: {e}")))
}
