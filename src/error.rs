//! Error types for the edgequake-exam2quiz library.
//!
//! A single fatal error type, [`ExamError`], covers every failure that stops
//! a paper from being processed. There is no partial credit: a page whose
//! model response cannot be parsed fails the whole run, so the question bank
//! never holds half a paper.
//!
//! The few failures that are *not* fatal (a blob that was already gone when
//! we tried to delete it, a question whose embedding kept failing) are
//! logged and reported through the relevant report structs instead.

use std::path::PathBuf;
use thiserror::Error;

/// Which model call produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStage {
    BoundingBoxes,
    Questions,
    Explanation,
}

impl std::fmt::Display for ModelStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModelStage::BoundingBoxes => "bounding-box",
            ModelStage::Questions => "question",
            ModelStage::Explanation => "explanation",
        };
        f.write_str(s)
    }
}

/// All fatal errors returned by the edgequake-exam2quiz library.
#[derive(Debug, Error)]
pub enum ExamError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// The PDF opened but has no pages to process.
    #[error("PDF '{path}' has no pages")]
    EmptyPdf { path: PathBuf },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium (or its directory) or install pdfium\n\
system-wide so the dynamic loader can find it.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Model errors ──────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The LLM API kept failing after all retries.
    #[error("LLM API error: {message}")]
    LlmApiError { message: String },

    /// The model answered, but not with the JSON we asked for.
    #[error("Page {page}: {stage} response is not valid JSON: {detail}")]
    MalformedResponse {
        page: usize,
        stage: ModelStage,
        detail: String,
    },

    /// The embedding provider failed or returned the wrong number of vectors.
    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    // ── Storage errors ────────────────────────────────────────────────────
    /// A blob-store upload, download or listing failed.
    #[error("Blob storage error on '{key}': {detail}")]
    Storage { key: String, detail: String },

    // ── Database errors ───────────────────────────────────────────────────
    /// A SQL statement or the connection pool failed.
    #[error("Database error: {0}")]
    Database(String),

    /// A row the caller asked for does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    // ── Validation errors ─────────────────────────────────────────────────
    /// Required request fields were missing or blank.
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for ExamError {
    fn from(e: rusqlite::Error) -> Self {
        ExamError::Database(e.to_string())
    }
}

impl From<r2d2::Error> for ExamError {
    fn from(e: r2d2::Error) -> Self {
        ExamError::Database(format!("connection pool: {e}"))
    }
}

impl ExamError {
    pub(crate) fn storage(key: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        ExamError::Storage {
            key: key.into(),
            detail: detail.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_response_display() {
        let e = ExamError::MalformedResponse {
            page: 3,
            stage: ModelStage::BoundingBoxes,
            detail: "expected value at line 1".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("Page 3"), "got: {msg}");
        assert!(msg.contains("bounding-box"), "got: {msg}");
    }

    #[test]
    fn missing_fields_lists_every_field() {
        let e = ExamError::MissingFields(vec!["subject".into(), "level".into()]);
        assert_eq!(e.to_string(), "Missing required fields: subject, level");
    }

    #[test]
    fn not_found_display() {
        let e = ExamError::NotFound {
            entity: "quiz",
            id: "42".into(),
        };
        assert_eq!(e.to_string(), "quiz 42 not found");
    }

    #[test]
    fn rusqlite_error_converts_to_database() {
        let e: ExamError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(e, ExamError::Database(_)));
    }
}
