//! # edgequake-exam2quiz
//!
//! Digitise scanned or typeset exam papers into a tagged question bank, then
//! serve quizzes from it.
//!
//! ## Why a vision model?
//!
//! Exam papers mix printed text, handwritten answer keys, diagrams and
//! tables in layouts that text extractors scramble. Each page is rasterised
//! and read by a multimodal model twice: once to locate figures and
//! question blocks, once to produce structured questions with those
//! locations as hints. Figures are cropped from the page and uploaded so
//! quizzes can show them.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input        resolve local file, URL or upload
//!  ├─ 2. Render       rasterise pages via pdfium, upload page PNGs
//!  ├─ 3. Regions      bounding boxes; crop and upload diagrams/graphs
//!  ├─ 4. Questions    structured questions per page
//!  ├─ 5. Consolidate  one entry per question number
//!  ├─ 6. Re-run       optional second pass, merged into the first
//!  ├─ 7. Label        nearest catalog topic via embeddings
//!  └─ 8. Persist      SQLite question bank
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use edgequake_exam2quiz::{
//!     extract_paper, Database, LlmVisionModel, LocalBlobStore, PaperInfo, PipelineConfig,
//!     PipelineDeps,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::default();
//!     let deps = PipelineDeps {
//!         model: Arc::new(LlmVisionModel::from_config(&config)?),
//!         embedder: None,
//!         store: Arc::new(LocalBlobStore::new("./blobs", "http://localhost:8080/files")),
//!         db: Database::open("./exam2quiz.db".as_ref())?,
//!     };
//!     let paper = PaperInfo::new("Prelim 2023", "Science", "Standard", "P6");
//!     let output = extract_paper("prelim.pdf", &paper, &config, &deps).await?;
//!     println!("{} questions stored", output.stats.stored);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | Enables the `exam2quiz` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `server` | on      | HTTP API on axum |
//! | `s3`     | off     | S3-compatible blob store (AWS, R2, MinIO) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod llm;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod quiz;
pub mod retry;
#[cfg(feature = "server")]
pub mod server;
pub mod storage;
pub mod types;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use db::{Database, QuestionFilter};
pub use error::{ExamError, ModelStage};
pub use extract::{
    extract_paper, extract_paper_from_bytes, extract_rendered, extract_with_rerun,
    label_stored_questions, load_rendered, render_paper, render_paper_from_bytes,
    ExtractionOutput, ExtractionStats, PipelineDeps, RenderedPaper,
};
pub use llm::{LlmEmbedder, LlmVisionModel};
pub use model::{Embedder, PageImage, VisionModel};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback, RunKind};
pub use quiz::submit_answer;
pub use retry::RetryPolicy;
#[cfg(feature = "s3")]
pub use storage::s3::{S3BlobStore, S3Config};
pub use storage::{local::LocalBlobStore, BlobStore};
pub use types::*;
