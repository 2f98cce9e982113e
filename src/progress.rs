//! Progress-callback trait for extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to follow a
//! paper through the pipeline: the CLI drives a progress bar from it, the
//! HTTP server logs it.
//!
//! # Example
//!
//! ```rust
//! use edgequake_exam2quiz::{ExtractionProgressCallback, PipelineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct QuestionCounter(AtomicUsize);
//!
//! impl ExtractionProgressCallback for QuestionCounter {
//!     fn on_page_complete(&self, _page: usize, _total: usize, questions: usize) {
//!         self.0.fetch_add(questions, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(QuestionCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use serde::Serialize;
use std::sync::Arc;

/// Which of the two extraction passes an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Primary,
    Rerun,
}

impl std::fmt::Display for RunKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RunKind::Primary => "primary",
            RunKind::Rerun => "re-run",
        })
    }
}

/// Called by the pipeline as it works through a paper.
///
/// Pages are processed sequentially within a run, so events for one paper
/// never overlap. All methods default to no-ops.
pub trait ExtractionProgressCallback: Send + Sync {
    /// A run is about to process `total_pages` pages.
    fn on_run_start(&self, run: RunKind, total_pages: usize) {
        let _ = (run, total_pages);
    }

    /// Just before the bounding-box call for a page.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// A page finished; `questions` is how many the model returned for it.
    fn on_page_complete(&self, page_num: usize, total_pages: usize, questions: usize) {
        let _ = (page_num, total_pages, questions);
    }

    /// A page failed; the run aborts after this event.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// A run finished with `questions` consolidated questions.
    fn on_run_complete(&self, run: RunKind, questions: usize) {
        let _ = (run, questions);
    }

    /// The pipeline is sleeping before the re-run.
    fn on_rerun_wait(&self, delay_secs: u64) {
        let _ = delay_secs;
    }
}

/// Callback that ignores every event.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
