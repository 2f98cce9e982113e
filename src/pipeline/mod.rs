//! Pipeline stages for turning an exam paper into quiz questions.
//!
//! Each submodule implements exactly one transformation step, so each is
//! independently testable with an in-memory model and blob store.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ regions ──▶ questions ──▶ consolidate ──▶ merge ──▶ labeller
//! (URL/path) (pdfium)  (PNG)     (boxes+crops) (VLM JSON)   (dedupe)       (rerun)   (embeddings)
//! ```
//!
//! 1. [`input`]: canonicalise the user-supplied path, URL or upload to a local file
//! 2. [`render`]: rasterise every page in `spawn_blocking`
//! 3. [`encode`]: PNG-encode pages and wrap them for the multimodal request
//! 4. [`regions`]: bounding boxes; figures are cropped and uploaded
//! 5. [`questions`]: structured questions, stamped with page and crops
//! 6. [`consolidate`]: one entry per question number across pages
//! 7. [`merge`]: reconcile a primary run with a re-run
//! 8. [`labeller`]: nearest catalog topic by cosine similarity
//!
//! [`parse`] holds the lenient JSON parsing shared by stages 4 and 5.

pub mod consolidate;
pub mod encode;
pub mod input;
pub mod labeller;
pub mod merge;
pub mod parse;
pub mod questions;
pub mod regions;
pub mod render;
