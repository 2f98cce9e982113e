//! The external model as an opaque collaborator.
//!
//! Every piece of "intelligence" in the pipeline is delegated to a
//! multimodal LLM and an embedding model. The pipeline only needs three
//! operations from them, so they sit behind two small traits:
//!
//! * [`VisionModel`]: bounding boxes and structured questions for a page image
//! * [`Embedder`]: vectors for a batch of texts
//!
//! [`crate::llm`] implements both on top of `edgequake-llm`; tests use
//! in-memory fakes.

use crate::error::ExamError;
use crate::types::{ExtractedQuestion, Region};
use async_trait::async_trait;

/// A rasterised page ready to be sent to the model.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 1-indexed page number.
    pub page_num: usize,
    /// PNG-encoded bytes.
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Label every diagram, graph, question, option block and answer key on
    /// the page. `instructions` describes the expected JSON schema.
    async fn bounding_boxes(
        &self,
        page: &PageImage,
        instructions: &str,
    ) -> Result<Vec<Region>, ExamError>;

    /// Extract structured questions, using `regions` as layout hints.
    async fn extract_questions(
        &self,
        page: &PageImage,
        regions: &[Region],
        instructions: &str,
    ) -> Result<Vec<ExtractedQuestion>, ExamError>;

    /// Free-text completion; used for wrong-answer explanations.
    async fn complete(&self, system: &str, user: &str) -> Result<String, ExamError>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ExamError>;
}
