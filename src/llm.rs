//! `edgequake-llm` implementations of [`VisionModel`] and [`Embedder`].
//!
//! Every call is one chat request: the system message carries the
//! instructions, the user message carries the page PNG (plus region hints on
//! the question pass). Transport failures and timeouts are retried with the
//! configured [`RetryPolicy`]; a response that arrives but does not parse is
//! *not* retried; it is reported as [`ExamError::MalformedResponse`].

use crate::config::PipelineConfig;
use crate::error::ExamError;
use crate::model::{Embedder, PageImage, VisionModel};
use crate::pipeline::encode::to_image_data;
use crate::pipeline::parse::{parse_questions, parse_regions};
use crate::prompts::question_user_message;
use crate::retry::RetryPolicy;
use crate::types::{ExtractedQuestion, Region};
use async_trait::async_trait;
use edgequake_llm::{
    ChatMessage, CompletionOptions, EmbeddingProvider, LLMProvider, ProviderFactory,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default model when only a provider name is given.
pub const DEFAULT_MODEL: &str = "gpt-4.1";

/// Vision model backed by any `edgequake-llm` chat provider.
pub struct LlmVisionModel {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    retry: RetryPolicy,
    timeout: Duration,
}

impl LlmVisionModel {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
            retry: config.model_retry.clone(),
            timeout: config.api_timeout(),
        }
    }

    /// Resolve the provider from the config and environment.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ExamError> {
        Ok(Self::new(resolve_provider(config)?, config))
    }

    /// One chat round-trip with retries; returns the response text.
    async fn chat(&self, what: &str, messages: Vec<ChatMessage>) -> Result<String, ExamError> {
        let start = Instant::now();
        let (provider, options, timeout) = (&self.provider, &self.options, self.timeout);
        let messages = &messages;
        let response = self
            .retry
            .run(what, move || async move {
                match tokio::time::timeout(timeout, provider.chat(messages, Some(options))).await {
                    Ok(Ok(r)) => Ok(r),
                    Ok(Err(e)) => Err(ExamError::LlmApiError {
                        message: e.to_string(),
                    }),
                    Err(_) => Err(ExamError::LlmApiError {
                        message: format!("timed out after {}s", timeout.as_secs()),
                    }),
                }
            })
            .await?;

        debug!(
            "{}: {} input tokens, {} output tokens, {:?}",
            what,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(response.content)
    }
}

#[async_trait]
impl VisionModel for LlmVisionModel {
    async fn bounding_boxes(
        &self,
        page: &PageImage,
        instructions: &str,
    ) -> Result<Vec<Region>, ExamError> {
        let messages = vec![
            ChatMessage::system(instructions),
            ChatMessage::user_with_images(
                format!("This is page {}.", page.page_num),
                vec![to_image_data(&page.png)],
            ),
        ];
        let what = format!("page {} bounding boxes", page.page_num);
        let raw = self.chat(&what, messages).await?;
        parse_regions(&raw, page.page_num)
    }

    async fn extract_questions(
        &self,
        page: &PageImage,
        regions: &[Region],
        instructions: &str,
    ) -> Result<Vec<ExtractedQuestion>, ExamError> {
        let messages = vec![
            ChatMessage::system(instructions),
            ChatMessage::user_with_images(
                question_user_message(page.page_num, regions),
                vec![to_image_data(&page.png)],
            ),
        ];
        let what = format!("page {} questions", page.page_num);
        let raw = self.chat(&what, messages).await?;
        parse_questions(&raw, page.page_num)
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, ExamError> {
        let messages = vec![ChatMessage::system(system), ChatMessage::user(user)];
        let text = self.chat("explanation", messages).await?;
        Ok(text.trim().to_string())
    }
}

/// Embedder backed by an `edgequake-llm` embedding provider.
pub struct LlmEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
}

impl LlmEmbedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { provider }
    }

    /// Auto-detect the embedding provider from environment API keys.
    pub fn from_env() -> Result<Self, ExamError> {
        let (_llm, embedding) =
            ProviderFactory::from_env().map_err(|e| ExamError::ProviderNotConfigured {
                provider: "auto".to_string(),
                hint: format!(
                    "No embedding provider could be auto-detected from environment.\n\
                     Set OPENAI_API_KEY or configure a provider.\nError: {e}"
                ),
            })?;
        Ok(Self::new(embedding))
    }
}

#[async_trait]
impl Embedder for LlmEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ExamError> {
        let vectors = self
            .provider
            .embed(texts)
            .await
            .map_err(|e| ExamError::EmbeddingFailed(e.to_string()))?;
        if vectors.len() != texts.len() {
            return Err(ExamError::EmbeddingFailed(format!(
                "expected {} vectors, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }
}

fn build_options(config: &PipelineConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ExamError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ExamError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the chat provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider** (`config.provider_name`) with `config.model` or
///    [`DEFAULT_MODEL`]; the factory reads the matching API key variable.
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Auto-detection** via `ProviderFactory::from_env`.
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, ExamError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ExamError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                 Set OPENAI_API_KEY, GEMINI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                 Error: {e}"
            ),
        })?;

    Ok(llm_provider)
}
