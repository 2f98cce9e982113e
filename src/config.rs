//! Configuration for paper extraction.
//!
//! Every knob of a pipeline run lives in [`PipelineConfig`], built via
//! [`PipelineConfigBuilder`]. Infrastructure handles (database, blob store,
//! model clients) are *not* configuration; they are created once at process
//! start and passed in through [`crate::extract::PipelineDeps`].
//!
//! # Design choice: builder over constructor
//! The builder clamps numeric inputs to sane ranges as they are set and
//! `build()` rejects the combinations clamping cannot fix, so a config that
//! exists is a config the pipeline can run.

use crate::error::ExamError;
use crate::progress::ExtractionProgressCallback;
use crate::retry::RetryPolicy;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for extracting questions from one paper.
///
/// # Example
/// ```rust
/// use edgequake_exam2quiz::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .model("gpt-4.1")
///     .rerun(true)
///     .rerun_delay_secs(30)
///     .build()
///     .unwrap();
/// assert!(config.rerun);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Rendering DPI. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Cap on either rendered edge in pixels. Default: 2000.
    ///
    /// Diagram labels and option letters on A4 papers stay legible at 2000 px;
    /// beyond that the model gains nothing and requests get slow.
    pub max_rendered_pixels: u32,

    /// Model identifier, e.g. "gpt-4.1", "gemini-2.5-pro". Provider default when None.
    pub model: Option<String>,

    /// Provider name ("openai", "gemini", "anthropic", "ollama", …).
    pub provider_name: Option<String>,

    /// Pre-constructed provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0.
    ///
    /// Transcription wants the most likely reading of the page, every time.
    pub temperature: f32,

    /// Maximum output tokens per model call. Default: 8192.
    ///
    /// A dense page of ten MCQs with options and a printed answer table
    /// serialises to roughly 3–5k tokens of JSON.
    pub max_tokens: usize,

    /// Retry policy for model calls (transport failures only).
    pub model_retry: RetryPolicy,

    /// Retry policy for embedding calls. Default: 3 attempts, 1 s base.
    pub label_retry: RetryPolicy,

    /// Per model call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Run the whole extraction a second time and merge the runs. Default: false.
    pub rerun: bool,

    /// Wait between the primary run and the re-run, in seconds. Default: 60.
    ///
    /// Most providers meter vision tokens per minute; starting the second
    /// run immediately tends to hit 429s on long papers.
    pub rerun_delay_secs: u64,

    /// Label extracted questions against the subject's topic catalog. Default: true.
    pub label_topics: bool,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// PDF user password for encrypted papers.
    pub password: Option<String>,

    /// Optional progress callback.
    pub progress_callback: Option<Arc<dyn ExtractionProgressCallback>>,

    /// Override for the bounding-box system prompt.
    pub bounding_box_prompt: Option<String>,

    /// Override for the question-extraction system prompt.
    pub question_prompt: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            max_rendered_pixels: 2000,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 8192,
            model_retry: RetryPolicy::default(),
            label_retry: RetryPolicy::embeddings(),
            api_timeout_secs: 120,
            rerun: false,
            rerun_delay_secs: 60,
            label_topics: true,
            download_timeout_secs: 120,
            password: None,
            progress_callback: None,
            bounding_box_prompt: None,
            question_prompt: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("model_retry", &self.model_retry)
            .field("label_retry", &self.label_retry)
            .field("rerun", &self.rerun)
            .field("rerun_delay_secs", &self.rerun_delay_secs)
            .field("label_topics", &self.label_topics)
            .finish()
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn rerun_delay(&self) -> Duration {
        Duration::from_secs(self.rerun_delay_secs)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    /// Bounding-box instructions, honouring the override.
    pub fn bounding_box_instructions(&self) -> &str {
        self.bounding_box_prompt
            .as_deref()
            .unwrap_or(crate::prompts::BOUNDING_BOX_PROMPT)
    }

    /// Question-extraction instructions, honouring the override.
    pub fn question_instructions(&self) -> &str {
        self.question_prompt
            .as_deref()
            .unwrap_or(crate::prompts::QUESTION_PROMPT)
    }
}

/// Builder for [`PipelineConfig`].
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl fmt::Debug for PipelineConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl PipelineConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn model_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.model_retry = policy;
        self
    }

    pub fn label_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.label_retry = policy;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn rerun(mut self, v: bool) -> Self {
        self.config.rerun = v;
        self
    }

    pub fn rerun_delay_secs(mut self, secs: u64) -> Self {
        self.config.rerun_delay_secs = secs;
        self
    }

    pub fn label_topics(mut self, v: bool) -> Self {
        self.config.label_topics = v;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn ExtractionProgressCallback>) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn bounding_box_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.bounding_box_prompt = Some(prompt.into());
        self
    }

    pub fn question_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.question_prompt = Some(prompt.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, ExamError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(ExamError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.max_tokens == 0 {
            return Err(ExamError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(ExamError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        if c.model_retry.max_attempts == 0 || c.label_retry.max_attempts == 0 {
            return Err(ExamError::InvalidConfig(
                "retry policies need at least one attempt".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = PipelineConfig::default();
        assert_eq!(c.dpi, 150);
        assert_eq!(c.rerun_delay(), Duration::from_secs(60));
        assert!(!c.rerun);
        assert!(c.label_topics);
        assert_eq!(c.label_retry.max_attempts, 3);
        assert_eq!(c.label_retry.base_delay, Duration::from_secs(1));
    }

    #[test]
    fn builder_clamps() {
        let c = PipelineConfig::builder()
            .dpi(10)
            .temperature(9.0)
            .max_rendered_pixels(5)
            .build()
            .unwrap();
        assert_eq!(c.dpi, 72);
        assert_eq!(c.temperature, 2.0);
        assert_eq!(c.max_rendered_pixels, 100);
    }

    #[test]
    fn builder_rejects_zero_tokens() {
        let err = PipelineConfig::builder().max_tokens(0).build().unwrap_err();
        assert!(matches!(err, ExamError::InvalidConfig(_)));
    }

    #[test]
    fn prompt_overrides() {
        let c = PipelineConfig::builder()
            .question_prompt("custom")
            .build()
            .unwrap();
        assert_eq!(c.question_instructions(), "custom");
        assert_eq!(
            c.bounding_box_instructions(),
            crate::prompts::BOUNDING_BOX_PROMPT
        );
    }
}
