//! LLM provider trait.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::LlmResult;
use crate::types::{Message, StreamEvent};

/// Type alias for boxed completion streams.
pub type StreamBox = Pin<Box<dyn Stream<Item = LlmResult<StreamEvent>> + Send>>;

/// A language-model backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name.
    fn name(&self) -> &str;

    /// Model in use.
    fn model(&self) -> &str;

    /// Complete and return the full reply text.
    async fn complete(&self, messages: &[Message]) -> LlmResult<String>;

    /// Stream a completion as text deltas.
    async fn stream(&self, messages: &[Message]) -> LlmResult<StreamBox>;

    /// One-shot prompt without conversation structure.
    async fn complete_simple(&self, prompt: &str) -> LlmResult<String> {
        self.complete(&[Message::user(prompt)]).await
    }
}

/// Blanket implementation so `Box<dyn LlmProvider>` satisfies `P:
/// LlmProvider` bounds.
#[async_trait]
impl LlmProvider for Box<dyn LlmProvider> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn model(&self) -> &str {
        (**self).model()
    }

    async fn complete(&self, messages: &[Message]) -> LlmResult<String> {
        (**self).complete(messages).await
    }

    async fn stream(&self, messages: &[Message]) -> LlmResult<StreamBox> {
        (**self).stream(messages).await
    }
}

/// Configuration for HTTP providers.
#[derive(Clone)]
pub struct ProviderConfig {
    /// Chat-completions endpoint URL.
    pub base_url: String,
    /// Model name.
    pub model: String,
    /// API key, when the endpoint requires one.
    pub api_key: Option<String>,
    /// Maximum tokens to generate.
    pub max_tokens: usize,
    /// Sampling temperature.
    pub temperature: f64,
}

impl ProviderConfig {
    /// Create a config for an endpoint and model.
    #[must_use]
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key: None,
            max_tokens: 2048,
            temperature: 0.7,
        }
    }

    /// Attach an API key.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the sampling temperature, clamped to `[0, 1]`.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature.clamp(0.0, 1.0);
        self
    }

    /// Set the generation budget.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("has_api_key", &self.api_key.is_some())
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}
