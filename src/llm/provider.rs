use crate::llm::types::{LlmError, LlmRequest, LlmResponse};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Incremental content fragments from a streaming completion, in arrival order.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// Generic trait for vision-capable LLM providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get the name of this provider
    fn name(&self) -> &str;

    /// Whether a credential is available without a per-request override
    fn has_credentials(&self) -> bool;

    /// Generate a complete response in one round trip
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Open a streaming completion. Errors before the first fragment are
    /// returned directly; later failures arrive as stream items.
    async fn generate_stream(&self, request: LlmRequest) -> Result<TokenStream, LlmError>;
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub api_base_url: String,
    pub image_detail: String,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, api_base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_base_url: api_base_url.into(),
            image_detail: "high".to_string(),
        }
    }

    pub fn with_image_detail(mut self, detail: impl Into<String>) -> Self {
        self.image_detail = detail.into();
        self
    }
}
