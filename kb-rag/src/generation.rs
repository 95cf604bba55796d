//! Text generation capability used for query expansion and answer synthesis.

use async_trait::async_trait;
use serde::Serialize;

use crate::config::GenerationParams;
use crate::error::Result;

/// A single generation call: optional system instruction, user prompt and sampling parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub params: GenerationParams,
}

impl GenerationRequest {
    /// A request without a system instruction.
    pub fn new(prompt: impl Into<String>, params: GenerationParams) -> Self {
        Self { system: None, prompt: prompt.into(), params }
    }

    /// Set the system instruction.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// A language model that completes prompts.
///
/// Implementations wrap a chat or completion backend. Callers apply their own
/// timeouts; an implementation only reports backend failures.
///
/// # Example
///
/// ```rust,ignore
/// use kb_rag::{GenerationRequest, Generator};
///
/// let request = GenerationRequest::new("Summarize: ...", config.generation.clone());
/// let text = generator.generate(&request).await?;
/// ```
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}
