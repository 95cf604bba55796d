//! OpenAI-compatible HTTP adapters for embeddings and chat completions.
//!
//! This module is only available when the `openai` feature is enabled. Both
//! adapters talk to any endpoint implementing the OpenAI wire format
//! (OpenAI itself, OpenRouter, local gateways) through a configurable base URL.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generation::{GenerationRequest, Generator};

/// Base URL of the OpenAI API.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Base URL of the OpenRouter API.
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{path}", base_url.trim_end_matches('/'))
}

fn require_key(provider: &str, api_key: String) -> Result<String> {
    if api_key.trim().is_empty() {
        return Err(RagError::InvalidConfiguration(format!("{provider} API key must not be empty")));
    }
    Ok(api_key)
}

/// Read the first of `vars` that is set and non-empty.
fn key_from_env(provider: &str, vars: &[&str]) -> Result<String> {
    vars.iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
        .ok_or_else(|| {
            let names = vars.join(", ");
            RagError::InvalidConfiguration(format!("{provider}: none of {names} is set"))
        })
}

/// Body text of a failed response, preferring the API's own error message.
async fn error_detail(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail =
        serde_json::from_str::<ErrorResponse>(&body).map(|e| e.error.message).unwrap_or(body);
    format!("API returned {status}: {detail}")
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// An [`EmbeddingProvider`] backed by an OpenAI-compatible `/embeddings` endpoint.
///
/// # Configuration
///
/// - `model` – defaults to `text-embedding-3-small`.
/// - `dimensions` – optional Matryoshka dimension override.
/// - `base_url` – defaults to the OpenAI API.
/// - `api_key` – from the constructor or the `OPENAI_API_KEY` environment variable.
///
/// # Example
///
/// ```rust,ignore
/// use kb_rag::openai::OpenAIEmbeddingProvider;
///
/// let provider = OpenAIEmbeddingProvider::new("sk-...")?;
/// let embedding = provider.embed("hello world").await?;
/// ```
pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
    /// If set, passed to the API for Matryoshka dimension truncation.
    request_dimensions: Option<usize>,
}

impl OpenAIEmbeddingProvider {
    /// Create a new provider with the given API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            api_key: require_key("OpenAI", api_key.into())?,
            base_url: OPENAI_BASE_URL.into(),
            model: DEFAULT_EMBEDDING_MODEL.into(),
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            request_dimensions: None,
        })
    }

    /// Create a new provider using the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        Self::new(key_from_env("OpenAI", &["OPENAI_API_KEY"])?)
    }

    /// Set the model name (e.g. `text-embedding-3-large`).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the output dimensions (Matryoshka support).
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self.request_dimensions = Some(dims);
        self
    }

    /// Point at another OpenAI-compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .pop()
            .ok_or_else(|| RagError::embedding(&self.model, "API returned empty response"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(model = %self.model, batch_size = texts.len(), "embedding batch");

        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.request_dimensions,
        };
        let response = self
            .client
            .post(endpoint(&self.base_url, "embeddings"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(model = %self.model, error = %e, "embedding request failed");
                RagError::embedding(&self.model, format!("request failed: {e}"))
            })?;

        if !response.status().is_success() {
            let detail = error_detail(response).await;
            error!(model = %self.model, detail = %detail, "embedding API error");
            return Err(RagError::embedding(&self.model, detail));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| {
                RagError::embedding(&self.model, format!("failed to parse response: {e}"))
            })?;
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// A [`Generator`] backed by an OpenAI-compatible `/chat/completions` endpoint.
///
/// Defaults to OpenRouter, reading `OPENROUTER_API_KEY` or `OPENAI_API_KEY`.
/// The model, temperature and token limit come from each
/// [`GenerationRequest`].
///
/// # Example
///
/// ```rust,ignore
/// use kb_rag::openai::OpenAICompatibleGenerator;
///
/// let generator = OpenAICompatibleGenerator::from_env()?;
/// let answer = generator.generate(&request).await?;
/// ```
pub struct OpenAICompatibleGenerator {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAICompatibleGenerator {
    /// A generator for the default model and base URL.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            api_key: require_key("chat", api_key.into())?,
            base_url: OPENROUTER_BASE_URL.into(),
        })
    }

    /// Key from `OPENROUTER_API_KEY` or `OPENAI_API_KEY`; `KB_LLM_BASE_URL` overrides the endpoint.
    pub fn from_env() -> Result<Self> {
        let api_key = key_from_env("chat", &["OPENROUTER_API_KEY", "OPENAI_API_KEY"])?;
        let mut generator = Self::new(api_key)?;
        if let Ok(base_url) = std::env::var("KB_LLM_BASE_URL") {
            generator.base_url = base_url;
        }
        Ok(generator)
    }

    /// Point at another OpenAI-compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Deserialize)]
struct ChatContent {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl Generator for OpenAICompatibleGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let unavailable = |message: String| RagError::SynthesisUnavailable { message };

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage { role: "system", content: system });
        }
        messages.push(ChatMessage { role: "user", content: &request.prompt });

        let body = ChatRequest {
            model: &request.params.model,
            messages,
            temperature: request.params.temperature,
            max_tokens: request.params.max_tokens,
        };
        debug!(model = %request.params.model, prompt_len = request.prompt.len(), "chat completion");

        let response = self
            .client
            .post(endpoint(&self.base_url, "chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| unavailable(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let detail = error_detail(response).await;
            error!(model = %request.params.model, detail = %detail, "chat API error");
            return Err(unavailable(detail));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| unavailable(format!("failed to parse response: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| unavailable("API returned no choices".into()))
    }
}
