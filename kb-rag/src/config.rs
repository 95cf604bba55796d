//! Configuration for chunking, retrieval, reranking and synthesis.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Tolerance used when checking that the rerank weights sum to one.
const WEIGHT_EPSILON: f32 = 1e-6;

/// Parameters passed to the generation capability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationParams {
    /// Model identifier understood by the generator.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum number of output tokens.
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: "meta-llama/llama-3-8b-instruct".to_string(),
            temperature: 0.7,
            max_tokens: 1000,
        }
    }
}

/// Weight pair combining raw similarity and keyword overlap during reranking.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RerankWeights {
    /// Weight of the raw cosine similarity.
    pub similarity: f32,
    /// Weight of the keyword-overlap score.
    pub keyword: f32,
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self { similarity: 0.7, keyword: 0.3 }
    }
}

impl RerankWeights {
    /// Check both weights are non-negative and sum to one.
    pub fn validate(&self) -> Result<()> {
        if self.similarity < 0.0 || self.keyword < 0.0 {
            return Err(RagError::InvalidConfiguration(format!(
                "rerank weights must be non-negative (similarity={}, keyword={})",
                self.similarity, self.keyword
            )));
        }
        if ((self.similarity + self.keyword) - 1.0).abs() > WEIGHT_EPSILON {
            return Err(RagError::InvalidConfiguration(format!(
                "rerank weights must sum to 1 (similarity={} + keyword={})",
                self.similarity, self.keyword
            )));
        }
        Ok(())
    }
}

/// Configuration parameters for the knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    /// Maximum chunk size in tokens.
    pub chunk_size: usize,
    /// Number of overlapping tokens between consecutive chunks.
    pub chunk_overlap: usize,
    /// How many tokens before the hard cutoff to search for a sentence or paragraph end.
    pub boundary_window: usize,
    /// Default number of results returned by a query.
    pub max_results: usize,
    /// Minimum raw similarity for a result to be kept.
    pub similarity_threshold: f32,
    /// Generation parameters used for synthesis.
    pub generation: GenerationParams,
    /// Whether queries are expanded with related terms before retrieval.
    pub expansion_enabled: bool,
    /// Output budget for the expansion call.
    pub expansion_max_tokens: u32,
    /// Whether generated answers are graded by the model.
    pub grading_enabled: bool,
    /// Weights for the keyword-overlap reranker.
    pub rerank_weights: RerankWeights,
    /// Geometric decay applied per rank when aggregating confidence.
    pub confidence_decay: f32,
    /// Number of top results contributing to confidence.
    pub confidence_top_n: usize,
    /// Number of texts sent per embedding call.
    pub embedding_batch_size: usize,
    /// Timeout for each embedding call, in seconds.
    pub embedding_timeout_secs: u64,
    /// Timeout for the query expansion call, in seconds.
    pub expansion_timeout_secs: u64,
    /// Timeout for the synthesis call, in seconds.
    pub generation_timeout_secs: u64,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            boundary_window: 32,
            max_results: 5,
            similarity_threshold: 0.3,
            generation: GenerationParams::default(),
            expansion_enabled: true,
            expansion_max_tokens: 80,
            grading_enabled: true,
            rerank_weights: RerankWeights::default(),
            confidence_decay: 0.7,
            confidence_top_n: 5,
            embedding_batch_size: 64,
            embedding_timeout_secs: 30,
            expansion_timeout_secs: 10,
            generation_timeout_secs: 60,
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Load a configuration from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: RagConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `KB_*` environment variables on top of `self`.
    ///
    /// Recognized: `KB_CHUNK_SIZE`, `KB_CHUNK_OVERLAP`, `KB_MAX_RESULTS`,
    /// `KB_MIN_SIMILARITY_THRESHOLD`, `KB_LLM_MODEL`, `KB_LLM_TEMPERATURE`,
    /// `KB_LLM_MAX_TOKENS`, `KB_EXPANSION_ENABLED`, `KB_GRADING_ENABLED`.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(v) = env_parse("KB_CHUNK_SIZE")? {
            self.chunk_size = v;
        }
        if let Some(v) = env_parse("KB_CHUNK_OVERLAP")? {
            self.chunk_overlap = v;
        }
        if let Some(v) = env_parse("KB_MAX_RESULTS")? {
            self.max_results = v;
        }
        if let Some(v) = env_parse("KB_MIN_SIMILARITY_THRESHOLD")? {
            self.similarity_threshold = v;
        }
        if let Ok(model) = std::env::var("KB_LLM_MODEL") {
            self.generation.model = model;
        }
        if let Some(v) = env_parse("KB_LLM_TEMPERATURE")? {
            self.generation.temperature = v;
        }
        if let Some(v) = env_parse("KB_LLM_MAX_TOKENS")? {
            self.generation.max_tokens = v;
        }
        if let Some(v) = env_parse("KB_EXPANSION_ENABLED")? {
            self.expansion_enabled = v;
        }
        if let Some(v) = env_parse("KB_GRADING_ENABLED")? {
            self.grading_enabled = v;
        }
        self.validate()?;
        Ok(self)
    }

    /// Defaults overlaid with the environment.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Check that the parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if:
    /// - `chunk_size == 0` or `chunk_overlap >= chunk_size`
    /// - `max_results == 0` or `embedding_batch_size == 0`
    /// - `similarity_threshold` is outside `[0, 1]`
    /// - the rerank weights are negative or do not sum to 1
    /// - `confidence_decay` is outside `(0, 1]` or `confidence_top_n == 0`
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::InvalidConfiguration(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::InvalidConfiguration(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.max_results == 0 {
            return Err(RagError::InvalidConfiguration(
                "max_results must be greater than zero".to_string(),
            ));
        }
        if self.embedding_batch_size == 0 {
            return Err(RagError::InvalidConfiguration(
                "embedding_batch_size must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(RagError::InvalidConfiguration(format!(
                "similarity_threshold ({}) must be within [0, 1]",
                self.similarity_threshold
            )));
        }
        self.rerank_weights.validate()?;
        if !(self.confidence_decay > 0.0 && self.confidence_decay <= 1.0) {
            return Err(RagError::InvalidConfiguration(format!(
                "confidence_decay ({}) must be within (0, 1]",
                self.confidence_decay
            )));
        }
        if self.confidence_top_n == 0 {
            return Err(RagError::InvalidConfiguration(
                "confidence_top_n must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Limit on a single embedding call.
    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_secs(self.embedding_timeout_secs)
    }

    /// Limit on the query-expansion call.
    pub fn expansion_timeout(&self) -> Duration {
        Duration::from_secs(self.expansion_timeout_secs)
    }

    /// Limit on each answer, grading, summary or keyword call.
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            RagError::InvalidConfiguration(format!("{key}={raw:?} could not be parsed: {e}"))
        }),
        Err(_) => Ok(None),
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the maximum chunk size in tokens.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in tokens.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the sentence-boundary lookback window in tokens.
    pub fn boundary_window(mut self, window: usize) -> Self {
        self.config.boundary_window = window;
        self
    }

    /// Set the default number of results per query.
    pub fn max_results(mut self, max_results: usize) -> Self {
        self.config.max_results = max_results;
        self
    }

    /// Set the minimum similarity threshold for filtering results.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = threshold;
        self
    }

    /// Set the generation parameters.
    pub fn generation(mut self, params: GenerationParams) -> Self {
        self.config.generation = params;
        self
    }

    /// Enable or disable query expansion.
    pub fn expansion_enabled(mut self, enabled: bool) -> Self {
        self.config.expansion_enabled = enabled;
        self
    }

    /// Enable or disable grading of generated answers.
    pub fn grading_enabled(mut self, enabled: bool) -> Self {
        self.config.grading_enabled = enabled;
        self
    }

    /// Set the rerank weight pair.
    pub fn rerank_weights(mut self, similarity: f32, keyword: f32) -> Self {
        self.config.rerank_weights = RerankWeights { similarity, keyword };
        self
    }

    /// Set the confidence decay and the number of contributing results.
    pub fn confidence(mut self, decay: f32, top_n: usize) -> Self {
        self.config.confidence_decay = decay;
        self.config.confidence_top_n = top_n;
        self
    }

    /// Set the number of texts per embedding call.
    pub fn embedding_batch_size(mut self, size: usize) -> Self {
        self.config.embedding_batch_size = size;
        self
    }

    /// Set the embedding, expansion and generation timeouts in seconds.
    pub fn timeouts(mut self, embedding: u64, expansion: u64, generation: u64) -> Self {
        self.config.embedding_timeout_secs = embedding;
        self.config.expansion_timeout_secs = expansion;
        self.config.generation_timeout_secs = generation;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// See [`RagConfig::validate`].
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(RagConfig::default().validate().is_ok());
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let err = RagConfig::builder().chunk_size(100).chunk_overlap(100).build().unwrap_err();
        assert!(matches!(err, RagError::InvalidConfiguration(_)));
    }

    #[test]
    fn rerank_weights_must_sum_to_one() {
        let err = RagConfig::builder().rerank_weights(0.5, 0.4).build().unwrap_err();
        assert!(err.to_string().contains("sum to 1"));
        assert!(RagConfig::builder().rerank_weights(0.25, 0.75).build().is_ok());
    }

    #[test]
    fn threshold_outside_unit_interval_is_rejected() {
        assert!(RagConfig::builder().similarity_threshold(1.5).build().is_err());
    }

    #[test]
    fn json_file_fills_missing_fields_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kb.json");
        std::fs::write(&path, r#"{"chunk_size": 300, "chunk_overlap": 50}"#).unwrap();

        let config = RagConfig::from_json_file(&path).unwrap();
        assert_eq!(config.chunk_size, 300);
        assert_eq!(config.chunk_overlap, 50);
        assert_eq!(config.max_results, RagConfig::default().max_results);
    }
}
