//! Multi-stage retrieval: expansion, similarity search, threshold and rerank.
//!
//! The [`QueryPipeline`] turns a query into a ranked list of chunks. It never
//! writes to the index, so dropping a query future mid-flight is harmless.
//!
//! # Example
//!
//! ```rust,ignore
//! use kb_rag::{QueryPipeline, RagConfig, PipelineQuery};
//!
//! let pipeline = QueryPipeline::builder()
//!     .config(RagConfig::default())
//!     .index(Arc::clone(&index))
//!     .generator(Arc::new(my_generator))
//!     .build()?;
//!
//! match pipeline.run(&PipelineQuery::new("what is machine learning?")).await? {
//!     QueryOutcome::Answered { results, .. } => { /* ranked chunks */ }
//!     QueryOutcome::NoResults { .. } => { /* nothing above the threshold */ }
//! }
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{GenerationParams, RagConfig};
use crate::document::{SearchResult, sort_by_score};
use crate::error::{RagError, Result};
use crate::filter::MetadataFilter;
use crate::generation::{GenerationRequest, Generator};
use crate::index::EmbeddingIndex;
use crate::reranker::{KeywordOverlapReranker, Reranker};

/// Candidates fetched per requested result, to leave the reranker room to reorder.
pub const OVERFETCH_FACTOR: usize = 3;

const EXPANSION_TEMPERATURE: f32 = 0.4;

/// What happened to query expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Expansion {
    /// Expansion is switched off or no generator is configured.
    Disabled,
    /// The generator proposed related terms, appended to the retrieval text.
    Expanded { terms: String },
    /// Expansion failed or timed out; the original query was used alone.
    Degraded { reason: String },
}

/// A query as the pipeline sees it.
#[derive(Debug, Clone, Default)]
pub struct PipelineQuery {
    pub text: String,
    /// Maximum number of results; the configured default when `None`.
    pub limit: Option<usize>,
    /// Minimum raw similarity; the configured default when `None`.
    pub threshold: Option<f32>,
    pub filter: MetadataFilter,
}

impl PipelineQuery {
    /// A query using the configured limit and threshold.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), ..Self::default() }
    }

    /// Override the result limit.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Override the similarity threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Restrict retrieval to matching documents.
    pub fn with_filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// Result of a successful pipeline run.
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    /// Ranked results, best first, ranks assigned from 1.
    Answered { results: Vec<SearchResult>, expansion: Expansion },
    /// Nothing passed the similarity threshold.
    NoResults { expansion: Expansion },
}

impl QueryOutcome {
    /// How query expansion went, whatever the outcome.
    pub fn expansion(&self) -> &Expansion {
        match self {
            Self::Answered { expansion, .. } | Self::NoResults { expansion } => expansion,
        }
    }

    /// The ranked results; empty for [`QueryOutcome::NoResults`].
    pub fn into_results(self) -> Vec<SearchResult> {
        match self {
            Self::Answered { results, .. } => results,
            Self::NoResults { .. } => Vec::new(),
        }
    }
}

/// Retrieval pipeline over an [`EmbeddingIndex`].
///
/// Construct one via [`QueryPipeline::builder()`].
pub struct QueryPipeline {
    config: RagConfig,
    index: Arc<EmbeddingIndex>,
    generator: Option<Arc<dyn Generator>>,
    reranker: Arc<dyn Reranker>,
}

impl QueryPipeline {
    /// Create a new [`QueryPipelineBuilder`].
    pub fn builder() -> QueryPipelineBuilder {
        QueryPipelineBuilder::default()
    }

    /// The configuration in effect.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// The index queries run against.
    pub fn index(&self) -> &Arc<EmbeddingIndex> {
        &self.index
    }

    /// Run expansion, retrieval, thresholding and reranking.
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidQuery`] for an empty query, a zero limit or a
    ///   threshold outside `[0, 1]`.
    /// - [`RagError::EmbeddingUnavailable`] / [`RagError::Timeout`] if the
    ///   query cannot be embedded.
    pub async fn run(&self, query: &PipelineQuery) -> Result<QueryOutcome> {
        let (limit, threshold) = self.validate(query)?;

        let expansion = self.expand(&query.text).await;
        let retrieval_text = match &expansion {
            Expansion::Expanded { terms } => format!("{} {terms}", query.text),
            _ => query.text.clone(),
        };

        let results =
            self.retrieve(&query.text, &retrieval_text, limit, threshold, &query.filter).await?;
        info!(result_count = results.len(), expansion = ?expansion, "query completed");

        if results.is_empty() {
            Ok(QueryOutcome::NoResults { expansion })
        } else {
            Ok(QueryOutcome::Answered { results, expansion })
        }
    }

    /// Retrieval, thresholding and reranking without query expansion.
    pub async fn retrieve_only(&self, query: &PipelineQuery) -> Result<Vec<SearchResult>> {
        let (limit, threshold) = self.validate(query)?;
        self.retrieve(&query.text, &query.text, limit, threshold, &query.filter).await
    }

    fn validate(&self, query: &PipelineQuery) -> Result<(usize, f32)> {
        if query.text.trim().is_empty() {
            return Err(RagError::InvalidQuery("query text is empty".into()));
        }
        let limit = query.limit.unwrap_or(self.config.max_results);
        if limit == 0 {
            return Err(RagError::InvalidQuery("result limit must be at least 1".into()));
        }
        let threshold = query.threshold.unwrap_or(self.config.similarity_threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(RagError::InvalidQuery(format!(
                "similarity threshold must be in [0, 1], got {threshold}"
            )));
        }
        Ok((limit, threshold))
    }

    async fn expand(&self, query: &str) -> Expansion {
        let generator = match &self.generator {
            Some(generator) if self.config.expansion_enabled => generator,
            _ => return Expansion::Disabled,
        };

        let params = GenerationParams {
            temperature: EXPANSION_TEMPERATURE,
            max_tokens: self.config.expansion_max_tokens,
            ..self.config.generation.clone()
        };
        let request = GenerationRequest::new(
            format!(
                "Generate a few related terms and synonyms for this query: '{query}'. \
                 Keep it concise."
            ),
            params,
        );

        let timeout = self.config.expansion_timeout();
        match tokio::time::timeout(timeout, generator.generate(&request)).await {
            Ok(Ok(text)) => {
                let terms = text.split_whitespace().collect::<Vec<_>>().join(" ");
                if terms.is_empty() {
                    Expansion::Degraded { reason: "generator returned no terms".into() }
                } else {
                    debug!(terms = %terms, "expanded query");
                    Expansion::Expanded { terms }
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "query expansion failed, using original query");
                Expansion::Degraded { reason: e.to_string() }
            }
            Err(_) => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "query expansion timed out, using original query"
                );
                Expansion::Degraded { reason: format!("timed out after {}s", timeout.as_secs()) }
            }
        }
    }

    async fn retrieve(
        &self,
        query: &str,
        retrieval_text: &str,
        limit: usize,
        threshold: f32,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchResult>> {
        let vector = self.index.embed_query(retrieval_text).await?;
        let k = limit.saturating_mul(OVERFETCH_FACTOR).max(limit);
        let candidates = self.index.search(&vector, k, filter).await?;
        let candidate_count = candidates.len();

        let kept: Vec<SearchResult> =
            candidates.into_iter().filter(|r| r.similarity >= threshold).collect();
        debug!(candidate_count, kept = kept.len(), threshold, "applied similarity threshold");
        if kept.is_empty() {
            return Ok(kept);
        }

        let mut results = self.reranker.rerank(query, kept).await?;
        sort_by_score(&mut results);
        results.truncate(limit);
        for (i, result) in results.iter_mut().enumerate() {
            result.rank = i + 1;
        }
        Ok(results)
    }
}

/// Builder for constructing a [`QueryPipeline`].
///
/// `config` and `index` are required. Without a reranker the pipeline uses a
/// [`KeywordOverlapReranker`] with the configured weights; without a generator
/// expansion is [`Expansion::Disabled`].
#[derive(Default)]
pub struct QueryPipelineBuilder {
    config: Option<RagConfig>,
    index: Option<Arc<EmbeddingIndex>>,
    generator: Option<Arc<dyn Generator>>,
    reranker: Option<Arc<dyn Reranker>>,
}

impl QueryPipelineBuilder {
    /// Set the configuration; [`RagConfig::default`] when not set.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the index to query; required.
    pub fn index(mut self, index: Arc<EmbeddingIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Set the generator used for query expansion.
    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Replace the default keyword-overlap reranker.
    pub fn reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Build the [`QueryPipeline`], validating that all required fields are set.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if a required field is
    /// missing or the configuration does not validate.
    pub fn build(self) -> Result<QueryPipeline> {
        let config = self
            .config
            .ok_or_else(|| RagError::InvalidConfiguration("config is required".to_string()))?;
        config.validate()?;
        let index = self
            .index
            .ok_or_else(|| RagError::InvalidConfiguration("index is required".to_string()))?;
        let reranker = match self.reranker {
            Some(reranker) => reranker,
            None => Arc::new(KeywordOverlapReranker::new(config.rerank_weights)?),
        };

        Ok(QueryPipeline { config, index, generator: self.generator, reranker })
    }
}
