//! Reranker trait for re-scoring search results.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::config::RerankWeights;
use crate::document::SearchResult;
use crate::error::Result;
use crate::metadata::is_stopword;
use crate::tokenizer;

/// A reranker that re-scores search results.
///
/// Implementations set [`SearchResult::score`]; the caller sorts, truncates
/// and assigns ranks afterwards, so the returned order does not matter.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Rerank search results given the original query.
    async fn rerank(&self, query: &str, results: Vec<SearchResult>) -> Result<Vec<SearchResult>>;
}

/// A no-op reranker that keeps the similarity as the final score.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpReranker;

#[async_trait]
impl Reranker for NoOpReranker {
    async fn rerank(&self, _query: &str, results: Vec<SearchResult>) -> Result<Vec<SearchResult>> {
        Ok(results)
    }
}

/// Blends vector similarity with the share of query terms found in the chunk.
///
/// `score = weights.similarity * similarity + weights.keyword * overlap`, where
/// `overlap` is the fraction of significant query terms present among the
/// chunk's words. Significant terms are lower-cased words of at least two
/// characters that are not stopwords.
///
/// # Example
///
/// ```rust,ignore
/// use kb_rag::{KeywordOverlapReranker, RerankWeights};
///
/// let reranker = KeywordOverlapReranker::new(RerankWeights::default())?;
/// let reranked = reranker.rerank("machine learning", results).await?;
/// ```
#[derive(Debug, Clone, Copy)]
pub struct KeywordOverlapReranker {
    weights: RerankWeights,
}

impl KeywordOverlapReranker {
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`](crate::RagError::InvalidConfiguration)
    /// unless the weights are non-negative and sum to 1.
    pub fn new(weights: RerankWeights) -> Result<Self> {
        weights.validate()?;
        Ok(Self { weights })
    }

    /// The blend weights in use.
    pub fn weights(&self) -> RerankWeights {
        self.weights
    }
}

/// Distinct significant terms of `text`.
pub fn significant_terms(text: &str) -> BTreeSet<String> {
    tokenizer::words(text).filter(|w| w.chars().count() >= 2 && !is_stopword(w)).collect()
}

/// Fraction of `terms` that occur among the words of `text`; 0 when `terms` is empty.
pub fn keyword_overlap(terms: &BTreeSet<String>, text: &str) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }
    let words: BTreeSet<String> = tokenizer::words(text).collect();
    let matched = terms.iter().filter(|t| words.contains(*t)).count();
    matched as f32 / terms.len() as f32
}

#[async_trait]
impl Reranker for KeywordOverlapReranker {
    async fn rerank(
        &self,
        query: &str,
        mut results: Vec<SearchResult>,
    ) -> Result<Vec<SearchResult>> {
        let terms = significant_terms(query);
        for result in &mut results {
            let overlap = keyword_overlap(&terms, &result.chunk.text);
            result.score =
                self.weights.similarity * result.similarity + self.weights.keyword * overlap;
        }
        Ok(results)
    }
}
