//! Embedding provider trait for generating vector embeddings from text.

use async_trait::async_trait;

use crate::error::{RagError, Result};
use crate::tokenizer;

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap specific embedding backends (OpenAI, local models,
/// etc.) behind a unified async interface. The default
/// [`embed_batch`](EmbeddingProvider::embed_batch) implementation calls
/// [`embed`](EmbeddingProvider::embed) sequentially; backends that support
/// native batching should override it.
///
/// # Example
///
/// ```rust,ignore
/// use kb_rag::EmbeddingProvider;
///
/// let provider = MyEmbeddingProvider::new();
/// let embedding = provider.embed("hello world").await?;
/// assert_eq!(embedding.len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embedding vectors for a batch of text inputs.
    ///
    /// The default implementation calls [`embed`](EmbeddingProvider::embed)
    /// sequentially for each input. Override this method if the backend
    /// supports native batch embedding for better throughput.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// Identifier of the embedding model, recorded in index snapshots.
    fn model_name(&self) -> &str;

    /// Check that the backend is reachable.
    ///
    /// The default implementation embeds a short sample text.
    async fn ping(&self) -> Result<()> {
        self.embed("ping").await.map(|_| ())
    }
}

/// Default dimensionality of [`HashingEmbeddingProvider`].
pub const DEFAULT_HASHING_DIMENSIONS: usize = 384;

const BIGRAM_WEIGHT: f32 = 0.5;

/// Deterministic bag-of-words embedder using feature hashing.
///
/// Every lower-cased word and every adjacent word pair is hashed into one of
/// `dimensions` buckets with a hash-derived sign; the result is L2-normalized.
/// Texts sharing vocabulary get high cosine similarity, which is enough for
/// offline use and tests. Text without words embeds as the zero vector.
#[derive(Debug, Clone)]
pub struct HashingEmbeddingProvider {
    dimensions: usize,
    model_name: String,
}

impl HashingEmbeddingProvider {
    /// A provider producing `dimensions`-long vectors; zero is rejected.
    pub fn new(dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(RagError::InvalidConfiguration("dimensions must be greater than 0".into()));
        }
        Ok(Self { dimensions, model_name: format!("hashing-bow-{dimensions}") })
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let words: Vec<String> = tokenizer::words(text).collect();

        for word in &words {
            self.accumulate(&mut vector, word.as_bytes(), 1.0);
        }
        for pair in words.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.accumulate(&mut vector, bigram.as_bytes(), BIGRAM_WEIGHT);
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }

    fn accumulate(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let hash = fnv1a(feature);
        let bucket = (hash % self.dimensions as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

impl Default for HashingEmbeddingProvider {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_HASHING_DIMENSIONS,
            model_name: format!("hashing-bow-{DEFAULT_HASHING_DIMENSIONS}"),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_sync(text)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// 64-bit FNV-1a; stable across builds so persisted vectors stay comparable.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes.iter().fold(OFFSET, |hash, &b| (hash ^ u64::from(b)).wrapping_mul(PRIME))
}

/// Cosine similarity of two equal-length vectors; 0 when either has zero norm.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 { 0.0 } else { dot / denom }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashing_is_deterministic_and_normalized() {
        let provider = HashingEmbeddingProvider::new(64).unwrap();
        let a = provider.embed("Machine learning models").await.unwrap();
        let b = provider.embed("machine LEARNING models").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn shared_vocabulary_scores_higher() {
        let provider = HashingEmbeddingProvider::default();
        let query = provider.embed("machine learning").await.unwrap();
        let related = provider.embed("an introduction to machine learning").await.unwrap();
        let unrelated = provider.embed("baking sourdough bread at home").await.unwrap();
        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[tokio::test]
    async fn empty_text_is_zero_vector() {
        let provider = HashingEmbeddingProvider::new(8).unwrap();
        let v = provider.embed("  ...  ").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
        assert_eq!(cosine_similarity(&v, &v), 0.0);
    }

    #[test]
    fn zero_dimensions_rejected() {
        assert!(HashingEmbeddingProvider::new(0).is_err());
    }
}
