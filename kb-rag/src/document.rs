//! Data types for documents, chunks, and search results.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-document metadata, extracted once and shared by every chunk of the document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentMetadata {
    /// Source name; unique within an index and used as the delete key.
    pub source: String,
    /// Original filename as uploaded.
    pub filename: String,
    /// Lower-case extension with a leading dot, e.g. `.pdf`.
    pub file_type: String,
    /// Detected language code (`en`, `es`, ...) or `unknown`.
    pub language: String,
    /// Length of the normalized text in characters.
    pub text_length: usize,
    /// Number of whitespace-separated words in the normalized text.
    pub word_count: usize,
    /// Frequent keywords of the document.
    pub topics: Vec<String>,
    /// Date-like strings found in the text.
    pub dates: Vec<String>,
    /// Email addresses found in the text.
    pub emails: Vec<String>,
    /// URLs found in the text.
    pub urls: Vec<String>,
    /// Whether the text contains any digit.
    pub has_numbers: bool,
    /// Hex SHA-256 of the raw uploaded bytes.
    pub content_hash: String,
    /// When the document was ingested.
    pub ingested_at: DateTime<Utc>,
}

/// Identifier of a chunk: owning document plus ordinal.
///
/// Ordered by document, then ordinal, which gives search results a
/// deterministic tie-break.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkId {
    /// The owning document's source name.
    pub document: String,
    /// Position of the chunk within its document.
    pub ordinal: usize,
}

impl ChunkId {
    /// Id of chunk `ordinal` of `document`.
    pub fn new(document: impl Into<String>, ordinal: usize) -> Self {
        Self { document: document.into(), ordinal }
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.document, self.ordinal)
    }
}

/// A token-bounded slice of a document with its vector embedding.
///
/// The chunker produces chunks with an empty embedding; the index attaches the
/// vector on upsert and owns the chunk from then on.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Unique identifier for the chunk.
    pub id: ChunkId,
    /// The text content of the chunk.
    pub text: String,
    /// Short preview used when citing the chunk.
    pub snippet: String,
    /// First token of the chunk (inclusive) in the document's token stream.
    pub start_token: usize,
    /// Last token of the chunk (exclusive).
    pub end_token: usize,
    /// Number of tokens shared with the previous chunk.
    pub overlap_tokens: usize,
    /// The vector embedding for this chunk's text.
    pub embedding: Vec<f32>,
    /// Metadata of the owning document.
    pub metadata: Arc<DocumentMetadata>,
}

impl Chunk {
    /// Number of tokens covered by the chunk.
    pub fn token_count(&self) -> usize {
        self.end_token - self.start_token
    }

    /// The owning document's source name.
    pub fn document_id(&self) -> &str {
        &self.id.document
    }
}

/// A retrieved [`Chunk`] with its scores.
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// The retrieved chunk, shared read-only with the index.
    pub chunk: Arc<Chunk>,
    /// Cosine similarity clamped to `[0, 1]`.
    pub similarity: f32,
    /// Score after reranking; equal to `similarity` until a reranker runs.
    pub score: f32,
    /// 1-based position in the final ranking; 0 until ranked.
    pub rank: usize,
}

impl SearchResult {
    pub(crate) fn new(chunk: Arc<Chunk>, similarity: f32) -> Self {
        Self { chunk, similarity, score: similarity, rank: 0 }
    }
}

/// Sort by score descending, breaking ties by ascending chunk id.
pub(crate) fn sort_by_score(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score.total_cmp(&a.score).then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn metadata(source: &str, file_type: &str) -> Arc<DocumentMetadata> {
        Arc::new(DocumentMetadata {
            source: source.to_string(),
            filename: source.to_string(),
            file_type: file_type.to_string(),
            language: "en".to_string(),
            text_length: 0,
            word_count: 0,
            topics: Vec::new(),
            dates: Vec::new(),
            emails: Vec::new(),
            urls: Vec::new(),
            has_numbers: false,
            content_hash: String::new(),
            ingested_at: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
        })
    }

    pub fn chunk(source: &str, ordinal: usize, text: &str) -> Chunk {
        Chunk {
            id: ChunkId::new(source, ordinal),
            text: text.to_string(),
            snippet: text.to_string(),
            start_token: 0,
            end_token: 1,
            overlap_tokens: 0,
            embedding: Vec::new(),
            metadata: metadata(source, ".txt"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ids_order_by_document_then_ordinal() {
        let mut ids = vec![ChunkId::new("b", 0), ChunkId::new("a", 10), ChunkId::new("a", 2)];
        ids.sort();
        assert_eq!(ids, vec![ChunkId::new("a", 2), ChunkId::new("a", 10), ChunkId::new("b", 0)]);
        assert_eq!(ids[1].to_string(), "a_10");
    }

    #[test]
    fn ties_break_on_chunk_id() {
        let mut results = vec![
            SearchResult::new(Arc::new(fixtures::chunk("b", 0, "x")), 0.5),
            SearchResult::new(Arc::new(fixtures::chunk("a", 1, "y")), 0.5),
            SearchResult::new(Arc::new(fixtures::chunk("c", 0, "z")), 0.9),
        ];
        sort_by_score(&mut results);
        let order: Vec<String> = results.iter().map(|r| r.chunk.id.to_string()).collect();
        assert_eq!(order, vec!["c_0", "a_1", "b_0"]);
    }
}
