//! Token-bounded document chunking.
//!
//! This module provides the [`Chunker`] trait and [`TokenChunker`], which walks
//! the token stream of a normalized document and emits chunks of at most
//! `max_tokens` tokens. Consecutive chunks share exactly `overlap_tokens`
//! tokens. Where possible a chunk ends on a sentence or paragraph boundary
//! found within a short look-back window of the hard limit.

use std::sync::Arc;

use tracing::debug;

use crate::config::RagConfig;
use crate::document::{Chunk, ChunkId, DocumentMetadata};
use crate::error::{RagError, Result};
use crate::tokenizer::{self, Token};

/// Maximum number of characters in a chunk's citation snippet.
pub const SNIPPET_CHARS: usize = 250;

/// Default number of tokens to look back for a natural boundary.
pub const DEFAULT_BOUNDARY_WINDOW: usize = 32;

/// A strategy for splitting a document's text into chunks.
///
/// Implementations produce [`Chunk`]s with text and metadata but no embeddings.
/// Embeddings are attached later by the index.
pub trait Chunker: Send + Sync {
    /// Split `text` into chunks owned by the document described by `metadata`.
    ///
    /// Returns an empty `Vec` if the text has no tokens.
    fn chunk(&self, text: &str, metadata: Arc<DocumentMetadata>) -> Result<Vec<Chunk>>;
}

/// Splits text by token count with an exact token overlap.
///
/// Chunk IDs are `{source}_{ordinal}`.
///
/// # Example
///
/// ```rust,ignore
/// use kb_rag::TokenChunker;
///
/// let chunker = TokenChunker::new(1000, 200)?;
/// let chunks = chunker.chunk(&text, metadata)?;
/// ```
#[derive(Debug, Clone)]
pub struct TokenChunker {
    max_tokens: usize,
    overlap_tokens: usize,
    boundary_window: usize,
}

impl TokenChunker {
    /// Create a chunker with the default boundary window.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if `max_tokens` is zero or
    /// `overlap_tokens >= max_tokens`.
    pub fn new(max_tokens: usize, overlap_tokens: usize) -> Result<Self> {
        if max_tokens == 0 {
            return Err(RagError::InvalidConfiguration("max_tokens must be greater than 0".into()));
        }
        if overlap_tokens >= max_tokens {
            return Err(RagError::InvalidConfiguration(format!(
                "overlap_tokens ({overlap_tokens}) must be less than max_tokens ({max_tokens})"
            )));
        }
        Ok(Self { max_tokens, overlap_tokens, boundary_window: DEFAULT_BOUNDARY_WINDOW })
    }

    /// Build a chunker from the chunking fields of a [`RagConfig`].
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        Ok(Self::new(config.chunk_size, config.chunk_overlap)?
            .with_boundary_window(config.boundary_window))
    }

    /// Set how many tokens to look back from the hard limit for a boundary.
    ///
    /// The effective window never exceeds `max_tokens - overlap_tokens - 1`,
    /// so every step advances by at least one token.
    pub fn with_boundary_window(mut self, window: usize) -> Self {
        self.boundary_window = window;
        self
    }

    /// Upper bound on tokens per chunk.
    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Tokens shared between consecutive chunks.
    pub fn overlap_tokens(&self) -> usize {
        self.overlap_tokens
    }

    fn effective_window(&self) -> usize {
        self.boundary_window.min(self.max_tokens - self.overlap_tokens - 1)
    }

    /// End (exclusive) of the chunk starting at `start`.
    fn chunk_end(&self, text: &str, tokens: &[Token], start: usize) -> usize {
        let hard_end = (start + self.max_tokens).min(tokens.len());
        if hard_end == tokens.len() {
            return hard_end;
        }
        let earliest = hard_end - self.effective_window();
        (earliest..=hard_end)
            .rev()
            .find(|&end| tokenizer::is_boundary(text, tokens, end - 1))
            .unwrap_or(hard_end)
    }
}

impl Chunker for TokenChunker {
    fn chunk(&self, text: &str, metadata: Arc<DocumentMetadata>) -> Result<Vec<Chunk>> {
        let tokens = tokenizer::tokenize(text);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let mut chunks = Vec::new();
        let mut start = 0;
        loop {
            let end = self.chunk_end(text, &tokens, start);
            let chunk_text = &text[tokens[start].start..tokens[end - 1].end];
            let ordinal = chunks.len();
            chunks.push(Chunk {
                id: ChunkId::new(metadata.source.clone(), ordinal),
                text: chunk_text.to_string(),
                snippet: snippet(chunk_text),
                start_token: start,
                end_token: end,
                overlap_tokens: if ordinal == 0 { 0 } else { self.overlap_tokens },
                embedding: Vec::new(),
                metadata: Arc::clone(&metadata),
            });

            if end == tokens.len() {
                break;
            }
            start = end - self.overlap_tokens;
        }

        debug!(
            document.id = %metadata.source,
            token_count = tokens.len(),
            chunk_count = chunks.len(),
            "chunked document"
        );
        Ok(chunks)
    }
}

/// Chunk `text` with the default boundary window.
pub fn chunk(
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
    metadata: Arc<DocumentMetadata>,
) -> Result<Vec<Chunk>> {
    TokenChunker::new(max_tokens, overlap_tokens)?.chunk(text, metadata)
}

/// Preview of a chunk: the first [`SNIPPET_CHARS`] characters, with `...` when cut.
pub fn snippet(text: &str) -> String {
    match text.char_indices().nth(SNIPPET_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::fixtures;

    fn numbered_words(n: usize) -> String {
        (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn rejects_overlap_not_below_max() {
        assert!(matches!(TokenChunker::new(10, 10), Err(RagError::InvalidConfiguration(_))));
        assert!(matches!(TokenChunker::new(0, 0), Err(RagError::InvalidConfiguration(_))));
    }

    #[test]
    fn short_document_is_one_chunk_equal_to_text() {
        let text = "A short note.\nWith two paragraphs.";
        let chunks = chunk(text, 100, 10, fixtures::metadata("note.txt", ".txt")).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
        assert_eq!(chunks[0].overlap_tokens, 0);
        assert_eq!(chunks[0].id, ChunkId::new("note.txt", 0));
    }

    #[test]
    fn prefers_sentence_boundary_within_window() {
        // 8 words, a full stop, then 8 more words: 17 tokens.
        let text = "one two three four five six seven eight. \
                    nine ten eleven twelve thirteen fourteen fifteen sixteen";
        let chunker = TokenChunker::new(12, 2).unwrap().with_boundary_window(5);
        let chunks = chunker.chunk(text, fixtures::metadata("s.txt", ".txt")).unwrap();
        assert_eq!(chunks[0].end_token, 9);
        assert!(chunks[0].text.ends_with("eight."));
        assert_eq!(chunks[1].start_token, 7);
    }

    #[test]
    fn falls_back_to_hard_limit_without_boundary() {
        let text = numbered_words(25);
        let chunks = chunk(&text, 10, 3, fixtures::metadata("d", ".txt")).unwrap();
        let spans: Vec<(usize, usize)> =
            chunks.iter().map(|c| (c.start_token, c.end_token)).collect();
        assert_eq!(spans, vec![(0, 10), (7, 17), (14, 24), (21, 25)]);
    }

    #[test]
    fn snippet_truncates_on_char_boundary() {
        let long = "é".repeat(300);
        let s = snippet(&long);
        assert_eq!(s.chars().count(), SNIPPET_CHARS + 3);
        assert!(s.ends_with("..."));
        assert_eq!(snippet("short"), "short");
    }
}
