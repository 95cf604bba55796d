//! Error types for the `kb-rag` crate.

use thiserror::Error;

/// Errors that can occur in knowledge-base operations.
#[derive(Debug, Error)]
pub enum RagError {
    /// The declared document type is not one the extractor understands.
    #[error("Unsupported format: {declared}")]
    UnsupportedFormat {
        /// The declared type as supplied by the caller.
        declared: String,
    },

    /// The document could not be turned into text.
    #[error("Extraction failed for '{filename}': {message}")]
    Extraction {
        /// The offending file.
        filename: String,
        /// A description of the failure.
        message: String,
    },

    /// Chunking, weighting or index parameters are inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The embedding capability failed or returned unusable vectors.
    #[error("Embedding unavailable ({provider}): {message}")]
    EmbeddingUnavailable {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The generation capability failed while synthesizing an answer.
    #[error("Synthesis unavailable: {message}")]
    SynthesisUnavailable {
        /// A description of the failure.
        message: String,
    },

    /// An external capability did not answer in time.
    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The configured timeout.
        seconds: u64,
    },

    /// The query itself is unusable (empty text, wrong vector dimension).
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// The index snapshot could not be read or written.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// An I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A JSON (de)serialization error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RagError {
    /// Whether retrying the same operation later may succeed.
    ///
    /// Capability outages and timeouts are transient; bad input and bad
    /// configuration are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::EmbeddingUnavailable { .. }
                | RagError::SynthesisUnavailable { .. }
                | RagError::Timeout { .. }
        )
    }

    pub(crate) fn embedding(provider: impl Into<String>, message: impl Into<String>) -> Self {
        RagError::EmbeddingUnavailable { provider: provider.into(), message: message.into() }
    }

    pub(crate) fn extraction(filename: impl Into<String>, message: impl Into<String>) -> Self {
        RagError::Extraction { filename: filename.into(), message: message.into() }
    }
}

/// A convenience result type for knowledge-base operations.
pub type Result<T> = std::result::Result<T, RagError>;
