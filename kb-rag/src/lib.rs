//! # kb-rag
//!
//! Retrieval-augmented question answering over uploaded documents.
//!
//! ## Overview
//!
//! Documents go through extraction, chunking and embedding into an
//! [`EmbeddingIndex`]. Questions go through a multi-stage [`QueryPipeline`]
//! (expansion, filtered similarity search, thresholding, reranking) and an
//! [`AnswerSynthesizer`] that produces a grounded answer with citations and a
//! confidence score, which the model then grades. [`KnowledgeBase`] ties the
//! pieces together and also summarizes retrieved passages.
//!
//! - [`extract`] - plain text from PDF, DOCX, TXT and Markdown
//! - [`TokenChunker`] - token-bounded chunks with exact overlap
//! - [`EmbeddingIndex`] - per-document locking, JSON snapshots
//! - [`MetadataFilter`] - predicates over file type, language, source, topic and date
//! - [`KeywordOverlapReranker`] / [`RankDecayConfidence`] - default scoring
//! - [`HashingEmbeddingProvider`] - deterministic offline embeddings
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kb_rag::{HashingEmbeddingProvider, IngestFile, KnowledgeBase, QueryRequest, RagConfig};
//!
//! let kb = KnowledgeBase::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(HashingEmbeddingProvider::default()))
//!     .build()?;
//!
//! kb.ingest(vec![IngestFile::new("notes.txt", "Machine learning is ...")]).await?;
//! let response = kb.query(QueryRequest::new("What is machine learning?")).await?;
//! println!("{} ({:.2})", response.answer, response.confidence);
//! ```
//!
//! ## Features
//!
//! - `openai` - OpenAI-compatible embedding provider and chat generator

pub mod chunking;
pub mod confidence;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod evaluation;
pub mod extract;
pub mod filter;
pub mod generation;
pub mod index;
pub mod metadata;
#[cfg(feature = "openai")]
pub mod openai;
pub mod pipeline;
pub mod reranker;
pub mod service;
pub mod synthesis;
pub mod tokenizer;

pub use chunking::{Chunker, TokenChunker, chunk};
pub use confidence::{ConfidenceScorer, RankDecayConfidence};
pub use config::{GenerationParams, RagConfig, RagConfigBuilder, RerankWeights};
pub use document::{Chunk, ChunkId, DocumentMetadata, SearchResult};
pub use embedding::{EmbeddingProvider, HashingEmbeddingProvider};
pub use error::{RagError, Result};
pub use evaluation::{EvaluationCase, RetrievalMetrics, evaluate_retrieval};
pub use extract::{DocumentFormat, extract};
pub use filter::{Field, MetadataFilter, Predicate};
pub use generation::{GenerationRequest, Generator};
pub use index::{EmbeddingIndex, IndexOptions, IndexStats};
#[cfg(feature = "openai")]
pub use openai::{OpenAICompatibleGenerator, OpenAIEmbeddingProvider};
pub use pipeline::{Expansion, OVERFETCH_FACTOR, PipelineQuery, QueryOutcome, QueryPipeline};
pub use reranker::{KeywordOverlapReranker, NoOpReranker, Reranker};
pub use service::{
    DateRange, DocumentSummary, FileOutcome, FileStatus, HealthReport, HealthStatus, IngestFile,
    IngestReport, KnowledgeBase, KnowledgeBaseBuilder, QueryRequest, QueryResponse, RequestFilters,
    SourceRef, StatsResponse, SummaryResponse,
};
pub use synthesis::{Answer, AnswerStatus, AnswerSynthesizer, Citation, Grading};
