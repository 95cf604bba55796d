//! The knowledge-base orchestrator and its request/response types.
//!
//! [`KnowledgeBase`] composes extraction, chunking and the index for
//! ingestion, and the query pipeline plus the answer synthesizer for
//! questions. Every type exchanged with callers is serde-serializable so a
//! transport layer can expose them directly.
//!
//! # Example
//!
//! ```rust,ignore
//! use kb_rag::{HashingEmbeddingProvider, IngestFile, KnowledgeBase, QueryRequest, RagConfig};
//!
//! let kb = KnowledgeBase::builder()
//!     .config(RagConfig::from_env()?)
//!     .embedding_provider(Arc::new(HashingEmbeddingProvider::default()))
//!     .generator(Arc::new(my_generator))
//!     .build()?;
//!
//! kb.ingest(vec![IngestFile::new("notes.md", bytes)]).await?;
//! let response = kb.query(QueryRequest::new("what is machine learning?")).await?;
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::chunking::{Chunker, TokenChunker};
use crate::confidence::{ConfidenceScorer, RankDecayConfidence};
use crate::config::RagConfig;
use crate::document::{Chunk, DocumentMetadata, SearchResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::extract::{DocumentFormat, extract};
use crate::filter::{Field, MetadataFilter, Predicate};
use crate::generation::Generator;
use crate::index::{EmbeddingIndex, IndexOptions};
use crate::metadata::{DocumentInput, content_hash, extract_document_metadata};
use crate::pipeline::{Expansion, PipelineQuery, QueryOutcome, QueryPipeline};
use crate::reranker::{Reranker, significant_terms};
use crate::synthesis::{Answer, AnswerStatus, AnswerSynthesizer, Grading, NO_RELEVANT_INFORMATION};

/// Answer text used when sources were found but generation failed.
pub const SOURCES_ONLY_ANSWER: &str =
    "Answer generation is currently unavailable. The most relevant sources are listed below.";

/// An uploaded file to ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestFile {
    /// Original filename.
    pub filename: String,
    /// Declared type (extension or MIME type); the filename's extension when `None`.
    #[serde(default)]
    pub declared_type: Option<String>,
    /// Source name to store the document under; the filename when `None`.
    #[serde(default)]
    pub source: Option<String>,
    pub bytes: Vec<u8>,
}

impl IngestFile {
    /// A file whose type and source are taken from `filename`.
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self { filename: filename.into(), declared_type: None, source: None, bytes: bytes.into() }
    }

    /// Declare the type explicitly, as an extension or MIME type.
    pub fn with_declared_type(mut self, declared_type: impl Into<String>) -> Self {
        self.declared_type = Some(declared_type.into());
        self
    }

    /// Store the document under `source` instead of the filename.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    fn source_name(&self) -> &str {
        self.source.as_deref().unwrap_or(&self.filename)
    }

    fn declared(&self) -> &str {
        self.declared_type.as_deref().unwrap_or(&self.filename)
    }
}

/// What happened to one file during ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    Ingested { chunks: usize },
    /// The stored document already has this content.
    Unchanged,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOutcome {
    pub filename: String,
    pub source: String,
    #[serde(flatten)]
    pub status: FileStatus,
}

/// Per-file results of an ingestion batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub files: Vec<FileOutcome>,
    pub total_chunks: usize,
}

impl IngestReport {
    /// Files that were skipped with an error.
    pub fn failed(&self) -> impl Iterator<Item = &FileOutcome> {
        self.files.iter().filter(|f| matches!(f.status, FileStatus::Failed { .. }))
    }
}

/// Inclusive range of ingestion dates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default)]
    pub from: Option<NaiveDate>,
    #[serde(default)]
    pub to: Option<NaiveDate>,
}

/// Optional restrictions on which documents a query may retrieve from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestFilters {
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub date_range: Option<DateRange>,
}

impl RequestFilters {
    /// The equivalent index filter; empty fields add no predicate.
    pub fn to_filter(&self) -> MetadataFilter {
        let mut filter = MetadataFilter::new();
        let text_fields = [
            (Field::FileType, &self.file_type),
            (Field::Language, &self.language),
            (Field::Source, &self.source),
            (Field::Topic, &self.topic),
        ];
        for (field, value) in text_fields {
            if let Some(value) = value {
                filter = filter.and(Predicate::eq(field, value));
            }
        }
        if let Some(range) = self.date_range {
            filter = filter.and(Predicate::ingested_between(range.from, range.to));
        }
        filter
    }
}

/// A question with optional result limit, filters and similarity threshold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub max_results: Option<usize>,
    #[serde(default)]
    pub filters: Option<RequestFilters>,
    #[serde(default)]
    pub min_similarity: Option<f32>,
}

impl QueryRequest {
    /// A query with the configured defaults and no filters.
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), ..Self::default() }
    }

    /// Override the number of sources returned.
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    /// Restrict the query to matching documents.
    pub fn with_filters(mut self, filters: RequestFilters) -> Self {
        self.filters = Some(filters);
        self
    }

    /// Override the similarity threshold.
    pub fn with_min_similarity(mut self, threshold: f32) -> Self {
        self.min_similarity = Some(threshold);
        self
    }

    fn to_pipeline_query(&self) -> PipelineQuery {
        PipelineQuery {
            text: self.query.trim().to_string(),
            limit: self.max_results,
            threshold: self.min_similarity,
            filter: self.filters.as_ref().map(RequestFilters::to_filter).unwrap_or_default(),
        }
    }
}

/// A retrieved passage as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub source: String,
    pub chunk_id: String,
    pub snippet: String,
    /// Final score after reranking.
    pub score: f32,
    /// Raw cosine similarity.
    pub similarity: f32,
    pub rank: usize,
}

impl From<&SearchResult> for SourceRef {
    fn from(result: &SearchResult) -> Self {
        Self {
            source: result.chunk.metadata.source.clone(),
            chunk_id: result.chunk.id.to_string(),
            snippet: result.chunk.snippet.clone(),
            score: result.score,
            similarity: result.similarity,
            rank: result.rank,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub confidence: f32,
    pub status: AnswerStatus,
    /// Mean raw similarity of the returned sources; 0 without sources.
    pub retrieval_score: f32,
    /// The model's grade of its own answer; 0 unless [`Grading::Graded`].
    pub synthesis_score: f32,
    pub grading: Grading,
    pub expansion: Expansion,
}

/// A generated summary of the passages retrieved for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryResponse {
    pub summary: String,
    pub sources: Vec<SourceRef>,
    pub status: AnswerStatus,
}

/// One row of the document listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub source: String,
    pub filename: String,
    pub file_type: String,
    pub language: String,
    pub chunk_count: usize,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsResponse {
    pub documents: usize,
    pub chunks: usize,
    pub dimensions: usize,
    pub embedding_model: String,
    pub document_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub documents: usize,
    pub embedding_model: String,
    pub embedding_reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_error: Option<String>,
    pub generator_configured: bool,
}

/// Retrieval-augmented question answering over ingested documents.
///
/// Construct one via [`KnowledgeBase::builder()`].
pub struct KnowledgeBase {
    config: RagConfig,
    index: Arc<EmbeddingIndex>,
    chunker: TokenChunker,
    pipeline: QueryPipeline,
    synthesizer: Option<AnswerSynthesizer>,
    confidence: Arc<dyn ConfidenceScorer>,
}

impl KnowledgeBase {
    /// Create a new [`KnowledgeBaseBuilder`].
    pub fn builder() -> KnowledgeBaseBuilder {
        KnowledgeBaseBuilder::default()
    }

    /// The configuration in effect.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// The underlying index.
    pub fn index(&self) -> &Arc<EmbeddingIndex> {
        &self.index
    }

    /// Extract, chunk and index a batch of files.
    ///
    /// Files that cannot be extracted are reported as failed and skipped. The
    /// chunks of all remaining files are committed in a single upsert.
    ///
    /// # Errors
    ///
    /// Returns the index error if embedding the batch fails; nothing is
    /// committed in that case.
    pub async fn ingest(&self, files: Vec<IngestFile>) -> Result<IngestReport> {
        let mut outcomes: Vec<Option<FileOutcome>> = Vec::with_capacity(files.len());
        let mut pending = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for file in files {
            let source = file.source_name().to_string();
            let filename = file.filename.clone();
            if !seen.insert(source.clone()) {
                warn!(
                    document.id = %source,
                    filename = %filename,
                    "duplicate source in batch, skipping"
                );
                outcomes.push(Some(FileOutcome {
                    filename,
                    source,
                    status: FileStatus::Failed { error: "duplicate source in batch".into() },
                }));
                continue;
            }

            let hash = content_hash(&file.bytes);
            let unchanged =
                self.index.document(&source).await.is_some_and(|m| m.content_hash == hash);
            if unchanged {
                info!(document.id = %source, "content unchanged, skipping");
                let status = FileStatus::Unchanged;
                outcomes.push(Some(FileOutcome { filename, source, status }));
                continue;
            }

            let slot = outcomes.len();
            outcomes.push(None);
            let chunker = self.chunker.clone();
            let task_source = source.clone();
            let handle =
                tokio::task::spawn_blocking(move || prepare(&file, &task_source, &chunker));
            pending.push((slot, filename, source, handle));
        }

        let handles = pending.iter_mut().map(|(_, _, _, handle)| handle);
        let prepared = join_all(handles).await;

        let mut batch: Vec<Chunk> = Vec::new();
        for ((slot, filename, source, _), joined) in pending.into_iter().zip(prepared) {
            let status = match joined {
                Ok(Ok(chunks)) => {
                    let count = chunks.len();
                    batch.extend(chunks);
                    FileStatus::Ingested { chunks: count }
                }
                Ok(Err(e)) => {
                    warn!(filename = %filename, error = %e, "skipping file");
                    FileStatus::Failed { error: e.to_string() }
                }
                Err(e) => {
                    error!(filename = %filename, error = %e, "extraction task failed");
                    FileStatus::Failed { error: format!("extraction task failed: {e}") }
                }
            };
            outcomes[slot] = Some(FileOutcome { filename, source, status });
        }

        let total_chunks = batch.len();
        self.index.upsert(batch).await?;

        let files: Vec<FileOutcome> = outcomes.into_iter().flatten().collect();
        info!(file_count = files.len(), total_chunks, "ingestion completed");
        Ok(IngestReport { files, total_chunks })
    }

    /// Answer a question from the indexed documents.
    ///
    /// Finding nothing relevant is a successful response with status
    /// [`AnswerStatus::NoResults`]. If generation fails the ranked sources
    /// are still returned with status [`AnswerStatus::SourcesOnly`].
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidQuery`] for an empty query or invalid parameters.
    /// - [`RagError::EmbeddingUnavailable`] / [`RagError::Timeout`] if the
    ///   query cannot be embedded.
    pub async fn query(&self, request: QueryRequest) -> Result<QueryResponse> {
        if request.query.trim().is_empty() {
            return Err(RagError::InvalidQuery("query must not be empty".into()));
        }

        let (results, expansion) = match self.pipeline.run(&request.to_pipeline_query()).await? {
            QueryOutcome::NoResults { expansion } => {
                let answer = Answer::no_relevant_information();
                return Ok(QueryResponse {
                    answer: answer.text,
                    sources: Vec::new(),
                    confidence: answer.confidence,
                    status: answer.status,
                    retrieval_score: 0.0,
                    synthesis_score: 0.0,
                    grading: self.ungraded(),
                    expansion,
                });
            }
            QueryOutcome::Answered { results, expansion } => (results, expansion),
        };

        let synthesized = match &self.synthesizer {
            Some(synthesizer) => {
                synthesizer.synthesize(request.query.trim(), results.clone()).await
            }
            None => Err(no_generator()),
        };

        let (answer, sources, confidence, status, grading) = match synthesized {
            Ok(answer) => {
                let grading = match &self.synthesizer {
                    Some(synthesizer) if self.config.grading_enabled => {
                        synthesizer.grade(request.query.trim(), &answer.text).await
                    }
                    _ => Grading::Disabled,
                };
                let sources: Vec<SourceRef> =
                    answer.citations.iter().map(|c| SourceRef::from(&c.result)).collect();
                (answer.text, sources, answer.confidence, answer.status, grading)
            }
            Err(e) => {
                warn!(error = %e, "returning sources without a generated answer");
                let sources: Vec<SourceRef> = results.iter().map(SourceRef::from).collect();
                let confidence = self.confidence.score(&results);
                let answer = SOURCES_ONLY_ANSWER.to_string();
                (answer, sources, confidence, AnswerStatus::SourcesOnly, self.ungraded())
            }
        };

        Ok(QueryResponse {
            answer,
            retrieval_score: mean_similarity(&sources),
            synthesis_score: grading.score(),
            grading,
            sources,
            confidence,
            status,
            expansion,
        })
    }

    /// Ranked passages for a query, without expansion or answer generation.
    pub async fn search(&self, request: QueryRequest) -> Result<Vec<SourceRef>> {
        let results = self.pipeline.retrieve_only(&request.to_pipeline_query()).await?;
        Ok(results.iter().map(SourceRef::from).collect())
    }

    /// Summarize the passages retrieved for a query.
    ///
    /// Retrieval works as in [`KnowledgeBase::search`]. Without matching
    /// passages the generator is not called; if summarization fails the
    /// passages are returned with status [`AnswerStatus::SourcesOnly`].
    ///
    /// # Errors
    ///
    /// Same as [`KnowledgeBase::query`].
    pub async fn summarize(&self, request: QueryRequest) -> Result<SummaryResponse> {
        if request.query.trim().is_empty() {
            return Err(RagError::InvalidQuery("query must not be empty".into()));
        }
        let results = self.pipeline.retrieve_only(&request.to_pipeline_query()).await?;
        if results.is_empty() {
            return Ok(SummaryResponse {
                summary: NO_RELEVANT_INFORMATION.to_string(),
                sources: Vec::new(),
                status: AnswerStatus::NoResults,
            });
        }

        let sources: Vec<SourceRef> = results.iter().map(SourceRef::from).collect();
        let summarized = match &self.synthesizer {
            Some(synthesizer) => synthesizer.summarize(&results).await,
            None => Err(no_generator()),
        };
        Ok(match summarized {
            Ok(summary) => SummaryResponse { summary, sources, status: AnswerStatus::Answered },
            Err(e) => {
                warn!(error = %e, "returning sources without a summary");
                SummaryResponse {
                    summary: SOURCES_ONLY_ANSWER.to_string(),
                    sources,
                    status: AnswerStatus::SourcesOnly,
                }
            }
        })
    }

    /// Key terms of a query.
    ///
    /// Asks the generator when one is configured; otherwise, or if that
    /// fails, falls back to the query's significant words.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidQuery`] for an empty query.
    pub async fn keywords(&self, query: &str) -> Result<Vec<String>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::InvalidQuery("query must not be empty".into()));
        }
        if let Some(synthesizer) = &self.synthesizer {
            match synthesizer.keywords(query).await {
                Ok(keywords) => return Ok(keywords),
                Err(e) => warn!(error = %e, "keyword extraction failed, using query terms"),
            }
        }
        Ok(significant_terms(query).into_iter().collect())
    }

    /// Summaries of every stored document, ordered by source name.
    pub async fn list_documents(&self) -> Vec<DocumentSummary> {
        let mut summaries = Vec::new();
        for metadata in self.index.documents().await {
            let chunk_count = self.index.chunk_ids(&metadata.source).await.len();
            summaries.push(DocumentSummary {
                source: metadata.source.clone(),
                filename: metadata.filename.clone(),
                file_type: metadata.file_type.clone(),
                language: metadata.language.clone(),
                chunk_count,
                ingested_at: metadata.ingested_at,
            });
        }
        summaries
    }

    /// Full metadata of every stored document.
    pub async fn document_metadata(&self) -> Vec<DocumentMetadata> {
        self.index.documents().await.iter().map(|m| (**m).clone()).collect()
    }

    /// Delete a document and its chunks; returns the number of chunks removed.
    pub async fn delete_document(&self, id: &str) -> usize {
        self.index.delete_by_source(id).await
    }

    /// Counts, dimension and model of the index.
    pub async fn stats(&self) -> StatsResponse {
        let stats = self.index.stats().await;
        StatsResponse {
            documents: stats.documents,
            chunks: stats.chunks,
            dimensions: stats.dimensions,
            embedding_model: self.index.provider().model_name().to_string(),
            document_ids: self.index.document_ids().await,
        }
    }

    /// Check that the embedding provider responds and report index state.
    pub async fn health(&self) -> HealthReport {
        let provider = self.index.provider();
        let timeout = self.config.embedding_timeout();
        let embedding_error = match tokio::time::timeout(timeout, provider.ping()).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("ping timed out after {}s", timeout.as_secs())),
        };
        let status =
            if embedding_error.is_none() { HealthStatus::Healthy } else { HealthStatus::Degraded };

        HealthReport {
            status,
            documents: self.index.stats().await.documents,
            embedding_model: provider.model_name().to_string(),
            embedding_reachable: embedding_error.is_none(),
            embedding_error,
            generator_configured: self.synthesizer.is_some(),
        }
    }

    /// Persist the index, if it was opened from a snapshot path.
    pub async fn flush(&self) -> Result<()> {
        self.index.flush().await
    }

    /// Grading outcome when no answer was generated.
    fn ungraded(&self) -> Grading {
        if self.synthesizer.is_some() && self.config.grading_enabled {
            Grading::Skipped
        } else {
            Grading::Disabled
        }
    }
}

/// Extract, describe and chunk one file. Runs on the blocking pool.
fn prepare(file: &IngestFile, source: &str, chunker: &TokenChunker) -> Result<Vec<Chunk>> {
    let format = DocumentFormat::from_declared(file.declared())?;
    let text = extract(&file.bytes, file.declared(), &file.filename)?;
    let metadata = Arc::new(extract_document_metadata(DocumentInput {
        source,
        filename: &file.filename,
        file_type: format.extension(),
        text: &text,
        raw: &file.bytes,
    }));
    let chunks = chunker.chunk(&text, metadata)?;
    info!(document.id = %source, chunk_count = chunks.len(), "prepared document");
    Ok(chunks)
}

fn no_generator() -> RagError {
    RagError::SynthesisUnavailable { message: "no generator configured".into() }
}

fn mean_similarity(sources: &[SourceRef]) -> f32 {
    if sources.is_empty() {
        return 0.0;
    }
    sources.iter().map(|s| s.similarity).sum::<f32>() / sources.len() as f32
}

/// Builder for constructing a [`KnowledgeBase`].
///
/// Either an `index` or an `embedding_provider` (for a fresh in-memory index)
/// is required. Without a generator, queries return
/// [`AnswerStatus::SourcesOnly`] responses and expansion is disabled.
#[derive(Default)]
pub struct KnowledgeBaseBuilder {
    config: Option<RagConfig>,
    index: Option<Arc<EmbeddingIndex>>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    generator: Option<Arc<dyn Generator>>,
    reranker: Option<Arc<dyn Reranker>>,
    confidence: Option<Arc<dyn ConfidenceScorer>>,
}

impl KnowledgeBaseBuilder {
    /// Set the configuration; [`RagConfig::default`] when not set.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use an existing (possibly persisted) index.
    pub fn index(mut self, index: Arc<EmbeddingIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Create an in-memory index over this provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Enable expansion, answers, grading and summaries.
    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Replace the default keyword-overlap reranker.
    pub fn reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Replace the default rank-decay confidence.
    pub fn confidence_scorer(mut self, scorer: Arc<dyn ConfidenceScorer>) -> Self {
        self.confidence = Some(scorer);
        self
    }

    /// Build the [`KnowledgeBase`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if neither an index nor an
    /// embedding provider is set, or the configuration does not validate.
    pub fn build(self) -> Result<KnowledgeBase> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let index = match (self.index, self.embedding_provider) {
            (Some(index), _) => index,
            (None, Some(provider)) => {
                Arc::new(EmbeddingIndex::new(provider, IndexOptions::from_config(&config))?)
            }
            (None, None) => {
                return Err(RagError::InvalidConfiguration(
                    "an index or an embedding provider is required".to_string(),
                ));
            }
        };

        let confidence: Arc<dyn ConfidenceScorer> = match self.confidence {
            Some(scorer) => scorer,
            None => Arc::new(RankDecayConfidence::from_config(&config)?),
        };

        let mut pipeline =
            QueryPipeline::builder().config(config.clone()).index(Arc::clone(&index));
        if let Some(generator) = &self.generator {
            pipeline = pipeline.generator(Arc::clone(generator));
        }
        if let Some(reranker) = self.reranker {
            pipeline = pipeline.reranker(reranker);
        }
        let pipeline = pipeline.build()?;

        let synthesizer = match self.generator {
            Some(generator) => Some(
                AnswerSynthesizer::from_config(generator, &config)?
                    .with_scorer(Arc::clone(&confidence)),
            ),
            None => None,
        };

        Ok(KnowledgeBase {
            chunker: TokenChunker::from_config(&config)?,
            config,
            index,
            pipeline,
            synthesizer,
            confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_filters_build_conjunction() {
        let filters = RequestFilters {
            file_type: Some("PDF".into()),
            topic: Some("Learning".into()),
            date_range: Some(DateRange { from: NaiveDate::from_ymd_opt(2024, 1, 1), to: None }),
            ..RequestFilters::default()
        };
        let filter = filters.to_filter();
        assert_eq!(filter.predicates().len(), 3);
        assert_eq!(filter.predicates()[0], Predicate::eq(Field::FileType, ".pdf"));
    }

    #[test]
    fn query_request_deserializes_with_defaults() {
        let request: QueryRequest = serde_json::from_str(r#"{"query": "what is rust?"}"#).unwrap();
        assert_eq!(request, QueryRequest::new("what is rust?"));
    }

    #[test]
    fn file_status_is_tagged() {
        let outcome = FileOutcome {
            filename: "a.pdf".into(),
            source: "a.pdf".into(),
            status: FileStatus::Ingested { chunks: 3 },
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "ingested");
        assert_eq!(json["chunks"], 3);
    }

    #[test]
    fn builder_requires_embeddings() {
        assert!(matches!(KnowledgeBase::builder().build(), Err(RagError::InvalidConfiguration(_))));
    }
}
