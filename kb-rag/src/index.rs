//! Embedding index with metadata-filtered cosine search.
//!
//! [`EmbeddingIndex`] owns every stored chunk and its vector. Documents live in
//! per-document slots behind their own `tokio::sync::RwLock`, so a writer only
//! excludes readers of the documents it touches. Embedding calls happen before
//! any lock is taken.
//!
//! An index opened with [`EmbeddingIndex::open`] persists to a JSON snapshot
//! on [`flush`](EmbeddingIndex::flush) and [`close`](EmbeddingIndex::close).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::config::RagConfig;
use crate::document::{Chunk, ChunkId, DocumentMetadata, SearchResult, sort_by_score};
use crate::embedding::{EmbeddingProvider, cosine_similarity};
use crate::error::{RagError, Result};
use crate::filter::MetadataFilter;

const SNAPSHOT_VERSION: u32 = 1;

/// Embedding behavior of an [`EmbeddingIndex`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexOptions {
    /// Maximum number of texts per embedding call.
    pub batch_size: usize,
    /// Time limit for each embedding call.
    pub embedding_timeout: Duration,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self { batch_size: 64, embedding_timeout: Duration::from_secs(30) }
    }
}

impl IndexOptions {
    /// Batch size and embedding timeout taken from `config`.
    pub fn from_config(config: &RagConfig) -> Self {
        Self {
            batch_size: config.embedding_batch_size,
            embedding_timeout: config.embedding_timeout(),
        }
    }
}

/// Document and chunk counts of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub documents: usize,
    pub chunks: usize,
    pub dimensions: usize,
}

#[derive(Debug)]
struct DocumentSlot {
    metadata: Arc<DocumentMetadata>,
    chunks: Vec<Arc<Chunk>>,
}

type Slot = Arc<RwLock<DocumentSlot>>;

/// Vector index over document chunks.
///
/// # Example
///
/// ```rust,ignore
/// use kb_rag::{EmbeddingIndex, HashingEmbeddingProvider, IndexOptions, MetadataFilter};
///
/// let provider = Arc::new(HashingEmbeddingProvider::default());
/// let index = EmbeddingIndex::new(provider, IndexOptions::default())?;
/// index.upsert(chunks).await?;
/// let query = index.embed_query("what is machine learning?").await?;
/// let results = index.search(&query, 5, &MetadataFilter::new()).await?;
/// ```
pub struct EmbeddingIndex {
    provider: Arc<dyn EmbeddingProvider>,
    dimensions: usize,
    options: IndexOptions,
    path: Option<PathBuf>,
    documents: RwLock<BTreeMap<String, Slot>>,
}

impl std::fmt::Debug for EmbeddingIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingIndex")
            .field("model", &self.provider.model_name())
            .field("dimensions", &self.dimensions)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl EmbeddingIndex {
    /// Create an empty, memory-only index whose dimension is fixed by `provider`.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, options: IndexOptions) -> Result<Self> {
        let dimensions = provider.dimensions();
        if dimensions == 0 {
            return Err(RagError::InvalidConfiguration(
                "embedding provider reports 0 dimensions".into(),
            ));
        }
        if options.batch_size == 0 {
            return Err(RagError::InvalidConfiguration("batch_size must be greater than 0".into()));
        }
        Ok(Self { provider, dimensions, options, path: None, documents: RwLock::default() })
    }

    /// Open an index persisted at `path`, starting empty if the file does not exist.
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidConfiguration`] if the snapshot was built with a
    ///   different embedding model or dimension.
    /// - [`RagError::Persistence`] if the snapshot is unreadable.
    pub async fn open(
        path: impl AsRef<Path>,
        provider: Arc<dyn EmbeddingProvider>,
        options: IndexOptions,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut index = Self::new(provider, options)?;

        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes).map_err(|e| {
                    RagError::Persistence(format!("corrupt snapshot {}: {e}", path.display()))
                })?;
                let documents = index.restore(snapshot)?;
                info!(
                    path = %path.display(),
                    document_count = documents.len(),
                    "opened index snapshot"
                );
                index.documents = RwLock::new(documents);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no snapshot found, starting empty");
            }
            Err(e) => return Err(e.into()),
        }

        index.path = Some(path);
        Ok(index)
    }

    /// Dimensionality of every stored vector.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// The embedding provider used for chunks and queries.
    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// Embed a query text with the index's provider, under the embedding timeout.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_texts(&[text]).await?;
        vectors.pop().ok_or_else(|| {
            RagError::embedding(self.provider.model_name(), "provider returned no vector")
        })
    }

    /// Embed and store `chunks`.
    ///
    /// For every document present in `chunks`, the given chunks become the
    /// document's complete chunk set, replacing what was stored before. All
    /// texts are embedded before anything is committed: on failure the index
    /// is unchanged.
    ///
    /// # Errors
    ///
    /// - [`RagError::EmbeddingUnavailable`] if the provider fails or returns
    ///   vectors of the wrong shape.
    /// - [`RagError::Timeout`] if an embedding call exceeds the time limit.
    pub async fn upsert(&self, chunks: Vec<Chunk>) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let vectors = match self.embed_texts(&texts).await {
            Ok(vectors) => vectors,
            Err(e) => {
                error!(
                    error = %e,
                    chunk_count = chunks.len(),
                    "embedding failed, nothing committed"
                );
                return Err(e);
            }
        };

        let chunk_count = chunks.len();
        let mut grouped: BTreeMap<String, DocumentSlot> = BTreeMap::new();
        for (mut chunk, embedding) in chunks.into_iter().zip(vectors) {
            chunk.embedding = embedding;
            let slot = grouped.entry(chunk.id.document.clone()).or_insert_with(|| DocumentSlot {
                metadata: Arc::clone(&chunk.metadata),
                chunks: Vec::new(),
            });
            slot.chunks.push(Arc::new(chunk));
        }
        for slot in grouped.values_mut() {
            slot.chunks.sort_by(|a, b| a.id.cmp(&b.id));
        }
        let document_count = grouped.len();

        // Existing documents are replaced in place, in sorted order, without
        // holding the outer map lock.
        let existing: Vec<(String, Slot)> = {
            let documents = self.documents.read().await;
            grouped
                .keys()
                .filter_map(|id| documents.get(id).map(|slot| (id.clone(), Arc::clone(slot))))
                .collect()
        };
        for (id, slot) in existing {
            if let Some(replacement) = grouped.remove(&id) {
                *slot.write().await = replacement;
            }
        }

        if !grouped.is_empty() {
            let mut documents = self.documents.write().await;
            for (id, slot) in grouped {
                documents.insert(id, Arc::new(RwLock::new(slot)));
            }
        }

        info!(document_count, chunk_count, "upserted chunks");
        Ok(())
    }

    /// Remove a document and all of its chunks. Returns the number of chunks removed.
    pub async fn delete_by_source(&self, id: &str) -> usize {
        let removed = self.documents.write().await.remove(id);
        let count = match removed {
            Some(slot) => slot.read().await.chunks.len(),
            None => 0,
        };
        info!(document.id = %id, chunk_count = count, "deleted document");
        count
    }

    /// Top-`k` chunks by cosine similarity among those whose document matches `filter`.
    ///
    /// Similarities are clamped to `[0, 1]`. Results are ordered by similarity
    /// descending, ties broken by ascending chunk id.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidQuery`] if `query` has the wrong dimension or
    /// the filter is malformed.
    pub async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchResult>> {
        if query.len() != self.dimensions {
            return Err(RagError::InvalidQuery(format!(
                "query vector has {} dimensions, index has {}",
                query.len(),
                self.dimensions
            )));
        }
        filter.validate()?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut results = Vec::new();
        for slot in self.slots().await {
            let slot = slot.read().await;
            if !filter.matches(&slot.metadata) {
                continue;
            }
            for chunk in &slot.chunks {
                let similarity = clamp_similarity(cosine_similarity(&chunk.embedding, query));
                results.push(SearchResult::new(Arc::clone(chunk), similarity));
            }
        }

        sort_by_score(&mut results);
        results.truncate(k);
        debug!(k, result_count = results.len(), "searched index");
        Ok(results)
    }

    /// Metadata of every stored document, ordered by source name.
    pub async fn documents(&self) -> Vec<Arc<DocumentMetadata>> {
        let mut metadata = Vec::new();
        for slot in self.slots().await {
            metadata.push(Arc::clone(&slot.read().await.metadata));
        }
        metadata
    }

    /// Metadata of one document.
    pub async fn document(&self, id: &str) -> Option<Arc<DocumentMetadata>> {
        let slot = self.documents.read().await.get(id).cloned()?;
        let metadata = Arc::clone(&slot.read().await.metadata);
        Some(metadata)
    }

    /// Source names of every stored document, sorted.
    pub async fn document_ids(&self) -> Vec<String> {
        self.documents.read().await.keys().cloned().collect()
    }

    /// Whether a document with source `id` is stored.
    pub async fn contains(&self, id: &str) -> bool {
        self.documents.read().await.contains_key(id)
    }

    /// Ids of the chunks stored for a document, in ordinal order.
    pub async fn chunk_ids(&self, id: &str) -> Vec<ChunkId> {
        let Some(slot) = self.documents.read().await.get(id).cloned() else {
            return Vec::new();
        };
        let slot = slot.read().await;
        slot.chunks.iter().map(|c| c.id.clone()).collect()
    }

    /// Document and chunk counts plus the vector dimension.
    pub async fn stats(&self) -> IndexStats {
        let slots = self.slots().await;
        let mut chunks = 0;
        for slot in &slots {
            chunks += slot.read().await.chunks.len();
        }
        IndexStats { documents: slots.len(), chunks, dimensions: self.dimensions }
    }

    /// Remove every document.
    pub async fn clear(&self) {
        let removed = std::mem::take(&mut *self.documents.write().await);
        info!(document_count = removed.len(), "cleared index");
    }

    /// Write the snapshot to disk. A memory-only index has nothing to flush.
    pub async fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let snapshot = self.snapshot().await;
        let bytes = serde_json::to_vec(&snapshot)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| RagError::Persistence(format!("writing {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| RagError::Persistence(format!("replacing {}: {e}", path.display())))?;

        info!(
            path = %path.display(),
            document_count = snapshot.documents.len(),
            bytes = bytes.len(),
            "flushed index"
        );
        Ok(())
    }

    /// Flush and release the index.
    pub async fn close(self) -> Result<()> {
        self.flush().await
    }

    async fn slots(&self) -> Vec<Slot> {
        self.documents.read().await.values().cloned().collect()
    }

    /// Embed `texts` in batches, validating the count and dimension of the vectors.
    async fn embed_texts(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let model = self.provider.model_name();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.options.batch_size) {
            let embedded = tokio::time::timeout(
                self.options.embedding_timeout,
                self.provider.embed_batch(batch),
            )
            .await
            .map_err(|_| RagError::Timeout {
                operation: "embedding".into(),
                seconds: self.options.embedding_timeout.as_secs(),
            })?
            .map_err(|e| match e {
                e @ (RagError::EmbeddingUnavailable { .. } | RagError::Timeout { .. }) => e,
                other => RagError::embedding(model, other.to_string()),
            })?;

            if embedded.len() != batch.len() {
                return Err(RagError::embedding(
                    model,
                    format!("expected {} vectors, got {}", batch.len(), embedded.len()),
                ));
            }
            if let Some(bad) = embedded.iter().find(|v| v.len() != self.dimensions) {
                return Err(RagError::embedding(
                    model,
                    format!("expected {} dimensions, got {}", self.dimensions, bad.len()),
                ));
            }
            vectors.extend(embedded);
        }
        Ok(vectors)
    }

    async fn snapshot(&self) -> Snapshot {
        let mut documents = Vec::new();
        for slot in self.slots().await {
            let slot = slot.read().await;
            documents.push(SnapshotDocument {
                metadata: (*slot.metadata).clone(),
                chunks: slot.chunks.iter().map(|c| SnapshotChunk::from(c.as_ref())).collect(),
            });
        }
        Snapshot {
            version: SNAPSHOT_VERSION,
            model: self.provider.model_name().to_string(),
            dimensions: self.dimensions,
            documents,
        }
    }

    fn restore(&self, snapshot: Snapshot) -> Result<BTreeMap<String, Slot>> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(RagError::Persistence(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        if snapshot.dimensions != self.dimensions || snapshot.model != self.provider.model_name() {
            return Err(RagError::InvalidConfiguration(format!(
                "snapshot was built with {} ({} dimensions), provider is {} ({} dimensions)",
                snapshot.model,
                snapshot.dimensions,
                self.provider.model_name(),
                self.dimensions
            )));
        }

        let mut documents = BTreeMap::new();
        for document in snapshot.documents {
            let metadata = Arc::new(document.metadata);
            let mut chunks = Vec::with_capacity(document.chunks.len());
            for stored in document.chunks {
                if stored.embedding.len() != self.dimensions {
                    return Err(RagError::Persistence(format!(
                        "chunk {}_{} has a {}-dimensional vector",
                        metadata.source,
                        stored.ordinal,
                        stored.embedding.len()
                    )));
                }
                chunks.push(Arc::new(stored.into_chunk(&metadata)));
            }
            let slot = DocumentSlot { metadata: Arc::clone(&metadata), chunks };
            documents.insert(metadata.source.clone(), Arc::new(RwLock::new(slot)));
        }
        Ok(documents)
    }
}

/// Clamp into `[0, 1]`; NaN and negative zero map to 0.
fn clamp_similarity(similarity: f32) -> f32 {
    if similarity > 0.0 { similarity.min(1.0) } else { 0.0 }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    model: String,
    dimensions: usize,
    documents: Vec<SnapshotDocument>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotDocument {
    metadata: DocumentMetadata,
    chunks: Vec<SnapshotChunk>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotChunk {
    ordinal: usize,
    text: String,
    snippet: String,
    start_token: usize,
    end_token: usize,
    overlap_tokens: usize,
    embedding: Vec<f32>,
}

impl From<&Chunk> for SnapshotChunk {
    fn from(chunk: &Chunk) -> Self {
        Self {
            ordinal: chunk.id.ordinal,
            text: chunk.text.clone(),
            snippet: chunk.snippet.clone(),
            start_token: chunk.start_token,
            end_token: chunk.end_token,
            overlap_tokens: chunk.overlap_tokens,
            embedding: chunk.embedding.clone(),
        }
    }
}

impl SnapshotChunk {
    fn into_chunk(self, metadata: &Arc<DocumentMetadata>) -> Chunk {
        Chunk {
            id: ChunkId::new(metadata.source.clone(), self.ordinal),
            text: self.text,
            snippet: self.snippet,
            start_token: self.start_token,
            end_token: self.end_token,
            overlap_tokens: self.overlap_tokens,
            embedding: self.embedding,
            metadata: Arc::clone(metadata),
        }
    }
}
