//! Shared fixtures and mock capabilities for integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kb_rag::{
    Chunk, ChunkId, DocumentMetadata, EmbeddingProvider, GenerationRequest, Generator,
    HashingEmbeddingProvider, RagError, Result,
};
use kb_rag::synthesis::{GRADER_SYSTEM_PROMPT, KEYWORD_SYSTEM_PROMPT, SUMMARY_SYSTEM_PROMPT};

pub const DIM: usize = 64;

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
        content_hash: format!("hash-{source}"),
        ingested_at: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
    })
}

/// An un-embedded chunk of `source` with the given text.
pub fn chunk(source: &str, file_type: &str, ordinal: usize, text: &str) -> Chunk {
    Chunk {
        id: ChunkId::new(source, ordinal),
        text: text.to_string(),
        snippet: text.to_string(),
        start_token: 0,
        end_token: 1,
        overlap_tokens: 0,
        embedding: Vec::new(),
        metadata: metadata(source, file_type),
    }
}

pub fn hashing(dimensions: usize) -> Arc<dyn EmbeddingProvider> {
    Arc::new(HashingEmbeddingProvider::new(dimensions).unwrap())
}

/// Hashing embeddings, except that any batch containing `poison` fails.
pub struct PoisonedEmbedder {
    inner: HashingEmbeddingProvider,
    poison: &'static str,
    pub calls: AtomicUsize,
}

impl PoisonedEmbedder {
    pub fn new(poison: &'static str) -> Self {
        let inner = HashingEmbeddingProvider::new(DIM).unwrap();
        Self { inner, poison, calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl EmbeddingProvider for PoisonedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text]).await.map(|mut v| v.remove(0))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if texts.iter().any(|t| t.contains(self.poison)) {
            return Err(RagError::EmbeddingUnavailable {
                provider: "poisoned".into(),
                message: "backend refused the batch".into(),
            });
        }
        self.inner.embed_batch(texts).await
    }

    fn dimensions(&self) -> usize {
        DIM
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// Never answers within any reasonable timeout.
pub struct StalledEmbedder;

#[async_trait]
impl EmbeddingProvider for StalledEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(vec![0.0; DIM])
    }

    fn dimensions(&self) -> usize {
        DIM
    }

    fn model_name(&self) -> &str {
        "stalled"
    }
}

/// Scripted generator that counts each kind of call separately.
///
/// Calls are told apart by their system instruction; expansion calls carry none.
/// A call kind without a scripted reply fails.
pub struct ScriptedGenerator {
    expansion: Option<String>,
    answer: Option<String>,
    grade: Option<String>,
    summary: Option<String>,
    keywords: Option<String>,
    pub expansion_calls: AtomicUsize,
    pub answer_calls: AtomicUsize,
    pub grade_calls: AtomicUsize,
    pub summary_calls: AtomicUsize,
}

impl ScriptedGenerator {
    /// Expands to `expansion` and answers with `answer`; `None` makes that call fail.
    pub fn new(expansion: Option<&str>, answer: Option<&str>) -> Self {
        Self {
            expansion: expansion.map(str::to_string),
            answer: answer.map(str::to_string),
            grade: None,
            summary: None,
            keywords: None,
            expansion_calls: AtomicUsize::new(0),
            answer_calls: AtomicUsize::new(0),
            grade_calls: AtomicUsize::new(0),
            summary_calls: AtomicUsize::new(0),
        }
    }

    pub fn answering(answer: &str) -> Self {
        Self::new(Some(""), Some(answer))
    }

    pub fn with_grade(mut self, reply: &str) -> Self {
        self.grade = Some(reply.to_string());
        self
    }

    pub fn with_summary(mut self, reply: &str) -> Self {
        self.summary = Some(reply.to_string());
        self
    }

    pub fn with_keywords(mut self, reply: &str) -> Self {
        self.keywords = Some(reply.to_string());
        self
    }

    pub fn answers(&self) -> usize {
        self.answer_calls.load(Ordering::SeqCst)
    }

    pub fn expansions(&self) -> usize {
        self.expansion_calls.load(Ordering::SeqCst)
    }

    pub fn grades(&self) -> usize {
        self.grade_calls.load(Ordering::SeqCst)
    }

    pub fn summaries(&self) -> usize {
        self.summary_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let scripted = match request.system.as_deref() {
            None => {
                self.expansion_calls.fetch_add(1, Ordering::SeqCst);
                &self.expansion
            }
            Some(GRADER_SYSTEM_PROMPT) => {
                self.grade_calls.fetch_add(1, Ordering::SeqCst);
                &self.grade
            }
            Some(SUMMARY_SYSTEM_PROMPT) => {
                self.summary_calls.fetch_add(1, Ordering::SeqCst);
                &self.summary
            }
            Some(KEYWORD_SYSTEM_PROMPT) => &self.keywords,
            Some(_) => {
                self.answer_calls.fetch_add(1, Ordering::SeqCst);
                &self.answer
            }
        };
        scripted
            .clone()
            .ok_or_else(|| RagError::SynthesisUnavailable { message: "model overloaded".into() })
    }
}

/// Never answers within any reasonable timeout.
pub struct StalledGenerator;

#[async_trait]
impl Generator for StalledGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok("too late".to_string())
    }
}
