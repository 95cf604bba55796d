//! End-to-end behavior of the knowledge-base orchestrator.

mod common;

use std::sync::Arc;

use kb_rag::evaluation::{EvaluationCase, evaluate_retrieval};
use kb_rag::service::SOURCES_ONLY_ANSWER;
use kb_rag::synthesis::NO_RELEVANT_INFORMATION;
use kb_rag::{
    AnswerStatus, EmbeddingIndex, Expansion, FileStatus, Grading, HashingEmbeddingProvider,
    HealthStatus, IndexOptions, IngestFile, KnowledgeBase, QueryRequest, RagConfig, RagError,
    RequestFilters,
};

use common::{PoisonedEmbedder, ScriptedGenerator, StalledGenerator, chunk};

const ML_TEXT: &str = "Machine learning is a field of study.";
const BREAD_TEXT: &str = "Bread needs flour, water, salt and time.";

fn knowledge_base(generator: Option<Arc<ScriptedGenerator>>) -> KnowledgeBase {
    let mut builder = KnowledgeBase::builder()
        .config(RagConfig::default())
        .embedding_provider(Arc::new(HashingEmbeddingProvider::default()));
    if let Some(generator) = generator {
        builder = builder.generator(generator);
    }
    builder.build().unwrap()
}

fn empty_index() -> Arc<EmbeddingIndex> {
    let provider = Arc::new(HashingEmbeddingProvider::default());
    Arc::new(EmbeddingIndex::new(provider, IndexOptions::default()).unwrap())
}

async fn seeded(generator: Option<Arc<ScriptedGenerator>>) -> KnowledgeBase {
    let kb = knowledge_base(generator);
    let report = kb
        .ingest(vec![IngestFile::new("ml.txt", ML_TEXT), IngestFile::new("bread.txt", BREAD_TEXT)])
        .await
        .unwrap();
    assert_eq!(report.total_chunks, 2);
    kb
}

#[tokio::test]
async fn relevant_chunk_ranks_first_above_threshold() {
    let generator =
        Arc::new(ScriptedGenerator::answering("Machine learning is a field of study [1]."));
    let kb = seeded(Some(generator.clone())).await;

    let response = kb.query(QueryRequest::new("machine learning")).await.unwrap();

    assert_eq!(response.status, AnswerStatus::Answered);
    assert_eq!(response.sources[0].source, "ml.txt");
    assert_eq!(response.sources[0].rank, 1);
    assert!(response.sources[0].similarity >= kb.config().similarity_threshold);
    assert!(response.sources[0].score > kb.config().similarity_threshold);
    assert!(response.sources.iter().all(|s| s.source != "bread.txt"));
    assert!(response.confidence > 0.0 && response.confidence <= 1.0);
    assert!((response.retrieval_score - response.sources[0].similarity).abs() < 1e-6);
    assert_eq!(generator.answers(), 1);
}

#[tokio::test]
async fn docx_filter_on_pdf_only_index_finds_nothing() {
    let index = empty_index();
    index
        .upsert(vec![
            chunk("lecture.pdf", ".pdf", 0, ML_TEXT),
            chunk("recipes.pdf", ".pdf", 0, BREAD_TEXT),
        ])
        .await
        .unwrap();
    let generator = Arc::new(ScriptedGenerator::answering("unused"));
    let kb = KnowledgeBase::builder().index(index).generator(generator.clone()).build().unwrap();

    let filters = RequestFilters { file_type: Some(".docx".into()), ..RequestFilters::default() };
    let request = QueryRequest::new("machine learning").with_filters(filters);
    let response = kb.query(request).await.unwrap();

    assert_eq!(response.status, AnswerStatus::NoResults);
    assert_eq!(response.confidence, 0.0);
    assert_eq!(response.answer, NO_RELEVANT_INFORMATION);
    assert!(response.sources.is_empty());
    assert_eq!(generator.answers(), 0);
}

#[tokio::test]
async fn nothing_above_threshold_skips_generation() {
    let generator = Arc::new(ScriptedGenerator::answering("unused"));
    let kb = seeded(Some(generator.clone())).await;

    let response = kb.query(QueryRequest::new("quantum chromodynamics")).await.unwrap();

    assert_eq!(response.status, AnswerStatus::NoResults);
    assert_eq!(response.confidence, 0.0);
    assert_eq!(generator.answers(), 0);
}

#[tokio::test]
async fn empty_query_is_rejected() {
    let kb = seeded(None).await;
    let err = kb.query(QueryRequest::new("   ")).await.unwrap_err();
    assert!(matches!(err, RagError::InvalidQuery(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn failed_generation_returns_sources_only() {
    let generator = Arc::new(ScriptedGenerator::new(Some(""), None));
    let kb = seeded(Some(generator.clone())).await;

    let response = kb.query(QueryRequest::new("machine learning")).await.unwrap();

    assert_eq!(response.status, AnswerStatus::SourcesOnly);
    assert_eq!(response.answer, SOURCES_ONLY_ANSWER);
    assert_eq!(response.sources[0].source, "ml.txt");
    assert!(response.confidence > 0.0);
    assert_eq!(generator.answers(), 1);
}

#[tokio::test]
async fn expansion_outcome_is_reported() {
    let expanding =
        Arc::new(ScriptedGenerator::new(Some("ML, statistical\nlearning"), Some("See [1].")));
    let kb = seeded(Some(expanding.clone())).await;
    let response = kb.query(QueryRequest::new("machine learning")).await.unwrap();
    let terms = "ML, statistical learning".to_string();
    assert_eq!(response.expansion, Expansion::Expanded { terms });
    assert_eq!(expanding.expansions(), 1);

    let failing = Arc::new(ScriptedGenerator::new(None, Some("See [1].")));
    let kb = seeded(Some(failing)).await;
    let response = kb.query(QueryRequest::new("machine learning")).await.unwrap();
    assert!(matches!(response.expansion, Expansion::Degraded { .. }));
    assert_eq!(response.status, AnswerStatus::Answered);

    let kb = seeded(None).await;
    let response = kb.query(QueryRequest::new("machine learning")).await.unwrap();
    assert_eq!(response.expansion, Expansion::Disabled);
    assert_eq!(response.status, AnswerStatus::SourcesOnly);
}

#[tokio::test]
async fn ingest_reports_each_file() {
    let kb = knowledge_base(None);
    let report = kb
        .ingest(vec![
            IngestFile::new("notes.md", "# Notes\n\nOwnership and borrowing."),
            IngestFile::new("tool.exe", vec![0u8, 1, 2]),
            IngestFile::new("blank.txt", "   \n\n  "),
            IngestFile::new("notes-copy.md", "duplicate").with_source("notes.md"),
        ])
        .await
        .unwrap();

    let statuses: Vec<&FileStatus> = report.files.iter().map(|f| &f.status).collect();
    assert_eq!(statuses[0], &FileStatus::Ingested { chunks: 1 });
    assert!(matches!(
        statuses[1],
        FileStatus::Failed { error } if error.contains("Unsupported format")
    ));
    assert!(matches!(statuses[2], FileStatus::Failed { error } if error.contains("blank.txt")));
    assert!(matches!(statuses[3], FileStatus::Failed { .. }));
    assert_eq!(report.failed().count(), 3);
    assert_eq!(report.total_chunks, 1);

    let documents = kb.list_documents().await;
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].file_type, ".md");
    assert_eq!(documents[0].chunk_count, 1);
}

#[tokio::test]
async fn reingesting_identical_content_is_a_no_op() {
    let kb = seeded(None).await;
    let before = kb.document_metadata().await;

    let report = kb.ingest(vec![IngestFile::new("ml.txt", ML_TEXT)]).await.unwrap();
    assert_eq!(report.files[0].status, FileStatus::Unchanged);
    assert_eq!(kb.document_metadata().await, before);

    let changed = IngestFile::new("ml.txt", "Deep learning uses neural networks.");
    let report = kb.ingest(vec![changed]).await.unwrap();
    assert_eq!(report.files[0].status, FileStatus::Ingested { chunks: 1 });
    assert_eq!(kb.stats().await.chunks, 2);
}

#[tokio::test]
async fn embedding_failure_rejects_whole_batch() {
    let kb = KnowledgeBase::builder()
        .embedding_provider(Arc::new(PoisonedEmbedder::new("POISON")))
        .build()
        .unwrap();

    let err = kb
        .ingest(vec![
            IngestFile::new("fine.txt", "perfectly fine"),
            IngestFile::new("bad.txt", "POISON inside"),
        ])
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(kb.stats().await.documents, 0);
}

#[tokio::test]
async fn deleted_documents_disappear_from_queries() {
    let kb = seeded(None).await;
    assert_eq!(kb.delete_document("ml.txt").await, 1);
    assert_eq!(kb.delete_document("ml.txt").await, 0);

    let request = QueryRequest::new("machine learning").with_min_similarity(0.0);
    let sources = kb.search(request).await.unwrap();
    assert!(sources.iter().all(|s| s.source != "ml.txt"));
    assert_eq!(kb.stats().await.document_ids, vec!["bread.txt".to_string()]);
}

#[tokio::test]
async fn retrieval_metrics_over_labelled_cases() {
    let kb = seeded(None).await;
    let cases = vec![
        EvaluationCase {
            query: "machine learning".into(),
            relevant_sources: vec!["ml.txt".into()],
        },
        EvaluationCase {
            query: "flour water salt".into(),
            relevant_sources: vec!["bread.txt".into()],
        },
    ];

    let metrics = evaluate_retrieval(&kb, &cases, 2).await.unwrap();
    assert_eq!(metrics.precision_at_k, 0.5);
    assert_eq!(metrics.recall_at_k, 1.0);
    assert_eq!(metrics.mrr_at_k, 1.0);
    assert_eq!(metrics.cases, 2);

    let empty = evaluate_retrieval(&kb, &[], 5).await.unwrap();
    assert_eq!((empty.precision_at_k, empty.recall_at_k, empty.mrr_at_k), (0.0, 0.0, 0.0));
}

#[tokio::test]
async fn health_and_stats_reflect_state() {
    let kb = seeded(None).await;
    let health = kb.health().await;
    assert_eq!(health.status, HealthStatus::Healthy);
    assert!(health.embedding_reachable);
    assert!(!health.generator_configured);
    assert_eq!(health.documents, 2);

    let stats = kb.stats().await;
    assert_eq!((stats.documents, stats.chunks), (2, 2));
    assert_eq!(stats.dimensions, 384);
}

#[tokio::test]
async fn answers_are_graded_by_the_model() {
    let generator =
        Arc::new(ScriptedGenerator::answering("Machine learning is a field [1].").with_grade("8"));
    let kb = seeded(Some(generator.clone())).await;

    let response = kb.query(QueryRequest::new("machine learning")).await.unwrap();

    assert_eq!(response.status, AnswerStatus::Answered);
    assert_eq!(response.grading, Grading::Graded { score: 0.8 });
    assert_eq!(response.synthesis_score, 0.8);
    assert_eq!((generator.answers(), generator.grades()), (1, 1));
}

#[tokio::test]
async fn unusable_grades_score_zero() {
    let rambling = Arc::new(ScriptedGenerator::answering("See [1].").with_grade("quite good"));
    let kb = seeded(Some(rambling)).await;
    let response = kb.query(QueryRequest::new("machine learning")).await.unwrap();
    assert!(matches!(response.grading, Grading::Degraded { .. }));
    assert_eq!(response.synthesis_score, 0.0);

    let failing = Arc::new(ScriptedGenerator::answering("See [1]."));
    let kb = seeded(Some(failing.clone())).await;
    let response = kb.query(QueryRequest::new("machine learning")).await.unwrap();
    assert!(matches!(
        &response.grading,
        Grading::Degraded { reason } if reason.contains("overloaded")
    ));
    assert_eq!(response.status, AnswerStatus::Answered);
    assert_eq!(failing.grades(), 1);
}

#[tokio::test]
async fn grading_can_be_switched_off() {
    let generator = Arc::new(ScriptedGenerator::answering("See [1].").with_grade("9"));
    let config = RagConfig::builder().grading_enabled(false).build().unwrap();
    let kb = KnowledgeBase::builder()
        .config(config)
        .embedding_provider(Arc::new(HashingEmbeddingProvider::default()))
        .generator(generator.clone())
        .build()
        .unwrap();
    kb.ingest(vec![IngestFile::new("ml.txt", ML_TEXT)]).await.unwrap();

    let response = kb.query(QueryRequest::new("machine learning")).await.unwrap();
    assert_eq!(response.grading, Grading::Disabled);
    assert_eq!(response.synthesis_score, 0.0);
    assert_eq!(generator.grades(), 0);

    let kb = seeded(None).await;
    let response = kb.query(QueryRequest::new("machine learning")).await.unwrap();
    assert_eq!(response.grading, Grading::Disabled);

    let generator = Arc::new(ScriptedGenerator::answering("unused").with_grade("9"));
    let kb = seeded(Some(generator.clone())).await;
    let response = kb.query(QueryRequest::new("quantum chromodynamics")).await.unwrap();
    assert_eq!(response.grading, Grading::Skipped);
    assert_eq!(generator.grades(), 0);
}

#[tokio::test(start_paused = true)]
async fn stalled_generator_degrades_expansion_and_answer() {
    let index = empty_index();
    index.upsert(vec![chunk("ml.txt", ".txt", 0, ML_TEXT)]).await.unwrap();
    let kb = KnowledgeBase::builder()
        .index(index)
        .generator(Arc::new(StalledGenerator))
        .build()
        .unwrap();

    let response = kb.query(QueryRequest::new("machine learning")).await.unwrap();

    assert!(matches!(
        &response.expansion,
        Expansion::Degraded { reason } if reason.contains("timed out")
    ));
    assert_eq!(response.status, AnswerStatus::SourcesOnly);
    assert_eq!(response.answer, SOURCES_ONLY_ANSWER);
    assert_eq!(response.sources[0].source, "ml.txt");
    assert_eq!(response.grading, Grading::Skipped);
    assert_eq!(response.synthesis_score, 0.0);

    let summary = kb.summarize(QueryRequest::new("machine learning")).await.unwrap();
    assert_eq!(summary.status, AnswerStatus::SourcesOnly);
    assert_eq!(summary.sources.len(), 1);
}

#[tokio::test]
async fn summaries_cover_retrieved_sources() {
    let generator = ScriptedGenerator::answering("unused")
        .with_summary("Machine learning is an academic field.");
    let generator = Arc::new(generator);
    let kb = seeded(Some(generator.clone())).await;

    let summary = kb.summarize(QueryRequest::new("machine learning")).await.unwrap();
    assert_eq!(summary.status, AnswerStatus::Answered);
    assert_eq!(summary.summary, "Machine learning is an academic field.");
    assert_eq!(summary.sources[0].source, "ml.txt");
    assert_eq!((generator.summaries(), generator.answers(), generator.expansions()), (1, 0, 0));

    let nothing = kb.summarize(QueryRequest::new("quantum chromodynamics")).await.unwrap();
    assert_eq!(nothing.status, AnswerStatus::NoResults);
    assert_eq!(nothing.summary, NO_RELEVANT_INFORMATION);
    assert_eq!(generator.summaries(), 1);

    let kb = seeded(None).await;
    let summary = kb.summarize(QueryRequest::new("machine learning")).await.unwrap();
    assert_eq!(summary.status, AnswerStatus::SourcesOnly);
    assert_eq!(summary.summary, SOURCES_ONLY_ANSWER);
    assert!(matches!(kb.summarize(QueryRequest::new("")).await, Err(RagError::InvalidQuery(_))));
}

#[tokio::test]
async fn keywords_come_from_the_model_or_the_query() {
    let generator = ScriptedGenerator::answering("unused")
        .with_keywords("machine learning; ML, Machine Learning");
    let generator = Arc::new(generator);
    let kb = knowledge_base(Some(generator));
    let keywords = kb.keywords("What is machine learning?").await.unwrap();
    assert_eq!(keywords, vec!["machine learning".to_string(), "ML".to_string()]);

    let silent = Arc::new(ScriptedGenerator::answering("unused"));
    let kb = knowledge_base(Some(silent));
    let keywords = kb.keywords("What is machine learning?").await.unwrap();
    assert_eq!(keywords, vec!["learning".to_string(), "machine".to_string()]);

    assert!(matches!(knowledge_base(None).keywords("  ").await, Err(RagError::InvalidQuery(_))));
}
