//! Offline retrieval quality metrics over labelled queries.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::service::{KnowledgeBase, QueryRequest};

/// A query and the sources that should be retrieved for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationCase {
    pub query: String,
    pub relevant_sources: Vec<String>,
}

/// Metrics averaged over all cases, rounded to four decimals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrievalMetrics {
    pub precision_at_k: f64,
    pub recall_at_k: f64,
    pub mrr_at_k: f64,
    pub cases: usize,
    pub k: usize,
}

/// Run every case through retrieval (no threshold, no expansion) and score the top `k`.
///
/// Retrieved sources are de-duplicated in rank order before scoring, so a
/// document contributing several chunks counts once.
pub async fn evaluate_retrieval(
    kb: &KnowledgeBase,
    cases: &[EvaluationCase],
    k: usize,
) -> Result<RetrievalMetrics> {
    let mut precision = 0.0;
    let mut recall = 0.0;
    let mut reciprocal_rank = 0.0;

    for case in cases {
        let request =
            QueryRequest::new(&case.query).with_max_results(k.max(1)).with_min_similarity(0.0);
        let mut retrieved: Vec<String> = Vec::new();
        for source in kb.search(request).await? {
            if !retrieved.contains(&source.source) {
                retrieved.push(source.source);
            }
        }
        retrieved.truncate(k);

        let gold: HashSet<&str> = case.relevant_sources.iter().map(String::as_str).collect();
        let hits = retrieved.iter().filter(|s| gold.contains(s.as_str())).count() as f64;
        precision += hits / retrieved.len().max(1) as f64;
        recall += hits / gold.len().max(1) as f64;
        reciprocal_rank += retrieved
            .iter()
            .position(|s| gold.contains(s.as_str()))
            .map_or(0.0, |i| 1.0 / (i + 1) as f64);
    }

    let n = cases.len().max(1) as f64;
    let metrics = RetrievalMetrics {
        precision_at_k: round4(precision / n),
        recall_at_k: round4(recall / n),
        mrr_at_k: round4(reciprocal_rank / n),
        cases: cases.len(),
        k,
    };
    info!(?metrics, "evaluated retrieval");
    Ok(metrics)
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
