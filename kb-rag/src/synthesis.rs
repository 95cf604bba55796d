//! Grounded answer synthesis over ranked search results.

use std::fmt::Write as _;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::confidence::{ConfidenceScorer, RankDecayConfidence};
use crate::config::{GenerationParams, RagConfig};
use crate::document::SearchResult;
use crate::error::{RagError, Result};
use crate::generation::{GenerationRequest, Generator};

/// Answer text returned when retrieval found nothing relevant.
pub const NO_RELEVANT_INFORMATION: &str =
    "I couldn't find any relevant information in the knowledge base to answer your question.";

/// System instruction for answer synthesis.
pub const ANSWER_SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions \
based only on the provided documents. Use only the information in the context. Do not make up \
facts or draw on outside knowledge. If the context is insufficient to answer, clearly state that.";

/// System instruction for grading a generated answer.
pub const GRADER_SYSTEM_PROMPT: &str = "You are an impartial evaluator.";

/// System instruction for summarizing retrieved sources.
pub const SUMMARY_SYSTEM_PROMPT: &str = "You summarize content precisely and factually.";

/// System instruction for extracting query keywords.
pub const KEYWORD_SYSTEM_PROMPT: &str = "You extract concise and relevant keywords.";

const GRADE_MAX_TOKENS: u32 = 10;
const SUMMARY_TEMPERATURE: f32 = 0.5;
const SUMMARY_MAX_TOKENS: u32 = 500;
const KEYWORD_TEMPERATURE: f32 = 0.3;
const KEYWORD_MAX_TOKENS: u32 = 80;

static CITATION_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(\d+(?:\s*,\s*\d+)*)\]")
        .expect("unreachable error: invalid citation pattern")
});

static GRADE_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d+(?:\.\d+)?").expect("unreachable error: invalid grade pattern")
});

/// How an answer came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    /// Generated from the retrieved sources.
    Answered,
    /// Nothing relevant was retrieved.
    NoResults,
    /// Sources were retrieved but generation failed.
    SourcesOnly,
}

/// A source referenced by an answer.
#[derive(Debug, Clone)]
pub struct Citation {
    /// The `[n]` label the source carried in the prompt.
    pub label: usize,
    pub result: SearchResult,
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    /// Cited sources, in first-cited order.
    pub citations: Vec<Citation>,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    pub status: AnswerStatus,
}

impl Answer {
    /// The fixed answer for a query with no relevant sources.
    pub fn no_relevant_information() -> Self {
        Self {
            text: NO_RELEVANT_INFORMATION.to_string(),
            citations: Vec::new(),
            confidence: 0.0,
            status: AnswerStatus::NoResults,
        }
    }
}

/// What happened when the model graded its own answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Grading {
    /// Grading is switched off or no generator is configured.
    Disabled,
    /// There was no generated answer to grade.
    Skipped,
    /// The model's grade, scaled to `[0, 1]`.
    Graded { score: f32 },
    /// The grading call failed, timed out or returned no number.
    Degraded { reason: String },
}

impl Grading {
    /// The grade, or 0 when no grade was obtained.
    pub fn score(&self) -> f32 {
        match self {
            Self::Graded { score } => *score,
            _ => 0.0,
        }
    }
}

/// Produces an [`Answer`] from a query and its ranked results.
///
/// # Example
///
/// ```rust,ignore
/// use kb_rag::AnswerSynthesizer;
///
/// let synthesizer = AnswerSynthesizer::from_config(generator, &config)?;
/// let answer = synthesizer.synthesize("what is machine learning?", results).await?;
/// ```
pub struct AnswerSynthesizer {
    generator: Arc<dyn Generator>,
    scorer: Arc<dyn ConfidenceScorer>,
    params: GenerationParams,
    timeout: Duration,
}

impl AnswerSynthesizer {
    /// Create a synthesizer with the default [`RankDecayConfidence`] scorer.
    pub fn new(generator: Arc<dyn Generator>, params: GenerationParams, timeout: Duration) -> Self {
        Self { generator, scorer: Arc::new(RankDecayConfidence::default()), params, timeout }
    }

    /// Generation parameters, timeout and confidence constants taken from `config`.
    pub fn from_config(generator: Arc<dyn Generator>, config: &RagConfig) -> Result<Self> {
        let scorer = Arc::new(RankDecayConfidence::from_config(config)?);
        Ok(Self::new(generator, config.generation.clone(), config.generation_timeout())
            .with_scorer(scorer))
    }

    /// Replace the confidence scorer.
    pub fn with_scorer(mut self, scorer: Arc<dyn ConfidenceScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Confidence of a ranked result list.
    pub fn confidence(&self, results: &[SearchResult]) -> f32 {
        self.scorer.score(results)
    }

    /// Answer `query` from `results` (in rank order).
    ///
    /// With no results the generator is not called and
    /// [`Answer::no_relevant_information`] is returned.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::SynthesisUnavailable`] if generation fails, times
    /// out or returns an empty answer.
    pub async fn synthesize(&self, query: &str, results: Vec<SearchResult>) -> Result<Answer> {
        if results.is_empty() {
            return Ok(Answer::no_relevant_information());
        }

        let request = GenerationRequest::new(build_prompt(query, &results), self.params.clone())
            .with_system(ANSWER_SYSTEM_PROMPT);
        let text = self
            .complete(&request)
            .await
            .inspect_err(|e| error!(error = %e, "answer generation failed"))?;
        if text.is_empty() {
            return Err(RagError::SynthesisUnavailable {
                message: "generator returned an empty answer".into(),
            });
        }

        let confidence = self.scorer.score(&results);
        let labels = parse_citations(&text, results.len());
        let citations: Vec<Citation> = if labels.is_empty() {
            results
                .into_iter()
                .enumerate()
                .map(|(i, result)| Citation { label: i + 1, result })
                .collect()
        } else {
            labels
                .into_iter()
                .map(|label| Citation { label, result: results[label - 1].clone() })
                .collect()
        };

        info!(citation_count = citations.len(), confidence, "synthesized answer");
        Ok(Answer { text, citations, confidence, status: AnswerStatus::Answered })
    }

    /// Ask the model to grade `answer` to `query` on a 0-10 scale.
    ///
    /// Never fails: problems are reported as [`Grading::Degraded`].
    pub async fn grade(&self, query: &str, answer: &str) -> Grading {
        let params = GenerationParams {
            temperature: 0.0,
            max_tokens: GRADE_MAX_TOKENS,
            ..self.params.clone()
        };
        let request = GenerationRequest::new(grading_prompt(query, answer), params)
            .with_system(GRADER_SYSTEM_PROMPT);

        match self.complete(&request).await {
            Ok(reply) => match parse_grade(&reply) {
                Some(score) => {
                    info!(score, "graded answer");
                    Grading::Graded { score }
                }
                None => {
                    warn!(reply = %reply, "grader returned no number");
                    Grading::Degraded { reason: "grader returned no numeric score".into() }
                }
            },
            Err(e) => {
                warn!(error = %e, "answer grading failed");
                Grading::Degraded { reason: e.to_string() }
            }
        }
    }

    /// Concise summary of the ranked `results`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::SynthesisUnavailable`] if generation fails, times
    /// out or returns nothing.
    pub async fn summarize(&self, results: &[SearchResult]) -> Result<String> {
        if results.is_empty() {
            return Ok(NO_RELEVANT_INFORMATION.to_string());
        }

        let mut prompt = String::from("Summarize the following documents concisely:\n\n");
        write_context(&mut prompt, results);
        prompt.push_str("Summary:");
        let params = GenerationParams {
            temperature: SUMMARY_TEMPERATURE,
            max_tokens: SUMMARY_MAX_TOKENS,
            ..self.params.clone()
        };
        let request = GenerationRequest::new(prompt, params).with_system(SUMMARY_SYSTEM_PROMPT);

        let summary = self.complete(&request).await?;
        if summary.is_empty() {
            return Err(RagError::SynthesisUnavailable {
                message: "generator returned an empty summary".into(),
            });
        }
        info!(source_count = results.len(), "summarized sources");
        Ok(summary)
    }

    /// Key terms and phrases of `query` as proposed by the model.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::SynthesisUnavailable`] if generation fails, times
    /// out or yields no keywords.
    pub async fn keywords(&self, query: &str) -> Result<Vec<String>> {
        let params = GenerationParams {
            temperature: KEYWORD_TEMPERATURE,
            max_tokens: KEYWORD_MAX_TOKENS,
            ..self.params.clone()
        };
        let prompt =
            format!("Extract 3-6 important keywords or key phrases from this query:\n\n'{query}'");
        let request = GenerationRequest::new(prompt, params).with_system(KEYWORD_SYSTEM_PROMPT);

        let keywords = split_keywords(&self.complete(&request).await?);
        if keywords.is_empty() {
            return Err(RagError::SynthesisUnavailable {
                message: "generator returned no keywords".into(),
            });
        }
        Ok(keywords)
    }

    /// One generation call under the timeout, trimmed.
    async fn complete(&self, request: &GenerationRequest) -> Result<String> {
        match tokio::time::timeout(self.timeout, self.generator.generate(request)).await {
            Ok(Ok(text)) => Ok(text.trim().to_string()),
            Ok(Err(e @ RagError::SynthesisUnavailable { .. })) => Err(e),
            Ok(Err(e)) => Err(RagError::SynthesisUnavailable { message: e.to_string() }),
            Err(_) => Err(RagError::SynthesisUnavailable {
                message: format!("generation timed out after {}s", self.timeout.as_secs()),
            }),
        }
    }
}

fn write_context(prompt: &mut String, results: &[SearchResult]) {
    for (i, result) in results.iter().enumerate() {
        let _ = writeln!(
            prompt,
            "[{}] Source: {} | Relevance: {:.2}\n{}\n",
            i + 1,
            result.chunk.metadata.source,
            result.score,
            result.chunk.text
        );
    }
}

/// User prompt listing each result as a numbered, attributed context block.
pub fn build_prompt(query: &str, results: &[SearchResult]) -> String {
    let mut prompt = String::from("Context:\n\n");
    write_context(&mut prompt, results);
    let _ = write!(
        prompt,
        "Question: {query}\n\nAnswer the question using only the context above. \
         Cite the sources you rely on with their bracketed numbers, for example [1] or [2, 3]."
    );
    prompt
}

fn grading_prompt(query: &str, answer: &str) -> String {
    format!(
        "You are grading an answer's quality.\n\nQuestion:\n{query}\n\nModel answer:\n{answer}\n\n\
         Rate coherence, factuality and completeness on a scale of 0 to 10. \
         Reply with the number only."
    )
}

/// The first number in a grader reply, divided by 10, clamped to `[0, 1]` and
/// rounded to two decimals.
pub fn parse_grade(reply: &str) -> Option<f32> {
    let value: f32 = GRADE_VALUE.find(reply)?.as_str().parse().ok()?;
    Some(((value / 10.0).clamp(0.0, 1.0) * 100.0).round() / 100.0)
}

/// Keywords from a comma, semicolon or newline separated reply, de-duplicated.
pub fn split_keywords(reply: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for keyword in reply.split([',', ';', '\n']).map(str::trim).filter(|k| !k.is_empty()) {
        if !keywords.iter().any(|k| k.eq_ignore_ascii_case(keyword)) {
            keywords.push(keyword.to_string());
        }
    }
    keywords
}

/// Labels cited in `answer`, in first-cited order, limited to `1..=count`.
pub fn parse_citations(answer: &str, count: usize) -> Vec<usize> {
    let mut labels = Vec::new();
    for caps in CITATION_MARKER.captures_iter(answer) {
        for label in caps[1].split(',').filter_map(|n| n.trim().parse::<usize>().ok()) {
            if (1..=count).contains(&label) && !labels.contains(&label) {
                labels.push(label);
            }
        }
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::fixtures;

    #[test]
    fn citations_keep_first_cited_order() {
        let answer = "Gradient descent [2] minimizes loss [1, 2]. See also [7] and [0].";
        assert_eq!(parse_citations(answer, 3), vec![2, 1]);
        assert!(parse_citations("no markers here", 3).is_empty());
    }

    #[test]
    fn prompt_lists_sources_with_relevance() {
        let chunk = fixtures::chunk("notes.md", 0, "Neural nets learn.");
        let mut result = SearchResult::new(Arc::new(chunk), 0.8);
        result.score = 0.756;
        let prompt = build_prompt("how do nets learn?", &[result]);
        assert!(prompt.contains("[1] Source: notes.md | Relevance: 0.76\nNeural nets learn."));
        assert!(prompt.contains("Question: how do nets learn?"));
    }

    #[test]
    fn no_relevant_information_has_zero_confidence() {
        let answer = Answer::no_relevant_information();
        assert_eq!(answer.confidence, 0.0);
        assert_eq!(answer.status, AnswerStatus::NoResults);
        assert!(answer.citations.is_empty());
    }

    #[test]
    fn grades_scale_to_unit_interval() {
        assert_eq!(parse_grade("8"), Some(0.8));
        assert_eq!(parse_grade("Score: 7.5/10"), Some(0.75));
        assert_eq!(parse_grade("12"), Some(1.0));
        assert_eq!(parse_grade("excellent"), None);
        assert_eq!(Grading::Degraded { reason: "down".into() }.score(), 0.0);
    }

    #[test]
    fn keywords_split_on_separators() {
        let reply = "machine learning, neural networks; Machine Learning\n\n gradient descent ";
        assert_eq!(
            split_keywords(reply),
            vec!["machine learning", "neural networks", "gradient descent"]
        );
    }
}
