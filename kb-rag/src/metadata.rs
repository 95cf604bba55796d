//! Per-document metadata extraction.
//!
//! Runs once per document on the normalized text: keyword topics by
//! frequency, dates, emails and URLs by pattern, and a stopword-count
//! language guess.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use sha2::{Digest, Sha256};
use unicode_segmentation::UnicodeSegmentation;

use crate::document::DocumentMetadata;

const MAX_TOPICS: usize = 10;
const MAX_ENTITIES: usize = 5;
const LANGUAGE_SAMPLE_WORDS: usize = 200;
const LANGUAGE_MIN_HITS: usize = 5;

const ENGLISH_STOPWORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "but", "by", "can", "could", "did", "do", "does", "for", "from", "had", "has", "have", "he",
    "her", "his", "how", "if", "in", "into", "is", "it", "its", "more", "most", "no", "not", "of",
    "on", "or", "other", "our", "out", "she", "should", "so", "some", "such", "than", "that",
    "the", "their", "them", "then", "there", "these", "they", "this", "those", "to", "up", "use",
    "used", "using", "was", "we", "were", "what", "when", "where", "which", "while", "who", "why",
    "will", "with", "would", "you", "your",
];

const LANGUAGE_MARKERS: &[(&str, &[&str])] = &[
    (
        "en",
        &[
            "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by", "is",
            "are",
        ],
    ),
    (
        "es",
        &[
            "el", "la", "los", "las", "y", "de", "que", "en", "un", "una", "por", "con", "para",
            "es",
        ],
    ),
    (
        "fr",
        &[
            "le", "la", "les", "et", "de", "des", "que", "en", "un", "une", "pour", "avec", "est",
            "dans",
        ],
    ),
    (
        "de",
        &[
            "der", "die", "das", "und", "ist", "nicht", "mit", "von", "den", "ein", "eine", "zu",
            "auf", "für",
        ],
    ),
    (
        "pt",
        &["o", "a", "os", "as", "e", "de", "que", "em", "um", "uma", "para", "com", "não", "do"],
    ),
];

static DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b
        | \b\d{4}[/-]\d{1,2}[/-]\d{1,2}\b
        | \b(?:Jan(?:uary)?|Feb(?:ruary)?|Mar(?:ch)?|Apr(?:il)?|May|June?|July?|Aug(?:ust)?
              |Sep(?:tember)?|Oct(?:ober)?|Nov(?:ember)?|Dec(?:ember)?)\.?\s\d{1,2},\s\d{4}\b",
    )
    .expect("unreachable error: invalid date pattern")
});

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
        .expect("unreachable error: invalid email pattern")
});

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s<>"'()\[\]]+"#).expect("unreachable error: invalid url pattern")
});

/// Whether `word` (lower-case) is an English stopword.
pub fn is_stopword(word: &str) -> bool {
    ENGLISH_STOPWORDS.binary_search(&word).is_ok()
}

/// Inputs for [`extract_document_metadata`].
#[derive(Debug, Clone, Copy)]
pub struct DocumentInput<'a> {
    pub source: &'a str,
    pub filename: &'a str,
    pub file_type: &'a str,
    pub text: &'a str,
    pub raw: &'a [u8],
}

/// Build the metadata shared by every chunk of a document.
pub fn extract_document_metadata(input: DocumentInput<'_>) -> DocumentMetadata {
    let text = input.text;
    DocumentMetadata {
        source: input.source.to_string(),
        filename: input.filename.to_string(),
        file_type: input.file_type.to_string(),
        language: detect_language(text).to_string(),
        text_length: text.chars().count(),
        word_count: text.split_whitespace().count(),
        topics: extract_topics(text),
        dates: first_matches(&DATE_PATTERN, text),
        emails: first_matches(&EMAIL_PATTERN, text),
        urls: extract_urls(text),
        has_numbers: text.chars().any(|c| c.is_ascii_digit()),
        content_hash: content_hash(input.raw),
        ingested_at: Utc::now(),
    }
}

/// Hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Guess the language from stopword hits in the first words of the text.
///
/// Returns `unknown` unless some language reaches the minimum number of hits.
pub fn detect_language(text: &str) -> &'static str {
    let sample: Vec<String> =
        text.unicode_words().take(LANGUAGE_SAMPLE_WORDS).map(str::to_lowercase).collect();

    let mut best: Option<(&'static str, usize)> = None;
    for &(code, markers) in LANGUAGE_MARKERS {
        let hits = sample.iter().filter(|w| markers.contains(&w.as_str())).count();
        if hits >= LANGUAGE_MIN_HITS && best.is_none_or(|(_, top)| hits > top) {
            best = Some((code, hits));
        }
    }
    best.map(|(code, _)| code).unwrap_or("unknown")
}

/// Most frequent content words; capitalized occurrences count double.
///
/// Words shorter than four letters, stopwords and anything that is not purely
/// alphabetic are ignored. Ties are broken alphabetically.
pub fn extract_topics(text: &str) -> Vec<String> {
    let mut weights: HashMap<String, usize> = HashMap::new();
    for word in text.unicode_words() {
        if word.chars().count() < 4 || !word.chars().all(char::is_alphabetic) {
            continue;
        }
        let lower = word.to_lowercase();
        if is_stopword(&lower) {
            continue;
        }
        let weight = if word.chars().next().is_some_and(char::is_uppercase) { 2 } else { 1 };
        *weights.entry(lower).or_default() += weight;
    }

    let mut ranked: Vec<(String, usize)> = weights.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(MAX_TOPICS).map(|(word, _)| word).collect()
}

fn extract_urls(text: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for m in URL_PATTERN.find_iter(text) {
        let url = m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']);
        if !urls.iter().any(|u| u == url) {
            urls.push(url.to_string());
        }
        if urls.len() == MAX_ENTITIES {
            break;
        }
    }
    urls
}

/// Distinct matches in first-seen order, capped.
fn first_matches(pattern: &Regex, text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for m in pattern.find_iter(text) {
        if !found.iter().any(|f| f == m.as_str()) {
            found.push(m.as_str().to_string());
        }
        if found.len() == MAX_ENTITIES {
            break;
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopwords_are_sorted_for_binary_search() {
        let mut sorted = ENGLISH_STOPWORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, ENGLISH_STOPWORDS);
        assert!(is_stopword("the"));
        assert!(!is_stopword("learning"));
    }

    #[test]
    fn detects_english_and_falls_back_to_unknown() {
        let english = "The model is trained on the data and then it is evaluated in the lab \
                       for accuracy, with care and at scale.";
        assert_eq!(detect_language(english), "en");
        assert_eq!(detect_language("Lorem ipsum dolor sit amet"), "unknown");
    }

    #[test]
    fn detects_spanish() {
        let spanish = "El modelo de la empresa es para los clientes y las tiendas que están en \
                       la ciudad con un plan de ventas por una semana";
        assert_eq!(detect_language(spanish), "es");
    }

    #[test]
    fn topics_prefer_frequent_capitalized_words() {
        let text = "Kubernetes schedules pods. Kubernetes restarts pods. Containers run in pods.";
        let topics = extract_topics(text);
        assert_eq!(topics[0], "kubernetes");
        assert!(topics.contains(&"pods".to_string()));
        assert!(!topics.contains(&"in".to_string()));
    }

    #[test]
    fn entities_are_capped_and_deduplicated() {
        let text = "Mail ops@example.com or ops@example.com. Due 12/05/2024 and 2024-06-01, \
                    kickoff March 3, 2024. See https://example.com/docs. and http://a.io";
        let meta = extract_document_metadata(DocumentInput {
            source: "plan.txt",
            filename: "plan.txt",
            file_type: ".txt",
            text,
            raw: text.as_bytes(),
        });
        assert_eq!(meta.emails, vec!["ops@example.com"]);
        assert_eq!(meta.dates, vec!["12/05/2024", "2024-06-01", "March 3, 2024"]);
        assert_eq!(meta.urls, vec!["https://example.com/docs", "http://a.io"]);
        assert!(meta.has_numbers);
        assert_eq!(meta.content_hash.len(), 64);
    }
}
