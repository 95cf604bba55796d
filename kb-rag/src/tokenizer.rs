//! Deterministic word-level tokenizer.
//!
//! Tokens are the non-whitespace segments produced by Unicode word-boundary
//! segmentation: words and numbers are one token each, every punctuation mark
//! is its own token. Token counts therefore only depend on the text, which is
//! all the chunker needs for stable boundaries.

use unicode_segmentation::UnicodeSegmentation;

/// A token as a byte span into the text it was cut from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub start: usize,
    pub end: usize,
}

impl Token {
    /// The token's text within `text`.
    pub fn as_str<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.end]
    }
}

/// Split `text` into tokens.
pub fn tokenize(text: &str) -> Vec<Token> {
    text.split_word_bound_indices()
        .filter(|(_, segment)| !segment.chars().all(char::is_whitespace))
        .map(|(start, segment)| Token { start, end: start + segment.len() })
        .collect()
}

/// Number of tokens in `text`.
pub fn count_tokens(text: &str) -> usize {
    text.split_word_bound_indices()
        .filter(|(_, segment)| !segment.chars().all(char::is_whitespace))
        .count()
}

/// Lower-cased word tokens (tokens containing at least one alphanumeric character).
pub fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.unicode_words().map(str::to_lowercase)
}

/// Whether a chunk may end after token `index`.
///
/// True when the token closes a sentence or when a paragraph break follows it.
pub(crate) fn is_boundary(text: &str, tokens: &[Token], index: usize) -> bool {
    let token = tokens[index].as_str(text);
    if matches!(token, "." | "!" | "?") {
        return true;
    }
    match tokens.get(index + 1) {
        Some(next) => text[tokens[index].end..next.start].contains('\n'),
        None => true,
    }
}
