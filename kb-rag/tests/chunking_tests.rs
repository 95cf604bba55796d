//! Property and scenario tests for token chunking.

mod common;

use kb_rag::chunking::{Chunker, TokenChunker, chunk};
use kb_rag::tokenizer::count_tokens;
use proptest::prelude::*;

fn numbered_words(n: usize) -> String {
    (0..n).map(|i| format!("t{i}")).collect::<Vec<_>>().join(" ")
}

/// Words, sentence ends and paragraph breaks in arbitrary order.
fn arb_text() -> impl Strategy<Value = String> {
    proptest::collection::vec(
        prop_oneof![
            6 => "[a-z]{1,8}".prop_map(|w| format!("{w} ")),
            1 => Just(". ".to_string()),
            1 => Just("\n".to_string()),
        ],
        1..400,
    )
    .prop_map(|parts| parts.concat())
    .prop_filter("needs a token", |text| count_tokens(text) > 0)
}

#[test]
fn scenario_2500_tokens_with_default_sizes() {
    let text = numbered_words(2500);
    let chunks = chunk(&text, 1000, 200, common::metadata("long.txt", ".txt")).unwrap();

    let sizes: Vec<usize> = chunks.iter().map(|c| c.token_count()).collect();
    assert_eq!(sizes, vec![1000, 1000, 900]);
    let spans: Vec<(usize, usize)> = chunks.iter().map(|c| (c.start_token, c.end_token)).collect();
    assert_eq!(spans, vec![(0, 1000), (800, 1800), (1600, 2500)]);
    assert_eq!(chunks[0].overlap_tokens, 0);
    assert!(chunks[1..].iter().all(|c| c.overlap_tokens == 200));
    assert!(chunks[2].text.starts_with("t1600 "));
    assert!(chunks[2].text.ends_with("t2499"));
}

#[test]
fn short_document_yields_single_chunk_equal_to_text() {
    let text = "Rust has no garbage collector.\nOwnership rules are checked at compile time.";
    let chunks = chunk(text, 1000, 200, common::metadata("short.md", ".md")).unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, text);
    assert_eq!(chunks[0].token_count(), count_tokens(text));
}

#[test]
fn chunks_share_document_metadata() {
    let metadata = common::metadata("shared.txt", ".txt");
    let chunks = chunk(&numbered_words(50), 10, 2, metadata.clone()).unwrap();
    assert!(chunks.len() > 1);
    assert!(chunks.iter().all(|c| std::sync::Arc::ptr_eq(&c.metadata, &metadata)));
    let ordinals: Vec<usize> = chunks.iter().map(|c| c.id.ordinal).collect();
    assert_eq!(ordinals, (0..chunks.len()).collect::<Vec<_>>());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Consecutive chunks overlap by exactly the configured number of tokens,
    /// no chunk exceeds the maximum, and together they cover the document.
    #[test]
    fn overlap_is_exact_and_coverage_complete(
        text in arb_text(),
        max in 2usize..60,
        overlap_ratio in 0.0f64..1.0,
        window in 0usize..40,
    ) {
        let overlap = ((max - 1) as f64 * overlap_ratio) as usize;
        let chunker = TokenChunker::new(max, overlap).unwrap().with_boundary_window(window);
        let chunks = chunker.chunk(&text, common::metadata("p.txt", ".txt")).unwrap();
        let n = count_tokens(&text);

        prop_assert!(!chunks.is_empty());
        prop_assert_eq!(chunks[0].start_token, 0);
        prop_assert_eq!(chunks.last().unwrap().end_token, n);
        for c in &chunks {
            prop_assert!(c.token_count() >= 1);
            prop_assert!(c.token_count() <= max);
            prop_assert_eq!(count_tokens(&c.text), c.token_count());
        }
        for pair in chunks.windows(2) {
            prop_assert_eq!(pair[0].end_token - pair[1].start_token, overlap);
            prop_assert_eq!(pair[1].overlap_tokens, overlap);
            prop_assert!(pair[1].start_token > pair[0].start_token);
        }
        if n <= max {
            prop_assert_eq!(chunks.len(), 1);
            prop_assert_eq!(chunks[0].text.as_str(), text.trim());
        }
    }
}
