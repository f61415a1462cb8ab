//! Property-based smoke test: the lexer is a partial function from text to
//! `Result`, never a partial function from text to a panic. This is the
//! minimum property-of-a-lexer worth fuzzing since `tokenize` is the one
//! piece of this workspace that sees truly arbitrary input (source text),
//! everything downstream only sees well-formed tokens.

use proptest::prelude::*;
use rill_lexer::tokenize;

proptest! {
    #[test]
    fn tokenize_never_panics_on_arbitrary_text(src in ".{0,200}") {
        let _ = tokenize(&src, 0);
    }

    #[test]
    fn tokenize_never_panics_on_arbitrary_bytes(bytes in prop::collection::vec(any::<u8>(), 0..200)) {
        if let Ok(src) = std::str::from_utf8(&bytes) {
            let _ = tokenize(src, 0);
        }
    }

    #[test]
    fn every_token_span_is_within_source_bounds(src in "[a-zA-Z0-9_ \n\t+\\-*/(){}\\[\\].,;:\"]{0,200}") {
        if let Ok(tokens) = tokenize(&src, 0) {
            for tok in &tokens {
                prop_assert!((tok.span.start.offset as usize) <= src.len());
            }
        }
    }
}
