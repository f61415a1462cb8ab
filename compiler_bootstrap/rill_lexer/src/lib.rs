//! Lexical analysis for Rill source text.
//!
//! Out of the core specification per spec §1 ("the lexer and parser that
//! produce the parser event stream" are external collaborators); kept here
//! as a concrete, minimal producer so the rest of the pipeline is
//! end-to-end testable.

pub mod lexer;
pub mod token;

pub use lexer::{tokenize, Lexer};
pub use token::{keyword, StringPart, Token, TokenKind};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_keywords_and_identifiers() {
        let toks = tokenize("export func f() {}", 0).unwrap();
        let kinds: Vec<_> = toks.iter().map(|t| &t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                &TokenKind::KwExport,
                &TokenKind::KwFunc,
                &TokenKind::Identifier("f".to_string()),
                &TokenKind::LParen,
                &TokenKind::RParen,
                &TokenKind::LBrace,
                &TokenKind::RBrace,
                &TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn tokenizes_numbers() {
        let toks = tokenize("1 2.5 10e3", 0).unwrap();
        assert_eq!(toks[0].kind, TokenKind::Integer(1));
        assert_eq!(toks[1].kind, TokenKind::Float(2.5));
        assert_eq!(toks[2].kind, TokenKind::Float(10e3));
    }

    #[test]
    fn splits_string_interpolation() {
        let toks = tokenize(r#""Hello ${name}!""#, 0).unwrap();
        match &toks[0].kind {
            TokenKind::Str(parts) => {
                assert_eq!(
                    parts,
                    &vec![
                        StringPart::Literal("Hello ".to_string()),
                        StringPart::Expr("name".to_string()),
                        StringPart::Literal("!".to_string()),
                    ]
                );
            }
            other => panic!("expected string token, got {other:?}"),
        }
    }

    #[test]
    fn skips_line_comments() {
        let toks = tokenize("1 // comment\n2", 0).unwrap();
        assert_eq!(toks[0].kind, TokenKind::Integer(1));
        assert_eq!(toks[1].kind, TokenKind::Integer(2));
    }
}
