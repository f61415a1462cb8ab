//! Token definitions for Rill source text.

use rill_common::Span;
use std::fmt;

/// A piece of a string-interpolation literal, e.g. the three parts of
/// `"a${x}b"`: `Literal("a")`, `Expr("x")`, `Literal("b")`.
#[derive(Debug, Clone, PartialEq)]
pub enum StringPart {
    Literal(String),
    /// Raw, unlexed source text of an embedded `${ ... }` expression; the
    /// parser re-lexes and parses it as a nested expression.
    Expr(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Integer(i64),
    Float(f64),
    /// Parts of a (possibly interpolated) string literal.
    Str(Vec<StringPart>),
    Identifier(String),

    // Keywords
    KwFunc,
    KwVar,
    KwConst,
    KwIf,
    KwElse,
    KwWhile,
    KwFor,
    KwIn,
    KwReturn,
    KwBreak,
    KwContinue,
    KwTrue,
    KwFalse,
    KwNull,
    KwExport,
    KwImport,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret, // pow
    Assign,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
    Bang,
    Tilde,

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Semi,
    Dot,
    Hash, // set/map literal prefix `#{`
    Arrow,

    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

pub fn keyword(ident: &str) -> Option<TokenKind> {
    Some(match ident {
        "func" => TokenKind::KwFunc,
        "var" => TokenKind::KwVar,
        "const" => TokenKind::KwConst,
        "if" => TokenKind::KwIf,
        "else" => TokenKind::KwElse,
        "while" => TokenKind::KwWhile,
        "for" => TokenKind::KwFor,
        "in" => TokenKind::KwIn,
        "return" => TokenKind::KwReturn,
        "break" => TokenKind::KwBreak,
        "continue" => TokenKind::KwContinue,
        "true" => TokenKind::KwTrue,
        "false" => TokenKind::KwFalse,
        "null" => TokenKind::KwNull,
        "export" => TokenKind::KwExport,
        "import" => TokenKind::KwImport,
        _ => return None,
    })
}
