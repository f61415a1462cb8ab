//! Hand-written recursive-descent-friendly lexer.
//!
//! Assumes validated UTF-8 source, per spec §9's open question: incomplete
//! UTF-8 handling is explicitly left out of scope here too.

use crate::token::{keyword, StringPart, Token, TokenKind};
use rill_common::{Position, RillError, RillResult, Span};
use unicode_xid::UnicodeXID;

pub struct Lexer<'a> {
    src: &'a str,
    chars: std::str::CharIndices<'a>,
    peeked: Option<(usize, char)>,
    line: u32,
    column: u32,
    file_id: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, file_id: u32) -> Self {
        let mut chars = src.char_indices();
        let peeked = chars.next();
        Self { src, chars, peeked, line: 1, column: 1, file_id }
    }

    fn pos(&self, offset: usize) -> Position {
        Position::new(self.line, self.column, offset as u32)
    }

    fn peek(&self) -> Option<char> {
        self.peeked.map(|(_, c)| c)
    }

    fn peek_offset(&self) -> usize {
        self.peeked.map(|(i, _)| i).unwrap_or(self.src.len())
    }

    fn bump(&mut self) -> Option<char> {
        let (_, c) = self.peeked?;
        self.peeked = self.chars.next();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn eat_while(&mut self, mut pred: impl FnMut(char) -> bool) -> usize {
        let start = self.peek_offset();
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.bump();
        }
        self.peek_offset().max(start) - start + start
    }

    pub fn tokenize(mut self) -> RillResult<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let start_off = self.peek_offset();
            let start = self.pos(start_off);
            let Some(c) = self.peek() else {
                tokens.push(Token { kind: TokenKind::Eof, span: Span::single(start, self.file_id) });
                break;
            };
            let kind = if c.is_ascii_digit() {
                self.lex_number()?
            } else if c == '"' {
                self.lex_string()?
            } else if c == '_' || UnicodeXID::is_xid_start(c) {
                self.lex_ident()
            } else {
                self.lex_operator()?
            };
            let end = self.pos(self.peek_offset());
            tokens.push(Token { kind, span: Span::new(start, end, self.file_id) });
        }
        Ok(tokens)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') => {
                    // Peek ahead without consuming unless it's really a comment.
                    let mut lookahead = self.chars.clone();
                    if lookahead.next().map(|(_, c)| c) == Some('/') {
                        self.bump();
                        self.bump();
                        self.eat_while(|c| c != '\n');
                    } else {
                        break;
                    }
                }
                _ => break,
            }
        }
    }

    fn lex_number(&mut self) -> RillResult<TokenKind> {
        let start = self.peek_offset();
        self.eat_while(|c| c.is_ascii_digit());
        let mut is_float = false;
        if self.peek() == Some('.') {
            let mut lookahead = self.chars.clone();
            if lookahead.next().map(|(_, c)| c.is_ascii_digit()).unwrap_or(false) {
                is_float = true;
                self.bump();
                self.eat_while(|c| c.is_ascii_digit());
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            is_float = true;
            self.bump();
            if matches!(self.peek(), Some('+') | Some('-')) {
                self.bump();
            }
            self.eat_while(|c| c.is_ascii_digit());
        }
        let end = self.peek_offset();
        let text = &self.src[start..end];
        if is_float {
            let v: f64 = text
                .parse()
                .map_err(|_| RillError::lex_error(format!("invalid float literal '{text}'")))?;
            Ok(TokenKind::Float(v))
        } else {
            let v: i64 = text
                .parse()
                .map_err(|_| RillError::lex_error(format!("invalid integer literal '{text}'")))?;
            Ok(TokenKind::Integer(v))
        }
    }

    fn lex_ident(&mut self) -> TokenKind {
        let start = self.peek_offset();
        self.eat_while(|c| c == '_' || UnicodeXID::is_xid_continue(c));
        let end = self.peek_offset();
        let text = &self.src[start..end];
        keyword(text).unwrap_or_else(|| TokenKind::Identifier(text.to_string()))
    }

    /// Lexes a string literal, splitting `${ ... }` interpolations into
    /// parts. Nested braces inside an interpolation are balanced so a
    /// record literal can appear inside `${}`.
    fn lex_string(&mut self) -> RillResult<TokenKind> {
        self.bump(); // opening quote
        let mut parts = Vec::new();
        let mut literal = String::new();
        loop {
            match self.bump() {
                None => return Err(RillError::lex_error("unterminated string literal")),
                Some('"') => break,
                Some('\\') => {
                    let escaped = self.bump().ok_or_else(|| RillError::lex_error("unterminated escape"))?;
                    literal.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '\\' => '\\',
                        '"' => '"',
                        '$' => '$',
                        other => other,
                    });
                }
                Some('$') if self.peek() == Some('{') => {
                    self.bump(); // '{'
                    if !literal.is_empty() {
                        parts.push(StringPart::Literal(std::mem::take(&mut literal)));
                    }
                    let mut depth = 1usize;
                    let mut expr = String::new();
                    loop {
                        match self.bump() {
                            None => return Err(RillError::lex_error("unterminated interpolation")),
                            Some('{') => {
                                depth += 1;
                                expr.push('{');
                            }
                            Some('}') => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                                expr.push('}');
                            }
                            Some(c) => expr.push(c),
                        }
                    }
                    parts.push(StringPart::Expr(expr));
                }
                Some(c) => literal.push(c),
            }
        }
        if !literal.is_empty() || parts.is_empty() {
            parts.push(StringPart::Literal(literal));
        }
        Ok(TokenKind::Str(parts))
    }

    fn lex_operator(&mut self) -> RillResult<TokenKind> {
        let c = self.bump().unwrap();
        let kind = match c {
            '+' => TokenKind::Plus,
            '-' => {
                if self.peek() == Some('>') {
                    self.bump();
                    TokenKind::Arrow
                } else {
                    TokenKind::Minus
                }
            }
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '^' => TokenKind::Caret,
            '~' => TokenKind::Tilde,
            '=' => {
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::EqEq
                } else {
                    TokenKind::Assign
                }
            }
            '!' => {
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::NotEq
                } else {
                    TokenKind::Bang
                }
            }
            '<' => {
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::LtEq
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::GtEq
                } else {
                    TokenKind::Gt
                }
            }
            '&' => {
                if self.peek() == Some('&') {
                    self.bump();
                    TokenKind::AndAnd
                } else {
                    return Err(RillError::lex_error("unexpected character '&'"));
                }
            }
            '|' => {
                if self.peek() == Some('|') {
                    self.bump();
                    TokenKind::OrOr
                } else {
                    return Err(RillError::lex_error("unexpected character '|'"));
                }
            }
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            ';' => TokenKind::Semi,
            '.' => TokenKind::Dot,
            '#' => TokenKind::Hash,
            other => return Err(RillError::lex_error(format!("unexpected character '{other}'"))),
        };
        Ok(kind)
    }
}

pub fn tokenize(src: &str, file_id: u32) -> RillResult<Vec<Token>> {
    Lexer::new(src, file_id).tokenize()
}
