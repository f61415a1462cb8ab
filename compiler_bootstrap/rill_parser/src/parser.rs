//! Recursive-descent parser with Pratt-style expression precedence,
//! producing the AST of `crate::ast`.

use crate::ast::*;
use crate::precedence::{infix_binding_power, InfixOp, POSTFIX_BINDING_POWER, PREFIX_BINDING_POWER};
use rill_common::{InternedStr, RillError, RillResult, Span, StringTable};
use rill_lexer::{tokenize, StringPart, Token, TokenKind};

pub struct Parser<'s> {
    tokens: Vec<Token>,
    pos: usize,
    strings: &'s mut StringTable,
    ids: NodeIdGen,
}

impl<'s> Parser<'s> {
    pub fn new(tokens: Vec<Token>, strings: &'s mut StringTable) -> Self {
        Self { tokens, pos: 0, strings, ids: NodeIdGen::default() }
    }

    pub fn parse_source(src: &str, file_id: u32, strings: &'s mut StringTable) -> RillResult<Program> {
        let tokens = tokenize(src, file_id)?;
        Parser::new(tokens, strings).parse_program()
    }

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn peek_span(&self) -> Span {
        self.tokens[self.pos.min(self.tokens.len() - 1)].span
    }

    fn bump(&mut self) -> Token {
        let tok = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    /// A `{` begins a record literal, not a block, when it is immediately
    /// followed by `identifier :` — the only shape a block's leading
    /// statement can never take (statements don't use bare colons).
    fn at_record_start(&self) -> bool {
        matches!(self.peek_at(1), TokenKind::Identifier(_)) && matches!(self.peek_at(2), TokenKind::Colon)
    }

    fn eat(&mut self, kind: &TokenKind) -> RillResult<Token> {
        if self.at(kind) {
            Ok(self.bump())
        } else {
            Err(RillError::parse_error(format!(
                "expected {:?}, found {:?} at {}",
                kind,
                self.peek(),
                self.peek_span()
            )))
        }
    }

    fn intern(&mut self, s: &str) -> InternedStr {
        self.strings.intern(s)
    }

    // ---- top level ----

    pub fn parse_program(&mut self) -> RillResult<Program> {
        let start = self.peek_span();
        let mut items = Vec::new();
        while !self.at(&TokenKind::Eof) {
            items.push(self.parse_item()?);
        }
        let end = self.peek_span();
        Ok(Program { items, span: start.combine(end) })
    }

    fn parse_item(&mut self) -> RillResult<Item> {
        let start = self.peek_span();
        let exported = if self.at(&TokenKind::KwExport) {
            self.bump();
            true
        } else {
            false
        };
        let kind = match self.peek() {
            TokenKind::KwFunc => {
                let f = self.parse_function(exported)?;
                ItemKind::Function(f)
            }
            TokenKind::KwImport => {
                self.bump();
                let name_tok = self.bump();
                let name = match name_tok.kind {
                    TokenKind::Identifier(s) => s,
                    other => return Err(RillError::parse_error(format!("expected module name, found {other:?}"))),
                };
                self.eat(&TokenKind::Semi)?;
                let id = self.ids.next();
                let path = self.intern(&name);
                let binding_id = self.ids.next();
                ItemKind::Import(Import {
                    id,
                    binding: Binding { id: binding_id, name: path, span: name_tok.span },
                    path,
                    span: name_tok.span,
                })
            }
            other => return Err(RillError::parse_error(format!("expected item, found {other:?}"))),
        };
        let end = self.peek_span();
        Ok(Item { id: self.ids.next(), kind, span: start.combine(end) })
    }

    fn parse_function(&mut self, exported: bool) -> RillResult<Function> {
        let start = self.peek_span();
        self.eat(&TokenKind::KwFunc)?;
        let name = if let TokenKind::Identifier(_) = self.peek() {
            let tok = self.bump();
            let TokenKind::Identifier(s) = tok.kind else { unreachable!() };
            Some(self.intern(&s))
        } else {
            None
        };
        let params = self.parse_param_list()?;
        let body = self.parse_block()?;
        let end = body.span;
        Ok(Function {
            id: self.ids.next(),
            name,
            params,
            body,
            exported,
            span: start.combine(end),
        })
    }

    fn parse_param_list(&mut self) -> RillResult<Vec<Binding>> {
        self.eat(&TokenKind::LParen)?;
        let mut params = Vec::new();
        while !self.at(&TokenKind::RParen) {
            let tok = self.bump();
            let TokenKind::Identifier(s) = tok.kind else {
                return Err(RillError::parse_error(format!("expected parameter name, found {:?}", tok.kind)));
            };
            let name = self.intern(&s);
            params.push(Binding { id: self.ids.next(), name, span: tok.span });
            if self.at(&TokenKind::Comma) {
                self.bump();
            } else {
                break;
            }
        }
        self.eat(&TokenKind::RParen)?;
        Ok(params)
    }

    fn parse_block(&mut self) -> RillResult<Block> {
        let start = self.peek_span();
        self.eat(&TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            stmts.push(self.parse_stmt()?);
        }
        let end = self.peek_span();
        self.eat(&TokenKind::RBrace)?;
        Ok(Block { id: self.ids.next(), stmts, span: start.combine(end) })
    }

    fn parse_stmt(&mut self) -> RillResult<Stmt> {
        let start = self.peek_span();
        let kind = match self.peek() {
            TokenKind::KwVar | TokenKind::KwConst => {
                let mutable = matches!(self.peek(), TokenKind::KwVar);
                self.bump();
                let name_tok = self.bump();
                let TokenKind::Identifier(s) = name_tok.kind else {
                    return Err(RillError::parse_error("expected binding name after var/const"));
                };
                let name = self.intern(&s);
                self.eat(&TokenKind::Assign)?;
                let init = self.parse_expr(0)?;
                self.eat(&TokenKind::Semi)?;
                StmtKind::Decl {
                    binding: Binding { id: self.ids.next(), name, span: name_tok.span },
                    init,
                    mutable,
                }
            }
            _ => {
                let expr = self.parse_expr(0)?;
                let needs_semi = !matches!(
                    expr.kind,
                    ExprKind::If { .. } | ExprKind::While { .. } | ExprKind::For { .. } | ExprKind::Block(_)
                );
                if needs_semi || self.at(&TokenKind::Semi) {
                    self.eat(&TokenKind::Semi)?;
                }
                StmtKind::Expr(expr)
            }
        };
        let end = self.peek_span();
        Ok(Stmt { id: self.ids.next(), kind, span: start.combine(end) })
    }

    // ---- expressions ----

    fn parse_expr(&mut self, min_bp: u8) -> RillResult<Expr> {
        let mut lhs = self.parse_prefix()?;
        loop {
            let Some((lbp, rbp, op)) = infix_binding_power(self.peek()) else { break };
            if lbp < min_bp {
                break;
            }
            self.bump();
            let rhs = self.parse_expr(rbp)?;
            let span = lhs.span.combine(rhs.span);
            let id = self.ids.next();
            lhs = match op {
                InfixOp::Bin(op) => Expr { id, kind: ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, span },
                InfixOp::Logical(op) => {
                    Expr { id, kind: ExprKind::Logical { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, span }
                }
                InfixOp::Assign => Expr { id, kind: ExprKind::Assign { target: Box::new(lhs), value: Box::new(rhs) }, span },
            };
        }
        Ok(lhs)
    }

    fn parse_prefix(&mut self) -> RillResult<Expr> {
        let start = self.peek_span();
        let unop = match self.peek() {
            TokenKind::Minus => Some(UnOp::Neg),
            TokenKind::Plus => Some(UnOp::Pos),
            TokenKind::Bang => Some(UnOp::Not),
            TokenKind::Tilde => Some(UnOp::BitNot),
            _ => None,
        };
        if let Some(op) = unop {
            self.bump();
            let operand = self.parse_expr(PREFIX_BINDING_POWER)?;
            let span = start.combine(operand.span);
            return Ok(Expr { id: self.ids.next(), kind: ExprKind::Unary { op, operand: Box::new(operand) }, span });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> RillResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            expr = match self.peek() {
                TokenKind::Dot => {
                    self.bump();
                    let tok = self.bump();
                    let TokenKind::Identifier(name) = tok.kind else {
                        return Err(RillError::parse_error("expected field/method name after '.'"));
                    };
                    let name = self.intern(&name);
                    if self.at(&TokenKind::LParen) {
                        let args = self.parse_arg_list()?;
                        let span = expr.span.combine(self.tokens[self.pos - 1].span);
                        Expr {
                            id: self.ids.next(),
                            kind: ExprKind::MethodCall { receiver: Box::new(expr), method: name, args },
                            span,
                        }
                    } else {
                        let span = expr.span.combine(tok.span);
                        Expr { id: self.ids.next(), kind: ExprKind::Field { object: Box::new(expr), name }, span }
                    }
                }
                TokenKind::LBracket => {
                    self.bump();
                    let index = self.parse_expr(0)?;
                    let end = self.eat(&TokenKind::RBracket)?;
                    let span = expr.span.combine(end.span);
                    Expr { id: self.ids.next(), kind: ExprKind::Index { object: Box::new(expr), index: Box::new(index) }, span }
                }
                TokenKind::LParen => {
                    let args = self.parse_arg_list()?;
                    let span = expr.span.combine(self.tokens[self.pos - 1].span);
                    Expr { id: self.ids.next(), kind: ExprKind::Call { callee: Box::new(expr), args }, span }
                }
                _ => break,
            };
            let _ = POSTFIX_BINDING_POWER;
        }
        Ok(expr)
    }

    fn parse_arg_list(&mut self) -> RillResult<Vec<Expr>> {
        self.eat(&TokenKind::LParen)?;
        let mut args = Vec::new();
        while !self.at(&TokenKind::RParen) {
            args.push(self.parse_expr(0)?);
            if self.at(&TokenKind::Comma) {
                self.bump();
            } else {
                break;
            }
        }
        self.eat(&TokenKind::RParen)?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> RillResult<Expr> {
        let start = self.peek_span();
        match self.peek().clone() {
            TokenKind::Integer(v) => {
                self.bump();
                Ok(Expr { id: self.ids.next(), kind: ExprKind::Integer(v), span: start })
            }
            TokenKind::Float(v) => {
                self.bump();
                Ok(Expr { id: self.ids.next(), kind: ExprKind::Float(v), span: start })
            }
            TokenKind::KwTrue => {
                self.bump();
                Ok(Expr { id: self.ids.next(), kind: ExprKind::Literal(Literal::Bool(true)), span: start })
            }
            TokenKind::KwFalse => {
                self.bump();
                Ok(Expr { id: self.ids.next(), kind: ExprKind::Literal(Literal::Bool(false)), span: start })
            }
            TokenKind::KwNull => {
                self.bump();
                Ok(Expr { id: self.ids.next(), kind: ExprKind::Literal(Literal::Null), span: start })
            }
            TokenKind::Str(parts) => {
                self.bump();
                let pieces = self.build_string_pieces(parts)?;
                let end = self.tokens[self.pos.saturating_sub(1)].span;
                Ok(Expr { id: self.ids.next(), kind: ExprKind::Str(pieces), span: start.combine(end) })
            }
            TokenKind::Identifier(name) => {
                self.bump();
                let handle = self.intern(&name);
                Ok(Expr { id: self.ids.next(), kind: ExprKind::Ident(handle), span: start })
            }
            TokenKind::KwFunc => {
                let f = self.parse_function(false)?;
                let span = f.span;
                Ok(Expr { id: self.ids.next(), kind: ExprKind::Func(Box::new(f)), span })
            }
            TokenKind::LBrace => {
                if self.at_record_start() {
                    self.bump();
                    self.parse_record_body(start)
                } else {
                    let block = self.parse_block()?;
                    let span = block.span;
                    Ok(Expr { id: self.ids.next(), kind: ExprKind::Block(Box::new(block)), span })
                }
            }
            TokenKind::LParen => {
                self.bump();
                if self.at(&TokenKind::RParen) {
                    let end = self.bump();
                    return Ok(Expr { id: self.ids.next(), kind: ExprKind::Tuple(vec![]), span: start.combine(end.span) });
                }
                let first = self.parse_expr(0)?;
                if self.at(&TokenKind::Comma) {
                    let mut items = vec![first];
                    while self.at(&TokenKind::Comma) {
                        self.bump();
                        if self.at(&TokenKind::RParen) {
                            break;
                        }
                        items.push(self.parse_expr(0)?);
                    }
                    let end = self.eat(&TokenKind::RParen)?;
                    Ok(Expr { id: self.ids.next(), kind: ExprKind::Tuple(items), span: start.combine(end.span) })
                } else {
                    let end = self.eat(&TokenKind::RParen)?;
                    Ok(Expr { id: first.id, kind: first.kind, span: start.combine(end.span) })
                }
            }
            TokenKind::LBracket => {
                self.bump();
                let mut items = Vec::new();
                while !self.at(&TokenKind::RBracket) {
                    items.push(self.parse_expr(0)?);
                    if self.at(&TokenKind::Comma) {
                        self.bump();
                    } else {
                        break;
                    }
                }
                let end = self.eat(&TokenKind::RBracket)?;
                Ok(Expr { id: self.ids.next(), kind: ExprKind::Array(items), span: start.combine(end.span) })
            }
            TokenKind::Hash => {
                self.bump();
                self.eat(&TokenKind::LBrace)?;
                self.parse_set_or_map(start)
            }
            TokenKind::KwIf => self.parse_if(),
            TokenKind::KwWhile => self.parse_while(),
            TokenKind::KwFor => self.parse_for(),
            TokenKind::KwReturn => {
                self.bump();
                let value = if self.at(&TokenKind::Semi) || self.at(&TokenKind::RBrace) {
                    None
                } else {
                    Some(Box::new(self.parse_expr(0)?))
                };
                Ok(Expr { id: self.ids.next(), kind: ExprKind::Return(value), span: start })
            }
            TokenKind::KwBreak => {
                self.bump();
                Ok(Expr { id: self.ids.next(), kind: ExprKind::Break, span: start })
            }
            TokenKind::KwContinue => {
                self.bump();
                Ok(Expr { id: self.ids.next(), kind: ExprKind::Continue, span: start })
            }
            other => Err(RillError::parse_error(format!("unexpected token {other:?} at {start}"))),
        }
    }

    /// Checks whether a record `{ name: expr, ... }` follows, disambiguating
    /// from a set/map literal body that opens with the same `{`.
    fn parse_set_or_map(&mut self, start: Span) -> RillResult<Expr> {
        if self.at(&TokenKind::RBrace) {
            let end = self.bump();
            return Ok(Expr { id: self.ids.next(), kind: ExprKind::Set(vec![]), span: start.combine(end.span) });
        }
        let first_key = self.parse_expr(0)?;
        if self.at(&TokenKind::Colon) {
            self.bump();
            let first_val = self.parse_expr(0)?;
            let mut entries = vec![(first_key, first_val)];
            while self.at(&TokenKind::Comma) {
                self.bump();
                if self.at(&TokenKind::RBrace) {
                    break;
                }
                let k = self.parse_expr(0)?;
                self.eat(&TokenKind::Colon)?;
                let v = self.parse_expr(0)?;
                entries.push((k, v));
            }
            let end = self.eat(&TokenKind::RBrace)?;
            Ok(Expr { id: self.ids.next(), kind: ExprKind::Map(entries), span: start.combine(end.span) })
        } else {
            let mut items = vec![first_key];
            while self.at(&TokenKind::Comma) {
                self.bump();
                if self.at(&TokenKind::RBrace) {
                    break;
                }
                items.push(self.parse_expr(0)?);
            }
            let end = self.eat(&TokenKind::RBrace)?;
            Ok(Expr { id: self.ids.next(), kind: ExprKind::Set(items), span: start.combine(end.span) })
        }
    }

    fn parse_record_body(&mut self, start: Span) -> RillResult<Expr> {
        let mut fields = Vec::new();
        loop {
            let name_tok = self.bump();
            let TokenKind::Identifier(s) = name_tok.kind else {
                return Err(RillError::parse_error(format!(
                    "expected field name in record literal, found {:?}",
                    name_tok.kind
                )));
            };
            let name = self.intern(&s);
            self.eat(&TokenKind::Colon)?;
            let value = self.parse_expr(0)?;
            fields.push((name, value));
            if self.at(&TokenKind::Comma) {
                self.bump();
                if self.at(&TokenKind::RBrace) {
                    break;
                }
            } else {
                break;
            }
        }
        let end = self.eat(&TokenKind::RBrace)?;
        Ok(Expr { id: self.ids.next(), kind: ExprKind::Record(fields), span: start.combine(end.span) })
    }

    fn parse_if(&mut self) -> RillResult<Expr> {
        let start = self.peek_span();
        self.eat(&TokenKind::KwIf)?;
        self.eat(&TokenKind::LParen)?;
        let cond = self.parse_expr(0)?;
        self.eat(&TokenKind::RParen)?;
        let then_branch = self.parse_block()?;
        let mut end = then_branch.span;
        let else_branch = if self.at(&TokenKind::KwElse) {
            self.bump();
            let e = if self.at(&TokenKind::KwIf) {
                self.parse_if()?
            } else {
                let b = self.parse_block()?;
                let span = b.span;
                Expr { id: self.ids.next(), kind: ExprKind::Block(Box::new(b)), span }
            };
            end = e.span;
            Some(Box::new(e))
        } else {
            None
        };
        Ok(Expr {
            id: self.ids.next(),
            kind: ExprKind::If { cond: Box::new(cond), then_branch: Box::new(then_branch), else_branch },
            span: start.combine(end),
        })
    }

    fn parse_while(&mut self) -> RillResult<Expr> {
        let start = self.peek_span();
        self.eat(&TokenKind::KwWhile)?;
        self.eat(&TokenKind::LParen)?;
        let cond = self.parse_expr(0)?;
        self.eat(&TokenKind::RParen)?;
        let body = self.parse_block()?;
        let end = body.span;
        Ok(Expr { id: self.ids.next(), kind: ExprKind::While { cond: Box::new(cond), body: Box::new(body) }, span: start.combine(end) })
    }

    fn parse_for(&mut self) -> RillResult<Expr> {
        let start = self.peek_span();
        self.eat(&TokenKind::KwFor)?;
        self.eat(&TokenKind::LParen)?;
        let init = if self.at(&TokenKind::Semi) {
            self.bump();
            None
        } else {
            let s = self.parse_stmt()?;
            Some(Box::new(s))
        };
        let cond = if self.at(&TokenKind::Semi) {
            None
        } else {
            Some(Box::new(self.parse_expr(0)?))
        };
        self.eat(&TokenKind::Semi)?;
        let step = if self.at(&TokenKind::RParen) {
            None
        } else {
            Some(Box::new(self.parse_expr(0)?))
        };
        self.eat(&TokenKind::RParen)?;
        let body = self.parse_block()?;
        let end = body.span;
        Ok(Expr {
            id: self.ids.next(),
            kind: ExprKind::For { init, cond, step, body: Box::new(body) },
            span: start.combine(end),
        })
    }

    /// Builds interpolation pieces, folding adjacent literal pieces and
    /// recursively parsing embedded `${expr}` source text (spec §8:
    /// "a string interpolation whose only parts are two adjacent literals
    /// folds to a single literal at compile time").
    fn build_string_pieces(&mut self, parts: Vec<StringPart>) -> RillResult<Vec<StringPiece>> {
        let mut pieces: Vec<StringPiece> = Vec::new();
        for part in parts {
            match part {
                StringPart::Literal(s) => {
                    if let Some(StringPiece::Literal(prev)) = pieces.last_mut() {
                        prev.push_str(&s);
                    } else {
                        pieces.push(StringPiece::Literal(s));
                    }
                }
                StringPart::Expr(src) => {
                    let toks = tokenize(&src, 0)?;
                    let mut sub = Parser::new(toks, self.strings);
                    let expr = sub.parse_expr(0)?;
                    pieces.push(StringPiece::Expr(Box::new(expr)));
                }
            }
        }
        if pieces.is_empty() {
            pieces.push(StringPiece::Literal(String::new()));
        }
        Ok(pieces)
    }
}
