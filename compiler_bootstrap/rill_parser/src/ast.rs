//! Abstract syntax tree for Rill source text.
//!
//! Every node carries a stable [`NodeId`], used as a key into the side
//! tables built during semantic analysis (`rill_sema`): node-id → symbol-id
//! and node-id → expression-type. Nodes are tagged with a kind from the
//! closed variant set described in spec §3: Expr, Stmt, Decl, Item,
//! Binding, Literal.

use rill_common::{InternedStr, Span};

pub type NodeId = u32;

#[derive(Debug, Clone, Default)]
pub struct NodeIdGen(NodeId);

impl NodeIdGen {
    pub fn next(&mut self) -> NodeId {
        let id = self.0;
        self.0 += 1;
        id
    }
}

#[derive(Debug, Clone)]
pub struct Program {
    pub items: Vec<Item>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Item {
    pub id: NodeId,
    pub kind: ItemKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ItemKind {
    Function(Function),
    Import(Import),
}

#[derive(Debug, Clone)]
pub struct Import {
    pub id: NodeId,
    pub binding: Binding,
    pub path: InternedStr,
    pub span: Span,
}

/// A name binding: function/closure parameter, or the declared name of a
/// `var`/`const` statement.
#[derive(Debug, Clone)]
pub struct Binding {
    pub id: NodeId,
    pub name: InternedStr,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub id: NodeId,
    /// `None` for anonymous closures (`func(...) { ... }` used as an
    /// expression).
    pub name: Option<InternedStr>,
    pub params: Vec<Binding>,
    pub body: Block,
    pub exported: bool,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub id: NodeId,
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub id: NodeId,
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    /// `var name = init;` / `const name = init;`
    Decl { binding: Binding, init: Expr, mutable: bool },
    Expr(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Literal {
    Null,
    Bool(bool),
}

#[derive(Debug, Clone)]
pub enum StringPiece {
    Literal(String),
    Expr(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Pos,
    Not,
    BitNot,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub id: NodeId,
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(Literal),
    Integer(i64),
    Float(f64),
    /// A (possibly interpolated) string literal. A single `Literal` piece
    /// is the common case; adjacent literal pieces are folded by the
    /// parser so `"a" "b"`-style trivial interpolations collapse to one
    /// piece at parse time (spec §8 boundary behavior).
    Str(Vec<StringPiece>),
    Ident(InternedStr),
    Unary { op: UnOp, operand: Box<Expr> },
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Logical { op: LogicalOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Assign { target: Box<Expr>, value: Box<Expr> },
    Call { callee: Box<Expr>, args: Vec<Expr> },
    MethodCall { receiver: Box<Expr>, method: InternedStr, args: Vec<Expr> },
    Field { object: Box<Expr>, name: InternedStr },
    Index { object: Box<Expr>, index: Box<Expr> },
    Array(Vec<Expr>),
    Tuple(Vec<Expr>),
    Record(Vec<(InternedStr, Expr)>),
    Set(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Func(Box<Function>),
    Block(Box<Block>),
    If { cond: Box<Expr>, then_branch: Box<Block>, else_branch: Option<Box<Expr>> },
    While { cond: Box<Expr>, body: Box<Block> },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
        body: Box<Block>,
    },
    Return(Option<Box<Expr>>),
    Break,
    Continue,
}
