//! Name resolution and expression-type tagging.
//!
//! Walks the AST once, building the [`ScopeTree`] and [`Symbol`] table and
//! the node-id → symbol-id / node-id → [`ExprType`] side tables that IR
//! construction consumes (spec §4.1).

use hashbrown::HashMap;
use rill_common::{Diagnostics, InternedStr};
use rill_parser::*;

use crate::types::{ExprType, ScopeId, ScopeKind, ScopeTree, Symbol, SymbolId, SymbolKind};

pub struct SemanticTables {
    pub scopes: ScopeTree,
    pub symbols: Vec<Symbol>,
    pub node_symbol: HashMap<NodeId, SymbolId>,
    pub node_type: HashMap<NodeId, ExprType>,
    pub diagnostics: Diagnostics,
}

struct Resolver {
    scopes: ScopeTree,
    symbols: Vec<Symbol>,
    node_symbol: HashMap<NodeId, SymbolId>,
    node_type: HashMap<NodeId, ExprType>,
    diagnostics: Diagnostics,
    global_cache: HashMap<InternedStr, SymbolId>,
    /// Innermost enclosing function/closure node id, `None` at file scope.
    current_function: Option<NodeId>,
}

/// `continue`/`break` and `return` all produce a [`ExprType::Never`]
/// subtree; nothing else does.
pub fn analyze(program: &Program) -> SemanticTables {
    let mut r = Resolver {
        scopes: ScopeTree::new(),
        symbols: Vec::new(),
        node_symbol: HashMap::new(),
        node_type: HashMap::new(),
        diagnostics: Diagnostics::new(),
        global_cache: HashMap::new(),
        current_function: None,
    };
    let global = r.scopes.create(ScopeKind::Global, None);
    let file = r.scopes.create(ScopeKind::File, Some(global));

    // Function declarations are hoisted: active throughout the enclosing
    // (file) scope regardless of textual order.
    for item in &program.items {
        if let ItemKind::Function(f) = &item.kind {
            if let Some(name) = f.name {
                r.declare(file, name, SymbolKind::Module, f.id, true, f.span);
            }
        } else if let ItemKind::Import(imp) = &item.kind {
            r.declare(file, imp.binding.name, SymbolKind::Module, imp.id, true, imp.span);
        }
    }

    for item in &program.items {
        if let ItemKind::Function(f) = &item.kind {
            r.resolve_function(f, file);
        }
    }

    SemanticTables {
        scopes: r.scopes,
        symbols: r.symbols,
        node_symbol: r.node_symbol,
        node_type: r.node_type,
        diagnostics: r.diagnostics,
    }
}

impl Resolver {
    fn declare(&mut self, scope: ScopeId, name: InternedStr, kind: SymbolKind, node: NodeId, active: bool, span: rill_common::Span) -> SymbolId {
        let id = self.symbols.len() as SymbolId;
        let owner_function = if matches!(kind, SymbolKind::Parameter | SymbolKind::Local) {
            self.current_function
        } else {
            None
        };
        self.symbols.push(Symbol { name, kind, declaring_node: node, scope, captured: false, active, owner_function });
        if let Err(_existing) = self.scopes.declare(scope, name, id) {
            self.diagnostics.error("duplicate declaration in this scope", span);
        }
        self.node_symbol.insert(node, id);
        id
    }

    fn resolve_function(&mut self, f: &Function, declaring_scope: ScopeId) {
        let enclosing_function = self.current_function;
        self.current_function = Some(f.id);
        let params_scope = self.scopes.create(ScopeKind::Parameters, Some(declaring_scope));
        for p in &f.params {
            self.declare(params_scope, p.name, SymbolKind::Parameter, p.id, true, p.span);
        }
        let body_scope = self.scopes.create(ScopeKind::FunctionBody, Some(params_scope));
        let ty = self.resolve_block(&f.body, body_scope);
        self.node_type.insert(f.body.id, ty);
        self.current_function = enclosing_function;
    }

    /// Resolves a block's statements in order, returning its [`ExprType`].
    fn resolve_block(&mut self, block: &Block, scope: ScopeId) -> ExprType {
        let mut ty = ExprType::Value; // empty block / trailing decl => implicit null
        for (i, stmt) in block.stmts.iter().enumerate() {
            let last = i == block.stmts.len() - 1;
            match &stmt.kind {
                StmtKind::Decl { binding, init, mutable: _ } => {
                    self.resolve_expr(init, scope);
                    self.declare(scope, binding.name, SymbolKind::Local, binding.id, true, binding.span);
                    if last {
                        ty = ExprType::Value;
                    }
                }
                StmtKind::Expr(expr) => {
                    let t = self.resolve_expr(expr, scope);
                    if last {
                        ty = t;
                    }
                }
            }
        }
        ty
    }

    fn resolve_expr(&mut self, expr: &Expr, scope: ScopeId) -> ExprType {
        let ty = match &expr.kind {
            ExprKind::Literal(_) | ExprKind::Integer(_) | ExprKind::Float(_) => ExprType::Value,
            ExprKind::Str(pieces) => {
                for p in pieces {
                    if let StringPiece::Expr(e) = p {
                        self.resolve_expr(e, scope);
                    }
                }
                ExprType::Value
            }
            ExprKind::Ident(name) => {
                self.resolve_ident(expr.id, *name, scope);
                ExprType::Value
            }
            ExprKind::Unary { operand, .. } => {
                self.resolve_expr(operand, scope);
                ExprType::Value
            }
            ExprKind::Binary { lhs, rhs, .. } | ExprKind::Logical { lhs, rhs, .. } => {
                self.resolve_expr(lhs, scope);
                self.resolve_expr(rhs, scope);
                ExprType::Value
            }
            ExprKind::Assign { target, value } => {
                self.resolve_expr(value, scope);
                self.resolve_lvalue(target, scope);
                ExprType::Value
            }
            ExprKind::Call { callee, args } => {
                self.resolve_expr(callee, scope);
                for a in args {
                    self.resolve_expr(a, scope);
                }
                ExprType::Value
            }
            ExprKind::MethodCall { receiver, args, .. } => {
                self.resolve_expr(receiver, scope);
                for a in args {
                    self.resolve_expr(a, scope);
                }
                ExprType::Value
            }
            ExprKind::Field { object, .. } => {
                self.resolve_expr(object, scope);
                ExprType::Value
            }
            ExprKind::Index { object, index } => {
                self.resolve_expr(object, scope);
                self.resolve_expr(index, scope);
                ExprType::Value
            }
            ExprKind::Array(items) | ExprKind::Tuple(items) | ExprKind::Set(items) => {
                for i in items {
                    self.resolve_expr(i, scope);
                }
                ExprType::Value
            }
            ExprKind::Record(fields) => {
                for (_, v) in fields {
                    self.resolve_expr(v, scope);
                }
                ExprType::Value
            }
            ExprKind::Map(entries) => {
                for (k, v) in entries {
                    self.resolve_expr(k, scope);
                    self.resolve_expr(v, scope);
                }
                ExprType::Value
            }
            ExprKind::Func(f) => {
                self.resolve_function(f, scope);
                ExprType::Value
            }
            ExprKind::Block(block) => {
                let inner = self.scopes.create(ScopeKind::Block, Some(scope));
                self.resolve_block(block, inner)
            }
            ExprKind::If { cond, then_branch, else_branch } => {
                self.resolve_expr(cond, scope);
                let then_scope = self.scopes.create(ScopeKind::Block, Some(scope));
                let then_ty = self.resolve_block(then_branch, then_scope);
                match else_branch {
                    Some(e) => {
                        let else_ty = self.resolve_expr(e, scope);
                        then_ty.join(else_ty)
                    }
                    None => ExprType::None,
                }
            }
            ExprKind::While { cond, body } => {
                self.resolve_expr(cond, scope);
                let loop_scope = self.scopes.create(ScopeKind::LoopBody, Some(scope));
                self.resolve_block(body, loop_scope);
                ExprType::None
            }
            ExprKind::For { init, cond, step, body } => {
                let for_scope = self.scopes.create(ScopeKind::ForStmtDecls, Some(scope));
                if let Some(init) = init {
                    match &init.kind {
                        StmtKind::Decl { binding, init, .. } => {
                            self.resolve_expr(init, for_scope);
                            self.declare(for_scope, binding.name, SymbolKind::Local, binding.id, true, binding.span);
                        }
                        StmtKind::Expr(e) => {
                            self.resolve_expr(e, for_scope);
                        }
                    }
                }
                if let Some(c) = cond {
                    self.resolve_expr(c, for_scope);
                }
                let loop_scope = self.scopes.create(ScopeKind::LoopBody, Some(for_scope));
                self.resolve_block(body, loop_scope);
                if let Some(s) = step {
                    self.resolve_expr(s, for_scope);
                }
                ExprType::None
            }
            ExprKind::Return(value) => {
                if let Some(v) = value {
                    self.resolve_expr(v, scope);
                }
                ExprType::Never
            }
            ExprKind::Break | ExprKind::Continue => ExprType::Never,
        };
        self.node_type.insert(expr.id, ty);
        ty
    }

    /// An assignment target must be an identifier, field, or index
    /// expression; resolving it marks the underlying binding read/write
    /// without double-counting it as a value-producing load for `Ident`.
    fn resolve_lvalue(&mut self, target: &Expr, scope: ScopeId) {
        match &target.kind {
            ExprKind::Ident(name) => self.resolve_ident(target.id, *name, scope),
            ExprKind::Field { object, .. } => self.resolve_expr(object, scope),
            ExprKind::Index { object, index } => {
                self.resolve_expr(object, scope);
                self.resolve_expr(index, scope);
            }
            _ => {
                self.diagnostics.error("invalid assignment target", target.span);
            }
        }
        self.node_type.insert(target.id, ExprType::Value);
    }

    fn resolve_ident(&mut self, node: NodeId, name: InternedStr, scope: ScopeId) {
        match self.scopes.lookup(scope, name) {
            Some((sym, owning_scope)) => {
                self.node_symbol.insert(node, sym);
                // Mark captured if the reference crosses a FunctionBody
                // boundary between the use site and the declaring scope.
                if self.crosses_function_boundary(scope, owning_scope) {
                    self.symbols[sym as usize].captured = true;
                }
            }
            None => {
                let sym = *self.global_cache.entry(name).or_insert_with(|| {
                    let id = self.symbols.len() as SymbolId;
                    self.symbols.push(Symbol {
                        name,
                        kind: SymbolKind::Global,
                        declaring_node: node,
                        scope,
                        captured: false,
                        active: true,
                        owner_function: None,
                    });
                    id
                });
                self.node_symbol.insert(node, sym);
            }
        }
    }

    fn crosses_function_boundary(&self, use_scope: ScopeId, declaring_scope: ScopeId) -> bool {
        let mut current = Some(use_scope);
        while let Some(s) = current {
            if s == declaring_scope {
                return false;
            }
            if self.scopes.kind(s) == ScopeKind::FunctionBody || self.scopes.kind(s) == ScopeKind::Parameters {
                return true;
            }
            current = self.scopes.parent(s);
        }
        true
    }
}
