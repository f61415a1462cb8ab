//! Symbol table and scope tree definitions (spec §3: Symbol, Scope).

use rill_common::InternedStr;
use rill_parser::NodeId;

pub type SymbolId = u32;
pub type ScopeId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Parameter,
    Local,
    Module,
    /// A free identifier not resolved against any enclosing scope; bound
    /// dynamically by the host at runtime via `LoadGlobal`.
    Global,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: InternedStr,
    pub kind: SymbolKind,
    pub declaring_node: NodeId,
    pub scope: ScopeId,
    /// Set once any function nested inside `scope` reads or writes this
    /// symbol; IR construction (spec §4.1) uses this to decide whether the
    /// symbol needs a closure-environment slot instead of a plain local.
    pub captured: bool,
    /// Whether this symbol has become active (control has passed its
    /// declaration in source order). Function declarations are active
    /// throughout the enclosing scope from the start.
    pub active: bool,
    /// Node id of the innermost enclosing function (or closure literal)
    /// that declares this symbol; `None` for module-level (file-scope)
    /// and global symbols. IR construction uses this to tell whether a
    /// reference crosses into an enclosing function's frame and therefore
    /// needs a closure environment slot rather than a plain local.
    pub owner_function: Option<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Global,
    File,
    Parameters,
    ForStmtDecls,
    FunctionBody,
    LoopBody,
    Block,
}

/// Expression type used for control-flow lowering decisions (spec §4.1):
/// `None` (no usable value, e.g. an `if` without `else`), `Value` (produces
/// a value), `Never` (control does not fall through, e.g. after `return`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprType {
    None,
    Value,
    Never,
}

impl ExprType {
    /// Joins the types of two control-flow branches that converge.
    pub fn join(self, other: ExprType) -> ExprType {
        use ExprType::*;
        match (self, other) {
            (Never, Never) => Never,
            (Never, x) | (x, Never) => x,
            (None, _) | (_, None) => None,
            (Value, Value) => Value,
        }
    }
}

/// All scopes in a compiled module, addressable by [`ScopeId`].
#[derive(Debug, Default)]
pub struct ScopeTree {
    scopes: Vec<ScopeData>,
}

#[derive(Debug)]
struct ScopeData {
    kind: ScopeKind,
    parent: Option<ScopeId>,
    symbols: hashbrown::HashMap<InternedStr, SymbolId>,
}

impl ScopeTree {
    pub fn new() -> Self {
        Self { scopes: Vec::new() }
    }

    pub fn create(&mut self, kind: ScopeKind, parent: Option<ScopeId>) -> ScopeId {
        let id = self.scopes.len() as ScopeId;
        self.scopes.push(ScopeData { kind, parent, symbols: hashbrown::HashMap::new() });
        id
    }

    pub fn kind(&self, scope: ScopeId) -> ScopeKind {
        self.scopes[scope as usize].kind
    }

    pub fn parent(&self, scope: ScopeId) -> Option<ScopeId> {
        self.scopes[scope as usize].parent
    }

    /// Declares `name` in `scope`. Returns `Err` if the scope already
    /// declares a symbol with that name (invariant: at most one symbol
    /// per name per scope).
    pub fn declare(&mut self, scope: ScopeId, name: InternedStr, symbol: SymbolId) -> Result<(), SymbolId> {
        let data = &mut self.scopes[scope as usize];
        if let Some(&existing) = data.symbols.get(&name) {
            return Err(existing);
        }
        data.symbols.insert(name, symbol);
        Ok(())
    }

    /// Looks up `name` in `scope` only (no parent walk).
    pub fn lookup_local(&self, scope: ScopeId, name: InternedStr) -> Option<SymbolId> {
        self.scopes[scope as usize].symbols.get(&name).copied()
    }

    /// Walks the parent chain starting at `scope` looking for `name`.
    /// Returns the symbol and the scope that declares it.
    pub fn lookup(&self, scope: ScopeId, name: InternedStr) -> Option<(SymbolId, ScopeId)> {
        let mut current = Some(scope);
        while let Some(s) = current {
            if let Some(sym) = self.lookup_local(s, name) {
                return Some((sym, s));
            }
            current = self.parent(s);
        }
        None
    }
}
