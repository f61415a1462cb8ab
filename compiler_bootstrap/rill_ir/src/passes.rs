//! Required IR passes, run in order before register allocation (spec §4.2):
//! critical-edge splitting, CSSA construction, dead-code elimination.

use hashbrown::HashSet;

use crate::ir::{BlockId, Function, InstId, InstKind, Terminator};

/// Splits every edge `A -> B` where `A` has multiple successors and `B`
/// has multiple predecessors by inserting a new block on the edge.
/// Returns `true` if the CFG changed (so callers can re-run dominance).
pub fn split_critical_edges(func: &mut Function) -> bool {
    let mut changed = false;
    let block_count = func.blocks.len();
    for a in 0..block_count {
        let a = a as BlockId;
        let successors = successors_of(func, a);
        if successors.len() < 2 {
            continue;
        }
        for b in successors {
            if func.blocks[b as usize].predecessors.len() < 2 {
                continue;
            }
            let c = func.new_block();
            func.set_terminator(c, Terminator::Jump(b));
            retarget_successor(func, a, b, c);
            let slot = func.blocks[b as usize].predecessors.iter_mut().find(|p| **p == a).expect("edge A->B must appear in B's predecessor list");
            *slot = c;
            func.blocks[c as usize].predecessors.push(a);
            func.blocks[c as usize].sealed = true;
            changed = true;
        }
    }
    changed
}

fn successors_of(func: &Function, block: BlockId) -> Vec<BlockId> {
    match func.blocks[block as usize].terminator {
        Terminator::Jump(t) => vec![t],
        Terminator::Branch { then_block, else_block, .. } => vec![then_block, else_block],
        _ => Vec::new(),
    }
}

fn retarget_successor(func: &mut Function, from: BlockId, old_target: BlockId, new_target: BlockId) {
    let term = &mut func.blocks[from as usize].terminator;
    match term {
        Terminator::Jump(t) if *t == old_target => *t = new_target,
        Terminator::Branch { then_block, else_block, .. } => {
            if *then_block == old_target {
                *then_block = new_target;
            }
            if *else_block == old_target {
                *else_block = new_target;
            }
        }
        _ => {}
    }
}

/// Inserts a copy (alias-valued instruction) for every phi operand at the
/// end of its defining predecessor block, and aliases the phi's own
/// destination to a fresh copy. Postcondition (spec §4.2): every phi
/// operand is defined in its immediate predecessor by a copy instruction.
///
/// Must run after critical-edge splitting: a predecessor-end copy is only
/// correct when the predecessor has no other successor to leak into.
pub fn build_cssa(func: &mut Function) {
    let phi_sites: Vec<(BlockId, InstId)> = func
        .blocks_in_order()
        .flat_map(|b| {
            b.instructions.iter().filter_map(move |&id| match func.instructions[id as usize].kind {
                InstKind::Phi(_) => Some((b.id, id)),
                _ => None,
            })
        })
        .collect();

    for (block, phi) in phi_sites {
        let InstKind::Phi(arglist) = func.instructions[phi as usize].kind else { continue };
        let preds = func.blocks[block as usize].predecessors.clone();
        let operands = func.arg_lists[arglist as usize].clone();
        debug_assert_eq!(preds.len(), operands.len(), "phi operand count must match predecessor count");

        let mut copies = Vec::with_capacity(operands.len());
        for (&pred, &operand) in preds.iter().zip(operands.iter()) {
            let copy = insert_copy_before_terminator(func, pred, operand);
            copies.push(copy);
        }
        func.arg_lists[arglist as usize] = copies;

        // Alias the phi's destination through one more copy so that
        // register allocation sees a value whose lifetime starts exactly
        // at the phi and can share a register with its (now copied)
        // operands via the alias chain, per spec §4.3.
        let dest_copy_kind = InstKind::UseLocal(phi);
        let dest_copy = func.push_inst(block, dest_copy_kind);
        move_to_front_after_phis(func, block, dest_copy);
        replace_all_uses(func, phi, dest_copy, block);
    }
}

fn insert_copy_before_terminator(func: &mut Function, block: BlockId, operand: InstId) -> InstId {
    func.push_inst(block, InstKind::UseLocal(operand))
}

/// Copies inserted for a phi destination must sit immediately after the
/// contiguous phi run at the front of the block (spec §3 invariant).
fn move_to_front_after_phis(func: &mut Function, block: BlockId, inst: InstId) {
    let list = &mut func.blocks[block as usize].instructions;
    list.retain(|&id| id != inst);
    let phi_count = list.iter().take_while(|&&id| matches!(func.instructions[id as usize].kind, InstKind::Phi(_))).count();
    list.insert(phi_count, inst);
}

/// Rewrites every use of `old` elsewhere in the function to `new`, except
/// within `skip_block`'s own phi list (which still legitimately refers to
/// the original phi as the value flowing out of that block).
fn replace_all_uses(func: &mut Function, old: InstId, new: InstId, skip_block: BlockId) {
    for inst in func.instructions.iter_mut() {
        if inst.id == new || inst.block == skip_block && matches!(inst.kind, InstKind::Phi(_)) {
            continue;
        }
        rewrite_kind(&mut inst.kind, old, new);
    }
    for list in func.arg_lists.iter_mut() {
        for slot in list.iter_mut() {
            if *slot == old {
                *slot = new;
            }
        }
    }
}

fn rewrite_kind(kind: &mut InstKind, old: InstId, new: InstId) {
    use InstKind::*;
    let sub = |id: &mut InstId| {
        if *id == old {
            *id = new;
        }
    };
    match kind {
        UseLocal(id) => sub(id),
        BinaryOp(_, l, r) => {
            sub(l);
            sub(r);
        }
        UnaryOp(_, v) => sub(v),
        Call { callee, .. } => sub(callee),
        MethodHandle { receiver, .. } => sub(receiver),
        MakeClosure { env, .. } => sub(env),
        UseLValue(lv) => rewrite_lvalue(lv, old, new),
        StoreLValue { target, value } => {
            rewrite_lvalue(target, old, new);
            sub(value);
        }
        _ => {}
    }
}

fn rewrite_lvalue(lv: &mut crate::ir::LValue, old: InstId, new: InstId) {
    use crate::ir::LValue::*;
    match lv {
        Closure { env, .. } if *env == old => *env = new,
        Field { object, .. } if *object == old => *object = new,
        Index { object, index } => {
            if *object == old {
                *object = new;
            }
            if *index == old {
                *index = new;
            }
        }
        _ => {}
    }
}

/// Removes every instruction not reachable from a root (terminator operand
/// or side-effecting instruction) via a backward worklist (spec §4.2).
/// Effect-free phis are eligible for removal like any other pure value.
pub fn eliminate_dead_code(func: &mut Function) {
    let mut live: HashSet<InstId> = HashSet::new();
    let mut worklist: Vec<InstId> = Vec::new();

    for block in &func.blocks {
        for &id in &block.instructions {
            if func.instructions[id as usize].kind.has_side_effect() {
                worklist.push(id);
            }
        }
        for operand in terminator_operands(&block.terminator) {
            worklist.push(operand);
        }
    }

    while let Some(id) = worklist.pop() {
        if !live.insert(id) {
            continue;
        }
        for operand in operands_of(func, id) {
            worklist.push(operand);
        }
    }

    for block in &mut func.blocks {
        block.instructions.retain(|id| live.contains(id) || func_has_side_effect(&func.instructions, *id));
    }
}

fn func_has_side_effect(instructions: &[crate::ir::Instruction], id: InstId) -> bool {
    instructions[id as usize].kind.has_side_effect()
}

fn terminator_operands(term: &Terminator) -> Vec<InstId> {
    match term {
        Terminator::Branch { cond, .. } => vec![*cond],
        Terminator::Return(Some(v)) => vec![*v],
        Terminator::Rethrow(v) => vec![*v],
        _ => Vec::new(),
    }
}

fn operands_of(func: &Function, id: InstId) -> Vec<InstId> {
    use InstKind::*;
    match &func.instructions[id as usize].kind {
        UseLocal(v) => vec![*v],
        Phi(args) => func.arg_lists[*args as usize].clone(),
        BinaryOp(_, l, r) => vec![*l, *r],
        UnaryOp(_, v) => vec![*v],
        Call { callee, args } => {
            let mut ops = func.arg_lists[*args as usize].clone();
            ops.push(*callee);
            ops
        }
        MethodHandle { receiver, .. } => vec![*receiver],
        MethodCall { handle, args } => {
            let mut ops = func.arg_lists[*args as usize].clone();
            ops.push(*handle);
            ops
        }
        MakeEnvironment { parent, .. } => parent.into_iter().copied().collect(),
        MakeClosure { env, .. } => vec![*env],
        Container { items, .. } => func.arg_lists[*items as usize].clone(),
        Format(args) => func.arg_lists[*args as usize].clone(),
        UseLValue(lv) => lvalue_operands(lv),
        StoreLValue { target, value } => {
            let mut ops = lvalue_operands(target);
            ops.push(*value);
            ops
        }
        Constant(_) | OuterEnvironment => Vec::new(),
    }
}

fn lvalue_operands(lv: &crate::ir::LValue) -> Vec<InstId> {
    use crate::ir::LValue::*;
    match lv {
        Closure { env, .. } => vec![*env],
        Field { object, .. } => vec![*object],
        Index { object, index } => vec![*object, *index],
        Param(_) | Module(_) | Global(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ConstKind, FunctionKind};

    #[test]
    fn critical_edge_gets_split() {
        let mut f = Function::new(None, FunctionKind::Normal);
        let entry = f.entry;
        let cond = f.push_inst(entry, InstKind::Constant(ConstKind::Bool(true)));
        let a = f.new_block();
        let b = f.new_block();
        // entry has two successors (a, b); b will have two predecessors.
        f.set_terminator(entry, Terminator::Branch { cond, then_block: a, else_block: b });
        f.add_edge(entry, a);
        f.add_edge(entry, b);
        f.set_terminator(a, Terminator::Jump(b));
        f.add_edge(a, b);
        // b now has two predecessors (entry, a) and entry has two successors: the entry->b edge is critical.
        let changed = split_critical_edges(&mut f);
        assert!(changed);
        let Terminator::Branch { else_block, .. } = f.blocks[entry as usize].terminator else { panic!() };
        assert_ne!(else_block, b, "critical edge should route through a new split block");
    }

    #[test]
    fn dce_removes_unused_pure_instruction() {
        let mut f = Function::new(None, FunctionKind::Normal);
        let entry = f.entry;
        let unused = f.push_inst(entry, InstKind::Constant(ConstKind::Integer(1)));
        let used = f.push_inst(entry, InstKind::Constant(ConstKind::Integer(2)));
        f.set_terminator(entry, Terminator::Return(Some(used)));
        eliminate_dead_code(&mut f);
        assert!(!f.blocks[entry as usize].instructions.contains(&unused));
        assert!(f.blocks[entry as usize].instructions.contains(&used));
    }
}
