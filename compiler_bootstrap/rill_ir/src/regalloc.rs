//! Linear-scan register allocation over CSSA-form instructions (spec §4.3).
//!
//! Traversal order respects dominance: reverse postorder on blocks,
//! instructions in block order. A free-list of register ids is maintained;
//! an operand's register returns to the free list once its last reader has
//! been processed. Phi destinations and their (CSSA-copy) operands are
//! coalesced onto the same register via the `UseLocal` alias chain built
//! by [`crate::passes::build_cssa`].

use hashbrown::HashMap;

use crate::dominators::reverse_postorder;
use crate::ir::{Function, InstId, InstKind};

/// Register ids assigned to SSA instructions, plus the function's frame
/// size (number of distinct registers used).
pub struct Allocation {
    pub registers: HashMap<InstId, u32>,
    pub register_count: u32,
}

pub fn allocate(func: &mut Function) -> Allocation {
    let order = reverse_postorder(func);
    let liveness = compute_last_use(func, &order);

    let mut registers: HashMap<InstId, u32> = HashMap::new();
    let mut free_list: Vec<u32> = Vec::new();
    let mut next_register = 0u32;

    let mut alloc_register = |free_list: &mut Vec<u32>, next_register: &mut u32| -> u32 {
        if let Some(r) = free_list.pop() {
            r
        } else {
            let r = *next_register;
            *next_register += 1;
            r
        }
    };

    for &block in &order {
        for &inst_id in &func.blocks[block as usize].instructions.clone() {
            let canonical = resolve_alias(func, inst_id);
            if !registers.contains_key(&canonical) {
                let reg = alloc_register(&mut free_list, &mut next_register);
                registers.insert(canonical, reg);
            }
            // Every non-canonical alias shares its target's register so
            // that CSSA copies and their phi destination coalesce.
            if canonical != inst_id {
                let reg = registers[&canonical];
                registers.insert(inst_id, reg);
            }

            for operand in operands_of(func, inst_id) {
                let operand = resolve_alias(func, operand);
                if liveness.get(&(block, operand)).copied().unwrap_or(0) == position_of(func, block, inst_id) {
                    if let Some(&reg) = registers.get(&operand) {
                        free_list.push(reg);
                    }
                }
            }
        }
    }

    Allocation { registers, register_count: next_register }
}

fn position_of(func: &Function, block: crate::ir::BlockId, inst_id: InstId) -> usize {
    func.blocks[block as usize].instructions.iter().position(|&id| id == inst_id).unwrap_or(0)
}

/// For every (block, instruction) pair that is used at all within the
/// block that defines it (or referenced across blocks, conservatively kept
/// live through the whole defining block), records the index within the
/// defining block's instruction list of its last use. A simplification of
/// full live-interval analysis appropriate for straight-line linear scan
/// inside a single block; cross-block liveness keeps operands live for the
/// remainder of the block in which they're read to avoid clobbering a
/// register still needed by a later block reachable from here.
fn compute_last_use(func: &Function, order: &[crate::ir::BlockId]) -> HashMap<(crate::ir::BlockId, InstId), usize> {
    let mut last_use: HashMap<(crate::ir::BlockId, InstId), usize> = HashMap::new();
    for &block in order {
        for (idx, &inst_id) in func.blocks[block as usize].instructions.iter().enumerate() {
            for operand in operands_of(func, inst_id) {
                let operand = resolve_alias(func, operand);
                last_use.insert((block, operand), idx);
            }
        }
    }
    last_use
}

fn resolve_alias(func: &Function, mut id: InstId) -> InstId {
    loop {
        match func.instructions[id as usize].kind {
            InstKind::UseLocal(inner) if inner != id => id = inner,
            _ => return id,
        }
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
    use crate::ir::{ConstKind, FunctionKind, Terminator};

    #[test]
    fn straight_line_function_reuses_registers() {
        let mut f = Function::new(None, FunctionKind::Normal);
        let entry = f.entry;
        let a = f.push_inst(entry, InstKind::Constant(ConstKind::Integer(1)));
        let b = f.push_inst(entry, InstKind::Constant(ConstKind::Integer(2)));
        let sum = f.push_inst(entry, InstKind::BinaryOp(rill_parser::BinOp::Add, a, b));
        f.set_terminator(entry, Terminator::Return(Some(sum)));
        let alloc = allocate(&mut f);
        assert!(alloc.register_count >= 1);
        assert!(alloc.registers.contains_key(&sum));
    }
}
