//! Dominator tree construction (spec §4.2 [ADD]).
//!
//! Cooper, Harvey & Kennedy's "A Simple, Fast Dominance Algorithm":
//! iterate over blocks in reverse postorder intersecting idom candidates
//! from already-processed predecessors until a fixed point. Cached on
//! [`Function::dominators`] and invalidated whenever the CFG shape changes
//! (new blocks/edges), which `Function::new_block` already does.

use hashbrown::HashMap;

use crate::ir::{BlockId, Function};

/// Computes (or returns the cached) immediate-dominator table, indexed by
/// `BlockId`; `dominators[entry] == entry` by convention.
pub fn compute(func: &mut Function) -> &[BlockId] {
    if func.dominators.is_none() {
        let doms = compute_uncached(func);
        func.dominators = Some(doms);
    }
    func.dominators.as_deref().unwrap()
}

fn compute_uncached(func: &Function) -> Vec<BlockId> {
    let order = reverse_postorder(func);
    let rpo_index: HashMap<BlockId, usize> = order.iter().enumerate().map(|(i, &b)| (b, i)).collect();

    let entry = func.entry;
    let mut idom: Vec<Option<BlockId>> = vec![None; func.blocks.len()];
    idom[entry as usize] = Some(entry);

    let mut changed = true;
    while changed {
        changed = false;
        for &block in &order {
            if block == entry {
                continue;
            }
            let preds = &func.blocks[block as usize].predecessors;
            let mut new_idom: Option<BlockId> = None;
            for &p in preds {
                if idom[p as usize].is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => p,
                    Some(cur) => intersect(cur, p, &idom, &rpo_index),
                });
            }
            if let Some(new_idom) = new_idom {
                if idom[block as usize] != Some(new_idom) {
                    idom[block as usize] = Some(new_idom);
                    changed = true;
                }
            }
        }
    }

    idom.into_iter().map(|d| d.unwrap_or(entry)).collect()
}

fn intersect(mut a: BlockId, mut b: BlockId, idom: &[Option<BlockId>], rpo_index: &HashMap<BlockId, usize>) -> BlockId {
    while a != b {
        while rpo_index[&a] > rpo_index[&b] {
            a = idom[a as usize].expect("finger walked past a block with no computed idom yet");
        }
        while rpo_index[&b] > rpo_index[&a] {
            b = idom[b as usize].expect("finger walked past a block with no computed idom yet");
        }
    }
    a
}

/// Reverse postorder over reachable blocks starting at the entry block.
/// Unreachable blocks (both arms of an `if` diverged, or dead loop bodies)
/// are omitted — they have no dominance relationship to anything live.
pub fn reverse_postorder(func: &Function) -> Vec<BlockId> {
    let mut visited = vec![false; func.blocks.len()];
    let mut postorder = Vec::with_capacity(func.blocks.len());
    let mut stack: Vec<(BlockId, usize)> = vec![(func.entry, 0)];
    visited[func.entry as usize] = true;

    while let Some((block, next_succ)) = stack.pop() {
        let succs = successors(func, block);
        if next_succ < succs.len() {
            stack.push((block, next_succ + 1));
            let s = succs[next_succ];
            if !visited[s as usize] {
                visited[s as usize] = true;
                stack.push((s, 0));
            }
        } else {
            postorder.push(block);
        }
    }
    postorder.reverse();
    postorder
}

pub fn successors(func: &Function, block: BlockId) -> Vec<BlockId> {
    use crate::ir::Terminator::*;
    match func.blocks[block as usize].terminator {
        Jump(t) => vec![t],
        Branch { then_block, else_block, .. } => vec![then_block, else_block],
        Return(_) | Exit | Rethrow(_) | AssertFail { .. } | Never | None | Entry => Vec::new(),
    }
}

/// `a` dominates `b` if walking `b`'s idom chain reaches `a`.
pub fn dominates(doms: &[BlockId], a: BlockId, mut b: BlockId) -> bool {
    loop {
        if a == b {
            return true;
        }
        let next = doms[b as usize];
        if next == b {
            return a == b;
        }
        b = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionKind, InstKind, Terminator};

    #[test]
    fn diamond_cfg_dominance() {
        let mut f = Function::new(None, FunctionKind::Normal);
        let entry = f.entry;
        let cond = f.push_inst(entry, InstKind::Constant(crate::ir::ConstKind::Bool(true)));
        let then_b = f.new_block();
        let else_b = f.new_block();
        let merge = f.new_block();
        f.set_terminator(entry, Terminator::Branch { cond, then_block: then_b, else_block: else_b });
        f.add_edge(entry, then_b);
        f.add_edge(entry, else_b);
        f.set_terminator(then_b, Terminator::Jump(merge));
        f.add_edge(then_b, merge);
        f.set_terminator(else_b, Terminator::Jump(merge));
        f.add_edge(else_b, merge);

        let doms = compute(&mut f).to_vec();
        assert!(dominates(&doms, entry, merge));
        assert!(!dominates(&doms, then_b, merge));
        assert!(!dominates(&doms, else_b, merge));
        assert_eq!(doms[merge as usize], entry);
    }
}
