//! Control-flow graph utilities: block ordering, dead block removal and resource usage.

use std::collections::{BTreeSet, HashMap};

use super::{BlockId, Function, Merge, Module, Op, PlaceRoot, ResourceId, Terminator};

/// Successors in visiting order. Merge and continue targets come first so that a construct's body precedes them
/// in reverse postorder.
pub fn successors(function: &Function, block: BlockId) -> Vec<BlockId> {
    let block = function.block(block);
    let mut next = vec![];
    match block.merge {
        Some(Merge::Selection(merge)) => next.push(merge),
        Some(Merge::Loop { merge, continuing }) => {
            next.push(merge);
            next.push(continuing);
        }
        None => {}
    }
    next.extend(block.terminator.targets());
    next
}

/// Blocks reachable from the entry, each after the blocks that structurally enclose it
pub fn reverse_postorder(function: &Function) -> Vec<BlockId> {
    if function.blocks.is_empty() {
        return vec![];
    }
    let mut visited = vec![false; function.blocks.len()];
    let mut postorder = vec![];
    // Explicit stack of (block, next successor index) to avoid recursion on long functions
    let mut stack = vec![(BlockId(0), 0usize)];
    visited[0] = true;
    while let Some((block, index)) = stack.pop() {
        let next = successors(function, block);
        match next.get(index) {
            Some(succ) => {
                stack.push((block, index + 1));
                if !visited[succ.0 as usize] {
                    visited[succ.0 as usize] = true;
                    stack.push((*succ, 0));
                }
            }
            None => postorder.push(block),
        }
    }
    postorder.reverse();
    postorder
}

/// Drop unreachable blocks and renumber the rest in reverse postorder
pub fn compact(function: &mut Function) {
    let order = reverse_postorder(function);
    let renumber: HashMap<BlockId, BlockId> = order
        .iter()
        .enumerate()
        .map(|(new, old)| (*old, BlockId(new as u32)))
        .collect();
    let map = |id: BlockId| renumber.get(&id).copied().unwrap_or(id);

    let mut old_blocks: Vec<Option<super::Block>> = std::mem::take(&mut function.blocks)
        .into_iter()
        .map(Some)
        .collect();
    for old in order {
        let Some(mut block) = old_blocks[old.0 as usize].take() else {
            continue;
        };
        block.terminator = match block.terminator {
            Terminator::Branch(target) => Terminator::Branch(map(target)),
            Terminator::CondBranch {
                cond,
                accept,
                reject,
            } => Terminator::CondBranch {
                cond,
                accept: map(accept),
                reject: map(reject),
            },
            other => other,
        };
        block.merge = block.merge.map(|merge| match merge {
            Merge::Selection(target) => Merge::Selection(map(target)),
            Merge::Loop { merge, continuing } => Merge::Loop {
                merge: map(merge),
                continuing: map(continuing),
            },
        });
        function.blocks.push(block);
    }
}

/// Resources each function touches, directly or through its callees
pub fn resource_usage(module: &Module) -> Vec<BTreeSet<ResourceId>> {
    let mut usage: Vec<BTreeSet<ResourceId>> = vec![BTreeSet::new(); module.functions.len()];
    for id in &module.function_order {
        let function = &module.functions[id.0];
        let mut used = BTreeSet::new();
        for block in &function.blocks {
            for instruction in &block.instructions {
                match &instruction.op {
                    Op::Load(place) | Op::Store { place, .. } => {
                        if let PlaceRoot::Resource(r) = place.root {
                            used.insert(r);
                        }
                    }
                    Op::Sample {
                        texture, sampler, ..
                    } => {
                        used.insert(*texture);
                        used.insert(*sampler);
                    }
                    Op::Call(callee, _) => used.extend(usage[callee.0].iter().copied()),
                    _ => {}
                }
            }
        }
        usage[id.0] = used;
    }
    usage
}
