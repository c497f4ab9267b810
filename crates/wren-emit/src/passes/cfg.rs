use std::collections::{HashMap, HashSet, VecDeque};

use crate::ir::{BlockId, Function, Terminator};
use crate::optimizer::FunctionPass;

/// Control-flow cleanup.
///
/// 1. Blocks not reachable from the entry are removed.
/// 2. A non-entry block that holds no instructions and only branches on is
///    bypassed: its predecessors jump straight to its target.
/// 3. A block that unconditionally branches to a block with no other
///    predecessor absorbs it.
pub struct SimplifyCfg;

fn reachable(function: &Function) -> HashSet<BlockId> {
    let mut seen = HashSet::new();
    let Some(entry) = function.entry() else {
        return seen;
    };
    let mut queue = VecDeque::from([entry]);
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        if let Some(t) = function.block(id).and_then(|b| b.terminator.as_ref()) {
            queue.extend(t.successors());
        }
    }
    seen
}

fn remove_unreachable(function: &mut Function) -> bool {
    let live = reachable(function);
    let before = function.blocks.len();
    function.blocks.retain(|b| live.contains(&b.id));
    function.blocks.len() != before
}

fn thread_forwarders(function: &mut Function) -> bool {
    let entry = function.entry();
    let forwarders: Vec<(BlockId, BlockId)> = function
        .blocks
        .iter()
        .filter(|b| Some(b.id) != entry && b.instructions.is_empty())
        .filter_map(|b| match b.terminator {
            Some(Terminator::Branch(t)) if t != b.id => Some((b.id, t)),
            _ => None,
        })
        .collect();
    let mut changed = false;
    for (from, to) in forwarders {
        for block in &mut function.blocks {
            if let Some(t) = &mut block.terminator {
                if block.id != from && t.successors().contains(&from) {
                    t.retarget(from, to);
                    changed = true;
                }
            }
        }
    }
    changed
}

fn predecessor_counts(function: &Function) -> HashMap<BlockId, usize> {
    let mut counts = HashMap::new();
    for block in &function.blocks {
        if let Some(t) = &block.terminator {
            for s in t.successors() {
                *counts.entry(s).or_insert(0) += 1;
            }
        }
    }
    counts
}

fn merge_chains(function: &mut Function) -> bool {
    let mut changed = false;
    loop {
        let entry = function.entry();
        let preds = predecessor_counts(function);
        let candidate = function.blocks.iter().find_map(|b| match b.terminator {
            Some(Terminator::Branch(s))
                if s != b.id && Some(s) != entry && preds.get(&s) == Some(&1) =>
            {
                Some((b.id, s))
            }
            _ => None,
        });
        let Some((pred, succ)) = candidate else {
            return changed;
        };
        let Some(pos) = function.blocks.iter().position(|b| b.id == succ) else {
            return changed;
        };
        let absorbed = function.blocks.remove(pos);
        if let Some(b) = function.block_mut(pred) {
            b.instructions.extend(absorbed.instructions);
            b.terminator = absorbed.terminator;
        }
        changed = true;
    }
}

impl FunctionPass for SimplifyCfg {
    fn name(&self) -> &'static str {
        "simplify-cfg"
    }

    fn run(&mut self, function: &mut Function) -> bool {
        let mut changed = remove_unreachable(function);
        if thread_forwarders(function) {
            changed = true;
            remove_unreachable(function);
        }
        changed |= merge_chains(function);
        changed
    }
}
