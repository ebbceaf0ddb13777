//! Definition-clear path queries over an [`InstructionGraph`].
//!
//! Every search is an explicit-stack depth-first traversal with a visited set, so loops
//! in the method body terminate. The `blocked` set holds offsets of competing
//! definitions; the caller never includes the query's own start offset.

use std::collections::{BTreeSet, HashSet};

use crate::cfg::InstructionGraph;

/// True when some path leaves `start` and reaches a vertex without successors (a return
/// or throw) without entering a blocked vertex.
pub(crate) fn clear_path_to_end(
    graph: &InstructionGraph,
    start: u32,
    blocked: &BTreeSet<u32>,
) -> bool {
    search(graph, start, blocked, Direction::Forward, |graph, offset| {
        graph.successors(offset).is_empty()
    })
}

/// True when `use_offset` can be reached from the method entry, or from a vertex without
/// predecessors, without passing through a blocked vertex. The entry may itself have
/// predecessors when the method opens with a loop header.
pub(crate) fn clear_path_from_start(
    graph: &InstructionGraph,
    use_offset: u32,
    blocked: &BTreeSet<u32>,
) -> bool {
    let entry = graph.entry();
    search(graph, use_offset, blocked, Direction::Backward, |graph, offset| {
        entry == Some(offset) || graph.predecessors(offset).is_empty()
    })
}

/// True when `use_offset` is reachable from `def_offset` through out-edges without entering
/// a blocked vertex. The target itself is never checked against `blocked`.
pub(crate) fn clear_path_between(
    graph: &InstructionGraph,
    def_offset: u32,
    use_offset: u32,
    blocked: &BTreeSet<u32>,
) -> bool {
    if !graph.contains(def_offset) || !graph.contains(use_offset) {
        return false;
    }
    let mut stack = vec![def_offset];
    let mut visited = HashSet::new();
    while let Some(offset) = stack.pop() {
        for next in graph.successors(offset) {
            if *next == use_offset {
                return true;
            }
            if blocked.contains(next) || !visited.insert(*next) {
                continue;
            }
            stack.push(*next);
        }
    }
    false
}

#[derive(Clone, Copy)]
enum Direction {
    Forward,
    Backward,
}

fn search(
    graph: &InstructionGraph,
    start: u32,
    blocked: &BTreeSet<u32>,
    direction: Direction,
    is_goal: impl Fn(&InstructionGraph, u32) -> bool,
) -> bool {
    if !graph.contains(start) {
        return false;
    }
    let mut stack = vec![start];
    let mut visited = HashSet::from([start]);
    while let Some(offset) = stack.pop() {
        if is_goal(graph, offset) {
            return true;
        }
        let neighbours = match direction {
            Direction::Forward => graph.successors(offset),
            Direction::Backward => graph.predecessors(offset),
        };
        for next in neighbours {
            if blocked.contains(next) || !visited.insert(*next) {
                continue;
            }
            stack.push(*next);
        }
    }
    false
}
