use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;

use crate::ir::{Instruction, InstructionKind, Method, MethodBody, MethodId};

/// Number of graphs kept before the cache is cleared.
pub(crate) const DEFAULT_GRAPH_CACHE_CAPACITY: usize = 100;

/// Instruction-level control flow graph of one method body. Vertices are instruction
/// offsets.
#[derive(Clone, Debug, Default)]
pub(crate) struct InstructionGraph {
    vertices: BTreeSet<u32>,
    out_edges: BTreeMap<u32, Vec<u32>>,
    in_edges: BTreeMap<u32, Vec<u32>>,
}

impl InstructionGraph {
    pub(crate) fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.vertices.len()
    }

    pub(crate) fn contains(&self, offset: u32) -> bool {
        self.vertices.contains(&offset)
    }

    /// Offset of the first instruction, where execution of the method starts.
    pub(crate) fn entry(&self) -> Option<u32> {
        self.vertices.first().copied()
    }

    pub(crate) fn successors(&self, offset: u32) -> &[u32] {
        self.out_edges.get(&offset).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn predecessors(&self, offset: u32) -> &[u32] {
        self.in_edges.get(&offset).map(Vec::as_slice).unwrap_or(&[])
    }

    fn add_fall_through(&mut self, body: &MethodBody, inst: &Instruction) {
        match body.instruction_at(inst.next_offset) {
            Some(next) => self.add_edge(inst.offset, next.offset),
            None => log::debug!(
                "instruction at offset {} falls off the end of the method",
                inst.offset
            ),
        }
    }

    fn add_edge(&mut self, from: u32, to: u32) {
        if !self.vertices.contains(&to) {
            log::debug!("dropping edge {} -> {}: no instruction at target", from, to);
            return;
        }
        let targets = self.out_edges.entry(from).or_default();
        if targets.contains(&to) {
            return;
        }
        targets.push(to);
        self.in_edges.entry(to).or_default().push(from);
    }
}

/// Build the instruction graph of a method body. A missing body yields an empty graph.
///
/// Every instruction inside a protected range other than a return gets an edge to the
/// handler, so a `throw` caught in the same method is not a terminator.
pub(crate) fn build_graph(body: Option<&MethodBody>) -> InstructionGraph {
    let mut graph = InstructionGraph::default();
    let Some(body) = body else {
        return graph;
    };
    graph
        .vertices
        .extend(body.instructions.iter().map(|inst| inst.offset));

    for inst in &body.instructions {
        match &inst.kind {
            InstructionKind::ConditionalBranch { target } => {
                graph.add_edge(inst.offset, *target);
                graph.add_fall_through(body, inst);
            }
            InstructionKind::Switch { targets } => {
                for target in targets {
                    graph.add_edge(inst.offset, *target);
                }
            }
            InstructionKind::UnconditionalBranch { target } => {
                graph.add_edge(inst.offset, *target);
            }
            InstructionKind::Return | InstructionKind::Throw => {}
            _ => graph.add_fall_through(body, inst),
        }
    }

    for handler in &body.exception_handlers {
        for inst in &body.instructions {
            if handler.covers(inst.offset) && inst.kind != InstructionKind::Return {
                graph.add_edge(inst.offset, handler.handler_pc);
            }
        }
    }
    graph
}

/// Bounded graph cache. Reaching the capacity clears every entry at once.
#[derive(Debug)]
pub(crate) struct GraphCache {
    capacity: usize,
    graphs: HashMap<MethodId, Rc<InstructionGraph>>,
}

impl GraphCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            graphs: HashMap::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.graphs.len()
    }

    pub(crate) fn get_or_build(&mut self, method: &Method) -> Rc<InstructionGraph> {
        if let Some(graph) = self.graphs.get(&method.id) {
            return Rc::clone(graph);
        }
        let graph = Rc::new(build_graph(method.body.as_ref()));
        log::trace!("built graph of {} with {} vertices", method.id, graph.len());
        if self.len() >= self.capacity {
            log::trace!("graph cache full ({} entries); clearing", self.len());
            self.graphs.clear();
        }
        self.graphs.insert(method.id.clone(), Rc::clone(&graph));
        graph
    }
}
