//! The conservation-law contract and the scope a check runs over

use std::collections::{HashMap, HashSet};

use tessera_core::{Direction, EdgeKind, GraphEdge, GraphNode, GraphRead, NodeId, NodeKind};

use crate::violation::{LawKind, Violation};

/// An invariant family checked against the graph.
pub trait ConservationLaw: Send + Sync {
    fn kind(&self) -> LawKind;

    /// Every violation among the entities `scope` admits.
    fn check(&self, graph: &dyn GraphRead, scope: &ValidationScope) -> Vec<Violation>;
}

/// The whole graph, or the neighborhood a change touched.
#[derive(Debug, Clone, Default)]
pub enum ValidationScope {
    #[default]
    Full,
    Nodes(HashSet<NodeId>),
}

impl ValidationScope {
    pub fn nodes(ids: impl IntoIterator<Item = NodeId>) -> Self {
        ValidationScope::Nodes(ids.into_iter().collect())
    }

    pub fn contains(&self, id: NodeId) -> bool {
        match self {
            ValidationScope::Full => true,
            ValidationScope::Nodes(ids) => ids.contains(&id),
        }
    }

    /// Ids of `kind` within scope, sorted.
    pub fn ids_of_kind(&self, graph: &dyn GraphRead, kind: NodeKind) -> Vec<NodeId> {
        match self {
            ValidationScope::Full => graph.nodes_of_kind(kind),
            ValidationScope::Nodes(ids) => {
                let mut out: Vec<NodeId> = ids
                    .iter()
                    .copied()
                    .filter(|id| graph.node(*id).is_some_and(|n| n.kind() == kind))
                    .collect();
                out.sort();
                out
            }
        }
    }

    /// Edges with at least one endpoint in scope. Edges whose endpoints
    /// vanished are still reported for the endpoint that remains.
    pub fn edges<'g>(&self, graph: &'g dyn GraphRead) -> Vec<&'g GraphEdge> {
        match self {
            ValidationScope::Full => graph.all_edges(),
            ValidationScope::Nodes(ids) => {
                let mut sorted: Vec<NodeId> = ids.iter().copied().collect();
                sorted.sort();
                let mut seen = HashSet::new();
                let mut out = Vec::new();
                for id in sorted {
                    let outgoing = graph.edges(id, Direction::Outgoing);
                    let incoming = graph.edges(id, Direction::Incoming);
                    for edge in outgoing.into_iter().chain(incoming) {
                        if seen.insert(edge.key()) {
                            out.push(edge);
                        }
                    }
                }
                out
            }
        }
    }

    pub fn len_hint(&self, graph: &dyn GraphRead) -> usize {
        match self {
            ValidationScope::Full => graph.node_count(),
            ValidationScope::Nodes(ids) => ids.len(),
        }
    }
}

/// Cycles along `kind` reachable from `starts`, restricted to nodes
/// `accept` admits. Found by back edges in an iterative depth-first
/// search; each cycle is listed once, starting at the node the back edge
/// returns to.
pub(crate) fn find_cycles(
    graph: &dyn GraphRead,
    starts: &[NodeId],
    kind: EdgeKind,
    accept: &dyn Fn(&GraphNode) -> bool,
) -> Vec<Vec<NodeId>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        OnStack,
        Done,
    }

    let successors = |id: NodeId| -> Vec<NodeId> {
        graph
            .neighbors(id, kind, Direction::Outgoing)
            .into_iter()
            .filter(|n| graph.node(*n).is_some_and(accept))
            .collect()
    };

    let mut marks: HashMap<NodeId, Mark> = HashMap::new();
    let mut seen_cycles: HashSet<Vec<NodeId>> = HashSet::new();
    let mut cycles = Vec::new();

    for &start in starts {
        if marks.contains_key(&start) || !graph.node(start).is_some_and(accept) {
            continue;
        }
        let mut path: Vec<NodeId> = vec![start];
        let mut stack: Vec<(NodeId, Vec<NodeId>)> = vec![(start, successors(start))];
        marks.insert(start, Mark::OnStack);

        while let Some((node, pending)) = stack.last_mut() {
            let Some(next) = pending.pop() else {
                marks.insert(*node, Mark::Done);
                stack.pop();
                path.pop();
                continue;
            };
            match marks.get(&next) {
                Some(Mark::OnStack) => {
                    let from = path.iter().position(|n| *n == next).unwrap_or(0);
                    let cycle: Vec<NodeId> = path[from..].to_vec();
                    let mut key = cycle.clone();
                    key.sort();
                    if seen_cycles.insert(key) {
                        cycles.push(cycle);
                    }
                }
                Some(Mark::Done) => {}
                None => {
                    marks.insert(next, Mark::OnStack);
                    path.push(next);
                    let succ = successors(next);
                    stack.push((next, succ));
                }
            }
        }
    }
    cycles
}

/// `a -> b -> a` using qualified names.
pub(crate) fn describe_cycle(graph: &dyn GraphRead, cycle: &[NodeId]) -> String {
    let name = |id: &NodeId| {
        graph
            .node(*id)
            .map(|n| n.qualified_name.clone())
            .unwrap_or_else(|| id.to_string())
    };
    let mut parts: Vec<String> = cycle.iter().map(name).collect();
    if let Some(first) = cycle.first() {
        parts.push(name(first));
    }
    parts.join(" -> ")
}
