//! Backend-agnostic read interface over the semantic graph
//!
//! Validators, propagation and resolution only ever see a [`GraphRead`], so
//! they work the same against the in-memory [`crate::Graph`] or any external
//! store implementing the trait.

use std::collections::{HashSet, VecDeque};
use std::path::Path;

pub use petgraph::Direction;

use crate::model::{EdgeKind, GraphEdge, GraphNode, NodeId, NodeKind};

pub trait GraphRead {
    fn node(&self, id: NodeId) -> Option<&GraphNode>;

    fn node_ids(&self) -> Vec<NodeId>;

    fn nodes_of_kind(&self, kind: NodeKind) -> Vec<NodeId>;

    fn nodes_in_file(&self, file: &Path) -> Vec<NodeId>;

    /// Edges leaving (`Outgoing`) or entering (`Incoming`) `node`.
    fn edges(&self, node: NodeId, direction: Direction) -> Vec<&GraphEdge>;

    fn all_edges(&self) -> Vec<&GraphEdge>;

    /// Symbol nodes (module, class, function, variable) with this qualified name.
    fn lookup_qualified(&self, qualified_name: &str) -> Vec<NodeId>;

    fn node_count(&self) -> usize;

    fn edge_count(&self) -> usize;

    fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    fn edges_of_kind(&self, node: NodeId, kind: EdgeKind, direction: Direction) -> Vec<&GraphEdge> {
        self.edges(node, direction)
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect()
    }

    /// Nodes one `kind` edge away from `node` in `direction`.
    fn neighbors(&self, node: NodeId, kind: EdgeKind, direction: Direction) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = self
            .edges_of_kind(node, kind, direction)
            .into_iter()
            .map(|e| match direction {
                Direction::Outgoing => e.target,
                Direction::Incoming => e.source,
            })
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Breadth-first reachability from `start` over `kinds` (outgoing), up to
    /// `max_depth` hops. Returns `(node, depth)` pairs, excluding `start`.
    fn path(&self, start: NodeId, kinds: &[EdgeKind], max_depth: usize) -> Vec<(NodeId, usize)> {
        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([(start, 0usize)]);
        let mut reached = Vec::new();
        while let Some((current, depth)) = queue.pop_front() {
            if depth == max_depth {
                continue;
            }
            for edge in self.edges(current, Direction::Outgoing) {
                if !kinds.contains(&edge.kind) || !seen.insert(edge.target) {
                    continue;
                }
                reached.push((edge.target, depth + 1));
                queue.push_back((edge.target, depth + 1));
            }
        }
        reached
    }

    /// Enumerate simple paths matching `pattern`, at most `max_depth` edges long.
    fn query(&self, pattern: &QueryPattern, max_depth: usize) -> Vec<PathMatch> {
        let starts: Vec<NodeId> = match &pattern.start {
            QueryStart::Node(id) => {
                if self.contains(*id) {
                    vec![*id]
                } else {
                    Vec::new()
                }
            }
            QueryStart::Kind(kind) => self.nodes_of_kind(*kind),
        };

        let mut matches = Vec::new();
        for start in starts {
            let mut stack = vec![vec![start]];
            while let Some(path) = stack.pop() {
                let last = *path.last().unwrap_or(&start);
                if path.len() > 1 && pattern.accepts_end(self.node(last)) {
                    matches.push(PathMatch {
                        nodes: path.clone(),
                    });
                }
                if path.len() > max_depth {
                    continue;
                }
                for edge in self.edges(last, pattern.direction) {
                    if !pattern.edge_kinds.is_empty() && !pattern.edge_kinds.contains(&edge.kind) {
                        continue;
                    }
                    let next = match pattern.direction {
                        Direction::Outgoing => edge.target,
                        Direction::Incoming => edge.source,
                    };
                    if path.contains(&next) {
                        continue;
                    }
                    let mut extended = path.clone();
                    extended.push(next);
                    stack.push(extended);
                }
            }
        }
        matches.sort_by(|a, b| a.nodes.cmp(&b.nodes));
        matches
    }

    /// Owning functions of the call sites that resolve to `function`.
    fn callers_of(&self, function: NodeId) -> Vec<NodeId> {
        let mut callers: Vec<NodeId> = self
            .neighbors(function, EdgeKind::ResolvesTo, Direction::Incoming)
            .into_iter()
            .flat_map(|site| self.neighbors(site, EdgeKind::HasCallsite, Direction::Incoming))
            .collect();
        callers.sort();
        callers.dedup();
        callers
    }

    /// Functions that `function`'s call sites resolve to.
    fn callees_of(&self, function: NodeId) -> Vec<NodeId> {
        let mut callees: Vec<NodeId> = self
            .neighbors(function, EdgeKind::HasCallsite, Direction::Outgoing)
            .into_iter()
            .flat_map(|site| self.neighbors(site, EdgeKind::ResolvesTo, Direction::Outgoing))
            .collect();
        callees.sort();
        callees.dedup();
        callees
    }

    /// Parameters of `function` ordered by position.
    fn parameters_of(&self, function: NodeId) -> Vec<&GraphNode> {
        let mut params: Vec<&GraphNode> = self
            .neighbors(function, EdgeKind::HasParameter, Direction::Outgoing)
            .into_iter()
            .filter_map(|id| self.node(id))
            .collect();
        params.sort_by_key(|n| n.as_parameter().map(|p| p.position).unwrap_or(u32::MAX));
        params
    }
}

/// Where a pattern query begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryStart {
    Node(NodeId),
    Kind(NodeKind),
}

/// A bounded-depth path pattern: start somewhere, follow some edge kinds in
/// one direction, optionally stop only at a given node kind.
#[derive(Debug, Clone)]
pub struct QueryPattern {
    pub start: QueryStart,
    /// Empty means any edge kind.
    pub edge_kinds: Vec<EdgeKind>,
    pub direction: Direction,
    pub end_kind: Option<NodeKind>,
}

impl QueryPattern {
    pub fn from_node(id: NodeId) -> Self {
        QueryPattern {
            start: QueryStart::Node(id),
            edge_kinds: Vec::new(),
            direction: Direction::Outgoing,
            end_kind: None,
        }
    }

    pub fn from_kind(kind: NodeKind) -> Self {
        QueryPattern {
            start: QueryStart::Kind(kind),
            edge_kinds: Vec::new(),
            direction: Direction::Outgoing,
            end_kind: None,
        }
    }

    pub fn via(mut self, kind: EdgeKind) -> Self {
        self.edge_kinds.push(kind);
        self
    }

    pub fn incoming(mut self) -> Self {
        self.direction = Direction::Incoming;
        self
    }

    pub fn ending_at(mut self, kind: NodeKind) -> Self {
        self.end_kind = Some(kind);
        self
    }

    fn accepts_end(&self, node: Option<&GraphNode>) -> bool {
        match (self.end_kind, node) {
            (None, Some(_)) => true,
            (Some(kind), Some(n)) => n.kind() == kind,
            (_, None) => false,
        }
    }
}

/// One path found by [`GraphRead::query`], start node first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatch {
    pub nodes: Vec<NodeId>,
}

impl PathMatch {
    pub fn end(&self) -> Option<NodeId> {
        self.nodes.last().copied()
    }
}
