//! Graph store contract and the file-scoped rebuild transaction

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::graph::Graph;
use crate::model::*;
use crate::query::{Direction, GraphRead};

/// Durable node/edge storage the rest of the system writes through.
///
/// Implementations must make [`GraphStore::rebuild_file`] atomic. The
/// provided implementation validates every edge before it mutates anything,
/// which is enough for stores whose primitives cannot fail halfway; external
/// stores should override it with a real transaction.
pub trait GraphStore: GraphRead + Send + Sync {
    fn upsert_nodes(&mut self, batch: Vec<GraphNode>) -> Result<usize, StoreError>;

    fn upsert_edges(&mut self, batch: Vec<GraphEdge>) -> Result<usize, StoreError>;

    /// Delete every node owned by `file` (with incident edges) and every edge
    /// the file's extraction produced.
    fn delete_nodes_by_file(&mut self, file: &Path) -> Result<DeleteStats, StoreError>;

    fn remove_edges(&mut self, keys: &[EdgeKey]) -> Result<usize, StoreError>;

    /// Remove shared nodes nobody references any more: placeholder modules
    /// and non-builtin types without edges.
    fn prune_unreferenced(&mut self) -> Result<usize, StoreError>;

    /// Set or clear the `changed` flag. Unknown ids are ignored.
    fn set_changed(&mut self, ids: &[NodeId], changed: bool) -> usize;

    /// Update a call site's resolution state.
    fn set_resolution(
        &mut self,
        call_site: NodeId,
        status: ResolutionStatus,
        implicit_receiver: bool,
    ) -> Result<(), StoreError>;

    /// Replace `file`'s slice of the graph with `tx`'s nodes and edges.
    fn rebuild_file(&mut self, tx: FileTransaction) -> Result<RebuildStats, StoreError> {
        let file = tx.file.clone();
        let old_ids: HashSet<NodeId> = self.nodes_in_file(&file).into_iter().collect();
        let new_ids: HashSet<NodeId> = tx.nodes.iter().map(|n| n.id).collect();

        for edge in &tx.edges {
            for end in [edge.source, edge.target] {
                let available =
                    new_ids.contains(&end) || (self.contains(end) && !old_ids.contains(&end));
                if !available {
                    return Err(StoreError::MissingEndpoint {
                        edge: edge.key(),
                        missing: end,
                    });
                }
            }
        }

        // Edges other files hold into this file survive the rebuild if their
        // target comes back.
        let mut inbound: Vec<GraphEdge> = Vec::new();
        let mut old_modules: HashMap<NodeId, String> = HashMap::new();
        for id in &old_ids {
            if let Some(module) = self.node(*id).and_then(|n| n.as_module()) {
                old_modules.insert(*id, module.dotted_path.clone());
            }
            for edge in self.edges(*id, Direction::Incoming) {
                let foreign_source = !old_ids.contains(&edge.source);
                let foreign_origin = edge.file_path.as_deref() != Some(file.as_path());
                if foreign_source && foreign_origin {
                    inbound.push(edge.clone());
                }
            }
        }

        let deleted = self.delete_nodes_by_file(&file)?;
        let written: Vec<NodeId> = tx.nodes.iter().map(|n| n.id).collect();
        let nodes_written = self.upsert_nodes(tx.nodes)?;
        let edges_written = self.upsert_edges(tx.edges)?;

        let mut stats = RebuildStats {
            file: file.clone(),
            nodes_removed: deleted.nodes,
            nodes_written,
            edges_written,
            written,
            ..RebuildStats::default()
        };

        for edge in inbound {
            if self.contains(edge.target) {
                self.upsert_edges(vec![edge])?;
                stats.edges_restored += 1;
                continue;
            }
            match edge.kind {
                EdgeKind::Imports => {
                    let Some(dotted) = old_modules.get(&edge.target) else {
                        stats.detached.push(edge.source);
                        continue;
                    };
                    self.upsert_nodes(vec![GraphNode::placeholder_module(dotted)])?;
                    self.upsert_edges(vec![edge])?;
                    stats.placeholders_created += 1;
                    stats.edges_restored += 1;
                }
                EdgeKind::ResolvesTo => {
                    self.set_resolution(edge.source, ResolutionStatus::Unresolved, false)?;
                    stats.detached.push(edge.source);
                }
                _ => stats.detached.push(edge.source),
            }
        }
        stats.detached.sort();
        stats.detached.dedup();
        stats.nodes_pruned = self.prune_unreferenced()?;

        debug!(
            "Rebuilt {}: -{} +{} nodes, {} edges, {} restored, {} detached",
            file.display(),
            stats.nodes_removed,
            stats.nodes_written,
            stats.edges_written,
            stats.edges_restored,
            stats.detached.len()
        );
        Ok(stats)
    }
}

/// The complete extraction result for one file, applied as one unit.
#[derive(Debug, Clone, Default)]
pub struct FileTransaction {
    pub file: PathBuf,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl FileTransaction {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        FileTransaction {
            file: file.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// A removal: the file's slice is replaced by nothing.
    pub fn removal(file: impl Into<PathBuf>) -> Self {
        Self::new(file)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteStats {
    pub nodes: usize,
    pub edges: usize,
}

/// Outcome of one [`GraphStore::rebuild_file`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildStats {
    pub file: PathBuf,
    pub nodes_removed: usize,
    pub nodes_written: usize,
    pub edges_written: usize,
    pub edges_restored: usize,
    pub placeholders_created: usize,
    pub nodes_pruned: usize,
    /// Ids written by the transaction.
    pub written: Vec<NodeId>,
    /// Nodes in other files that lost an edge into this file.
    pub detached: Vec<NodeId>,
}

impl GraphStore for Graph {
    fn upsert_nodes(&mut self, batch: Vec<GraphNode>) -> Result<usize, StoreError> {
        let mut written = 0;
        for node in batch {
            if self.upsert_node(node) {
                written += 1;
            }
        }
        Ok(written)
    }

    fn upsert_edges(&mut self, batch: Vec<GraphEdge>) -> Result<usize, StoreError> {
        // Check first so a bad batch leaves the graph untouched.
        for edge in &batch {
            for end in [edge.source, edge.target] {
                if !self.contains(end) {
                    return Err(StoreError::MissingEndpoint {
                        edge: edge.key(),
                        missing: end,
                    });
                }
            }
        }
        let count = batch.len();
        for edge in batch {
            self.upsert_edge(edge)?;
        }
        Ok(count)
    }

    fn delete_nodes_by_file(&mut self, file: &Path) -> Result<DeleteStats, StoreError> {
        let mut stats = DeleteStats::default();
        for key in self.edges_from_file(file) {
            if self.remove_edge(&key).is_some() {
                stats.edges += 1;
            }
        }
        for id in self.nodes_in_file(file) {
            let incident = self.edges(id, Direction::Outgoing).len()
                + self.edges(id, Direction::Incoming).len();
            if self.remove_node(id).is_some() {
                stats.nodes += 1;
                stats.edges += incident;
            }
        }
        Ok(stats)
    }

    fn remove_edges(&mut self, keys: &[EdgeKey]) -> Result<usize, StoreError> {
        Ok(keys
            .iter()
            .filter(|key| self.remove_edge(key).is_some())
            .count())
    }

    fn prune_unreferenced(&mut self) -> Result<usize, StoreError> {
        let mut doomed = Vec::new();
        for node in self.all_nodes() {
            let prunable = match &node.data {
                NodeData::Module(m) => m.is_external,
                NodeData::Type(t) => {
                    t.namespace != crate::types::BUILTINS_NAMESPACE || t.kind != TypeKind::Nominal
                }
                _ => false,
            };
            if !prunable || node.file_path.is_some() {
                continue;
            }
            let referenced = !self.edges(node.id, Direction::Incoming).is_empty()
                || !self.edges(node.id, Direction::Outgoing).is_empty();
            if !referenced {
                doomed.push(node.id);
            }
        }
        for id in &doomed {
            self.remove_node(*id);
        }
        Ok(doomed.len())
    }

    fn set_changed(&mut self, ids: &[NodeId], changed: bool) -> usize {
        let mut count = 0;
        for id in ids {
            if let Some(node) = self.node_mut(*id) {
                node.changed = changed;
                count += 1;
            }
        }
        count
    }

    fn set_resolution(
        &mut self,
        call_site: NodeId,
        status: ResolutionStatus,
        implicit_receiver: bool,
    ) -> Result<(), StoreError> {
        let node = self
            .node_mut(call_site)
            .ok_or_else(|| StoreError::InvalidUpdate {
                id: call_site,
                reason: "no such node".to_string(),
            })?;
        let site = node
            .as_call_site_mut()
            .ok_or_else(|| StoreError::InvalidUpdate {
                id: call_site,
                reason: "not a call site".to_string(),
            })?;
        site.resolution_status = status;
        site.implicit_receiver = implicit_receiver;
        Ok(())
    }
}

/// Bounded retry for transient store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        RetryPolicy {
            attempts: 1,
            backoff: Duration::ZERO,
        }
    }
}

/// Run `op`, retrying transient failures up to `policy.attempts` times with
/// linear backoff. Non-transient errors and the last failure are returned.
pub fn with_retry<T>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: impl FnMut() -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < attempts => {
                warn!(
                    "{} failed (attempt {}/{}): {}",
                    operation, attempt, attempts, err
                );
                std::thread::sleep(policy.backoff * attempt);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    fn two_file_graph() -> (Graph, NodeId, NodeId, NodeId) {
        // b.py: def g(x): ...    a.py: def f(): g(1)
        let mut graph = Graph::new();
        let mut tx_b = FileTransaction::new("b.py");
        let mb = module_node("b", "b.py");
        let g = function_node("b.g", "b.py", "(x)");
        let g_id = g.id;
        tx_b.edges.push(GraphEdge::new(mb.id, g.id, EdgeKind::Declares).in_file(Path::new("b.py")));
        tx_b.nodes.extend([mb, g]);
        graph.rebuild_file(tx_b).unwrap();

        let mut tx_a = FileTransaction::new("a.py");
        let ma = module_node("a", "a.py");
        let f = function_node("a.f", "a.py", "()");
        let site = call_site_node("a.f", "g", 0, "a.py", true);
        let (f_id, site_id) = (f.id, site.id);
        let a = Path::new("a.py");
        tx_a.edges.push(GraphEdge::new(ma.id, f.id, EdgeKind::Declares).in_file(a));
        tx_a.edges.push(GraphEdge::new(f.id, site.id, EdgeKind::HasCallsite).in_file(a));
        tx_a.edges.push(GraphEdge::new(site.id, g_id, EdgeKind::ResolvesTo).in_file(a).resolved());
        tx_a.edges.push(GraphEdge::new(ma.id, NodeId::module("b"), EdgeKind::Imports).in_file(a));
        tx_a.nodes.extend([ma, f, site]);
        graph.rebuild_file(tx_a).unwrap();
        (graph, f_id, site_id, g_id)
    }

    #[test]
    fn rebuild_keeps_inbound_edges_when_target_returns() {
        let (mut graph, f, site, g) = two_file_graph();

        let mut tx_b = FileTransaction::new("b.py");
        let mb = module_node("b", "b.py");
        let g_again = function_node("b.g", "b.py", "(x)");
        tx_b.edges.push(GraphEdge::new(mb.id, g_again.id, EdgeKind::Declares).in_file(Path::new("b.py")));
        tx_b.nodes.extend([mb, g_again]);
        let stats = graph.rebuild_file(tx_b).unwrap();

        assert_eq!(stats.edges_restored, 2);
        assert!(stats.detached.is_empty());
        assert_eq!(graph.callers_of(g), vec![f]);
        assert!(graph.node(site).unwrap().as_call_site().unwrap().is_resolved());
    }

    #[test]
    fn removing_target_file_detaches_callers_and_leaves_placeholder() {
        let (mut graph, _f, site, g) = two_file_graph();

        let stats = graph.rebuild_file(FileTransaction::removal("b.py")).unwrap();

        assert!(!graph.contains(g));
        assert_eq!(stats.detached, vec![site]);
        assert_eq!(stats.placeholders_created, 1);
        let placeholder = graph.node(NodeId::module("b")).unwrap();
        assert!(placeholder.as_module().unwrap().is_external);
        let call = graph.node(site).unwrap().as_call_site().unwrap();
        assert_eq!(call.resolution_status, ResolutionStatus::Unresolved);
    }

    #[test]
    fn rebuild_is_idempotent() {
        let (mut graph, ..) = two_file_graph();
        let before = graph.to_image();

        let mut tx_a = FileTransaction::new("a.py");
        for id in graph.nodes_in_file(Path::new("a.py")) {
            tx_a.nodes.push(graph.node(id).unwrap().clone());
        }
        for key in graph.edges_from_file(Path::new("a.py")) {
            tx_a.edges.push(graph.edge(&key).unwrap().clone());
        }
        graph.rebuild_file(tx_a).unwrap();

        assert_eq!(graph.to_image(), before);
    }

    #[test]
    fn invalid_transaction_leaves_graph_untouched() {
        let (mut graph, ..) = two_file_graph();
        let before = graph.to_image();

        let mut tx = FileTransaction::new("a.py");
        let m = module_node("a", "a.py");
        tx.edges.push(GraphEdge::new(m.id, NodeId(99), EdgeKind::Imports));
        tx.nodes.push(m);

        assert!(graph.rebuild_file(tx).is_err());
        assert_eq!(graph.to_image(), before);
    }

    #[test]
    fn orphaned_placeholders_are_pruned() {
        let (mut graph, ..) = two_file_graph();
        graph.rebuild_file(FileTransaction::removal("b.py")).unwrap();
        assert!(graph.contains(NodeId::module("b")));

        graph.rebuild_file(FileTransaction::removal("a.py")).unwrap();
        assert!(!graph.contains(NodeId::module("b")));
        assert_eq!(graph.node_count(), 0);
    }

    #[test]
    fn retry_gives_up_after_bounded_attempts() {
        let policy = RetryPolicy {
            attempts: 3,
            backoff: Duration::ZERO,
        };
        let mut calls = 0;
        let result: Result<(), _> = with_retry(&policy, "upsert", || {
            calls += 1;
            Err(StoreError::Transient {
                operation: "upsert".into(),
                reason: "connection reset".into(),
            })
        });
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls, 3);
    }

    #[test]
    fn retry_does_not_repeat_constraint_failures() {
        let mut calls = 0;
        let result: Result<(), _> = with_retry(&RetryPolicy::default(), "upsert", || {
            calls += 1;
            Err(StoreError::MissingEndpoint {
                edge: EdgeKey {
                    source: NodeId(1),
                    target: NodeId(2),
                    kind: EdgeKind::Imports,
                },
                missing: NodeId(2),
            })
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn retry_recovers_from_one_transient_failure() {
        let policy = RetryPolicy {
            attempts: 2,
            backoff: Duration::ZERO,
        };
        let mut calls = 0;
        let result = with_retry(&policy, "rebuild", || {
            calls += 1;
            if calls == 1 {
                Err(StoreError::Transient {
                    operation: "rebuild".into(),
                    reason: "timeout".into(),
                })
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 2);
    }
}
