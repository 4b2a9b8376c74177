//! In-memory graph store on petgraph::StableDiGraph, keyed by stable NodeIds

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use petgraph::Direction;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::model::*;
use crate::query::GraphRead;

/// The semantic graph: a directed graph with one edge per `(source, target,
/// kind)`, plus id, file and qualified-name indices.
pub struct Graph {
    inner: StableDiGraph<GraphNode, GraphEdge>,
    index: HashMap<NodeId, NodeIndex>,
    edge_index: HashMap<EdgeKey, EdgeIndex>,
    by_file: HashMap<PathBuf, BTreeSet<NodeId>>,
    by_qualified: HashMap<String, BTreeSet<NodeId>>,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("node_count", &self.inner.node_count())
            .field("edge_count", &self.inner.edge_count())
            .finish()
    }
}

/// Serializable form of a [`Graph`], ordered by id so equal graphs produce
/// equal images.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GraphImage {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl Graph {
    pub fn new() -> Self {
        Graph {
            inner: StableDiGraph::new(),
            index: HashMap::new(),
            edge_index: HashMap::new(),
            by_file: HashMap::new(),
            by_qualified: HashMap::new(),
        }
    }

    /// Insert `node`, replacing any node with the same id but keeping its edges.
    ///
    /// A placeholder module never overwrites an indexed module with the same
    /// id. Returns `false` when the node was left untouched for that reason.
    pub fn upsert_node(&mut self, node: GraphNode) -> bool {
        if let Some(&idx) = self.index.get(&node.id) {
            let keep_existing = match (self.inner.node_weight(idx), &node.data) {
                (Some(existing), NodeData::Module(incoming)) => {
                    incoming.is_external
                        && existing.as_module().is_some_and(|m| !m.is_external)
                }
                _ => false,
            };
            if keep_existing {
                return false;
            }
            if let Some(old) = self.inner.node_weight(idx).cloned() {
                self.unindex(&old);
            }
            self.reindex(&node);
            if let Some(slot) = self.inner.node_weight_mut(idx) {
                *slot = node;
            }
            return true;
        }

        self.reindex(&node);
        let id = node.id;
        let idx = self.inner.add_node(node);
        self.index.insert(id, idx);
        true
    }

    /// Insert or replace an edge. Both endpoints must already exist.
    pub fn upsert_edge(&mut self, edge: GraphEdge) -> Result<(), StoreError> {
        let key = edge.key();
        let source = *self
            .index
            .get(&edge.source)
            .ok_or(StoreError::MissingEndpoint {
                edge: key,
                missing: edge.source,
            })?;
        let target = *self
            .index
            .get(&edge.target)
            .ok_or(StoreError::MissingEndpoint {
                edge: key,
                missing: edge.target,
            })?;

        if let Some(&idx) = self.edge_index.get(&key) {
            if let Some(slot) = self.inner.edge_weight_mut(idx) {
                *slot = edge;
            }
            return Ok(());
        }
        let idx = self.inner.add_edge(source, target, edge);
        self.edge_index.insert(key, idx);
        Ok(())
    }

    /// Get a mutable node by ID.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut GraphNode> {
        let idx = *self.index.get(&id)?;
        self.inner.node_weight_mut(idx)
    }

    pub fn edge(&self, key: &EdgeKey) -> Option<&GraphEdge> {
        let idx = *self.edge_index.get(key)?;
        self.inner.edge_weight(idx)
    }

    pub fn has_edge(&self, key: &EdgeKey) -> bool {
        self.edge_index.contains_key(key)
    }

    /// Iterate over all nodes.
    pub fn all_nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.inner
            .node_indices()
            .filter_map(move |idx| self.inner.node_weight(idx))
    }

    pub fn files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.by_file.keys().cloned().collect();
        files.sort();
        files
    }

    /// Remove a node and all its edges.
    pub fn remove_node(&mut self, id: NodeId) -> Option<GraphNode> {
        let idx = self.index.remove(&id)?;
        let incident: Vec<EdgeKey> = self
            .inner
            .edges_directed(idx, Direction::Outgoing)
            .chain(self.inner.edges_directed(idx, Direction::Incoming))
            .map(|e| e.weight().key())
            .collect();
        for key in incident {
            self.edge_index.remove(&key);
        }
        let node = self.inner.remove_node(idx)?;
        self.unindex(&node);
        Some(node)
    }

    pub fn remove_edge(&mut self, key: &EdgeKey) -> Option<GraphEdge> {
        let idx = self.edge_index.remove(key)?;
        self.inner.remove_edge(idx)
    }

    /// Edges produced by extracting `file`, whatever their endpoints.
    pub fn edges_from_file(&self, file: &Path) -> Vec<EdgeKey> {
        self.inner
            .edge_indices()
            .filter_map(|idx| self.inner.edge_weight(idx))
            .filter(|e| e.file_path.as_deref() == Some(file))
            .map(|e| e.key())
            .collect()
    }

    pub fn to_image(&self) -> GraphImage {
        let mut nodes: Vec<GraphNode> = self.all_nodes().cloned().collect();
        nodes.sort_by_key(|n| n.id);
        let mut edges: Vec<GraphEdge> = self
            .inner
            .edge_indices()
            .filter_map(|idx| self.inner.edge_weight(idx).cloned())
            .collect();
        edges.sort_by_key(|e| e.key());
        GraphImage { nodes, edges }
    }

    /// Rebuild a graph from an image. Edges with a missing endpoint are rejected.
    pub fn from_image(image: GraphImage) -> Result<Self, StoreError> {
        let mut graph = Graph::new();
        for node in image.nodes {
            graph.upsert_node(node);
        }
        for edge in image.edges {
            graph.upsert_edge(edge)?;
        }
        Ok(graph)
    }

    fn reindex(&mut self, node: &GraphNode) {
        if let Some(file) = &node.file_path {
            self.by_file
                .entry(file.clone())
                .or_default()
                .insert(node.id);
        }
        if node.kind().is_symbol() {
            self.by_qualified
                .entry(node.qualified_name.clone())
                .or_default()
                .insert(node.id);
        }
    }

    fn unindex(&mut self, node: &GraphNode) {
        if let Some(file) = &node.file_path {
            if let Some(ids) = self.by_file.get_mut(file) {
                ids.remove(&node.id);
                if ids.is_empty() {
                    self.by_file.remove(file);
                }
            }
        }
        if let Some(ids) = self.by_qualified.get_mut(&node.qualified_name) {
            ids.remove(&node.id);
            if ids.is_empty() {
                self.by_qualified.remove(&node.qualified_name);
            }
        }
    }
}

impl GraphRead for Graph {
    fn node(&self, id: NodeId) -> Option<&GraphNode> {
        let idx = *self.index.get(&id)?;
        self.inner.node_weight(idx)
    }

    fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.index.keys().copied().collect();
        ids.sort();
        ids
    }

    fn nodes_of_kind(&self, kind: NodeKind) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .all_nodes()
            .filter(|n| n.kind() == kind)
            .map(|n| n.id)
            .collect();
        ids.sort();
        ids
    }

    fn nodes_in_file(&self, file: &Path) -> Vec<NodeId> {
        self.by_file
            .get(file)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    fn edges(&self, node: NodeId, direction: Direction) -> Vec<&GraphEdge> {
        let Some(&idx) = self.index.get(&node) else {
            return Vec::new();
        };
        self.inner
            .edges_directed(idx, direction)
            .map(|edge_ref| edge_ref.weight())
            .collect()
    }

    fn all_edges(&self) -> Vec<&GraphEdge> {
        self.inner
            .edge_indices()
            .filter_map(|idx| self.inner.edge_weight(idx))
            .collect()
    }

    fn lookup_qualified(&self, qualified_name: &str) -> Vec<NodeId> {
        self.by_qualified
            .get(qualified_name)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}
