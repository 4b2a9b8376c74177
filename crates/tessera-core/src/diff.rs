//! Structural comparison of two graph states

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::model::*;
use crate::query::GraphRead;
use crate::snapshot::Snapshot;

/// A node present in both states whose properties differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeChange {
    pub id: NodeId,
    pub qualified_name: String,
    /// Names of the differing properties, e.g. `signature`, `location`.
    pub properties: Vec<String>,
}

/// Difference between an old and a new graph state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDiff {
    pub nodes_added: Vec<NodeId>,
    pub nodes_removed: Vec<NodeId>,
    pub nodes_modified: Vec<NodeChange>,
    pub edges_added: Vec<EdgeKey>,
    pub edges_removed: Vec<EdgeKey>,
}

impl GraphDiff {
    /// Check if this diff is empty (no changes).
    pub fn is_empty(&self) -> bool {
        self.nodes_added.is_empty()
            && self.nodes_removed.is_empty()
            && self.nodes_modified.is_empty()
            && self.edges_added.is_empty()
            && self.edges_removed.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "+{} -{} ~{} nodes, +{} -{} edges",
            self.nodes_added.len(),
            self.nodes_removed.len(),
            self.nodes_modified.len(),
            self.edges_added.len(),
            self.edges_removed.len()
        )
    }
}

/// Compare two snapshots.
pub fn compare(old: &Snapshot, new: &Snapshot) -> GraphDiff {
    diff_parts(
        old.nodes.iter(),
        old.edges.iter(),
        new.nodes.iter(),
        new.edges.iter(),
    )
}

/// Compare two live graphs.
pub fn compare_graphs(old: &dyn GraphRead, new: &dyn GraphRead) -> GraphDiff {
    let old_nodes: Vec<&GraphNode> = old.node_ids().into_iter().filter_map(|id| old.node(id)).collect();
    let new_nodes: Vec<&GraphNode> = new.node_ids().into_iter().filter_map(|id| new.node(id)).collect();
    diff_parts(
        old_nodes.into_iter(),
        old.all_edges().into_iter(),
        new_nodes.into_iter(),
        new.all_edges().into_iter(),
    )
}

fn diff_parts<'a>(
    old_nodes: impl Iterator<Item = &'a GraphNode>,
    old_edges: impl Iterator<Item = &'a GraphEdge>,
    new_nodes: impl Iterator<Item = &'a GraphNode>,
    new_edges: impl Iterator<Item = &'a GraphEdge>,
) -> GraphDiff {
    let old_nodes: BTreeMap<NodeId, &GraphNode> = old_nodes.map(|n| (n.id, n)).collect();
    let new_nodes: BTreeMap<NodeId, &GraphNode> = new_nodes.map(|n| (n.id, n)).collect();

    let mut diff = GraphDiff::default();
    for (id, new_node) in &new_nodes {
        match old_nodes.get(id) {
            None => diff.nodes_added.push(*id),
            Some(old_node) => {
                let properties = changed_properties(old_node, new_node);
                if !properties.is_empty() {
                    diff.nodes_modified.push(NodeChange {
                        id: *id,
                        qualified_name: new_node.qualified_name.clone(),
                        properties,
                    });
                }
            }
        }
    }
    diff.nodes_removed = old_nodes
        .keys()
        .filter(|id| !new_nodes.contains_key(id))
        .copied()
        .collect();

    let old_edges: BTreeMap<EdgeKey, &GraphEdge> = old_edges.map(|e| (e.key(), e)).collect();
    let new_edges: BTreeSet<EdgeKey> = new_edges.map(|e| e.key()).collect();
    diff.edges_added = new_edges
        .iter()
        .filter(|k| !old_edges.contains_key(k))
        .copied()
        .collect();
    diff.edges_removed = old_edges
        .keys()
        .filter(|k| !new_edges.contains(k))
        .copied()
        .collect();
    diff
}

/// Differing properties of two versions of one node. `changed` is transient
/// and never counts.
fn changed_properties(old: &GraphNode, new: &GraphNode) -> Vec<String> {
    let mut properties = Vec::new();
    if old.name != new.name {
        properties.push("name".to_string());
    }
    if old.qualified_name != new.qualified_name {
        properties.push("qualified_name".to_string());
    }
    if old.file_path != new.file_path {
        properties.push("file_path".to_string());
    }
    if old.location != new.location {
        properties.push("location".to_string());
    }
    if old.data != new.data {
        properties.extend(payload_differences(&old.data, &new.data));
    }
    properties
}

fn payload_differences(old: &NodeData, new: &NodeData) -> Vec<String> {
    if old.kind() != new.kind() {
        return vec!["kind".to_string()];
    }
    let fields = |data: &NodeData| -> BTreeMap<String, serde_json::Value> {
        match serde_json::to_value(data) {
            Ok(serde_json::Value::Object(outer)) => outer
                .into_iter()
                .next()
                .and_then(|(_, inner)| match inner {
                    serde_json::Value::Object(map) => Some(map.into_iter().collect()),
                    _ => None,
                })
                .unwrap_or_default(),
            _ => BTreeMap::new(),
        }
    };
    let (old_fields, new_fields) = (fields(old), fields(new));
    let keys: BTreeSet<&String> = old_fields.keys().chain(new_fields.keys()).collect();
    let differing: Vec<String> = keys
        .into_iter()
        .filter(|k| old_fields.get(*k) != new_fields.get(*k))
        .cloned()
        .collect();
    if differing.is_empty() {
        vec!["data".to_string()]
    } else {
        differing
    }
}
