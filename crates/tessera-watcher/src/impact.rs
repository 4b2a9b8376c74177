//! Who is affected if a symbol changes

use std::path::PathBuf;

use serde::Serialize;

use tessera_core::{Direction, EdgeKind, GraphNode, GraphRead, NodeId, NodeKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImpactEntry {
    pub id: NodeId,
    pub qualified_name: String,
    pub file_path: Option<PathBuf>,
    pub line: u32,
}

impl ImpactEntry {
    fn from_node(node: &GraphNode) -> Self {
        ImpactEntry {
            id: node.id,
            qualified_name: node.qualified_name.clone(),
            file_path: node.file_path.clone(),
            line: node.location.line,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Impact {
    pub target: String,
    /// The functions or classes the name denotes.
    pub resolved: Vec<NodeId>,
    /// Functions whose calls resolve to a target (a class counts its
    /// methods), sorted by id.
    pub callers: Vec<ImpactEntry>,
    pub subclasses: Vec<ImpactEntry>,
}

/// Callers of `qualified`, or `None` when it names no function or class.
pub fn impact_of(graph: &dyn GraphRead, qualified: &str) -> Option<Impact> {
    let resolved: Vec<NodeId> = graph
        .lookup_qualified(qualified)
        .into_iter()
        .filter(|id| {
            graph
                .node(*id)
                .is_some_and(|n| matches!(n.kind(), NodeKind::Function | NodeKind::Class))
        })
        .collect();
    if resolved.is_empty() {
        return None;
    }

    let mut callers: Vec<NodeId> = Vec::new();
    let mut subclasses: Vec<NodeId> = Vec::new();
    for id in &resolved {
        let Some(node) = graph.node(*id) else { continue };
        match node.kind() {
            NodeKind::Class => {
                for method in graph.neighbors(*id, EdgeKind::Declares, Direction::Outgoing) {
                    callers.extend(graph.callers_of(method));
                }
                subclasses.extend(graph.neighbors(*id, EdgeKind::Inherits, Direction::Incoming));
            }
            _ => callers.extend(graph.callers_of(*id)),
        }
    }
    let entries = |mut ids: Vec<NodeId>| -> Vec<ImpactEntry> {
        ids.sort();
        ids.dedup();
        ids.into_iter()
            .filter_map(|id| graph.node(id))
            .map(ImpactEntry::from_node)
            .collect()
    };

    Some(Impact {
        target: qualified.to_string(),
        resolved,
        callers: entries(callers),
        subclasses: entries(subclasses),
    })
}
