//! One-hop change propagation and the validation neighborhood it implies

use std::collections::BTreeSet;

use serde::Serialize;

use tessera_core::{Direction, EdgeKind, GraphRead, NodeId, NodeKind};
use tessera_laws::ValidationScope;

/// Nodes touched by one cycle: the seeds a rebuild reported, and the
/// neighbors the mark spread to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    seeds: BTreeSet<NodeId>,
    propagated: BTreeSet<NodeId>,
}

impl ChangeSet {
    pub fn new(seeds: impl IntoIterator<Item = NodeId>) -> Self {
        ChangeSet {
            seeds: seeds.into_iter().collect(),
            propagated: BTreeSet::new(),
        }
    }

    pub fn seeds(&self) -> &BTreeSet<NodeId> {
        &self.seeds
    }

    /// Nodes reached by propagation that were not seeds.
    pub fn propagated(&self) -> &BTreeSet<NodeId> {
        &self.propagated
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.seeds.contains(&id) || self.propagated.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.seeds.len() + self.propagated.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty() && self.propagated.is_empty()
    }

    /// Every id, sorted.
    pub fn ids(&self) -> Vec<NodeId> {
        self.seeds.union(&self.propagated).copied().collect()
    }

    fn reach(&mut self, id: NodeId) -> bool {
        !self.seeds.contains(&id) && self.propagated.insert(id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PropagationStats {
    pub seeds: usize,
    pub callers: usize,
    pub callees: usize,
    pub subclasses: usize,
    pub superclasses: usize,
    pub importers: usize,
}

impl PropagationStats {
    pub fn propagated(&self) -> usize {
        self.callers + self.callees + self.subclasses + self.superclasses + self.importers
    }
}

/// Spread the mark exactly one hop from the seeds: callers and callees of
/// changed functions, subclasses and superclasses of changed classes, and
/// modules importing changed modules. Nodes reached this way do not spread
/// it further.
pub fn propagate(graph: &dyn GraphRead, changes: &mut ChangeSet) -> PropagationStats {
    let mut stats = PropagationStats {
        seeds: changes.seeds.len(),
        ..PropagationStats::default()
    };
    let seeds: Vec<NodeId> = changes.seeds.iter().copied().collect();
    for id in seeds {
        let Some(node) = graph.node(id) else { continue };
        match node.kind() {
            NodeKind::Function => {
                for caller in graph.callers_of(id) {
                    if changes.reach(caller) {
                        stats.callers += 1;
                    }
                }
                for callee in graph.callees_of(id) {
                    if changes.reach(callee) {
                        stats.callees += 1;
                    }
                }
            }
            NodeKind::Class => {
                for sub in graph.neighbors(id, EdgeKind::Inherits, Direction::Incoming) {
                    if changes.reach(sub) {
                        stats.subclasses += 1;
                    }
                }
                for sup in graph.neighbors(id, EdgeKind::Inherits, Direction::Outgoing) {
                    if changes.reach(sup) {
                        stats.superclasses += 1;
                    }
                }
            }
            NodeKind::Module => {
                for importer in graph.neighbors(id, EdgeKind::Imports, Direction::Incoming) {
                    if changes.reach(importer) {
                        stats.importers += 1;
                    }
                }
            }
            _ => {}
        }
    }
    stats
}

/// What the validators must look at for `changes`: the changed nodes, the
/// parameters, call sites and decorators they own, and the call sites that
/// resolve to changed functions.
pub fn validation_scope(graph: &dyn GraphRead, changes: &ChangeSet) -> ValidationScope {
    let mut ids: BTreeSet<NodeId> = BTreeSet::new();
    for id in changes.ids() {
        ids.insert(id);
        let Some(node) = graph.node(id) else { continue };
        match node.kind() {
            NodeKind::Function => {
                ids.extend(graph.neighbors(id, EdgeKind::HasParameter, Direction::Outgoing));
                ids.extend(graph.neighbors(id, EdgeKind::HasCallsite, Direction::Outgoing));
                ids.extend(graph.neighbors(id, EdgeKind::HasDecorator, Direction::Outgoing));
                ids.extend(graph.neighbors(id, EdgeKind::ResolvesTo, Direction::Incoming));
            }
            NodeKind::Class => {
                ids.extend(graph.neighbors(id, EdgeKind::HasDecorator, Direction::Outgoing));
            }
            _ => {}
        }
    }
    ValidationScope::nodes(ids)
}
