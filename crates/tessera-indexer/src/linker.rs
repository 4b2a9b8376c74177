//! Cross-file linking: turns the candidates recorded during extraction into
//! `RESOLVES_TO`, `INHERITS`, `IS_SUBTYPE_OF` and `REFERENCES` edges once
//! their targets are in the graph.

use std::collections::HashSet;

use rayon::prelude::*;
use tracing::debug;

use tessera_core::types::is_builtin;
use tessera_core::{
    AccessType, BaseRef, CallSiteData, Candidate, Direction, EdgeKind, GraphEdge, GraphNode,
    GraphRead, GraphStore, NodeData, NodeId, NodeKind, StoreError, SymbolEntry, SymbolLookup,
};

/// Where a call site resolves and whether the target binds its receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub target: NodeId,
    pub implicit_receiver: bool,
}

/// Edges and call-site updates computed against a read-only graph.
#[derive(Debug, Default)]
pub struct LinkPlan {
    pub edges: Vec<GraphEdge>,
    pub resolutions: Vec<(NodeId, Resolution)>,
    /// Call sites examined that still have no target.
    pub unresolved: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub calls_resolved: usize,
    pub calls_unresolved: usize,
    pub edges_added: usize,
    /// Nodes that gained a link.
    pub linked: Vec<NodeId>,
}

pub struct Linker<'a> {
    symbols: &'a dyn SymbolLookup,
}

impl<'a> Linker<'a> {
    pub fn new(symbols: &'a dyn SymbolLookup) -> Self {
        Self { symbols }
    }

    /// Declaration `name` denotes. With several, the last one in source
    /// order wins, as it does at runtime.
    fn pick(&self, name: &str, kinds: &[NodeKind]) -> Option<SymbolEntry> {
        self.symbols
            .lookup(name)
            .into_iter()
            .filter(|e| !e.is_external && kinds.contains(&e.kind))
            .max_by_key(|e| (e.line, e.id))
    }

    pub fn resolve_class(&self, name: &str) -> Option<SymbolEntry> {
        self.pick(name, &[NodeKind::Class])
    }

    /// `member` on `class` or, depth-first left to right, its bases.
    pub fn find_member(&self, class: &SymbolEntry, member: &str) -> Option<NodeId> {
        let mut visited = HashSet::new();
        self.find_member_in(class, member, &mut visited)
    }

    fn find_member_in(
        &self,
        class: &SymbolEntry,
        member: &str,
        visited: &mut HashSet<NodeId>,
    ) -> Option<NodeId> {
        if !visited.insert(class.id) {
            return None;
        }
        let qualified = format!("{}.{}", class.qualified_name, member);
        if let Some(function) = self.pick(&qualified, &[NodeKind::Function]) {
            return Some(function.id);
        }
        for base in &class.bases {
            let Some(base) = base.iter().find_map(|c| self.resolve_class(c)) else {
                continue;
            };
            if let Some(found) = self.find_member_in(&base, member, visited) {
                return Some(found);
            }
        }
        None
    }

    /// First candidate that resolves to a function wins. A class resolves to
    /// its `__init__`.
    pub fn resolve_call(&self, site: &CallSiteData) -> Option<Resolution> {
        site.candidates.iter().find_map(|candidate| match candidate {
            Candidate::Qualified(name) => {
                let entry = self.pick(name, &[NodeKind::Function, NodeKind::Class])?;
                match entry.kind {
                    NodeKind::Function => Some(Resolution {
                        target: entry.id,
                        implicit_receiver: false,
                    }),
                    _ => self.find_member(&entry, "__init__").map(|target| Resolution {
                        target,
                        implicit_receiver: true,
                    }),
                }
            }
            Candidate::Member {
                class,
                member,
                bound,
            } => {
                let class = self.resolve_class(class)?;
                self.find_member(&class, member).map(|target| Resolution {
                    target,
                    implicit_receiver: *bound,
                })
            }
        })
    }

    pub fn resolve_base(&self, base: &BaseRef) -> Option<SymbolEntry> {
        base.candidates.iter().find_map(|c| self.resolve_class(c))
    }

    pub fn resolve_decorator(&self, candidates: &[String]) -> Option<NodeId> {
        candidates.iter().find_map(|c| {
            self.pick(c, &[NodeKind::Function, NodeKind::Class, NodeKind::Variable])
                .map(|e| e.id)
        })
    }

    /// Whether `class` or any class it inherits from is named in `defined`.
    fn lineage_in(&self, class: &SymbolEntry, defined: &HashSet<String>, visited: &mut HashSet<NodeId>) -> bool {
        if !visited.insert(class.id) {
            return false;
        }
        if defined.contains(&class.qualified_name) {
            return true;
        }
        class.bases.iter().any(|base| {
            base.iter()
                .find_map(|c| self.resolve_class(c))
                .is_some_and(|base| self.lineage_in(&base, defined, visited))
        })
    }

    /// Whether a definition named in `defined` can take part in resolving
    /// `site`: as a candidate itself, or as the class (or an ancestor of
    /// the class) a candidate looks a member up on.
    fn depends_on(&self, site: &CallSiteData, defined: &HashSet<String>) -> bool {
        site.candidates.iter().any(|candidate| {
            let class = match candidate {
                Candidate::Qualified(name) => {
                    if defined.contains(name) {
                        return true;
                    }
                    name
                }
                Candidate::Member { class, member, .. } => {
                    if defined.contains(&format!("{}.{}", class, member)) {
                        return true;
                    }
                    class
                }
            };
            self.resolve_class(class)
                .is_some_and(|entry| self.lineage_in(&entry, defined, &mut HashSet::new()))
        })
    }

    /// Resolved call sites that would now bind elsewhere because of the
    /// definitions named in `defined`, each with its current target.
    pub fn stale<G: GraphRead + Sync + ?Sized>(
        &self,
        graph: &G,
        defined: &HashSet<String>,
    ) -> Vec<(NodeId, NodeId)> {
        if defined.is_empty() {
            return Vec::new();
        }
        let mut stale: Vec<(NodeId, NodeId)> = graph
            .nodes_of_kind(NodeKind::CallSite)
            .par_iter()
            .filter_map(|id| {
                let site = graph.node(*id)?.as_call_site()?;
                let targets = graph.edges_of_kind(*id, EdgeKind::ResolvesTo, Direction::Outgoing);
                let [current] = targets.as_slice() else {
                    return None;
                };
                if !self.depends_on(site, defined) {
                    return None;
                }
                let now = self.resolve_call(site).map(|r| r.target);
                (now != Some(current.target)).then_some((*id, current.target))
            })
            .collect();
        stale.sort();
        stale
    }

    /// Compute links for `scope` (every linkable node when `None`).
    pub fn plan<G: GraphRead + Sync + ?Sized>(&self, graph: &G, scope: Option<&[NodeId]>) -> LinkPlan {
        let ids: Vec<NodeId> = match scope {
            Some(ids) => ids.to_vec(),
            None => [NodeKind::CallSite, NodeKind::Class, NodeKind::Decorator]
                .iter()
                .flat_map(|k| graph.nodes_of_kind(*k))
                .collect(),
        };

        let planned: Vec<(Vec<GraphEdge>, Option<(NodeId, Resolution)>, bool)> = ids
            .par_iter()
            .filter_map(|id| graph.node(*id))
            .map(|node| self.plan_node(graph, node))
            .collect();

        let mut plan = LinkPlan::default();
        for (edges, resolution, unresolved) in planned {
            plan.edges.extend(edges);
            plan.resolutions.extend(resolution);
            if unresolved {
                plan.unresolved += 1;
            }
        }
        // Several call sites can yield the same reference; keep the earliest.
        plan.edges.sort_by_key(|e| (e.key(), e.line));
        plan.edges.dedup_by_key(|e| e.key());
        plan.resolutions.sort_by_key(|(id, _)| *id);
        plan
    }

    fn plan_node<G: GraphRead + ?Sized>(
        &self,
        graph: &G,
        node: &GraphNode,
    ) -> (Vec<GraphEdge>, Option<(NodeId, Resolution)>, bool) {
        let file = node.file_path.clone().unwrap_or_default();
        let line = node.location.line;
        let missing = |source: NodeId, target: NodeId, kind: EdgeKind| {
            !graph
                .edges_of_kind(source, kind, Direction::Outgoing)
                .iter()
                .any(|e| e.target == target)
        };

        match &node.data {
            NodeData::CallSite(site) => {
                if !graph
                    .edges_of_kind(node.id, EdgeKind::ResolvesTo, Direction::Outgoing)
                    .is_empty()
                {
                    return (Vec::new(), None, false);
                }
                let Some(resolution) = self.resolve_call(site) else {
                    return (Vec::new(), None, true);
                };
                let edges = vec![
                    GraphEdge::new(node.id, resolution.target, EdgeKind::ResolvesTo)
                        .in_file(&file)
                        .at_line(line)
                        .resolved(),
                    GraphEdge::new(site.caller, resolution.target, EdgeKind::References)
                        .in_file(&file)
                        .at_line(line)
                        .with_access(AccessType::Call),
                ];
                (edges, Some((node.id, resolution)), false)
            }
            NodeData::Class(class) => {
                let mut edges = Vec::new();
                let class_type = NodeId::type_named(&node.qualified_name);
                for base in &class.bases {
                    let (base_class, base_type) = match self.resolve_base(base) {
                        Some(entry) => {
                            let ty = NodeId::type_named(&entry.qualified_name);
                            (Some(entry.id), ty)
                        }
                        None if is_builtin(&base.text) => (None, NodeId::type_named(&base.text)),
                        None => continue,
                    };
                    if let Some(target) = base_class {
                        if target != node.id && missing(node.id, target, EdgeKind::Inherits) {
                            edges.push(
                                GraphEdge::new(node.id, target, EdgeKind::Inherits)
                                    .in_file(&file)
                                    .at_line(line),
                            );
                        }
                    }
                    if graph.contains(class_type)
                        && graph.contains(base_type)
                        && class_type != base_type
                        && missing(class_type, base_type, EdgeKind::IsSubtypeOf)
                    {
                        edges.push(
                            GraphEdge::new(class_type, base_type, EdgeKind::IsSubtypeOf)
                                .in_file(&file)
                                .at_line(line),
                        );
                    }
                }
                (edges, None, false)
            }
            NodeData::Decorator(decorator) => {
                let edges = match self.resolve_decorator(&decorator.candidates) {
                    Some(target) if missing(node.id, target, EdgeKind::References) => vec![
                        GraphEdge::new(node.id, target, EdgeKind::References)
                            .in_file(&file)
                            .at_line(line)
                            .with_access(AccessType::Decorate),
                    ],
                    _ => Vec::new(),
                };
                (edges, None, false)
            }
            _ => (Vec::new(), None, false),
        }
    }

    /// Write a plan through the store.
    pub fn apply<S: GraphStore + ?Sized>(&self, store: &mut S, plan: LinkPlan) -> Result<LinkStats, StoreError> {
        let mut stats = LinkStats {
            calls_resolved: plan.resolutions.len(),
            calls_unresolved: plan.unresolved,
            ..LinkStats::default()
        };
        let mut linked: Vec<NodeId> = plan.edges.iter().map(|e| e.source).collect();
        for (site, resolution) in &plan.resolutions {
            store.set_resolution(
                *site,
                tessera_core::ResolutionStatus::Resolved,
                resolution.implicit_receiver,
            )?;
        }
        stats.edges_added = store.upsert_edges(plan.edges)?;
        linked.sort();
        linked.dedup();
        stats.linked = linked;
        debug!(
            "linked {} call sites ({} unresolved), {} edges",
            stats.calls_resolved, stats.calls_unresolved, stats.edges_added
        );
        Ok(stats)
    }

    /// Plan and apply in one step.
    pub fn link<S: GraphStore + ?Sized>(&self, store: &mut S, scope: Option<&[NodeId]>) -> Result<LinkStats, StoreError> {
        let plan = self.plan(&*store, scope);
        self.apply(store, plan)
    }
}

/// Drop the resolution of each `(call site, target)` pair so the sites can
/// be linked again. The caller's call reference to the old target goes too,
/// unless another of its call sites still resolves there. Returns the sites.
pub fn unbind<S: GraphStore + ?Sized>(
    store: &mut S,
    stale: &[(NodeId, NodeId)],
) -> Result<Vec<NodeId>, StoreError> {
    let unbound: HashSet<NodeId> = stale.iter().map(|(site, _)| *site).collect();
    let mut keys = Vec::new();
    let mut resets = Vec::new();
    for (site, target) in stale {
        let Some(data) = store.node(*site).and_then(|n| n.as_call_site()) else {
            continue;
        };
        let caller = data.caller;
        resets.push((*site, data.implicit_receiver));
        keys.push(GraphEdge::new(*site, *target, EdgeKind::ResolvesTo).key());

        let still_called = store
            .neighbors(caller, EdgeKind::HasCallsite, Direction::Outgoing)
            .into_iter()
            .filter(|other| !unbound.contains(other))
            .any(|other| {
                store
                    .edges_of_kind(other, EdgeKind::ResolvesTo, Direction::Outgoing)
                    .iter()
                    .any(|e| e.target == *target)
            });
        let call_reference = store
            .edges_of_kind(caller, EdgeKind::References, Direction::Outgoing)
            .iter()
            .any(|e| e.target == *target && e.access == Some(AccessType::Call));
        if call_reference && !still_called {
            keys.push(GraphEdge::new(caller, *target, EdgeKind::References).key());
        }
    }
    keys.sort();
    keys.dedup();
    store.remove_edges(&keys)?;
    for (site, implicit_receiver) in &resets {
        store.set_resolution(*site, tessera_core::ResolutionStatus::Unresolved, *implicit_receiver)?;
    }
    if !resets.is_empty() {
        debug!("unbound {} call sites", resets.len());
    }
    Ok(resets.into_iter().map(|(site, _)| site).collect())
}

/// Nodes elsewhere in the graph still waiting for a link: unresolved call
/// sites with candidates, classes with a base that has no edge yet, and
/// decorators without a reference.
pub fn pending<G: GraphRead + ?Sized>(graph: &G) -> Vec<NodeId> {
    let mut out = Vec::new();
    for id in graph.nodes_of_kind(NodeKind::CallSite) {
        let Some(site) = graph.node(id).and_then(|n| n.as_call_site()) else {
            continue;
        };
        if !site.candidates.is_empty()
            && graph
                .edges_of_kind(id, EdgeKind::ResolvesTo, Direction::Outgoing)
                .is_empty()
        {
            out.push(id);
        }
    }
    for id in graph.nodes_of_kind(NodeKind::Class) {
        let Some(class) = graph.node(id).and_then(|n| n.as_class()) else {
            continue;
        };
        let user_bases = class.bases.iter().filter(|b| !is_builtin(&b.text)).count();
        let inherits = graph
            .edges_of_kind(id, EdgeKind::Inherits, Direction::Outgoing)
            .len();
        if inherits < user_bases {
            out.push(id);
        }
    }
    for id in graph.nodes_of_kind(NodeKind::Decorator) {
        if graph
            .edges_of_kind(id, EdgeKind::References, Direction::Outgoing)
            .is_empty()
        {
            out.push(id);
        }
    }
    out
}
