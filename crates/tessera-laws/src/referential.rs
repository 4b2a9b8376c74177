//! References must land somewhere: call-site resolution, ownership,
//! import cycles and edge endpoints.

use tessera_core::{Direction, EdgeKind, GraphNode, GraphRead, NodeKind, ResolutionStatus};

use crate::law::{ConservationLaw, ValidationScope, describe_cycle, find_cycles};
use crate::violation::{LawKind, Violation};

const LAW: LawKind = LawKind::Referential;

#[derive(Debug, Clone, Copy, Default)]
pub struct ReferentialLaw {
    report_unresolved: bool,
}

impl ReferentialLaw {
    pub fn new(report_unresolved: bool) -> Self {
        Self { report_unresolved }
    }

    fn call_sites(&self, graph: &dyn GraphRead, scope: &ValidationScope, out: &mut Vec<Violation>) {
        for id in scope.ids_of_kind(graph, NodeKind::CallSite) {
            let Some(node) = graph.node(id) else { continue };
            let Some(site) = node.as_call_site() else { continue };

            let targets = graph.neighbors(id, EdgeKind::ResolvesTo, Direction::Outgoing);
            for target in &targets {
                match graph.node(*target) {
                    Some(t) if t.kind() == NodeKind::Function => {}
                    Some(t) => out.push(
                        Violation::error(
                            LAW,
                            "dangling_resolution",
                            id,
                            format!(
                                "call to {} resolves to {} {}, not a function",
                                site.callee,
                                t.kind(),
                                t.qualified_name
                            ),
                        )
                        .at(node),
                    ),
                    None => out.push(
                        Violation::error(
                            LAW,
                            "dangling_resolution",
                            id,
                            format!("call to {} resolves to missing node {}", site.callee, target),
                        )
                        .at(node)
                        .with_fix("re-index the file that declared the target"),
                    ),
                }
            }

            if targets.len() > 1 {
                let names: Vec<String> = targets
                    .iter()
                    .filter_map(|t| graph.node(*t))
                    .map(|t| t.qualified_name.clone())
                    .collect();
                out.push(
                    Violation::error(
                        LAW,
                        "ambiguous_resolution",
                        id,
                        format!(
                            "call to {} resolves to {} targets: {}",
                            site.callee,
                            targets.len(),
                            names.join(", ")
                        ),
                    )
                    .at(node),
                );
            }

            match (site.resolution_status, targets.is_empty()) {
                (ResolutionStatus::Resolved, true) => out.push(
                    Violation::error(
                        LAW,
                        "inconsistent_resolution",
                        id,
                        format!("call to {} is marked resolved but has no target", site.callee),
                    )
                    .at(node),
                ),
                (ResolutionStatus::Unresolved, false) => out.push(
                    Violation::error(
                        LAW,
                        "inconsistent_resolution",
                        id,
                        format!("call to {} has a target but is marked unresolved", site.callee),
                    )
                    .at(node),
                ),
                (ResolutionStatus::Unresolved, true) if self.report_unresolved => out.push(
                    Violation::warning(
                        LAW,
                        "unresolved_call",
                        id,
                        format!("call to {} does not resolve to a known function", site.callee),
                    )
                    .at(node),
                ),
                _ => {}
            }

            let owners = graph.neighbors(id, EdgeKind::HasCallsite, Direction::Incoming);
            if owners.len() != 1 || owners[0] != site.caller {
                out.push(
                    Violation::error(
                        LAW,
                        "orphan_callsite",
                        id,
                        format!(
                            "call to {} has {} owning functions",
                            site.callee,
                            owners.len()
                        ),
                    )
                    .at(node),
                );
            }
        }
    }

    fn import_cycles(&self, graph: &dyn GraphRead, scope: &ValidationScope, out: &mut Vec<Violation>) {
        let starts = scope.ids_of_kind(graph, NodeKind::Module);
        let indexed = |n: &GraphNode| n.as_module().is_some_and(|m| !m.is_external);
        for cycle in find_cycles(graph, &starts, EdgeKind::Imports, &indexed) {
            let Some(origin) = cycle.first().and_then(|id| graph.node(*id)) else {
                continue;
            };
            out.push(
                Violation::warning(
                    LAW,
                    "import_cycle",
                    origin.id,
                    format!("import cycle: {}", describe_cycle(graph, &cycle)),
                )
                .at(origin)
                .with_fix("move the shared names into a module both can import"),
            );
        }
    }

    fn edge_endpoints(&self, graph: &dyn GraphRead, scope: &ValidationScope, out: &mut Vec<Violation>) {
        for edge in scope.edges(graph) {
            let missing = match (graph.contains(edge.source), graph.contains(edge.target)) {
                (true, true) => continue,
                (false, true) => edge.source,
                _ => edge.target,
            };
            let mut v = Violation::error(
                LAW,
                "dangling_edge",
                missing,
                format!("{} references missing node {}", edge.key(), missing),
            );
            if let Some(file) = &edge.file_path {
                v.file_path = Some(file.to_string_lossy().replace('\\', "/"));
            }
            if let Some(line) = edge.line {
                v = v.at_line(line, None);
            }
            out.push(v);
        }
    }
}

impl ConservationLaw for ReferentialLaw {
    fn kind(&self) -> LawKind {
        LAW
    }

    fn check(&self, graph: &dyn GraphRead, scope: &ValidationScope) -> Vec<Violation> {
        let mut out = Vec::new();
        self.call_sites(graph, scope, &mut out);
        self.import_cycles(graph, scope, &mut out);
        self.edge_endpoints(graph, scope, &mut out);
        out
    }
}
