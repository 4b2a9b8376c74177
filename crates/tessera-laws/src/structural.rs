//! Shape of the graph itself: edge endpoints, parameter lists, inheritance
//! and decorator links.

use std::collections::{BTreeMap, BTreeSet};

use tessera_core::schema::{self, permits};
use tessera_core::{Direction, EdgeKind, GraphRead, NodeId, NodeKind};

use crate::law::{ConservationLaw, ValidationScope, describe_cycle, find_cycles};
use crate::violation::{LawKind, Violation};

const LAW: LawKind = LawKind::Structural;

#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralLaw;

impl StructuralLaw {
    fn edge_endpoints(&self, graph: &dyn GraphRead, scope: &ValidationScope, out: &mut Vec<Violation>) {
        for edge in scope.edges(graph) {
            let (Some(source), Some(target)) = (graph.node(edge.source), graph.node(edge.target))
            else {
                // Missing endpoints are a referential matter.
                continue;
            };
            if permits(edge.kind, source.kind(), target.kind()) {
                continue;
            }
            let rule = schema::rule(edge.kind);
            let expected = |kinds: &[NodeKind]| {
                kinds
                    .iter()
                    .map(|k| k.as_str())
                    .collect::<Vec<_>>()
                    .join("|")
            };
            let mut v = Violation::error(
                LAW,
                "invalid_edge_endpoint",
                source.id,
                format!(
                    "{} edge from {} {} to {} {}, expected {} -> {}",
                    edge.kind,
                    source.kind(),
                    source.qualified_name,
                    target.kind(),
                    target.qualified_name,
                    expected(rule.sources),
                    expected(rule.targets)
                ),
            )
            .at(source);
            if let Some(line) = edge.line {
                v = v.at_line(line, None);
            }
            out.push(v);
        }
    }

    fn parameter_positions(&self, graph: &dyn GraphRead, scope: &ValidationScope, out: &mut Vec<Violation>) {
        for id in scope.ids_of_kind(graph, NodeKind::Function) {
            let Some(function) = graph.node(id) else { continue };
            let mut by_position: BTreeMap<u32, Vec<&str>> = BTreeMap::new();
            for param in graph.parameters_of(id) {
                if let Some(data) = param.as_parameter() {
                    by_position.entry(data.position).or_default().push(&param.name);
                }
            }

            for (position, names) in &by_position {
                if names.len() > 1 {
                    out.push(
                        Violation::error(
                            LAW,
                            "duplicate_parameter_position",
                            id,
                            format!(
                                "{} has {} parameters at position {}: {}",
                                function.qualified_name,
                                names.len(),
                                position,
                                names.join(", ")
                            ),
                        )
                        .at(function)
                        .with_fix("re-extract the file to renumber its parameters"),
                    );
                }
            }

            // Positions must read 0, 1, 2, ...
            if let Some(gap) = by_position
                .keys()
                .enumerate()
                .find(|(expected, actual)| *expected as u32 != **actual)
                .map(|(expected, _)| expected as u32)
            {
                out.push(
                    Violation::error(
                        LAW,
                        "parameter_position_gap",
                        id,
                        format!(
                            "{} has no parameter at position {}",
                            function.qualified_name, gap
                        ),
                    )
                    .at(function),
                );
            }
        }
    }

    fn parameter_owners(&self, graph: &dyn GraphRead, scope: &ValidationScope, out: &mut Vec<Violation>) {
        for id in scope.ids_of_kind(graph, NodeKind::Parameter) {
            let Some(param) = graph.node(id) else { continue };
            let owners = graph.neighbors(id, EdgeKind::HasParameter, Direction::Incoming);
            match owners.len() {
                0 => out.push(
                    Violation::error(
                        LAW,
                        "orphan_parameter",
                        id,
                        format!("parameter {} has no owning function", param.qualified_name),
                    )
                    .at(param),
                ),
                1 => {}
                n => out.push(
                    Violation::error(
                        LAW,
                        "multiple_parameter_owners",
                        id,
                        format!("parameter {} is owned by {} functions", param.qualified_name, n),
                    )
                    .at(param),
                ),
            }
        }
    }

    fn inheritance_cycles(&self, graph: &dyn GraphRead, scope: &ValidationScope, out: &mut Vec<Violation>) {
        let starts = scope.ids_of_kind(graph, NodeKind::Class);
        let is_class = |n: &tessera_core::GraphNode| n.kind() == NodeKind::Class;
        for cycle in find_cycles(graph, &starts, EdgeKind::Inherits, &is_class) {
            let Some(origin) = cycle.first().and_then(|id| graph.node(*id)) else {
                continue;
            };
            out.push(
                Violation::error(
                    LAW,
                    "inheritance_cycle",
                    origin.id,
                    format!("inheritance cycle: {}", describe_cycle(graph, &cycle)),
                )
                .at(origin)
                .with_fix("remove one of the base classes in the cycle"),
            );
        }
    }

    fn decorator_links(&self, graph: &dyn GraphRead, scope: &ValidationScope, out: &mut Vec<Violation>) {
        let mut decorators: BTreeSet<NodeId> =
            scope.ids_of_kind(graph, NodeKind::Decorator).into_iter().collect();
        // A decorated entity in scope brings its decorators along.
        for kind in [NodeKind::Function, NodeKind::Class] {
            for id in scope.ids_of_kind(graph, kind) {
                decorators.extend(graph.neighbors(id, EdgeKind::HasDecorator, Direction::Outgoing));
            }
        }

        for id in decorators {
            let Some(node) = graph.node(id) else { continue };
            let Some(data) = node.as_decorator() else { continue };
            let decorates = graph.neighbors(id, EdgeKind::Decorates, Direction::Outgoing);
            let owners = graph.neighbors(id, EdgeKind::HasDecorator, Direction::Incoming);

            let problem = if decorates != owners {
                Some(format!(
                    "@{} decorates {} entities but is attached to {}",
                    data.name,
                    decorates.len(),
                    owners.len()
                ))
            } else if decorates.len() != 1 {
                Some(format!("@{} is linked to {} entities", data.name, decorates.len()))
            } else if decorates[0] != data.target {
                Some(format!("@{} is linked to the wrong entity", data.name))
            } else {
                None
            };

            if let Some(message) = problem {
                out.push(
                    Violation::error(LAW, "decorator_link_mismatch", id, message)
                        .at(node)
                        .with_fix("re-extract the file that declares the decorator"),
                );
            }
        }
    }
}

impl ConservationLaw for StructuralLaw {
    fn kind(&self) -> LawKind {
        LAW
    }

    fn check(&self, graph: &dyn GraphRead, scope: &ValidationScope) -> Vec<Violation> {
        let mut out = Vec::new();
        self.edge_endpoints(graph, scope, &mut out);
        self.parameter_positions(graph, scope, &mut out);
        self.parameter_owners(graph, scope, &mut out);
        self.inheritance_cycles(graph, scope, &mut out);
        self.decorator_links(graph, scope, &mut out);
        out
    }
}
