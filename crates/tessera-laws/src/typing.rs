//! Calls against signatures, and literal values against declared types.

use std::collections::HashSet;

use tessera_core::{
    CallSiteData, Direction, EdgeKind, FunctionData, GraphNode, GraphRead, NodeKind, ParameterData,
    ParameterKind, TypeLattice,
};

use crate::decorators::{DecoratorPolicy, Verdict};
use crate::law::{ConservationLaw, ValidationScope};
use crate::violation::{LawKind, Violation};

const LAW: LawKind = LawKind::Typing;

/// Parameters a caller has to supply, after the receiver and any
/// decorator-supplied arguments are taken away.
#[derive(Debug)]
struct Signature<'g> {
    positional: Vec<(&'g str, &'g ParameterData)>,
    keyword_only: Vec<(&'g str, &'g ParameterData)>,
    var_positional: bool,
    var_keyword: bool,
}

impl<'g> Signature<'g> {
    fn of(params: &[&'g GraphNode], skip_receiver: bool, drop_leading: u32) -> Self {
        let mut signature = Signature {
            positional: Vec::new(),
            keyword_only: Vec::new(),
            var_positional: false,
            var_keyword: false,
        };
        for param in params.iter().copied() {
            let Some(data) = param.as_parameter() else { continue };
            let name = param.name.as_str();
            match data.kind {
                ParameterKind::Positional => signature.positional.push((name, data)),
                ParameterKind::KeywordOnly => signature.keyword_only.push((name, data)),
                ParameterKind::VariadicPositional => signature.var_positional = true,
                ParameterKind::VariadicKeyword => signature.var_keyword = true,
            }
        }
        let skip = (skip_receiver as usize + drop_leading as usize).min(signature.positional.len());
        signature.positional.drain(..skip);
        signature
    }

    fn named(&self) -> impl Iterator<Item = &(&'g str, &'g ParameterData)> {
        self.positional.iter().chain(self.keyword_only.iter())
    }

    fn required(&self) -> u32 {
        self.named().filter(|(_, p)| !p.has_default).count() as u32
    }

    /// `None` when a variadic parameter absorbs any excess.
    fn total(&self) -> Option<u32> {
        if self.var_positional || self.var_keyword {
            None
        } else {
            Some(self.named().count() as u32)
        }
    }

    fn param(&self, name: &str) -> Option<&'g ParameterData> {
        self.named().find(|(n, _)| *n == name).map(|(_, p)| *p)
    }

    fn range(&self) -> String {
        match self.total() {
            Some(total) => format!("[{}, {}]", self.required(), total),
            None => format!("[{}, unbounded]", self.required()),
        }
    }
}

pub struct TypingLaw {
    decorators: DecoratorPolicy,
    check_literal_types: bool,
}

impl Default for TypingLaw {
    fn default() -> Self {
        Self::new(DecoratorPolicy::default(), true)
    }
}

impl TypingLaw {
    pub fn new(decorators: DecoratorPolicy, check_literal_types: bool) -> Self {
        Self {
            decorators,
            check_literal_types,
        }
    }

    fn signature_for<'g>(
        &self,
        graph: &'g dyn GraphRead,
        target: &'g GraphNode,
        function: &FunctionData,
        site: &CallSiteData,
    ) -> Option<Signature<'g>> {
        if function.flags.is_property {
            return None;
        }
        let decorators: Vec<_> = graph
            .neighbors(target.id, EdgeKind::HasDecorator, Direction::Outgoing)
            .into_iter()
            .filter_map(|d| graph.node(d).and_then(|n| n.as_decorator()))
            .collect();
        let drop_leading = match self.decorators.verdict(decorators) {
            Verdict::Check { drop_leading } => drop_leading,
            Verdict::Skip => return None,
        };
        let flags = function.flags;
        let skip_receiver = flags.is_method
            && !flags.is_staticmethod
            && (site.implicit_receiver || flags.is_classmethod);
        Some(Signature::of(
            &graph.parameters_of(target.id),
            skip_receiver,
            drop_leading,
        ))
    }

    fn check_call(
        &self,
        graph: &dyn GraphRead,
        lattice: Option<&TypeLattice>,
        node: &GraphNode,
        site: &CallSiteData,
        out: &mut Vec<Violation>,
    ) {
        if site.has_star_args || site.has_star_kwargs {
            return;
        }
        let targets = graph.neighbors(node.id, EdgeKind::ResolvesTo, Direction::Outgoing);
        let [target] = targets.as_slice() else { return };
        let Some(target) = graph.node(*target) else { return };
        let Some(function) = target.as_function() else { return };
        let Some(signature) = self.signature_for(graph, target, function, site) else {
            return;
        };
        let name = &target.qualified_name;

        // Keywords: duplicates and unknown names.
        let positional_filled: HashSet<&str> = signature
            .positional
            .iter()
            .take(site.arg_count as usize)
            .map(|(n, _)| *n)
            .collect();
        let mut keywords_seen = HashSet::new();
        for keyword in site.arguments.iter().filter_map(|a| a.keyword.as_deref()) {
            if !keywords_seen.insert(keyword) || positional_filled.contains(keyword) {
                out.push(
                    Violation::error(
                        LAW,
                        "duplicate_argument",
                        node.id,
                        format!("call to {} supplies '{}' more than once", name, keyword),
                    )
                    .at(node),
                );
            } else if signature.param(keyword).is_none() && !signature.var_keyword {
                out.push(
                    Violation::error(
                        LAW,
                        "unknown_keyword",
                        node.id,
                        format!("{} has no parameter named '{}'", name, keyword),
                    )
                    .at(node),
                );
            }
        }

        let positional_capacity = signature.positional.len() as u32;
        if site.arg_count > positional_capacity && !signature.var_positional {
            out.push(
                Violation::error(
                    LAW,
                    "too_many_positional",
                    node.id,
                    format!(
                        "{} takes {} positional argument(s) but {} were given",
                        name, positional_capacity, site.arg_count
                    ),
                )
                .at(node),
            );
        }

        // Parameters bound, so a repeated keyword counts once.
        let keyword_bound = keywords_seen
            .iter()
            .filter(|k| !positional_filled.contains(*k))
            .count() as u32;
        let supplied = site.arg_count + keyword_bound;
        let required = signature.required();
        let too_many = signature.total().is_some_and(|total| supplied > total);
        if supplied < required || too_many {
            let mut v = Violation::error(
                LAW,
                "signature_mismatch",
                node.id,
                format!(
                    "call to {} supplies {} argument(s), expected {}",
                    name,
                    supplied,
                    signature.range()
                ),
            )
            .at(node);
            if supplied < required {
                let missing: Vec<&str> = signature
                    .named()
                    .enumerate()
                    .filter(|(i, (n, p))| {
                        !p.has_default
                            && (*i >= site.arg_count as usize || p.kind != ParameterKind::Positional)
                            && !keywords_seen.contains(n)
                    })
                    .map(|(_, (n, _))| *n)
                    .collect();
                if !missing.is_empty() {
                    v = v.with_fix(format!("supply {}", missing.join(", ")));
                }
            }
            out.push(v);
        }

        if let Some(lattice) = lattice {
            self.check_arguments(lattice, &signature, node, site, out);
        }
    }

    fn check_arguments(
        &self,
        lattice: &TypeLattice,
        signature: &Signature<'_>,
        node: &GraphNode,
        site: &CallSiteData,
        out: &mut Vec<Violation>,
    ) {
        let mut position = 0;
        for argument in &site.arguments {
            let param = match &argument.keyword {
                Some(keyword) => signature.param(keyword).map(|p| (keyword.as_str(), p)),
                None => {
                    position += 1;
                    signature.positional.get(position - 1).map(|(n, p)| (*n, *p))
                }
            };
            let (Some((param_name, param)), Some(actual)) = (param, &argument.inferred_type) else {
                continue;
            };
            let Some(declared) = &param.declared_type else { continue };
            if !lattice.is_assignable(actual, declared) {
                out.push(
                    Violation::warning(
                        LAW,
                        "argument_type_mismatch",
                        node.id,
                        format!(
                            "argument '{}' of {} expects {}, got {}",
                            param_name, site.callee, declared, actual
                        ),
                    )
                    .at(node),
                );
            }
        }
    }

    fn check_returns(
        &self,
        graph: &dyn GraphRead,
        lattice: &TypeLattice,
        scope: &ValidationScope,
        out: &mut Vec<Violation>,
    ) {
        for id in scope.ids_of_kind(graph, NodeKind::Function) {
            let Some(node) = graph.node(id) else { continue };
            let Some(function) = node.as_function() else { continue };
            let Some(declared) = &function.return_type else { continue };
            if function.flags.is_generator {
                continue;
            }
            for site in &function.returns {
                let Some(actual) = &site.inferred_type else { continue };
                if !lattice.is_assignable(actual, declared) {
                    out.push(
                        Violation::warning(
                            LAW,
                            "return_type_mismatch",
                            id,
                            format!(
                                "{} is declared to return {} but returns {}",
                                node.qualified_name, declared, actual
                            ),
                        )
                        .at(node)
                        .at_line(site.line, Some(site.column)),
                    );
                }
            }
        }
    }

    fn check_assignments(
        &self,
        graph: &dyn GraphRead,
        lattice: &TypeLattice,
        scope: &ValidationScope,
        out: &mut Vec<Violation>,
    ) {
        for id in scope.ids_of_kind(graph, NodeKind::Variable) {
            let Some(node) = graph.node(id) else { continue };
            let Some(variable) = node.as_variable() else { continue };
            let Some(declared) = &variable.declared_type else { continue };
            for site in &variable.assignments {
                let Some(actual) = &site.inferred_type else { continue };
                if !lattice.is_assignable(actual, declared) {
                    out.push(
                        Violation::warning(
                            LAW,
                            "assignment_type_mismatch",
                            id,
                            format!(
                                "{} is declared as {} but assigned {}",
                                node.qualified_name, declared, actual
                            ),
                        )
                        .at(node)
                        .at_line(site.line, Some(site.column)),
                    );
                }
            }
        }
    }
}

impl ConservationLaw for TypingLaw {
    fn kind(&self) -> LawKind {
        LAW
    }

    fn check(&self, graph: &dyn GraphRead, scope: &ValidationScope) -> Vec<Violation> {
        let lattice = self
            .check_literal_types
            .then(|| TypeLattice::from_graph(graph));
        let mut out = Vec::new();
        for id in scope.ids_of_kind(graph, NodeKind::CallSite) {
            let Some(node) = graph.node(id) else { continue };
            let Some(site) = node.as_call_site() else { continue };
            self.check_call(graph, lattice.as_ref(), node, site, &mut out);
        }
        if let Some(lattice) = &lattice {
            self.check_returns(graph, lattice, scope, &mut out);
            self.check_assignments(graph, lattice, scope, &mut out);
        }
        out
    }
}
