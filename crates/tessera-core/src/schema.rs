//! Which node kinds each edge kind may connect

use crate::model::{EdgeKind, NodeKind};

use NodeKind::*;

/// Permitted source and target kinds for one edge kind.
#[derive(Debug, Clone, Copy)]
pub struct EdgeRule {
    pub kind: EdgeKind,
    pub sources: &'static [NodeKind],
    pub targets: &'static [NodeKind],
}

impl EdgeRule {
    pub fn permits(&self, source: NodeKind, target: NodeKind) -> bool {
        self.sources.contains(&source) && self.targets.contains(&target)
    }
}

const RULES: [EdgeRule; 14] = [
    EdgeRule {
        kind: EdgeKind::Declares,
        sources: &[Module, Class, Function],
        targets: &[Class, Function, Variable],
    },
    EdgeRule {
        kind: EdgeKind::HasParameter,
        sources: &[Function],
        targets: &[Parameter],
    },
    EdgeRule {
        kind: EdgeKind::HasCallsite,
        sources: &[Function],
        targets: &[CallSite],
    },
    EdgeRule {
        kind: EdgeKind::ResolvesTo,
        sources: &[CallSite],
        targets: &[Function],
    },
    EdgeRule {
        kind: EdgeKind::Inherits,
        sources: &[Class],
        targets: &[Class],
    },
    EdgeRule {
        kind: EdgeKind::Imports,
        sources: &[Module],
        targets: &[Module],
    },
    EdgeRule {
        kind: EdgeKind::ReturnsType,
        sources: &[Function],
        targets: &[Type],
    },
    EdgeRule {
        kind: EdgeKind::HasType,
        sources: &[Parameter, Variable],
        targets: &[Type],
    },
    EdgeRule {
        kind: EdgeKind::IsSubtypeOf,
        sources: &[Type],
        targets: &[Type],
    },
    EdgeRule {
        kind: EdgeKind::AssignsTo,
        sources: &[Function],
        targets: &[Variable],
    },
    EdgeRule {
        kind: EdgeKind::ReadsFrom,
        sources: &[Function],
        targets: &[Variable],
    },
    EdgeRule {
        kind: EdgeKind::References,
        sources: &[Module, Function, Decorator],
        targets: &[Module, Class, Function, Variable],
    },
    EdgeRule {
        kind: EdgeKind::HasDecorator,
        sources: &[Function, Class],
        targets: &[Decorator],
    },
    EdgeRule {
        kind: EdgeKind::Decorates,
        sources: &[Decorator],
        targets: &[Function, Class],
    },
];

pub fn rule(kind: EdgeKind) -> &'static EdgeRule {
    // RULES is ordered like EdgeKind::ALL
    &RULES[EdgeKind::ALL
        .iter()
        .position(|k| *k == kind)
        .unwrap_or_default()]
}

pub fn permits(kind: EdgeKind, source: NodeKind, target: NodeKind) -> bool {
    rule(kind).permits(source, target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rules_follow_edge_kind_order() {
        for (i, kind) in EdgeKind::ALL.iter().enumerate() {
            assert_eq!(RULES[i].kind, *kind);
        }
    }

    #[test]
    fn parameter_only_owned_by_functions() {
        assert!(permits(EdgeKind::HasParameter, Function, Parameter));
        assert!(!permits(EdgeKind::HasParameter, Class, Parameter));
        assert!(!permits(EdgeKind::HasParameter, Function, Variable));
    }

    #[test]
    fn decorator_links_are_mirrored() {
        let has = rule(EdgeKind::HasDecorator);
        let decorates = rule(EdgeKind::Decorates);
        assert_eq!(has.sources, decorates.targets);
        assert_eq!(has.targets, decorates.sources);
    }
}
