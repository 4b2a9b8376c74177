//! Type annotations: canonical names, the builtin hierarchy, assignability
//!
//! Deliberately best-effort. Anything the lattice does not know is treated
//! as compatible, so the typing law only speaks up when both sides are
//! understood.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::StoreError;
use crate::model::*;
use crate::query::{Direction, GraphRead};
use crate::store::GraphStore;

pub const BUILTINS_NAMESPACE: &str = "builtins";
pub const TYPING_NAMESPACE: &str = "typing";
pub const UNKNOWN_NAMESPACE: &str = "unknown";

/// Builtin types and their direct supertypes. The numeric chain follows the
/// PEP 484 promotion rules (`int` is acceptable where `float` is expected).
pub const BUILTIN_HIERARCHY: &[(&str, &[&str])] = &[
    ("object", &[]),
    ("complex", &["object"]),
    ("float", &["complex"]),
    ("int", &["float"]),
    ("bool", &["int"]),
    ("str", &["object"]),
    ("bytes", &["object"]),
    ("bytearray", &["object"]),
    ("list", &["object"]),
    ("tuple", &["object"]),
    ("dict", &["object"]),
    ("set", &["object"]),
    ("frozenset", &["object"]),
    ("type", &["object"]),
    ("None", &["object"]),
    ("BaseException", &["object"]),
    ("Exception", &["BaseException"]),
    ("ArithmeticError", &["Exception"]),
    ("ZeroDivisionError", &["ArithmeticError"]),
    ("AttributeError", &["Exception"]),
    ("LookupError", &["Exception"]),
    ("IndexError", &["LookupError"]),
    ("KeyError", &["LookupError"]),
    ("OSError", &["Exception"]),
    ("RuntimeError", &["Exception"]),
    ("NotImplementedError", &["RuntimeError"]),
    ("TypeError", &["Exception"]),
    ("ValueError", &["Exception"]),
];

const TYPING_NAMES: &[&str] = &[
    "Any",
    "Callable",
    "Iterable",
    "Iterator",
    "Generator",
    "Sequence",
    "Mapping",
    "MutableMapping",
    "Awaitable",
    "Coroutine",
    "AsyncIterator",
    "TypeVar",
    "Protocol",
    "Literal",
    "Self",
];

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_HIERARCHY.iter().any(|(n, _)| *n == name)
}

pub fn builtin_bases(name: &str) -> &'static [&'static str] {
    BUILTIN_HIERARCHY
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, bases)| *bases)
        .unwrap_or(&[])
}

/// Namespace a canonical (nominal) type name belongs to.
pub fn namespace_of(name: &str) -> String {
    if is_builtin(name) {
        BUILTINS_NAMESPACE.to_string()
    } else if TYPING_NAMES.contains(&name) {
        TYPING_NAMESPACE.to_string()
    } else if let Some((module, _)) = name.rsplit_once('.') {
        module.to_string()
    } else {
        UNKNOWN_NAMESPACE.to_string()
    }
}

/// A parsed type annotation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeExpr {
    Named(String),
    Generic { origin: String, args: Vec<TypeExpr> },
    Union(Vec<TypeExpr>),
}

impl TypeExpr {
    /// Parse annotation text such as `Optional[List[int]]` or `int | None`.
    pub fn parse(text: &str) -> Option<TypeExpr> {
        let text = text.trim();
        let text = strip_quotes(text);
        if text.is_empty() {
            return None;
        }

        let members = split_top_level(text, '|');
        if members.len() > 1 {
            let parsed: Option<Vec<TypeExpr>> =
                members.iter().map(|m| TypeExpr::parse(m)).collect();
            return Some(TypeExpr::union(parsed?));
        }

        if let Some(open) = text.find('[') {
            if !text.ends_with(']') {
                return None;
            }
            let origin = normalize_name(text[..open].trim());
            let inner = &text[open + 1..text.len() - 1];
            let args: Option<Vec<TypeExpr>> = split_top_level(inner, ',')
                .iter()
                .filter(|a| !a.trim().is_empty())
                .map(|a| {
                    let a = a.trim();
                    if a.starts_with('[') || a == "..." {
                        Some(TypeExpr::Named(a.to_string()))
                    } else {
                        TypeExpr::parse(a)
                    }
                })
                .collect();
            let args = args?;
            return Some(match origin.as_str() {
                "Optional" => {
                    let mut members = args;
                    members.push(TypeExpr::Named("None".to_string()));
                    TypeExpr::union(members)
                }
                "Union" => TypeExpr::union(args),
                _ => TypeExpr::Generic { origin, args },
            });
        }

        Some(TypeExpr::Named(normalize_name(text)))
    }

    fn union(members: Vec<TypeExpr>) -> TypeExpr {
        let mut flat: Vec<TypeExpr> = Vec::new();
        for member in members {
            match member {
                TypeExpr::Union(inner) => {
                    for m in inner {
                        if !flat.contains(&m) {
                            flat.push(m);
                        }
                    }
                }
                other => {
                    if !flat.contains(&other) {
                        flat.push(other);
                    }
                }
            }
        }
        if flat.len() == 1 {
            flat.remove(0)
        } else {
            TypeExpr::Union(flat)
        }
    }

    pub fn canonical(&self) -> String {
        match self {
            TypeExpr::Named(name) => name.clone(),
            TypeExpr::Generic { origin, args } => {
                let args: Vec<String> = args.iter().map(|a| a.canonical()).collect();
                format!("{}[{}]", origin, args.join(", "))
            }
            TypeExpr::Union(members) => members
                .iter()
                .map(|m| m.canonical())
                .collect::<Vec<_>>()
                .join(" | "),
        }
    }

    pub fn kind(&self) -> TypeKind {
        match self {
            TypeExpr::Named(_) => TypeKind::Nominal,
            TypeExpr::Generic { .. } => TypeKind::Generic,
            TypeExpr::Union(_) => TypeKind::Union,
        }
    }

    /// Nominal name for lattice lookups: the origin of a generic.
    pub fn head(&self) -> Option<&str> {
        match self {
            TypeExpr::Named(name) => Some(name),
            TypeExpr::Generic { origin, .. } => Some(origin),
            TypeExpr::Union(_) => None,
        }
    }

    /// Direct components: generic arguments or union members.
    pub fn parts(&self) -> Vec<&TypeExpr> {
        match self {
            TypeExpr::Named(_) => Vec::new(),
            TypeExpr::Generic { args, .. } => args.iter().collect(),
            TypeExpr::Union(members) => members.iter().collect(),
        }
    }

    /// Rewrite every nominal name through `f`, e.g. to qualify local classes.
    pub fn map_names(&self, f: &dyn Fn(&str) -> String) -> TypeExpr {
        match self {
            TypeExpr::Named(name) => TypeExpr::Named(f(name)),
            TypeExpr::Generic { origin, args } => TypeExpr::Generic {
                origin: f(origin),
                args: args.iter().map(|a| a.map_names(f)).collect(),
            },
            TypeExpr::Union(members) => {
                TypeExpr::Union(members.iter().map(|m| m.map_names(f)).collect())
            }
        }
    }
}

fn strip_quotes(text: &str) -> &str {
    let bytes = text.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' || first == b'\'') && first == last {
            return text[1..text.len() - 1].trim();
        }
    }
    text
}

fn normalize_name(name: &str) -> String {
    let name = name.strip_prefix("typing.").unwrap_or(name);
    match name {
        "List" => "list",
        "Dict" => "dict",
        "Set" => "set",
        "FrozenSet" => "frozenset",
        "Tuple" => "tuple",
        "Type" => "type",
        "NoneType" => "None",
        "Text" => "str",
        other => other,
    }
    .to_string()
}

/// Split on `sep` outside of brackets.
fn split_top_level(text: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for ch in text.chars() {
        match ch {
            '[' | '(' => depth += 1,
            ']' | ')' => depth -= 1,
            _ => {}
        }
        if ch == sep && depth == 0 {
            parts.push(current.trim().to_string());
            current.clear();
        } else {
            current.push(ch);
        }
    }
    parts.push(current.trim().to_string());
    parts
}

/// Shared `Type` node for a parsed annotation.
pub fn type_node(expr: &TypeExpr) -> GraphNode {
    let canonical = expr.canonical();
    let namespace = match expr.head() {
        Some(head) => namespace_of(head),
        None => UNKNOWN_NAMESPACE.to_string(),
    };
    let bases = match expr {
        TypeExpr::Named(name) => builtin_bases(name).iter().map(|b| b.to_string()).collect(),
        _ => Vec::new(),
    };
    GraphNode {
        id: NodeId::type_named(&canonical),
        name: expr.head().unwrap_or(&canonical).to_string(),
        qualified_name: canonical.clone(),
        file_path: None,
        location: Location::default(),
        changed: false,
        data: NodeData::Type(TypeData {
            canonical,
            namespace,
            kind: expr.kind(),
            bases,
            args: expr.parts().iter().map(|p| p.canonical()).collect(),
        }),
    }
}

/// Write the builtin type hierarchy into `store`. Safe to call repeatedly.
pub fn seed_builtins<S: GraphStore + ?Sized>(store: &mut S) -> Result<usize, StoreError> {
    if BUILTIN_HIERARCHY
        .iter()
        .all(|(name, _)| store.contains(NodeId::type_named(name)))
    {
        return Ok(0);
    }
    let nodes: Vec<GraphNode> = BUILTIN_HIERARCHY
        .iter()
        .map(|(name, _)| type_node(&TypeExpr::Named(name.to_string())))
        .collect();
    let edges: Vec<GraphEdge> = BUILTIN_HIERARCHY
        .iter()
        .flat_map(|(name, bases)| {
            bases.iter().map(move |b| {
                GraphEdge::new(
                    NodeId::type_named(name),
                    NodeId::type_named(b),
                    EdgeKind::IsSubtypeOf,
                )
            })
        })
        .collect();
    let written = store.upsert_nodes(nodes)?;
    store.upsert_edges(edges)?;
    Ok(written)
}

/// Subtype relation over nominal types, seeded from the builtin hierarchy and
/// extended by the graph's `Type` nodes and `IS_SUBTYPE_OF` edges.
#[derive(Debug, Clone, Default)]
pub struct TypeLattice {
    supertypes: HashMap<String, Vec<String>>,
}

impl TypeLattice {
    pub fn builtin() -> Self {
        let mut lattice = TypeLattice::default();
        for (name, bases) in BUILTIN_HIERARCHY {
            lattice.declare(name, bases.iter().map(|b| b.to_string()));
        }
        lattice
    }

    pub fn from_graph(graph: &dyn GraphRead) -> Self {
        let mut lattice = TypeLattice::builtin();
        for id in graph.nodes_of_kind(NodeKind::Type) {
            let Some(node) = graph.node(id) else { continue };
            let Some(data) = node.as_type() else { continue };
            if data.kind != TypeKind::Nominal {
                continue;
            }
            let mut bases = data.bases.clone();
            for sup in graph.neighbors(id, EdgeKind::IsSubtypeOf, Direction::Outgoing) {
                if let Some(t) = graph.node(sup).and_then(|n| n.as_type()) {
                    bases.push(t.canonical.clone());
                }
            }
            lattice.declare(&data.canonical, bases.into_iter());
        }
        lattice
    }

    pub fn declare(&mut self, name: &str, bases: impl Iterator<Item = String>) {
        let entry = self.supertypes.entry(name.to_string()).or_default();
        for base in bases {
            if !entry.contains(&base) {
                entry.push(base);
            }
        }
    }

    pub fn knows(&self, name: &str) -> bool {
        self.supertypes.contains_key(name)
    }

    /// Reflexive, transitive subtype check over known nominal types.
    pub fn is_subtype(&self, sub: &str, sup: &str) -> bool {
        if sub == sup {
            return true;
        }
        let mut seen = HashSet::from([sub.to_string()]);
        let mut queue = VecDeque::from([sub.to_string()]);
        while let Some(current) = queue.pop_front() {
            for base in self.supertypes.get(&current).into_iter().flatten() {
                if base == sup {
                    return true;
                }
                if seen.insert(base.clone()) {
                    queue.push_back(base.clone());
                }
            }
        }
        false
    }

    /// Whether a value of type `actual` may flow where `declared` is expected.
    /// Unparseable or unknown types are assignable.
    pub fn is_assignable(&self, actual: &str, declared: &str) -> bool {
        match (TypeExpr::parse(actual), TypeExpr::parse(declared)) {
            (Some(a), Some(d)) => self.assignable(&a, &d),
            _ => true,
        }
    }

    fn assignable(&self, actual: &TypeExpr, declared: &TypeExpr) -> bool {
        if let TypeExpr::Named(d) = declared {
            if d == "Any" || d == "object" {
                return true;
            }
        }
        if let TypeExpr::Named(a) = actual {
            if a == "Any" {
                return true;
            }
        }
        match (actual, declared) {
            (_, TypeExpr::Union(members)) => members.iter().any(|m| self.assignable(actual, m)),
            (TypeExpr::Union(members), _) => members.iter().all(|m| self.assignable(m, declared)),
            _ => {
                let (Some(a), Some(d)) = (actual.head(), declared.head()) else {
                    return true;
                };
                if a == d {
                    return true;
                }
                if !self.knows(a) || !self.knows(d) {
                    return true;
                }
                self.is_subtype(a, d)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_becomes_union_with_none() {
        let t = TypeExpr::parse("Optional[int]").unwrap();
        assert_eq!(t.canonical(), "int | None");
        assert_eq!(t.kind(), TypeKind::Union);
    }

    #[test]
    fn typing_aliases_are_normalized() {
        let t = TypeExpr::parse("typing.Dict[str, List[int]]").unwrap();
        assert_eq!(t.canonical(), "dict[str, list[int]]");
        assert_eq!(t.kind(), TypeKind::Generic);
    }

    #[test]
    fn nested_unions_flatten() {
        let t = TypeExpr::parse("Union[int, Optional[str]] | int").unwrap();
        assert_eq!(t.canonical(), "int | str | None");
    }

    #[test]
    fn string_annotations_are_unquoted() {
        assert_eq!(TypeExpr::parse("'Node'").unwrap().canonical(), "Node");
    }

    #[test]
    fn numeric_promotion() {
        let lattice = TypeLattice::builtin();
        assert!(lattice.is_assignable("bool", "float"));
        assert!(lattice.is_assignable("int", "float"));
        assert!(!lattice.is_assignable("float", "int"));
        assert!(!lattice.is_assignable("str", "int"));
    }

    #[test]
    fn unknown_types_are_given_the_benefit_of_the_doubt() {
        let lattice = TypeLattice::builtin();
        assert!(lattice.is_assignable("str", "Sequence[str]"));
        assert!(lattice.is_assignable("mystery.Thing", "int"));
    }

    #[test]
    fn unions_and_generics() {
        let lattice = TypeLattice::builtin();
        assert!(lattice.is_assignable("None", "Optional[int]"));
        assert!(!lattice.is_assignable("str", "int | None"));
        assert!(lattice.is_assignable("list", "List[int]"));
        assert!(!lattice.is_assignable("dict", "List[int]"));
    }

    #[test]
    fn seeding_builtins_is_idempotent() {
        let mut graph = crate::graph::Graph::new();
        let first = seed_builtins(&mut graph).unwrap();
        let nodes = graph.node_count();
        let edges = graph.edge_count();

        assert_eq!(first, BUILTIN_HIERARCHY.len());
        assert_eq!(seed_builtins(&mut graph).unwrap(), 0);
        assert_eq!((graph.node_count(), graph.edge_count()), (nodes, edges));

        let lattice = TypeLattice::from_graph(&graph);
        assert!(lattice.is_subtype("KeyError", "Exception"));
    }

    #[test]
    fn namespaces() {
        assert_eq!(namespace_of("int"), BUILTINS_NAMESPACE);
        assert_eq!(namespace_of("Any"), TYPING_NAMESPACE);
        assert_eq!(namespace_of("pkg.models.User"), "pkg.models");
        assert_eq!(namespace_of("User"), UNKNOWN_NAMESPACE);
    }
}
