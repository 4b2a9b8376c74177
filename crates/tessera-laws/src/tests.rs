//! Law checks over indexed sources and over deliberately broken graphs

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tessera_core::*;
use tessera_indexer::Indexer;

use crate::*;

fn write_repo(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (path, content) in files {
        let full = dir.path().join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }
    dir
}

fn index(files: &[(&str, &str)], config: &TesseraConfig) -> (tempfile::TempDir, Graph) {
    let repo = write_repo(files);
    let indexer = Indexer::new(repo.path(), config.clone()).unwrap();
    let mut graph = Graph::new();
    let report = indexer.index_all(&mut graph).unwrap();
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    (repo, graph)
}

fn validate(graph: &Graph, config: &TesseraConfig) -> ValidationReport {
    Validator::from_config(config)
        .unwrap()
        .validate(graph, &ValidationScope::Full)
}

fn counts(violations: &[Violation]) -> BTreeMap<String, usize> {
    let mut out = BTreeMap::new();
    for v in violations {
        *out.entry(v.violation_type.clone()).or_insert(0) += 1;
    }
    out
}

fn expect(pairs: &[(&str, usize)]) -> BTreeMap<String, usize> {
    pairs.iter().map(|(k, n)| (k.to_string(), *n)).collect()
}

// Hand-built graphs

fn make(qualified: &str, data: NodeData) -> GraphNode {
    GraphNode {
        id: NodeId::new(data.kind(), qualified),
        name: qualified.rsplit('.').next().unwrap_or(qualified).to_string(),
        qualified_name: qualified.to_string(),
        file_path: Some(PathBuf::from("m.py")),
        location: Location::new(1, 1, 1),
        changed: false,
        data,
    }
}

fn function(qualified: &str) -> GraphNode {
    make(qualified, NodeData::Function(FunctionData::default()))
}

fn param(qualified: &str, function: NodeId, position: u32) -> GraphNode {
    make(
        qualified,
        NodeData::Parameter(ParameterData {
            function,
            position,
            kind: ParameterKind::Positional,
            declared_type: None,
            has_default: false,
        }),
    )
}

fn class(qualified: &str) -> GraphNode {
    make(qualified, NodeData::Class(ClassData::default()))
}

fn module(dotted: &str, external: bool) -> GraphNode {
    make(
        dotted,
        NodeData::Module(ModuleData {
            dotted_path: dotted.to_string(),
            is_package: false,
            is_external: external,
            imports: Vec::new(),
        }),
    )
}

fn call_site(qualified: &str, caller: NodeId, status: ResolutionStatus) -> GraphNode {
    make(
        qualified,
        NodeData::CallSite(CallSiteData {
            caller,
            callee: qualified.rsplit(':').nth(1).unwrap_or(qualified).to_string(),
            resolution_status: status,
            arg_count: 0,
            arguments: Vec::new(),
            has_star_args: false,
            has_star_kwargs: false,
            implicit_receiver: false,
            candidates: Vec::new(),
        }),
    )
}

fn edge(source: &GraphNode, target: &GraphNode, kind: EdgeKind) -> GraphEdge {
    GraphEdge::new(source.id, target.id, kind).in_file(Path::new("m.py"))
}

fn graph_of(nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> Graph {
    let mut graph = Graph::new();
    graph.upsert_nodes(nodes).unwrap();
    graph.upsert_edges(edges).unwrap();
    graph
}

#[test]
fn default_parameters_widen_the_arity_range() {
    let source = r#"
def f(a, b=1):
    return a


def g(a, b):
    return a


def main():
    f(1)
    g(1)
"#;
    let config = TesseraConfig::default();
    let (_repo, graph) = index(&[("m.py", source)], &config);
    let report = validate(&graph, &config);

    assert_eq!(counts(&report.violations), expect(&[("signature_mismatch", 1)]));
    let v = &report.violations[0];
    assert_eq!(v.law, LawKind::Typing);
    assert_eq!(v.severity, Severity::Error);
    assert!(v.message.contains("m.g"), "{}", v.message);
    assert!(v.message.contains("[2, 2]"), "{}", v.message);
    assert_eq!(v.suggested_fix.as_deref(), Some("supply b"));
    assert_eq!(v.file_path.as_deref(), Some("m.py"));
    assert_eq!(v.line_number, Some(12));
}

#[test]
fn receivers_are_discounted() {
    let source = r#"
class Box:
    def __init__(self, size):
        self.size = size

    def grow(self, by, *, twice=False):
        return by

    @classmethod
    def make(cls, size):
        return cls(size)

    @staticmethod
    def unit():
        return 1


def use():
    b = Box(1)
    b.grow(2)
    b.grow(2, twice=True)
    Box.make(3)
    Box.unit()
    b.grow(1, 2)
    b.grow(by=1, colour=2)
    b.grow(1, by=1)
"#;
    let config = TesseraConfig::default();
    let (_repo, graph) = index(&[("m.py", source)], &config);
    let report = validate(&graph, &config);

    assert_eq!(
        counts(&report.violations),
        expect(&[
            ("duplicate_argument", 1),
            ("too_many_positional", 1),
            ("unknown_keyword", 1),
        ])
    );
    let lines: Vec<u32> = report.violations.iter().filter_map(|v| v.line_number).collect();
    assert_eq!(lines, vec![24, 25, 26]);
}

#[test]
fn repeated_keywords_are_not_counted_twice() {
    let source = r#"
def f(a, b=0):
    return a


def g(a):
    return a


def main():
    f(1, a=2, b=3)
    g(a=1, a=2)
"#;
    let config = TesseraConfig::default();
    let (_repo, graph) = index(&[("m.py", source)], &config);
    let report = validate(&graph, &config);

    assert_eq!(counts(&report.violations), expect(&[("duplicate_argument", 2)]));
    let lines: Vec<u32> = report.violations.iter().filter_map(|v| v.line_number).collect();
    assert_eq!(lines, vec![11, 12]);
}

#[test]
fn variadic_parameters_remove_the_upper_bound() {
    let source = r#"
def log(fmt, *args, **kw):
    return fmt


def main():
    log("a", 1, 2, 3, level=2)
    log()
"#;
    let config = TesseraConfig::default();
    let (_repo, graph) = index(&[("m.py", source)], &config);
    let report = validate(&graph, &config);

    assert_eq!(counts(&report.violations), expect(&[("signature_mismatch", 1)]));
    assert!(report.violations[0].message.contains("[1, unbounded]"));
}

#[test]
fn spread_arguments_are_not_checked() {
    let source = r#"
def pair(a, b):
    return a


def main(items, opts):
    pair(*items)
    pair(**opts)
"#;
    let config = TesseraConfig::default();
    let (_repo, graph) = index(&[("m.py", source)], &config);
    assert!(validate(&graph, &config).is_empty());
}

const DECORATED: &str = r#"
import functools
from unittest import mock


def deco(fn):
    return fn


@deco
def wrapped(a):
    return a


@functools.lru_cache
def cached(a):
    return a


@mock.patch("os.getcwd")
def patched(getcwd, a):
    return a


def caller():
    wrapped()
    cached()
    patched(1)
"#;

#[test]
fn decorator_allow_list_decides_what_is_checked() {
    let config = TesseraConfig::default();
    let (_repo, graph) = index(&[("m.py", DECORATED)], &config);
    let report = validate(&graph, &config);
    assert_eq!(counts(&report.violations), expect(&[("signature_mismatch", 1)]));
    assert!(report.violations[0].message.contains("m.cached"));

    let mut strict = config.clone();
    strict.validation.unknown_decorators = UnknownDecoratorPolicy::Check;
    let report = validate(&graph, &strict);
    assert_eq!(counts(&report.violations), expect(&[("signature_mismatch", 2)]));

    let mut relaxed = config.clone();
    relaxed
        .decorators
        .insert("functools.lru_cache".to_string(), "opaque".to_string());
    assert!(validate(&graph, &relaxed).is_empty());
}

#[test]
fn literal_types_are_checked_against_annotations() {
    let source = r#"
LIMIT: int = "ten"
RATIO: float = 1


def area(w: int, h: float = 1.0) -> float:
    return "wide"


def main():
    area("3")
    area(2, h=3)
"#;
    let config = TesseraConfig::default();
    let (_repo, graph) = index(&[("m.py", source)], &config);
    let report = validate(&graph, &config);

    assert_eq!(
        counts(&report.violations),
        expect(&[
            ("argument_type_mismatch", 1),
            ("assignment_type_mismatch", 1),
            ("return_type_mismatch", 1),
        ])
    );
    assert!(report.is_clean());
    assert_eq!(report.warnings, 3);
    let ret = report.of_type("return_type_mismatch").next().unwrap();
    assert_eq!(ret.line_number, Some(7));

    let mut off = config.clone();
    off.validation.check_literal_types = false;
    assert!(validate(&graph, &off).is_empty());
}

#[test]
fn well_formed_repository_is_clean() {
    let source = r#"
class Shape:
    def __init__(self, name: str):
        self.name = name

    def area(self) -> float:
        return 0.0


class Square(Shape):
    def __init__(self, side: float):
        super().__init__("square")
        self.side = side

    def area(self) -> float:
        return self.side * self.side


def total(shapes: list) -> float:
    result = 0.0
    for s in shapes:
        result += s.area()
    return result


def main():
    return total([Square(2.0), Shape("dot")])
"#;
    let config = TesseraConfig::default();
    let (_repo, graph) = index(&[("shapes.py", source)], &config);
    let report = validate(&graph, &config);
    assert!(report.is_empty(), "{:#?}", report.violations);
    assert_eq!(report.nodes_checked, graph.node_count());
}

#[test]
fn unresolved_calls_are_reported_on_request() {
    let source = r#"
def main():
    missing(1)
"#;
    let config = TesseraConfig::default();
    let (_repo, graph) = index(&[("m.py", source)], &config);
    assert!(validate(&graph, &config).is_empty());

    let mut verbose = config.clone();
    verbose.validation.report_unresolved_calls = true;
    let report = validate(&graph, &verbose);
    assert_eq!(counts(&report.violations), expect(&[("unresolved_call", 1)]));
    assert_eq!(report.violations[0].severity, Severity::Warning);
}

#[test]
fn scoped_validation_only_reports_the_scope() {
    let a = "def f(x):\n    return x\n\n\ndef main():\n    f()\n";
    let b = "def g(x):\n    return x\n\n\ndef main():\n    g()\n";
    let config = TesseraConfig::default();
    let (_repo, graph) = index(&[("a.py", a), ("b.py", b)], &config);
    let validator = Validator::from_config(&config).unwrap();

    let full = validator.validate(&graph, &ValidationScope::Full);
    assert_eq!(full.errors, 2);

    let scope = ValidationScope::nodes(graph.nodes_in_file(Path::new("a.py")));
    let scoped = validator.validate(&graph, &scope);
    assert_eq!(scoped.errors, 1);
    assert_eq!(scoped.violations[0].file_path.as_deref(), Some("a.py"));
}

#[test]
fn snippets_come_from_the_source_file() {
    let source = "def g(a, b):\n    return a\n\n\ndef main():\n    g(1)\n";
    let config = TesseraConfig::default();
    let (repo, graph) = index(&[("m.py", source)], &config);
    let report = Validator::from_config(&config)
        .unwrap()
        .with_sources(repo.path())
        .validate(&graph, &ValidationScope::Full);
    assert_eq!(report.violations[0].code_snippet.as_deref(), Some("g(1)"));
}

#[test]
fn structural_violations() {
    let f = function("m.f");
    let a = param("m.f.a", f.id, 0);
    let c = param("m.f.c", f.id, 2);
    let g = function("m.g");
    let x = param("m.g.x", g.id, 0);
    let y = param("m.g.y", g.id, 0);
    let stray = param("m.h.z", NodeId(7), 0);
    let base = class("m.A");
    let derived = class("m.B");
    let decorator = make(
        "m.f#decorator:0",
        NodeData::Decorator(DecoratorData {
            expression: "cache".to_string(),
            name: "cache".to_string(),
            target: f.id,
            target_kind: NodeKind::Function,
            candidates: vec!["cache".to_string()],
        }),
    );

    let edges = vec![
        edge(&f, &a, EdgeKind::HasParameter),
        edge(&f, &c, EdgeKind::HasParameter),
        edge(&g, &x, EdgeKind::HasParameter),
        edge(&g, &y, EdgeKind::HasParameter),
        edge(&base, &a, EdgeKind::HasParameter),
        edge(&base, &derived, EdgeKind::Inherits),
        edge(&derived, &base, EdgeKind::Inherits),
        edge(&decorator, &f, EdgeKind::Decorates),
    ];
    let graph = graph_of(
        vec![f, a, c, g, x, y, stray, base, derived, decorator],
        edges,
    );

    let found = StructuralLaw.check(&graph, &ValidationScope::Full);
    assert_eq!(
        counts(&found),
        expect(&[
            ("decorator_link_mismatch", 1),
            ("duplicate_parameter_position", 1),
            ("inheritance_cycle", 1),
            ("invalid_edge_endpoint", 1),
            ("multiple_parameter_owners", 1),
            ("orphan_parameter", 1),
            ("parameter_position_gap", 1),
        ])
    );
    let cycle = found
        .iter()
        .find(|v| v.violation_type == "inheritance_cycle")
        .unwrap();
    assert!(cycle.message.contains("m.A -> m.B -> m.A") || cycle.message.contains("m.B -> m.A -> m.B"));
}

#[test]
fn referential_violations() {
    use ResolutionStatus::*;

    let f = function("m.f");
    let g = function("m.g");
    let k = class("m.K");
    let marked_resolved = call_site("m.f#call:a:1", f.id, Resolved);
    let ambiguous = call_site("m.f#call:b:1", f.id, Resolved);
    let to_class = call_site("m.f#call:K:1", f.id, Resolved);
    let orphan = call_site("m.f#call:c:1", f.id, Unresolved);
    let marked_unresolved = call_site("m.f#call:d:1", f.id, Unresolved);
    let mod_a = module("a", false);
    let mod_b = module("b", false);
    let external = module("ext", true);

    let edges = vec![
        edge(&f, &marked_resolved, EdgeKind::HasCallsite),
        edge(&f, &ambiguous, EdgeKind::HasCallsite),
        edge(&f, &to_class, EdgeKind::HasCallsite),
        edge(&f, &marked_unresolved, EdgeKind::HasCallsite),
        edge(&ambiguous, &f, EdgeKind::ResolvesTo),
        edge(&ambiguous, &g, EdgeKind::ResolvesTo),
        edge(&to_class, &k, EdgeKind::ResolvesTo),
        edge(&marked_unresolved, &g, EdgeKind::ResolvesTo),
        edge(&mod_a, &mod_b, EdgeKind::Imports),
        edge(&mod_b, &mod_a, EdgeKind::Imports),
        edge(&mod_a, &external, EdgeKind::Imports),
        edge(&external, &mod_a, EdgeKind::Imports),
    ];
    let graph = graph_of(
        vec![
            f,
            g,
            k,
            marked_resolved,
            ambiguous,
            to_class,
            orphan,
            marked_unresolved,
            mod_a,
            mod_b,
            external,
        ],
        edges,
    );

    let found = ReferentialLaw::new(false).check(&graph, &ValidationScope::Full);
    assert_eq!(
        counts(&found),
        expect(&[
            ("ambiguous_resolution", 1),
            ("dangling_resolution", 1),
            ("import_cycle", 1),
            ("inconsistent_resolution", 2),
            ("orphan_callsite", 1),
        ])
    );
    let cycle = found.iter().find(|v| v.violation_type == "import_cycle").unwrap();
    assert_eq!(cycle.severity, Severity::Warning);
    assert!(!cycle.message.contains("ext"));

    let found = ReferentialLaw::new(true).check(&graph, &ValidationScope::Full);
    assert_eq!(counts(&found).get("unresolved_call"), Some(&1));
}

/// A store view with one edge whose target is gone.
struct WithStrayEdge {
    graph: Graph,
    stray: GraphEdge,
}

impl GraphRead for WithStrayEdge {
    fn node(&self, id: NodeId) -> Option<&GraphNode> {
        GraphRead::node(&self.graph, id)
    }

    fn node_ids(&self) -> Vec<NodeId> {
        self.graph.node_ids()
    }

    fn nodes_of_kind(&self, kind: NodeKind) -> Vec<NodeId> {
        self.graph.nodes_of_kind(kind)
    }

    fn nodes_in_file(&self, file: &Path) -> Vec<NodeId> {
        self.graph.nodes_in_file(file)
    }

    fn edges(&self, node: NodeId, direction: Direction) -> Vec<&GraphEdge> {
        let mut edges = self.graph.edges(node, direction);
        let touches = match direction {
            Direction::Outgoing => self.stray.source == node,
            Direction::Incoming => self.stray.target == node,
        };
        if touches {
            edges.push(&self.stray);
        }
        edges
    }

    fn all_edges(&self) -> Vec<&GraphEdge> {
        let mut edges = self.graph.all_edges();
        edges.push(&self.stray);
        edges
    }

    fn lookup_qualified(&self, qualified_name: &str) -> Vec<NodeId> {
        self.graph.lookup_qualified(qualified_name)
    }

    fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    fn edge_count(&self) -> usize {
        self.graph.edge_count() + 1
    }
}

#[test]
fn edges_to_missing_nodes_are_dangling() {
    let f = function("m.f");
    let stray = GraphEdge::new(f.id, NodeId(42), EdgeKind::References)
        .in_file(Path::new("m.py"))
        .at_line(3);
    let view = WithStrayEdge {
        graph: graph_of(vec![f], Vec::new()),
        stray,
    };

    let found = ReferentialLaw::default().check(&view, &ValidationScope::Full);
    assert_eq!(counts(&found), expect(&[("dangling_edge", 1)]));
    assert_eq!(found[0].entity_id, NodeId(42).to_string());
    assert_eq!(found[0].line_number, Some(3));

    // Structural checks leave missing endpoints alone.
    assert!(StructuralLaw.check(&view, &ValidationScope::Full).is_empty());
}

#[test]
fn errors_only_drops_warnings() {
    let source = "X: int = \"x\"\n\n\ndef g(a):\n    return a\n\n\ndef main():\n    g()\n";
    let config = TesseraConfig::default();
    let (_repo, graph) = index(&[("m.py", source)], &config);
    let report = validate(&graph, &config);
    assert_eq!((report.errors, report.warnings), (1, 1));

    let errors = report.errors_only();
    assert_eq!(counts(&errors.violations), expect(&[("signature_mismatch", 1)]));
    assert_eq!(errors.warnings, 0);
}

#[test]
fn violation_json_shape() {
    let violation = Violation {
        file_path: Some("pkg/core.py".to_string()),
        line_number: Some(12),
        column_number: Some(5),
        ..Violation::error(
            LawKind::Typing,
            "signature_mismatch",
            NodeId(1),
            "call to pkg.util.g supplies 1 argument(s), expected [2, 2]",
        )
    }
    .with_fix("supply b");

    insta::assert_json_snapshot!(violation, @r#"
    {
      "law": "typing",
      "violation_type": "signature_mismatch",
      "severity": "error",
      "entity_id": "n0000000000000001",
      "file_path": "pkg/core.py",
      "line_number": 12,
      "column_number": 5,
      "message": "call to pkg.util.g supplies 1 argument(s), expected [2, 2]",
      "suggested_fix": "supply b"
    }
    "#);
}
