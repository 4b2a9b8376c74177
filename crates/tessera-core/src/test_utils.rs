//! Node builders for unit tests

use std::path::{Path, PathBuf};

use crate::graph::Graph;
use crate::model::*;

fn base(kind: NodeKind, qualified: &str, file: &str, data: NodeData) -> GraphNode {
    GraphNode {
        id: NodeId::new(kind, qualified),
        name: qualified.rsplit('.').next().unwrap_or(qualified).to_string(),
        qualified_name: qualified.to_string(),
        file_path: Some(PathBuf::from(file)),
        location: Location::new(1, 1, 1),
        changed: false,
        data,
    }
}

pub fn module_node(qualified: &str, file: &str) -> GraphNode {
    let mut node = base(
        NodeKind::Module,
        qualified,
        file,
        NodeData::Module(ModuleData {
            dotted_path: qualified.to_string(),
            is_package: false,
            is_external: false,
            imports: Vec::new(),
        }),
    );
    node.id = NodeId::module(qualified);
    node
}

pub fn function_node(qualified: &str, file: &str, signature: &str) -> GraphNode {
    base(
        NodeKind::Function,
        qualified,
        file,
        NodeData::Function(FunctionData {
            signature: signature.to_string(),
            ..FunctionData::default()
        }),
    )
}

pub fn class_node(qualified: &str, file: &str, bases: &[&str]) -> GraphNode {
    base(
        NodeKind::Class,
        qualified,
        file,
        NodeData::Class(ClassData {
            bases: bases
                .iter()
                .map(|b| BaseRef {
                    text: b.to_string(),
                    candidates: vec![b.to_string()],
                })
                .collect(),
            decorators: Vec::new(),
        }),
    )
}

pub fn call_site_node(
    caller: &str,
    callee: &str,
    ordinal: u32,
    file: &str,
    resolved: bool,
) -> GraphNode {
    let key = format!("{}#call:{}:{}", caller, callee, ordinal);
    let mut node = base(
        NodeKind::CallSite,
        &key,
        file,
        NodeData::CallSite(CallSiteData {
            caller: NodeId::new(NodeKind::Function, caller),
            callee: callee.to_string(),
            resolution_status: if resolved {
                ResolutionStatus::Resolved
            } else {
                ResolutionStatus::Unresolved
            },
            arg_count: 0,
            arguments: Vec::new(),
            has_star_args: false,
            has_star_kwargs: false,
            implicit_receiver: false,
            candidates: Vec::new(),
        }),
    );
    node.name = callee.to_string();
    node
}

/// `pkg/mod.py` declaring `Base`, `Child(Base)` and `helper(a, b)`.
pub fn sample_graph() -> Graph {
    let mut graph = Graph::new();
    let file = Path::new("pkg/mod.py");
    let module = module_node("pkg.mod", "pkg/mod.py");
    let base_class = class_node("pkg.mod.Base", "pkg/mod.py", &[]);
    let child = class_node("pkg.mod.Child", "pkg/mod.py", &["pkg.mod.Base"]);
    let helper = function_node("pkg.mod.helper", "pkg/mod.py", "(a, b)");

    let edges = vec![
        GraphEdge::new(module.id, base_class.id, EdgeKind::Declares).in_file(file),
        GraphEdge::new(module.id, child.id, EdgeKind::Declares).in_file(file),
        GraphEdge::new(module.id, helper.id, EdgeKind::Declares).in_file(file),
        GraphEdge::new(child.id, base_class.id, EdgeKind::Inherits).in_file(file),
    ];
    for node in [module, base_class, child, helper] {
        graph.upsert_node(node);
    }
    for edge in edges {
        graph.upsert_edge(edge).unwrap();
    }
    graph
}
