//! Per-file extraction state: emitted nodes and edges plus the lexical scope tree

use std::collections::{HashMap, HashSet};
use std::path::Path;

use tree_sitter::Node;

use tessera_core::model::*;
use tessera_core::types::{TypeExpr, type_node};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScopeKind {
    Module,
    Class,
    Function,
}

#[derive(Debug, Clone)]
pub(crate) struct Scope {
    pub kind: ScopeKind,
    pub qualified: String,
    /// Id key prefix for children; differs from `qualified` for redefinitions.
    pub key: String,
    pub node: NodeId,
    pub parent: Option<usize>,
    /// Nested `def`/`class` names -> qualified name.
    pub definitions: HashMap<String, String>,
    pub variables: HashMap<String, NodeId>,
    pub params: HashSet<String>,
    pub globals: HashSet<String>,
    pub nonlocals: HashSet<String>,
    /// Local names with a known class, for `x.method()` resolution.
    pub typed_locals: HashMap<String, Vec<String>>,
    /// First parameter of a bound method (`self` / `cls`).
    pub receiver: Option<String>,
    /// Enclosing class of a method.
    pub class_scope: Option<usize>,
    /// Base candidates of a class.
    pub bases: Vec<Vec<String>>,
    pub call_ordinals: HashMap<String, u32>,
}

impl Scope {
    pub fn new(kind: ScopeKind, qualified: String, key: String, node: NodeId, parent: Option<usize>) -> Self {
        Scope {
            kind,
            qualified,
            key,
            node,
            parent,
            definitions: HashMap::new(),
            variables: HashMap::new(),
            params: HashSet::new(),
            globals: HashSet::new(),
            nonlocals: HashSet::new(),
            typed_locals: HashMap::new(),
            receiver: None,
            class_scope: None,
            bases: Vec::new(),
            call_ordinals: HashMap::new(),
        }
    }
}

pub(crate) const MODULE_SCOPE: usize = 0;

pub(crate) struct Extraction<'t> {
    pub source: &'t [u8],
    pub file: &'t Path,
    pub module: String,
    pub is_package: bool,
    pub nodes: Vec<GraphNode>,
    slots: HashMap<NodeId, usize>,
    pub edges: Vec<GraphEdge>,
    edge_keys: HashSet<EdgeKey>,
    pub scopes: Vec<Scope>,
    pub imports: Vec<ImportBinding>,
    /// Names of classes declared anywhere at module level, for forward
    /// references in annotations.
    pub module_classes: HashSet<String>,
    /// Function bodies queued for the expression walk.
    pub bodies: Vec<(Node<'t>, usize)>,
    keys_seen: HashMap<String, u32>,
}

impl<'t> Extraction<'t> {
    pub fn new(source: &'t [u8], file: &'t Path, module: String, is_package: bool, root: Node<'t>) -> Self {
        let module_id = NodeId::module(&module);
        let name = module.rsplit('.').next().unwrap_or(&module).to_string();
        let module_node = GraphNode {
            id: module_id,
            name,
            qualified_name: module.clone(),
            file_path: Some(file.to_path_buf()),
            location: Location::new(1, 1, root.end_position().row as u32 + 1),
            changed: false,
            data: NodeData::Module(ModuleData {
                dotted_path: module.clone(),
                is_package,
                is_external: false,
                imports: Vec::new(),
            }),
        };
        let mut extraction = Extraction {
            source,
            file,
            module: module.clone(),
            is_package,
            nodes: Vec::new(),
            slots: HashMap::new(),
            edges: Vec::new(),
            edge_keys: HashSet::new(),
            scopes: vec![Scope::new(ScopeKind::Module, module.clone(), module, module_id, None)],
            imports: Vec::new(),
            module_classes: HashSet::new(),
            bodies: Vec::new(),
            keys_seen: HashMap::new(),
        };
        extraction.push_node(module_node);
        extraction
    }

    pub fn text(&self, node: Node<'_>) -> &'t str {
        node.utf8_text(self.source).unwrap_or_default()
    }

    pub fn location(node: Node<'_>) -> Location {
        Location::new(
            node.start_position().row as u32 + 1,
            node.start_position().column as u32 + 1,
            node.end_position().row as u32 + 1,
        )
    }

    pub fn line(node: Node<'_>) -> u32 {
        node.start_position().row as u32 + 1
    }

    pub fn module_id(&self) -> NodeId {
        self.scopes[MODULE_SCOPE].node
    }

    /// Add a node unless one with the same id was already emitted.
    pub fn push_node(&mut self, node: GraphNode) -> NodeId {
        let id = node.id;
        if !self.slots.contains_key(&id) {
            self.slots.insert(id, self.nodes.len());
            self.nodes.push(node);
        }
        id
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut GraphNode> {
        let slot = *self.slots.get(&id)?;
        self.nodes.get_mut(slot)
    }

    pub fn has_node(&self, id: NodeId) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn push_edge(&mut self, source: NodeId, target: NodeId, kind: EdgeKind, line: Option<u32>) {
        let mut edge = GraphEdge::new(source, target, kind).in_file(self.file);
        edge.line = line;
        if self.edge_keys.insert(edge.key()) {
            self.edges.push(edge);
        }
    }

    /// Unique id key for a definition; redefinitions get `#2`, `#3`, ...
    pub fn unique_key(&mut self, kind: NodeKind, key: String) -> String {
        let count = self.keys_seen.entry(format!("{}:{}", kind, key)).or_insert(0);
        *count += 1;
        if *count == 1 {
            key
        } else {
            format!("{}#{}", key, count)
        }
    }

    pub fn new_scope(&mut self, scope: Scope) -> usize {
        self.scopes.push(scope);
        self.scopes.len() - 1
    }

    /// Shared type node for `expr`, emitted once per file.
    pub fn ensure_type(&mut self, expr: &TypeExpr) -> NodeId {
        let node = type_node(expr);
        self.push_node(node)
    }

    pub fn ensure_placeholder(&mut self, dotted: &str) -> NodeId {
        let id = NodeId::module(dotted);
        if dotted != self.module && !self.has_node(id) {
            self.push_node(GraphNode::placeholder_module(dotted));
        }
        id
    }

    /// Variable `name` in scope `scope`, declared there on first use.
    pub fn ensure_variable(&mut self, scope: usize, name: &str, location: Location) -> NodeId {
        if let Some(id) = self.scopes[scope].variables.get(name) {
            return *id;
        }
        let owner = &self.scopes[scope];
        let qualified = format!("{}.{}", owner.qualified, name);
        let key = format!("{}.{}", owner.key, name);
        let (owner_node, kind) = (owner.node, owner.kind);
        let id = NodeId::new(NodeKind::Variable, &key);
        let variable_scope = match kind {
            ScopeKind::Module => VariableScope::Module,
            ScopeKind::Class => VariableScope::Class,
            ScopeKind::Function => VariableScope::Function,
        };
        self.push_node(GraphNode {
            id,
            name: name.to_string(),
            qualified_name: qualified,
            file_path: Some(self.file.to_path_buf()),
            location,
            changed: false,
            data: NodeData::Variable(VariableData {
                scope: variable_scope,
                declared_type: None,
                assignments: Vec::new(),
            }),
        });
        self.push_edge(owner_node, id, EdgeKind::Declares, Some(location.line));
        self.scopes[scope].variables.insert(name.to_string(), id);
        id
    }

    /// Nearest enclosing function scope (or the module) of `scope`.
    fn enclosing_function(&self, scope: usize) -> Option<usize> {
        let mut current = self.scopes[scope].parent;
        while let Some(i) = current {
            if self.scopes[i].kind == ScopeKind::Function {
                return Some(i);
            }
            current = self.scopes[i].parent;
        }
        None
    }

    /// Scope that owns binding `name` when assigned inside `scope`, honoring
    /// `global` and `nonlocal`.
    pub fn binding_scope(&self, scope: usize, name: &str) -> usize {
        let s = &self.scopes[scope];
        if s.kind != ScopeKind::Function {
            return scope;
        }
        if s.globals.contains(name) {
            return MODULE_SCOPE;
        }
        if s.nonlocals.contains(name) {
            let mut current = self.enclosing_function(scope);
            while let Some(i) = current {
                if self.scopes[i].variables.contains_key(name) || self.scopes[i].params.contains(name) {
                    return i;
                }
                current = self.enclosing_function(i);
            }
            return self.enclosing_function(scope).unwrap_or(MODULE_SCOPE);
        }
        scope
    }

    /// Variable a read of `name` in `scope` refers to, if it is one we track.
    /// Class bodies do not enclose nested scopes.
    pub fn lookup_variable(&self, scope: usize, name: &str) -> Option<NodeId> {
        let first = self.binding_scope(scope, name);
        let mut current = Some(first);
        while let Some(i) = current {
            let s = &self.scopes[i];
            if i == first || s.kind != ScopeKind::Class {
                if let Some(id) = s.variables.get(name) {
                    return Some(*id);
                }
                if s.params.contains(name) || s.definitions.contains_key(name) {
                    return None;
                }
            }
            current = s.parent;
        }
        None
    }

    /// Qualified names `name` may denote in `scope`: the nearest local
    /// definition, else a module-level definition or import, else wildcard
    /// imports. Empty for builtins and shadowed names.
    pub fn resolve_name(&self, scope: usize, name: &str) -> Vec<String> {
        let mut current = Some(scope);
        while let Some(i) = current {
            let s = &self.scopes[i];
            if i == scope || s.kind != ScopeKind::Class {
                if let Some(qualified) = s.definitions.get(name) {
                    return vec![qualified.clone()];
                }
                if s.kind == ScopeKind::Module {
                    if let Some(binding) = self.imports.iter().rev().find(|b| b.alias == name) {
                        return vec![binding.target.clone()];
                    }
                    if s.variables.contains_key(name) {
                        return Vec::new();
                    }
                } else if s.variables.contains_key(name) || s.params.contains(name) {
                    return Vec::new();
                }
            }
            current = s.parent;
        }
        if self.module_classes.contains(name) {
            return vec![format!("{}.{}", self.module, name)];
        }
        self.imports
            .iter()
            .filter(|b| b.alias == "*")
            .map(|b| format!("{}.{}", b.target, name))
            .collect()
    }

    /// Qualified names a dotted expression such as `mod.Class.attr` may denote.
    pub fn resolve_dotted(&self, scope: usize, dotted: &str) -> Vec<String> {
        let (head, rest) = match dotted.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (dotted, None),
        };
        self.resolve_name(scope, head)
            .into_iter()
            .map(|prefix| match rest {
                Some(rest) => format!("{}.{}", prefix, rest),
                None => prefix,
            })
            .collect()
    }

    /// Method scope providing receiver `name`, searching outward so closures
    /// inside a method still see `self`.
    pub fn receiver_class(&self, scope: usize, name: &str) -> Option<usize> {
        let mut current = Some(scope);
        while let Some(i) = current {
            let s = &self.scopes[i];
            if s.kind == ScopeKind::Function {
                if s.receiver.as_deref() == Some(name) {
                    return s.class_scope;
                }
                if s.params.contains(name) || s.variables.contains_key(name) {
                    return None;
                }
            }
            current = s.parent;
        }
        None
    }

    /// Class candidates recorded for local `name`.
    pub fn local_type(&self, scope: usize, name: &str) -> Option<&Vec<String>> {
        let mut current = Some(scope);
        while let Some(i) = current {
            let s = &self.scopes[i];
            if s.kind == ScopeKind::Function {
                if let Some(types) = s.typed_locals.get(name) {
                    return Some(types);
                }
            }
            current = s.parent;
        }
        None
    }

    /// First node, depth-first, that is a syntax error or a missing token.
    pub fn first_error(root: Node<'_>) -> Option<Node<'_>> {
        if root.is_error() || root.is_missing() {
            return Some(root);
        }
        if !root.has_error() {
            return None;
        }
        let mut cursor = root.walk();
        let children: Vec<Node<'_>> = root.children(&mut cursor).collect();
        children.into_iter().find_map(Self::first_error)
    }

    pub fn finish(mut self) -> (Vec<GraphNode>, Vec<GraphEdge>) {
        let imports = std::mem::take(&mut self.imports);
        let module_id = self.module_id();
        if let Some(NodeData::Module(module)) = self.node_mut(module_id).map(|n| &mut n.data) {
            module.imports = imports;
        }
        (self.nodes, self.edges)
    }
}
