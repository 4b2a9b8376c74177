//! Declarations walk: modules, classes, functions, parameters, variables,
//! decorators and imports

use tree_sitter::Node;

use tessera_core::model::*;
use tessera_core::types::TypeExpr;

use super::annotations::infer_literal;
use super::context::{Extraction, MODULE_SCOPE, Scope, ScopeKind};
use super::module_path::relative_base;

const COMPOUND: &[&str] = &[
    "if_statement",
    "elif_clause",
    "else_clause",
    "for_statement",
    "while_statement",
    "try_statement",
    "except_clause",
    "except_group_clause",
    "finally_clause",
    "with_statement",
    "match_statement",
    "case_clause",
    "block",
];

struct ParamInfo {
    name: String,
    kind: ParameterKind,
    declared: Option<TypeExpr>,
    has_default: bool,
    location: Location,
}

impl<'t> Extraction<'t> {
    /// Record module-level class names before the walk, so annotations can
    /// refer to classes declared further down.
    pub fn prescan_classes(&mut self, block: Node<'t>) {
        let mut cursor = block.walk();
        let children: Vec<Node<'t>> = block.named_children(&mut cursor).collect();
        for child in children {
            match child.kind() {
                "class_definition" => {
                    if let Some(name) = child.child_by_field_name("name") {
                        self.module_classes.insert(self.text(name).to_string());
                    }
                }
                "decorated_definition" => {
                    if let Some(def) = child.child_by_field_name("definition") {
                        if def.kind() == "class_definition" {
                            if let Some(name) = def.child_by_field_name("name") {
                                self.module_classes.insert(self.text(name).to_string());
                            }
                        }
                    }
                }
                kind if COMPOUND.contains(&kind) => self.prescan_classes(child),
                _ => {}
            }
        }
    }

    pub fn declare_block(&mut self, block: Node<'t>, scope: usize) {
        let mut cursor = block.walk();
        let statements: Vec<Node<'t>> = block.named_children(&mut cursor).collect();
        for statement in statements {
            self.declare_statement(statement, scope);
        }
    }

    fn declare_statement(&mut self, node: Node<'t>, scope: usize) {
        match node.kind() {
            "function_definition" => self.declare_function(node, scope, &[]),
            "class_definition" => self.declare_class(node, scope, &[]),
            "decorated_definition" => {
                let mut cursor = node.walk();
                let decorators: Vec<Node<'t>> = node
                    .named_children(&mut cursor)
                    .filter(|c| c.kind() == "decorator")
                    .collect();
                match node.child_by_field_name("definition") {
                    Some(def) if def.kind() == "function_definition" => {
                        self.declare_function(def, scope, &decorators)
                    }
                    Some(def) if def.kind() == "class_definition" => {
                        self.declare_class(def, scope, &decorators)
                    }
                    _ => {}
                }
            }
            "expression_statement" => {
                let mut cursor = node.walk();
                let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
                for child in children {
                    if child.kind() == "assignment" {
                        self.declare_assignment(child, scope);
                    }
                }
            }
            "import_statement" | "import_from_statement" => self.declare_import(node),
            "for_statement" => {
                if self.scopes[scope].kind == ScopeKind::Function {
                    if let Some(left) = node.child_by_field_name("left") {
                        for name in self.target_names(left) {
                            let owner = self.binding_scope(scope, &name);
                            self.ensure_variable(owner, &name, Self::location(left));
                        }
                    }
                }
                self.declare_children(node, scope);
            }
            kind if COMPOUND.contains(&kind) => self.declare_children(node, scope),
            _ => {}
        }
    }

    fn declare_children(&mut self, node: Node<'t>, scope: usize) {
        let mut cursor = node.walk();
        let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
        for child in children {
            if child.kind() == "block" {
                self.declare_block(child, scope);
            } else {
                self.declare_statement(child, scope);
            }
        }
    }

    fn declare_function(&mut self, node: Node<'t>, scope: usize, decorators: &[Node<'t>]) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node).to_string();
        let parent = self.scopes[scope].clone();
        let qualified = format!("{}.{}", parent.qualified, name);
        let key = self.unique_key(NodeKind::Function, format!("{}.{}", parent.key, name));
        let id = NodeId::new(NodeKind::Function, &key);
        let location = Self::location(node);

        let decorator_names: Vec<String> = decorators
            .iter()
            .map(|d| self.decorator_name(*d))
            .collect();
        let is_method = parent.kind == ScopeKind::Class;
        let has = |wanted: &[&str]| decorator_names.iter().any(|d| wanted.contains(&d.as_str()));
        let flags = FunctionFlags {
            is_async: node.child(0).is_some_and(|c| c.kind() == "async"),
            is_generator: false,
            is_method,
            is_staticmethod: is_method && has(&["staticmethod"]),
            is_classmethod: is_method && has(&["classmethod"]),
            is_property: is_method
                && (has(&["property", "functools.cached_property", "cached_property"])
                    || decorator_names.iter().any(|d| d.ends_with(".setter") || d.ends_with(".getter"))),
        };

        let body_scope = self.new_scope(Scope::new(
            ScopeKind::Function,
            qualified.clone(),
            key.clone(),
            id,
            Some(scope),
        ));
        let params = match node.child_by_field_name("parameters") {
            Some(p) => self.parameters(p, body_scope),
            None => Vec::new(),
        };
        let return_type = node
            .child_by_field_name("return_type")
            .and_then(|r| self.annotation(scope, self.text(r)));

        let signature = signature_of(&params, return_type.as_ref());
        self.push_node(GraphNode {
            id,
            name: name.clone(),
            qualified_name: qualified.clone(),
            file_path: Some(self.file.to_path_buf()),
            location,
            changed: false,
            data: NodeData::Function(FunctionData {
                signature,
                return_type: return_type.as_ref().map(|t| t.canonical()),
                flags,
                visibility: Visibility::from_name(&name),
                returns: Vec::new(),
            }),
        });
        self.push_edge(parent.node, id, EdgeKind::Declares, Some(location.line));
        self.scopes[scope].definitions.insert(name, qualified);

        if let Some(t) = &return_type {
            let type_id = self.ensure_type(t);
            self.push_edge(id, type_id, EdgeKind::ReturnsType, Some(location.line));
        }

        for (position, param) in params.iter().enumerate() {
            let param_id = NodeId::new(NodeKind::Parameter, &format!("{}#param:{}", key, param.name));
            self.push_node(GraphNode {
                id: param_id,
                name: param.name.clone(),
                qualified_name: format!("{}.{}", self.scopes[body_scope].qualified, param.name),
                file_path: Some(self.file.to_path_buf()),
                location: param.location,
                changed: false,
                data: NodeData::Parameter(ParameterData {
                    function: id,
                    position: position as u32,
                    kind: param.kind,
                    declared_type: param.declared.as_ref().map(|t| t.canonical()),
                    has_default: param.has_default,
                }),
            });
            self.push_edge(id, param_id, EdgeKind::HasParameter, Some(param.location.line));
            if let Some(t) = &param.declared {
                let type_id = self.ensure_type(t);
                self.push_edge(param_id, type_id, EdgeKind::HasType, Some(param.location.line));
                let classes = Self::instance_classes(t);
                if !classes.is_empty() {
                    self.scopes[body_scope].typed_locals.insert(param.name.clone(), classes);
                }
            }
        }

        {
            let body = &mut self.scopes[body_scope];
            body.params = params.iter().map(|p| p.name.clone()).collect();
            if is_method && !flags.is_staticmethod {
                body.receiver = params
                    .first()
                    .filter(|p| p.kind == ParameterKind::Positional)
                    .map(|p| p.name.clone());
                body.class_scope = Some(scope);
            }
        }

        self.declare_decorators(decorators, id, &key, NodeKind::Function, scope);

        if let Some(body) = node.child_by_field_name("body") {
            self.prescan_bindings(body, body_scope);
            self.declare_block(body, body_scope);
            self.bodies.push((body, body_scope));
        }
    }

    fn parameters(&mut self, node: Node<'t>, scope: usize) -> Vec<ParamInfo> {
        let mut params = Vec::new();
        let mut keyword_only = false;
        let mut cursor = node.walk();
        let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
        for child in children {
            let location = Self::location(child);
            let positional = if keyword_only {
                ParameterKind::KeywordOnly
            } else {
                ParameterKind::Positional
            };
            let (name, kind, type_text, has_default) = match child.kind() {
                "identifier" => (self.text(child).to_string(), positional, None, false),
                "typed_parameter" => {
                    let type_text = child.child_by_field_name("type").map(|t| self.text(t));
                    let Some(inner) = child.named_child(0) else { continue };
                    match inner.kind() {
                        "list_splat_pattern" => {
                            keyword_only = true;
                            (self.splat_name(inner), ParameterKind::VariadicPositional, type_text, false)
                        }
                        "dictionary_splat_pattern" => {
                            (self.splat_name(inner), ParameterKind::VariadicKeyword, type_text, false)
                        }
                        _ => (self.text(inner).to_string(), positional, type_text, false),
                    }
                }
                "default_parameter" => {
                    let Some(name) = child.child_by_field_name("name") else { continue };
                    (self.text(name).to_string(), positional, None, true)
                }
                "typed_default_parameter" => {
                    let Some(name) = child.child_by_field_name("name") else { continue };
                    let type_text = child.child_by_field_name("type").map(|t| self.text(t));
                    (self.text(name).to_string(), positional, type_text, true)
                }
                "list_splat_pattern" => {
                    keyword_only = true;
                    (self.splat_name(child), ParameterKind::VariadicPositional, None, false)
                }
                "dictionary_splat_pattern" => {
                    (self.splat_name(child), ParameterKind::VariadicKeyword, None, false)
                }
                "keyword_separator" => {
                    keyword_only = true;
                    continue;
                }
                _ => continue,
            };
            // Annotations are evaluated in the enclosing scope.
            let outer = self.scopes[scope].parent.unwrap_or(MODULE_SCOPE);
            let declared = type_text.and_then(|t| self.annotation(outer, t));
            params.push(ParamInfo {
                name,
                kind,
                declared,
                has_default,
                location,
            });
        }
        params
    }

    fn splat_name(&self, node: Node<'t>) -> String {
        node.named_child(0)
            .map(|n| self.text(n).to_string())
            .unwrap_or_default()
    }

    /// Collect `global` / `nonlocal` names of a function body, skipping
    /// nested definitions.
    fn prescan_bindings(&mut self, node: Node<'t>, scope: usize) {
        let mut cursor = node.walk();
        let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
        for child in children {
            match child.kind() {
                "global_statement" | "nonlocal_statement" => {
                    let mut inner = child.walk();
                    let names: Vec<String> = child
                        .named_children(&mut inner)
                        .filter(|n| n.kind() == "identifier")
                        .map(|n| self.text(n).to_string())
                        .collect();
                    let s = &mut self.scopes[scope];
                    if child.kind() == "global_statement" {
                        s.globals.extend(names);
                    } else {
                        s.nonlocals.extend(names);
                    }
                }
                "function_definition" | "class_definition" | "decorated_definition" => {}
                _ => self.prescan_bindings(child, scope),
            }
        }
    }

    fn declare_class(&mut self, node: Node<'t>, scope: usize, decorators: &[Node<'t>]) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node).to_string();
        let parent = self.scopes[scope].clone();
        let qualified = format!("{}.{}", parent.qualified, name);
        let key = self.unique_key(NodeKind::Class, format!("{}.{}", parent.key, name));
        let id = NodeId::new(NodeKind::Class, &key);
        let location = Self::location(node);

        let mut bases = Vec::new();
        if let Some(args) = node.child_by_field_name("superclasses") {
            let mut cursor = args.walk();
            let children: Vec<Node<'t>> = args.named_children(&mut cursor).collect();
            for base in children {
                if !matches!(base.kind(), "identifier" | "attribute" | "subscript") {
                    continue;
                }
                // `Generic[T]` inherits from `Generic`.
                let expr = if base.kind() == "subscript" {
                    match base.child_by_field_name("value") {
                        Some(v) => v,
                        None => continue,
                    }
                } else {
                    base
                };
                let text = self.text(expr).to_string();
                let mut candidates = self.resolve_dotted(scope, &text);
                if candidates.is_empty() && !tessera_core::types::is_builtin(&text) && !text.contains('.') {
                    candidates.push(format!("{}.{}", self.module, text));
                }
                bases.push(BaseRef { text, candidates });
            }
        }

        let decorator_names: Vec<String> = decorators
            .iter()
            .map(|d| self.decorator_name(*d))
            .collect();

        self.push_node(GraphNode {
            id,
            name: name.clone(),
            qualified_name: qualified.clone(),
            file_path: Some(self.file.to_path_buf()),
            location,
            changed: false,
            data: NodeData::Class(ClassData {
                bases: bases.clone(),
                decorators: decorator_names,
            }),
        });
        self.push_edge(parent.node, id, EdgeKind::Declares, Some(location.line));
        self.scopes[scope].definitions.insert(name, qualified.clone());

        // Every class is at least an `object`; base edges come from linking.
        let class_type = self.ensure_type(&TypeExpr::Named(qualified.clone()));
        let object = self.ensure_type(&TypeExpr::Named("object".to_string()));
        self.push_edge(class_type, object, EdgeKind::IsSubtypeOf, Some(location.line));

        self.declare_decorators(decorators, id, &key, NodeKind::Class, scope);

        let mut class_scope = Scope::new(ScopeKind::Class, qualified, key, id, Some(scope));
        class_scope.bases = bases.into_iter().map(|b| b.candidates).collect();
        let class_scope = self.new_scope(class_scope);
        if let Some(body) = node.child_by_field_name("body") {
            self.declare_block(body, class_scope);
        }
    }

    /// Callable part of a decorator, qualified through imports where possible.
    fn decorator_name(&self, decorator: Node<'t>) -> String {
        let Some(expr) = decorator.named_child(0) else {
            return String::new();
        };
        let callable = if expr.kind() == "call" {
            expr.child_by_field_name("function").unwrap_or(expr)
        } else {
            expr
        };
        let text = self.text(callable).to_string();
        self.resolve_dotted(MODULE_SCOPE, &text)
            .into_iter()
            .next()
            .unwrap_or(text)
    }

    fn declare_decorators(
        &mut self,
        decorators: &[Node<'t>],
        target: NodeId,
        target_key: &str,
        target_kind: NodeKind,
        scope: usize,
    ) {
        for (index, decorator) in decorators.iter().enumerate() {
            let Some(expr) = decorator.named_child(0) else {
                continue;
            };
            let callable = if expr.kind() == "call" {
                expr.child_by_field_name("function").unwrap_or(expr)
            } else {
                expr
            };
            let name = self.text(callable).to_string();
            let mut candidates = self.resolve_dotted(scope, &name);
            if !candidates.contains(&name) {
                candidates.push(name.clone());
            }
            let location = Self::location(*decorator);
            let id = NodeId::new(
                NodeKind::Decorator,
                &format!("{}#decorator:{}", target_key, index),
            );
            self.push_node(GraphNode {
                id,
                name: name.clone(),
                qualified_name: format!("{}#decorator:{}", target_key, index),
                file_path: Some(self.file.to_path_buf()),
                location,
                changed: false,
                data: NodeData::Decorator(DecoratorData {
                    expression: self.text(expr).to_string(),
                    name,
                    target,
                    target_kind,
                    candidates,
                }),
            });
            self.push_edge(target, id, EdgeKind::HasDecorator, Some(location.line));
            self.push_edge(id, target, EdgeKind::Decorates, Some(location.line));
        }
    }

    fn declare_assignment(&mut self, node: Node<'t>, scope: usize) {
        let Some(left) = node.child_by_field_name("left") else {
            return;
        };
        let right = node.child_by_field_name("right");
        let annotation = node
            .child_by_field_name("type")
            .and_then(|t| self.annotation(scope, self.text(t)));
        let location = Self::location(left);
        let kind = self.scopes[scope].kind;

        // `self.x = ...` inside a method declares a class attribute.
        if left.kind() == "attribute" {
            if let (Some(object), Some(attr)) = (
                left.child_by_field_name("object"),
                left.child_by_field_name("attribute"),
            ) {
                if object.kind() == "identifier" {
                    let receiver = self.text(object);
                    if let Some(class_scope) = self.receiver_class(scope, receiver) {
                        let attr = self.text(attr).to_string();
                        self.ensure_variable(class_scope, &attr, location);
                    }
                }
            }
            return;
        }

        let names = self.target_names(left);
        for name in &names {
            let owner = self.binding_scope(scope, name);
            let id = self.ensure_variable(owner, name, location);

            if names.len() == 1 {
                if let Some(t) = &annotation {
                    let type_id = self.ensure_type(t);
                    if let Some(NodeData::Variable(v)) = self.node_mut(id).map(|n| &mut n.data) {
                        v.declared_type = Some(t.canonical());
                    }
                    self.push_edge(id, type_id, EdgeKind::HasType, Some(location.line));
                    if kind == ScopeKind::Function {
                        let classes = Self::instance_classes(t);
                        if !classes.is_empty() {
                            self.scopes[scope].typed_locals.insert(name.clone(), classes);
                        }
                    }
                }
            }

            // Function-level sites are recorded by the expression walk.
            if kind != ScopeKind::Function {
                if let Some(value) = right {
                    let inferred = if names.len() == 1 {
                        infer_literal(value, self.source)
                    } else {
                        None
                    };
                    let site = AssignmentSite {
                        line: location.line,
                        column: location.column,
                        inferred_type: inferred,
                    };
                    if let Some(NodeData::Variable(v)) = self.node_mut(id).map(|n| &mut n.data) {
                        v.assignments.push(site);
                    }
                }
            }
        }

        // Chained assignment: `a = b = 1`.
        if let Some(value) = right {
            if value.kind() == "assignment" {
                self.declare_assignment(value, scope);
            }
        }
    }

    /// Plain names bound by an assignment target.
    pub fn target_names(&self, target: Node<'t>) -> Vec<String> {
        match target.kind() {
            "identifier" => vec![self.text(target).to_string()],
            "pattern_list" | "tuple_pattern" | "list_pattern" | "tuple" | "list"
            | "parenthesized_expression" => {
                let mut cursor = target.walk();
                let children: Vec<Node<'t>> = target.named_children(&mut cursor).collect();
                children.into_iter().flat_map(|c| self.target_names(c)).collect()
            }
            "list_splat_pattern" => target
                .named_child(0)
                .map(|n| self.target_names(n))
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    fn declare_import(&mut self, node: Node<'t>) {
        let line = Self::line(node);
        let module_id = self.module_id();
        let mut cursor = node.walk();

        if node.kind() == "import_statement" {
            let names: Vec<Node<'t>> = node.children_by_field_name("name", &mut cursor).collect();
            for name in names {
                let (target, alias) = match name.kind() {
                    "aliased_import" => {
                        let Some(dotted) = name.child_by_field_name("name") else { continue };
                        let target = self.text(dotted).to_string();
                        let alias = name
                            .child_by_field_name("alias")
                            .map(|a| self.text(a).to_string())
                            .unwrap_or_else(|| target.clone());
                        (target.clone(), ImportBinding { alias, target, line })
                    }
                    _ => {
                        let target = self.text(name).to_string();
                        let head = target.split('.').next().unwrap_or(&target).to_string();
                        (
                            target,
                            ImportBinding {
                                alias: head.clone(),
                                target: head,
                                line,
                            },
                        )
                    }
                };
                let target_id = self.ensure_placeholder(&target);
                if target_id != module_id {
                    self.push_edge(module_id, target_id, EdgeKind::Imports, Some(line));
                }
                self.imports.push(alias);
            }
            return;
        }

        let Some(module_name) = node.child_by_field_name("module_name") else {
            return;
        };
        let base = if module_name.kind() == "relative_import" {
            let text = self.text(module_name);
            let level = text.chars().take_while(|c| *c == '.').count();
            let rest = text.trim_start_matches('.');
            match relative_base(&self.module, self.is_package, level) {
                Some(pkg) if pkg.is_empty() => rest.to_string(),
                Some(pkg) if rest.is_empty() => pkg,
                Some(pkg) => format!("{}.{}", pkg, rest),
                None => return,
            }
        } else {
            self.text(module_name).to_string()
        };
        if base.is_empty() {
            return;
        }

        let base_id = self.ensure_placeholder(&base);
        if base_id != module_id {
            self.push_edge(module_id, base_id, EdgeKind::Imports, Some(line));
        }

        let mut has_wildcard = false;
        let mut inner = node.walk();
        for child in node.named_children(&mut inner) {
            if child.kind() == "wildcard_import" {
                has_wildcard = true;
            }
        }
        if has_wildcard {
            self.imports.push(ImportBinding {
                alias: "*".to_string(),
                target: base,
                line,
            });
            return;
        }

        let names: Vec<Node<'t>> = node.children_by_field_name("name", &mut cursor).collect();
        for name in names {
            let (imported, alias) = match name.kind() {
                "aliased_import" => {
                    let Some(dotted) = name.child_by_field_name("name") else { continue };
                    let imported = self.text(dotted).to_string();
                    let alias = name
                        .child_by_field_name("alias")
                        .map(|a| self.text(a).to_string())
                        .unwrap_or_else(|| imported.clone());
                    (imported, alias)
                }
                _ => {
                    let imported = self.text(name).to_string();
                    (imported.clone(), imported)
                }
            };
            self.imports.push(ImportBinding {
                alias,
                target: format!("{}.{}", base, imported),
                line,
            });
        }
    }
}

/// `(a, b=…, *args, k, **kw) -> T`
fn signature_of(params: &[ParamInfo], return_type: Option<&TypeExpr>) -> String {
    let mut parts = Vec::new();
    let mut saw_star = false;
    for param in params {
        match param.kind {
            ParameterKind::VariadicPositional => {
                saw_star = true;
                parts.push(format!("*{}", param.name));
            }
            ParameterKind::VariadicKeyword => parts.push(format!("**{}", param.name)),
            ParameterKind::KeywordOnly if !saw_star => {
                saw_star = true;
                parts.push("*".to_string());
                parts.push(param_text(param));
            }
            _ => parts.push(param_text(param)),
        }
    }
    let mut signature = format!("({})", parts.join(", "));
    if let Some(t) = return_type {
        signature.push_str(" -> ");
        signature.push_str(&t.canonical());
    }
    signature
}

fn param_text(param: &ParamInfo) -> String {
    if param.has_default {
        format!("{}=…", param.name)
    } else {
        param.name.clone()
    }
}
