//! Expression walk over function bodies: call sites, variable reads and
//! writes, return sites

use tree_sitter::Node;

use tessera_core::model::*;

use super::annotations::infer_literal;
use super::context::{Extraction, ScopeKind};

/// Callee text with whitespace removed, so `a .b` and `a.b` share an id.
fn compact(text: &str) -> String {
    text.split_whitespace().collect()
}

fn is_dotted_name(text: &str) -> bool {
    !text.is_empty()
        && text.split('.').all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '_')
        })
}

impl<'t> Extraction<'t> {
    /// Walk every queued function body. Runs after the declarations walk so
    /// every binding in the file is known.
    pub fn walk_bodies(&mut self) {
        let bodies = std::mem::take(&mut self.bodies);
        for (body, scope) in bodies {
            self.walk(body, scope);
        }
    }

    fn walk_children(&mut self, node: Node<'t>, scope: usize) {
        let mut cursor = node.walk();
        let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
        for child in children {
            self.walk(child, scope);
        }
    }

    fn walk(&mut self, node: Node<'t>, scope: usize) {
        match node.kind() {
            // Nested definitions have bodies of their own.
            "function_definition" | "class_definition" | "decorated_definition" => {}
            "global_statement" | "nonlocal_statement" | "import_statement"
            | "import_from_statement" | "comment" => {}
            "call" => {
                self.record_call(node, scope);
                if let Some(function) = node.child_by_field_name("function") {
                    self.walk(function, scope);
                }
                if let Some(args) = node.child_by_field_name("arguments") {
                    self.walk_children(args, scope);
                }
            }
            "keyword_argument" => {
                if let Some(value) = node.child_by_field_name("value") {
                    self.walk(value, scope);
                }
            }
            "assignment" => self.walk_assignment(node, scope),
            "augmented_assignment" => {
                if let Some(right) = node.child_by_field_name("right") {
                    self.walk(right, scope);
                }
                if let Some(left) = node.child_by_field_name("left") {
                    self.walk(left, scope);
                    self.write_target(left, scope, None);
                }
            }
            "for_statement" => {
                if let Some(right) = node.child_by_field_name("right") {
                    self.walk(right, scope);
                }
                if let Some(left) = node.child_by_field_name("left") {
                    self.write_target(left, scope, None);
                }
                if let Some(body) = node.child_by_field_name("body") {
                    self.walk(body, scope);
                }
                if let Some(alternative) = node.child_by_field_name("alternative") {
                    self.walk(alternative, scope);
                }
            }
            "for_in_clause" => {
                if let Some(right) = node.child_by_field_name("right") {
                    self.walk(right, scope);
                }
            }
            "return_statement" => {
                let value = node.named_child(0);
                let inferred = match value {
                    Some(v) => infer_literal(v, self.source),
                    None => Some("None".to_string()),
                };
                let location = Self::location(node);
                let function = self.scopes[scope].node;
                if let Some(NodeData::Function(f)) = self.node_mut(function).map(|n| &mut n.data) {
                    f.returns.push(ReturnSite {
                        line: location.line,
                        column: location.column,
                        inferred_type: inferred,
                    });
                }
                if let Some(v) = value {
                    self.walk(v, scope);
                }
            }
            "yield" => {
                let function = self.scopes[scope].node;
                if let Some(NodeData::Function(f)) = self.node_mut(function).map(|n| &mut n.data) {
                    f.flags.is_generator = true;
                }
                self.walk_children(node, scope);
            }
            "lambda" => {
                if let Some(body) = node.child_by_field_name("body") {
                    self.walk(body, scope);
                }
            }
            "identifier" => self.read_name(node, scope),
            "attribute" => {
                if let Some(object) = node.child_by_field_name("object") {
                    self.walk(object, scope);
                    if let Some(variable) = self.receiver_attribute(node, scope) {
                        let function = self.scopes[scope].node;
                        self.push_edge(function, variable, EdgeKind::ReadsFrom, Some(Self::line(node)));
                    }
                }
            }
            _ => self.walk_children(node, scope),
        }
    }

    fn read_name(&mut self, node: Node<'t>, scope: usize) {
        let name = self.text(node);
        if let Some(variable) = self.lookup_variable(scope, name) {
            let function = self.scopes[scope].node;
            self.push_edge(function, variable, EdgeKind::ReadsFrom, Some(Self::line(node)));
        }
    }

    /// Class variable behind `self.attr`, if the attribute was ever assigned.
    fn receiver_attribute(&self, node: Node<'t>, scope: usize) -> Option<NodeId> {
        let object = node.child_by_field_name("object")?;
        let attribute = node.child_by_field_name("attribute")?;
        if object.kind() != "identifier" {
            return None;
        }
        let class_scope = self.receiver_class(scope, self.text(object))?;
        self.scopes[class_scope]
            .variables
            .get(self.text(attribute))
            .copied()
    }

    fn walk_assignment(&mut self, node: Node<'t>, scope: usize) {
        let right = node.child_by_field_name("right");
        if let Some(value) = right {
            if value.kind() == "assignment" {
                self.walk_assignment(value, scope);
            } else {
                self.walk(value, scope);
            }
        }
        let Some(left) = node.child_by_field_name("left") else {
            return;
        };
        let value = right.filter(|v| v.kind() != "assignment");
        let single = left.kind() == "identifier" || left.kind() == "attribute";
        let inferred = value.filter(|_| single).and_then(|v| infer_literal(v, self.source));
        self.write_target(left, scope, Some(inferred));

        // `x = Foo()` lets `x.method()` resolve through `Foo`.
        if left.kind() == "identifier" {
            if let Some(call) = value.filter(|v| v.kind() == "call") {
                if let Some(function) = call.child_by_field_name("function") {
                    let callee = compact(self.text(function));
                    if is_dotted_name(&callee) {
                        let classes = self.resolve_dotted(scope, &callee);
                        let name = self.text(left).to_string();
                        if !classes.is_empty() && self.scopes[scope].kind == ScopeKind::Function {
                            self.scopes[scope].typed_locals.entry(name).or_insert(classes);
                        }
                    }
                }
            }
        }
    }

    /// Record writes to every name bound by `target`. `site` carries the
    /// inferred type when an assignment site should be recorded.
    fn write_target(&mut self, target: Node<'t>, scope: usize, site: Option<Option<String>>) {
        let function = self.scopes[scope].node;
        let location = Self::location(target);
        match target.kind() {
            "attribute" => {
                if let Some(object) = target.child_by_field_name("object") {
                    self.walk(object, scope);
                }
                if let Some(variable) = self.receiver_attribute(target, scope) {
                    self.push_edge(function, variable, EdgeKind::AssignsTo, Some(location.line));
                    self.record_site(variable, location, site);
                }
            }
            "subscript" => self.walk(target, scope),
            _ => {
                for name in self.target_names(target) {
                    let owner = self.binding_scope(scope, &name);
                    let variable = self.ensure_variable(owner, &name, location);
                    self.push_edge(function, variable, EdgeKind::AssignsTo, Some(location.line));
                    self.record_site(variable, location, site.clone());
                }
            }
        }
    }

    fn record_site(&mut self, variable: NodeId, location: Location, site: Option<Option<String>>) {
        let Some(inferred_type) = site else {
            return;
        };
        if let Some(NodeData::Variable(v)) = self.node_mut(variable).map(|n| &mut n.data) {
            v.assignments.push(AssignmentSite {
                line: location.line,
                column: location.column,
                inferred_type,
            });
        }
    }

    fn record_call(&mut self, call: Node<'t>, scope: usize) {
        let Some(function) = call.child_by_field_name("function") else {
            return;
        };
        let callee = compact(self.text(function));
        if callee.is_empty() {
            return;
        }

        let ordinal = {
            let count = self.scopes[scope]
                .call_ordinals
                .entry(callee.clone())
                .or_insert(0);
            *count += 1;
            *count
        };
        let owner = &self.scopes[scope];
        let key = format!("{}#call:{}:{}", owner.key, callee, ordinal);
        let qualified = format!("{}#call:{}:{}", owner.qualified, callee, ordinal);
        let caller = owner.node;

        let mut arg_count = 0;
        let mut arguments = Vec::new();
        let mut has_star_args = false;
        let mut has_star_kwargs = false;
        if let Some(args) = call.child_by_field_name("arguments") {
            if args.kind() == "generator_expression" {
                arg_count = 1;
                arguments.push(Argument {
                    keyword: None,
                    inferred_type: None,
                });
            } else {
                let mut cursor = args.walk();
                let children: Vec<Node<'t>> = args.named_children(&mut cursor).collect();
                for arg in children {
                    match arg.kind() {
                        "keyword_argument" => {
                            let keyword = arg
                                .child_by_field_name("name")
                                .map(|n| self.text(n).to_string());
                            let inferred_type = arg
                                .child_by_field_name("value")
                                .and_then(|v| infer_literal(v, self.source));
                            arguments.push(Argument {
                                keyword,
                                inferred_type,
                            });
                        }
                        "list_splat" => has_star_args = true,
                        "dictionary_splat" => has_star_kwargs = true,
                        "comment" => {}
                        _ => {
                            arg_count += 1;
                            arguments.push(Argument {
                                keyword: None,
                                inferred_type: infer_literal(arg, self.source),
                            });
                        }
                    }
                }
            }
        }

        let candidates = self.call_candidates(function, scope);
        let location = Self::location(call);
        let id = NodeId::new(NodeKind::CallSite, &key);
        self.push_node(GraphNode {
            id,
            name: callee.clone(),
            qualified_name: qualified,
            file_path: Some(self.file.to_path_buf()),
            location,
            changed: false,
            data: NodeData::CallSite(CallSiteData {
                caller,
                callee,
                resolution_status: ResolutionStatus::Unresolved,
                arg_count,
                arguments,
                has_star_args,
                has_star_kwargs,
                implicit_receiver: false,
                candidates,
            }),
        });
        self.push_edge(caller, id, EdgeKind::HasCallsite, Some(location.line));
    }

    /// Resolution candidates for the callee expression, most specific first.
    fn call_candidates(&self, function: Node<'t>, scope: usize) -> Vec<Candidate> {
        match function.kind() {
            "identifier" => self
                .resolve_name(scope, self.text(function))
                .into_iter()
                .map(Candidate::Qualified)
                .collect(),
            "attribute" => {
                let (Some(object), Some(attribute)) = (
                    function.child_by_field_name("object"),
                    function.child_by_field_name("attribute"),
                ) else {
                    return Vec::new();
                };
                let member = self.text(attribute).to_string();

                if object.kind() == "call" && self.is_super_call(object) {
                    return self
                        .enclosing_class_bases(scope)
                        .into_iter()
                        .map(|class| Candidate::Member {
                            class,
                            member: member.clone(),
                            bound: true,
                        })
                        .collect();
                }

                if object.kind() == "identifier" {
                    let name = self.text(object);
                    if let Some(class_scope) = self.receiver_class(scope, name) {
                        return vec![Candidate::Member {
                            class: self.scopes[class_scope].qualified.clone(),
                            member,
                            bound: true,
                        }];
                    }
                    if let Some(classes) = self.local_type(scope, name) {
                        return classes
                            .iter()
                            .map(|class| Candidate::Member {
                                class: class.clone(),
                                member: member.clone(),
                                bound: true,
                            })
                            .collect();
                    }
                }

                let dotted = compact(self.text(function));
                if !is_dotted_name(&dotted) {
                    return Vec::new();
                }
                let Some((head, rest)) = dotted.split_once('.') else {
                    return Vec::new();
                };
                let mut candidates = Vec::new();
                for prefix in self.resolve_name(scope, head) {
                    candidates.push(Candidate::Qualified(format!("{}.{}", prefix, rest)));
                    let class = match rest.rsplit_once('.') {
                        Some((middle, _)) => format!("{}.{}", prefix, middle),
                        None => prefix,
                    };
                    candidates.push(Candidate::Member {
                        class,
                        member: member.clone(),
                        bound: false,
                    });
                }
                candidates
            }
            _ => Vec::new(),
        }
    }

    fn is_super_call(&self, call: Node<'t>) -> bool {
        call.child_by_field_name("function")
            .is_some_and(|f| f.kind() == "identifier" && self.text(f) == "super")
    }

    /// Base candidates of the class whose method encloses `scope`.
    fn enclosing_class_bases(&self, scope: usize) -> Vec<String> {
        let mut current = Some(scope);
        while let Some(i) = current {
            let s = &self.scopes[i];
            if let Some(class_scope) = s.class_scope {
                return self.scopes[class_scope]
                    .bases
                    .iter()
                    .flatten()
                    .cloned()
                    .collect();
            }
            current = s.parent;
        }
        Vec::new()
    }
}
