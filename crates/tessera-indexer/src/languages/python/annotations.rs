//! Annotations and literal types

use tree_sitter::Node;

use tessera_core::types::{TypeExpr, is_builtin, namespace_of, TYPING_NAMESPACE};

use super::context::Extraction;

impl<'t> Extraction<'t> {
    /// Parse annotation text and qualify the names in it as seen from `scope`.
    pub fn annotation(&self, scope: usize, text: &str) -> Option<TypeExpr> {
        let expr = TypeExpr::parse(text)?;
        Some(expr.map_names(&|name: &str| self.qualify_type_name(scope, name)))
    }

    fn qualify_type_name(&self, scope: usize, name: &str) -> String {
        if is_builtin(name) || namespace_of(name) == TYPING_NAMESPACE || name.starts_with('[') {
            return name.to_string();
        }
        match self.resolve_dotted(scope, name).into_iter().next() {
            Some(qualified) => qualified,
            None => name.to_string(),
        }
    }

    /// Classes a value annotated with `expr` may be an instance of.
    pub fn instance_classes(expr: &TypeExpr) -> Vec<String> {
        match expr {
            TypeExpr::Named(name) if name != "None" => vec![name.clone()],
            TypeExpr::Union(members) => members.iter().flat_map(Self::instance_classes).collect(),
            _ => Vec::new(),
        }
    }
}

/// Builtin type of a literal expression, if it is one.
pub fn infer_literal(node: Node<'_>, source: &[u8]) -> Option<String> {
    let name = match node.kind() {
        "integer" | "float" => {
            let text = node.utf8_text(source).unwrap_or_default();
            if text.ends_with('j') || text.ends_with('J') {
                "complex"
            } else if node.kind() == "integer" {
                "int"
            } else {
                "float"
            }
        }
        "true" | "false" | "comparison_operator" | "not_operator" => "bool",
        "none" => "None",
        "string" => {
            let text = node.utf8_text(source).unwrap_or_default();
            let prefix: String = text
                .chars()
                .take_while(|c| c.is_ascii_alphabetic())
                .collect();
            if prefix.to_ascii_lowercase().contains('b') {
                "bytes"
            } else {
                "str"
            }
        }
        "concatenated_string" => {
            let first = node.named_child(0)?;
            return infer_literal(first, source);
        }
        "list" | "list_comprehension" => "list",
        "dictionary" | "dictionary_comprehension" => "dict",
        "set" | "set_comprehension" => "set",
        "tuple" => "tuple",
        "parenthesized_expression" => {
            let inner = node.named_child(0)?;
            return infer_literal(inner, source);
        }
        "unary_operator" => {
            let operand = node.child_by_field_name("argument")?;
            let inner = infer_literal(operand, source)?;
            return matches!(inner.as_str(), "int" | "float" | "complex" | "bool").then(|| {
                if inner == "bool" { "int".to_string() } else { inner }
            });
        }
        _ => return None,
    };
    Some(name.to_string())
}
