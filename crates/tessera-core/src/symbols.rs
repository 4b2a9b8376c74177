//! Symbol index for cross-file resolution

use std::path::{Path, PathBuf};

use dashmap::DashMap;

use crate::model::{GraphNode, NodeId, NodeKind};
use crate::query::GraphRead;

/// What resolution needs to know about a named declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolEntry {
    pub id: NodeId,
    pub kind: NodeKind,
    pub qualified_name: String,
    pub line: u32,
    /// For classes: resolution candidates of each base, in declaration order.
    pub bases: Vec<Vec<String>>,
    /// Placeholder module.
    pub is_external: bool,
}

impl SymbolEntry {
    pub fn from_node(node: &GraphNode) -> Option<Self> {
        if !node.kind().is_symbol() {
            return None;
        }
        let bases = node
            .as_class()
            .map(|c| c.bases.iter().map(|b| b.candidates.clone()).collect())
            .unwrap_or_default();
        let is_external = node.as_module().is_some_and(|m| m.is_external);
        Some(SymbolEntry {
            id: node.id,
            kind: node.kind(),
            qualified_name: node.qualified_name.clone(),
            line: node.location.line,
            bases,
            is_external,
        })
    }
}

/// Qualified-name lookup used by the linker.
pub trait SymbolLookup: Sync {
    /// Every declaration with this qualified name, ordered by id.
    fn lookup(&self, qualified_name: &str) -> Vec<SymbolEntry>;
}

/// Symbol table mapping qualified names to declarations. Thread-safe for
/// concurrent inserts from extraction workers.
pub struct SymbolTable {
    symbols: DashMap<String, Vec<SymbolEntry>>,
    /// For fast file lookup: file path -> qualified names declared there
    file_symbols: DashMap<PathBuf, Vec<String>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            symbols: DashMap::new(),
            file_symbols: DashMap::new(),
        }
    }

    pub fn from_graph(graph: &dyn GraphRead) -> Self {
        let table = SymbolTable::new();
        for kind in NodeKind::ALL.iter().filter(|k| k.is_symbol()) {
            for id in graph.nodes_of_kind(*kind) {
                if let Some(node) = graph.node(id) {
                    table.insert_node(node);
                }
            }
        }
        table
    }

    /// Index `node` if it is a symbol. Re-inserting an id replaces its entry.
    pub fn insert_node(&self, node: &GraphNode) {
        let Some(entry) = SymbolEntry::from_node(node) else {
            return;
        };
        let name = entry.qualified_name.clone();
        {
            let mut entries = self.symbols.entry(name.clone()).or_default();
            entries.retain(|e| e.id != entry.id);
            entries.push(entry);
            entries.sort_by_key(|e| e.id);
        }
        if let Some(file) = &node.file_path {
            let mut names = self.file_symbols.entry(file.clone()).or_default();
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }

    pub fn insert_nodes<'a>(&self, nodes: impl IntoIterator<Item = &'a GraphNode>) {
        for node in nodes {
            self.insert_node(node);
        }
    }

    /// Get all symbols defined in a file.
    pub fn symbols_in_file(&self, file: &Path) -> Vec<NodeId> {
        self.file_symbols
            .get(file)
            .map(|names| {
                names
                    .iter()
                    .flat_map(|name| self.lookup(name).into_iter().map(|e| e.id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Forget everything declared in `file`. Shared entries (placeholders)
    /// are untouched.
    pub fn remove_file(&self, file: &Path, ids: &[NodeId]) {
        if let Some((_, names)) = self.file_symbols.remove(file) {
            for name in names {
                let now_empty = match self.symbols.get_mut(&name) {
                    Some(mut entries) => {
                        entries.retain(|e| !ids.contains(&e.id));
                        entries.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    self.symbols.remove(&name);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.symbols.iter().map(|r| r.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolLookup for SymbolTable {
    fn lookup(&self, qualified_name: &str) -> Vec<SymbolEntry> {
        self.symbols
            .get(qualified_name)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }
}

/// Resolve straight against a graph's qualified-name index.
pub struct GraphSymbols<'a, G: GraphRead + ?Sized>(pub &'a G);

impl<G: GraphRead + Sync + ?Sized> SymbolLookup for GraphSymbols<'_, G> {
    fn lookup(&self, qualified_name: &str) -> Vec<SymbolEntry> {
        self.0
            .lookup_qualified(qualified_name)
            .into_iter()
            .filter_map(|id| self.0.node(id))
            .filter_map(SymbolEntry::from_node)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::test_utils::*;

    #[test]
    fn lookup_returns_every_declaration_with_the_name() {
        let table = SymbolTable::new();
        let first = function_node("m.f", "m.py", "()");
        let mut second = function_node("m.f", "m.py", "(x)");
        second.id = NodeId::new(NodeKind::Function, "m.f#2");
        table.insert_nodes([&first, &second]);

        assert_eq!(table.lookup("m.f").len(), 2);
        assert_eq!(table.symbols_in_file(Path::new("m.py")).len(), 2);
    }

    #[test]
    fn remove_file_forgets_its_symbols() {
        let table = SymbolTable::new();
        let f = function_node("m.f", "m.py", "()");
        let g = function_node("n.g", "n.py", "()");
        table.insert_nodes([&f, &g]);

        table.remove_file(Path::new("m.py"), &[f.id]);

        assert!(table.lookup("m.f").is_empty());
        assert_eq!(table.lookup("n.g").len(), 1);
    }

    #[test]
    fn graph_symbols_match_table_built_from_graph() {
        let mut graph = Graph::new();
        graph.upsert_node(module_node("pkg.m", "pkg/m.py"));
        graph.upsert_node(class_node("pkg.m.Base", "pkg/m.py", &[]));
        graph.upsert_node(class_node("pkg.m.Child", "pkg/m.py", &["pkg.m.Base"]));

        let table = SymbolTable::from_graph(&graph);
        let direct = GraphSymbols(&graph);
        for name in ["pkg.m", "pkg.m.Base", "pkg.m.Child"] {
            assert_eq!(table.lookup(name), direct.lookup(name));
        }
        assert_eq!(
            table.lookup("pkg.m.Child")[0].bases,
            vec![vec!["pkg.m.Base".to_string()]]
        );
    }

    #[test]
    fn non_symbols_are_not_indexed() {
        let table = SymbolTable::new();
        table.insert_node(&call_site_node("m.f", "g", 0, "m.py", false));
        assert!(table.is_empty());
    }
}
