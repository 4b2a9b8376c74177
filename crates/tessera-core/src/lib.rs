//! Tessera Core — semantic graph model, store contract, symbol index and snapshots

pub mod cache;
pub mod config;
pub mod diff;
pub mod error;
pub mod graph;
pub mod model;
pub mod query;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod symbols;
pub mod types;

#[cfg(test)]
mod tests;

#[cfg(test)]
pub mod test_utils;

pub use cache::{
    CACHE_DIR, FileSnapshotStore, GRAPH_CACHE, SnapshotSummary, cache_dir, clear_cache,
    ensure_cache_dir, graph_cache_path, load_graph, save_graph,
};
pub use config::{DecoratorEffect, TesseraConfig, UnknownDecoratorPolicy};
pub use diff::{GraphDiff, NodeChange, compare, compare_graphs};
pub use error::{ConfigError, StoreError};
pub use graph::{Graph, GraphImage};
pub use model::*;
pub use query::{Direction, GraphRead, PathMatch, QueryPattern, QueryStart};
pub use snapshot::{IdStrategy, Snapshot, create_snapshot};
pub use store::{
    DeleteStats, FileTransaction, GraphStore, RebuildStats, RetryPolicy, with_retry,
};
pub use symbols::{GraphSymbols, SymbolEntry, SymbolLookup, SymbolTable};
pub use types::{TypeExpr, TypeLattice};
