//! The incremental cycle: rebuild one file, re-link, mark, propagate,
//! validate, clear.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use tessera_core::{
    ConfigError, FileTransaction, Graph, GraphRead, GraphStore, NodeKind, RebuildStats,
    StoreError, SymbolTable, with_retry,
};
use tessera_indexer::{IndexError, IndexReport, Indexer, Linker, pending, unbind};
use tessera_laws::{ValidationReport, ValidationScope, Validator};

use crate::events::ChangeEvent;
use crate::impact::{Impact, impact_of};
use crate::propagation::{ChangeSet, propagate, validation_scope};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0} is not part of the indexed sources")]
    NotIndexable(PathBuf),

    #[error("a newer change to {0} superseded this cycle")]
    Superseded(PathBuf),

    #[error("{0} lock poisoned")]
    Poisoned(&'static str),

    #[error("no function or class named {0}")]
    UnknownSymbol(String),
}

/// What the rebuild half of a cycle did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReindexStats {
    /// The file no longer exists; its slice was removed.
    pub removed: bool,
    /// The file failed to read or parse; its previous slice was kept.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub rebuild: RebuildStats,
    /// Nodes elsewhere that gained a link.
    pub relinked: usize,
    /// Resolved calls elsewhere that had to bind again.
    pub rebound: usize,
    pub calls_resolved: usize,
    pub duration_ms: u64,
}

/// Owns the store and serializes cycles: one writer per file, one
/// mark-propagate-validate pass at a time.
pub struct IncrementalEngine<S: GraphStore = Graph> {
    indexer: Indexer,
    validator: Validator,
    store: RwLock<S>,
    file_locks: DashMap<PathBuf, Arc<Mutex<()>>>,
    cycle: Mutex<()>,
    retain_changed: bool,
}

impl<S: GraphStore> IncrementalEngine<S> {
    pub fn new(indexer: Indexer, store: S) -> Result<Self, EngineError> {
        let validator = Validator::from_config(indexer.config())?.with_sources(indexer.root());
        let retain_changed = indexer.config().watch.retain_changed;
        Ok(Self {
            indexer,
            validator,
            store: RwLock::new(store),
            file_locks: DashMap::new(),
            cycle: Mutex::new(()),
            retain_changed,
        })
    }

    pub fn indexer(&self) -> &Indexer {
        &self.indexer
    }

    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> Result<R, EngineError> {
        let store = self.store.read().map_err(|_| EngineError::Poisoned("store"))?;
        Ok(f(&store))
    }

    pub fn into_store(self) -> Result<S, EngineError> {
        self.store
            .into_inner()
            .map_err(|_| EngineError::Poisoned("store"))
    }

    /// Full index of the repository into the engine's store.
    pub fn index_all(&self) -> Result<IndexReport, EngineError> {
        let _cycle = self.cycle.lock().map_err(|_| EngineError::Poisoned("cycle"))?;
        let mut store = self.store.write().map_err(|_| EngineError::Poisoned("store"))?;
        Ok(self.indexer.index_all(&mut *store)?)
    }

    pub fn validate_all(&self) -> Result<ValidationReport, EngineError> {
        self.read(|store| self.validator.validate(store, &ValidationScope::Full))
    }

    pub fn impact(&self, qualified: &str) -> Result<Impact, EngineError> {
        self.read(|store| impact_of(store, qualified))?
            .ok_or_else(|| EngineError::UnknownSymbol(qualified.to_string()))
    }

    fn file_lock(&self, rel: &Path) -> Arc<Mutex<()>> {
        self.file_locks
            .entry(rel.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run one cycle for `path` (absolute or root-relative).
    pub fn process_file(&self, path: &Path) -> Result<ChangeEvent, EngineError> {
        let rel = self.indexer.relative(path);
        self.process_file_if(path, || true)?
            .ok_or(EngineError::Superseded(rel))
    }

    /// Run one cycle unless `is_current` reports, once the file has been
    /// read, that a newer change to it is pending. `Ok(None)` means the
    /// cycle stepped aside and the graph was not touched.
    pub fn process_file_if(
        &self,
        path: &Path,
        is_current: impl Fn() -> bool,
    ) -> Result<Option<ChangeEvent>, EngineError> {
        let rel = self.indexer.relative(path);
        if !self.indexer.is_indexable(&rel) {
            return Err(EngineError::NotIndexable(rel));
        }
        let lock = self.file_lock(&rel);
        let _file = lock.lock().map_err(|_| EngineError::Poisoned("file"))?;
        let started = Instant::now();

        let extracted = self.indexer.extract_file(&rel);
        if !is_current() {
            debug!("Dropping superseded cycle for {}", rel.display());
            return Ok(None);
        }

        let mut reindex = ReindexStats::default();
        let tx = match extracted {
            Ok(Some(extraction)) => Some(extraction.into_transaction()),
            Ok(None) => {
                reindex.removed = true;
                Some(FileTransaction::removal(rel.clone()))
            }
            Err(err) => {
                warn!("Keeping previous graph for {}: {}", rel.display(), err);
                reindex.failure = Some(err.to_string());
                None
            }
        };

        let _cycle = self.cycle.lock().map_err(|_| EngineError::Poisoned("cycle"))?;
        let mut store = self.store.write().map_err(|_| EngineError::Poisoned("store"))?;

        let mut seeds = Vec::new();
        if let Some(tx) = tx {
            let stats = with_retry(self.indexer.retry_policy(), "rebuild_file", || {
                store.rebuild_file(tx.clone())
            })?;
            seeds.extend(stats.written.iter().copied());
            seeds.extend(stats.detached.iter().copied());
            let defined: HashSet<String> = stats
                .written
                .iter()
                .filter_map(|id| store.node(*id))
                .filter(|n| matches!(n.kind(), NodeKind::Class | NodeKind::Function))
                .map(|n| n.qualified_name.clone())
                .collect();
            reindex.rebuild = stats;

            let symbols = SymbolTable::from_graph(&*store);
            let linker = Linker::new(&symbols);
            // Calls elsewhere that a new definition here now shadows.
            let stale = linker.stale(&*store, &defined);
            let rebound = unbind(&mut *store, &stale)?;
            reindex.rebound = rebound.len();
            seeds.extend(rebound);

            let waiting = pending(&*store);
            let linked = linker.link(&mut *store, Some(waiting.as_slice()))?;
            reindex.relinked = linked.linked.len();
            reindex.calls_resolved = linked.calls_resolved;
            seeds.extend(linked.linked);
        }

        let mut changes = ChangeSet::new(seeds);
        store.set_changed(&changes.ids(), true);
        let propagation = propagate(&*store, &mut changes);
        let reached: Vec<_> = changes.propagated().iter().copied().collect();
        store.set_changed(&reached, true);

        let scope = validation_scope(&*store, &changes);
        let validation = self.validator.validate(&*store, &scope);

        let changed = changes.ids();
        if !self.retain_changed {
            store.set_changed(&changed, false);
        }
        reindex.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            "{}: {} written, {} relinked, {} propagated, {} errors, {} warnings",
            rel.display(),
            reindex.rebuild.nodes_written,
            reindex.relinked,
            propagation.propagated(),
            validation.errors,
            validation.warnings
        );
        Ok(Some(ChangeEvent {
            file_path: rel,
            reindex_stats: reindex,
            propagation_stats: propagation,
            validation_result: validation,
            changed,
        }))
    }
}
