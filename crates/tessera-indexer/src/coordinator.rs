//! Batch indexing: discover files, extract them in parallel, rebuild each
//! file's slice of the store, then link across files.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use tessera_core::types::seed_builtins;
use tessera_core::{
    ConfigError, FileTransaction, GraphRead, GraphStore, RetryPolicy, StoreError, SymbolTable,
    TesseraConfig, with_retry,
};

use crate::extractor::{ExtractError, ExtractionResult, LanguageExtractor};
use crate::languages::{is_supported, python::PythonExtractor};
use crate::linker::Linker;
use crate::parser_pool::{ParserPool, create_parser_pool};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid glob pattern '{pattern}': {source}")]
    Glob {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to walk {root}: {source}")]
    Walk {
        root: PathBuf,
        #[source]
        source: ignore::Error,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Extract(#[from] ExtractError),
}

/// A file left out of the graph, and why.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    pub files_indexed: usize,
    pub files_removed: usize,
    pub failures: Vec<FileFailure>,
    pub nodes: usize,
    pub edges: usize,
    pub calls_resolved: usize,
    pub calls_unresolved: usize,
    pub duration_ms: u64,
}

pub struct Indexer {
    root: PathBuf,
    config: TesseraConfig,
    includes: GlobSet,
    excludes: GlobSet,
    extractor: PythonExtractor,
    retry: RetryPolicy,
}

fn build_glob_set(patterns: &[String]) -> Result<GlobSet, IndexError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|source| IndexError::Glob {
            pattern: pattern.clone(),
            source,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| IndexError::Glob {
        pattern: patterns.join(", "),
        source,
    })
}

impl Indexer {
    pub fn new(root: impl Into<PathBuf>, config: TesseraConfig) -> Result<Self, IndexError> {
        Self::with_pool(root, config, create_parser_pool())
    }

    pub fn with_pool(
        root: impl Into<PathBuf>,
        config: TesseraConfig,
        pool: ParserPool,
    ) -> Result<Self, IndexError> {
        config.validate()?;
        let includes = build_glob_set(&config.index.include)?;
        let excludes = build_glob_set(&config.index.exclude)?;
        let extractor = PythonExtractor::new(pool, config.index.source_roots.clone());
        let retry = config.store.retry_policy();
        Ok(Self {
            root: root.into(),
            config,
            includes,
            excludes,
            extractor,
            retry,
        })
    }

    /// Load `tessera.toml` from `root` and build an indexer for it.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let root = root.into();
        let config = TesseraConfig::load(&root)?;
        Self::new(root, config)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &TesseraConfig {
        &self.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// `path` relative to the root; relative paths pass through.
    pub fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }

    /// Whether a root-relative path takes part in the graph.
    pub fn is_indexable(&self, rel: &Path) -> bool {
        is_supported(rel) && self.includes.is_match(rel) && !self.excludes.is_match(rel)
    }

    /// Indexable files under the root, relative and sorted.
    pub fn discover(&self) -> Result<Vec<PathBuf>, IndexError> {
        let gitignore = self.config.index.respect_gitignore;
        let walker = WalkBuilder::new(&self.root)
            .hidden(false)
            .ignore(gitignore)
            .git_ignore(gitignore)
            .git_exclude(gitignore)
            .git_global(gitignore)
            .parents(gitignore)
            .require_git(false)
            .filter_entry(|entry| entry.file_name() != ".git")
            .build();

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|source| IndexError::Walk {
                root: self.root.clone(),
                source,
            })?;
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let rel = self.relative(entry.path());
            if self.is_indexable(&rel) {
                files.push(rel);
            }
        }
        files.sort();
        debug!("discovered {} files under {}", files.len(), self.root.display());
        Ok(files)
    }

    pub fn extract_source(&self, rel: &Path, content: &[u8]) -> Result<ExtractionResult, ExtractError> {
        self.extractor.extract(rel, content)
    }

    /// Read and extract one file. `Ok(None)` when the file no longer exists,
    /// which callers treat as a removal.
    pub fn extract_file(&self, rel: &Path) -> Result<Option<ExtractionResult>, IndexError> {
        let path = self.root.join(rel);
        let content = match std::fs::read(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(IndexError::Io { path, source }),
        };
        Ok(Some(self.extract_source(rel, &content)?))
    }

    /// Index every discovered file into `store` and link the result.
    /// Files that fail to read or parse are reported and left out of the
    /// graph, including any slice an earlier index gave them.
    pub fn index_all<S: GraphStore + ?Sized>(&self, store: &mut S) -> Result<IndexReport, IndexError> {
        let started = Instant::now();
        info!("Indexing repository: {}", self.root.display());
        seed_builtins(store)?;

        let files = self.discover()?;
        let symbols = SymbolTable::new();
        let results: Vec<(PathBuf, Result<Option<ExtractionResult>, IndexError>)> = files
            .par_iter()
            .map(|rel| {
                let result = self.extract_file(rel);
                if let Ok(Some(extraction)) = &result {
                    symbols.insert_nodes(&extraction.nodes);
                }
                (rel.clone(), result)
            })
            .collect();

        let mut report = IndexReport::default();
        for (rel, result) in results {
            match result {
                Ok(Some(extraction)) => {
                    let tx = extraction.into_transaction();
                    with_retry(&self.retry, "rebuild_file", || store.rebuild_file(tx.clone()))?;
                    report.files_indexed += 1;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!("Skipping {}: {}", rel.display(), err);
                    if !store.nodes_in_file(&rel).is_empty() {
                        with_retry(&self.retry, "rebuild_file", || {
                            store.rebuild_file(FileTransaction::removal(rel.clone()))
                        })?;
                    }
                    report.failures.push(FileFailure {
                        path: rel,
                        error: err.to_string(),
                    });
                }
            }
        }

        let discovered: BTreeSet<&PathBuf> = files.iter().collect();
        for stale in stored_files(&*store) {
            if !discovered.contains(&stale) {
                debug!("Removing {} from the graph", stale.display());
                with_retry(&self.retry, "rebuild_file", || {
                    store.rebuild_file(FileTransaction::removal(stale.clone()))
                })?;
                report.files_removed += 1;
            }
        }

        let linked = Linker::new(&symbols).link(store, None)?;
        report.calls_resolved = linked.calls_resolved;
        report.calls_unresolved = linked.calls_unresolved;
        report.nodes = store.node_count();
        report.edges = store.edge_count();
        report.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            "Indexed {} files ({} failed): {} nodes, {} edges in {}ms",
            report.files_indexed,
            report.failures.len(),
            report.nodes,
            report.edges,
            report.duration_ms
        );
        Ok(report)
    }
}

/// Files that own at least one node in `graph`.
pub fn stored_files<G: GraphRead + ?Sized>(graph: &G) -> BTreeSet<PathBuf> {
    graph
        .node_ids()
        .into_iter()
        .filter_map(|id| graph.node(id).and_then(|n| n.file_path.clone()))
        .collect()
}
