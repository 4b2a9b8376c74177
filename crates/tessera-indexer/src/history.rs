//! Snapshots of past revisions, built from version control without touching
//! the working tree.

use std::path::{Path, PathBuf};
use std::process::Command;

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

use tessera_core::types::seed_builtins;
use tessera_core::{
    FileSnapshotStore, Graph, GraphStore, IdStrategy, Snapshot, StoreError, SymbolTable,
    create_snapshot,
};

use crate::coordinator::Indexer;
use crate::linker::Linker;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed: {stderr}")]
    Git { command: String, stderr: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub id: String,
    pub summary: String,
}

/// Read-only view of a repository's history.
pub trait VersionControl: Send + Sync {
    /// Up to `limit` commits reachable from `rev`, newest first.
    fn list_commits(&self, rev: &str, limit: usize) -> Result<Vec<CommitInfo>, HistoryError>;

    /// Full commit id for `rev`.
    fn resolve(&self, rev: &str) -> Result<String, HistoryError>;

    fn list_files_at(&self, commit: &str) -> Result<Vec<PathBuf>, HistoryError>;

    fn read_file_at(&self, commit: &str, path: &Path) -> Result<Vec<u8>, HistoryError>;

    /// Files that differ between two commits.
    fn diff_files(&self, from: &str, to: &str) -> Result<Vec<PathBuf>, HistoryError>;
}

/// [`VersionControl`] over the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    repo: PathBuf,
}

impl GitCli {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self { repo: repo.into() }
    }

    fn run(&self, args: &[&str]) -> Result<Vec<u8>, HistoryError> {
        let command = format!("git {}", args.join(" "));
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo)
            .args(args)
            .output()
            .map_err(|source| HistoryError::Spawn {
                command: command.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(HistoryError::Git {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    fn lines(&self, args: &[&str]) -> Result<Vec<String>, HistoryError> {
        let stdout = self.run(args)?;
        Ok(String::from_utf8_lossy(&stdout)
            .lines()
            .filter(|l| !l.is_empty())
            .map(|l| l.to_string())
            .collect())
    }
}

impl VersionControl for GitCli {
    fn list_commits(&self, rev: &str, limit: usize) -> Result<Vec<CommitInfo>, HistoryError> {
        let limit = format!("-n{}", limit);
        let lines = self.lines(&["log", "--format=%H%x09%s", &limit, rev, "--"])?;
        Ok(lines
            .into_iter()
            .map(|line| match line.split_once('\t') {
                Some((id, summary)) => CommitInfo {
                    id: id.to_string(),
                    summary: summary.to_string(),
                },
                None => CommitInfo {
                    id: line,
                    summary: String::new(),
                },
            })
            .collect())
    }

    fn resolve(&self, rev: &str) -> Result<String, HistoryError> {
        let spec = format!("{}^{{commit}}", rev);
        let stdout = self.run(&["rev-parse", "--verify", &spec])?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }

    fn list_files_at(&self, commit: &str) -> Result<Vec<PathBuf>, HistoryError> {
        Ok(self
            .lines(&["ls-tree", "-r", "--name-only", commit])?
            .into_iter()
            .map(PathBuf::from)
            .collect())
    }

    fn read_file_at(&self, commit: &str, path: &Path) -> Result<Vec<u8>, HistoryError> {
        // Git paths always use forward slashes.
        let path = path
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let object = format!("{}:{}", commit, path);
        self.run(&["show", &object])
    }

    fn diff_files(&self, from: &str, to: &str) -> Result<Vec<PathBuf>, HistoryError> {
        Ok(self
            .lines(&["diff", "--name-only", from, to])?
            .into_iter()
            .map(PathBuf::from)
            .collect())
    }
}

/// Commit-addressed snapshots, built on first request and then served from
/// the snapshot directory.
pub struct HistoricalSnapshots<'a, V: VersionControl> {
    vcs: V,
    indexer: &'a Indexer,
    snapshots: FileSnapshotStore,
}

impl<'a, V: VersionControl> HistoricalSnapshots<'a, V> {
    pub fn new(vcs: V, indexer: &'a Indexer, snapshots: FileSnapshotStore) -> Self {
        Self {
            vcs,
            indexer,
            snapshots,
        }
    }

    pub fn vcs(&self) -> &V {
        &self.vcs
    }

    /// Snapshot of `rev`, building and persisting it if it does not exist yet.
    pub fn snapshot_for(&self, rev: &str) -> Result<Snapshot, HistoryError> {
        let commit = self.vcs.resolve(rev)?;
        let strategy = IdStrategy::Commit(commit.clone());
        let id = format!("git-{}", commit);
        if let Some(existing) = self.snapshots.load(&id)? {
            debug!("snapshot {} already built", id);
            return Ok(existing);
        }

        info!("Building snapshot for commit {}", commit);
        let graph = self.build_graph(&commit)?;
        let summary = self
            .vcs
            .list_commits(&commit, 1)?
            .into_iter()
            .next()
            .map(|c| c.summary)
            .filter(|s| !s.is_empty());
        let snapshot = create_snapshot(&graph, strategy, summary, vec![commit.clone()])?;
        self.snapshots.save(&snapshot)?;
        Ok(snapshot)
    }

    /// Extract every indexable file of `commit` into a throwaway graph.
    fn build_graph(&self, commit: &str) -> Result<Graph, HistoryError> {
        let files: Vec<PathBuf> = self
            .vcs
            .list_files_at(commit)?
            .into_iter()
            .filter(|f| self.indexer.is_indexable(f))
            .collect();

        let extracted: Vec<_> = files
            .par_iter()
            .filter_map(|rel| {
                let content = match self.vcs.read_file_at(commit, rel) {
                    Ok(content) => content,
                    Err(err) => {
                        warn!("Cannot read {} at {}: {}", rel.display(), commit, err);
                        return None;
                    }
                };
                match self.indexer.extract_source(rel, &content) {
                    Ok(extraction) => Some(extraction),
                    Err(err) => {
                        warn!("Skipping {} at {}: {}", rel.display(), commit, err);
                        None
                    }
                }
            })
            .collect();

        let mut graph = Graph::new();
        seed_builtins(&mut graph)?;
        for extraction in extracted {
            graph.rebuild_file(extraction.into_transaction())?;
        }
        let symbols = SymbolTable::from_graph(&graph);
        Linker::new(&symbols).link(&mut graph, None)?;
        Ok(graph)
    }
}
