//! On-disk cache: the graph image and persisted snapshots under `.tessera/`

use std::fs;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::graph::{Graph, GraphImage};
use crate::snapshot::Snapshot;

/// Cache directory: .tessera/
pub const CACHE_DIR: &str = ".tessera";

/// Graph cache file
pub const GRAPH_CACHE: &str = "graph.bin";

pub const SNAPSHOT_DIR: &str = "snapshots";

pub fn cache_dir(root: &Path) -> PathBuf {
    root.join(CACHE_DIR)
}

pub fn graph_cache_path(root: &Path) -> PathBuf {
    root.join(CACHE_DIR).join(GRAPH_CACHE)
}

pub fn snapshot_dir(root: &Path) -> PathBuf {
    root.join(CACHE_DIR).join(SNAPSHOT_DIR)
}

pub fn ensure_cache_dir(root: &Path) -> std::io::Result<()> {
    fs::create_dir_all(cache_dir(root))
}

/// Versioned wrapper so a cache written by another build is ignored rather
/// than misread.
#[derive(Serialize, Deserialize)]
struct CachedGraph {
    version: String,
    image: GraphImage,
}

/// Serialize the graph to `.tessera/graph.bin`.
pub fn save_graph(graph: &Graph, root: &Path) -> Result<(), StoreError> {
    ensure_cache_dir(root)?;
    let path = graph_cache_path(root);
    let cached = CachedGraph {
        version: env!("CARGO_PKG_VERSION").to_string(),
        image: graph.to_image(),
    };
    let bytes = bincode::serialize(&cached)?;
    // Write then rename so a crash never leaves a torn cache.
    let tmp = path.with_extension("bin.tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, &path)?;
    debug!(
        "Graph cache saved: {} ({} nodes, {} edges)",
        path.display(),
        cached.image.nodes.len(),
        cached.image.edges.len()
    );
    Ok(())
}

/// Load the cached graph, if any. A cache from a different version is
/// treated as absent.
pub fn load_graph(root: &Path) -> Result<Option<Graph>, StoreError> {
    let path = graph_cache_path(root);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(&path)?;
    let cached: CachedGraph = match bincode::deserialize(&bytes) {
        Ok(cached) => cached,
        Err(e) => {
            warn!("Ignoring unreadable graph cache {}: {}", path.display(), e);
            return Ok(None);
        }
    };
    if cached.version != env!("CARGO_PKG_VERSION") {
        warn!(
            "Ignoring graph cache from version {} (running {})",
            cached.version,
            env!("CARGO_PKG_VERSION")
        );
        return Ok(None);
    }
    debug!("Graph cache loaded from: {}", path.display());
    Graph::from_image(cached.image).map(Some)
}

/// Clear cache directory
pub fn clear_cache(root: &Path) -> std::io::Result<()> {
    let cache = cache_dir(root);
    if cache.exists() {
        fs::remove_dir_all(&cache)?;
    }
    Ok(())
}

/// Listing entry for a persisted snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub snapshot_id: String,
    pub created_at: DateTime<Utc>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub node_count: usize,
    pub edge_count: usize,
}

impl From<&Snapshot> for SnapshotSummary {
    fn from(s: &Snapshot) -> Self {
        SnapshotSummary {
            snapshot_id: s.snapshot_id.clone(),
            created_at: s.created_at,
            description: s.description.clone(),
            tags: s.tags.clone(),
            node_count: s.node_count,
            edge_count: s.edge_count,
        }
    }
}

/// Snapshots persisted as `<dir>/<snapshot_id>.json`.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileSnapshotStore { dir: dir.into() }
    }

    /// The store under a repository's `.tessera/snapshots/`.
    pub fn for_root(root: &Path) -> Self {
        Self::new(snapshot_dir(root))
    }

    fn path_for(&self, snapshot_id: &str) -> Result<PathBuf, StoreError> {
        let plain = !snapshot_id.is_empty()
            && !snapshot_id.starts_with('.')
            && !snapshot_id.contains(['/', '\\', ':'])
            && matches!(
                Path::new(snapshot_id).components().collect::<Vec<_>>().as_slice(),
                [Component::Normal(_)]
            );
        if !plain {
            return Err(StoreError::InvalidSnapshotId(snapshot_id.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", snapshot_id)))
    }

    pub fn exists(&self, snapshot_id: &str) -> bool {
        self.path_for(snapshot_id).is_ok_and(|path| path.exists())
    }

    pub fn save(&self, snapshot: &Snapshot) -> Result<PathBuf, StoreError> {
        let path = self.path_for(&snapshot.snapshot_id)?;
        fs::create_dir_all(&self.dir)?;
        fs::write(&path, serde_json::to_vec_pretty(snapshot)?)?;
        debug!("Snapshot {} written to {}", snapshot.snapshot_id, path.display());
        Ok(path)
    }

    pub fn load(&self, snapshot_id: &str) -> Result<Option<Snapshot>, StoreError> {
        let path = self.path_for(snapshot_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// All persisted snapshots, oldest first.
    pub fn list(&self) -> Result<Vec<SnapshotSummary>, StoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut summaries = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path)?;
            match serde_json::from_slice::<Snapshot>(&bytes) {
                Ok(snapshot) => summaries.push(SnapshotSummary::from(&snapshot)),
                Err(e) => warn!("Skipping unreadable snapshot {}: {}", path.display(), e),
            }
        }
        summaries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.snapshot_id.cmp(&b.snapshot_id))
        });
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::GraphRead;
    use crate::snapshot::{IdStrategy, create_snapshot};
    use crate::test_utils::sample_graph;
    use tempfile::TempDir;

    #[test]
    fn graph_round_trips_through_cache() {
        let dir = TempDir::new().unwrap();
        let graph = sample_graph();

        save_graph(&graph, dir.path()).unwrap();
        let loaded = load_graph(dir.path()).unwrap().unwrap();

        assert_eq!(loaded.to_image(), graph.to_image());
        assert_eq!(loaded.edge_count(), graph.edge_count());
    }

    #[test]
    fn missing_or_corrupt_cache_loads_as_none() {
        let dir = TempDir::new().unwrap();
        assert!(load_graph(dir.path()).unwrap().is_none());

        ensure_cache_dir(dir.path()).unwrap();
        fs::write(graph_cache_path(dir.path()), b"not bincode").unwrap();
        assert!(load_graph(dir.path()).unwrap().is_none());
    }

    #[test]
    fn snapshots_persist_and_list_in_order() {
        let dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::for_root(dir.path());
        let graph = sample_graph();

        let first = create_snapshot(&graph, IdStrategy::Commit("aaa".into()), None, vec![]).unwrap();
        let second = create_snapshot(&graph, IdStrategy::Commit("bbb".into()), Some("later".into()), vec![])
            .unwrap();
        store.save(&first).unwrap();
        store.save(&second).unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].snapshot_id, "git-aaa");
        assert_eq!(store.load("git-bbb").unwrap().unwrap(), second);
        assert!(store.load("missing").unwrap().is_none());
    }

    #[test]
    fn snapshot_ids_cannot_leave_the_snapshot_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("outside.json"), b"{}").unwrap();
        let store = FileSnapshotStore::new(dir.path().join("snapshots"));

        for id in ["../outside", "../../x", "a/b", "a\\b", "..", ".", ""] {
            assert!(
                matches!(store.load(id), Err(StoreError::InvalidSnapshotId(_))),
                "{id:?} was accepted"
            );
            assert!(!store.exists(id));
        }

        let mut snapshot =
            create_snapshot(&sample_graph(), IdStrategy::Commit("aaa".into()), None, vec![]).unwrap();
        snapshot.snapshot_id = "../escaped".into();
        assert!(store.save(&snapshot).is_err());
        assert!(!dir.path().join("escaped.json").exists());
    }

    #[test]
    fn clear_cache_removes_directory() {
        let dir = TempDir::new().unwrap();
        save_graph(&sample_graph(), dir.path()).unwrap();
        clear_cache(dir.path()).unwrap();
        assert!(!cache_dir(dir.path()).exists());
    }
}
