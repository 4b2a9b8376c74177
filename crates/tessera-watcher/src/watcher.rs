//! Filesystem watching: turns notify events into scheduler signals

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::scheduler::SchedulerHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
}

impl WatchEvent {
    pub fn path(&self) -> &Path {
        match self {
            WatchEvent::Created(p) | WatchEvent::Modified(p) | WatchEvent::Removed(p) => p,
        }
    }
}

pub struct FileWatcher {
    watcher: RecommendedWatcher,
    event_rx: mpsc::UnboundedReceiver<WatchEvent>,
    watched_paths: HashSet<PathBuf>,
    root: PathBuf,
}

impl FileWatcher {
    pub fn new(root: impl AsRef<Path>) -> notify::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    debug!("File system event: {:?}", event);
                    for watch_event in translate(event) {
                        if event_tx.send(watch_event).is_err() {
                            warn!("Watch event dropped: receiver closed");
                        }
                    }
                }
                Err(e) => error!("File system watch error: {}", e),
            }
        })?;

        Ok(Self {
            watcher,
            event_rx,
            watched_paths: HashSet::new(),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Watch the root recursively.
    pub fn start(&mut self) -> notify::Result<()> {
        let root = self.root.clone();
        self.watch_directory(&root)
    }

    pub fn watch_directory(&mut self, path: &Path) -> notify::Result<()> {
        info!("Watching directory: {}", path.display());
        self.watcher.watch(path, RecursiveMode::Recursive)?;
        self.watched_paths.insert(path.to_path_buf());
        Ok(())
    }

    pub fn unwatch(&mut self, path: &Path) -> notify::Result<()> {
        self.watcher.unwatch(path)?;
        self.watched_paths.remove(path);
        Ok(())
    }

    pub fn is_watching(&self, path: &Path) -> bool {
        self.watched_paths.contains(path)
    }

    pub async fn next_event(&mut self) -> Option<WatchEvent> {
        self.event_rx.recv().await
    }

    /// Forward every event to the scheduler until either side closes.
    pub async fn forward(mut self, handle: SchedulerHandle) {
        while let Some(event) = self.next_event().await {
            debug!("{:?}", event);
            if !handle.notify(event.path().to_path_buf()) {
                break;
            }
        }
        info!("Stopped watching {}", self.root.display());
    }
}

fn translate(event: notify::Event) -> Vec<WatchEvent> {
    let make: fn(PathBuf) -> WatchEvent = match event.kind {
        notify::EventKind::Create(_) => WatchEvent::Created,
        notify::EventKind::Modify(_) => WatchEvent::Modified,
        notify::EventKind::Remove(_) => WatchEvent::Removed,
        _ => return Vec::new(),
    };
    event
        .paths
        .into_iter()
        .filter(|p| !should_ignore_path(p))
        .map(make)
        .collect()
}

/// Paths under VCS metadata, the cache directory or bytecode caches.
fn should_ignore_path(path: &Path) -> bool {
    path.components().any(|component| {
        matches!(
            component.as_os_str().to_str(),
            Some(".git" | ".tessera" | "__pycache__")
        )
    })
}
