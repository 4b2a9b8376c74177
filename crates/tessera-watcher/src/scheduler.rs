//! Debounced dispatch of file changes onto blocking workers.
//!
//! Every signal for a file bumps that file's generation. A cycle starts only
//! after the file has been quiet for the debounce window, and its output is
//! published only if no newer signal arrived while it ran.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use tessera_core::GraphStore;

use crate::engine::{EngineError, IncrementalEngine};
use crate::events::EventBus;

/// Latest signal number per file.
#[derive(Debug, Clone, Default)]
pub struct Generations {
    latest: Arc<DashMap<PathBuf, u64>>,
}

impl Generations {
    pub fn bump(&self, file: &Path) -> u64 {
        let mut entry = self.latest.entry(file.to_path_buf()).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn is_current(&self, file: &Path, generation: u64) -> bool {
        self.latest.get(file).is_some_and(|g| *g == generation)
    }
}

/// Cloneable handle for submitting changes to a running scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<PathBuf>,
}

impl SchedulerHandle {
    /// Queue `file` (root-relative) for a cycle. Returns false once the
    /// scheduler has stopped.
    pub fn notify(&self, file: impl Into<PathBuf>) -> bool {
        self.tx.send(file.into()).is_ok()
    }
}

pub struct Scheduler<S: GraphStore + 'static> {
    engine: Arc<IncrementalEngine<S>>,
    bus: EventBus,
    debounce: Duration,
    generations: Generations,
}

impl<S: GraphStore + 'static> Scheduler<S> {
    pub fn new(engine: Arc<IncrementalEngine<S>>, bus: EventBus, debounce: Duration) -> Self {
        Self {
            engine,
            bus,
            debounce,
            generations: Generations::default(),
        }
    }

    /// Start the dispatcher. It runs until every handle is dropped.
    pub fn spawn(self) -> (SchedulerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(rx));
        (SchedulerHandle { tx }, task)
    }

    async fn run(self, mut rx: mpsc::UnboundedReceiver<PathBuf>) {
        let shared = Arc::new(self);
        while let Some(file) = rx.recv().await {
            let rel = shared.engine.indexer().relative(&file);
            if !shared.engine.indexer().is_indexable(&rel) {
                debug!("Ignoring {}", rel.display());
                continue;
            }
            let generation = shared.generations.bump(&rel);
            let this = Arc::clone(&shared);
            tokio::spawn(async move { this.dispatch(rel, generation).await });
        }
        debug!("Scheduler stopped");
    }

    async fn dispatch(self: Arc<Self>, rel: PathBuf, generation: u64) {
        tokio::time::sleep(self.debounce).await;
        if !self.generations.is_current(&rel, generation) {
            // A newer signal owns this file now.
            return;
        }

        let engine = Arc::clone(&self.engine);
        let generations = self.generations.clone();
        let file = rel.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            engine.process_file_if(&file, || generations.is_current(&file, generation))
        })
        .await;

        match outcome {
            Ok(Ok(Some(event))) => {
                if self.generations.is_current(&rel, generation) {
                    self.bus.publish(event);
                } else {
                    debug!("Discarding superseded result for {}", rel.display());
                }
            }
            Ok(Ok(None)) => debug!("Cycle for {} was superseded", rel.display()),
            Ok(Err(EngineError::NotIndexable(path))) => {
                debug!("{} is not indexed", path.display())
            }
            Ok(Err(err)) => error!("Cycle for {} failed: {}", rel.display(), err),
            Err(err) => warn!("Worker for {} did not finish: {}", rel.display(), err),
        }
    }
}
