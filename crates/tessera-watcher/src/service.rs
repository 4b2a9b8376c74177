//! Wiring: filesystem watcher, scheduler and event bus around one engine

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::info;

use tessera_core::GraphStore;

use crate::engine::IncrementalEngine;
use crate::events::EventBus;
use crate::scheduler::{Scheduler, SchedulerHandle};
use crate::watcher::FileWatcher;

pub struct WatchService<S: GraphStore + 'static> {
    engine: Arc<IncrementalEngine<S>>,
    bus: EventBus,
}

/// A started service. Dropping it does not stop the tasks; call
/// [`RunningWatch::stop`].
pub struct RunningWatch {
    pub handle: SchedulerHandle,
    scheduler: JoinHandle<()>,
    forwarder: JoinHandle<()>,
}

impl RunningWatch {
    pub fn stop(self) {
        self.forwarder.abort();
        self.scheduler.abort();
    }
}

impl<S: GraphStore + 'static> WatchService<S> {
    pub fn new(engine: Arc<IncrementalEngine<S>>) -> Self {
        let capacity = engine.indexer().config().watch.channel_capacity;
        Self {
            engine,
            bus: EventBus::new(capacity),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn engine(&self) -> &Arc<IncrementalEngine<S>> {
        &self.engine
    }

    pub fn start(&self) -> Result<RunningWatch> {
        let root = self.engine.indexer().root().to_path_buf();
        let mut watcher = FileWatcher::new(&root).context("failed to create file watcher")?;
        watcher
            .start()
            .with_context(|| format!("failed to watch {}", root.display()))?;

        let debounce = self.engine.indexer().config().watch.debounce();
        let (handle, scheduler) =
            Scheduler::new(Arc::clone(&self.engine), self.bus.clone(), debounce).spawn();
        let forwarder = tokio::spawn(watcher.forward(handle.clone()));
        info!(
            "Watching {} ({}ms debounce)",
            root.display(),
            debounce.as_millis()
        );
        Ok(RunningWatch {
            handle,
            scheduler,
            forwarder,
        })
    }
}
