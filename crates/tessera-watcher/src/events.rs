//! Change notifications: one event per completed validation cycle

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use tessera_core::NodeId;
use tessera_laws::ValidationReport;

use crate::engine::ReindexStats;
use crate::propagation::PropagationStats;

#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    pub file_path: PathBuf,
    pub reindex_stats: ReindexStats,
    pub propagation_stats: PropagationStats,
    pub validation_result: ValidationReport,
    /// Nodes marked during the cycle.
    #[serde(skip)]
    pub changed: Vec<NodeId>,
}

/// Best-effort fan-out of [`ChangeEvent`]s. Delivery is at most once; a
/// receiver that lags loses events and should re-read the graph.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Arc<ChangeEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Number of subscribers that will see the event; zero is not an error.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let file = event.file_path.clone();
        match self.tx.send(Arc::new(event)) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!("No subscribers for the event on {}", file.display());
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ChangeEvent>> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
