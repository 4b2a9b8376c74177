//! Incremental validation: file changes flow through a debounced scheduler
//! into single-file rebuilds, one-hop propagation and scoped validation.

pub mod engine;
pub mod events;
pub mod impact;
pub mod propagation;
pub mod scheduler;
pub mod service;
pub mod watcher;

#[cfg(test)]
mod tests;

pub use engine::{EngineError, IncrementalEngine, ReindexStats};
pub use events::{ChangeEvent, EventBus};
pub use impact::{Impact, ImpactEntry, impact_of};
pub use propagation::{ChangeSet, PropagationStats, propagate, validation_scope};
pub use scheduler::{Generations, Scheduler, SchedulerHandle};
pub use service::{RunningWatch, WatchService};
pub use watcher::{FileWatcher, WatchEvent};
