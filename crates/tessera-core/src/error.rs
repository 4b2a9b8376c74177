//! Error types shared by the store, cache and config layers

use std::path::PathBuf;

use thiserror::Error;

use crate::model::{EdgeKey, NodeId};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Constraint failure: an edge names a node the store does not hold.
    #[error("edge {edge} references missing node {missing}")]
    MissingEndpoint { edge: EdgeKey, missing: NodeId },

    /// The node exists but cannot take the requested update.
    #[error("node {id} cannot be updated: {reason}")]
    InvalidUpdate { id: NodeId, reason: String },

    /// Connectivity-style failure worth retrying.
    #[error("transient store failure during {operation}: {reason}")]
    Transient { operation: String, reason: String },

    /// Snapshot ids name a single file under the snapshot directory.
    #[error("invalid snapshot id {0:?}")]
    InvalidSnapshotId(String),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient { .. })
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config value for {key}: {reason}")]
    Value { key: String, reason: String },
}
