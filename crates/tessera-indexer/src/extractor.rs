//! Language extractor trait definition

use std::path::{Path, PathBuf};

use thiserror::Error;

use tessera_core::{FileTransaction, GraphEdge, GraphNode};

/// Everything one file contributes to the graph.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    /// Path relative to the indexing root.
    pub file: PathBuf,
    /// Dotted path of the file's module.
    pub module: String,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl ExtractionResult {
    pub fn into_transaction(self) -> FileTransaction {
        FileTransaction {
            file: self.file,
            nodes: self.nodes,
            edges: self.edges,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    /// The file does not parse; `line`/`column` locate the first error (1-based).
    #[error("syntax error in {file} at {line}:{column}")]
    Parse {
        file: PathBuf,
        line: u32,
        column: u32,
    },

    #[error("{file} is not valid UTF-8: {source}")]
    Encoding {
        file: PathBuf,
        #[source]
        source: std::str::Utf8Error,
    },

    #[error("parser pool failure: {0}")]
    Pool(String),
}

pub trait LanguageExtractor: Send + Sync {
    /// Extract entities and relationships from one file. `path` is relative
    /// to the indexing root and becomes the nodes' `file_path`.
    fn extract(&self, path: &Path, content: &[u8]) -> Result<ExtractionResult, ExtractError>;
}
