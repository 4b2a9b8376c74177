//! Thread-safe parser pool for tree-sitter parsers
//!
//! Tree-sitter parsers are not `Sync`, so parsing happens on dedicated worker
//! threads that each own one parser; callers talk to them over channels.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};

use tree_sitter::{Language, Parser};

use crate::extractor::ExtractError;

/// Supported source languages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Python,
}

impl FileType {
    /// Determine file type from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "py" | "pyi" => Some(FileType::Python),
            _ => None,
        }
    }

    /// Get the tree-sitter language for this file type
    pub fn language(&self) -> Language {
        match self {
            FileType::Python => tree_sitter_python::LANGUAGE.into(),
        }
    }
}

/// A parsing request sent to the parser pool
#[derive(Debug)]
pub struct ParseRequest {
    pub file_type: FileType,
    pub content: String,
    pub path: PathBuf,
}

/// Result of a parsing operation
#[derive(Debug)]
pub struct ParseResult {
    pub tree: tree_sitter::Tree,
    pub path: PathBuf,
    pub content: String,
}

struct WorkerRequest {
    request: ParseRequest,
    response_sender: Sender<Result<ParseResult, ExtractError>>,
}

/// Thread-safe parser pool
#[derive(Clone)]
pub struct ParserPool {
    sender: Sender<WorkerRequest>,
}

impl ParserPool {
    /// Create a new parser pool with the specified number of worker threads
    pub fn new(num_workers: usize) -> Self {
        let (sender, receiver) = channel::<WorkerRequest>();
        let receiver = Arc::new(Mutex::new(receiver));

        for i in 0..num_workers.max(1) {
            let receiver = receiver.clone();
            std::thread::spawn(move || {
                Self::worker_thread(i, receiver);
            });
        }

        Self { sender }
    }

    fn worker_thread(worker_id: usize, receiver: Arc<Mutex<Receiver<WorkerRequest>>>) {
        tracing::debug!("Parser worker {} started", worker_id);

        let mut parser = Parser::new();
        let mut current: Option<FileType> = None;

        loop {
            let next = match receiver.lock() {
                Ok(guard) => guard.recv(),
                Err(_) => break,
            };
            let Ok(WorkerRequest {
                request,
                response_sender,
            }) = next
            else {
                break;
            };

            if current != Some(request.file_type) {
                if let Err(e) = parser.set_language(&request.file_type.language()) {
                    let _ = response_sender.send(Err(ExtractError::Pool(format!(
                        "failed to set language: {}",
                        e
                    ))));
                    continue;
                }
                current = Some(request.file_type);
            }

            let result = match parser.parse(&request.content, None) {
                Some(tree) => Ok(ParseResult {
                    tree,
                    path: request.path,
                    content: request.content,
                }),
                None => Err(ExtractError::Pool(format!(
                    "parser gave up on {}",
                    request.path.display()
                ))),
            };

            if response_sender.send(result).is_err() {
                tracing::warn!("Failed to send parse result back to caller");
            }
        }
        tracing::debug!("Parser worker {} shutting down", worker_id);
    }

    /// Parse on a pool worker, blocking the calling thread until done.
    pub fn parse_blocking(&self, request: ParseRequest) -> Result<ParseResult, ExtractError> {
        let (response_sender, response_receiver) = channel();
        self.sender
            .send(WorkerRequest {
                request,
                response_sender,
            })
            .map_err(|_| ExtractError::Pool("parser pool is shut down".to_string()))?;
        response_receiver
            .recv()
            .map_err(|_| ExtractError::Pool("parser worker died".to_string()))?
    }

    /// Parse without blocking the async runtime.
    pub async fn parse(&self, request: ParseRequest) -> Result<ParseResult, ExtractError> {
        let pool = self.clone();
        tokio::task::spawn_blocking(move || pool.parse_blocking(request))
            .await
            .map_err(|e| ExtractError::Pool(format!("task join error: {}", e)))?
    }
}

/// Convenience function to create a parser pool with default settings
pub fn create_parser_pool() -> ParserPool {
    // Use number of CPU cores as default worker count, but at least 2
    let num_workers = std::thread::available_parallelism()
        .map(|n| n.get().max(2))
        .unwrap_or(2);

    ParserPool::new(num_workers)
}
