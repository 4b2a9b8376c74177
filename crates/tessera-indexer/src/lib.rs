//! Source extraction, cross-file linking and batch indexing

pub mod coordinator;
pub mod extractor;
pub mod history;
pub mod languages;
pub mod linker;
pub mod parser_pool;


pub use coordinator::{FileFailure, IndexError, IndexReport, Indexer, stored_files};
pub use extractor::{ExtractError, ExtractionResult, LanguageExtractor};
pub use history::{CommitInfo, GitCli, HistoricalSnapshots, HistoryError, VersionControl};
pub use linker::{LinkPlan, LinkStats, Linker, Resolution, pending, unbind};
pub use parser_pool::{FileType, ParseRequest, ParseResult, ParserPool, create_parser_pool};
