//! Language extractors

pub mod python;

use std::path::{Path, PathBuf};

use crate::extractor::LanguageExtractor;
use crate::parser_pool::{FileType, ParserPool};

/// Extractor for `path`, or `None` when the language is not supported.
pub fn get_extractor(
    path: &Path,
    pool: &ParserPool,
    source_roots: &[PathBuf],
) -> Option<Box<dyn LanguageExtractor>> {
    match FileType::from_path(path)? {
        FileType::Python => Some(Box::new(python::PythonExtractor::new(
            pool.clone(),
            source_roots.to_vec(),
        ))),
    }
}

pub fn is_supported(path: &Path) -> bool {
    FileType::from_path(path).is_some()
}
