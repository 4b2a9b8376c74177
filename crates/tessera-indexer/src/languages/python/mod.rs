//! Python extractor built on tree-sitter

mod annotations;
mod context;
mod declarations;
mod expressions;
pub mod module_path;

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::extractor::{ExtractError, ExtractionResult, LanguageExtractor};
use crate::parser_pool::{FileType, ParseRequest, ParserPool};

use context::{Extraction, MODULE_SCOPE};

pub struct PythonExtractor {
    parser_pool: ParserPool,
    source_roots: Vec<PathBuf>,
}

impl PythonExtractor {
    pub fn new(parser_pool: ParserPool, source_roots: Vec<PathBuf>) -> Self {
        Self {
            parser_pool,
            source_roots,
        }
    }
}

impl LanguageExtractor for PythonExtractor {
    fn extract(&self, path: &Path, content: &[u8]) -> Result<ExtractionResult, ExtractError> {
        let text = std::str::from_utf8(content).map_err(|source| ExtractError::Encoding {
            file: path.to_path_buf(),
            source,
        })?;

        let parsed = self.parser_pool.parse_blocking(ParseRequest {
            file_type: FileType::Python,
            content: text.to_string(),
            path: path.to_path_buf(),
        })?;

        let root = parsed.tree.root_node();
        if let Some(error) = Extraction::first_error(root) {
            let position = error.start_position();
            return Err(ExtractError::Parse {
                file: path.to_path_buf(),
                line: position.row as u32 + 1,
                column: position.column as u32 + 1,
            });
        }

        let (module, is_package) = module_path::module_path(path, &self.source_roots);
        let source = parsed.content.as_bytes();
        let mut extraction = Extraction::new(source, path, module.clone(), is_package, root);
        extraction.prescan_classes(root);
        extraction.declare_block(root, MODULE_SCOPE);
        extraction.walk_bodies();
        let (nodes, edges) = extraction.finish();

        debug!(
            "extracted {} nodes, {} edges from {}",
            nodes.len(),
            edges.len(),
            path.display()
        );

        Ok(ExtractionResult {
            file: path.to_path_buf(),
            module,
            nodes,
            edges,
        })
    }
}
