//! Dotted module paths from file paths

use std::path::{Component, Path, PathBuf};

/// Dotted module path of `rel` (relative to the indexing root) and whether it
/// is a package `__init__`. The first source root containing the file wins;
/// `.` matches everything.
pub fn module_path(rel: &Path, source_roots: &[PathBuf]) -> (String, bool) {
    let stripped = source_roots
        .iter()
        .find_map(|root| {
            if is_current_dir(root) {
                Some(rel)
            } else {
                rel.strip_prefix(root).ok()
            }
        })
        .unwrap_or(rel);

    let mut parts: Vec<String> = stripped
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str().map(|s| s.to_string()),
            _ => None,
        })
        .collect();

    if let Some(last) = parts.pop() {
        let stem = Path::new(&last)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&last)
            .to_string();
        if stem == "__init__" {
            if parts.is_empty() {
                return ("__init__".to_string(), true);
            }
            return (parts.join("."), true);
        }
        parts.push(stem);
    }
    (parts.join("."), false)
}

fn is_current_dir(root: &Path) -> bool {
    root.as_os_str().is_empty() || root.components().all(|c| matches!(c, Component::CurDir))
}

/// Package a relative import is resolved against: the module itself for a
/// package `__init__`, its parent otherwise, then `level - 1` levels up.
pub fn relative_base(module: &str, is_package: bool, level: usize) -> Option<String> {
    let mut parts: Vec<&str> = module.split('.').filter(|s| !s.is_empty()).collect();
    if !is_package {
        parts.pop();
    }
    for _ in 1..level {
        parts.pop()?;
    }
    Some(parts.join("."))
}
