//! Dump file discovery and reading

use crate::error::{MigrateError, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Expand files and directories into a sorted list of dump files.
///
/// Directories are walked for `*.json`; explicit files are taken as given.
pub fn expand_sources(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| p.extension().map(|ext| ext == "json").unwrap_or(false))
                .collect();
            found.sort();
            files.extend(found);
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            return Err(MigrateError::NotFound(format!("dump source {}", path.display())));
        }
    }
    Ok(files)
}

/// Read the items of one dump file: a JSON array, or a single object.
pub fn read_items(path: &Path) -> Result<Vec<Value>> {
    let content = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&content)
        .map_err(|e| MigrateError::malformed(format!("{}: {}", path.display(), e)))?;
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(_) => Ok(vec![value]),
        _ => Err(MigrateError::malformed(format!(
            "{}: expected an array or an object",
            path.display()
        ))),
    }
}

/// Read every item of every source, in file order.
pub fn read_sources(paths: &[PathBuf]) -> Result<Vec<Value>> {
    let mut items = Vec::new();
    for file in expand_sources(paths)? {
        let mut chunk = read_items(&file)?;
        tracing::debug!(path = %file.display(), items = chunk.len(), "read dump file");
        items.append(&mut chunk);
    }
    Ok(items)
}
