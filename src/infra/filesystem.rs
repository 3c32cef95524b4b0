//! Filesystem operations
//!
//! Handles file and directory operations. Every cache or archive write goes
//! through [`write_atomic`] / [`persist_atomic`]: content lands in a sibling
//! temporary file that is renamed into place.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::OrchestraError;

/// Create a directory and all parent directories
pub fn create_dir_all(path: &Path) -> Result<(), OrchestraError> {
    std::fs::create_dir_all(path).map_err(|e| OrchestraError::io(path, e))
}

/// Remove a directory and all its contents, if it exists
pub fn remove_dir_all(path: &Path) -> Result<(), OrchestraError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(OrchestraError::io(path, e)),
    }
}

/// Remove a file, ignoring missing files
pub fn remove_file(path: &Path) -> Result<(), OrchestraError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(OrchestraError::io(path, e)),
    }
}

/// Read content from a file
pub fn read_file(path: &Path) -> Result<String, OrchestraError> {
    std::fs::read_to_string(path).map_err(|e| OrchestraError::io(path, e))
}

/// Read a file, returning `None` when it does not exist
pub fn read_optional(path: &Path) -> Result<Option<String>, OrchestraError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(OrchestraError::io(path, e)),
    }
}

/// Create a temporary file next to `path`
pub fn sibling_tempfile(path: &Path) -> Result<NamedTempFile, OrchestraError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    create_dir_all(parent)?;
    tempfile::Builder::new()
        .prefix(".tmp-")
        .tempfile_in(parent)
        .map_err(|e| OrchestraError::io(parent, e))
}

/// Rename a finished temporary file into place
pub fn persist_atomic(temp: NamedTempFile, path: &Path) -> Result<(), OrchestraError> {
    temp.persist(path)
        .map_err(|e| OrchestraError::io(path, e.error))?;
    Ok(())
}

/// Write content to a file through a sibling temporary file and a rename
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<(), OrchestraError> {
    let mut temp = sibling_tempfile(path)?;
    temp.write_all(content)
        .and_then(|()| temp.flush())
        .map_err(|e| OrchestraError::io(temp.path(), e))?;
    persist_atomic(temp, path)
}

/// Replace (or create) a symlink atomically
pub fn symlink_atomic(target: &Path, link: &Path) -> Result<(), OrchestraError> {
    let parent = link.parent().unwrap_or_else(|| Path::new("."));
    let file_name = link
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_link = parent.join(format!(".tmp-{}-{file_name}", std::process::id()));
    remove_file(&temp_link)?;
    std::os::unix::fs::symlink(target, &temp_link).map_err(|e| OrchestraError::io(&temp_link, e))?;
    std::fs::rename(&temp_link, link).map_err(|e| OrchestraError::io(link, e))
}

/// Path of `target` relative to the directory `from_dir`.
///
/// Both paths must be absolute or both relative to the same base.
pub fn relative_path(from_dir: &Path, target: &Path) -> PathBuf {
    let from: Vec<Component<'_>> = from_dir.components().collect();
    let to: Vec<Component<'_>> = target.components().collect();
    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();

    let mut result = PathBuf::new();
    for _ in common..from.len() {
        result.push("..");
    }
    for component in &to[common..] {
        result.push(component.as_os_str());
    }
    if result.as_os_str().is_empty() {
        result.push(".");
    }
    result
}

/// Set of every path under `root`, relative to it (directories included,
/// `root` itself excluded). Symlinks are not followed.
pub fn index_tree(root: &Path) -> Result<BTreeSet<PathBuf>, OrchestraError> {
    let mut paths = BTreeSet::new();
    if !root.exists() {
        return Ok(paths);
    }
    for entry in walkdir::WalkDir::new(root).follow_links(false).min_depth(1) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            OrchestraError::io(path, e.into())
        })?;
        if let Ok(relative) = entry.path().strip_prefix(root) {
            paths.insert(relative.to_path_buf());
        }
    }
    Ok(paths)
}

/// Whether a directory exists and has no entries
pub fn is_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path).is_ok_and(|mut entries| entries.next().is_none())
}
