//! Uninstaller
//!
//! Removes every path listed in a component's file list, pruning
//! directories that become empty, and deletes the file list and the
//! metadata record last.

use std::path::{Path, PathBuf};

use crate::core::metadata::MetadataStore;
use crate::error::OrchestraError;

/// Summary of an uninstall
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UninstallReport {
    /// Files and symlinks removed
    pub removed_files: usize,
    /// Directories removed
    pub removed_dirs: usize,
}

/// Strip a leading `/` or `./` from a file list entry
fn normalize(entry: &str) -> &str {
    let entry = entry.strip_prefix("./").unwrap_or(entry);
    entry.trim_start_matches('/')
}

/// Uninstall `component` from `root`
pub fn uninstall(
    root: &Path,
    store: &MetadataStore,
    component: &str,
) -> Result<UninstallReport, OrchestraError> {
    let entries = store.load_index(component)?;
    let postponed: [PathBuf; 2] = [
        MetadataStore::relative_index_path(component),
        MetadataStore::relative_metadata_path(component),
    ];

    tracing::info!("Uninstalling {component}");
    let mut report = UninstallReport::default();

    let mut dirs: Vec<PathBuf> = Vec::new();
    for entry in &entries {
        let relative = Path::new(normalize(entry));
        if relative.as_os_str().is_empty() || postponed.iter().any(|p| p == relative) {
            continue;
        }
        let path = root.join(relative);
        let Ok(metadata) = std::fs::symlink_metadata(&path) else {
            tracing::debug!("Already gone: {}", path.display());
            continue;
        };

        if metadata.is_dir() {
            dirs.push(path);
            continue;
        }
        std::fs::remove_file(&path).map_err(|e| OrchestraError::io(&path, e))?;
        report.removed_files += 1;
        if let Some(parent) = path.parent() {
            report.removed_dirs += remove_empty_ancestors(root, parent)?;
        }
    }

    // Deepest first, so that a directory is empty by the time it is visited
    dirs.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));
    for dir in &dirs {
        report.removed_dirs += remove_empty_ancestors(root, dir)?;
    }

    for relative in &postponed {
        let path = root.join(relative);
        match std::fs::remove_file(&path) {
            Ok(()) => report.removed_files += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(OrchestraError::io(&path, e)),
        }
    }

    tracing::debug!(
        "Uninstalled {component}: {} files, {} directories",
        report.removed_files,
        report.removed_dirs
    );
    Ok(report)
}

/// `rmdir` reports a non-empty directory as ENOTEMPTY, or EEXIST on some
/// filesystems
const ENOTEMPTY: i32 = 39;
const EEXIST: i32 = 17;

/// `rmdir` a directory if it is empty; returns whether it was removed
fn remove_empty_dir(path: &Path) -> Result<bool, OrchestraError> {
    match std::fs::remove_dir(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) if matches!(e.raw_os_error(), Some(ENOTEMPTY | EEXIST)) => Ok(false),
        Err(e) => Err(OrchestraError::io(path, e)),
    }
}

/// Remove `dir` and then its parents while they are empty, stopping at
/// `root`; returns how many directories were removed
fn remove_empty_ancestors(root: &Path, dir: &Path) -> Result<usize, OrchestraError> {
    let mut removed = 0;
    let mut current = Some(dir);
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) || !remove_empty_dir(dir)? {
            break;
        }
        removed += 1;
        current = dir.parent();
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::metadata::{InstallMetadata, InstallSource};
    use tempfile::TempDir;

    fn install_fake(root: &Path, store: &MetadataStore, component: &str, files: &[&str]) {
        let mut index: Vec<String> = Vec::new();
        for file in files {
            let path = root.join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, file).unwrap();
            index.push((*file).to_string());
        }
        index.push(
            MetadataStore::relative_metadata_path(component)
                .to_string_lossy()
                .into_owned(),
        );
        index.push(
            MetadataStore::relative_index_path(component)
                .to_string_lossy()
                .into_owned(),
        );
        store
            .save(&InstallMetadata {
                component: component.to_string(),
                build: "x".to_string(),
                self_hash: String::new(),
                recursive_hash: String::new(),
                source: InstallSource::Build,
                manually_installed: false,
                install_time: 0.0,
                binary_archive_path: None,
            })
            .unwrap();
        store.save_index(component, &index).unwrap();
    }

    #[test]
    fn test_uninstall_removes_listed_files_and_empty_dirs() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let store = MetadataStore::new(root);
        install_fake(root, &store, "a", &["bin/a", "share/a/data/file"]);
        install_fake(root, &store, "b", &["bin/b"]);

        let index = store.load_index("a").unwrap();
        uninstall(root, &store, "a").unwrap();

        for entry in index {
            assert!(!root.join(&entry).exists(), "{entry} should be gone");
        }
        assert!(!root.join("share/a/data").exists());
        assert!(root.join("bin/b").exists());
        assert!(store.is_installed("b"));
        assert!(!store.is_installed("a"));
    }

    #[test]
    fn test_uninstall_tolerates_missing_entries_and_prefixes() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let store = MetadataStore::new(root);
        install_fake(root, &store, "a", &["lib64/liba.so"]);
        let mut index = store.load_index("a").unwrap();
        index.push("./lib64/gone.so".to_string());
        index.push("/lib64/liba.so".to_string());
        store.save_index("a", &index).unwrap();

        uninstall(root, &store, "a").unwrap();
        assert!(!root.join("lib64/liba.so").exists());
        assert!(!store.metadata_path("a").exists());
        assert!(!store.index_path("a").exists());
    }

    #[test]
    fn test_uninstall_keeps_non_empty_directories() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let store = MetadataStore::new(root);
        install_fake(root, &store, "a", &["include/a.h"]);
        std::fs::write(root.join("include/other.h"), "").unwrap();
        let mut index = store.load_index("a").unwrap();
        index.push("include".to_string());
        store.save_index("a", &index).unwrap();

        uninstall(root, &store, "a").unwrap();
        assert!(root.join("include/other.h").exists());
    }

    #[test]
    fn test_uninstall_removes_nested_directories() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let store = MetadataStore::new(root);
        install_fake(root, &store, "a", &["include/foo/bar/x.h"]);
        std::fs::write(root.join("include/keep.h"), "").unwrap();
        let mut index = vec![
            "include/foo".to_string(),
            "include/foo/bar".to_string(),
        ];
        index.extend(store.load_index("a").unwrap());
        store.save_index("a", &index).unwrap();

        let report = uninstall(root, &store, "a").unwrap();
        assert!(!root.join("include/foo").exists());
        assert!(root.join("include/keep.h").exists());
        assert_eq!(report.removed_dirs, 2);
    }

    #[test]
    fn test_uninstall_removes_symlinks_not_targets() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let store = MetadataStore::new(root);
        install_fake(root, &store, "a", &[]);
        std::fs::create_dir_all(root.join("lib64")).unwrap();
        std::fs::write(root.join("lib64/libkeep.so"), "").unwrap();
        std::os::unix::fs::symlink("libkeep.so", root.join("lib64/liba.so")).unwrap();
        let mut index = store.load_index("a").unwrap();
        index.push("lib64/liba.so".to_string());
        store.save_index("a", &index).unwrap();

        uninstall(root, &store, "a").unwrap();
        assert!(root.join("lib64/libkeep.so").exists());
        assert!(std::fs::symlink_metadata(root.join("lib64/liba.so")).is_err());
    }

    #[test]
    fn test_uninstall_not_installed_fails() {
        let temp = TempDir::new().unwrap();
        let store = MetadataStore::new(temp.path());
        assert!(uninstall(temp.path(), &store, "ghost").is_err());
    }
}
