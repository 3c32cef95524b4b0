//! Binary archives
//!
//! Content-addressed tarballs of staged roots, stored in git-lfs
//! repositories under `<architecture>/<component>/<build>/`:
//!
//! - `<commit>_<recursive-hash>.tar.gz`: the archive
//! - `<commit>_<recursive-hash>.hash-material.yml`: what was hashed
//! - `<branch>_<config-branch>.tar.gz`: convenience symlinks to the archive
//!   built from the tip of `<branch>`

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use similar::TextDiff;
use walkdir::WalkDir;

use crate::config::defaults::{
    ARCHITECTURE, BINARY_ARCHIVE_SUFFIX, HASH_MATERIAL_SUFFIX, NO_REPOSITORY,
};
use crate::core::component::Component;
use crate::core::configuration::Configuration;
use crate::core::remote_heads::{branches_at, Heads};
use crate::error::OrchestraError;
use crate::infra::archive;
use crate::infra::filesystem;
use crate::infra::git::{find_repository_root, is_lfs_pointer, Vcs};

/// `<commit-or-none>_<hash>`
pub fn archive_stem(commit: Option<&str>, recursive_hash: &str) -> String {
    format!("{}_{recursive_hash}", commit.unwrap_or(NO_REPOSITORY))
}

/// `<commit-or-none>_<hash>.tar.gz`
pub fn archive_name(commit: Option<&str>, recursive_hash: &str) -> String {
    format!("{}{BINARY_ARCHIVE_SUFFIX}", archive_stem(commit, recursive_hash))
}

/// Location of an archive inside a repository
pub fn relative_archive_path(component: &str, build: &str, name: &str) -> PathBuf {
    Path::new(ARCHITECTURE).join(component).join(build).join(name)
}

/// Hash material file stored next to an archive
pub fn material_path(archive: &Path) -> PathBuf {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.strip_suffix(BINARY_ARCHIVE_SUFFIX).unwrap_or(&name);
    archive.with_file_name(format!("{stem}{HASH_MATERIAL_SUFFIX}"))
}

/// Name of a convenience symlink: slashes in branch names become dashes
pub fn symlink_name(branch: &str, config_branch: &str) -> String {
    format!(
        "{}_{}{BINARY_ARCHIVE_SUFFIX}",
        branch.replace('/', "-"),
        config_branch.replace('/', "-")
    )
}

/// One archive found in a repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub repository: String,
    /// Path relative to the repository
    pub relative: PathBuf,
    pub component: String,
    pub build: String,
    /// `<commit>_<hash>.tar.gz`
    pub name: String,
}

impl ArchiveEntry {
    /// Recursive hash encoded in the name
    pub fn recursive_hash(&self) -> Option<&str> {
        self.name
            .strip_suffix(BINARY_ARCHIVE_SUFFIX)?
            .rsplit_once('_')
            .map(|(_, hash)| hash)
    }
}

/// The configured binary archive repositories, in priority order
#[derive(Debug, Clone)]
pub struct BinaryArchives {
    repositories: Vec<(String, PathBuf)>,
}

impl BinaryArchives {
    pub fn new(config: &Configuration) -> Self {
        Self {
            repositories: config
                .binary_archive_remotes
                .iter()
                .map(|remote| (remote.name.clone(), config.paths.binary_archive_repo(&remote.name)))
                .collect(),
        }
    }

    /// Local clones, in priority order
    pub fn repositories(&self) -> &[(String, PathBuf)] {
        &self.repositories
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }

    /// Repository receiving new archives of `component`: the one it names,
    /// else the first configured
    pub fn target_repository(&self, component: &Component) -> Option<&(String, PathBuf)> {
        match &component.binary_archives {
            Some(name) => self.repositories.iter().find(|(n, _)| n == name),
            None => self.repositories.first(),
        }
    }

    /// First existing copy of `relative` across repositories
    pub fn locate(&self, relative: &Path) -> Option<PathBuf> {
        self.repositories
            .iter()
            .map(|(_, dir)| dir.join(relative))
            .find(|path| path.exists())
    }

    /// Make sure `path` holds the archive itself and not an LFS pointer
    pub fn fetch(&self, vcs: &dyn Vcs, path: &Path) -> Result<(), OrchestraError> {
        if !is_lfs_pointer(path) {
            return Ok(());
        }
        let repository = find_repository_root(path).ok_or_else(|| {
            OrchestraError::Generic(format!("{} is not inside a git repository", path.display()))
        })?;
        let relative = path.strip_prefix(&repository).unwrap_or(path).to_path_buf();
        tracing::info!("Fetching {}", relative.display());
        vcs.lfs_fetch(&repository, &[relative])?;
        Ok(())
    }

    /// Every archive of every repository (symlinks excluded)
    pub fn list(&self) -> Result<Vec<ArchiveEntry>, OrchestraError> {
        let mut entries = Vec::new();
        for (name, dir) in &self.repositories {
            let base = dir.join(ARCHITECTURE);
            if !base.is_dir() {
                continue;
            }
            for entry in WalkDir::new(&base).follow_links(false).sort_by_file_name() {
                let entry = entry.map_err(|e| {
                    let path = e.path().unwrap_or(&base).to_path_buf();
                    OrchestraError::io(path, e.into())
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let file_name = entry.file_name().to_string_lossy().into_owned();
                if !file_name.ends_with(BINARY_ARCHIVE_SUFFIX) {
                    continue;
                }
                let Ok(inner) = entry.path().strip_prefix(&base) else {
                    continue;
                };
                // <component...>/<build>/<name>
                let Some(build_dir) = inner.parent() else {
                    continue;
                };
                let (Some(build), Some(component)) = (build_dir.file_name(), build_dir.parent())
                else {
                    continue;
                };
                if component.as_os_str().is_empty() {
                    continue;
                }
                entries.push(ArchiveEntry {
                    repository: name.clone(),
                    relative: Path::new(ARCHITECTURE).join(inner),
                    component: component.to_string_lossy().into_owned(),
                    build: build.to_string_lossy().into_owned(),
                    name: file_name,
                });
            }
        }
        Ok(entries)
    }

    /// Absolute path of a listed archive
    pub fn path_of(&self, entry: &ArchiveEntry) -> Option<PathBuf> {
        self.repositories
            .iter()
            .find(|(name, _)| name == &entry.repository)
            .map(|(_, dir)| dir.join(&entry.relative))
    }

    /// Every hash material stored for `component@build`, all repositories
    pub fn materials(&self, component: &str, build: &str) -> Vec<PathBuf> {
        let mut found = Vec::new();
        for (_, dir) in &self.repositories {
            let build_dir = dir.join(relative_archive_path(component, build, ""));
            let Ok(read_dir) = std::fs::read_dir(&build_dir) else {
                continue;
            };
            let mut paths: Vec<PathBuf> = read_dir
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .is_some_and(|n| n.to_string_lossy().ends_with(HASH_MATERIAL_SUFFIX))
                })
                .collect();
            paths.sort();
            found.extend(paths);
        }
        found
    }

    /// Unified diff between `material` and the most similar stored material
    /// of `component@build`. Every diff is logged at debug level.
    pub fn closest_material_diff(
        &self,
        component: &str,
        build: &str,
        material: &str,
    ) -> Option<String> {
        let mut best: Option<(usize, String)> = None;
        for path in self.materials(component, build) {
            let Ok(other) = std::fs::read_to_string(&path) else {
                continue;
            };
            let diff = TextDiff::from_lines(other.as_str(), material);
            let changes = diff
                .iter_all_changes()
                .filter(|c| c.tag() != similar::ChangeTag::Equal)
                .count();
            let name = path.display().to_string();
            let rendered = diff
                .unified_diff()
                .header(&name, "current")
                .to_string();
            tracing::debug!("Hash material diff against {name}:\n{rendered}");
            if best.as_ref().map_or(true, |(n, _)| changes < *n) {
                best = Some((changes, rendered));
            }
        }
        best.map(|(_, diff)| diff)
    }
}

/// Write an archive of `staged_root` and its hash material
pub fn create(staged_root: &Path, archive_path: &Path, material: &str) -> Result<(), OrchestraError> {
    tracing::info!("Creating binary archive {}", archive_path.display());
    archive::create_tar_gz(staged_root, archive_path)?;
    filesystem::write_atomic(&material_path(archive_path), material.as_bytes())
}

/// Point every branch at `commit` to `archive_name`, next to it.
///
/// Components without a repository get a single `none_<config-branch>` link.
/// Returns the created links.
pub fn update_symlinks(
    archive_dir: &Path,
    archive_name: &str,
    heads: Option<&Heads>,
    commit: Option<&str>,
    config_branch: &str,
) -> Result<Vec<PathBuf>, OrchestraError> {
    if !archive_dir.join(archive_name).exists() {
        return Ok(Vec::new());
    }
    let branches: Vec<&str> = match (heads, commit) {
        (Some(heads), Some(commit)) => branches_at(heads, commit),
        (None, _) | (_, None) => vec![NO_REPOSITORY],
    };

    let mut links = Vec::new();
    for branch in branches {
        let link = archive_dir.join(symlink_name(branch, config_branch));
        match filesystem::symlink_atomic(Path::new(archive_name), &link) {
            Ok(()) => links.push(link),
            Err(e) => tracing::warn!("Could not create {}: {e}", link.display()),
        }
    }
    Ok(links)
}

/// Archive names targeted by a convenience symlink in any repository
pub fn symlink_targets(archives: &BinaryArchives) -> BTreeSet<PathBuf> {
    let mut targets = BTreeSet::new();
    for (_, dir) in archives.repositories() {
        for entry in WalkDir::new(dir.join(ARCHITECTURE))
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
        {
            if !entry.path_is_symlink() {
                continue;
            }
            if let Ok(target) = std::fs::read_link(entry.path()) {
                let parent = entry.path().parent().unwrap_or(dir);
                targets.insert(parent.join(target));
            }
        }
    }
    targets
}
