//! Install metadata store
//!
//! Every installed component owns, under `<root>/share/orchestra/`:
//!
//! - `<component>.json`: the [`InstallMetadata`] record
//! - `<component>.idx`: root-relative paths of every file it deposited
//! - `<component>.license`: optional license copy
//!
//! Reads tolerate missing files.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::defaults::METADATA_DIR;
use crate::error::{MetadataError, OrchestraError};
use crate::infra::filesystem;

/// How an installed build was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallSource {
    #[serde(rename = "build")]
    Build,
    #[serde(rename = "binary archives")]
    BinaryArchives,
}

/// Install record of a component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallMetadata {
    pub component: String,
    pub build: String,
    pub self_hash: String,
    pub recursive_hash: String,
    pub source: InstallSource,
    /// Installed on explicit request rather than as a dependency
    pub manually_installed: bool,
    /// Install duration in seconds
    pub install_time: f64,
    /// Archive path relative to its repository
    #[serde(default)]
    pub binary_archive_path: Option<String>,
}

/// Accessor for the metadata directory of an orchestra root
#[derive(Debug, Clone)]
pub struct MetadataStore {
    root: PathBuf,
}

impl MetadataStore {
    /// Store for the orchestra root `root`
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn dir(&self) -> PathBuf {
        self.root.join(METADATA_DIR)
    }

    /// `share/orchestra/<component>.json`, relative to the root
    pub fn relative_metadata_path(component: &str) -> PathBuf {
        Path::new(METADATA_DIR).join(format!("{component}.json"))
    }

    /// `share/orchestra/<component>.idx`, relative to the root
    pub fn relative_index_path(component: &str) -> PathBuf {
        Path::new(METADATA_DIR).join(format!("{component}.idx"))
    }

    /// `share/orchestra/<component>.license`, relative to the root
    pub fn relative_license_path(component: &str) -> PathBuf {
        Path::new(METADATA_DIR).join(format!("{component}.license"))
    }

    pub fn metadata_path(&self, component: &str) -> PathBuf {
        self.root.join(Self::relative_metadata_path(component))
    }

    pub fn index_path(&self, component: &str) -> PathBuf {
        self.root.join(Self::relative_index_path(component))
    }

    /// Metadata of an installed component, `None` when not installed
    pub fn load(&self, component: &str) -> Result<Option<InstallMetadata>, MetadataError> {
        let path = self.metadata_path(component);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(MetadataError::Io { path, source }),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| MetadataError::Parse { path, source })
    }

    /// Whether any build of `component` is installed
    pub fn is_installed(&self, component: &str) -> bool {
        self.metadata_path(component).exists()
    }

    /// Write the metadata record
    pub fn save(&self, metadata: &InstallMetadata) -> Result<(), OrchestraError> {
        let path = self.metadata_path(&metadata.component);
        let content = serde_json::to_vec_pretty(metadata)
            .map_err(|source| MetadataError::Parse {
                path: path.clone(),
                source,
            })?;
        filesystem::write_atomic(&path, &content)
    }

    /// Root-relative paths listed in the file list
    pub fn load_index(&self, component: &str) -> Result<Vec<String>, MetadataError> {
        let path = self.index_path(component);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(content
                .lines()
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(MetadataError::NotInstalled {
                    component: component.to_string(),
                })
            }
            Err(source) => Err(MetadataError::Io { path, source }),
        }
    }

    /// Write the file list
    pub fn save_index(&self, component: &str, paths: &[String]) -> Result<(), OrchestraError> {
        let mut content = paths.join("\n");
        content.push('\n');
        filesystem::write_atomic(&self.index_path(component), content.as_bytes())
    }

    /// Metadata of every installed component, sorted by component name
    pub fn installed(&self) -> Result<Vec<InstallMetadata>, MetadataError> {
        let dir = self.dir();
        let mut records = Vec::new();
        for entry in walkdir::WalkDir::new(&dir).min_depth(1).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.io_error().is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound) => {
                    return Ok(records)
                }
                Err(e) => {
                    return Err(MetadataError::Io {
                        path: dir,
                        source: e.into(),
                    })
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file() || !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            let Ok(relative) = path.strip_prefix(&dir) else {
                continue;
            };
            let component = relative.with_extension("").to_string_lossy().into_owned();
            if let Some(metadata) = self.load(&component)? {
                records.push(metadata);
            }
        }
        records.sort_by(|a, b| a.component.cmp(&b.component));
        Ok(records)
    }
}
