//! Content hashing
//!
//! - `self_hash(build)`: SHA-1 of the canonical YAML of one build.
//! - `recursive_hash(component)`: SHA-1 of the canonical YAML of every
//!   component in its transitive dependency set, sorted by name.
//!
//! The recursive hash identifies binary archives and decides whether an
//! installed component is up to date. Its material is cached on disk under
//! `<dotdir>/hash-material/`, keyed by the configuration hash and the
//! commits of the cloneable dependencies.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::config::defaults::HASH_MATERIAL_VERSION;
use crate::core::component::{Build, Component};
use crate::core::configuration::Configuration;
use crate::error::{ConfigError, OrchestraError};
use crate::infra::filesystem;

/// Hex SHA-1 of some bytes
pub fn sha1_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(Sha1::digest(data.as_ref()))
}

/// Canonical form of a build. Fields are declared in sorted order.
#[derive(Debug, Serialize, PartialEq)]
pub struct SerializedBuild<'a> {
    pub build_dependencies: Vec<String>,
    pub configure: &'a str,
    pub dependencies: Vec<String>,
    pub install: &'a str,
    pub ndebug: bool,
}

/// Canonical form of a component. Fields are declared in sorted order.
#[derive(Debug, Serialize, PartialEq)]
pub struct SerializedComponent<'a> {
    pub add_to_path: &'a [String],
    pub builds: BTreeMap<&'a str, SerializedBuild<'a>>,
    pub commit: Option<String>,
    pub default_build: &'a str,
    pub license: Option<&'a str>,
    pub repository: Option<&'a str>,
    pub skip_post_install: bool,
}

pub fn serialize_build(build: &Build) -> SerializedBuild<'_> {
    SerializedBuild {
        build_dependencies: build.build_dependencies.iter().map(ToString::to_string).collect(),
        configure: &build.configure,
        dependencies: build.dependencies.iter().map(ToString::to_string).collect(),
        install: &build.install,
        ndebug: build.ndebug,
    }
}

pub fn serialize_component(component: &Component, commit: Option<String>) -> SerializedComponent<'_> {
    SerializedComponent {
        add_to_path: &component.add_to_path,
        builds: component
            .builds
            .values()
            .map(|b| (b.name.as_str(), serialize_build(b)))
            .collect(),
        commit,
        default_build: &component.default_build,
        license: component.license.as_deref(),
        repository: component.repository.as_deref(),
        skip_post_install: component.skip_post_install,
    }
}

fn to_yaml<T: Serialize>(value: &T) -> Result<String, ConfigError> {
    serde_yaml::to_string(value).map_err(|source| ConfigError::Parse { source })
}

/// Hash of a single build definition
pub fn self_hash(build: &Build) -> Result<String, ConfigError> {
    Ok(sha1_hex(to_yaml(&serialize_build(build))?))
}

/// Components reachable from `component` through the dependencies of any
/// of its builds, `component` included. Choice nodes are seen through to
/// the component they choose among.
pub fn transitive_dependencies(config: &Configuration, component: &str) -> BTreeSet<String> {
    let mut visited = BTreeSet::new();
    let mut stack = vec![component.to_string()];
    while let Some(name) = stack.pop() {
        if !visited.insert(name.clone()) {
            continue;
        }
        if let Some(component) = config.components.get(&name) {
            for spec in component.all_dependencies() {
                if !visited.contains(&spec.component) {
                    stack.push(spec.component.clone());
                }
            }
        }
    }
    visited
}

/// Provides the current commit of a component's repository
pub trait CommitSource {
    /// `None` for components without a repository or an unknown commit
    fn commit(&self, component: &Component) -> Result<Option<String>, OrchestraError>;
}

/// Canonical YAML of the transitive dependency set, given the commits of
/// the cloneable components
pub fn recursive_hash_material(
    config: &Configuration,
    component: &str,
    commits: &BTreeMap<String, Option<String>>,
) -> Result<String, ConfigError> {
    let serialized: Vec<SerializedComponent<'_>> = transitive_dependencies(config, component)
        .iter()
        .filter_map(|name| config.components.get(name))
        .map(|c| serialize_component(c, commits.get(&c.name).cloned().flatten()))
        .collect();
    to_yaml(&serialized)
}

/// First line of a cached material file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MaterialHeader {
    pub version: u32,
    pub config_hash: String,
    pub dep_commits: BTreeMap<String, Option<String>>,
}

/// Escape a component name into a single file name
pub fn escape_component_name(name: &str) -> String {
    name.replace('%', "%25").replace('/', "%2F")
}

/// On-disk cache of recursive hash material
#[derive(Debug, Clone)]
pub struct HashMaterialCache {
    dir: PathBuf,
}

impl HashMaterialCache {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path(&self, component: &str) -> PathBuf {
        self.dir.join(escape_component_name(component))
    }

    /// Cached material, if its header matches `expected`
    pub fn load(
        &self,
        component: &str,
        expected: &MaterialHeader,
    ) -> Result<Option<String>, OrchestraError> {
        let Some(content) = filesystem::read_optional(&self.path(component))? else {
            return Ok(None);
        };
        let Some((header_line, material)) = content.split_once('\n') else {
            return Ok(None);
        };
        match serde_json::from_str::<MaterialHeader>(header_line) {
            Ok(header) if &header == expected => Ok(Some(material.to_string())),
            Ok(_) => {
                tracing::debug!("Stale hash material for {component}");
                Ok(None)
            }
            Err(e) => {
                tracing::debug!("Malformed hash material header for {component}: {e}");
                Ok(None)
            }
        }
    }

    /// Store material with its header
    pub fn store(
        &self,
        component: &str,
        header: &MaterialHeader,
        material: &str,
    ) -> Result<(), OrchestraError> {
        let path = self.path(component);
        let header_line = serde_json::to_string(header).map_err(|source| ConfigError::Cache {
            path: path.clone(),
            source,
        })?;
        let mut content = header_line;
        content.push('\n');
        content.push_str(material);
        filesystem::write_atomic(&path, content.as_bytes())
    }

    /// Material of `component`, reusing the cache when still valid
    pub fn material(
        &self,
        config: &Configuration,
        component: &str,
        commits: &dyn CommitSource,
    ) -> Result<String, OrchestraError> {
        let mut dep_commits = BTreeMap::new();
        for name in transitive_dependencies(config, component) {
            if let Some(dep) = config.components.get(&name) {
                if dep.is_cloneable() {
                    dep_commits.insert(name, commits.commit(dep)?);
                }
            }
        }
        let header = MaterialHeader {
            version: HASH_MATERIAL_VERSION,
            config_hash: config.config_hash.clone(),
            dep_commits,
        };

        if let Some(material) = self.load(component, &header)? {
            tracing::debug!("Hash material cache hit for {component}");
            return Ok(material);
        }

        let material = recursive_hash_material(config, component, &header.dep_commits)?;
        self.store(component, &header, &material)?;
        Ok(material)
    }

    /// Recursive hash of `component`
    pub fn recursive_hash(
        &self,
        config: &Configuration,
        component: &str,
        commits: &dyn CommitSource,
    ) -> Result<String, OrchestraError> {
        Ok(sha1_hex(self.material(config, component, commits)?))
    }
}
