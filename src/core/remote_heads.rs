//! Remote HEAD cache
//!
//! `remote_refs_cache.json` maps each component to the `{branch -> commit}`
//! heads of its repository. It is rebuilt by `update` and lets orchestra
//! identify a component's commit without network traffic.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, OrchestraError};
use crate::infra::filesystem;

/// Branch -> commit
pub type Heads = BTreeMap<String, String>;

/// In-memory view of the remote HEAD cache
#[derive(Debug, Clone, Default)]
pub struct RemoteHeadsCache {
    path: PathBuf,
    heads: BTreeMap<String, Heads>,
}

impl RemoteHeadsCache {
    /// Load the cache; a missing or malformed file yields an empty cache
    pub fn load(path: &Path) -> Result<Self, OrchestraError> {
        let heads = match filesystem::read_optional(path)? {
            Some(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring malformed remote heads cache {}: {e}", path.display());
                BTreeMap::new()
            }),
            None => BTreeMap::new(),
        };
        Ok(Self {
            path: path.to_path_buf(),
            heads,
        })
    }

    /// Cached heads of a component
    pub fn get(&self, component: &str) -> Option<&Heads> {
        self.heads.get(component)
    }

    /// Replace the heads of a component
    pub fn set(&mut self, component: &str, heads: Heads) {
        self.heads.insert(component.to_string(), heads);
    }

    /// Every cached component
    pub fn entries(&self) -> &BTreeMap<String, Heads> {
        &self.heads
    }

    /// Write the cache atomically
    pub fn save(&self) -> Result<(), OrchestraError> {
        let content = serde_json::to_vec_pretty(&self.heads).map_err(|source| ConfigError::Cache {
            path: self.path.clone(),
            source,
        })?;
        filesystem::write_atomic(&self.path, &content)
    }

    /// Delete the cache file
    pub fn remove(path: &Path) -> Result<(), OrchestraError> {
        filesystem::remove_file(path)
    }
}

/// Commit of the highest-priority branch present in `heads`
pub fn preferred_commit<'a>(heads: &'a Heads, branches: &[String]) -> Option<(&'a str, &'a str)> {
    branches.iter().find_map(|branch| {
        heads
            .get_key_value(branch)
            .map(|(b, c)| (b.as_str(), c.as_str()))
    })
}

/// Branches of `heads` pointing at `commit`
pub fn branches_at<'a>(heads: &'a Heads, commit: &str) -> Vec<&'a str> {
    heads
        .iter()
        .filter(|(_, c)| c.as_str() == commit)
        .map(|(b, _)| b.as_str())
        .collect()
}
