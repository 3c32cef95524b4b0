//! Test utilities
//!
//! Proptest generators and an in-memory VCS for tests that need a
//! [`Workspace`] without touching the network.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tempfile::TempDir;

use crate::core::configuration::Configuration;
use crate::core::hashing::sha1_hex;
use crate::core::remote_heads::Heads;
use crate::core::schema::RawConfig;
use crate::core::workspace::Workspace;
use crate::infra::git::{CloneOptions, GitError, Vcs};

pub mod generators {
    use proptest::prelude::*;

    /// Component name, `/` allowed
    pub fn component_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9/_-]{0,12}"
    }

    /// Build name
    pub fn build_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_-]{0,8}"
    }

    /// Full git commit hash
    pub fn commit_hash() -> impl Strategy<Value = String> {
        "[0-9a-f]{40}"
    }

    /// Branch name, `/` allowed
    pub fn branch_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9/_-]{0,20}"
    }
}

/// In-memory [`Vcs`] double
#[derive(Default)]
pub struct FakeVcs {
    /// URL -> heads answered by `ls_remote`
    pub remotes: BTreeMap<String, Heads>,
    /// Every mutating call, in order
    pub calls: Mutex<Vec<String>>,
}

impl Vcs for FakeVcs {
    fn ls_remote(&self, url: &str) -> Result<BTreeMap<String, String>, GitError> {
        self.calls.lock().unwrap().push(format!("ls-remote {url}"));
        self.remotes.get(url).cloned().ok_or_else(|| GitError::CommandFailed {
            command: format!("git ls-remote {url}"),
            stderr: "not found".to_string(),
        })
    }

    fn clone_repo(&self, url: &str, dst: &Path, _options: &CloneOptions) -> Result<(), GitError> {
        self.calls.lock().unwrap().push(format!("clone {url}"));
        std::fs::create_dir_all(dst).unwrap();
        Ok(())
    }

    fn pull_ff(&self, dir: &Path) -> Result<(), GitError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("pull {}", dir.display()));
        Ok(())
    }

    fn rev_parse(&self, _dir: &Path, _reference: &str) -> Result<String, GitError> {
        Ok("local".to_string())
    }

    fn current_branch(&self, _dir: &Path) -> Result<Option<String>, GitError> {
        Ok(Some("master".to_string()))
    }

    fn lfs_fetch(&self, _dir: &Path, _paths: &[PathBuf]) -> Result<(), GitError> {
        Ok(())
    }
}

/// Workspace over a JSON configuration, its dotdir inside `temp`
pub fn workspace(temp: &TempDir, value: serde_json::Value, vcs: FakeVcs) -> Workspace {
    let dotdir = temp.path().join(".orchestra");
    std::fs::create_dir_all(&dotdir).unwrap();
    // Edited configurations must not reuse cached hash material
    let config_hash = sha1_hex(value.to_string());
    let raw = RawConfig::from_value(value).unwrap();
    let config = Configuration::from_raw(&dotdir, config_hash, raw).unwrap();
    Workspace::new(config, Box::new(vcs)).unwrap()
}

#[cfg(test)]
mod tests {
    use super::generators::*;
    use crate::core::dependency::DependencySpec;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_generated_names_are_valid_dependencies(
            component in component_name(),
            build in build_name(),
        ) {
            prop_assert!(DependencySpec::parse(&component).is_ok());
            let spec = format!("{component}@{build}");
            prop_assert!(DependencySpec::parse(&spec).is_ok());
        }

        #[test]
        fn prop_commits_are_sha1_sized(commit in commit_hash()) {
            prop_assert_eq!(commit.len(), 40);
        }
    }
}
