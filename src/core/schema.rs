//! Configuration schema
//!
//! Strict serde representation of the expanded configuration document.
//! Unknown keys are rejected; semantic checks (dependencies resolve, default
//! builds exist) happen in [`crate::core::configuration`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ConfigError;

/// Root of the expanded configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    /// Oldest orchestra able to load this configuration
    #[serde(default)]
    pub min_orchestra_version: Option<String>,

    /// Directory overrides
    #[serde(default)]
    pub paths: RawPaths,

    /// Base URLs component repositories are cloned from, in priority order
    #[serde(default)]
    pub remote_base_urls: Vec<BTreeMap<String, String>>,

    /// Binary archive repositories, in priority order
    #[serde(default)]
    pub binary_archives: Vec<BTreeMap<String, String>>,

    /// Branch priority used to identify a component's commit
    #[serde(default)]
    pub branches: Option<Vec<String>>,

    /// Entries prepended to PATH for every script
    #[serde(default)]
    pub add_to_path: Vec<String>,

    /// User environment, exported in order (`-NAME` unsets)
    #[serde(default)]
    pub environment: Vec<BTreeMap<String, Scalar>>,

    /// Component definitions
    #[serde(default)]
    pub components: BTreeMap<String, RawComponent>,
}

/// Directory overrides, relative to the parent of the dotdir
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RawPaths {
    #[serde(default)]
    pub orchestra_root: Option<String>,
    #[serde(default)]
    pub sources_dir: Option<String>,
    #[serde(default)]
    pub builds_dir: Option<String>,
    #[serde(default)]
    pub tmproot: Option<String>,
    #[serde(default)]
    pub source_archives: Option<String>,
    #[serde(default)]
    pub binary_archives: Option<String>,
}

/// A component definition
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RawComponent {
    /// Repository name, appended to each remote base URL
    #[serde(default)]
    pub repository: Option<String>,

    /// License file, relative to the source (or build) directory
    #[serde(default)]
    pub license: Option<String>,

    /// Default build (lexicographically first when absent)
    #[serde(default)]
    pub default_build: Option<String>,

    /// Skip the post-install rewrites
    #[serde(default)]
    pub skip_post_install: bool,

    /// Never install this component from a binary archive
    #[serde(default)]
    pub build_from_source: bool,

    /// Binary archive repository receiving new archives
    #[serde(default)]
    pub binary_archives: Option<String>,

    /// Extra PATH entries for this component's scripts
    #[serde(default)]
    pub add_to_path: Vec<String>,

    /// Builds by name
    pub builds: BTreeMap<String, RawBuild>,
}

/// A build definition
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RawBuild {
    #[serde(default)]
    pub configure: String,

    #[serde(default)]
    pub install: String,

    /// Disable assertions in installed headers
    #[serde(default)]
    pub ndebug: bool,

    /// Dependencies of both configure and install
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Dependencies of configure only
    #[serde(default)]
    pub build_dependencies: Vec<String>,
}

/// A YAML scalar used as an environment value
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Scalar {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl Scalar {
    /// Shell-visible string form
    pub fn to_shell_string(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Null => String::new(),
        }
    }
}

impl RawConfig {
    /// Deserialize from the parsed (JSON) form of the expanded document
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        let value = if value.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            value
        };
        serde_json::from_value(value).map_err(|e| ConfigError::Schema {
            message: e.to_string(),
        })
    }
}

/// Flatten a list of single-entry maps, preserving order
pub fn single_entries<V: Clone>(
    section: &str,
    list: &[BTreeMap<String, V>],
) -> Result<Vec<(String, V)>, ConfigError> {
    list.iter()
        .map(|entry| {
            let mut iter = entry.iter();
            match (iter.next(), iter.next()) {
                (Some((key, value)), None) => Ok((key.clone(), value.clone())),
                _ => Err(ConfigError::Schema {
                    message: format!("every entry of '{section}' must have exactly one key"),
                }),
            }
        })
        .collect()
}
