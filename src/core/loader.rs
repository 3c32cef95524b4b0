//! Configuration loading
//!
//! Expands the YAML templates of `<dotdir>/config` into one document and
//! caches the parsed result, keyed by a hash of every file in the
//! configuration directory.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;
use sha1::{Digest, Sha1};

use crate::config::defaults::ENV_TEMPLATER;
use crate::error::{ConfigError, OrchestraError};
use crate::infra::filesystem;

/// Name of the parsed-configuration cache
pub const CONFIG_CACHE_JSON: &str = "config_cache.json";

/// Name of the human-readable expanded configuration
pub const CONFIG_CACHE_YML: &str = "config_cache.yml";

/// Produces a single YAML document out of a directory of templates
pub trait TemplateExpander {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Expand every template in `config_dir`
    fn expand(&self, config_dir: &Path) -> Result<String, ConfigError>;
}

/// Expander driving the `ytt` templating tool
#[derive(Debug, Default)]
pub struct YttExpander;

impl TemplateExpander for YttExpander {
    fn name(&self) -> &'static str {
        "ytt"
    }

    fn expand(&self, config_dir: &Path) -> Result<String, ConfigError> {
        let output = Command::new("ytt")
            .arg("--ignore-unknown-comments")
            .arg("-f")
            .arg(config_dir)
            .output()
            .map_err(|e| ConfigError::Template {
                message: format!("failed to run ytt: {e}"),
            })?;
        if !output.status.success() {
            return Err(ConfigError::Template {
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        String::from_utf8(output.stdout).map_err(|e| ConfigError::Template {
            message: format!("ytt produced invalid UTF-8: {e}"),
        })
    }
}

/// Expander without templating: deep-merges every `*.yml`/`*.yaml` file in
/// sorted path order. Mappings merge recursively, later values win otherwise.
#[derive(Debug, Default)]
pub struct PlainExpander;

impl TemplateExpander for PlainExpander {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn expand(&self, config_dir: &Path) -> Result<String, ConfigError> {
        let mut merged = YamlValue::Null;
        for path in config_files(config_dir)? {
            let is_yaml = path
                .extension()
                .is_some_and(|ext| ext == "yml" || ext == "yaml");
            if !is_yaml {
                continue;
            }
            let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            let document: YamlValue = serde_yaml::from_str(&content).map_err(|e| {
                ConfigError::Template {
                    message: format!("{}: {e}", path.display()),
                }
            })?;
            merge_yaml(&mut merged, document);
        }
        serde_yaml::to_string(&merged).map_err(|source| ConfigError::Parse { source })
    }
}

/// Recursively merge `overlay` into `base`
pub fn merge_yaml(base: &mut YamlValue, overlay: YamlValue) {
    match (base, overlay) {
        (YamlValue::Mapping(base_map), YamlValue::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (_, YamlValue::Null) => {}
        (base, overlay) => *base = overlay,
    }
}

/// Pick the expander according to `ORCHESTRA_TEMPLATER` (`auto`, `ytt`, `plain`)
pub fn select_expander() -> Result<Box<dyn TemplateExpander>, ConfigError> {
    let choice = std::env::var(ENV_TEMPLATER).unwrap_or_else(|_| "auto".to_string());
    match choice.as_str() {
        "ytt" => Ok(Box::new(YttExpander)),
        "plain" => Ok(Box::new(PlainExpander)),
        "auto" | "" => {
            if which::which("ytt").is_ok() {
                Ok(Box::new(YttExpander))
            } else {
                tracing::debug!("ytt not found, using the plain YAML expander");
                Ok(Box::new(PlainExpander))
            }
        }
        other => Err(ConfigError::Template {
            message: format!("unknown templater '{other}' in {ENV_TEMPLATER}"),
        }),
    }
}

/// Every regular file under `config_dir`, sorted by path
fn config_files(config_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(config_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| ConfigError::Io {
            path: e.path().unwrap_or(config_dir).to_path_buf(),
            source: e.into(),
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// SHA-1 over the sorted `(relative path, content hash)` pairs of every file
/// in the configuration directory
pub fn config_hash(config_dir: &Path) -> Result<String, ConfigError> {
    let mut hasher = Sha1::new();
    for path in config_files(config_dir)? {
        let content = std::fs::read(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let relative = path.strip_prefix(config_dir).unwrap_or(&path);
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0]);
        hasher.update(hex::encode(Sha1::digest(&content)).as_bytes());
        hasher.update(b"\n");
    }
    Ok(hex::encode(hasher.finalize()))
}

/// On-disk cache of the parsed configuration
#[derive(Debug, Serialize, Deserialize)]
struct ConfigCache {
    config_hash: String,
    parsed: serde_json::Value,
}

/// Result of loading the configuration directory
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Hash of the configuration directory
    pub config_hash: String,
    /// Parsed expanded document
    pub parsed: serde_json::Value,
    /// Whether the value came from the cache
    pub from_cache: bool,
}

/// Load the parsed configuration, expanding templates only when the
/// configuration directory changed since the last run
pub fn load_config(
    dotdir: &Path,
    expander: &dyn TemplateExpander,
) -> Result<LoadedConfig, OrchestraError> {
    let config_dir = dotdir.join("config");
    let config_hash = config_hash(&config_dir)?;
    let cache_path = dotdir.join(CONFIG_CACHE_JSON);

    if let Some(content) = filesystem::read_optional(&cache_path)? {
        match serde_json::from_str::<ConfigCache>(&content) {
            Ok(cache) if cache.config_hash == config_hash => {
                tracing::debug!("Configuration cache hit ({config_hash})");
                return Ok(LoadedConfig {
                    config_hash,
                    parsed: cache.parsed,
                    from_cache: true,
                });
            }
            Ok(_) => tracing::debug!("Configuration changed, expanding templates"),
            Err(e) => tracing::warn!("Ignoring malformed configuration cache: {e}"),
        }
    }

    tracing::info!("Expanding configuration with {}", expander.name());
    let expanded = expander.expand(&config_dir)?;
    let parsed: serde_json::Value =
        serde_yaml::from_str(&expanded).map_err(|source| ConfigError::Parse { source })?;

    filesystem::write_atomic(&dotdir.join(CONFIG_CACHE_YML), expanded.as_bytes())?;
    let cache = ConfigCache {
        config_hash: config_hash.clone(),
        parsed,
    };
    let serialized = serde_json::to_vec(&cache).map_err(|source| ConfigError::Cache {
        path: cache_path.clone(),
        source,
    })?;
    filesystem::write_atomic(&cache_path, &serialized)?;

    Ok(LoadedConfig {
        config_hash,
        parsed: cache.parsed,
        from_cache: false,
    })
}
