//! Resolved configuration
//!
//! Built in two passes out of the validated document: first every component
//! and build is created, then cross-component dependency edges are checked
//! and turned into the [`ActionIndex`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::defaults::{DEFAULT_BRANCHES, DOTDIR_NAME, ENV_DOTDIR, METADATA_DIR};
use crate::core::action::{ActionIndex, ActionKind};
use crate::core::component::{safe_name, Build, Component};
use crate::core::dependency::{split_qualified, DependencySpec};
use crate::core::loader::{self, TemplateExpander};
use crate::core::schema::{single_entries, RawBuild, RawComponent, RawConfig, RawPaths};
use crate::core::version::check_min_orchestra_version;
use crate::error::{ConfigError, OrchestraError};

/// Canonical directories of an orchestra project
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestraPaths {
    /// The `.orchestra` directory
    pub dotdir: PathBuf,
    /// Shared prefix
    pub root: PathBuf,
    /// Component sources
    pub sources: PathBuf,
    /// Build directories
    pub builds: PathBuf,
    /// Staged install roots
    pub tmproot: PathBuf,
    /// Downloaded source tarballs
    pub source_archives: PathBuf,
    /// Cloned binary archive repositories
    pub binary_archives: PathBuf,
}

impl OrchestraPaths {
    /// Resolve the directory layout, relative overrides being relative to
    /// the parent of the dotdir
    pub fn new(dotdir: &Path, overrides: &RawPaths) -> Self {
        let base = dotdir.parent().unwrap_or(dotdir).to_path_buf();
        let pick = |value: &Option<String>, default: &str| base.join(value.as_deref().unwrap_or(default));
        Self {
            dotdir: dotdir.to_path_buf(),
            root: pick(&overrides.orchestra_root, "root"),
            sources: pick(&overrides.sources_dir, "sources"),
            builds: pick(&overrides.builds_dir, "build"),
            tmproot: pick(&overrides.tmproot, ".orchestra/tmproot"),
            source_archives: pick(&overrides.source_archives, ".orchestra/source_archives"),
            binary_archives: pick(&overrides.binary_archives, ".orchestra/binary-archives"),
        }
    }

    pub fn config_dir(&self) -> PathBuf {
        self.dotdir.join("config")
    }

    pub fn remote_heads_cache(&self) -> PathBuf {
        self.dotdir.join("remote_refs_cache.json")
    }

    pub fn hash_material_dir(&self) -> PathBuf {
        self.dotdir.join("hash-material")
    }

    /// `<root>/share/orchestra`
    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join(METADATA_DIR)
    }

    pub fn source_dir(&self, component: &str) -> PathBuf {
        self.sources.join(component)
    }

    pub fn build_dir(&self, component: &str, build: &str) -> PathBuf {
        self.builds.join(component).join(build)
    }

    /// Staged root of a build (`<tmproot>/<safe-build-name>`)
    pub fn tmproot_for(&self, qualified_build: &str) -> PathBuf {
        self.tmproot.join(safe_name(qualified_build))
    }

    /// Local clone of a binary archive repository
    pub fn binary_archive_repo(&self, name: &str) -> PathBuf {
        self.binary_archives.join(name)
    }
}

/// Find the dotdir: explicit path, `ORCHESTRA_DOTDIR`, or the first
/// `.orchestra` directory found walking up from `start`
pub fn find_dotdir(explicit: Option<&Path>, start: &Path) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(absolute(path, start));
    }
    if let Ok(path) = std::env::var(ENV_DOTDIR) {
        if !path.is_empty() {
            return Ok(absolute(Path::new(&path), start));
        }
    }
    start
        .ancestors()
        .map(|dir| dir.join(DOTDIR_NAME))
        .find(|candidate| candidate.is_dir())
        .ok_or_else(|| ConfigError::DotdirNotFound {
            start: start.to_path_buf(),
        })
}

fn absolute(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// A named remote (base URL or binary archive repository)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remote {
    pub name: String,
    pub url: String,
}

/// An entry of the user environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvEntry {
    /// `export NAME=value`
    Set { name: String, value: String },
    /// `unset NAME`
    Unset { name: String },
}

/// The resolved, read-only configuration of a project
#[derive(Debug, Clone)]
pub struct Configuration {
    pub paths: OrchestraPaths,
    /// Hash of the configuration directory
    pub config_hash: String,
    pub components: BTreeMap<String, Component>,
    /// Base URLs for component repositories, in priority order
    pub remotes: Vec<Remote>,
    /// Binary archive repositories, in priority order
    pub binary_archive_remotes: Vec<Remote>,
    /// Branch priority for commit identity
    pub branches: Vec<String>,
    /// Global PATH additions
    pub add_to_path: Vec<String>,
    /// User environment, in declaration order
    pub environment: Vec<EnvEntry>,
    pub actions: ActionIndex,
}

impl Configuration {
    /// Load the configuration of the project owning `dotdir`
    pub fn load(dotdir: &Path, expander: &dyn TemplateExpander) -> Result<Self, OrchestraError> {
        let loaded = loader::load_config(dotdir, expander)?;
        let raw = RawConfig::from_value(loaded.parsed)?;
        Ok(Self::from_raw(dotdir, loaded.config_hash, raw)?)
    }

    /// Resolve a validated document
    pub fn from_raw(dotdir: &Path, config_hash: String, raw: RawConfig) -> Result<Self, ConfigError> {
        if let Some(min_version) = &raw.min_orchestra_version {
            check_min_orchestra_version(min_version, "the configuration")?;
        }

        let paths = OrchestraPaths::new(dotdir, &raw.paths);
        let to_remotes = |section: &str,
                          list: &[BTreeMap<String, String>]|
         -> Result<Vec<Remote>, ConfigError> {
            Ok(single_entries(section, list)?
                .into_iter()
                .map(|(name, url)| Remote { name, url })
                .collect())
        };
        let remotes = to_remotes("remote_base_urls", &raw.remote_base_urls)?;
        let binary_archive_remotes = to_remotes("binary_archives", &raw.binary_archives)?;

        let mut environment = Vec::new();
        for (name, value) in single_entries("environment", &raw.environment)? {
            let value = value.to_shell_string();
            match name.strip_prefix('-').map(str::to_string) {
                Some(unset) if !value.is_empty() => {
                    return Err(ConfigError::InvalidUnset { name: unset, value })
                }
                Some(unset) => environment.push(EnvEntry::Unset { name: unset }),
                None => environment.push(EnvEntry::Set { name, value }),
            }
        }

        // First pass: components and builds
        let mut components = BTreeMap::new();
        for (name, raw_component) in &raw.components {
            let component = build_component(name, raw_component)?;
            if let Some(archives) = &component.binary_archives {
                if !binary_archive_remotes.iter().any(|r| &r.name == archives) {
                    return Err(ConfigError::UnknownBinaryArchives {
                        component: name.clone(),
                        name: archives.clone(),
                    });
                }
            }
            components.insert(name.clone(), component);
        }

        // Second pass: dependency edges
        for component in components.values() {
            for build in component.builds.values() {
                for spec in build.dependencies.iter().chain(&build.build_dependencies) {
                    check_dependency(&components, build, spec)?;
                }
            }
        }

        let actions = ActionIndex::build(components.values());
        let branches = raw.branches.unwrap_or_else(|| {
            DEFAULT_BRANCHES.iter().map(|b| (*b).to_string()).collect()
        });

        Ok(Self {
            paths,
            config_hash,
            components,
            remotes,
            binary_archive_remotes,
            branches,
            add_to_path: raw.add_to_path,
            environment,
            actions,
        })
    }

    /// Look up a component
    pub fn component(&self, name: &str) -> Result<&Component, ConfigError> {
        self.components
            .get(name)
            .ok_or_else(|| ConfigError::UnknownComponent {
                name: name.to_string(),
                referenced_by: "the command line".to_string(),
            })
    }

    /// Resolve `component[@build]`, falling back to the default build
    pub fn resolve_build(&self, name: &str) -> Result<&Build, ConfigError> {
        let (component_name, build_name) = split_qualified(name);
        let component = self.component(component_name)?;
        match build_name {
            Some(build) => component.build(build).ok_or_else(|| ConfigError::UnknownBuild {
                component: component_name.to_string(),
                build: build.to_string(),
            }),
            None => Ok(component.default_build()),
        }
    }

    /// Install action of a build
    pub fn install_action(&self, build: &Build) -> ActionKind {
        ActionKind::Install {
            component: build.component.clone(),
            build: build.name.clone(),
        }
    }

    /// Configure action of a build
    pub fn configure_action(&self, build: &Build) -> ActionKind {
        ActionKind::Configure {
            component: build.component.clone(),
            build: build.name.clone(),
        }
    }

    /// Build behind a configure/install action
    pub fn build_of(&self, kind: &ActionKind) -> Option<&Build> {
        let build = kind.build()?;
        self.components.get(kind.component())?.build(build)
    }

    /// Clone URLs of a component's repository, in remote priority order
    pub fn repository_urls(&self, component: &Component) -> Vec<String> {
        let Some(repository) = &component.repository else {
            return Vec::new();
        };
        self.remotes
            .iter()
            .map(|remote| format!("{}/{repository}", remote.url.trim_end_matches('/')))
            .collect()
    }
}

fn build_component(name: &str, raw: &RawComponent) -> Result<Component, ConfigError> {
    if raw.builds.is_empty() {
        return Err(ConfigError::NoBuilds {
            component: name.to_string(),
        });
    }
    let mut builds = BTreeMap::new();
    for (build_name, raw_build) in &raw.builds {
        builds.insert(build_name.clone(), build_build(name, build_name, raw_build)?);
    }

    let default_build = match &raw.default_build {
        Some(default) if builds.contains_key(default) => default.clone(),
        Some(default) => {
            return Err(ConfigError::UnknownDefaultBuild {
                component: name.to_string(),
                build: default.clone(),
            })
        }
        None => builds
            .keys()
            .next()
            .cloned()
            .ok_or_else(|| ConfigError::NoBuilds {
                component: name.to_string(),
            })?,
    };

    Ok(Component {
        name: name.to_string(),
        repository: raw.repository.clone(),
        builds,
        default_build,
        license: raw.license.clone(),
        skip_post_install: raw.skip_post_install,
        build_from_source: raw.build_from_source,
        add_to_path: raw.add_to_path.clone(),
        binary_archives: raw.binary_archives.clone(),
    })
}

fn build_build(component: &str, name: &str, raw: &RawBuild) -> Result<Build, ConfigError> {
    let parse_all = |specs: &[String]| -> Result<Vec<DependencySpec>, ConfigError> {
        specs.iter().map(|s| DependencySpec::parse(s)).collect()
    };
    Ok(Build {
        name: name.to_string(),
        component: component.to_string(),
        configure: raw.configure.clone(),
        install: raw.install.clone(),
        ndebug: raw.ndebug,
        dependencies: parse_all(&raw.dependencies)?,
        build_dependencies: parse_all(&raw.build_dependencies)?,
    })
}

fn check_dependency(
    components: &BTreeMap<String, Component>,
    from: &Build,
    spec: &DependencySpec,
) -> Result<(), ConfigError> {
    let target = components
        .get(&spec.component)
        .ok_or_else(|| ConfigError::UnknownComponent {
            name: spec.component.clone(),
            referenced_by: from.qualified_name(),
        })?;
    if let Some(build) = &spec.build {
        if target.build(build).is_none() {
            return Err(ConfigError::UnknownBuild {
                component: spec.component.clone(),
                build: build.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn resolve(value: serde_json::Value) -> Result<Configuration, ConfigError> {
        let raw = RawConfig::from_value(value)?;
        Configuration::from_raw(Path::new("/work/.orchestra"), "hash".to_string(), raw)
    }

    #[test]
    fn test_default_paths_are_relative_to_dotdir_parent() {
        let config = resolve(json!({})).unwrap();
        assert_eq!(config.paths.root, PathBuf::from("/work/root"));
        assert_eq!(config.paths.sources, PathBuf::from("/work/sources"));
        assert_eq!(config.paths.builds, PathBuf::from("/work/build"));
        assert_eq!(config.paths.tmproot, PathBuf::from("/work/.orchestra/tmproot"));
        assert_eq!(
            config.paths.metadata_dir(),
            PathBuf::from("/work/root/share/orchestra")
        );
        assert_eq!(
            config.paths.tmproot_for("a/b@c"),
            PathBuf::from("/work/.orchestra/tmproot/a_b_c")
        );
    }

    #[test]
    fn test_default_build_is_lexicographically_first() {
        let config = resolve(json!({
            "components": { "a": { "builds": { "zeta": {}, "alpha": {} } } }
        }))
        .unwrap();
        assert_eq!(config.components["a"].default_build, "alpha");
        assert_eq!(config.resolve_build("a").unwrap().name, "alpha");
        assert_eq!(config.resolve_build("a@zeta").unwrap().name, "zeta");
    }

    #[test]
    fn test_unknown_default_build() {
        let result = resolve(json!({
            "components": { "a": { "default_build": "nope", "builds": { "x": {} } } }
        }));
        assert!(matches!(result, Err(ConfigError::UnknownDefaultBuild { .. })));
    }

    #[test]
    fn test_unknown_dependencies_are_rejected() {
        let result = resolve(json!({
            "components": { "a": { "builds": { "x": { "dependencies": ["missing"] } } } }
        }));
        assert!(matches!(
            result,
            Err(ConfigError::UnknownComponent { ref referenced_by, .. }) if referenced_by == "a@x"
        ));

        let result = resolve(json!({
            "components": {
                "a": { "builds": { "x": { "build_dependencies": ["b@missing"] } } },
                "b": { "builds": { "y": {} } }
            }
        }));
        assert!(matches!(result, Err(ConfigError::UnknownBuild { .. })));
    }

    #[test]
    fn test_environment_entries() {
        let config = resolve(json!({
            "environment": [ { "A": "1" }, { "-B": "" } ]
        }))
        .unwrap();
        assert_eq!(
            config.environment,
            vec![
                EnvEntry::Set {
                    name: "A".to_string(),
                    value: "1".to_string()
                },
                EnvEntry::Unset {
                    name: "B".to_string()
                },
            ]
        );

        let result = resolve(json!({ "environment": [ { "-B": "value" } ] }));
        assert!(matches!(result, Err(ConfigError::InvalidUnset { .. })));
    }

    #[test]
    fn test_min_version_is_enforced() {
        let result = resolve(json!({ "min_orchestra_version": "999.0.0" }));
        assert!(matches!(result, Err(ConfigError::Version(_))));
        assert!(resolve(json!({ "min_orchestra_version": "0.0.1" })).is_ok());
    }

    #[test]
    fn test_unknown_binary_archives_repository() {
        let result = resolve(json!({
            "components": { "a": { "binary_archives": "nope", "builds": { "x": {} } } }
        }));
        assert!(matches!(result, Err(ConfigError::UnknownBinaryArchives { .. })));
    }

    #[test]
    fn test_repository_urls_follow_remote_order() {
        let config = resolve(json!({
            "remote_base_urls": [ { "first": "https://a.example/" }, { "second": "https://b.example" } ],
            "components": { "a": { "repository": "repo-a", "builds": { "x": {} } } }
        }))
        .unwrap();
        assert_eq!(
            config.repository_urls(&config.components["a"]),
            ["https://a.example/repo-a", "https://b.example/repo-a"]
        );
        assert_eq!(config.branches, ["master", "main"]);
    }

    #[test]
    fn test_find_dotdir_walks_up() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join(".orchestra")).unwrap();
        std::fs::create_dir_all(temp.path().join("a/b")).unwrap();
        let found = find_dotdir(None, &temp.path().join("a/b"));
        // ORCHESTRA_DOTDIR may be set by the surrounding environment
        if std::env::var(ENV_DOTDIR).is_err() {
            assert_eq!(found.unwrap(), temp.path().join(".orchestra"));
        }
        let explicit = find_dotdir(Some(Path::new("/x/.orchestra")), temp.path()).unwrap();
        assert_eq!(explicit, PathBuf::from("/x/.orchestra"));
    }
}
