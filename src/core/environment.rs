//! Script environment
//!
//! Every configure/install script (and `orc shell`) runs with the same set of
//! orchestra variables. Component- and build-scoped actions add their
//! directories on top of the global set.
//!
//! User-declared variables are not part of the process environment: they
//! are exported by a shell prelude so they may reference orchestra variables
//! (`$ORCHESTRA_ROOT/lib64`) and so `-NAME` entries can unset inherited ones.

use std::collections::BTreeMap;

use regex::Regex;

use crate::config::defaults::RPATH_PLACEHOLDER;
use crate::core::component::{Build, Component};
use crate::core::configuration::{Configuration, EnvEntry};

/// Environment handed to user scripts
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptEnvironment {
    vars: BTreeMap<String, String>,
    user: Vec<EnvEntry>,
}

impl ScriptEnvironment {
    /// Variables shared by every script
    pub fn global(config: &Configuration) -> Self {
        let paths = &config.paths;
        let mut vars = BTreeMap::new();
        let mut set = |key: &str, value: String| {
            vars.insert(key.to_string(), value);
        };
        set("ORCHESTRA_DOTDIR", paths.dotdir.display().to_string());
        set("ORCHESTRA_ROOT", paths.root.display().to_string());
        set("SOURCE_ARCHIVES", paths.source_archives.display().to_string());
        set("BINARY_ARCHIVES", paths.binary_archives.display().to_string());
        set("SOURCES_DIR", paths.sources.display().to_string());
        set("BUILDS_DIR", paths.builds.display().to_string());
        set("TMP_ROOTS", paths.tmproot.display().to_string());
        set("RPATH_PLACEHOLDER", RPATH_PLACEHOLDER.to_string());
        set("GIT_ASKPASS", "/bin/true".to_string());
        set("RUN_TESTS", "0".to_string());

        let mut env = Self {
            vars,
            user: config.environment.clone(),
        };
        env.set_path(&config.add_to_path, &[]);
        env
    }

    /// Variables for actions scoped to a component (clone)
    pub fn for_component(config: &Configuration, component: &Component) -> Self {
        let mut env = Self::global(config);
        env.vars.insert(
            "SOURCE_DIR".to_string(),
            config.paths.source_dir(&component.name).display().to_string(),
        );
        env.set_path(&config.add_to_path, &component.add_to_path);
        env
    }

    /// Variables for actions scoped to a build (configure)
    pub fn for_build(config: &Configuration, component: &Component, build: &Build) -> Self {
        let mut env = Self::for_component(config, component);
        env.vars.insert(
            "BUILD_DIR".to_string(),
            config
                .paths
                .build_dir(&build.component, &build.name)
                .display()
                .to_string(),
        );
        env
    }

    /// Variables for the install script of a build
    pub fn for_install(config: &Configuration, component: &Component, build: &Build) -> Self {
        let mut env = Self::for_build(config, component, build);
        let tmp_root = config
            .paths
            .tmproot_for(&build.qualified_name())
            .display()
            .to_string();
        env.vars.insert("TMP_ROOT".to_string(), tmp_root.clone());
        env.vars.insert("DESTDIR".to_string(), tmp_root);
        env
    }

    /// Request tests from the build scripts
    #[must_use]
    pub fn with_run_tests(mut self, run_tests: bool) -> Self {
        self.vars.insert(
            "RUN_TESTS".to_string(),
            if run_tests { "1" } else { "0" }.to_string(),
        );
        self
    }

    /// PATH: global entries, component entries, then the caller's PATH
    fn set_path(&mut self, global: &[String], component: &[String]) {
        let mut entries: Vec<String> = global
            .iter()
            .chain(component)
            .map(|entry| expand_vars(entry, &self.vars))
            .collect();
        if let Ok(path) = std::env::var("PATH") {
            if !path.is_empty() {
                entries.push(path);
            }
        }
        self.vars.insert("PATH".to_string(), entries.join(":"));
    }

    /// Process environment variables
    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Value of a variable
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Shell code applying the user environment, in declaration order
    pub fn prelude(&self) -> String {
        let mut prelude = String::new();
        for entry in &self.user {
            match entry {
                EnvEntry::Set { name, value } => {
                    prelude.push_str(&format!("export {name}=\"{}\"\n", escape_double_quoted(value)));
                }
                EnvEntry::Unset { name } => {
                    prelude.push_str(&format!("unset {name}\n"));
                }
            }
        }
        prelude
    }

    /// `export` lines for every variable, followed by the user prelude
    pub fn export_script(&self) -> String {
        let mut script = String::new();
        for (key, value) in &self.vars {
            script.push_str(&format!("export {key}=\"{}\"\n", escape_literal(value)));
        }
        script.push_str(&self.prelude());
        script
    }
}

/// Escape for a double-quoted shell string, leaving `$` references live
fn escape_double_quoted(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '`') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Escape for a double-quoted shell string, `$` included
fn escape_literal(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '`' | '$') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Expand `$NAME` and `${NAME}` from `vars`; unknown names are kept as is
pub fn expand_vars(input: &str, vars: &BTreeMap<String, String>) -> String {
    let Ok(re) = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)") else {
        return input.to_string();
    };
    re.replace_all(input, |caps: &regex::Captures<'_>| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map_or("", |m| m.as_str());
        vars.get(name)
            .cloned()
            .unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}
