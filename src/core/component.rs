//! Components and builds

use std::collections::BTreeMap;

use crate::core::dependency::DependencySpec;

/// A named variant of a component
#[derive(Debug, Clone, PartialEq)]
pub struct Build {
    /// Build name
    pub name: String,
    /// Owning component
    pub component: String,
    /// Configure script body
    pub configure: String,
    /// Install script body
    pub install: String,
    /// Disable assertions in installed headers
    pub ndebug: bool,
    /// Dependencies of both configure and install
    pub dependencies: Vec<DependencySpec>,
    /// Dependencies of configure only
    pub build_dependencies: Vec<DependencySpec>,
}

impl Build {
    /// `component@build`
    pub fn qualified_name(&self) -> String {
        format!("{}@{}", self.component, self.name)
    }

    /// Qualified name usable as a single path component
    pub fn safe_name(&self) -> String {
        safe_name(&self.qualified_name())
    }
}

/// Replace `@` and `/` with `_`
pub fn safe_name(name: &str) -> String {
    name.replace(['@', '/'], "_")
}

/// Unit of versioning and hashing
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub name: String,
    /// Repository name, relative to the remote base URLs
    pub repository: Option<String>,
    /// Builds ordered by name
    pub builds: BTreeMap<String, Build>,
    /// Name of the default build, always a key of `builds`
    pub default_build: String,
    /// License file relative to the source directory
    pub license: Option<String>,
    pub skip_post_install: bool,
    /// Never install from binary archives
    pub build_from_source: bool,
    /// Extra PATH entries
    pub add_to_path: Vec<String>,
    /// Binary archive repository receiving new archives
    pub binary_archives: Option<String>,
}

impl Component {
    /// The default build
    pub fn default_build(&self) -> &Build {
        &self.builds[&self.default_build]
    }

    /// Look up a build by name
    pub fn build(&self, name: &str) -> Option<&Build> {
        self.builds.get(name)
    }

    /// Whether the component has its own source repository
    pub fn is_cloneable(&self) -> bool {
        self.repository.is_some()
    }

    /// Every dependency of every build (configure and install)
    pub fn all_dependencies(&self) -> impl Iterator<Item = &DependencySpec> {
        self.builds
            .values()
            .flat_map(|b| b.dependencies.iter().chain(&b.build_dependencies))
    }
}
