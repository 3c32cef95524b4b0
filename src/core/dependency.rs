//! Dependency specifications
//!
//! A dependency names a component and, optionally, one of its builds:
//!
//! - `comp` - any build of `comp`, its default build preferred
//! - `comp~build` - any build of `comp`, `build` preferred
//! - `comp@build` - exactly `comp@build`

use std::fmt;

use crate::error::ConfigError;

/// A parsed dependency edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependencySpec {
    /// Target component name
    pub component: String,
    /// Named build (exact or preferred)
    pub build: Option<String>,
    /// Whether only `build` satisfies the edge
    pub exact: bool,
}

impl DependencySpec {
    /// Parse a dependency string
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidDependency {
            spec: spec.to_string(),
        };
        let trimmed = spec.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(invalid());
        }

        let (component, build, exact) = if let Some((component, build)) = trimmed.split_once('@') {
            (component, Some(build), true)
        } else if let Some((component, build)) = trimmed.split_once('~') {
            (component, Some(build), false)
        } else {
            (trimmed, None, false)
        };

        if !is_valid_name(component) {
            return Err(invalid());
        }
        if let Some(build) = build {
            if !is_valid_name(build) {
                return Err(invalid());
            }
        }

        Ok(Self {
            component: component.to_string(),
            build: build.map(str::to_string),
            exact,
        })
    }
}

impl fmt::Display for DependencySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.build, self.exact) {
            (Some(build), true) => write!(f, "{}@{build}", self.component),
            (Some(build), false) => write!(f, "{}~{build}", self.component),
            (None, _) => f.write_str(&self.component),
        }
    }
}

/// Split a `component@build` name given on the command line
pub fn split_qualified(name: &str) -> (&str, Option<&str>) {
    match name.split_once('@') {
        Some((component, build)) => (component, Some(build)),
        None => (name, None),
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['@', '~'])
}
