//! Clean logic
//!
//! Removes the build directories of a component and, on request, its
//! source checkout. Installed files are left alone.

use std::path::PathBuf;

use crate::core::configuration::Configuration;
use crate::error::OrchestraError;
use crate::infra::filesystem;

/// Options of `orc clean`
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanOptions {
    /// Also remove the source directory
    pub include_sources: bool,
    /// Report what would be removed without removing it
    pub pretend: bool,
}

/// Result of a clean
#[derive(Debug, Default)]
pub struct CleanResult {
    /// Directories that were (or would be) removed
    pub removed: Vec<PathBuf>,
    /// Directories that didn't exist
    pub skipped: Vec<PathBuf>,
}

/// Directories `clean` targets for `component`
pub fn clean_targets(
    config: &Configuration,
    component: &str,
    include_sources: bool,
) -> Result<Vec<PathBuf>, OrchestraError> {
    let component = config.component(component)?;
    let mut targets: Vec<PathBuf> = component
        .builds
        .keys()
        .map(|build| config.paths.build_dir(&component.name, build))
        .collect();
    targets.push(config.paths.builds.join(&component.name));
    if include_sources {
        targets.push(config.paths.source_dir(&component.name));
    }
    Ok(targets)
}

/// Clean the build directories of `component`
pub fn clean_component(
    config: &Configuration,
    component: &str,
    options: CleanOptions,
) -> Result<CleanResult, OrchestraError> {
    let mut result = CleanResult::default();
    for dir in clean_targets(config, component, options.include_sources)? {
        if !dir.exists() {
            result.skipped.push(dir);
            continue;
        }
        if options.pretend {
            tracing::info!("Would remove {}", dir.display());
        } else {
            tracing::info!("Removing {}", dir.display());
            filesystem::remove_dir_all(&dir)?;
        }
        result.removed.push(dir);
    }
    Ok(result)
}
