//! Binary archive housekeeping
//!
//! Backs `orc binary-archives`: listing archives, deleting the ones nothing
//! refers to any more, and recreating convenience symlinks.

use std::path::PathBuf;

use crate::core::binary_archives::{self, ArchiveEntry};
use crate::core::install;
use crate::core::workspace::Workspace;
use crate::error::OrchestraError;
use crate::infra::filesystem;

/// An archive and whether it matches the current configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveListing {
    pub entry: ArchiveEntry,
    /// Named after the current recursive hash of its component
    pub current: bool,
}

fn is_current(ws: &Workspace, entry: &ArchiveEntry) -> Result<bool, OrchestraError> {
    let Ok(component) = ws.config.component(&entry.component) else {
        return Ok(false);
    };
    if component.build(&entry.build).is_none() {
        return Ok(false);
    }
    Ok(entry.recursive_hash() == Some(ws.recursive_hash(&component.name)?.as_str()))
}

/// Every archive of every repository
pub fn list(ws: &Workspace) -> Result<Vec<ArchiveListing>, OrchestraError> {
    ws.archives
        .list()?
        .into_iter()
        .map(|entry| {
            let current = is_current(ws, &entry)?;
            Ok(ArchiveListing { entry, current })
        })
        .collect()
}

/// Delete archives (and their hash material) that are neither current nor
/// the target of a convenience symlink. Returns the deleted archives.
pub fn clean(ws: &Workspace, pretend: bool) -> Result<Vec<PathBuf>, OrchestraError> {
    let linked = binary_archives::symlink_targets(&ws.archives);
    let mut removed = Vec::new();
    for listing in list(ws)? {
        if listing.current {
            continue;
        }
        let Some(path) = ws.archives.path_of(&listing.entry) else {
            continue;
        };
        if linked.contains(&path) {
            tracing::debug!("Keeping {}: symlink target", path.display());
            continue;
        }
        if pretend {
            tracing::info!("Would remove {}", path.display());
        } else {
            tracing::info!("Removing {}", path.display());
            filesystem::remove_file(&path)?;
            filesystem::remove_file(&binary_archives::material_path(&path))?;
        }
        removed.push(path);
    }
    Ok(removed)
}

/// Recreate convenience symlinks for every installed component
pub fn fix_symlinks(ws: &Workspace) -> Result<Vec<PathBuf>, OrchestraError> {
    let mut links = Vec::new();
    for record in ws.metadata.installed()? {
        let qualified = format!("{}@{}", record.component, record.build);
        let Ok(build) = ws.config.resolve_build(&qualified) else {
            tracing::warn!("Skipping {qualified}: no longer configured");
            continue;
        };
        let relative = ws.archive_relative_path(build)?;
        links.extend(install::update_convenience_symlinks(ws, build, &relative)?);
    }
    Ok(links)
}
