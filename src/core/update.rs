//! Update logic
//!
//! `update` brings every repository orchestra knows about up to date:
//! the configuration, the binary archive repositories, the remote heads
//! cache and every cloned component source. Fast-forward failures are
//! collected rather than aborting so one diverged clone does not block
//! the others.

use futures::future::join_all;

use crate::core::remote_heads::{Heads, RemoteHeadsCache};
use crate::core::workspace::Workspace;
use crate::error::OrchestraError;
use crate::infra::git::{CloneOptions, Vcs};

/// Options of `orc update`
#[derive(Debug, Clone, Copy)]
pub struct UpdateOptions {
    /// Pull the configuration repository first
    pub pull_config: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self { pull_config: true }
    }
}

/// A repository that could not be updated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateFailure {
    pub target: String,
    pub reason: String,
}

/// Result of an update
#[derive(Debug, Default)]
pub struct UpdateResult {
    pub config_pulled: bool,
    /// Binary archive repositories cloned or pulled
    pub archive_repositories: Vec<String>,
    /// Components whose remote heads were refreshed
    pub refreshed: Vec<String>,
    /// Components whose heads could not be determined
    pub unknown: Vec<String>,
    /// Component sources pulled
    pub pulled: Vec<String>,
    pub failures: Vec<UpdateFailure>,
}

impl UpdateResult {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, target: impl Into<String>, reason: impl ToString) {
        let target = target.into();
        let reason = reason.to_string();
        tracing::warn!("Failed to update {target}: {reason}");
        self.failures.push(UpdateFailure { target, reason });
    }
}

/// Update the configuration, binary archives, remote heads and sources
pub async fn update(ws: &Workspace, options: UpdateOptions) -> Result<UpdateResult, OrchestraError> {
    ws.vcs().ensure_available()?;
    let mut result = UpdateResult::default();
    let paths = &ws.config.paths;

    let config_dir = paths.config_dir();
    if options.pull_config {
        if config_dir.join(".git").exists() {
            tracing::info!("Updating configuration");
            match ws.vcs().pull_ff(&config_dir) {
                Ok(()) => result.config_pulled = true,
                Err(e) => result.fail("configuration", e),
            }
        } else {
            tracing::debug!("{} is not a git repository", config_dir.display());
        }
    }

    for remote in &ws.config.binary_archive_remotes {
        let dir = paths.binary_archive_repo(&remote.name);
        let outcome = if dir.exists() {
            tracing::info!("Updating binary archives {}", remote.name);
            ws.vcs().pull_ff(&dir)
        } else {
            tracing::info!("Cloning binary archives {}", remote.name);
            let options = CloneOptions {
                branch: None,
                skip_lfs_smudge: true,
            };
            ws.vcs().clone_repo(&remote.url, &dir, &options)
        };
        match outcome {
            Ok(()) => result.archive_repositories.push(remote.name.clone()),
            Err(e) => result.fail(format!("binary archives {}", remote.name), e),
        }
    }

    refresh_remote_heads(ws, &mut result).await?;

    for component in ws.config.components.values() {
        let source_dir = paths.source_dir(&component.name);
        if !source_dir.join(".git").exists() {
            continue;
        }
        tracing::info!("Pulling {}", component.name);
        match ws.vcs().pull_ff(&source_dir) {
            Ok(()) => result.pulled.push(component.name.clone()),
            Err(e) => result.fail(component.name.clone(), e),
        }
    }
    ws.invalidate_caches();

    Ok(result)
}

/// Rebuild the remote heads cache from scratch, querying every component
/// concurrently
async fn refresh_remote_heads(ws: &Workspace, result: &mut UpdateResult) -> Result<(), OrchestraError> {
    let cache_path = ws.config.paths.remote_heads_cache();
    RemoteHeadsCache::remove(&cache_path)?;

    let queries: Vec<(String, Vec<String>)> = ws
        .config
        .components
        .values()
        .filter(|component| component.is_cloneable())
        .map(|component| {
            let mut locations = Vec::new();
            let source_dir = ws.config.paths.source_dir(&component.name);
            if source_dir.join(".git").exists() {
                locations.push(source_dir.display().to_string());
            }
            locations.extend(ws.config.repository_urls(component));
            (component.name.clone(), locations)
        })
        .collect();

    let handles = queries.into_iter().map(|(name, locations)| {
        let vcs = ws.shared_vcs();
        tokio::task::spawn_blocking(move || {
            let heads = query_heads(vcs.as_ref(), &locations);
            (name, heads)
        })
    });

    let mut cache = RemoteHeadsCache::load(&cache_path)?;
    for joined in join_all(handles).await {
        let (name, heads) =
            joined.map_err(|e| OrchestraError::Generic(format!("Remote heads query panicked: {e}")))?;
        match heads {
            Some(heads) => {
                cache.set(&name, heads);
                result.refreshed.push(name);
            }
            None => {
                tracing::warn!("Could not determine the remote heads of {name}");
                result.unknown.push(name);
            }
        }
    }
    cache.save()?;
    ws.replace_remote_heads(cache);
    Ok(())
}

/// Heads from the first location that answers
fn query_heads(vcs: &dyn Vcs, locations: &[String]) -> Option<Heads> {
    locations.iter().find_map(|location| match vcs.ls_remote(location) {
        Ok(heads) => Some(heads),
        Err(e) => {
            tracing::debug!("ls-remote {location} failed: {e}");
            None
        }
    })
}
