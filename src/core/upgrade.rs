//! Upgrade logic
//!
//! Reinstalls the builds the user asked for explicitly. Dependencies only
//! follow when their hash changed and the solver schedules them.

use crate::core::executor::{ExecutionReport, ExecutorOptions};
use crate::core::solver::SolverOptions;
use crate::core::workspace::Workspace;
use crate::error::OrchestraError;

/// `component@build` of every manually installed component still present
/// in the configuration
pub fn upgrade_targets(ws: &Workspace) -> Result<Vec<String>, OrchestraError> {
    let mut targets = Vec::new();
    for record in ws.metadata.installed()? {
        if !record.manually_installed {
            continue;
        }
        let qualified = format!("{}@{}", record.component, record.build);
        if ws.config.resolve_build(&qualified).is_err() {
            tracing::warn!("{qualified} is installed but no longer configured");
            continue;
        }
        targets.push(qualified);
    }
    Ok(targets)
}

/// Reinstall manually installed components whose hash changed
pub fn upgrade(ws: &mut Workspace, options: ExecutorOptions) -> Result<ExecutionReport, OrchestraError> {
    let targets = upgrade_targets(ws)?;
    if targets.is_empty() {
        return Ok(ExecutionReport {
            actions: Vec::new(),
            pretend: options.pretend,
        });
    }
    tracing::info!("Upgrading {}", targets.join(", "));

    let roots = targets
        .iter()
        .map(|target| ws.install_root(target))
        .collect::<Result<Vec<_>, _>>()?;
    ws.request(
        targets
            .iter()
            .filter_map(|t| t.split_once('@').map(|(component, _)| component.to_string())),
    );
    ws.run_roots(&roots, SolverOptions { force_roots: false }, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::workspace::{ArchiveMode, WorkspaceOptions};
    use crate::test_utils::{workspace, FakeVcs};
    use serde_json::json;
    use tempfile::TempDir;

    fn project(lib_install: &str) -> serde_json::Value {
        json!({
            "components": {
                "lib": {
                    "builds": {"default": {
                        "configure": "true",
                        "install": lib_install
                    }}
                },
                "app": {
                    "builds": {"default": {
                        "configure": "true",
                        "install": "mkdir -p \"$DESTDIR$ORCHESTRA_ROOT/bin\" && touch \"$DESTDIR$ORCHESTRA_ROOT/bin/app\"",
                        "dependencies": ["lib"]
                    }}
                },
                "tool": {
                    "builds": {"default": {
                        "configure": "true",
                        "install": "mkdir -p \"$DESTDIR$ORCHESTRA_ROOT/bin\" && touch \"$DESTDIR$ORCHESTRA_ROOT/bin/tool\""
                    }}
                }
            }
        })
    }

    const LIB_V1: &str = "mkdir -p \"$DESTDIR$ORCHESTRA_ROOT/lib64\" && touch \"$DESTDIR$ORCHESTRA_ROOT/lib64/libv1.so\"";
    const LIB_V2: &str = "mkdir -p \"$DESTDIR$ORCHESTRA_ROOT/lib64\" && touch \"$DESTDIR$ORCHESTRA_ROOT/lib64/libv2.so\"";

    fn build_options() -> WorkspaceOptions {
        WorkspaceOptions {
            archive_mode: ArchiveMode::ForceBuild,
            ..WorkspaceOptions::default()
        }
    }

    fn install(ws: &mut Workspace, name: &str) {
        ws.request([name]);
        let root = ws.install_root(name).unwrap();
        ws.run_roots(&[root], SolverOptions::default(), ExecutorOptions::default())
            .unwrap();
    }

    // ============================================
    // Unit Tests
    // ============================================

    #[test]
    fn test_targets_are_manually_installed_components() {
        let temp = TempDir::new().unwrap();
        let mut ws = workspace(&temp, project(LIB_V1), FakeVcs::default()).with_options(build_options());
        install(&mut ws, "app");

        assert_eq!(upgrade_targets(&ws).unwrap(), vec!["app@default".to_string()]);
        assert!(!ws.metadata.load("lib").unwrap().unwrap().manually_installed);
    }

    #[test]
    fn test_upgrade_without_changes_runs_nothing() {
        let temp = TempDir::new().unwrap();
        let mut ws = workspace(&temp, project(LIB_V1), FakeVcs::default()).with_options(build_options());
        install(&mut ws, "app");

        let report = upgrade(&mut ws, ExecutorOptions::default()).unwrap();
        assert!(report.actions.is_empty());
    }

    #[test]
    fn test_upgrade_follows_changed_dependencies() {
        let temp = TempDir::new().unwrap();
        let mut ws = workspace(&temp, project(LIB_V1), FakeVcs::default()).with_options(build_options());
        install(&mut ws, "app");
        install(&mut ws, "tool");

        let mut ws = workspace(&temp, project(LIB_V2), FakeVcs::default()).with_options(build_options());
        let report = upgrade(&mut ws, ExecutorOptions::default()).unwrap();

        assert!(report.actions.contains(&"install lib@default".to_string()));
        assert!(report.actions.contains(&"install app@default".to_string()));
        assert!(!report.actions.iter().any(|a| a.contains("tool")));
        let root = &ws.config.paths.root;
        assert!(root.join("lib64/libv2.so").exists());
        assert!(!root.join("lib64/libv1.so").exists());
        assert!(ws.metadata.load("app").unwrap().unwrap().manually_installed);
    }
}
