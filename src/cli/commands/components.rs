//! CLI command for listing components
//!
//! Implements `orc components`.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cli::commands::CommandContext;
use crate::core::component::Component;
use crate::core::dependency::DependencySpec;
use crate::core::workspace::{Workspace, WorkspaceOptions};

/// Filters and columns of the listing
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub name: Option<String>,
    pub installed: bool,
    pub not_installed: bool,
    pub deps: bool,
    pub hashes: bool,
}

/// One build in the listing
#[derive(Debug, Serialize)]
struct BuildView {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    dependencies: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    build_dependencies: Option<Vec<String>>,
}

/// One component in the listing
#[derive(Debug, Serialize)]
struct ComponentView {
    name: String,
    default_build: String,
    builds: Vec<BuildView>,
    installed_build: Option<String>,
    manually_installed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    recursive_hash: Option<String>,
}

fn view(ws: &Workspace, component: &Component, options: &ListOptions) -> Result<ComponentView> {
    let record = ws.metadata.load(&component.name)?;
    let builds = component
        .builds
        .values()
        .map(|build| {
            let render = |deps: &[DependencySpec]| {
                deps.iter().map(ToString::to_string).collect::<Vec<_>>()
            };
            BuildView {
                name: build.name.clone(),
                dependencies: options.deps.then(|| render(&build.dependencies)),
                build_dependencies: options.deps.then(|| render(&build.build_dependencies)),
            }
        })
        .collect();
    let recursive_hash = if options.hashes {
        Some(
            ws.recursive_hash(&component.name)
                .with_context(|| format!("Failed to hash {}", component.name))?,
        )
    } else {
        None
    };
    Ok(ComponentView {
        name: component.name.clone(),
        default_build: component.default_build.clone(),
        builds,
        installed_build: record.as_ref().map(|r| r.build.clone()),
        manually_installed: record.as_ref().is_some_and(|r| r.manually_installed),
        recursive_hash,
    })
}

/// Execute the components command
pub async fn execute(context: &CommandContext, options: ListOptions) -> Result<()> {
    let ws = context.workspace(WorkspaceOptions::default())?;

    let selected: Vec<&Component> = match &options.name {
        Some(name) => vec![ws.config.component(name)?],
        None => ws.config.components.values().collect(),
    };

    let mut views = Vec::new();
    for component in selected {
        let installed = ws.metadata.is_installed(&component.name);
        if (options.installed && !installed) || (options.not_installed && installed) {
            continue;
        }
        views.push(view(&ws, component, &options)?);
    }

    if context.output.json {
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }

    for component in &views {
        let mut line = component.name.clone();
        if let Some(build) = &component.installed_build {
            let how = if component.manually_installed {
                "manually"
            } else {
                "as dependency"
            };
            line.push_str(&format!(" (installed: {build}, {how})"));
        }
        if let Some(hash) = &component.recursive_hash {
            line.push_str(&format!(" [{hash}]"));
        }
        println!("{line}");

        for build in &component.builds {
            let marker = if build.name == component.default_build {
                "*"
            } else {
                " "
            };
            println!("  {marker} {}", build.name);
            if let Some(deps) = &build.dependencies {
                if !deps.is_empty() {
                    println!("      dependencies: {}", deps.join(", "));
                }
            }
            if let Some(deps) = &build.build_dependencies {
                if !deps.is_empty() {
                    println!("      build dependencies: {}", deps.join(", "));
                }
            }
        }
    }
    Ok(())
}
