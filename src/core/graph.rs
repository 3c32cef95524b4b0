//! Graphviz export of action graphs
//!
//! `orc graph` prints either the expanded graph (every alternative of every
//! choice) or the solved plan.

use petgraph::graphmap::DiGraphMap;

use crate::core::action::{ActionId, ActionNode};
use crate::core::solver::{self, ActionGraph, SolverOptions};
use crate::core::workspace::Workspace;
use crate::error::OrchestraError;

/// Options of `orc graph`
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphOptions {
    /// Print the solved plan instead of the expanded graph
    pub solved: bool,
    /// Root every build instead of the default ones
    pub all_builds: bool,
}

/// Install actions to root the graph at: `name` (a component or a
/// `component@build`), or every component
pub fn graph_roots(
    ws: &Workspace,
    name: Option<&str>,
    all_builds: bool,
) -> Result<Vec<ActionId>, OrchestraError> {
    let components: Vec<&str> = match name {
        Some(name) if name.contains('@') => return Ok(vec![ws.install_root(name)?]),
        Some(name) => vec![ws.config.component(name)?.name.as_str()],
        None => ws.config.components.keys().map(String::as_str).collect(),
    };

    let mut roots = Vec::new();
    for component in components {
        let component = ws.config.component(component)?;
        if all_builds {
            for build in component.builds.keys() {
                roots.push(ws.install_root(&format!("{}@{build}", component.name))?);
            }
        } else {
            roots.push(ws.install_root(&component.name)?);
        }
    }
    Ok(roots)
}

/// DOT rendering of `graph`, edges pointing from dependents to dependencies
pub fn to_dot<G: ActionGraph + ?Sized>(names: &G, graph: &DiGraphMap<ActionId, ()>) -> String {
    let mut nodes: Vec<ActionId> = graph.nodes().collect();
    nodes.sort();

    let mut output = String::new();
    output.push_str("digraph orchestra {\n");
    output.push_str("    rankdir=LR;\n");
    output.push_str("    node [shape=box];\n");
    output.push('\n');

    for node in &nodes {
        let shape = match names.node(*node) {
            ActionNode::AnyOf(_) => " [shape=diamond]",
            ActionNode::Concrete(_) => "",
        };
        output.push_str(&format!("    \"{}\"{shape};\n", escape(&names.name(*node))));
    }
    output.push('\n');

    for node in &nodes {
        let mut deps: Vec<ActionId> = graph.neighbors(*node).collect();
        deps.sort();
        for dep in deps {
            output.push_str(&format!(
                "    \"{}\" -> \"{}\";\n",
                escape(&names.name(*node)),
                escape(&names.name(dep))
            ));
        }
    }

    output.push_str("}\n");
    output
}

fn escape(name: &str) -> String {
    name.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Render the graph `orc graph` prints
pub fn render(ws: &Workspace, name: Option<&str>, options: GraphOptions) -> Result<String, OrchestraError> {
    let roots = graph_roots(ws, name, options.all_builds)?;
    let graph = if options.solved {
        ws.solve(&roots, SolverOptions::default())?.graph
    } else {
        solver::expand(ws, &roots)?
    };
    Ok(to_dot(ws, &graph))
}
