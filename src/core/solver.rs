//! Dependency-graph solver
//!
//! Turns the action graph, with its choice nodes, into a concrete execution
//! DAG:
//!
//! 1. expand every action reachable from the roots
//! 2. order installs of different builds of the same component
//! 3. pick one alternative for every [`AnyOf`], avoiding cycles
//! 4. drop unreachable nodes, then satisfied leaves until a fixed point
//! 5. validate (no cycles, no unresolved choices)
//! 6. transitive reduction
//!
//! Edges point from an action to the actions it depends on.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use petgraph::algo::{has_path_connecting, tarjan_scc};
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;

use crate::core::action::{ActionId, ActionKind, ActionNode, AnyOf};
use crate::error::{OrchestraError, SolverError};

/// Graph view the solver works on
pub trait ActionGraph {
    /// Node behind an id
    fn node(&self, id: ActionId) -> &ActionNode;

    /// Current dependencies of a node
    fn dependencies(&self, id: ActionId) -> Result<Vec<ActionId>, OrchestraError>;

    /// Whether a concrete action is already satisfied
    fn is_satisfied(&self, id: ActionId) -> Result<bool, OrchestraError>;

    /// Human-readable name
    fn name(&self, id: ActionId) -> String {
        match self.node(id) {
            ActionNode::Concrete(kind) => kind.to_string(),
            ActionNode::AnyOf(any_of) => {
                let names: Vec<String> = any_of.ordered_alternatives().map(|a| self.name(a)).collect();
                format!("any of ({})", names.join(" | "))
            }
        }
    }
}

/// Solver knobs
#[derive(Debug, Clone, Copy)]
pub struct SolverOptions {
    /// Keep roots in the plan even when already satisfied
    pub force_roots: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self { force_roots: true }
    }
}

/// Solved execution DAG
#[derive(Debug, Clone, Default)]
pub struct SolvedGraph {
    /// Edges go from an action to its dependencies
    pub graph: DiGraphMap<ActionId, ()>,
    /// Roots still present in the graph
    pub roots: Vec<ActionId>,
}

impl SolvedGraph {
    /// Whether nothing needs to run
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, id: ActionId) -> bool {
        self.graph.contains_node(id)
    }

    /// Direct dependencies of a node, sorted
    pub fn dependencies(&self, id: ActionId) -> Vec<ActionId> {
        let mut deps: Vec<ActionId> = self
            .graph
            .neighbors_directed(id, Direction::Outgoing)
            .collect();
        deps.sort();
        deps
    }

    /// Every node, sorted
    pub fn nodes(&self) -> Vec<ActionId> {
        let mut nodes: Vec<ActionId> = self.graph.nodes().collect();
        nodes.sort();
        nodes
    }

    /// Deterministic topological order, dependencies first
    pub fn execution_order(&self) -> Vec<ActionId> {
        let mut remaining: HashMap<ActionId, usize> = self
            .graph
            .nodes()
            .map(|n| (n, self.graph.neighbors_directed(n, Direction::Outgoing).count()))
            .collect();
        let mut ready: BTreeSet<ActionId> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut order = Vec::with_capacity(remaining.len());
        while let Some(next) = ready.pop_first() {
            order.push(next);
            for dependent in self.graph.neighbors_directed(next, Direction::Incoming) {
                if let Some(count) = remaining.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }
        order
    }
}

/// Memoized satisfaction queries
struct Satisfaction<'g, G: ActionGraph + ?Sized> {
    graph: &'g G,
    cache: HashMap<ActionId, bool>,
}

impl<'g, G: ActionGraph + ?Sized> Satisfaction<'g, G> {
    fn new(graph: &'g G) -> Self {
        Self {
            graph,
            cache: HashMap::new(),
        }
    }

    fn get(&mut self, id: ActionId) -> Result<bool, OrchestraError> {
        if let Some(value) = self.cache.get(&id) {
            return Ok(*value);
        }
        let graph = self.graph;
        let value = match graph.node(id) {
            ActionNode::Concrete(_) => graph.is_satisfied(id)?,
            ActionNode::AnyOf(any_of) => {
                let mut any = false;
                for alternative in &any_of.alternatives {
                    if self.get(*alternative)? {
                        any = true;
                        break;
                    }
                }
                any
            }
        };
        self.cache.insert(id, value);
        Ok(value)
    }
}

/// Every action reachable from `roots`, choice nodes included
pub fn expand<G: ActionGraph + ?Sized>(
    graph: &G,
    roots: &[ActionId],
) -> Result<DiGraphMap<ActionId, ()>, OrchestraError> {
    let mut expanded = DiGraphMap::new();
    let mut queue: std::collections::VecDeque<ActionId> = roots.iter().copied().collect();
    let mut seen: HashSet<ActionId> = roots.iter().copied().collect();
    for root in roots {
        expanded.add_node(*root);
    }
    while let Some(node) = queue.pop_front() {
        for dep in graph.dependencies(node)? {
            expanded.add_edge(node, dep, ());
            if seen.insert(dep) {
                queue.push_back(dep);
            }
        }
    }
    Ok(expanded)
}

/// Solve the graph rooted at `roots`
pub fn solve<G: ActionGraph + ?Sized>(
    graph: &G,
    roots: &[ActionId],
    options: SolverOptions,
) -> Result<SolvedGraph, OrchestraError> {
    let mut satisfaction = Satisfaction::new(graph);
    let mut g = expand(graph, roots)?;
    let mut roots: Vec<ActionId> = roots.to_vec();

    order_same_component_installs(graph, &mut g);
    let unsatisfiable = choose_alternatives(graph, &mut g, &mut roots, &mut satisfaction)?;

    let forced: HashSet<ActionId> = if options.force_roots {
        roots.iter().copied().collect()
    } else {
        HashSet::new()
    };
    prune(&mut g, &roots, &forced, &mut satisfaction)?;
    roots.retain(|r| g.contains_node(*r));

    let remaining_choices: Vec<ActionId> = unsatisfiable
        .into_iter()
        .filter(|n| g.contains_node(*n))
        .collect();
    if let Some(choice) = remaining_choices.first() {
        let nodes = match graph.node(*choice) {
            ActionNode::AnyOf(any_of) => any_of.ordered_alternatives().map(|a| graph.name(a)).collect(),
            ActionNode::Concrete(_) => vec![graph.name(*choice)],
        };
        return Err(SolverError::UnsatisfiableChoice { nodes }.into());
    }

    for component in tarjan_scc(&g) {
        let is_cycle = component.len() > 1
            || component
                .first()
                .is_some_and(|n| g.contains_edge(*n, *n));
        if is_cycle {
            let mut nodes: Vec<String> = component.iter().map(|n| graph.name(*n)).collect();
            nodes.sort();
            return Err(SolverError::Cycle { nodes }.into());
        }
    }

    transitive_reduction(&mut g);
    tracing::debug!(
        "Solved graph: {} actions, {} edges",
        g.node_count(),
        g.edge_count()
    );
    Ok(SolvedGraph { graph: g, roots })
}

/// Serialize installs of different builds of one component that are
/// dependencies of the same consumer, ordered by build name
fn order_same_component_installs<G: ActionGraph + ?Sized>(
    graph: &G,
    g: &mut DiGraphMap<ActionId, ()>,
) {
    let mut consumers: Vec<ActionId> = g
        .nodes()
        .filter(|n| matches!(graph.node(*n), ActionNode::Concrete(_)))
        .collect();
    consumers.sort();
    for consumer in consumers {
        let mut by_component: BTreeMap<&str, Vec<(&str, ActionId)>> = BTreeMap::new();
        for dep in g.neighbors_directed(consumer, Direction::Outgoing) {
            if let ActionNode::Concrete(ActionKind::Install { component, build }) = graph.node(dep) {
                by_component
                    .entry(component.as_str())
                    .or_default()
                    .push((build.as_str(), dep));
            }
        }
        for installs in by_component.values_mut() {
            installs.sort();
            for pair in installs.windows(2) {
                let (earlier, later) = (pair[0].1, pair[1].1);
                if g.contains_edge(later, earlier) || has_path_connecting(&*g, earlier, later, None) {
                    continue;
                }
                g.add_edge(later, earlier, ());
            }
        }
    }
}

/// Replace every choice node by one of its alternatives. Returns the
/// choice nodes that could not be resolved; they stay in the graph.
fn choose_alternatives<G: ActionGraph + ?Sized>(
    graph: &G,
    g: &mut DiGraphMap<ActionId, ()>,
    roots: &mut [ActionId],
    satisfaction: &mut Satisfaction<'_, G>,
) -> Result<Vec<ActionId>, OrchestraError> {
    let mut choices: Vec<(ActionId, AnyOf)> = g
        .nodes()
        .filter_map(|n| match graph.node(n) {
            ActionNode::AnyOf(any_of) => Some((n, any_of.clone())),
            ActionNode::Concrete(_) => None,
        })
        .collect();
    choices.sort_by_key(|(n, _)| *n);

    let mut unsatisfiable = Vec::new();
    for (choice, any_of) in choices {
        let mut consumers: Vec<ActionId> = g.neighbors_directed(choice, Direction::Incoming).collect();
        consumers.sort();
        g.remove_node(choice);

        let creates_cycle = |g: &DiGraphMap<ActionId, ()>, alternative: ActionId| {
            consumers
                .iter()
                .any(|c| *c == alternative || has_path_connecting(g, alternative, *c, None))
        };

        let mut picked = None;
        for alternative in any_of.ordered_alternatives() {
            if satisfaction.get(alternative)? {
                picked = Some(alternative);
                break;
            }
        }
        if picked.is_none() && !creates_cycle(&*g, any_of.preferred) {
            picked = Some(any_of.preferred);
        }
        if picked.is_none() {
            picked = any_of
                .ordered_alternatives()
                .find(|a| !creates_cycle(&*g, *a));
        }

        match picked {
            Some(alternative) => {
                tracing::debug!("{} -> {}", graph.name(choice), graph.name(alternative));
                g.add_node(alternative);
                for consumer in &consumers {
                    g.add_edge(*consumer, alternative, ());
                }
                for root in roots.iter_mut() {
                    if *root == choice {
                        *root = alternative;
                    }
                }
            }
            None => {
                for consumer in &consumers {
                    g.add_edge(*consumer, choice, ());
                }
                for alternative in &any_of.alternatives {
                    g.add_edge(choice, *alternative, ());
                }
                unsatisfiable.push(choice);
            }
        }
    }
    Ok(unsatisfiable)
}

/// Drop nodes unreachable from the roots, then satisfied leaves until a
/// fixed point. A satisfied action keeps its unsatisfied dependencies.
fn prune<G: ActionGraph + ?Sized>(
    g: &mut DiGraphMap<ActionId, ()>,
    roots: &[ActionId],
    forced: &HashSet<ActionId>,
    satisfaction: &mut Satisfaction<'_, G>,
) -> Result<(), OrchestraError> {
    let nodes: Vec<ActionId> = g.nodes().collect();

    let mut reachable = HashSet::new();
    let mut stack: Vec<ActionId> = roots.iter().copied().filter(|r| g.contains_node(*r)).collect();
    while let Some(node) = stack.pop() {
        if reachable.insert(node) {
            stack.extend(g.neighbors_directed(node, Direction::Outgoing));
        }
    }
    for node in &nodes {
        if !reachable.contains(node) {
            g.remove_node(*node);
        }
    }

    loop {
        let mut leaves = Vec::new();
        for node in g.nodes() {
            if forced.contains(&node) || g.neighbors_directed(node, Direction::Outgoing).next().is_some() {
                continue;
            }
            if matches!(satisfaction.graph.node(node), ActionNode::Concrete(_)) && satisfaction.get(node)? {
                leaves.push(node);
            }
        }
        if leaves.is_empty() {
            return Ok(());
        }
        for leaf in leaves {
            g.remove_node(leaf);
        }
    }
}

/// Remove every edge implied by a longer path. The graph must be acyclic.
fn transitive_reduction(g: &mut DiGraphMap<ActionId, ()>) {
    let mut nodes: Vec<ActionId> = g.nodes().collect();
    nodes.sort();
    for node in nodes {
        let direct: Vec<ActionId> = g.neighbors_directed(node, Direction::Outgoing).collect();
        for target in &direct {
            let implied = direct.iter().any(|other| {
                other != target && g.contains_edge(node, *other) && has_path_connecting(&*g, *other, *target, None)
            });
            if implied {
                g.remove_edge(node, *target);
            }
        }
    }
}
