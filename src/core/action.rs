//! Actions and the static action graph
//!
//! Every component gets a `Clone` action (when it has a repository) and every
//! build a `Configure` and an `Install` action. Non-exact dependencies point
//! to [`AnyOf`] choice nodes. Actions live in an arena and are referred to by
//! [`ActionId`].

use std::collections::HashMap;
use std::fmt;

use crate::core::component::Component;
use crate::core::dependency::DependencySpec;

/// Handle of an action in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(pub usize);

/// A concrete unit of work
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionKind {
    /// Clone the sources of a component
    Clone { component: String },
    /// Run the configure script of a build
    Configure { component: String, build: String },
    /// Install a build into the orchestra root
    Install { component: String, build: String },
}

impl ActionKind {
    /// Component the action belongs to
    pub fn component(&self) -> &str {
        match self {
            Self::Clone { component }
            | Self::Configure { component, .. }
            | Self::Install { component, .. } => component,
        }
    }

    /// Build the action belongs to (`None` for clone)
    pub fn build(&self) -> Option<&str> {
        match self {
            Self::Clone { .. } => None,
            Self::Configure { build, .. } | Self::Install { build, .. } => Some(build),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clone { component } => write!(f, "clone {component}"),
            Self::Configure { component, build } => write!(f, "configure {component}@{build}"),
            Self::Install { component, build } => write!(f, "install {component}@{build}"),
        }
    }
}

/// Choice between equivalent alternatives
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnyOf {
    /// Alternatives, sorted
    pub alternatives: Vec<ActionId>,
    /// Preferred alternative, one of `alternatives`
    pub preferred: ActionId,
}

impl AnyOf {
    /// Alternatives in evaluation order: preferred first, then the rest in order
    pub fn ordered_alternatives(&self) -> impl Iterator<Item = ActionId> + '_ {
        std::iter::once(self.preferred).chain(
            self.alternatives
                .iter()
                .copied()
                .filter(move |a| *a != self.preferred),
        )
    }
}

/// A vertex of the action graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionNode {
    Concrete(ActionKind),
    AnyOf(AnyOf),
}

/// Arena of every action of a configuration
#[derive(Debug, Default, Clone)]
pub struct ActionIndex {
    nodes: Vec<ActionNode>,
    concrete: HashMap<ActionKind, ActionId>,
    any_of: HashMap<AnyOf, ActionId>,
    /// Statically known dependencies of each node
    declared: Vec<Vec<ActionId>>,
}

impl ActionIndex {
    /// Build the arena for a set of resolved components.
    ///
    /// Every dependency must name an existing component and build.
    pub fn build<'a>(components: impl IntoIterator<Item = &'a Component> + Clone) -> Self {
        let mut index = Self::default();

        // First pass: one node per concrete action
        for component in components.clone() {
            if component.is_cloneable() {
                index.intern(ActionKind::Clone {
                    component: component.name.clone(),
                });
            }
            for build in component.builds.values() {
                index.intern(ActionKind::Configure {
                    component: component.name.clone(),
                    build: build.name.clone(),
                });
                index.intern(ActionKind::Install {
                    component: component.name.clone(),
                    build: build.name.clone(),
                });
            }
        }

        let by_name: HashMap<&str, &Component> =
            components.clone().into_iter().map(|c| (c.name.as_str(), c)).collect();

        // Second pass: dependency edges
        for component in components {
            for build in component.builds.values() {
                let configure = index.intern(ActionKind::Configure {
                    component: component.name.clone(),
                    build: build.name.clone(),
                });
                let install = index.intern(ActionKind::Install {
                    component: component.name.clone(),
                    build: build.name.clone(),
                });

                let mut configure_deps = Vec::new();
                if component.is_cloneable() {
                    configure_deps.push(index.intern(ActionKind::Clone {
                        component: component.name.clone(),
                    }));
                }
                let mut install_deps = Vec::new();
                for spec in &build.dependencies {
                    if let Some(id) = index.resolve(spec, &by_name) {
                        configure_deps.push(id);
                        install_deps.push(id);
                    }
                }
                for spec in &build.build_dependencies {
                    if let Some(id) = index.resolve(spec, &by_name) {
                        configure_deps.push(id);
                    }
                }
                install_deps.push(configure);

                index.declared[configure.0] = dedup(configure_deps);
                index.declared[install.0] = dedup(install_deps);
            }
        }
        index
    }

    fn intern(&mut self, kind: ActionKind) -> ActionId {
        if let Some(id) = self.concrete.get(&kind) {
            return *id;
        }
        let id = ActionId(self.nodes.len());
        self.nodes.push(ActionNode::Concrete(kind.clone()));
        self.declared.push(Vec::new());
        self.concrete.insert(kind, id);
        id
    }

    fn intern_any_of(&mut self, any_of: AnyOf) -> ActionId {
        if let Some(id) = self.any_of.get(&any_of) {
            return *id;
        }
        let id = ActionId(self.nodes.len());
        self.nodes.push(ActionNode::AnyOf(any_of.clone()));
        self.declared.push(any_of.alternatives.clone());
        self.any_of.insert(any_of, id);
        id
    }

    /// Node a dependency edge points to
    fn resolve(
        &mut self,
        spec: &DependencySpec,
        components: &HashMap<&str, &Component>,
    ) -> Option<ActionId> {
        let target = components.get(spec.component.as_str())?;
        let install_of = |build: &str| ActionKind::Install {
            component: target.name.clone(),
            build: build.to_string(),
        };

        if spec.exact {
            let build = spec.build.as_deref()?;
            return self.lookup(&install_of(build));
        }

        let preferred_build = spec.build.as_deref().unwrap_or(&target.default_build);
        let preferred = self.lookup(&install_of(preferred_build))?;
        let mut alternatives: Vec<ActionId> = target
            .builds
            .keys()
            .filter_map(|b| self.lookup(&install_of(b)))
            .collect();
        alternatives.sort();
        Some(self.intern_any_of(AnyOf {
            alternatives,
            preferred,
        }))
    }

    /// Id of a concrete action
    pub fn lookup(&self, kind: &ActionKind) -> Option<ActionId> {
        self.concrete.get(kind).copied()
    }

    /// Node behind an id
    pub fn node(&self, id: ActionId) -> &ActionNode {
        &self.nodes[id.0]
    }

    /// Concrete action behind an id, `None` for choice nodes
    pub fn kind(&self, id: ActionId) -> Option<&ActionKind> {
        match self.node(id) {
            ActionNode::Concrete(kind) => Some(kind),
            ActionNode::AnyOf(_) => None,
        }
    }

    /// Statically declared dependencies. For installs this includes the
    /// configure action of the same build.
    pub fn declared_dependencies(&self, id: ActionId) -> &[ActionId] {
        &self.declared[id.0]
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the arena is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every id in the arena
    pub fn ids(&self) -> impl Iterator<Item = ActionId> {
        (0..self.nodes.len()).map(ActionId)
    }

    /// Human-readable name of a node
    pub fn name(&self, id: ActionId) -> String {
        match self.node(id) {
            ActionNode::Concrete(kind) => kind.to_string(),
            ActionNode::AnyOf(any_of) => {
                let names: Vec<String> = any_of
                    .ordered_alternatives()
                    .map(|a| self.name(a))
                    .collect();
                format!("any of ({})", names.join(" | "))
            }
        }
    }
}

fn dedup(ids: Vec<ActionId>) -> Vec<ActionId> {
    let mut seen = std::collections::HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}
