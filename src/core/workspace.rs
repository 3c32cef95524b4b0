//! Per-invocation context
//!
//! A [`Workspace`] ties the read-only [`Configuration`] to the mutable state
//! around it: the VCS adapter, script runner, install metadata, caches and
//! the options of the current command. It is the live action graph the
//! solver queries and the runner the executor drives.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::defaults::{CONFIGURE_SENTINEL, NO_REPOSITORY};
use crate::core::action::{ActionId, ActionKind, ActionNode};
use crate::core::binary_archives::{self, BinaryArchives};
use crate::core::component::{Build, Component};
use crate::core::configuration::Configuration;
use crate::core::environment::ScriptEnvironment;
use crate::core::executor::{self, ActionRunner, ExecutionReport, ExecutorOptions};
use crate::core::hashing::{CommitSource, HashMaterialCache};
use crate::core::install;
use crate::core::loader;
use crate::core::metadata::MetadataStore;
use crate::core::remote_heads::{preferred_commit, Heads, RemoteHeadsCache};
use crate::core::solver::{self, ActionGraph, SolvedGraph, SolverOptions};
use crate::error::{InstallError, OrchestraError};
use crate::infra::filesystem;
use crate::infra::git::{CloneOptions, GitCli, Vcs};
use crate::infra::script::{ScriptFlavor, ScriptInvocation, ScriptRunner};

/// Where installs may get their files from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchiveMode {
    /// Binary archives only
    #[default]
    ArchivesOnly,
    /// Binary archives, building when none matches (`-b`)
    FallbackToBuild,
    /// Always build (`-B`)
    ForceBuild,
}

/// Options of the running command
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkspaceOptions {
    pub archive_mode: ArchiveMode,
    /// Stage and record nothing in the orchestra root
    pub no_merge: bool,
    pub keep_tmproot: bool,
    pub run_tests: bool,
    pub create_binary_archives: bool,
    /// Stream user script output to the console
    pub stream_output: bool,
}

/// Configuration plus everything an action needs to run
pub struct Workspace {
    pub config: Configuration,
    pub metadata: MetadataStore,
    pub archives: BinaryArchives,
    pub options: WorkspaceOptions,
    vcs: Arc<dyn Vcs>,
    scripts: ScriptRunner,
    materials: HashMaterialCache,
    heads: RefCell<RemoteHeadsCache>,
    commits: RefCell<HashMap<String, Option<String>>>,
    hashes: RefCell<HashMap<String, String>>,
    /// Components named on the command line
    requested: BTreeSet<String>,
}

impl Workspace {
    /// Load the configuration of `dotdir` and build a workspace around it
    pub fn open(dotdir: &Path) -> Result<Self, OrchestraError> {
        let expander = loader::select_expander()?;
        let config = Configuration::load(dotdir, expander.as_ref())?;
        Self::new(config, Box::new(GitCli::new()))
    }

    pub fn new(config: Configuration, vcs: Box<dyn Vcs>) -> Result<Self, OrchestraError> {
        let heads = RemoteHeadsCache::load(&config.paths.remote_heads_cache())?;
        Ok(Self {
            metadata: MetadataStore::new(&config.paths.root),
            archives: BinaryArchives::new(&config),
            materials: HashMaterialCache::new(config.paths.hash_material_dir()),
            options: WorkspaceOptions::default(),
            vcs: Arc::from(vcs),
            scripts: ScriptRunner::new(),
            heads: RefCell::new(heads),
            commits: RefCell::new(HashMap::new()),
            hashes: RefCell::new(HashMap::new()),
            requested: BTreeSet::new(),
            config,
        })
    }

    #[must_use]
    pub fn with_options(mut self, options: WorkspaceOptions) -> Self {
        self.options = options;
        self
    }

    pub fn vcs(&self) -> &dyn Vcs {
        self.vcs.as_ref()
    }

    /// Handle on the VCS adapter for work moved off this thread
    pub fn shared_vcs(&self) -> Arc<dyn Vcs> {
        Arc::clone(&self.vcs)
    }

    pub fn scripts(&self) -> &ScriptRunner {
        &self.scripts
    }

    /// Mark components as explicitly requested by the user
    pub fn request<I, S>(&mut self, components: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requested.extend(components.into_iter().map(Into::into));
    }

    pub fn is_requested(&self, component: &str) -> bool {
        self.requested.contains(component)
    }

    /// Forget cached commits and hashes, e.g. after a clone
    pub fn invalidate_caches(&self) {
        self.commits.borrow_mut().clear();
        self.hashes.borrow_mut().clear();
    }

    /// Swap in a freshly built remote heads cache
    pub fn replace_remote_heads(&self, cache: RemoteHeadsCache) {
        *self.heads.borrow_mut() = cache;
        self.invalidate_caches();
    }

    // ============================================
    // Commit identity and hashing
    // ============================================

    /// Cached remote heads of a component, filled with `ls-remote` on a miss
    pub fn remote_heads(&self, component: &Component) -> Option<Heads> {
        if let Some(heads) = self.heads.borrow().get(&component.name) {
            return Some(heads.clone());
        }
        for url in self.config.repository_urls(component) {
            match self.vcs.ls_remote(&url) {
                Ok(heads) => {
                    let mut cache = self.heads.borrow_mut();
                    cache.set(&component.name, heads.clone());
                    if let Err(e) = cache.save() {
                        tracing::warn!("Could not save remote heads cache: {e}");
                    }
                    return Some(heads);
                }
                Err(e) => tracing::debug!("ls-remote {url} failed: {e}"),
            }
        }
        None
    }

    /// Current commit of a component: its local clone when present, the
    /// preferred branch of its remote heads otherwise
    fn compute_commit(&self, component: &Component) -> Result<Option<String>, OrchestraError> {
        if !component.is_cloneable() {
            return Ok(None);
        }
        let source_dir = self.config.paths.source_dir(&component.name);
        if source_dir.join(".git").exists() {
            return Ok(Some(self.vcs.rev_parse(&source_dir, "HEAD")?));
        }
        let Some(heads) = self.remote_heads(component) else {
            tracing::warn!("Unknown commit for {}", component.name);
            return Ok(None);
        };
        Ok(preferred_commit(&heads, &self.config.branches).map(|(_, commit)| commit.to_string()))
    }

    /// Recursive hash of a component
    pub fn recursive_hash(&self, component: &str) -> Result<String, OrchestraError> {
        if let Some(hash) = self.hashes.borrow().get(component) {
            return Ok(hash.clone());
        }
        let hash = self.materials.recursive_hash(&self.config, component, self)?;
        self.hashes
            .borrow_mut()
            .insert(component.to_string(), hash.clone());
        Ok(hash)
    }

    /// Recursive hash material of a component
    pub fn hash_material(&self, component: &str) -> Result<String, OrchestraError> {
        self.materials.material(&self.config, component, self)
    }

    /// Branch the configuration repository is on, `none` outside git
    pub fn config_branch(&self) -> String {
        self.vcs
            .current_branch(&self.config.paths.config_dir())
            .ok()
            .flatten()
            .unwrap_or_else(|| NO_REPOSITORY.to_string())
    }

    // ============================================
    // Binary archives and install sources
    // ============================================

    /// Archive location of a build, relative to an archive repository
    pub fn archive_relative_path(&self, build: &Build) -> Result<PathBuf, OrchestraError> {
        let component = self.config.component(&build.component)?;
        let commit = self.commit(component)?;
        let hash = self.recursive_hash(&build.component)?;
        Ok(binary_archives::relative_archive_path(
            &build.component,
            &build.name,
            &binary_archives::archive_name(commit.as_deref(), &hash),
        ))
    }

    /// Whether binary archives may be used for a component
    pub fn can_use_archives(&self, component: &Component) -> bool {
        self.options.archive_mode != ArchiveMode::ForceBuild
            && !component.build_from_source
            && !self.archives.is_empty()
    }

    /// Whether a component may be built from source
    pub fn can_build(&self, component: &Component) -> bool {
        self.options.archive_mode != ArchiveMode::ArchivesOnly || component.build_from_source
    }

    /// Local path of a usable archive for `build`
    pub fn usable_archive(&self, build: &Build) -> Result<Option<PathBuf>, OrchestraError> {
        let component = self.config.component(&build.component)?;
        if !self.can_use_archives(component) {
            return Ok(None);
        }
        Ok(self.archives.locate(&self.archive_relative_path(build)?))
    }

    // ============================================
    // Satisfaction
    // ============================================

    /// Whether the installed build of a component is this one, up to date
    pub fn is_installed_current(&self, build: &Build) -> Result<bool, OrchestraError> {
        let Some(metadata) = self.metadata.load(&build.component)? else {
            return Ok(false);
        };
        if metadata.build != build.name {
            return Ok(false);
        }
        Ok(metadata.recursive_hash == self.recursive_hash(&build.component)?)
    }

    fn build_for(&self, kind: &ActionKind) -> Result<&Build, OrchestraError> {
        self.config.build_of(kind).ok_or_else(|| {
            OrchestraError::Generic(format!("No build behind action '{kind}'"))
        })
    }

    fn satisfied(&self, kind: &ActionKind) -> Result<bool, OrchestraError> {
        match kind {
            ActionKind::Clone { component } => Ok(self.config.paths.source_dir(component).exists()),
            ActionKind::Configure { component, build } => Ok(self
                .config
                .paths
                .build_dir(component, build)
                .join(CONFIGURE_SENTINEL)
                .exists()),
            ActionKind::Install { .. } => self.is_installed_current(self.build_for(kind)?),
        }
    }

    // ============================================
    // Planning
    // ============================================

    /// Install action of `component[@build]`
    pub fn install_root(&self, name: &str) -> Result<ActionId, OrchestraError> {
        let build = self.config.resolve_build(name)?;
        self.action_id(&self.config.install_action(build))
    }

    /// Configure action of `component[@build]`
    pub fn configure_root(&self, name: &str) -> Result<ActionId, OrchestraError> {
        let build = self.config.resolve_build(name)?;
        self.action_id(&self.config.configure_action(build))
    }

    /// Clone action of `component`
    pub fn clone_root(&self, name: &str) -> Result<ActionId, OrchestraError> {
        let component = self.config.component(name)?;
        self.action_id(&ActionKind::Clone {
            component: component.name.clone(),
        })
        .map_err(|_| {
            OrchestraError::Generic(format!("Component '{name}' has no repository to clone"))
        })
    }

    fn action_id(&self, kind: &ActionKind) -> Result<ActionId, OrchestraError> {
        self.config
            .actions
            .lookup(kind)
            .ok_or_else(|| OrchestraError::Generic(format!("Unknown action '{kind}'")))
    }

    /// Solve the graph rooted at `roots`
    pub fn solve(&self, roots: &[ActionId], options: SolverOptions) -> Result<SolvedGraph, OrchestraError> {
        solver::solve(self, roots, options)
    }

    /// Solve `roots` and execute the plan
    pub fn run_roots(
        &mut self,
        roots: &[ActionId],
        solver_options: SolverOptions,
        executor_options: ExecutorOptions,
    ) -> Result<ExecutionReport, OrchestraError> {
        let solved = self.solve(roots, solver_options)?;
        executor::execute(&solved, self, executor_options)
    }

    // ============================================
    // Actions
    // ============================================

    fn run_clone(&self, component: &Component) -> Result<(), OrchestraError> {
        self.vcs.ensure_available()?;
        let destination = self.config.paths.source_dir(&component.name);
        let branch = self.remote_heads(component).and_then(|heads| {
            preferred_commit(&heads, &self.config.branches).map(|(branch, _)| branch.to_string())
        });
        let options = CloneOptions {
            branch,
            skip_lfs_smudge: false,
        };

        let mut last_error = None;
        for url in self.config.repository_urls(component) {
            tracing::info!("Cloning {url}");
            match self.vcs.clone_repo(&url, &destination, &options) {
                Ok(()) => {
                    self.invalidate_caches();
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!("Cloning {url} failed: {e}");
                    filesystem::remove_dir_all(&destination)?;
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) => Err(e.into()),
            None => Err(OrchestraError::Generic(format!(
                "No remote configured to clone '{}'",
                component.name
            ))),
        }
    }

    fn run_configure(&self, component: &Component, build: &Build) -> Result<(), OrchestraError> {
        let build_dir = self.config.paths.build_dir(&build.component, &build.name);
        let sentinel = build_dir.join(CONFIGURE_SENTINEL);
        filesystem::remove_file(&sentinel)?;
        filesystem::create_dir_all(&build_dir)?;

        let env = ScriptEnvironment::for_build(&self.config, component, build)
            .with_run_tests(self.options.run_tests);
        let prelude = env.prelude();
        let name = format!("configure {}", build.qualified_name());
        self.scripts.run(
            &ScriptInvocation {
                name: &name,
                body: &build.configure,
                working_dir: &build_dir,
                env: env.vars(),
                prelude: &prelude,
            },
            ScriptFlavor::User {
                stream_output: self.options.stream_output,
            },
            true,
        )?;

        if !build_dir.is_dir() {
            return Err(InstallError::ConfigureSentinelParentMissing { path: build_dir }.into());
        }
        filesystem::write_atomic(&sentinel, b"")
    }
}

impl CommitSource for Workspace {
    fn commit(&self, component: &Component) -> Result<Option<String>, OrchestraError> {
        if let Some(commit) = self.commits.borrow().get(&component.name) {
            return Ok(commit.clone());
        }
        let commit = self.compute_commit(component)?;
        self.commits
            .borrow_mut()
            .insert(component.name.clone(), commit.clone());
        Ok(commit)
    }
}

impl ActionGraph for Workspace {
    fn node(&self, id: ActionId) -> &ActionNode {
        self.config.actions.node(id)
    }

    /// Installs only depend on their configure when they will build
    fn dependencies(&self, id: ActionId) -> Result<Vec<ActionId>, OrchestraError> {
        let declared = self.config.actions.declared_dependencies(id);
        let Some(kind @ ActionKind::Install { .. }) = self.config.actions.kind(id) else {
            return Ok(declared.to_vec());
        };
        let build = self.build_for(kind)?;
        let component = self.config.component(&build.component)?;
        let needs_configure =
            self.can_build(component) && self.usable_archive(build)?.is_none();
        if needs_configure {
            return Ok(declared.to_vec());
        }
        let configure = self.config.configure_action(build);
        Ok(declared
            .iter()
            .copied()
            .filter(|dep| self.config.actions.kind(*dep) != Some(&configure))
            .collect())
    }

    fn is_satisfied(&self, id: ActionId) -> Result<bool, OrchestraError> {
        match self.config.actions.kind(id) {
            Some(kind) => self.satisfied(kind),
            None => Ok(false),
        }
    }

    fn name(&self, id: ActionId) -> String {
        self.config.actions.name(id)
    }
}

impl ActionRunner for Workspace {
    fn run(&mut self, id: ActionId) -> Result<(), OrchestraError> {
        let kind = self
            .config
            .actions
            .kind(id)
            .cloned()
            .ok_or_else(|| OrchestraError::Generic("Cannot run a choice node".to_string()))?;
        let component = self.config.component(kind.component())?;
        match &kind {
            ActionKind::Clone { .. } => self.run_clone(component),
            ActionKind::Configure { .. } => self.run_configure(component, self.build_for(&kind)?),
            ActionKind::Install { .. } => {
                install::install(self, self.build_for(&kind)?).map(|_| ())
            }
        }
    }

    fn verify(&mut self, id: ActionId) -> Result<bool, OrchestraError> {
        if self.options.no_merge
            && matches!(self.config.actions.kind(id), Some(ActionKind::Install { .. }))
        {
            return Ok(true);
        }
        ActionGraph::is_satisfied(self, id)
    }

    fn describe(&self, id: ActionId) -> String {
        self.config.actions.name(id)
    }
}
