//! Script load pipeline
//!
//! A batch is read and parsed on the calling thread, constructed on the
//! worker pool, and then activated on the calling thread in three strictly
//! ordered phases: `pre_load` for every structure of the batch in ascending
//! priority, `load` for every structure script by script in file order, and
//! `post_load` in the same order. A structure that fails a phase is dropped
//! from its script; the rest of the batch carries on.

use std::collections::HashSet;
use std::fs;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use skhost_events::{EventCatalog, EventHost, EventPriority, HostEvent};

use crate::context::{ActivationContext, activate, deactivate};
use crate::discovery::{discover, enabled_path};
use crate::dispatch::EventRouter;
use crate::error::{ErrorReporter, Phase, ScriptError, TracingReporter, panic_message};
use crate::pool::{ResourceScope, ScopeGuard, TaskHandle, WorkerPool};
use crate::registry::ScriptRegistry;
use crate::source::{SourceTree, read_source};
use crate::structure::{ParseContext, Script, Structure, StructureParser};

/// Canonical form of a script path that may no longer exist
///
/// A deleted file still resolves through its parent directory, so it matches
/// the canonical path it was loaded under.
fn resolve_script(path: &Path) -> PathBuf {
    if let Ok(resolved) = fs::canonicalize(path) {
        return resolved;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => {
            let parent = if parent.as_os_str().is_empty() { Path::new(".") } else { parent };
            match fs::canonicalize(parent) {
                Ok(parent) => parent.join(name),
                Err(_) => path.to_path_buf(),
            }
        }
        _ => path.to_path_buf(),
    }
}

/// Number of files and structures loaded (or unloaded)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub files: usize,
    pub structures: usize,
}

impl LoadSummary {
    pub const fn new(files: usize, structures: usize) -> Self {
        Self { files, structures }
    }
}

impl Add for LoadSummary {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.files + rhs.files, self.structures + rhs.structures)
    }
}

impl AddAssign for LoadSummary {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for LoadSummary {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(
            self.files.saturating_sub(rhs.files),
            self.structures.saturating_sub(rhs.structures),
        )
    }
}

impl SubAssign for LoadSummary {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Sum for LoadSummary {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

/// Observability hooks around batches and script lifecycle
pub trait LoadObserver: Send + Sync {
    /// Called once per batch, after parsing and before construction starts
    fn batch_started(&self, _scripts: usize) {}

    fn script_loaded(&self, _path: &Path, _structures: usize) {}

    fn script_unloaded(&self, _path: &Path) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl LoadObserver for NoopObserver {}

pub struct ScriptLoaderBuilder {
    parser: Arc<dyn StructureParser>,
    catalog: Arc<EventCatalog>,
    host: Arc<dyn EventHost>,
    workers: usize,
    reporter: Arc<dyn ErrorReporter>,
    observer: Arc<dyn LoadObserver>,
}

impl ScriptLoaderBuilder {
    /// Worker pool size; 0 constructs scripts on the calling thread
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn LoadObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn build(self) -> ScriptLoader {
        let router = EventRouter::new(
            Arc::clone(&self.catalog),
            self.host,
            Arc::clone(&self.reporter),
        );
        ScriptLoader {
            pool: WorkerPool::new(self.workers, Arc::clone(&self.reporter)),
            registry: Arc::new(ScriptRegistry::new()),
            router,
            parser: self.parser,
            catalog: self.catalog,
            reporter: self.reporter,
            observer: self.observer,
        }
    }
}

/// Owns the scripts of a host: loads, activates, unloads and routes events
///
/// Batch operations take `&mut self`, so activation phases only ever run on
/// the context that owns the loader.
pub struct ScriptLoader {
    pool: WorkerPool,
    registry: Arc<ScriptRegistry>,
    router: EventRouter,
    parser: Arc<dyn StructureParser>,
    catalog: Arc<EventCatalog>,
    reporter: Arc<dyn ErrorReporter>,
    observer: Arc<dyn LoadObserver>,
}

fn run_pre_load(s: &mut dyn Structure, ctx: &mut ActivationContext<'_>) -> anyhow::Result<bool> {
    s.pre_load(ctx)
}

fn run_load(s: &mut dyn Structure, ctx: &mut ActivationContext<'_>) -> anyhow::Result<bool> {
    s.load(ctx)
}

fn run_post_load(s: &mut dyn Structure, ctx: &mut ActivationContext<'_>) -> anyhow::Result<bool> {
    s.post_load(ctx)
}

/// Compile the top-level nodes of one file; runs on a pool worker
fn construct_script(
    tree: SourceTree,
    parser: &dyn StructureParser,
    catalog: &EventCatalog,
    reporter: &dyn ErrorReporter,
) -> Script {
    let path = tree.path().to_path_buf();
    let mut script = Script::new(path.clone());
    let ctx = ParseContext {
        script: &path,
        catalog,
        reporter,
    };

    for node in tree.nodes() {
        let parsed = catch_unwind(AssertUnwindSafe(|| parser.parse_structure(node, &ctx)));
        let message = match parsed {
            Ok(Ok(Some(structure))) => {
                script.push(structure);
                continue;
            }
            Ok(Ok(None)) => continue,
            Ok(Err(e)) => format!("{e:#}"),
            Err(payload) => panic_message(payload.as_ref()),
        };
        reporter.report(&ScriptError::parse(&path, Some(node.line()), message));
    }

    debug!(
        target: "scripting",
        "Constructed {} with {} structure(s)",
        path.display(),
        script.structure_count()
    );
    script
}

impl ScriptLoader {
    pub fn builder(
        parser: Arc<dyn StructureParser>,
        catalog: Arc<EventCatalog>,
        host: Arc<dyn EventHost>,
    ) -> ScriptLoaderBuilder {
        ScriptLoaderBuilder {
            parser,
            catalog,
            host,
            workers: 0,
            reporter: Arc::new(TracingReporter),
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn registry(&self) -> &Arc<ScriptRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    pub fn worker_count(&self) -> usize {
        self.pool.size()
    }

    /// Resize the construction pool; see [`WorkerPool::set_size`]
    pub fn set_worker_count(&mut self, workers: usize) {
        self.pool.set_size(workers);
    }

    // ===== Loading =====

    /// Load a batch of script files
    ///
    /// Construction runs on the worker pool when it has workers; the returned
    /// future then waits for every construction task before activating. With
    /// no workers the whole batch completes on the first poll.
    pub async fn load_scripts(
        &mut self,
        paths: &[PathBuf],
        scope: Arc<dyn ResourceScope>,
    ) -> Result<LoadSummary, ScriptError> {
        let handles = self.begin_batch(paths, &scope)?;
        let mut built = Vec::with_capacity(handles.len());
        for handle in handles {
            built.push(handle.await);
        }
        self.finish_batch(built, scope.as_ref())
    }

    /// Blocking variant of [`ScriptLoader::load_scripts`] for callers outside an async runtime
    pub fn load_scripts_blocking(
        &mut self,
        paths: &[PathBuf],
        scope: Arc<dyn ResourceScope>,
    ) -> Result<LoadSummary, ScriptError> {
        let handles = self.begin_batch(paths, &scope)?;
        let built = handles.into_iter().map(TaskHandle::wait).collect();
        self.finish_batch(built, scope.as_ref())
    }

    /// Discover every script under `root`, record the disabled ones, and load the rest
    pub async fn load_directory(
        &mut self,
        root: &Path,
        scope: Arc<dyn ResourceScope>,
    ) -> Result<LoadSummary, ScriptError> {
        let enabled = self.scan(root);
        self.load_scripts(&enabled, scope).await
    }

    /// Blocking variant of [`ScriptLoader::load_directory`]
    pub fn load_directory_blocking(
        &mut self,
        root: &Path,
        scope: Arc<dyn ResourceScope>,
    ) -> Result<LoadSummary, ScriptError> {
        let enabled = self.scan(root);
        self.load_scripts_blocking(&enabled, scope)
    }

    fn scan(&self, root: &Path) -> Vec<PathBuf> {
        let found = discover(root, self.reporter.as_ref());

        // Forget markers under `root` whose files are gone from disk
        let base = resolve_script(root);
        let pruned = self.registry.retain_disabled(|marker| {
            !marker.starts_with(&base) || marker.exists() || enabled_path(marker).exists()
        });
        if pruned > 0 {
            debug!(target: "scripting", "Dropped {} stale disabled marker(s)", pruned);
        }

        for marker in &found.disabled {
            self.registry.mark_disabled(&resolve_script(marker));
        }
        found.enabled
    }

    /// Resolve, validate and parse the inputs, then submit construction tasks
    fn begin_batch(
        &self,
        paths: &[PathBuf],
        scope: &Arc<dyn ResourceScope>,
    ) -> Result<Vec<TaskHandle<Script>>, ScriptError> {
        let mut canonical = Vec::with_capacity(paths.len());
        for path in paths {
            match fs::canonicalize(path) {
                Ok(resolved) => canonical.push(resolved),
                Err(source) => self.reporter.report(&ScriptError::Source {
                    path: path.clone(),
                    source,
                }),
            }
        }

        let mut seen = HashSet::new();
        for path in &canonical {
            if !seen.insert(path.as_path()) {
                return Err(ScriptError::invariant(format!(
                    "script {} is listed twice in one batch",
                    path.display()
                )));
            }
            if self.registry.is_loaded(path) {
                return Err(ScriptError::invariant(format!(
                    "script {} is already loaded",
                    path.display()
                )));
            }
        }

        let mut trees = Vec::with_capacity(canonical.len());
        for path in canonical {
            match read_source(&path, self.reporter.as_ref()) {
                Ok(tree) => trees.push(tree),
                Err(e) => self.reporter.report(&e),
            }
        }

        self.observer.batch_started(trees.len());
        debug!(
            target: "scripting",
            "Constructing {} script(s) on {} worker(s)",
            trees.len(),
            self.pool.size()
        );

        Ok(trees
            .into_iter()
            .map(|tree| {
                let parser = Arc::clone(&self.parser);
                let catalog = Arc::clone(&self.catalog);
                let reporter = Arc::clone(&self.reporter);
                self.pool.submit(Arc::clone(scope), move || {
                    Ok(construct_script(
                        tree,
                        parser.as_ref(),
                        catalog.as_ref(),
                        reporter.as_ref(),
                    ))
                })
            })
            .collect())
    }

    /// Activate the constructed scripts and record them in the registry
    fn finish_batch(
        &mut self,
        built: Vec<Result<Script, ScriptError>>,
        scope: &dyn ResourceScope,
    ) -> Result<LoadSummary, ScriptError> {
        // Construction failures were reported by the pool
        let mut scripts: Vec<Script> = built.into_iter().filter_map(Result::ok).collect();

        let guard = ScopeGuard::open(scope)
            .map_err(|e| ScriptError::pool(format!("failed to open resource scope: {e:#}")))?;

        self.pre_load_phase(&mut scripts);
        self.file_order_phase(&mut scripts, Phase::Load, run_load);
        self.file_order_phase(&mut scripts, Phase::PostLoad, run_post_load);

        if let Err(e) = guard.close() {
            self.reporter
                .report(&ScriptError::pool(format!("failed to close resource scope: {e:#}")));
        }

        let mut summary = LoadSummary::default();
        for script in scripts {
            let path = script.path().to_path_buf();
            let count = script.structure_count();
            match self.registry.insert(script) {
                Ok(()) => {
                    summary += LoadSummary::new(1, count);
                    self.observer.script_loaded(&path, count);
                }
                Err(e) => self.reporter.report(&e),
            }
        }

        info!(
            target: "scripting",
            "Loaded {} script(s) with {} structure(s)",
            summary.files,
            summary.structures
        );
        Ok(summary)
    }

    /// `pre_load` across the whole batch in ascending structure priority
    fn pre_load_phase(&mut self, scripts: &mut [Script]) {
        let mut order: Vec<(i32, usize, usize)> = scripts
            .iter()
            .enumerate()
            .flat_map(|(si, script)| {
                script
                    .structures
                    .iter()
                    .enumerate()
                    .map(move |(ti, structure)| (structure.priority(), si, ti))
            })
            .collect();
        // Stable, so equal priorities keep batch and file order
        order.sort_by_key(|&(priority, ..)| priority);

        let mut rejected: Vec<Vec<bool>> = scripts
            .iter()
            .map(|script| vec![false; script.structure_count()])
            .collect();

        for (_, si, ti) in order {
            let (path, structures) = scripts[si].parts_mut();
            let kept = activate(
                &mut self.router,
                self.reporter.as_ref(),
                path,
                structures[ti].as_mut(),
                Phase::PreLoad,
                run_pre_load,
            );
            if !kept {
                rejected[si][ti] = true;
            }
        }

        for (script, flags) in scripts.iter_mut().zip(rejected) {
            let mut flags = flags.into_iter();
            script
                .structures
                .retain(|_| !flags.next().unwrap_or(false));
        }
    }

    /// `load` or `post_load`, one script at a time, structures in file order
    fn file_order_phase(
        &mut self,
        scripts: &mut [Script],
        phase: Phase,
        callback: fn(&mut dyn Structure, &mut ActivationContext<'_>) -> anyhow::Result<bool>,
    ) {
        let router = &mut self.router;
        let reporter = self.reporter.as_ref();

        for script in scripts.iter_mut() {
            let (path, structures) = script.parts_mut();
            structures.retain_mut(|structure| {
                let kept = activate(router, reporter, path, structure.as_mut(), phase, callback);
                if !kept && phase == Phase::PostLoad {
                    // load already ran, so release what it bound
                    deactivate(router, reporter, path, structure.as_mut(), Phase::Unload, |s, ctx| {
                        s.unload(ctx)
                    });
                    deactivate(router, reporter, path, structure.as_mut(), Phase::PostUnload, |s, ctx| {
                        s.post_unload(ctx)
                    });
                }
                kept
            });
        }
    }

    // ===== Unloading =====

    /// Unload the given scripts; paths that are not loaded are ignored
    pub fn unload_scripts(&mut self, paths: &[PathBuf]) -> LoadSummary {
        let resolved: Vec<PathBuf> = paths
            .iter()
            .map(|path| resolve_script(path))
            .collect();

        let unloaded = self
            .registry
            .unload(&resolved, &mut self.router, self.reporter.as_ref());

        let mut summary = LoadSummary::default();
        for (path, counts) in unloaded {
            self.observer.script_unloaded(&path);
            summary += counts;
        }

        if summary.files > 0 {
            info!(
                target: "scripting",
                "Unloaded {} script(s) with {} structure(s)",
                summary.files,
                summary.structures
            );
        }
        summary
    }

    /// Unload every loaded script
    pub fn unload_all(&mut self) -> LoadSummary {
        let paths = self.registry.loaded_paths();
        self.unload_scripts(&paths)
    }

    // ===== Reloading =====

    /// Unload the given scripts (where loaded) and load them again as one batch
    pub async fn reload_scripts(
        &mut self,
        paths: &[PathBuf],
        scope: Arc<dyn ResourceScope>,
    ) -> Result<LoadSummary, ScriptError> {
        self.unload_scripts(paths);
        self.load_scripts(paths, scope).await
    }

    /// Blocking variant of [`ScriptLoader::reload_scripts`]
    pub fn reload_scripts_blocking(
        &mut self,
        paths: &[PathBuf],
        scope: Arc<dyn ResourceScope>,
    ) -> Result<LoadSummary, ScriptError> {
        self.unload_scripts(paths);
        self.load_scripts_blocking(paths, scope)
    }

    /// Unload everything and load `root` again from disk
    pub async fn reload_directory(
        &mut self,
        root: &Path,
        scope: Arc<dyn ResourceScope>,
    ) -> Result<LoadSummary, ScriptError> {
        let previous = self.unload_all();
        let summary = self.load_directory(root, scope).await?;
        if previous.files > 0 && summary.files == 0 {
            tracing::warn!(
                target: "scripting",
                "Script reload resulted in zero scripts (was {}). Check logs for loading errors.",
                previous.files
            );
        }
        Ok(summary)
    }

    // ===== Events =====

    /// Route a host event delivered at one priority tier
    pub fn dispatch(&self, event: &dyn HostEvent, priority: EventPriority) -> usize {
        self.router.dispatch(event, priority)
    }

    /// Route a host event through every priority tier
    pub fn fire(&self, event: &dyn HostEvent) -> usize {
        self.router.fire(event)
    }
}

impl Drop for ScriptLoader {
    fn drop(&mut self) {
        self.unload_all();
    }
}
