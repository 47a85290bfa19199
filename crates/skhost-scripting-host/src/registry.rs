//! Authoritative set of loaded scripts and disabled-file markers
//!
//! Scripts are kept in directory-hierarchy order: the scripts of a directory
//! come before the scripts of its subdirectories, names compare
//! lexicographically otherwise. A path is either loaded or disabled-marked,
//! never both.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::context::deactivate;
use crate::discovery::{disabled_path, enabled_path};
use crate::dispatch::EventRouter;
use crate::error::{ErrorReporter, Phase, ScriptError};
use crate::loader::LoadSummary;
use crate::structure::Script;

/// Registry key of a script path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScriptKey(PathBuf);

impl ScriptKey {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Components tagged with whether they are the final (file) component
    fn ranked(&self) -> Vec<(bool, Component<'_>)> {
        let components: Vec<_> = self.0.components().collect();
        let last = components.len().saturating_sub(1);
        components
            .into_iter()
            .enumerate()
            .map(|(i, component)| (i != last, component))
            .collect()
    }
}

impl Ord for ScriptKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // Files (false) sort before directories (true) at the same depth
        self.ranked().cmp(&other.ranked())
    }
}

impl PartialOrd for ScriptKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
pub struct ScriptRegistry {
    loaded: Mutex<BTreeMap<ScriptKey, Script>>,
    disabled: Mutex<BTreeSet<ScriptKey>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths of the loaded scripts in registry order
    pub fn loaded_paths(&self) -> Vec<PathBuf> {
        lock(&self.loaded)
            .keys()
            .map(|key| key.path().to_path_buf())
            .collect()
    }

    /// Disabled-marker paths in registry order
    pub fn disabled_paths(&self) -> Vec<PathBuf> {
        lock(&self.disabled)
            .iter()
            .map(|key| key.path().to_path_buf())
            .collect()
    }

    pub fn is_loaded(&self, path: &Path) -> bool {
        lock(&self.loaded).contains_key(&ScriptKey::new(path))
    }

    /// Whether the script at `path` (either form) carries a disabled marker
    pub fn is_disabled(&self, path: &Path) -> bool {
        lock(&self.disabled).contains(&ScriptKey::new(disabled_path(path)))
    }

    pub fn len(&self) -> usize {
        lock(&self.loaded).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.loaded).is_empty()
    }

    /// Number of structures the script at `path` holds, if it is loaded
    pub fn structure_count(&self, path: &Path) -> Option<usize> {
        lock(&self.loaded)
            .get(&ScriptKey::new(path))
            .map(Script::structure_count)
    }

    /// Names of the structures the script at `path` holds, if it is loaded
    pub fn structure_names(&self, path: &Path) -> Option<Vec<String>> {
        lock(&self.loaded)
            .get(&ScriptKey::new(path))
            .map(Script::structure_names)
    }

    /// Totals over every loaded script
    pub fn summary(&self) -> LoadSummary {
        lock(&self.loaded)
            .values()
            .map(|script| LoadSummary::new(1, script.structure_count()))
            .sum()
    }

    /// Record a loaded script, clearing its disabled marker
    pub fn insert(&self, script: Script) -> Result<(), ScriptError> {
        let key = ScriptKey::new(script.path());
        let mut loaded = lock(&self.loaded);
        if loaded.contains_key(&key) {
            return Err(ScriptError::invariant(format!(
                "script {} is already loaded",
                key.path().display()
            )));
        }
        lock(&self.disabled).remove(&ScriptKey::new(disabled_path(key.path())));
        debug!(target: "scripting", "Registered script {}", key.path().display());
        loaded.insert(key, script);
        Ok(())
    }

    /// Record a disabled marker; ignored while the enabled twin is loaded
    pub fn mark_disabled(&self, path: &Path) -> bool {
        let marker = disabled_path(path);
        if self.is_loaded(&enabled_path(&marker)) {
            warn!(
                target: "scripting",
                "Ignoring disabled marker {} while its script is loaded",
                marker.display()
            );
            return false;
        }
        lock(&self.disabled).insert(ScriptKey::new(marker))
    }

    /// Drop disabled markers for which `keep` returns false; returns how many were dropped
    pub fn retain_disabled<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&Path) -> bool,
    {
        let mut disabled = lock(&self.disabled);
        let before = disabled.len();
        disabled.retain(|key| keep(key.path()));
        before - disabled.len()
    }

    /// Unload the given scripts in two passes
    ///
    /// The scripts are taken out of the registry first, so callbacks and the
    /// reporter may read it while the passes run. Pass one runs `unload` on
    /// every structure of every script. Pass two then runs `post_unload`,
    /// clears the structures and adds the script's disabled marker. Paths
    /// that are not loaded are ignored.
    pub fn unload(
        &self,
        paths: &[PathBuf],
        router: &mut EventRouter,
        reporter: &dyn ErrorReporter,
    ) -> Vec<(PathBuf, LoadSummary)> {
        let mut keys: Vec<ScriptKey> = paths.iter().map(ScriptKey::new).collect();
        keys.sort();
        keys.dedup();

        let mut scripts: Vec<Script> = {
            let mut loaded = lock(&self.loaded);
            keys.iter().filter_map(|key| loaded.remove(key)).collect()
        };

        for script in &mut scripts {
            let (path, structures) = script.parts_mut();
            for structure in structures.iter_mut() {
                deactivate(router, reporter, path, structure.as_mut(), Phase::Unload, |s, ctx| {
                    s.unload(ctx)
                });
            }
        }

        let mut unloaded = Vec::with_capacity(scripts.len());
        for mut script in scripts {
            let (path, structures) = script.parts_mut();
            let count = structures.len();
            for structure in structures.iter_mut() {
                deactivate(router, reporter, path, structure.as_mut(), Phase::PostUnload, |s, ctx| {
                    s.post_unload(ctx)
                });
            }
            structures.clear();
            debug!(target: "scripting", "Unregistered script {}", path.display());
            unloaded.push((path.to_path_buf(), LoadSummary::new(1, count)));
        }

        let mut disabled = lock(&self.disabled);
        for (path, _) in &unloaded {
            disabled.insert(ScriptKey::new(disabled_path(path)));
        }
        unloaded
    }
}
