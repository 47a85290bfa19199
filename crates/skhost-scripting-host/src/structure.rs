use std::path::{Path, PathBuf};

use skhost_events::EventCatalog;

use crate::context::ActivationContext;
use crate::error::ErrorReporter;
use crate::source::{Node, SectionNode};
use crate::trigger::Statement;

/// Priority of structures that do not ask for one
pub const DEFAULT_PRIORITY: i32 = 1000;

/// Compiled unit produced from one top-level block of a script
///
/// Activation runs `pre_load` for every structure of a batch (ascending
/// [`Structure::priority`] across all scripts), then `load` for every
/// structure, then `post_load`. Returning `Ok(false)` or an error from any of
/// them removes the structure from its script.
pub trait Structure: Send {
    /// Human-readable name used in logs and error reports
    fn name(&self) -> &str;

    /// Lower values run first during `pre_load`
    fn priority(&self) -> i32 {
        DEFAULT_PRIORITY
    }

    fn pre_load(&mut self, _ctx: &mut ActivationContext<'_>) -> anyhow::Result<bool> {
        Ok(true)
    }

    fn load(&mut self, ctx: &mut ActivationContext<'_>) -> anyhow::Result<bool>;

    fn post_load(&mut self, _ctx: &mut ActivationContext<'_>) -> anyhow::Result<bool> {
        Ok(true)
    }

    /// Release external bindings (event registrations, commands, ...)
    fn unload(&mut self, _ctx: &mut ActivationContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Final teardown, run after every structure being unloaded has run `unload`
    fn post_unload(&mut self, _ctx: &mut ActivationContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A loaded script: its canonical file and its structures in file order
pub struct Script {
    path: PathBuf,
    pub(crate) structures: Vec<Box<dyn Structure>>,
}

impl Script {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            structures: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn push(&mut self, structure: Box<dyn Structure>) {
        self.structures.push(structure);
    }

    pub fn structure_count(&self) -> usize {
        self.structures.len()
    }

    pub fn structure_names(&self) -> Vec<String> {
        self.structures.iter().map(|s| s.name().to_string()).collect()
    }

    pub(crate) fn parts_mut(&mut self) -> (&Path, &mut Vec<Box<dyn Structure>>) {
        (&self.path, &mut self.structures)
    }
}

impl std::fmt::Debug for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Script")
            .field("path", &self.path)
            .field("structures", &self.structure_names())
            .finish()
    }
}

/// Information available to the structure parser while it compiles a script
pub struct ParseContext<'a> {
    pub script: &'a Path,
    pub catalog: &'a EventCatalog,
    pub reporter: &'a dyn ErrorReporter,
}

/// Compiles top-level blocks of a script into structures
///
/// This is where the script grammar lives. Errors returned here drop only the
/// unit being parsed.
pub trait StructureParser: Send + Sync {
    /// Compile one top-level node. `Ok(None)` means the node was not a
    /// structure and the parser has already reported why.
    fn parse_structure(
        &self,
        node: &Node,
        ctx: &ParseContext<'_>,
    ) -> anyhow::Result<Option<Box<dyn Structure>>>;

    /// Compile the body of a section into an ordered chain of statements
    fn parse_statements(
        &self,
        section: &SectionNode,
        ctx: &ParseContext<'_>,
    ) -> anyhow::Result<Vec<Box<dyn Statement>>>;
}
