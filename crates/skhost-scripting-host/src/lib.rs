//! Host runtime for loading and running `.sk` scripts
//!
//! This crate owns the script lifecycle: discovering script files, parsing
//! them into structures on a resizable worker pool, activating the structures
//! in ordered phases, keeping the registry of loaded and disabled scripts, and
//! routing host events to the triggers the scripts bind. The script grammar
//! itself is supplied by a [`StructureParser`].

pub mod context;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod loader;
pub mod pool;
pub mod registry;
pub mod source;
pub mod structure;
pub mod trigger;

// Re-export commonly used types for hosts
pub use context::ActivationContext;
pub use discovery::{DISABLED_PREFIX, Discovered, SCRIPT_EXTENSION, discover};
pub use dispatch::{DispatchError, EventRouter};
pub use error::{ErrorReporter, Phase, ScriptError, TracingReporter};
pub use loader::{LoadObserver, LoadSummary, NoopObserver, ScriptLoader, ScriptLoaderBuilder};
pub use pool::{NoopScope, ResourceScope, TaskHandle, WorkerPool};
pub use registry::{ScriptKey, ScriptRegistry};
pub use source::{EntryNode, Node, SectionNode, SourceTree, parse_source, read_source};
pub use structure::{DEFAULT_PRIORITY, ParseContext, Script, Structure, StructureParser};
pub use trigger::{Statement, Trigger, TriggerBuilder, TriggerId, TriggerStructure};
