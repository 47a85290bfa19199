//! Core event types for skhost
//!
//! This crate describes the host side of event dispatch: which event kinds
//! exist, which handler list each kind is delivered through, the priority
//! tiers a listener can be registered at, and the registration interface the
//! host exposes to the scripting runtime.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

pub mod catalog;
pub mod priority;

pub use catalog::{CatalogError, EventCatalog, EventCatalogBuilder, HandlerListId, KindSpec};
pub use priority::{EventPriority, ParsePriorityError};

// ============================================================================
// Event Kinds
// ============================================================================

/// Stable logical identifier of a host event kind (e.g. `"player_join"`)
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKind(Arc<str>);

impl EventKind {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventKind({})", self.0)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventKind {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for EventKind {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

// ============================================================================
// Host Events
// ============================================================================

/// Result a host attaches to an interactive action (block use, item use, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventOutcome {
    Allow,
    #[default]
    Default,
    Deny,
}

/// A concrete event raised by the host
pub trait HostEvent: Send + Sync + fmt::Debug {
    /// Concrete kind of this event
    fn kind(&self) -> &EventKind;

    /// Whether the host (or an earlier listener) cancelled this event
    fn is_cancelled(&self) -> bool {
        false
    }

    /// Action result of the event, for events that carry one
    fn outcome(&self) -> EventOutcome {
        EventOutcome::Default
    }

    /// Allow downcasting to the host's concrete event type
    fn as_any(&self) -> &dyn Any;
}

/// General purpose event carrying string fields
#[derive(Debug, Clone)]
pub struct SimpleEvent {
    kind: EventKind,
    cancelled: bool,
    outcome: EventOutcome,
    fields: HashMap<String, String>,
}

impl SimpleEvent {
    pub fn new(kind: impl Into<EventKind>) -> Self {
        Self {
            kind: kind.into(),
            cancelled: false,
            outcome: EventOutcome::Default,
            fields: HashMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn cancelled(mut self, cancelled: bool) -> Self {
        self.cancelled = cancelled;
        self
    }

    pub fn with_outcome(mut self, outcome: EventOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn set_cancelled(&mut self, cancelled: bool) {
        self.cancelled = cancelled;
    }
}

impl HostEvent for SimpleEvent {
    fn kind(&self) -> &EventKind {
        &self.kind
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    fn outcome(&self) -> EventOutcome {
        self.outcome
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Host Registration Interface
// ============================================================================

/// Listener registration interface of the host event system
///
/// The scripting runtime registers itself once per (handler list, priority)
/// pair. The host is expected to call back into the runtime's dispatcher for
/// every event delivered through a registered pair.
pub trait EventHost: Send + Sync {
    fn register(&self, handler_list: HandlerListId, priority: EventPriority);

    fn unregister(&self, handler_list: HandlerListId, priority: EventPriority);
}

// ============================================================================
// Script Lifecycle Events
// ============================================================================

/// Types of script lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptEventType {
    Loaded { structures: usize },
    Unloaded,
    Error { message: String },
}

/// System and lifecycle events consumed by the runner
#[derive(Debug, Clone)]
pub enum SystemEvent {
    ScriptEvent {
        script: PathBuf,
        event_type: ScriptEventType,
    },
    /// Request to reload all scripts (triggered by SIGUSR2 or other mechanism)
    ReloadScripts,
    Shutdown,
}

/// Unified event type delivered to the runner
#[derive(Debug, Clone)]
pub enum EventType {
    Host(Arc<dyn HostEvent>),
    System(SystemEvent),
}

/// Complete event envelope
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub event: EventType,
    pub timestamp: Instant,
}

impl EventEnvelope {
    pub fn new(event: EventType) -> Self {
        Self {
            event,
            timestamp: Instant::now(),
        }
    }

    pub fn host_event(event: impl HostEvent + 'static) -> Self {
        Self::new(EventType::Host(Arc::new(event)))
    }

    pub fn system_event(event: SystemEvent) -> Self {
        Self::new(EventType::System(event))
    }
}

/// Trait for consuming event envelopes
pub trait EventConsumer: Send + 'static {
    fn handle_event(&mut self, envelope: EventEnvelope);
}
