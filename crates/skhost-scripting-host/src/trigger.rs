use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use skhost_events::{EventKind, EventPriority, HostEvent};

use crate::context::ActivationContext;
use crate::structure::{DEFAULT_PRIORITY, Structure};

/// Unique identifier of a trigger for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TriggerId(u64);

impl TriggerId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One executable statement of a trigger body
pub trait Statement: Send + Sync {
    /// Run the statement; `Ok(false)` stops the rest of the chain
    fn run(&self, event: &dyn HostEvent) -> anyhow::Result<bool>;
}

impl<F> Statement for F
where
    F: Fn(&dyn HostEvent) -> anyhow::Result<bool> + Send + Sync,
{
    fn run(&self, event: &dyn HostEvent) -> anyhow::Result<bool> {
        (self)(event)
    }
}

type Predicate = Box<dyn Fn(&dyn HostEvent) -> bool + Send + Sync>;

/// Statements bound to one or more event kinds at a priority tier
pub struct Trigger {
    id: TriggerId,
    name: String,
    script: PathBuf,
    events: Vec<EventKind>,
    priority: EventPriority,
    predicate: Option<Predicate>,
    statements: Vec<Box<dyn Statement>>,
}

impl Trigger {
    pub fn builder(name: impl Into<String>, script: impl Into<PathBuf>) -> TriggerBuilder {
        TriggerBuilder {
            name: name.into(),
            script: script.into(),
            events: Vec::new(),
            priority: EventPriority::Normal,
            predicate: None,
            statements: Vec::new(),
        }
    }

    pub fn id(&self) -> TriggerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    pub fn events(&self) -> &[EventKind] {
        &self.events
    }

    pub fn priority(&self) -> EventPriority {
        self.priority
    }

    /// Whether the trigger's own condition accepts this event
    pub fn applies_to(&self, event: &dyn HostEvent) -> bool {
        match &self.predicate {
            Some(predicate) => predicate(event),
            None => true,
        }
    }

    /// Run the statement chain in order
    pub fn execute(&self, event: &dyn HostEvent) -> anyhow::Result<()> {
        for statement in &self.statements {
            if !statement.run(event)? {
                break;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("script", &self.script)
            .field("events", &self.events)
            .field("priority", &self.priority)
            .field("statements", &self.statements.len())
            .finish()
    }
}

pub struct TriggerBuilder {
    name: String,
    script: PathBuf,
    events: Vec<EventKind>,
    priority: EventPriority,
    predicate: Option<Predicate>,
    statements: Vec<Box<dyn Statement>>,
}

impl TriggerBuilder {
    pub fn event(mut self, kind: impl Into<EventKind>) -> Self {
        self.events.push(kind.into());
        self
    }

    pub fn priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&dyn HostEvent) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Box::new(predicate));
        self
    }

    pub fn statement(mut self, statement: impl Statement + 'static) -> Self {
        self.statements.push(Box::new(statement));
        self
    }

    pub fn statements(mut self, statements: Vec<Box<dyn Statement>>) -> Self {
        self.statements.extend(statements);
        self
    }

    pub fn build(self) -> Trigger {
        Trigger {
            id: TriggerId::next(),
            name: self.name,
            script: self.script,
            events: self.events,
            priority: self.priority,
            predicate: self.predicate,
            statements: self.statements,
        }
    }
}

/// Structure that binds a trigger to the event router while loaded
pub struct TriggerStructure {
    trigger: Arc<Trigger>,
    priority: i32,
}

impl TriggerStructure {
    pub fn new(trigger: Trigger) -> Self {
        Self {
            trigger: Arc::new(trigger),
            priority: DEFAULT_PRIORITY,
        }
    }

    /// Override the activation priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn trigger(&self) -> &Arc<Trigger> {
        &self.trigger
    }
}

impl Structure for TriggerStructure {
    fn name(&self) -> &str {
        self.trigger.name()
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn load(&mut self, ctx: &mut ActivationContext<'_>) -> anyhow::Result<bool> {
        ctx.router().register(Arc::clone(&self.trigger))?;
        Ok(true)
    }

    fn unload(&mut self, ctx: &mut ActivationContext<'_>) -> anyhow::Result<()> {
        ctx.router().unregister(self.trigger.id());
        Ok(())
    }
}
