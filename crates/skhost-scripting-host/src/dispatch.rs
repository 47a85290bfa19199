//! Priority-based routing of host events to triggers
//!
//! The router registers itself with the host once per (handler list,
//! priority) pair that at least one trigger needs, and drops the registration
//! again when the last such trigger is unregistered. Within a pair, triggers
//! run in the order they were registered.

use std::collections::{BTreeSet, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{debug, trace};

use skhost_events::{EventCatalog, EventHost, EventKind, EventOutcome, EventPriority, HandlerListId, HostEvent};

use crate::error::{ErrorReporter, Phase, ScriptError, panic_message};
use crate::trigger::{Trigger, TriggerId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("trigger '{trigger}' listens to unknown event '{kind}'")]
    UnknownEvent { trigger: String, kind: EventKind },
    #[error("trigger '{0}' is not bound to any event")]
    NoEvents(String),
    #[error("trigger '{0}' is already registered")]
    AlreadyRegistered(String),
}

type BindingKey = (HandlerListId, EventPriority);

pub struct EventRouter {
    catalog: Arc<EventCatalog>,
    host: Arc<dyn EventHost>,
    reporter: Arc<dyn ErrorReporter>,
    bindings: HashMap<BindingKey, Vec<Arc<Trigger>>>,
}

impl EventRouter {
    pub fn new(
        catalog: Arc<EventCatalog>,
        host: Arc<dyn EventHost>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            catalog,
            host,
            reporter,
            bindings: HashMap::new(),
        }
    }

    pub fn catalog(&self) -> &Arc<EventCatalog> {
        &self.catalog
    }

    /// Bind a trigger to the handler lists of its events at its priority
    ///
    /// Every event kind is validated before anything is registered, so a
    /// failed call leaves the router unchanged.
    pub fn register(&mut self, trigger: Arc<Trigger>) -> Result<(), DispatchError> {
        if trigger.events().is_empty() {
            return Err(DispatchError::NoEvents(trigger.name().to_string()));
        }
        if self.contains(trigger.id()) {
            return Err(DispatchError::AlreadyRegistered(trigger.name().to_string()));
        }

        let mut lists = BTreeSet::new();
        for kind in trigger.events() {
            let list = self
                .catalog
                .handler_list(kind)
                .ok_or_else(|| DispatchError::UnknownEvent {
                    trigger: trigger.name().to_string(),
                    kind: kind.clone(),
                })?;
            lists.insert(list);
        }

        let priority = trigger.priority();
        for list in lists {
            let bound = self.bindings.entry((list, priority)).or_insert_with(|| {
                debug!(
                    target: "events",
                    "Registering handler list {} at priority {}",
                    list.index(),
                    priority
                );
                self.host.register(list, priority);
                Vec::new()
            });
            bound.push(Arc::clone(&trigger));
        }

        debug!(target: "events", "Registered trigger {} ({})", trigger.name(), trigger.id());
        Ok(())
    }

    /// Remove a trigger from every binding; returns whether it was registered
    pub fn unregister(&mut self, id: TriggerId) -> bool {
        let mut found = false;
        let mut emptied = Vec::new();

        for (key, triggers) in self.bindings.iter_mut() {
            let before = triggers.len();
            triggers.retain(|trigger| trigger.id() != id);
            if triggers.len() != before {
                found = true;
                if triggers.is_empty() {
                    emptied.push(*key);
                }
            }
        }

        for key in emptied {
            self.bindings.remove(&key);
            let (list, priority) = key;
            debug!(
                target: "events",
                "Unregistering handler list {} at priority {}",
                list.index(),
                priority
            );
            self.host.unregister(list, priority);
        }

        if found {
            debug!(target: "events", "Unregistered trigger {}", id);
        }
        found
    }

    pub fn contains(&self, id: TriggerId) -> bool {
        self.bindings
            .values()
            .any(|triggers| triggers.iter().any(|trigger| trigger.id() == id))
    }

    /// Whether the host currently has a registration for this pair
    pub fn is_registered(&self, list: HandlerListId, priority: EventPriority) -> bool {
        self.bindings.contains_key(&(list, priority))
    }

    /// Number of (handler list, priority) pairs registered with the host
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    /// Number of distinct triggers currently bound
    pub fn trigger_count(&self) -> usize {
        self.bindings
            .values()
            .flatten()
            .map(|trigger| trigger.id())
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Route one host event delivered at `priority` to the matching triggers
    ///
    /// Returns the number of triggers that were executed.
    pub fn dispatch(&self, event: &dyn HostEvent, priority: EventPriority) -> usize {
        let kind = event.kind();
        let Some(list) = self.catalog.handler_list(kind) else {
            trace!(target: "events", "No handler list for event {}", kind);
            return 0;
        };
        let Some(triggers) = self.bindings.get(&(list, priority)) else {
            return 0;
        };

        let blocked = event.is_cancelled() || event.outcome() == EventOutcome::Deny;
        if blocked && !self.catalog.listens_while_cancelled(kind) {
            trace!(target: "events", "Skipping cancelled event {} at {}", kind, priority);
            return 0;
        }

        let mut executed = 0;
        for trigger in triggers {
            let listens = trigger
                .events()
                .iter()
                .any(|bound| self.catalog.is_a(kind, bound));
            if !listens || !trigger.applies_to(event) {
                continue;
            }

            executed += 1;
            let outcome = catch_unwind(AssertUnwindSafe(|| trigger.execute(event)));
            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => format!("{e:#}"),
                Err(payload) => panic_message(payload.as_ref()),
            };
            self.reporter.report(&ScriptError::Phase {
                phase: Phase::Execute,
                script: trigger.script().to_path_buf(),
                structure: trigger.name().to_string(),
                message,
            });
        }

        trace!(target: "events", "Event {} at {} ran {} trigger(s)", kind, priority, executed);
        executed
    }

    /// Dispatch an event at every priority tier in ascending order
    pub fn fire(&self, event: &dyn HostEvent) -> usize {
        EventPriority::ALL
            .into_iter()
            .map(|priority| self.dispatch(event, priority))
            .sum()
    }
}
