//! Explicit handler-list table
//!
//! Every event kind the host can raise is declared once at startup. A kind
//! either owns a handler list or shares the list of its nearest ancestor,
//! which is how several kinds alias a single subscriber list.

use std::collections::HashMap;
use tracing::debug;

use crate::EventKind;

/// Identifier of one host handler list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerListId(u32);

impl HandlerListId {
    pub fn index(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("event kind '{0}' is declared twice")]
    Duplicate(EventKind),
    #[error("event kind '{kind}' extends unknown kind '{parent}'")]
    UnknownParent { kind: EventKind, parent: EventKind },
    #[error("event kind '{0}' has no handler list of its own and no parent to inherit one from")]
    NoHandlerList(EventKind),
}

/// Declaration of one event kind
#[derive(Debug, Clone)]
pub struct KindSpec {
    id: EventKind,
    parent: Option<EventKind>,
    owns_list: bool,
    listen_while_cancelled: bool,
}

impl KindSpec {
    pub fn new(id: impl Into<EventKind>) -> Self {
        Self {
            id: id.into(),
            parent: None,
            owns_list: false,
            listen_while_cancelled: false,
        }
    }

    /// Make this kind a subtype of `parent`
    pub fn extends(mut self, parent: impl Into<EventKind>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Give this kind its own handler list instead of inheriting one
    pub fn with_handler_list(mut self) -> Self {
        self.owns_list = true;
        self
    }

    /// Deliver events of this kind to scripts even when cancelled
    pub fn listen_while_cancelled(mut self) -> Self {
        self.listen_while_cancelled = true;
        self
    }
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    parent: Option<EventKind>,
    handler_list: HandlerListId,
    listen_while_cancelled: bool,
}

#[derive(Debug, Default)]
pub struct EventCatalogBuilder {
    specs: Vec<KindSpec>,
}

impl EventCatalogBuilder {
    pub fn kind(mut self, spec: KindSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Build the table. Parents must be declared before their subtypes.
    pub fn build(self) -> Result<EventCatalog, CatalogError> {
        let mut entries: HashMap<EventKind, CatalogEntry> = HashMap::new();
        let mut next_list = 0u32;

        for spec in self.specs {
            if entries.contains_key(&spec.id) {
                return Err(CatalogError::Duplicate(spec.id));
            }

            let inherited = match &spec.parent {
                Some(parent) => match entries.get(parent) {
                    Some(entry) => Some(entry.handler_list),
                    None => {
                        return Err(CatalogError::UnknownParent {
                            kind: spec.id,
                            parent: parent.clone(),
                        });
                    }
                },
                None => None,
            };

            let handler_list = if spec.owns_list {
                let id = HandlerListId(next_list);
                next_list += 1;
                id
            } else {
                inherited.ok_or_else(|| CatalogError::NoHandlerList(spec.id.clone()))?
            };

            debug!(
                target: "events",
                "Declared event kind {} (handler list {})",
                spec.id,
                handler_list.0
            );

            entries.insert(
                spec.id,
                CatalogEntry {
                    parent: spec.parent,
                    handler_list,
                    listen_while_cancelled: spec.listen_while_cancelled,
                },
            );
        }

        Ok(EventCatalog {
            entries,
            list_count: next_list,
        })
    }
}

/// Immutable table of event kinds and their handler lists
#[derive(Debug, Clone, Default)]
pub struct EventCatalog {
    entries: HashMap<EventKind, CatalogEntry>,
    list_count: u32,
}

impl EventCatalog {
    pub fn builder() -> EventCatalogBuilder {
        EventCatalogBuilder::default()
    }

    pub fn contains(&self, kind: &EventKind) -> bool {
        self.entries.contains_key(kind)
    }

    /// Handler list events of `kind` are delivered through
    pub fn handler_list(&self, kind: &EventKind) -> Option<HandlerListId> {
        self.entries.get(kind).map(|entry| entry.handler_list)
    }

    /// Whether `kind` is `ancestor` or one of its subtypes
    pub fn is_a(&self, kind: &EventKind, ancestor: &EventKind) -> bool {
        let mut current = Some(kind);
        while let Some(k) = current {
            if k == ancestor {
                return true;
            }
            current = self.entries.get(k).and_then(|entry| entry.parent.as_ref());
        }
        false
    }

    pub fn listens_while_cancelled(&self, kind: &EventKind) -> bool {
        self.entries
            .get(kind)
            .is_some_and(|entry| entry.listen_while_cancelled)
    }

    /// Number of distinct handler lists
    pub fn handler_list_count(&self) -> usize {
        self.list_count as usize
    }

    pub fn kinds(&self) -> impl Iterator<Item = &EventKind> {
        self.entries.keys()
    }
}
