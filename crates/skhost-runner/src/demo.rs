//! Demonstration script grammar used by the `skhost` binary
//!
//! Scripts are made of event sections:
//!
//! ```text
//! on join or first_join with priority high:
//!     Welcome, {player}!
//!     stop
//! ```
//!
//! Every entry is logged when the trigger fires, with `{field}` replaced by
//! the event's field of that name. `stop` ends the chain.

use std::path::Path;

use anyhow::{Context, bail};
use tracing::info;

use skhost_events::{
    CatalogError, EventCatalog, EventKind, EventPriority, HostEvent, KindSpec, SimpleEvent,
};
use skhost_scripting_host::{
    Node, ParseContext, SectionNode, Statement, Structure, StructureParser, Trigger,
    TriggerStructure,
};

/// Event kinds known to the demonstration host
pub fn default_catalog() -> Result<EventCatalog, CatalogError> {
    EventCatalog::builder()
        .kind(KindSpec::new("join").with_handler_list())
        .kind(KindSpec::new("first_join").extends("join"))
        .kind(KindSpec::new("quit").with_handler_list())
        .kind(KindSpec::new("chat").with_handler_list())
        .kind(KindSpec::new("command").with_handler_list().listen_while_cancelled())
        .build()
}

/// Parsed `on ...:` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerHeader {
    pub events: Vec<EventKind>,
    pub priority: EventPriority,
}

impl TriggerHeader {
    pub fn parse(header: &str) -> anyhow::Result<Self> {
        let Some(rest) = header.strip_prefix("on ") else {
            bail!("expected 'on <event>', found '{}'", header);
        };

        let (events, priority) = match rest.split_once(" with priority ") {
            Some((events, priority)) => (
                events,
                priority
                    .parse::<EventPriority>()
                    .with_context(|| format!("in trigger header '{}'", header))?,
            ),
            None => (rest, EventPriority::default()),
        };

        let events: Vec<EventKind> = events
            .split(" or ")
            .map(str::trim)
            .filter(|kind| !kind.is_empty())
            .map(EventKind::from)
            .collect();
        if events.is_empty() {
            bail!("trigger header '{}' names no event", header);
        }

        Ok(Self { events, priority })
    }
}

/// Replace `{field}` placeholders with the event's fields; unknown fields stay as written
fn interpolate(template: &str, event: &dyn HostEvent) -> String {
    let fields = event.as_any().downcast_ref::<SimpleEvent>();
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match fields.and_then(|e| e.field(name)) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[start..start + end + 2]),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn statement(text: &str, script: &Path) -> Box<dyn Statement> {
    if text == "stop" {
        return Box::new(|_: &dyn HostEvent| -> anyhow::Result<bool> { Ok(false) });
    }

    let text = text.to_string();
    let script = script
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Box::new(move |event: &dyn HostEvent| -> anyhow::Result<bool> {
        info!(target: "runner", "[{}] {}", script, interpolate(&text, event));
        Ok(true)
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DemoParser;

impl StructureParser for DemoParser {
    fn parse_structure(
        &self,
        node: &Node,
        ctx: &ParseContext<'_>,
    ) -> anyhow::Result<Option<Box<dyn Structure>>> {
        let Node::Section(section) = node else {
            bail!("expected an event section, found '{}'", node.key());
        };

        let header = TriggerHeader::parse(&section.key)?;
        if let Some(unknown) = header.events.iter().find(|kind| !ctx.catalog.contains(kind)) {
            bail!("unknown event '{}'", unknown);
        }

        let mut builder = Trigger::builder(section.key.clone(), ctx.script).priority(header.priority);
        for kind in header.events {
            builder = builder.event(kind);
        }
        let trigger = builder
            .statements(self.parse_statements(section, ctx)?)
            .build();

        Ok(Some(Box::new(TriggerStructure::new(trigger))))
    }

    fn parse_statements(
        &self,
        section: &SectionNode,
        ctx: &ParseContext<'_>,
    ) -> anyhow::Result<Vec<Box<dyn Statement>>> {
        section
            .children
            .iter()
            .map(|child| match child {
                Node::Entry(entry) => Ok(statement(&entry.key, ctx.script)),
                Node::Section(nested) => {
                    bail!("line {}: nested sections are not supported", nested.line)
                }
            })
            .collect()
    }
}

/// Parse a console line such as `chat player=bob message=hi` into an event
///
/// The word `cancelled` marks the event as cancelled.
pub fn parse_event_line(line: &str) -> Option<SimpleEvent> {
    let mut words = line.split_whitespace();
    let mut event = SimpleEvent::new(words.next()?);
    for word in words {
        match word.split_once('=') {
            Some((key, value)) => event = event.with_field(key, value),
            None if word == "cancelled" => event.set_cancelled(true),
            None => {}
        }
    }
    Some(event)
}
