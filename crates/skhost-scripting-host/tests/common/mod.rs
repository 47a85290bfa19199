// Shared fixtures for the scripting host integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::{Context, anyhow, bail};
use skhost_events::{EventCatalog, EventHost, EventPriority, HandlerListId, HostEvent, KindSpec};
use skhost_scripting_host::{
    ActivationContext, ErrorReporter, LoadObserver, Node, ParseContext, ResourceScope, ScriptError,
    ScriptLoader, ScriptRegistry, SectionNode, Statement, Structure, StructureParser, Trigger,
    TriggerStructure,
};

pub type Log = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

pub fn clear(log: &Log) {
    log.lock().unwrap().clear();
}

/// Position of the first entry starting with `prefix`
pub fn first(log: &[String], prefix: &str) -> Option<usize> {
    log.iter().position(|e| e.starts_with(prefix))
}

/// Position of the last entry starting with `prefix`
pub fn last(log: &[String], prefix: &str) -> Option<usize> {
    log.iter().rposition(|e| e.starts_with(prefix))
}

pub fn with_prefix(log: &[String], prefix: &str) -> Vec<String> {
    log.iter()
        .filter_map(|e| e.strip_prefix(prefix))
        .map(str::to_string)
        .collect()
}

// ===== Structures =====

#[derive(Debug, Default, Clone)]
struct TrackerFlags {
    reject_preload: bool,
    fail_preload: bool,
    panic_preload: bool,
    reject_load: bool,
    fail_load: bool,
    reject_postload: bool,
    fail_unload: bool,
    fail_postunload: bool,
}

/// Structure that records every lifecycle callback
///
/// Declared in a script as `track <name> [priority <n>] [flags...]`.
pub struct Tracker {
    name: String,
    priority: i32,
    flags: TrackerFlags,
    log: Log,
}

impl Tracker {
    fn parse(line: &str, log: Log) -> anyhow::Result<Self> {
        let mut words = line.split_whitespace().skip(1);
        let name = words.next().ok_or_else(|| anyhow!("track needs a name"))?.to_string();
        let mut priority = skhost_scripting_host::DEFAULT_PRIORITY;
        let mut flags = TrackerFlags::default();

        while let Some(word) = words.next() {
            match word {
                "priority" => {
                    priority = words
                        .next()
                        .ok_or_else(|| anyhow!("priority needs a value"))?
                        .parse()
                        .context("invalid priority")?;
                }
                "reject-preload" => flags.reject_preload = true,
                "fail-preload" => flags.fail_preload = true,
                "panic-preload" => flags.panic_preload = true,
                "reject-load" => flags.reject_load = true,
                "fail-load" => flags.fail_load = true,
                "reject-postload" => flags.reject_postload = true,
                "fail-unload" => flags.fail_unload = true,
                "fail-postunload" => flags.fail_postunload = true,
                other => bail!("unknown track flag '{}'", other),
            }
        }

        Ok(Self {
            name,
            priority,
            flags,
            log,
        })
    }

    fn record(&self, phase: &str) {
        self.log.lock().unwrap().push(format!("{}:{}", phase, self.name));
    }
}

impl Structure for Tracker {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn pre_load(&mut self, ctx: &mut ActivationContext<'_>) -> anyhow::Result<bool> {
        assert_eq!(ctx.structure(), self.name);
        self.record("preLoad");
        if self.flags.panic_preload {
            panic!("track {} panicked", self.name);
        }
        if self.flags.fail_preload {
            bail!("track {} failed", self.name);
        }
        Ok(!self.flags.reject_preload)
    }

    fn load(&mut self, _ctx: &mut ActivationContext<'_>) -> anyhow::Result<bool> {
        self.record("load");
        if self.flags.fail_load {
            bail!("track {} failed to load", self.name);
        }
        Ok(!self.flags.reject_load)
    }

    fn post_load(&mut self, _ctx: &mut ActivationContext<'_>) -> anyhow::Result<bool> {
        self.record("postLoad");
        Ok(!self.flags.reject_postload)
    }

    fn unload(&mut self, _ctx: &mut ActivationContext<'_>) -> anyhow::Result<()> {
        self.record("unload");
        if self.flags.fail_unload {
            bail!("track {} failed to unload", self.name);
        }
        Ok(())
    }

    fn post_unload(&mut self, _ctx: &mut ActivationContext<'_>) -> anyhow::Result<()> {
        self.record("postUnload");
        if self.flags.fail_postunload {
            bail!("track {} failed to post-unload", self.name);
        }
        Ok(())
    }
}

// ===== Parser =====

/// Parser understanding `track ...` lines and `on <event>[ with priority <p>]:` sections
pub struct TestParser {
    pub log: Log,
}

impl TestParser {
    pub fn new(log: Log) -> Arc<Self> {
        Arc::new(Self { log })
    }

    fn parse_trigger(
        &self,
        section: &SectionNode,
        ctx: &ParseContext<'_>,
    ) -> anyhow::Result<Box<dyn Structure>> {
        let header = section
            .key
            .strip_prefix("on ")
            .ok_or_else(|| anyhow!("not an event section"))?;
        let (events, priority) = match header.split_once(" with priority ") {
            Some((events, priority)) => (events, priority.parse::<EventPriority>()?),
            None => (header, EventPriority::Normal),
        };

        let mut builder = Trigger::builder(section.key.clone(), ctx.script).priority(priority);
        for kind in events.split(" or ") {
            builder = builder.event(kind.trim());
        }
        let trigger = builder
            .statements(self.parse_statements(section, ctx)?)
            .build();
        Ok(Box::new(TriggerStructure::new(trigger)))
    }
}

impl StructureParser for TestParser {
    fn parse_structure(
        &self,
        node: &Node,
        ctx: &ParseContext<'_>,
    ) -> anyhow::Result<Option<Box<dyn Structure>>> {
        match node {
            Node::Entry(entry) if entry.key.starts_with("track ") => {
                Ok(Some(Box::new(Tracker::parse(&entry.key, self.log.clone())?)))
            }
            Node::Entry(entry) if entry.key == "explode" => panic!("parser exploded"),
            Node::Section(section) if section.key.starts_with("on ") => {
                self.parse_trigger(section, ctx).map(Some)
            }
            other => bail!("can't understand this structure: {}", other.key()),
        }
    }

    fn parse_statements(
        &self,
        section: &SectionNode,
        _ctx: &ParseContext<'_>,
    ) -> anyhow::Result<Vec<Box<dyn Statement>>> {
        Ok(section
            .entries()
            .map(|entry| {
                let log = self.log.clone();
                let text = entry.key.clone();
                Box::new(move |_: &dyn HostEvent| -> anyhow::Result<bool> {
                    log.lock().unwrap().push(format!("run:{}", text));
                    Ok(true)
                }) as Box<dyn Statement>
            })
            .collect())
    }
}

// ===== Collaborators =====

/// Host that counts registrations per (handler list, priority)
#[derive(Default)]
pub struct RecordingHost {
    pub registered: Mutex<HashMap<(HandlerListId, EventPriority), i32>>,
    pub calls: Mutex<usize>,
}

impl RecordingHost {
    pub fn active(&self) -> usize {
        self.registered.lock().unwrap().values().filter(|n| **n > 0).count()
    }
}

impl EventHost for RecordingHost {
    fn register(&self, list: HandlerListId, priority: EventPriority) {
        *self.calls.lock().unwrap() += 1;
        *self.registered.lock().unwrap().entry((list, priority)).or_default() += 1;
    }

    fn unregister(&self, list: HandlerListId, priority: EventPriority) {
        *self.calls.lock().unwrap() += 1;
        *self.registered.lock().unwrap().entry((list, priority)).or_default() -= 1;
    }
}

/// Reporter that keeps every reported error message
#[derive(Default)]
pub struct CollectingReporter {
    pub errors: Mutex<Vec<String>>,
}

impl CollectingReporter {
    pub fn messages(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, error: &ScriptError) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}

/// Reporter that reads the registry while handling an error
///
/// Records how many scripts the registry held at each report.
#[derive(Default)]
pub struct RegistryReadingReporter {
    pub registry: OnceLock<Arc<ScriptRegistry>>,
    pub seen: Mutex<Vec<usize>>,
}

impl ErrorReporter for RegistryReadingReporter {
    fn report(&self, _error: &ScriptError) {
        if let Some(registry) = self.registry.get() {
            let loaded = registry.len();
            registry.disabled_paths();
            self.seen.lock().unwrap().push(loaded);
        }
    }
}

/// Scope that writes its open and close calls into the log
pub struct LoggingScope {
    pub log: Log,
}

impl ResourceScope for LoggingScope {
    fn open(&self) -> anyhow::Result<()> {
        self.log.lock().unwrap().push("scope:open".to_string());
        Ok(())
    }

    fn close(&self) -> anyhow::Result<()> {
        self.log.lock().unwrap().push("scope:close".to_string());
        Ok(())
    }
}

/// Observer that counts notifications
#[derive(Default)]
pub struct CountingObserver {
    pub batches: Mutex<Vec<usize>>,
    pub loaded: Mutex<Vec<(PathBuf, usize)>>,
    pub unloaded: Mutex<Vec<PathBuf>>,
}

impl LoadObserver for CountingObserver {
    fn batch_started(&self, scripts: usize) {
        self.batches.lock().unwrap().push(scripts);
    }

    fn script_loaded(&self, path: &Path, structures: usize) {
        self.loaded.lock().unwrap().push((path.to_path_buf(), structures));
    }

    fn script_unloaded(&self, path: &Path) {
        self.unloaded.lock().unwrap().push(path.to_path_buf());
    }
}

// ===== Setup =====

pub fn catalog() -> Arc<EventCatalog> {
    Arc::new(
        EventCatalog::builder()
            .kind(KindSpec::new("joined").with_handler_list())
            .kind(KindSpec::new("first_join").extends("joined"))
            .kind(KindSpec::new("chat").with_handler_list())
            .kind(KindSpec::new("quit").with_handler_list())
            .build()
            .unwrap(),
    )
}

pub struct Fixture {
    pub log: Log,
    pub host: Arc<RecordingHost>,
    pub reporter: Arc<CollectingReporter>,
    pub observer: Arc<CountingObserver>,
    pub loader: ScriptLoader,
}

pub fn fixture(workers: usize) -> Fixture {
    let log = new_log();
    let host = Arc::new(RecordingHost::default());
    let reporter = Arc::new(CollectingReporter::default());
    let observer = Arc::new(CountingObserver::default());

    let loader = ScriptLoader::builder(TestParser::new(log.clone()), catalog(), host.clone())
        .workers(workers)
        .reporter(reporter.clone())
        .observer(observer.clone())
        .build();

    Fixture {
        log,
        host,
        reporter,
        observer,
        loader,
    }
}

pub fn write_script(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, text).unwrap();
    fs::canonicalize(&path).unwrap()
}
