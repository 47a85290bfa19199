use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use skhost_events::{
    EventCatalog, EventConsumer, EventEnvelope, EventHost, EventPriority, EventType,
    HandlerListId, HostEvent, ScriptEventType, SystemEvent,
};
use skhost_scripting_host::{
    ErrorReporter, LoadObserver, LoadSummary, NoopScope, ScriptError, ScriptLoader,
    StructureParser, TracingReporter,
};

use crate::config::ScriptingConfig;

/// In-process listener table standing in for a host event system
///
/// Tracks which (handler list, priority) pairs the router has asked for, so
/// events are only delivered at tiers somebody listens on.
#[derive(Debug, Default)]
pub struct InProcessHost {
    listening: Mutex<HashSet<(HandlerListId, EventPriority)>>,
}

impl InProcessHost {
    pub fn is_listening(&self, list: HandlerListId, priority: EventPriority) -> bool {
        self.listening
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(list, priority))
    }

    pub fn listener_count(&self) -> usize {
        self.listening
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl EventHost for InProcessHost {
    fn register(&self, list: HandlerListId, priority: EventPriority) {
        debug!(target: "runner", "Listening on handler list {} at {}", list.index(), priority);
        self.listening
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((list, priority));
    }

    fn unregister(&self, list: HandlerListId, priority: EventPriority) {
        debug!(target: "runner", "Stopped listening on handler list {} at {}", list.index(), priority);
        self.listening
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(list, priority));
    }
}

/// Turns loader notifications and failures into `ScriptEvent`s on the host's queue
struct LifecycleForwarder {
    events: UnboundedSender<EventEnvelope>,
}

impl LifecycleForwarder {
    fn forward(&self, script: &Path, event_type: ScriptEventType) {
        // The queue only closes once the host is gone
        let _ = self
            .events
            .send(EventEnvelope::system_event(SystemEvent::ScriptEvent {
                script: script.to_path_buf(),
                event_type,
            }));
    }
}

impl LoadObserver for LifecycleForwarder {
    fn batch_started(&self, scripts: usize) {
        debug!(target: "runner", "Loading a batch of {} script(s)", scripts);
    }

    fn script_loaded(&self, path: &Path, structures: usize) {
        self.forward(path, ScriptEventType::Loaded { structures });
    }

    fn script_unloaded(&self, path: &Path) {
        self.forward(path, ScriptEventType::Unloaded);
    }
}

impl ErrorReporter for LifecycleForwarder {
    fn report(&self, error: &ScriptError) {
        TracingReporter.report(error);
        if let Some(script) = error.script() {
            self.forward(
                script,
                ScriptEventType::Error {
                    message: error.to_string(),
                },
            );
        }
    }
}

/// Owns the scripts of the process and feeds them host events
///
/// Events arrive as [`EventEnvelope`]s on an unbounded queue; see
/// [`ScriptHost::sender`]. Reload requests are served between events.
pub struct ScriptHost {
    loader: ScriptLoader,
    host: Arc<InProcessHost>,
    script_dir: PathBuf,
    events_tx: UnboundedSender<EventEnvelope>,
    events_rx: UnboundedReceiver<EventEnvelope>,
    reload_requested: bool,
    stopping: bool,
}

impl ScriptHost {
    pub fn new(
        config: &ScriptingConfig,
        catalog: Arc<EventCatalog>,
        parser: Arc<dyn StructureParser>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let host = Arc::new(InProcessHost::default());
        let forwarder = Arc::new(LifecycleForwarder {
            events: events_tx.clone(),
        });

        let loader = ScriptLoader::builder(parser, catalog, Arc::clone(&host) as Arc<dyn EventHost>)
            .workers(config.worker_threads)
            .reporter(Arc::clone(&forwarder) as Arc<dyn ErrorReporter>)
            .observer(forwarder)
            .build();

        Self {
            loader,
            host,
            script_dir: config.script_dir(),
            events_tx,
            events_rx,
            reload_requested: false,
            stopping: false,
        }
    }

    /// Queue handle for host events and system requests
    pub fn sender(&self) -> UnboundedSender<EventEnvelope> {
        self.events_tx.clone()
    }

    pub fn loader(&self) -> &ScriptLoader {
        &self.loader
    }

    pub fn host(&self) -> &Arc<InProcessHost> {
        &self.host
    }

    pub fn script_dir(&self) -> &Path {
        &self.script_dir
    }

    /// Load every script in the script directory
    pub async fn load(&mut self) -> Result<LoadSummary, ScriptError> {
        if !self.script_dir.exists() {
            warn!(
                target: "runner",
                "Script directory {} does not exist, no scripts loaded",
                self.script_dir.display()
            );
            return Ok(LoadSummary::default());
        }
        let dir = self.script_dir.clone();
        self.loader.load_directory(&dir, Arc::new(NoopScope)).await
    }

    /// Unload everything and load the script directory again
    pub async fn reload(&mut self) -> Result<LoadSummary, ScriptError> {
        info!(target: "runner", "Reloading scripts from {}", self.script_dir.display());
        let dir = self.script_dir.clone();
        self.loader.reload_directory(&dir, Arc::new(NoopScope)).await
    }

    /// Deliver a host event at every tier the host listens on
    pub fn deliver(&self, event: &dyn HostEvent) -> usize {
        let Some(list) = self.loader.router().catalog().handler_list(event.kind()) else {
            warn!(target: "runner", "Dropping event of unknown kind {}", event.kind());
            return 0;
        };

        EventPriority::ALL
            .into_iter()
            .filter(|priority| self.host.is_listening(list, *priority))
            .map(|priority| self.loader.dispatch(event, priority))
            .sum()
    }

    /// Process queued events until `shutdown` completes or a shutdown request arrives
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        while !self.stopping {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(target: "runner", "Shutdown requested");
                    break;
                }
                envelope = self.events_rx.recv() => {
                    // The host holds a sender, so the queue never closes while running
                    let Some(envelope) = envelope else { break };
                    self.handle_event(envelope);
                    self.serve_reload().await;
                }
            }
        }

        let summary = self.loader.unload_all();
        info!(
            target: "runner",
            "Script host stopped, unloaded {} script(s)",
            summary.files
        );
    }

    /// Handle everything currently queued without waiting for more
    pub async fn drain(&mut self) {
        while let Ok(envelope) = self.events_rx.try_recv() {
            self.handle_event(envelope);
            self.serve_reload().await;
        }
    }

    async fn serve_reload(&mut self) {
        if !std::mem::take(&mut self.reload_requested) {
            return;
        }
        match self.reload().await {
            Ok(summary) => info!(
                target: "runner",
                "Reloaded {} script(s) with {} structure(s)",
                summary.files,
                summary.structures
            ),
            Err(e) => error!(target: "runner", "Script reload failed: {}", e),
        }
    }
}

impl EventConsumer for ScriptHost {
    fn handle_event(&mut self, envelope: EventEnvelope) {
        match envelope.event {
            EventType::Host(event) => {
                let ran = self.deliver(event.as_ref());
                debug!(target: "runner", "Event {} ran {} trigger(s)", event.kind(), ran);
            }
            EventType::System(SystemEvent::ReloadScripts) => {
                self.reload_requested = true;
            }
            EventType::System(SystemEvent::Shutdown) => {
                self.stopping = true;
            }
            EventType::System(SystemEvent::ScriptEvent { script, event_type }) => {
                match event_type {
                    ScriptEventType::Loaded { structures } => {
                        info!(target: "runner", "Loaded {} ({} structure(s))", script.display(), structures);
                    }
                    ScriptEventType::Unloaded => {
                        info!(target: "runner", "Unloaded {}", script.display());
                    }
                    ScriptEventType::Error { message } => {
                        debug!(target: "runner", "Script error in {}: {}", script.display(), message);
                    }
                }
            }
        }
    }
}
