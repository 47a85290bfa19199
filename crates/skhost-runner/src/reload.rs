use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::info;

use skhost_events::{EventEnvelope, SystemEvent};

/// Spawn a task that calls `on_reload` every time the process receives SIGUSR2
///
/// Must be called from within a tokio runtime. The task ends when
/// `on_reload` returns `false`.
#[cfg(unix)]
pub fn setup_reload_signal_handler<F>(mut on_reload: F) -> JoinHandle<()>
where
    F: FnMut() -> bool + Send + 'static,
{
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigusr2 = match signal(SignalKind::user_defined2()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(target: "scripting", "Failed to register SIGUSR2 handler: {}", e);
                return;
            }
        };

        while sigusr2.recv().await.is_some() {
            info!(target: "scripting", "Received SIGUSR2 - triggering script reload");
            if !on_reload() {
                info!(target: "scripting", "Reload receiver dropped, shutting down SIGUSR2 handler");
                break;
            }
        }
    })
}

/// Non-Unix platforms have no SIGUSR2; the returned task finishes immediately
#[cfg(not(unix))]
pub fn setup_reload_signal_handler<F>(_on_reload: F) -> JoinHandle<()>
where
    F: FnMut() -> bool + Send + 'static,
{
    tracing::warn!(target: "scripting", "SIGUSR2 reload not supported on this platform");
    tokio::spawn(async {})
}

/// Forward SIGUSR2 to a script host as a [`SystemEvent::ReloadScripts`] request
pub fn forward_reload_requests(events: UnboundedSender<EventEnvelope>) -> JoinHandle<()> {
    setup_reload_signal_handler(move || {
        events
            .send(EventEnvelope::system_event(SystemEvent::ReloadScripts))
            .is_ok()
    })
}
