//! Resizable worker pool for script construction
//!
//! Size 0 runs every task inline on the submitting thread. Size 1 runs tasks
//! one at a time on a single background thread. Larger sizes run tasks in
//! parallel. Workers poll a shared queue with a short timeout so that stop
//! requests are observed promptly; a task that has started always runs to
//! completion.

use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{ErrorReporter, ScriptError, panic_message};

/// How long an idle worker waits on the queue before re-checking its stop flag
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A resource that is opened before a unit of work and closed after it
pub trait ResourceScope: Send + Sync {
    fn open(&self) -> anyhow::Result<()>;

    fn close(&self) -> anyhow::Result<()>;
}

/// Scope that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopScope;

impl ResourceScope for NoopScope {
    fn open(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Closes an opened scope when dropped, including while unwinding
pub(crate) struct ScopeGuard<'a> {
    scope: &'a dyn ResourceScope,
    armed: bool,
}

impl<'a> ScopeGuard<'a> {
    pub(crate) fn open(scope: &'a dyn ResourceScope) -> anyhow::Result<Self> {
        scope.open()?;
        Ok(Self { scope, armed: true })
    }

    pub(crate) fn close(mut self) -> anyhow::Result<()> {
        self.armed = false;
        self.scope.close()
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.scope.close() {
                warn!(target: "scripting", "Failed to close resource scope: {:#}", e);
            }
        }
    }
}

/// Run `work` between `scope.open()` and `scope.close()`, capturing errors and panics
fn run_bracketed<T>(
    scope: &dyn ResourceScope,
    work: impl FnOnce() -> anyhow::Result<T>,
) -> Result<T, ScriptError> {
    let outcome = catch_unwind(AssertUnwindSafe(|| -> anyhow::Result<T> {
        let guard = ScopeGuard::open(scope)?;
        let result = work();
        let closed = guard.close();
        let value = result?;
        closed?;
        Ok(value)
    }));

    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ScriptError::pool(e)),
        Err(payload) => Err(ScriptError::pool(panic_message(payload.as_ref()))),
    }
}

/// Completion handle of a submitted task
///
/// Await it from async code, or call [`TaskHandle::wait`] from a plain thread.
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<Result<T, ScriptError>>,
}

impl<T> TaskHandle<T> {
    fn channel() -> (oneshot::Sender<Result<T, ScriptError>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Block the current thread until the task completes
    ///
    /// Must not be called from within an async runtime.
    pub fn wait(self) -> Result<T, ScriptError> {
        self.rx.blocking_recv().unwrap_or_else(|_| Err(abandoned()))
    }
}

fn abandoned() -> ScriptError {
    ScriptError::pool("task was dropped before it completed")
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, ScriptError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(abandoned())))
    }
}

struct Worker {
    id: usize,
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn worker_loop(id: usize, queue: Arc<Mutex<Receiver<Job>>>, stop: Arc<AtomicBool>) {
    debug!(target: "scripting", "Worker {} started", id);
    while !stop.load(Ordering::Acquire) {
        let next = lock(&queue).recv_timeout(POLL_INTERVAL);
        match next {
            Ok(job) => job(),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(target: "scripting", "Worker {} stopped", id);
}

/// Pool of background threads constructing scripts
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    queue: Arc<Mutex<Receiver<Job>>>,
    workers: Vec<Worker>,
    retired: Vec<JoinHandle<()>>,
    next_id: usize,
    reporter: Arc<dyn ErrorReporter>,
}

impl WorkerPool {
    /// Create a pool with `size` workers
    pub fn new(size: usize, reporter: Arc<dyn ErrorReporter>) -> Self {
        let (sender, receiver) = mpsc::channel();
        let mut pool = Self {
            sender: Some(sender),
            queue: Arc::new(Mutex::new(receiver)),
            workers: Vec::new(),
            retired: Vec::new(),
            next_id: 0,
            reporter,
        };
        pool.set_size(size);
        pool
    }

    /// Number of live workers
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Whether submitted tasks run off the calling thread
    pub fn is_async(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Resize the pool
    ///
    /// Shrinking asks the excess workers to stop once their current task is
    /// done. Shrinking to zero also runs every task still queued on the
    /// calling thread so nothing submitted is lost.
    pub fn set_size(&mut self, size: usize) {
        let current = self.workers.len();

        if size < current {
            for worker in self.workers.drain(size..) {
                debug!(target: "scripting", "Stopping worker {}", worker.id);
                worker.stop.store(true, Ordering::Release);
                self.retired.push(worker.thread);
            }
            self.retired.retain(|thread| !thread.is_finished());

            if size == 0 {
                self.drain_inline();
            }
        }

        while self.workers.len() < size {
            let id = self.next_id;
            let stop = Arc::new(AtomicBool::new(false));
            let queue = Arc::clone(&self.queue);
            let flag = Arc::clone(&stop);

            let spawned = thread::Builder::new()
                .name(format!("skhost-worker-{id}"))
                .spawn(move || worker_loop(id, queue, flag));

            match spawned {
                Ok(thread) => {
                    self.next_id += 1;
                    self.workers.push(Worker { id, stop, thread });
                }
                Err(e) => {
                    self.reporter
                        .report(&ScriptError::pool(format!("failed to spawn worker: {e}")));
                    break;
                }
            }
        }

        if size != current {
            debug!(target: "scripting", "Worker pool resized from {} to {}", current, self.workers.len());
        }
    }

    fn drain_inline(&self) {
        loop {
            let next = lock(&self.queue).try_recv();
            match next {
                Ok(job) => job(),
                Err(_) => break,
            }
        }
    }

    /// Submit `work` to run between `scope.open()` and `scope.close()`
    ///
    /// Errors and panics anywhere in the bracket complete the handle with an
    /// error and are forwarded to the reporter; they never escape the pool.
    pub fn submit<T, F>(&self, scope: Arc<dyn ResourceScope>, work: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        let (tx, handle) = TaskHandle::channel();
        let reporter = Arc::clone(&self.reporter);

        let job: Job = Box::new(move || {
            let result = run_bracketed(scope.as_ref(), work);
            if let Err(e) = &result {
                reporter.report(e);
            }
            let _ = tx.send(result);
        });

        match &self.sender {
            Some(sender) if self.is_async() => {
                if let Err(mpsc::SendError(job)) = sender.send(job) {
                    job();
                }
            }
            _ => job(),
        }

        handle
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Workers finish whatever is queued, then observe the disconnect
        self.sender.take();
        let threads = self
            .workers
            .drain(..)
            .map(|worker| worker.thread)
            .chain(self.retired.drain(..));
        for thread in threads {
            if thread.join().is_err() {
                warn!(target: "scripting", "Worker thread panicked during shutdown");
            }
        }
    }
}
