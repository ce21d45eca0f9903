//! Single-worker delegate queue.
//!
//! A [`DelegateQueue`] owns one worker thread that runs submitted closures
//! one at a time. Plain submissions run in FIFO order; priority
//! submissions jump ahead of every plain item that has not started yet
//! while staying FIFO among themselves. This is what serializes dispatches
//! for one or more state machines.

use crate::config::QueueConfig;
use crate::core::{catch, Fault};
use crate::runtime::handle::{completion, Handle, InvokeError};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Errors returned when submitting to a queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Queue is disposed")]
    Disposed,

    #[error("Failed to spawn queue worker: {0}")]
    Spawn(String),
}

impl From<QueueError> for InvokeError {
    fn from(_: QueueError) -> Self {
        InvokeError::Disposed
    }
}

type Job = Box<dyn FnOnce() -> Option<Fault> + Send>;
type FaultListener = Arc<dyn Fn(&Fault) + Send + Sync>;
type DisposedListener = Arc<dyn Fn() + Send + Sync>;

struct Item {
    job: Job,
    /// Raise fault listeners if the job faults
    notify: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Placement {
    Back,
    Priority,
}

#[derive(Default)]
struct Pending {
    items: VecDeque<Item>,
    /// Number of priority items at the front of `items`
    priority: usize,
}

struct Shared {
    name: String,
    pending: Mutex<Pending>,
    available: Condvar,
    disposed: AtomicBool,
    fault_listeners: RwLock<Vec<FaultListener>>,
    disposed_listeners: RwLock<Vec<DisposedListener>>,
}

impl Shared {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn raise_fault(&self, fault: &Fault) {
        let listeners: Vec<FaultListener> = self.fault_listeners.read().clone();
        for listener in listeners {
            if let Err(panic) = catch(|| listener(fault)) {
                warn!(queue = %self.name, %panic, "fault listener panicked");
            }
        }
    }

    /// Take every pending item out of the queue.
    fn drain(&self) -> Vec<Item> {
        let mut pending = self.pending.lock();
        pending.priority = 0;
        pending.items.drain(..).collect()
    }
}

struct Inner {
    shared: Arc<Shared>,
    worker: ThreadId,
}

impl Drop for Inner {
    fn drop(&mut self) {
        dispose(&self.shared);
    }
}

/// Thread-safe queue of invocations serviced by one dedicated worker.
///
/// Cloning a queue yields another handle to the same worker; the worker is
/// disposed when [`dispose`](Self::dispose) is called or the last handle is
/// dropped.
///
/// # Example
///
/// ```rust
/// use hierarch::config::QueueConfig;
/// use hierarch::runtime::DelegateQueue;
///
/// let queue = DelegateQueue::new(QueueConfig::default()).unwrap();
/// let handle = queue.submit(|| Ok(6 * 7)).unwrap();
/// assert_eq!(handle.wait(), Ok(42));
/// ```
#[derive(Clone)]
pub struct DelegateQueue {
    inner: Arc<Inner>,
}

impl DelegateQueue {
    /// Create a queue and start its worker thread.
    pub fn new(config: QueueConfig) -> Result<Self, QueueError> {
        let shared = Arc::new(Shared {
            name: config.name.clone(),
            pending: Mutex::new(Pending::default()),
            available: Condvar::new(),
            disposed: AtomicBool::new(false),
            fault_listeners: RwLock::new(Vec::new()),
            disposed_listeners: RwLock::new(Vec::new()),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(config.name)
            .spawn(move || run(worker_shared))
            .map_err(|e| QueueError::Spawn(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(Inner {
                shared,
                worker: worker.thread().id(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.shared.name
    }

    /// Append `f` to the tail of the queue.
    ///
    /// If `f` faults, the fault is delivered to the handle and to the
    /// queue's fault listeners.
    pub fn submit<T, F>(&self, f: F) -> Result<Handle<T>, QueueError>
    where
        F: FnOnce() -> Result<T, Fault> + Send + 'static,
        T: Send + 'static,
    {
        self.enqueue(f, Placement::Back, true)
    }

    /// Place `f` ahead of every plain item that has not started yet.
    pub fn submit_priority<T, F>(&self, f: F) -> Result<Handle<T>, QueueError>
    where
        F: FnOnce() -> Result<T, Fault> + Send + 'static,
        T: Send + 'static,
    {
        self.enqueue(f, Placement::Priority, true)
    }

    /// Append `f` to the tail and block until it has run.
    pub fn invoke<T, F>(&self, f: F) -> Result<T, InvokeError>
    where
        F: FnOnce() -> Result<T, Fault> + Send + 'static,
        T: Send + 'static,
    {
        self.reject_reentrant()?;
        self.enqueue(f, Placement::Back, false)?.wait()
    }

    /// Place `f` at the head of the queue and block until it has run.
    pub fn invoke_blocking<T, F>(&self, f: F) -> Result<T, InvokeError>
    where
        F: FnOnce() -> Result<T, Fault> + Send + 'static,
        T: Send + 'static,
    {
        self.reject_reentrant()?;
        self.enqueue(f, Placement::Priority, false)?.wait()
    }

    /// Block until a previously submitted invocation has run.
    pub fn wait<T>(&self, handle: Handle<T>) -> Result<T, InvokeError> {
        handle.wait()
    }

    /// Whether the caller is running on this queue's worker thread.
    pub fn is_worker_thread(&self) -> bool {
        thread::current().id() == self.inner.worker
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.shared.is_disposed()
    }

    /// Number of items waiting to run.
    pub fn len(&self) -> usize {
        self.inner.shared.pending.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a listener for faults raised by [`submit`](Self::submit)
    /// and [`submit_priority`](Self::submit_priority) invocations.
    ///
    /// Listeners run on the worker thread.
    pub fn on_fault<F>(&self, listener: F)
    where
        F: Fn(&Fault) + Send + Sync + 'static,
    {
        self.inner.shared.fault_listeners.write().push(Arc::new(listener));
    }

    /// Register a listener called once when the queue is disposed.
    pub fn on_disposed<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner
            .shared
            .disposed_listeners
            .write()
            .push(Arc::new(listener));
    }

    /// Stop the worker and release every pending waiter.
    ///
    /// Items that have not started are dropped; their handles resolve with
    /// [`InvokeError::Disposed`]. Idempotent.
    pub fn dispose(&self) {
        dispose(&self.inner.shared);
    }

    pub(crate) fn enqueue<T, F>(
        &self,
        f: F,
        placement: Placement,
        notify: bool,
    ) -> Result<Handle<T>, QueueError>
    where
        F: FnOnce() -> Result<T, Fault> + Send + 'static,
        T: Send + 'static,
    {
        let (completer, handle) = completion(self.inner.worker);
        let job: Job = Box::new(move || {
            let outcome = catch(f).and_then(|result| result);
            let fault = outcome.as_ref().err().cloned();
            completer.complete(outcome.map_err(InvokeError::Faulted));
            fault
        });

        let shared = &self.inner.shared;
        {
            let mut pending = shared.pending.lock();
            if shared.is_disposed() {
                return Err(QueueError::Disposed);
            }
            let item = Item { job, notify };
            match placement {
                Placement::Back => pending.items.push_back(item),
                Placement::Priority => {
                    let at = pending.priority;
                    pending.items.insert(at, item);
                    pending.priority += 1;
                }
            }
        }
        shared.available.notify_one();
        trace!(queue = %shared.name, ?placement, "invocation queued");

        Ok(handle)
    }

    fn reject_reentrant(&self) -> Result<(), InvokeError> {
        if self.is_worker_thread() {
            Err(InvokeError::Reentrant)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for DelegateQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegateQueue")
            .field("name", &self.name())
            .field("pending", &self.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

fn dispose(shared: &Shared) {
    if shared.disposed.swap(true, Ordering::SeqCst) {
        return;
    }

    {
        let _pending = shared.pending.lock();
        shared.available.notify_all();
    }
    let dropped = shared.drain();
    debug!(queue = %shared.name, dropped = dropped.len(), "queue disposed");
    drop(dropped);

    let listeners: Vec<DisposedListener> = shared.disposed_listeners.read().clone();
    for listener in listeners {
        if let Err(panic) = catch(|| listener()) {
            warn!(queue = %shared.name, %panic, "disposed listener panicked");
        }
    }
}

fn run(shared: Arc<Shared>) {
    debug!(queue = %shared.name, "queue worker started");

    loop {
        let batch = {
            let mut pending = shared.pending.lock();
            while pending.items.is_empty() && !shared.is_disposed() {
                shared.available.wait(&mut pending);
            }
            if shared.is_disposed() {
                break;
            }
            pending.priority = 0;
            pending.items.drain(..).collect::<Vec<_>>()
        };

        for item in batch {
            if shared.is_disposed() {
                break;
            }
            let fault = (item.job)();
            if let Some(fault) = fault.filter(|_| item.notify) {
                warn!(queue = %shared.name, %fault, "queued invocation faulted");
                shared.raise_fault(&fault);
            }
        }
    }

    drop(shared.drain());
    debug!(queue = %shared.name, "queue worker stopped");
}
