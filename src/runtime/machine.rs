//! State machine facade driving a state tree through a delegate queue.

use crate::config::MachineConfig;
use crate::core::{
    catch, dispatch_caught, EventId, Fault, Histories, StateId, StateTree, TransitionLog,
    TransitionRecord, TransitionResult,
};
use crate::runtime::handle::{Handle, InvokeError};
use crate::runtime::queue::{DelegateQueue, Placement, QueueError};
use crate::snapshot::{HistoryEntry, MachineSnapshot, SNAPSHOT_VERSION};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Unique identity of a machine, shared by its notifications and snapshots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MachineId(Uuid);

impl MachineId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MachineId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Errors returned by [`StateMachine`] operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MachineError {
    #[error("State machine is disposed")]
    Disposed,

    #[error("State machine is not initialized")]
    NotInitialized,

    #[error("State machine is already initialized")]
    AlreadyInitialized,

    #[error("{event} is out of range; the machine has {count} event slots")]
    EventOutOfRange { event: EventId, count: usize },

    #[error("{0} does not belong to this machine")]
    UnknownState(StateId),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Invoke(#[from] InvokeError),
}

/// Notification raised after every dispatch.
///
/// A dropped event has `fired == false`, `state == source` and no fault.
#[derive(Clone, Debug, PartialEq)]
pub struct TransitionCompleted<R> {
    pub machine: MachineId,
    /// Active state when the event was dispatched
    pub source: StateId,
    /// Active state after the dispatch
    pub state: StateId,
    pub event: EventId,
    pub fired: bool,
    pub fault: Option<Fault>,
    /// Value produced by the transition's action
    pub result: Option<R>,
    pub timestamp: DateTime<Utc>,
}

type CompletedListener<R> = Arc<dyn Fn(&TransitionCompleted<R>) + Send + Sync>;
type FaultListener = Arc<dyn Fn(&Fault) + Send + Sync>;

struct Runtime {
    current: Option<StateId>,
    histories: Histories,
    log: TransitionLog,
}

struct MachineCore<A, R> {
    id: MachineId,
    tree: StateTree<A, R>,
    runtime: Mutex<Runtime>,
    completed_listeners: RwLock<Vec<CompletedListener<R>>>,
    fault_listeners: RwLock<Vec<FaultListener>>,
}

impl<A, R> MachineCore<A, R> {
    /// Runs on the queue worker.
    fn initialize(&self, entry: StateId) -> Result<StateId, MachineError> {
        let mut histories = {
            let mut runtime = self.runtime.lock();
            if runtime.current.is_some() {
                return Err(MachineError::AlreadyInitialized);
            }
            runtime.histories.clone()
        };

        let entered = catch(|| self.tree.initialize(&mut histories, entry));
        let active = entered.map_err(|fault| MachineError::Invoke(InvokeError::Faulted(fault)))?;

        let mut runtime = self.runtime.lock();
        runtime.histories = histories;
        runtime.current = Some(active);
        debug!(
            machine = %self.id,
            state = %self.tree.name(active),
            "state machine initialized"
        );
        Ok(active)
    }

    /// Runs on the queue worker; at most one dispatch per machine at a time.
    ///
    /// The dispatch works on a copy of the history table. Readers keep
    /// seeing the last published table until the copy is swapped in; a
    /// dispatch aborted by a fault publishes nothing but its log record.
    fn dispatch(&self, event: EventId, args: A, notify: bool) -> Result<Option<R>, Fault> {
        let (source, mut histories) = {
            let mut runtime = self.runtime.lock();
            match runtime.current {
                Some(source) => (source, runtime.histories.clone()),
                None => return Ok(None),
            }
        };

        let resolved = dispatch_caught(&self.tree, &mut histories, source, event, &args);
        let committed = resolved.is_ok();
        let (state, fired, outcome) = match resolved {
            Ok(TransitionResult::Fired { next, outcome, .. }) => (next, true, outcome),
            Ok(TransitionResult::Dropped) => (source, false, Ok(None)),
            Err(fault) => (source, false, Err(fault)),
        };
        let (result, fault) = match outcome {
            Ok(result) => (result, None),
            Err(fault) => (None, Some(fault)),
        };
        let timestamp = Utc::now();

        {
            let mut runtime = self.runtime.lock();
            if committed {
                runtime.histories = histories;
                runtime.current = Some(state);
            }
            runtime.log.record(TransitionRecord {
                from: source,
                to: state,
                event,
                fired,
                fault: fault.clone(),
                timestamp,
            });
        }

        trace!(
            machine = %self.id,
            from = %self.tree.name(source),
            to = %self.tree.name(state),
            %event,
            fired,
            "event dispatched"
        );

        let completed = TransitionCompleted {
            machine: self.id,
            source,
            state,
            event,
            fired,
            fault,
            result,
            timestamp,
        };
        self.raise_completed(&completed);

        match completed.fault {
            Some(fault) => {
                warn!(machine = %self.id, %event, %fault, "dispatch faulted");
                if notify {
                    self.raise_fault(&fault);
                }
                Err(fault)
            }
            None => Ok(completed.result),
        }
    }

    fn raise_completed(&self, completed: &TransitionCompleted<R>) {
        let listeners: Vec<CompletedListener<R>> = self.completed_listeners.read().clone();
        for listener in listeners {
            if let Err(panic) = catch(|| listener(completed)) {
                warn!(machine = %self.id, %panic, "transition listener panicked");
            }
        }
    }

    fn raise_fault(&self, fault: &Fault) {
        let listeners: Vec<FaultListener> = self.fault_listeners.read().clone();
        for listener in listeners {
            if let Err(panic) = catch(|| listener(fault)) {
                warn!(machine = %self.id, %panic, "fault listener panicked");
            }
        }
    }
}

/// A hierarchical state machine.
///
/// Every dispatch runs on a [`DelegateQueue`] worker, so at most one
/// transition is evaluated at a time. A machine created with
/// [`new`](Self::new) owns a private queue; machines created with
/// [`with_queue`](Self::with_queue) share the given queue and never run
/// concurrently with each other.
///
/// # Example
///
/// ```rust
/// use hierarch::builder::{TransitionBuilder, TreeBuilder};
/// use hierarch::config::MachineConfig;
/// use hierarch::core::EventId;
/// use hierarch::runtime::StateMachine;
///
/// const TOGGLE: EventId = EventId::new(0);
///
/// let mut builder = TreeBuilder::<(), ()>::new(1);
/// let off = builder.state("Off").unwrap();
/// let on = builder.state("On").unwrap();
/// builder.transition(off, TOGGLE, TransitionBuilder::new().target(on)).unwrap();
/// builder.transition(on, TOGGLE, TransitionBuilder::new().target(off)).unwrap();
///
/// let machine = StateMachine::new(builder.build().unwrap(), MachineConfig::default()).unwrap();
/// machine.initialize(off).unwrap();
/// machine.send_blocking(TOGGLE, ()).unwrap();
/// assert_eq!(machine.current_state_name().as_deref(), Some("On"));
/// ```
pub struct StateMachine<A, R> {
    core: Arc<MachineCore<A, R>>,
    queue: DelegateQueue,
    owns_queue: bool,
    disposed: AtomicBool,
}

impl<A, R> StateMachine<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    /// Create a machine with its own private queue.
    pub fn new(tree: StateTree<A, R>, config: MachineConfig) -> Result<Self, MachineError> {
        let queue = DelegateQueue::new(config.queue.clone())?;
        Ok(Self::assemble(tree, queue, true, &config))
    }

    /// Create a machine that dispatches on a shared queue.
    pub fn with_queue(tree: StateTree<A, R>, queue: &DelegateQueue, config: MachineConfig) -> Self {
        Self::assemble(tree, queue.clone(), false, &config)
    }

    fn assemble(
        tree: StateTree<A, R>,
        queue: DelegateQueue,
        owns_queue: bool,
        config: &MachineConfig,
    ) -> Self {
        let histories = tree.histories();
        let core = MachineCore {
            id: MachineId::new(),
            tree,
            runtime: Mutex::new(Runtime {
                current: None,
                histories,
                log: TransitionLog::new(config.record_capacity),
            }),
            completed_listeners: RwLock::new(Vec::new()),
            fault_listeners: RwLock::new(Vec::new()),
        };
        debug!(machine = %core.id, queue = %queue.name(), owns_queue, "state machine created");

        Self {
            core: Arc::new(core),
            queue,
            owns_queue,
            disposed: AtomicBool::new(false),
        }
    }

    /// Enter `entry` and its ancestors, then descend by history to a leaf.
    ///
    /// Runs on the queue worker and waits for it. Returns the active leaf.
    pub fn initialize(&self, entry: StateId) -> Result<StateId, MachineError> {
        self.ensure_open()?;
        if self.core.tree.get(entry).is_none() {
            return Err(MachineError::UnknownState(entry));
        }
        let core = Arc::clone(&self.core);
        self.queue.invoke(move || Ok(core.initialize(entry)))?
    }

    /// Queue `event` at the tail of the machine's queue.
    ///
    /// The returned handle may be awaited or dropped. A fault is delivered
    /// to the handle and to the machine's fault listeners.
    pub fn send(
        &self,
        event: impl Into<EventId>,
        args: A,
    ) -> Result<Handle<Option<R>>, MachineError> {
        self.enqueue(event.into(), args, Placement::Back, true)
    }

    /// Queue `event` ahead of every plain event that has not started yet.
    pub fn send_priority(
        &self,
        event: impl Into<EventId>,
        args: A,
    ) -> Result<Handle<Option<R>>, MachineError> {
        self.enqueue(event.into(), args, Placement::Priority, true)
    }

    /// Queue `event` at the tail and wait for its action result.
    ///
    /// Faults are returned to the caller only.
    pub fn send_blocking(&self, event: impl Into<EventId>, args: A) -> Result<Option<R>, MachineError> {
        if self.queue.is_worker_thread() {
            return Err(InvokeError::Reentrant.into());
        }
        let handle = self.enqueue(event.into(), args, Placement::Back, false)?;
        self.wait_for_completion(handle)
    }

    /// Block until a previously sent event has been dispatched.
    pub fn wait_for_completion(&self, handle: Handle<Option<R>>) -> Result<Option<R>, MachineError> {
        Ok(handle.wait()?)
    }

    fn enqueue(
        &self,
        event: EventId,
        args: A,
        placement: Placement,
        notify: bool,
    ) -> Result<Handle<Option<R>>, MachineError> {
        self.ensure_open()?;
        let count = self.core.tree.event_count();
        if event.index() >= count {
            return Err(MachineError::EventOutOfRange { event, count });
        }
        if self.core.runtime.lock().current.is_none() {
            return Err(MachineError::NotInitialized);
        }

        let core = Arc::clone(&self.core);
        let handle = self
            .queue
            .enqueue(move || core.dispatch(event, args, notify), placement, false)?;
        Ok(handle)
    }

    fn ensure_open(&self) -> Result<(), MachineError> {
        if self.is_disposed() {
            Err(MachineError::Disposed)
        } else {
            Ok(())
        }
    }
}

impl<A, R> StateMachine<A, R> {
    pub fn id(&self) -> MachineId {
        self.core.id
    }

    pub fn tree(&self) -> &StateTree<A, R> {
        &self.core.tree
    }

    /// The queue this machine dispatches on.
    pub fn queue(&self) -> &DelegateQueue {
        &self.queue
    }

    pub fn is_initialized(&self) -> bool {
        self.core.runtime.lock().current.is_some()
    }

    /// Active leaf state as of the last completed dispatch.
    pub fn current_state(&self) -> Option<StateId> {
        self.core.runtime.lock().current
    }

    pub fn current_state_name(&self) -> Option<String> {
        self.current_state()
            .map(|state| self.core.tree.name(state).to_string())
    }

    /// Active states from the top of the tree down to the leaf.
    pub fn active_path(&self) -> Vec<StateId> {
        self.current_state()
            .map(|state| self.core.tree.path(state))
            .unwrap_or_default()
    }

    /// Copy of the recent dispatch log.
    pub fn transition_log(&self) -> TransitionLog {
        self.core.runtime.lock().log.clone()
    }

    /// Register a listener called after every dispatch.
    ///
    /// Listeners run on the queue worker.
    pub fn on_transition_completed<F>(&self, listener: F)
    where
        F: Fn(&TransitionCompleted<R>) + Send + Sync + 'static,
    {
        self.core.completed_listeners.write().push(Arc::new(listener));
    }

    /// Register a listener for faults raised by [`send`](Self::send) and
    /// [`send_priority`](Self::send_priority) dispatches.
    pub fn on_fault<F>(&self, listener: F)
    where
        F: Fn(&Fault) + Send + Sync + 'static,
    {
        self.core.fault_listeners.write().push(Arc::new(listener));
    }

    /// Capture the machine's observable state.
    pub fn snapshot(&self) -> MachineSnapshot {
        let tree = &self.core.tree;
        let runtime = self.core.runtime.lock();
        let active_path = runtime
            .current
            .map(|state| tree.path(state))
            .unwrap_or_default()
            .into_iter()
            .map(|state| tree.name(state).to_string())
            .collect();
        let history = runtime
            .histories
            .entries()
            .map(|(state, last)| HistoryEntry {
                state: tree.name(state).to_string(),
                last_active: tree.name(last).to_string(),
            })
            .collect();

        MachineSnapshot {
            version: SNAPSHOT_VERSION,
            machine: self.core.id,
            timestamp: Utc::now(),
            current: runtime.current,
            active_path,
            history,
            records: runtime.log.clone(),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Stop accepting events. A private queue is disposed with the machine;
    /// a shared queue keeps running for its other machines.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.owns_queue {
            self.queue.dispose();
        }
        debug!(machine = %self.core.id, "state machine disposed");
    }
}

impl<A, R> Drop for StateMachine<A, R> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<A, R> fmt::Debug for StateMachine<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("id", &self.core.id)
            .field("current", &self.current_state())
            .field("queue", &self.queue)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
