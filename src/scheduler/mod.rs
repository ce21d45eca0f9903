//! Delayed and repeating task scheduler.
//!
//! Scheduled tasks wait in a due-queue ordered by deadline. A polling clock
//! wakes every `polling_interval` and releases every task whose deadline has
//! passed to that task's own worker thread, so tasks that fall due together
//! never block each other. When a finite task has run its last time, its
//! worker goes back to a pool and is reused by the next
//! [`schedule`](Scheduler::schedule) call.
//!
//! Lock order: due-queue before a task's state, never the reverse. The pool
//! lock is never held together with either.

mod error;
mod task;

pub use error::ScheduleError;
pub use task::{InvokeTarget, Repeat, TaskTicket};

use crate::config::SchedulerConfig;
use crate::core::{catch, Fault};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use task::{Assignment, Task, Work};
use tracing::{debug, trace, warn};

type FaultListener = Arc<dyn Fn(TaskTicket, &Fault) + Send + Sync>;

struct Clock {
    running: bool,
    disposed: bool,
    interval: Duration,
}

struct Shared {
    name: String,
    clock: Mutex<Clock>,
    clock_signal: Condvar,
    /// Tasks waiting for their deadline, keyed by (deadline, sequence)
    due: Mutex<BTreeMap<(Instant, u64), Arc<Task>>>,
    pool: Mutex<Vec<Arc<Task>>>,
    disposed: AtomicBool,
    epoch: AtomicU64,
    next_ticket: AtomicU64,
    next_sequence: AtomicU64,
    workers_created: AtomicUsize,
    fault_listeners: RwLock<Vec<FaultListener>>,
}

impl Shared {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn enqueue(&self, deadline: Instant, task: Arc<Task>) {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        self.due.lock().insert((deadline, sequence), task);
    }

    /// Hand every task whose deadline has passed to its worker.
    fn release_due(&self) {
        let now = Instant::now();
        let mut due = self.due.lock();
        while let Some(entry) = due.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let task = entry.remove();
            trace!(scheduler = %self.name, worker = task.worker, "task due");
            task.fire();
        }
    }

    /// Called by a worker after each run: re-enqueue, pool or retire it.
    fn after_run(&self, task: &Arc<Task>) {
        let mut due = self.due.lock();
        let mut state = task.state.lock();
        if state.disposed {
            return;
        }
        let current_epoch = self.epoch.load(Ordering::SeqCst);
        let Some(assignment) = state.assignment.as_mut() else {
            return;
        };

        if self.is_disposed() || assignment.epoch != current_epoch {
            state.disposed = true;
            state.assignment = None;
            return;
        }

        if assignment.consume() {
            let deadline = Instant::now() + assignment.interval;
            let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
            due.insert((deadline, sequence), Arc::clone(task));
            return;
        }

        trace!(scheduler = %self.name, ticket = %assignment.ticket, "task finished");
        state.assignment = None;
        drop(state);
        drop(due);
        self.pool.lock().push(Arc::clone(task));
    }

    fn raise_fault(&self, ticket: TaskTicket, fault: &Fault) {
        let listeners: Vec<FaultListener> = self.fault_listeners.read().clone();
        for listener in listeners {
            if let Err(panic) = catch(|| listener(ticket, fault)) {
                warn!(scheduler = %self.name, %panic, "fault listener panicked");
            }
        }
    }

    /// Dispose every queued and pooled task and start a new epoch so that
    /// tasks running right now retire when they finish.
    fn clear(&self) -> usize {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let pending: Vec<Arc<Task>> = std::mem::take(&mut *self.due.lock()).into_values().collect();
        let pooled: Vec<Arc<Task>> = std::mem::take(&mut *self.pool.lock());
        for task in pending.iter().chain(&pooled) {
            task.dispose();
        }
        pending.len() + pooled.len()
    }
}

/// Runs work after a delay, once, a fixed number of times or forever.
///
/// The first invocation happens one interval after scheduling, not
/// immediately. The polling clock starts stopped; call
/// [`start`](Self::start) to begin releasing due tasks.
///
/// # Example
///
/// ```rust
/// use hierarch::config::SchedulerConfig;
/// use hierarch::scheduler::{Repeat, Scheduler};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
/// let ticks = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&ticks);
///
/// scheduler
///     .schedule(Repeat::Times(2), Duration::from_millis(20), move || {
///         counter.fetch_add(1, Ordering::SeqCst);
///         Ok(())
///     })
///     .unwrap();
/// scheduler.start().unwrap();
///
/// std::thread::sleep(Duration::from_millis(200));
/// assert_eq!(ticks.load(Ordering::SeqCst), 2);
/// ```
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Create a scheduler and its (stopped) polling clock.
    pub fn new(config: SchedulerConfig) -> Result<Self, ScheduleError> {
        let shared = Arc::new(Shared {
            name: config.name.clone(),
            clock: Mutex::new(Clock {
                running: false,
                disposed: false,
                interval: config.polling_interval(),
            }),
            clock_signal: Condvar::new(),
            due: Mutex::new(BTreeMap::new()),
            pool: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            next_ticket: AtomicU64::new(0),
            next_sequence: AtomicU64::new(0),
            workers_created: AtomicUsize::new(0),
            fault_listeners: RwLock::new(Vec::new()),
        });

        let clock_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name(format!("{}-clock", config.name))
            .spawn(move || poll(clock_shared))
            .map_err(|e| ScheduleError::Spawn(e.to_string()))?;

        Ok(Self { shared })
    }

    /// Run `work` after each `interval`, `repeat` times.
    pub fn schedule<F>(
        &self,
        repeat: Repeat,
        interval: Duration,
        work: F,
    ) -> Result<TaskTicket, ScheduleError>
    where
        F: Fn() -> Result<(), Fault> + Send + Sync + 'static,
    {
        self.add(repeat, interval, Arc::new(work), None)
    }

    /// Like [`schedule`](Self::schedule), but each invocation is handed to
    /// `target` (for example a machine's queue) instead of running on the
    /// task's worker.
    pub fn schedule_on<T, F>(
        &self,
        target: &T,
        repeat: Repeat,
        interval: Duration,
        work: F,
    ) -> Result<TaskTicket, ScheduleError>
    where
        T: InvokeTarget + Clone,
        F: Fn() -> Result<(), Fault> + Send + Sync + 'static,
    {
        self.add(repeat, interval, Arc::new(work), Some(Arc::new(target.clone())))
    }

    fn add(
        &self,
        repeat: Repeat,
        interval: Duration,
        work: Work,
        target: Option<Arc<dyn InvokeTarget>>,
    ) -> Result<TaskTicket, ScheduleError> {
        if self.is_disposed() {
            return Err(ScheduleError::Disposed);
        }
        if repeat == Repeat::Times(0) {
            return Err(ScheduleError::ZeroCount);
        }

        let shared = &self.shared;
        let ticket = TaskTicket::new(shared.next_ticket.fetch_add(1, Ordering::SeqCst));
        let pooled = shared.pool.lock().pop();
        let task = match pooled {
            Some(task) => task,
            None => spawn_worker(shared)?,
        };

        task.assign(Assignment {
            ticket,
            remaining: repeat,
            interval,
            work,
            target,
            epoch: shared.epoch.load(Ordering::SeqCst),
        });
        shared.enqueue(Instant::now() + interval, task);
        trace!(scheduler = %shared.name, %ticket, ?repeat, ?interval, "task scheduled");

        Ok(ticket)
    }

    /// Start the polling clock. Does nothing if it is already running.
    pub fn start(&self) -> Result<(), ScheduleError> {
        {
            let mut clock = self.shared.clock.lock();
            if clock.disposed {
                return Err(ScheduleError::Disposed);
            }
            if clock.running {
                return Ok(());
            }
            clock.running = true;
        }
        self.shared.clock_signal.notify_all();
        debug!(scheduler = %self.shared.name, "scheduler started");
        Ok(())
    }

    /// Stop the polling clock. Scheduled tasks are kept; tasks already
    /// released to their workers still run.
    pub fn stop(&self) {
        let was_running = std::mem::replace(&mut self.shared.clock.lock().running, false);
        if was_running {
            self.shared.clock_signal.notify_all();
            debug!(scheduler = %self.shared.name, "scheduler stopped");
        }
    }

    /// Discard every scheduled and pooled task; their workers terminate.
    pub fn clear(&self) {
        let cleared = self.shared.clear();
        debug!(scheduler = %self.shared.name, cleared, "scheduler cleared");
    }

    /// Stop, clear and refuse further use. Idempotent.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut clock = self.shared.clock.lock();
            clock.running = false;
            clock.disposed = true;
        }
        self.shared.clock_signal.notify_all();
        let cleared = self.shared.clear();
        debug!(scheduler = %self.shared.name, cleared, "scheduler disposed");
    }

    pub fn is_running(&self) -> bool {
        self.shared.clock.lock().running
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.is_disposed()
    }

    pub fn polling_interval(&self) -> Duration {
        self.shared.clock.lock().interval
    }

    pub fn set_polling_interval(&self, interval: Duration) {
        self.shared.clock.lock().interval = interval;
        self.shared.clock_signal.notify_all();
    }

    /// Number of tasks waiting for their deadline.
    pub fn pending(&self) -> usize {
        self.shared.due.lock().len()
    }

    /// Number of idle workers available for reuse.
    pub fn pooled(&self) -> usize {
        self.shared.pool.lock().len()
    }

    /// Number of task worker threads created so far.
    pub fn workers_created(&self) -> usize {
        self.shared.workers_created.load(Ordering::SeqCst)
    }

    /// Register a listener for faults raised by directly-run tasks.
    ///
    /// Faults of tasks scheduled with [`schedule_on`](Self::schedule_on)
    /// are reported by their target instead.
    pub fn on_fault<F>(&self, listener: F)
    where
        F: Fn(TaskTicket, &Fault) + Send + Sync + 'static,
    {
        self.shared.fault_listeners.write().push(Arc::new(listener));
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.shared.name)
            .field("running", &self.is_running())
            .field("pending", &self.pending())
            .field("pooled", &self.pooled())
            .finish()
    }
}

fn spawn_worker(shared: &Arc<Shared>) -> Result<Arc<Task>, ScheduleError> {
    let index = shared.workers_created.fetch_add(1, Ordering::SeqCst);
    let task = Arc::new(Task::new(index));

    let worker_shared = Arc::clone(shared);
    let worker_task = Arc::clone(&task);
    thread::Builder::new()
        .name(format!("{}-task-{index}", shared.name))
        .spawn(move || run_task(worker_shared, worker_task))
        .map_err(|e| ScheduleError::Spawn(e.to_string()))?;

    debug!(scheduler = %shared.name, worker = index, "task worker created");
    Ok(task)
}

fn run_task(shared: Arc<Shared>, task: Arc<Task>) {
    while let Some((ticket, work, target)) = task.next_run() {
        match target {
            Some(target) => {
                let run = Arc::clone(&work);
                if let Err(error) = target.invoke_async(Box::new(move || run())) {
                    warn!(scheduler = %shared.name, %ticket, %error, "invoke target rejected task");
                }
            }
            None => {
                if let Err(fault) = catch(|| work()).and_then(|result| result) {
                    warn!(scheduler = %shared.name, %ticket, %fault, "scheduled task faulted");
                    shared.raise_fault(ticket, &fault);
                }
            }
        }
        shared.after_run(&task);
    }
    trace!(scheduler = %shared.name, worker = task.worker, "task worker stopped");
}

fn poll(shared: Arc<Shared>) {
    debug!(scheduler = %shared.name, "polling clock started");
    loop {
        {
            let mut clock = shared.clock.lock();
            while !clock.running && !clock.disposed {
                shared.clock_signal.wait(&mut clock);
            }
            if clock.disposed {
                break;
            }
            let interval = clock.interval;
            shared.clock_signal.wait_for(&mut clock, interval);
            if clock.disposed {
                break;
            }
            if !clock.running {
                continue;
            }
        }
        shared.release_due();
    }
    debug!(scheduler = %shared.name, "polling clock stopped");
}
