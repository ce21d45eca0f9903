//! Scheduled tasks and their persistent worker threads.

use crate::core::Fault;
use crate::runtime::{DelegateQueue, QueueError};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// How many times a scheduled task runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Repeat {
    /// Run this many times, then return the worker to the pool
    Times(u32),
    /// Run until the scheduler is cleared or disposed
    Forever,
}

/// Identifies one call to `Scheduler::schedule`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskTicket(u64);

impl TaskTicket {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Something that can run scheduled work on its own thread.
///
/// When a task is scheduled on a target, its worker hands each invocation
/// to the target instead of running it directly. Faults raised there are
/// reported by the target.
pub trait InvokeTarget: Send + Sync + 'static {
    fn invoke_async(&self, work: Box<dyn FnOnce() -> Result<(), Fault> + Send>)
        -> Result<(), QueueError>;
}

impl InvokeTarget for DelegateQueue {
    fn invoke_async(
        &self,
        work: Box<dyn FnOnce() -> Result<(), Fault> + Send>,
    ) -> Result<(), QueueError> {
        self.submit(work).map(|_| ())
    }
}

pub(crate) type Work = Arc<dyn Fn() -> Result<(), Fault> + Send + Sync>;

/// What a pooled worker is currently assigned to do.
pub(crate) struct Assignment {
    pub(crate) ticket: TaskTicket,
    pub(crate) remaining: Repeat,
    pub(crate) interval: Duration,
    pub(crate) work: Work,
    pub(crate) target: Option<Arc<dyn InvokeTarget>>,
    /// Scheduler epoch the task was scheduled in; a `clear` starts a new one
    pub(crate) epoch: u64,
}

impl Assignment {
    /// Count one run. Returns whether the task should run again.
    pub(crate) fn consume(&mut self) -> bool {
        match &mut self.remaining {
            Repeat::Forever => true,
            Repeat::Times(n) => {
                *n = n.saturating_sub(1);
                *n > 0
            }
        }
    }
}

pub(crate) struct TaskState {
    pub(crate) assignment: Option<Assignment>,
    /// Set by the polling clock when the task is due
    pub(crate) fire: bool,
    pub(crate) disposed: bool,
}

/// A worker thread's mailbox. Lives in the due-queue while waiting for its
/// deadline and in the pool while unassigned.
pub(crate) struct Task {
    pub(crate) worker: usize,
    pub(crate) state: Mutex<TaskState>,
    pub(crate) signal: Condvar,
}

impl Task {
    pub(crate) fn new(worker: usize) -> Self {
        Self {
            worker,
            state: Mutex::new(TaskState {
                assignment: None,
                fire: false,
                disposed: false,
            }),
            signal: Condvar::new(),
        }
    }

    pub(crate) fn assign(&self, assignment: Assignment) {
        self.state.lock().assignment = Some(assignment);
    }

    /// Wake the worker to run its assignment once.
    pub(crate) fn fire(&self) {
        self.state.lock().fire = true;
        self.signal.notify_one();
    }

    /// Terminate the worker thread.
    pub(crate) fn dispose(&self) {
        {
            let mut state = self.state.lock();
            state.disposed = true;
            state.assignment = None;
        }
        self.signal.notify_one();
    }

    /// Block until fired; `None` once disposed.
    pub(crate) fn next_run(&self) -> Option<(TaskTicket, Work, Option<Arc<dyn InvokeTarget>>)> {
        let mut state = self.state.lock();
        loop {
            while !state.fire && !state.disposed {
                self.signal.wait(&mut state);
            }
            if state.disposed {
                return None;
            }
            state.fire = false;
            if let Some(assignment) = &state.assignment {
                return Some((
                    assignment.ticket,
                    Arc::clone(&assignment.work),
                    assignment.target.clone(),
                ));
            }
        }
    }
}
