//! Completion handles for queued invocations.

use crate::core::Fault;
use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread::{self, ThreadId};
use thiserror::Error;

/// Why an awaited invocation produced no value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError {
    /// The queue was disposed before the invocation ran.
    #[error("Queue was disposed before the invocation ran")]
    Disposed,

    /// The invocation ran and faulted.
    #[error("Invocation faulted: {0}")]
    Faulted(#[from] Fault),

    /// A blocking wait was attempted on the queue's own worker thread.
    #[error("Cannot block on a queue from its own worker thread")]
    Reentrant,
}

struct Slot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

struct SlotState<T> {
    outcome: Option<Result<T, InvokeError>>,
    waker: Option<Waker>,
}

impl<T> Slot<T> {
    fn fill(&self, outcome: Result<T, InvokeError>) {
        let waker = {
            let mut state = self.state.lock();
            state.outcome = Some(outcome);
            state.waker.take()
        };
        self.ready.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// Handle to the outcome of a submitted invocation.
///
/// Block on it with [`wait`](Self::wait) or `.await` it; dropping it
/// without waiting is fine (fire-and-forget).
pub struct Handle<T> {
    slot: Arc<Slot<T>>,
    worker: ThreadId,
}

impl<T> Handle<T> {
    /// Block until the invocation has run and return its outcome.
    ///
    /// Returns [`InvokeError::Reentrant`] instead of deadlocking when called
    /// on the worker thread that would have to run the invocation.
    pub fn wait(self) -> Result<T, InvokeError> {
        let mut state = self.slot.state.lock();
        loop {
            if let Some(outcome) = state.outcome.take() {
                return outcome;
            }
            if thread::current().id() == self.worker {
                return Err(InvokeError::Reentrant);
            }
            self.slot.ready.wait(&mut state);
        }
    }

    /// Whether the outcome is available without blocking.
    pub fn is_complete(&self) -> bool {
        self.slot.state.lock().outcome.is_some()
    }
}

impl<T> Future for Handle<T> {
    type Output = Result<T, InvokeError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.slot.state.lock();
        match state.outcome.take() {
            Some(outcome) => Poll::Ready(outcome),
            None => {
                state.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("complete", &self.is_complete())
            .finish()
    }
}

/// Producer side of a [`Handle`].
///
/// Dropping a completer without completing it resolves the handle with
/// [`InvokeError::Disposed`], so no waiter is left hanging.
pub(crate) struct Completer<T> {
    slot: Option<Arc<Slot<T>>>,
}

impl<T> Completer<T> {
    pub(crate) fn complete(mut self, outcome: Result<T, InvokeError>) {
        if let Some(slot) = self.slot.take() {
            slot.fill(outcome);
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.fill(Err(InvokeError::Disposed));
        }
    }
}

/// Create a connected completer/handle pair for an invocation run by
/// `worker`.
pub(crate) fn completion<T>(worker: ThreadId) -> (Completer<T>, Handle<T>) {
    let slot = Arc::new(Slot {
        state: Mutex::new(SlotState {
            outcome: None,
            waker: None,
        }),
        ready: Condvar::new(),
    });
    (
        Completer {
            slot: Some(Arc::clone(&slot)),
        },
        Handle { slot, worker },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn other_thread() -> ThreadId {
        thread::spawn(|| thread::current().id()).join().unwrap()
    }

    #[test]
    fn wait_returns_completed_value() {
        let (completer, handle) = completion(other_thread());
        completer.complete(Ok(7));

        assert!(handle.is_complete());
        assert_eq!(handle.wait(), Ok(7));
    }

    #[test]
    fn wait_blocks_until_completed() {
        let (completer, handle) = completion::<&str>(other_thread());
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completer.complete(Ok("done"));
        });

        assert_eq!(handle.wait(), Ok("done"));
        producer.join().unwrap();
    }

    #[test]
    fn dropped_completer_reports_disposed() {
        let (completer, handle) = completion::<()>(other_thread());
        drop(completer);

        assert_eq!(handle.wait(), Err(InvokeError::Disposed));
    }

    #[test]
    fn waiting_on_worker_thread_is_rejected() {
        let (_completer, handle) = completion::<()>(thread::current().id());

        assert_eq!(handle.wait(), Err(InvokeError::Reentrant));
    }

    #[tokio::test]
    async fn handle_can_be_awaited() {
        let (completer, handle) = completion::<u32>(other_thread());
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            completer.complete(Err(InvokeError::Faulted(Fault::action("jammed"))));
        });

        assert_eq!(
            handle.await,
            Err(InvokeError::Faulted(Fault::action("jammed")))
        );
    }
}
