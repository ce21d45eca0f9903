//! Concurrent execution runtime.
//!
//! A [`DelegateQueue`] serializes invocations on one worker thread and
//! hands back a [`Handle`] per invocation. A [`StateMachine`] wraps a
//! [`StateTree`](crate::core::StateTree) and routes every dispatch through
//! such a queue, either its own or one shared with other machines.

mod handle;
mod machine;
mod queue;

pub use handle::{Handle, InvokeError};
pub use machine::{MachineError, MachineId, StateMachine, TransitionCompleted};
pub use queue::{DelegateQueue, QueueError};
