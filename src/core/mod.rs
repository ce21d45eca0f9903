//! Core hierarchical state machine types and logic.
//!
//! This module contains the state tree and the transition-firing algorithm:
//! - Identifiers and the arena node (`StateId`, `EventId`, `State`)
//! - Guard predicates for transition control
//! - Transitions and the exit/entry unwinding plan
//! - Event dispatch with bubbling and history-based re-entry
//! - A bounded log of dispatch records
//!
//! Nothing here is synchronized. The runtime guarantees that at most one
//! dispatch runs against a tree's mutable companions at a time.

mod fault;
mod guard;
mod history;
mod state;
mod transition;
mod tree;

pub use fault::Fault;
pub(crate) use fault::catch;
pub use guard::Guard;
pub use history::{TransitionLog, TransitionRecord};
pub use state::{EventId, HistoryType, Hook, State, StateId};
pub use transition::{Action, ActionResult, Transition, UnwindPlan};
pub(crate) use tree::dispatch_caught;
pub use tree::{Histories, StateTree, TransitionResult};
