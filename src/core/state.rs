//! State identifiers and the arena node that makes up a state tree.
//!
//! States live in a flat arena owned by [`StateTree`](super::StateTree) and
//! refer to each other by [`StateId`]. The parent link is assigned once when
//! the tree is built and never changes afterwards, so ancestor walks are a
//! chain of index lookups with no ownership cycles.

use super::transition::Transition;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Side effect run when a state is entered or exited.
pub type Hook = Box<dyn Fn() + Send + Sync>;

/// Stable handle of a state inside its tree.
///
/// Handles are only meaningful for the tree that produced them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateId(usize);

impl StateId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// Position of the state in its tree's arena.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "State({})", self.0)
    }
}

/// Identifier of an event slot.
///
/// Every state of a tree has the same number of event slots; an event id must
/// be smaller than that count to be accepted by a machine.
///
/// # Example
///
/// ```rust
/// use hierarch::core::EventId;
///
/// let timer = EventId::new(2);
/// assert_eq!(timer.index(), 2);
/// assert_eq!(EventId::from(2usize), timer);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(usize);

impl EventId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for EventId {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event({})", self.0)
    }
}

/// Policy deciding which descendant a composite state resumes into when it
/// is the target of a transition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HistoryType {
    /// Enter the initial state, then its initial state, down to a leaf.
    #[default]
    None,
    /// Enter the last active child, then descend through initial states.
    Shallow,
    /// Enter the last active child, then its last active child, down to a leaf.
    Deep,
}

/// A node of the state tree.
///
/// The transition table has one slot per event; an empty slot means the
/// event is not handled here and bubbles to the superstate.
pub struct State<A, R> {
    pub(crate) id: StateId,
    pub(crate) name: String,
    pub(crate) superstate: Option<StateId>,
    pub(crate) substates: Vec<StateId>,
    pub(crate) initial: Option<StateId>,
    pub(crate) history_type: HistoryType,
    pub(crate) level: usize,
    pub(crate) entry: Option<Hook>,
    pub(crate) exit: Option<Hook>,
    pub(crate) transitions: Vec<Vec<Transition<A, R>>>,
}

impl<A, R> State<A, R> {
    pub fn id(&self) -> StateId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn superstate(&self) -> Option<StateId> {
        self.superstate
    }

    /// Direct children in the order they were added.
    pub fn substates(&self) -> &[StateId] {
        &self.substates
    }

    pub fn initial_state(&self) -> Option<StateId> {
        self.initial
    }

    pub fn history_type(&self) -> HistoryType {
        self.history_type
    }

    /// Depth from the top of the tree; top-level states are at level 1.
    pub fn level(&self) -> usize {
        self.level
    }

    pub fn is_composite(&self) -> bool {
        !self.substates.is_empty()
    }

    /// Number of event slots in this state's transition table.
    pub fn event_count(&self) -> usize {
        self.transitions.len()
    }

    /// Transitions declared for `event`, in declaration order.
    pub fn transitions(&self, event: EventId) -> &[Transition<A, R>] {
        self.transitions
            .get(event.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub(crate) fn run_entry(&self) {
        if let Some(entry) = &self.entry {
            entry();
        }
    }

    pub(crate) fn run_exit(&self) {
        if let Some(exit) = &self.exit {
            exit();
        }
    }
}

impl<A, R> fmt::Debug for State<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("superstate", &self.superstate)
            .field("substates", &self.substates)
            .field("initial", &self.initial)
            .field("history_type", &self.history_type)
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}
