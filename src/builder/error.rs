//! Build errors for state trees and machine definitions.

use crate::core::{EventId, StateId};
use std::fmt;
use thiserror::Error;

/// Kind of named handler a definition row refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerKind {
    Guard,
    Action,
    Entry,
    Exit,
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            HandlerKind::Guard => "guard",
            HandlerKind::Action => "action",
            HandlerKind::Entry => "entry",
            HandlerKind::Exit => "exit",
        };
        f.write_str(kind)
    }
}

/// Errors that can occur when building a state tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("State name cannot be empty")]
    EmptyStateName,

    #[error("State '{0}' is declared more than once")]
    DuplicateState(String),

    #[error("Event name cannot be empty (in state '{state}')")]
    EmptyEventName { state: String },

    #[error("{0} does not belong to this builder")]
    UnknownState(StateId),

    #[error("State '{state}' transitions to unknown state '{target}'")]
    UnknownTarget { state: String, target: String },

    #[error("State '{state}' lists unknown substate '{substate}'")]
    UnknownSubstate { state: String, substate: String },

    #[error("State '{0}' cannot be a substate of itself")]
    SelfContainment(String),

    #[error("State '{substate}' already belongs to '{superstate}'")]
    AlreadyContained { substate: String, superstate: String },

    #[error("Adding '{substate}' to '{superstate}' would create a containment cycle")]
    ContainmentCycle { superstate: String, substate: String },

    #[error("Initial state '{initial}' is not a direct substate of '{state}'")]
    InitialNotSubstate { state: String, initial: String },

    #[error("Composite state '{0}' has no initial state")]
    MissingInitialState(String),

    #[error("Initial state not specified. Set the definition's initial state")]
    MissingTopInitial,

    #[error("Initial state '{0}' is unknown or is not a top-level state")]
    InvalidTopInitial(String),

    #[error("{event} is out of range; the tree has {count} event slots")]
    EventOutOfRange { event: EventId, count: usize },

    #[error("State '{state}' refers to unknown {kind} handler '{name}'")]
    UnknownHandler {
        state: String,
        kind: HandlerKind,
        name: String,
    },
}

/// Every problem found while building, in the order they were found.
///
/// Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildErrors(Vec<BuildError>);

impl BuildErrors {
    pub(crate) fn new(errors: Vec<BuildError>) -> Self {
        Self(errors)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BuildError> {
        self.0.iter()
    }

    pub fn contains(&self, error: &BuildError) -> bool {
        self.0.contains(error)
    }

    pub fn into_vec(self) -> Vec<BuildError> {
        self.0
    }
}

impl From<BuildError> for BuildErrors {
    fn from(error: BuildError) -> Self {
        Self(vec![error])
    }
}

impl fmt::Display for BuildErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} build error(s)", self.0.len())?;
        for error in &self.0 {
            write!(f, "\n  - {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for BuildErrors {}
