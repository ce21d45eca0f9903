//! Builder for constructing transitions.

use crate::core::{Action, ActionResult, Guard, StateId, Transition};

/// Builder for constructing transitions with a fluent API.
///
/// Every part is optional: without a guard the transition always fires,
/// without an action nothing runs between exits and entries, and without a
/// target the transition is internal.
///
/// # Example
///
/// ```rust
/// use hierarch::builder::{TransitionBuilder, TreeBuilder};
/// use hierarch::core::EventId;
///
/// let mut builder = TreeBuilder::<u32, String>::new(1);
/// let idle = builder.state("Idle").unwrap();
/// let busy = builder.state("Busy").unwrap();
///
/// let transition = TransitionBuilder::new()
///     .guard(|jobs: &u32| *jobs > 0)
///     .action(|jobs: &u32| Ok(Some(format!("{jobs} queued"))))
///     .target(busy);
/// builder.transition(idle, EventId::new(0), transition).unwrap();
/// ```
pub struct TransitionBuilder<A, R> {
    guard: Option<Guard<A>>,
    action: Option<Action<A, R>>,
    target: Option<StateId>,
}

impl<A, R> TransitionBuilder<A, R> {
    /// Create a new transition builder.
    pub fn new() -> Self {
        Self {
            guard: None,
            action: None,
            target: None,
        }
    }

    /// Add a guard predicate over the event arguments.
    pub fn guard<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&A) -> bool + Send + Sync + 'static,
    {
        self.guard = Some(Guard::new(predicate));
        self
    }

    /// Set the action run while the transition fires.
    pub fn action<F>(mut self, action: F) -> Self
    where
        F: Fn(&A) -> ActionResult<R> + Send + Sync + 'static,
    {
        self.action = Some(Box::new(action));
        self
    }

    /// Set the target state. Leave unset for an internal transition.
    pub fn target(mut self, state: StateId) -> Self {
        self.target = Some(state);
        self
    }

    pub(crate) fn target_state(&self) -> Option<StateId> {
        self.target
    }

    pub fn build(self) -> Transition<A, R> {
        Transition {
            guard: self.guard,
            action: self.action,
            target: self.target,
        }
    }
}

impl<A, R> Default for TransitionBuilder<A, R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Fault;

    #[test]
    fn empty_builder_creates_internal_transition() {
        let transition: Transition<(), ()> = TransitionBuilder::new().build();

        assert!(transition.is_internal());
        assert!(!transition.has_guard());
        assert!(!transition.has_action());
    }

    #[test]
    fn builder_keeps_every_part() {
        let transition: Transition<i32, String> = TransitionBuilder::new()
            .guard(|n: &i32| *n > 0)
            .action(|n: &i32| {
                if *n > 10 {
                    Err(Fault::action("too many"))
                } else {
                    Ok(Some(n.to_string()))
                }
            })
            .target(StateId::new(1))
            .build();

        assert_eq!(transition.target(), Some(StateId::new(1)));
        assert!(transition.has_guard());
        assert!(transition.has_action());
        assert_eq!(transition.should_fire(&3), Ok(true));
        assert_eq!(transition.should_fire(&-3), Ok(false));
    }
}
