//! Builder for constructing state trees.

use crate::builder::error::{BuildError, BuildErrors};
use crate::builder::transition::TransitionBuilder;
use crate::core::{EventId, HistoryType, State, StateId, StateTree};
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;

/// Builder for a [`StateTree`].
///
/// States are declared first and wired together afterwards. Structural
/// mistakes (unknown ids, self-containment, a state added to two parents, an
/// initial state that is not a direct child) are rejected by the call that
/// makes them. Problems that can only be seen once the whole tree is known,
/// such as a composite state without an initial state, are reported by
/// [`build`](Self::build), which returns every problem at once.
///
/// # Example
///
/// ```rust
/// use hierarch::builder::{TransitionBuilder, TreeBuilder};
/// use hierarch::core::{EventId, HistoryType};
///
/// const TOGGLE: EventId = EventId::new(0);
///
/// let mut builder = TreeBuilder::<(), ()>::new(1);
/// let off = builder.state("Off").unwrap();
/// let on = builder.state("On").unwrap();
/// let dim = builder.state("Dim").unwrap();
///
/// builder.substate(on, dim).unwrap();
/// builder.initial(on, dim).unwrap();
/// builder.history(on, HistoryType::Shallow);
/// builder
///     .transition(off, TOGGLE, TransitionBuilder::new().target(on))
///     .unwrap();
/// builder
///     .transition(on, TOGGLE, TransitionBuilder::new().target(off))
///     .unwrap();
///
/// let tree = builder.build().unwrap();
/// assert_eq!(tree.level(dim), 2);
/// ```
pub struct TreeBuilder<A, R> {
    states: Vec<State<A, R>>,
    event_count: usize,
    deferred: Vec<BuildError>,
}

impl<A, R> TreeBuilder<A, R> {
    /// Create a builder whose states all have `event_count` event slots.
    pub fn new(event_count: usize) -> Self {
        Self {
            states: Vec::new(),
            event_count,
            deferred: Vec::new(),
        }
    }

    pub fn event_count(&self) -> usize {
        self.event_count
    }

    /// Look up a declared state by name.
    pub fn find(&self, name: &str) -> Option<StateId> {
        self.states.iter().find(|s| s.name == name).map(|s| s.id)
    }

    /// Declare a new top-level state.
    pub fn state(&mut self, name: impl Into<String>) -> Result<StateId, BuildError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(BuildError::EmptyStateName);
        }
        if self.find(&name).is_some() {
            return Err(BuildError::DuplicateState(name));
        }

        let id = StateId::new(self.states.len());
        self.states.push(State {
            id,
            name,
            superstate: None,
            substates: Vec::new(),
            initial: None,
            history_type: HistoryType::None,
            level: 1,
            entry: None,
            exit: None,
            transitions: (0..self.event_count).map(|_| Vec::new()).collect(),
        });
        Ok(id)
    }

    /// Make `substate` a child of `superstate`.
    pub fn substate(
        &mut self,
        superstate: StateId,
        substate: StateId,
    ) -> Result<&mut Self, BuildError> {
        self.node(superstate)?;
        let child = self.node(substate)?;

        if superstate == substate {
            return Err(BuildError::SelfContainment(child.name.clone()));
        }
        if let Some(parent) = child.superstate {
            return Err(BuildError::AlreadyContained {
                substate: child.name.clone(),
                superstate: self.states[parent.index()].name.clone(),
            });
        }

        let mut ancestor = Some(superstate);
        while let Some(current) = ancestor {
            if current == substate {
                return Err(BuildError::ContainmentCycle {
                    superstate: self.states[superstate.index()].name.clone(),
                    substate: child.name.clone(),
                });
            }
            ancestor = self.states[current.index()].superstate;
        }

        self.states[substate.index()].superstate = Some(superstate);
        self.states[superstate.index()].substates.push(substate);
        Ok(self)
    }

    /// Designate `initial` as the child entered when `state` has no history.
    pub fn initial(&mut self, state: StateId, initial: StateId) -> Result<&mut Self, BuildError> {
        let parent = self.node(state)?;
        let child = self.node(initial)?;
        if child.superstate != Some(state) {
            return Err(BuildError::InitialNotSubstate {
                state: parent.name.clone(),
                initial: child.name.clone(),
            });
        }

        self.states[state.index()].initial = Some(initial);
        Ok(self)
    }

    pub fn history(&mut self, state: StateId, history_type: HistoryType) -> &mut Self {
        if let Some(node) = self.deferred_node(state) {
            node.history_type = history_type;
        }
        self
    }

    /// Set the hook run each time `state` is entered.
    pub fn entry<F>(&mut self, state: StateId, hook: F) -> &mut Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        if let Some(node) = self.deferred_node(state) {
            node.entry = Some(Box::new(hook));
        }
        self
    }

    /// Set the hook run each time `state` is exited.
    pub fn exit<F>(&mut self, state: StateId, hook: F) -> &mut Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        if let Some(node) = self.deferred_node(state) {
            node.exit = Some(Box::new(hook));
        }
        self
    }

    /// Append a transition to `state`'s list for `event`.
    ///
    /// Transitions for the same event are tried in the order they are added.
    pub fn transition(
        &mut self,
        state: StateId,
        event: EventId,
        transition: TransitionBuilder<A, R>,
    ) -> Result<&mut Self, BuildError> {
        self.node(state)?;
        if event.index() >= self.event_count {
            return Err(BuildError::EventOutOfRange {
                event,
                count: self.event_count,
            });
        }
        if let Some(target) = transition.target_state() {
            self.node(target)?;
        }

        self.states[state.index()].transitions[event.index()].push(transition.build());
        Ok(self)
    }

    /// Validate the tree and compute state levels.
    pub fn build(mut self) -> Result<StateTree<A, R>, BuildErrors> {
        let mut checks: Vec<Validation<(), NonEmptyVec<BuildError>>> = self
            .deferred
            .drain(..)
            .map(|error| Validation::fail(error))
            .collect();

        for state in &self.states {
            checks.push(if state.is_composite() && state.initial.is_none() {
                Validation::fail(BuildError::MissingInitialState(state.name.clone()))
            } else {
                Validation::success(())
            });
        }

        if let Validation::Failure(errors) = Validation::all_vec(checks) {
            return Err(BuildErrors::new(errors.iter().cloned().collect()));
        }

        let levels: Vec<usize> = (0..self.states.len())
            .map(|index| {
                let mut level = 1;
                let mut current = self.states[index].superstate;
                while let Some(parent) = current {
                    level += 1;
                    current = self.states[parent.index()].superstate;
                }
                level
            })
            .collect();
        for (state, level) in self.states.iter_mut().zip(levels) {
            state.level = level;
        }

        Ok(StateTree {
            states: self.states,
            event_count: self.event_count,
        })
    }

    fn node(&self, id: StateId) -> Result<&State<A, R>, BuildError> {
        self.states
            .get(id.index())
            .ok_or(BuildError::UnknownState(id))
    }

    fn deferred_node(&mut self, id: StateId) -> Option<&mut State<A, R>> {
        if id.index() >= self.states.len() {
            self.deferred.push(BuildError::UnknownState(id));
        }
        self.states.get_mut(id.index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GO: EventId = EventId::new(0);

    #[test]
    fn state_rejects_empty_and_duplicate_names() {
        let mut builder = TreeBuilder::<(), ()>::new(1);
        builder.state("Idle").unwrap();

        assert_eq!(builder.state("  "), Err(BuildError::EmptyStateName));
        assert_eq!(
            builder.state("Idle"),
            Err(BuildError::DuplicateState("Idle".to_string()))
        );
    }

    #[test]
    fn substate_rejects_self_containment() {
        let mut builder = TreeBuilder::<(), ()>::new(1);
        let a = builder.state("A").unwrap();

        assert!(matches!(
            builder.substate(a, a),
            Err(BuildError::SelfContainment(name)) if name == "A"
        ));
    }

    #[test]
    fn substate_belongs_to_one_superstate() {
        let mut builder = TreeBuilder::<(), ()>::new(1);
        let a = builder.state("A").unwrap();
        let b = builder.state("B").unwrap();
        let c = builder.state("C").unwrap();
        builder.substate(a, c).unwrap();

        assert!(matches!(
            builder.substate(b, c),
            Err(BuildError::AlreadyContained { .. })
        ));
    }

    #[test]
    fn substate_rejects_cycles() {
        let mut builder = TreeBuilder::<(), ()>::new(1);
        let a = builder.state("A").unwrap();
        let b = builder.state("B").unwrap();
        builder.substate(a, b).unwrap();

        assert!(matches!(
            builder.substate(b, a),
            Err(BuildError::ContainmentCycle { .. })
        ));
    }

    #[test]
    fn initial_must_be_direct_substate() {
        let mut builder = TreeBuilder::<(), ()>::new(1);
        let a = builder.state("A").unwrap();
        let b = builder.state("B").unwrap();
        let c = builder.state("C").unwrap();
        builder.substate(a, b).unwrap();
        builder.substate(b, c).unwrap();

        assert!(matches!(
            builder.initial(a, c),
            Err(BuildError::InitialNotSubstate { .. })
        ));
        assert!(builder.initial(a, b).is_ok());
    }

    #[test]
    fn transition_rejects_out_of_range_event() {
        let mut builder = TreeBuilder::<(), ()>::new(1);
        let a = builder.state("A").unwrap();

        let result = builder.transition(a, EventId::new(1), TransitionBuilder::new());

        assert!(matches!(
            result,
            Err(BuildError::EventOutOfRange { count: 1, .. })
        ));
    }

    #[test]
    fn transition_rejects_foreign_target() {
        let mut builder = TreeBuilder::<(), ()>::new(1);
        let a = builder.state("A").unwrap();
        let foreign = StateId::new(9);

        let result = builder.transition(a, GO, TransitionBuilder::new().target(foreign));

        assert!(matches!(result, Err(BuildError::UnknownState(id)) if id == foreign));
    }

    #[test]
    fn build_reports_every_problem() {
        let mut builder = TreeBuilder::<(), ()>::new(1);
        let a = builder.state("A").unwrap();
        let a1 = builder.state("A1").unwrap();
        let b = builder.state("B").unwrap();
        let b1 = builder.state("B1").unwrap();
        builder.substate(a, a1).unwrap();
        builder.substate(b, b1).unwrap();
        builder.history(StateId::new(42), HistoryType::Deep);

        let errors = builder.build().unwrap_err();

        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&BuildError::UnknownState(StateId::new(42))));
        assert!(errors.contains(&BuildError::MissingInitialState("A".to_string())));
        assert!(errors.contains(&BuildError::MissingInitialState("B".to_string())));
    }

    #[test]
    fn build_computes_levels() {
        let mut builder = TreeBuilder::<(), ()>::new(1);
        let root = builder.state("Root").unwrap();
        let mid = builder.state("Mid").unwrap();
        let leaf = builder.state("Leaf").unwrap();
        builder.substate(mid, leaf).unwrap();
        builder.substate(root, mid).unwrap();
        builder.initial(mid, leaf).unwrap();
        builder.initial(root, mid).unwrap();

        let tree = builder.build().unwrap();

        assert_eq!(tree.level(root), 1);
        assert_eq!(tree.level(mid), 2);
        assert_eq!(tree.level(leaf), 3);
        assert_eq!(tree.get(root).unwrap().substates(), &[mid]);
    }
}
