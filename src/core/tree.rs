//! The state tree and event dispatch.
//!
//! A [`StateTree`] is immutable once built. The only state that changes
//! while events are dispatched lives next to it: the active state (held by
//! the machine) and the [`Histories`] table recording each composite state's
//! last active child.

use super::fault::{catch, Fault};
use super::state::{EventId, HistoryType, State, StateId};
use super::transition::ActionResult;
use tracing::trace;

/// Last active child of every state, indexed by [`StateId`].
///
/// A composite state's entry starts out as its initial state and is
/// overwritten each time one of its children is exited.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Histories {
    last: Vec<Option<StateId>>,
}

impl Histories {
    pub fn get(&self, state: StateId) -> Option<StateId> {
        self.last.get(state.index()).copied().flatten()
    }

    /// Composite states paired with their remembered child.
    pub fn entries(&self) -> impl Iterator<Item = (StateId, StateId)> + '_ {
        self.last
            .iter()
            .enumerate()
            .filter_map(|(index, last)| last.map(|child| (StateId::new(index), child)))
    }

    fn record(&mut self, parent: StateId, child: StateId) {
        if let Some(slot) = self.last.get_mut(parent.index()) {
            *slot = Some(child);
        }
    }
}

/// Result of resolving one event against the active state.
#[derive(Debug, PartialEq)]
pub enum TransitionResult<R> {
    /// A transition fired in `handler`'s table; `next` is the new active state.
    Fired {
        handler: StateId,
        next: StateId,
        outcome: ActionResult<R>,
    },
    /// No state on the path to the root had a matching transition.
    Dropped,
}

/// Arena of states forming one or more containment trees.
pub struct StateTree<A, R> {
    pub(crate) states: Vec<State<A, R>>,
    pub(crate) event_count: usize,
}

impl<A, R> StateTree<A, R> {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Number of event slots every state in the tree has.
    pub fn event_count(&self) -> usize {
        self.event_count
    }

    pub fn get(&self, id: StateId) -> Option<&State<A, R>> {
        self.states.get(id.index())
    }

    /// Look a state up by name.
    pub fn find(&self, name: &str) -> Option<StateId> {
        self.states.iter().find(|s| s.name == name).map(|s| s.id)
    }

    pub fn states(&self) -> impl Iterator<Item = &State<A, R>> {
        self.states.iter()
    }

    /// Name the state was declared with.
    ///
    /// # Panics
    ///
    /// Panics if `id` belongs to a different tree. Use [`StateTree::get`] to
    /// look up an id of unknown origin.
    pub fn name(&self, id: StateId) -> &str {
        self.state(id).name()
    }

    /// # Panics
    ///
    /// Panics if `id` belongs to a different tree.
    pub fn superstate(&self, id: StateId) -> Option<StateId> {
        self.state(id).superstate
    }

    /// Depth of the state; top-level states sit at level 1.
    ///
    /// # Panics
    ///
    /// Panics if `id` belongs to a different tree.
    pub fn level(&self, id: StateId) -> usize {
        self.state(id).level
    }

    /// States from the top of the tree down to `id`, inclusive.
    ///
    /// # Panics
    ///
    /// Panics if `id` belongs to a different tree.
    pub fn path(&self, id: StateId) -> Vec<StateId> {
        let mut path = vec![id];
        let mut current = id;
        while let Some(parent) = self.superstate(current) {
            path.push(parent);
            current = parent;
        }
        path.reverse();
        path
    }

    /// Whether `ancestor` contains `descendant` (a state contains itself).
    ///
    /// # Panics
    ///
    /// Panics if `descendant` belongs to a different tree.
    pub fn contains(&self, ancestor: StateId, descendant: StateId) -> bool {
        let mut current = Some(descendant);
        while let Some(state) = current {
            if state == ancestor {
                return true;
            }
            current = self.superstate(state);
        }
        false
    }

    /// Fresh history table where every composite state remembers its
    /// initial state.
    pub fn histories(&self) -> Histories {
        Histories {
            last: self.states.iter().map(|s| s.initial).collect(),
        }
    }

    pub(crate) fn state(&self, id: StateId) -> &State<A, R> {
        &self.states[id.index()]
    }

    /// Enter every ancestor of `entry` from the top down, then enter `entry`
    /// by its history. Returns the resulting active leaf.
    pub(crate) fn initialize(&self, histories: &mut Histories, entry: StateId) -> StateId {
        let path = self.path(entry);
        if let Some((_, ancestors)) = path.split_last() {
            for &state in ancestors {
                self.state(state).run_entry();
            }
        }
        self.enter_by_history(histories, entry)
    }

    /// Resolve `event` against `source`, bubbling to ancestors until a
    /// transition whose guard passes fires.
    ///
    /// Transitions in a table are tried in declaration order and the first
    /// one that passes its guard wins. An error means a guard faulted; no
    /// transition fired and nothing changed.
    pub(crate) fn dispatch(
        &self,
        histories: &mut Histories,
        source: StateId,
        event: EventId,
        args: &A,
    ) -> Result<TransitionResult<R>, Fault> {
        let mut handler = Some(source);

        while let Some(current) = handler {
            for transition in self.state(current).transitions(event) {
                if transition.should_fire(args)? {
                    trace!(
                        source = %self.name(source),
                        handler = %self.name(current),
                        %event,
                        "transition fired"
                    );
                    let (next, outcome) = transition.fire(self, histories, source, current, args);
                    return Ok(TransitionResult::Fired {
                        handler: current,
                        next,
                        outcome,
                    });
                }
            }
            handler = self.superstate(current);
        }

        trace!(source = %self.name(source), %event, "event dropped");
        Ok(TransitionResult::Dropped)
    }

    /// Run `state`'s exit hook and make it its parent's history.
    pub(crate) fn exit_state(&self, histories: &mut Histories, state: StateId) {
        let node = self.state(state);
        node.run_exit();
        if let Some(parent) = node.superstate {
            histories.record(parent, state);
        }
    }

    /// Enter `state` and descend to a leaf according to its history type.
    pub(crate) fn enter_by_history(&self, histories: &Histories, state: StateId) -> StateId {
        let node = self.state(state);
        node.run_entry();

        match node.history_type {
            HistoryType::None => match node.initial {
                Some(initial) => self.enter_shallow(initial),
                None => state,
            },
            HistoryType::Shallow => match histories.get(state) {
                Some(last) => self.enter_shallow(last),
                None => state,
            },
            HistoryType::Deep => match histories.get(state) {
                Some(last) => self.enter_deep(histories, last),
                None => state,
            },
        }
    }

    /// Enter `state`, then follow initial states down to a leaf.
    fn enter_shallow(&self, state: StateId) -> StateId {
        let mut current = state;
        loop {
            let node = self.state(current);
            node.run_entry();
            match node.initial {
                Some(initial) => current = initial,
                None => return current,
            }
        }
    }

    /// Enter `state`, then follow remembered children down to a leaf.
    fn enter_deep(&self, histories: &Histories, state: StateId) -> StateId {
        let mut current = state;
        loop {
            self.state(current).run_entry();
            match histories.get(current) {
                Some(last) => current = last,
                None => return current,
            }
        }
    }
}

impl<A, R> std::fmt::Debug for StateTree<A, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateTree")
            .field("states", &self.states)
            .field("event_count", &self.event_count)
            .finish()
    }
}

/// Dispatch wrapper that also turns panics from entry/exit hooks into faults.
pub(crate) fn dispatch_caught<A, R>(
    tree: &StateTree<A, R>,
    histories: &mut Histories,
    source: StateId,
    event: EventId,
    args: &A,
) -> Result<TransitionResult<R>, Fault> {
    catch(|| tree.dispatch(histories, source, event, args)).and_then(|result| result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{TransitionBuilder, TreeBuilder};
    use crate::core::Fault;
    use parking_lot::Mutex;
    use std::sync::Arc;

    const FLIP: EventId = EventId::new(0);
    const RESET: EventId = EventId::new(1);

    type Trace = Arc<Mutex<Vec<String>>>;

    fn hooks(builder: &mut TreeBuilder<u32, u32>, state: StateId, name: &str, trace: &Trace) {
        let on_entry = Arc::clone(trace);
        let entry_name = format!("enter {name}");
        builder.entry(state, move || on_entry.lock().push(entry_name.clone()));
        let on_exit = Arc::clone(trace);
        let exit_name = format!("exit {name}");
        builder.exit(state, move || on_exit.lock().push(exit_name.clone()));
    }

    struct Switch {
        tree: StateTree<u32, u32>,
        off: StateId,
        on: StateId,
        dim: StateId,
        bright: StateId,
        trace: Trace,
    }

    // Off <-> On{Dim, Bright}; RESET on On is a self-transition on the
    // composite, FLIP inside On toggles Dim/Bright.
    fn switch(history: HistoryType) -> Switch {
        let trace: Trace = Arc::new(Mutex::new(Vec::new()));
        let mut builder = TreeBuilder::new(2);
        let off = builder.state("Off").unwrap();
        let on = builder.state("On").unwrap();
        let dim = builder.state("Dim").unwrap();
        let bright = builder.state("Bright").unwrap();
        for (state, name) in [(off, "Off"), (on, "On"), (dim, "Dim"), (bright, "Bright")] {
            hooks(&mut builder, state, name, &trace);
        }
        builder.substate(on, dim).unwrap();
        builder.substate(on, bright).unwrap();
        builder.initial(on, dim).unwrap();
        builder.history(on, history);

        builder
            .transition(off, FLIP, TransitionBuilder::new().target(on))
            .unwrap();
        builder
            .transition(dim, FLIP, TransitionBuilder::new().target(bright))
            .unwrap();
        builder
            .transition(
                bright,
                FLIP,
                TransitionBuilder::new()
                    .guard(|level: &u32| *level == 0)
                    .target(off),
            )
            .unwrap();
        builder
            .transition(
                bright,
                FLIP,
                TransitionBuilder::new().target(dim).action(|level: &u32| Ok(Some(*level))),
            )
            .unwrap();
        builder
            .transition(on, RESET, TransitionBuilder::new().target(on))
            .unwrap();

        Switch {
            tree: builder.build().unwrap(),
            off,
            on,
            dim,
            bright,
            trace,
        }
    }

    fn next(result: Result<TransitionResult<u32>, Fault>) -> StateId {
        match result.unwrap() {
            TransitionResult::Fired { next, .. } => next,
            TransitionResult::Dropped => panic!("expected the event to fire"),
        }
    }

    #[test]
    fn initialize_enters_ancestors_then_descends_by_history() {
        let s = switch(HistoryType::None);
        let mut histories = s.tree.histories();

        let active = s.tree.initialize(&mut histories, s.on);

        assert_eq!(active, s.dim);
        assert_eq!(*s.trace.lock(), vec!["enter On", "enter Dim"]);
    }

    #[test]
    fn initialize_on_nested_state_enters_its_ancestors() {
        let s = switch(HistoryType::None);
        let mut histories = s.tree.histories();

        let active = s.tree.initialize(&mut histories, s.bright);

        assert_eq!(active, s.bright);
        assert_eq!(*s.trace.lock(), vec!["enter On", "enter Bright"]);
    }

    #[test]
    fn unmatched_event_is_dropped() {
        let s = switch(HistoryType::None);
        let mut histories = s.tree.histories();
        let active = s.tree.initialize(&mut histories, s.off);

        let result = s.tree.dispatch(&mut histories, active, RESET, &0).unwrap();

        assert_eq!(result, TransitionResult::Dropped);
    }

    #[test]
    fn failing_guard_falls_through_to_next_transition() {
        let s = switch(HistoryType::None);
        let mut histories = s.tree.histories();
        let mut active = s.tree.initialize(&mut histories, s.bright);

        let result = s.tree.dispatch(&mut histories, active, FLIP, &7).unwrap();
        match result {
            TransitionResult::Fired { next, outcome, .. } => {
                assert_eq!(next, s.dim);
                assert_eq!(outcome, Ok(Some(7)));
                active = next;
            }
            TransitionResult::Dropped => panic!("expected fallback transition"),
        }

        assert_eq!(active, s.dim);
    }

    #[test]
    fn event_bubbles_to_superstate() {
        let s = switch(HistoryType::None);
        let mut histories = s.tree.histories();
        let active = s.tree.initialize(&mut histories, s.on);
        s.trace.lock().clear();

        let active = next(s.tree.dispatch(&mut histories, active, RESET, &0));

        assert_eq!(active, s.dim);
        assert_eq!(
            *s.trace.lock(),
            vec!["exit Dim", "exit On", "enter On", "enter Dim"]
        );
    }

    #[test]
    fn exit_records_history_in_parent() {
        let s = switch(HistoryType::Shallow);
        let mut histories = s.tree.histories();
        assert_eq!(histories.get(s.on), Some(s.dim));

        let active = s.tree.initialize(&mut histories, s.on);
        let active = next(s.tree.dispatch(&mut histories, active, FLIP, &1));
        let _ = next(s.tree.dispatch(&mut histories, active, FLIP, &0));

        assert_eq!(histories.get(s.on), Some(s.bright));
    }

    #[test]
    fn shallow_history_resumes_last_child() {
        let s = switch(HistoryType::Shallow);
        let mut histories = s.tree.histories();
        let active = s.tree.initialize(&mut histories, s.on);
        let active = next(s.tree.dispatch(&mut histories, active, FLIP, &1));
        let active = next(s.tree.dispatch(&mut histories, active, FLIP, &0));
        assert_eq!(active, s.off);

        let active = next(s.tree.dispatch(&mut histories, active, FLIP, &0));

        assert_eq!(active, s.bright);
    }

    #[test]
    fn no_history_always_resumes_initial_child() {
        let s = switch(HistoryType::None);
        let mut histories = s.tree.histories();
        let active = s.tree.initialize(&mut histories, s.on);
        let active = next(s.tree.dispatch(&mut histories, active, FLIP, &1));
        let active = next(s.tree.dispatch(&mut histories, active, FLIP, &0));

        let active = next(s.tree.dispatch(&mut histories, active, FLIP, &0));

        assert_eq!(active, s.dim);
    }

    #[test]
    fn guard_panic_is_reported_as_fault() {
        let mut builder = TreeBuilder::<u32, u32>::new(1);
        let idle = builder.state("Idle").unwrap();
        let busy = builder.state("Busy").unwrap();
        builder
            .transition(
                idle,
                FLIP,
                TransitionBuilder::new()
                    .guard(|_: &u32| panic!("sensor offline"))
                    .target(busy),
            )
            .unwrap();
        let tree = builder.build().unwrap();
        let mut histories = tree.histories();

        let result = tree.dispatch(&mut histories, idle, FLIP, &0);

        assert_eq!(result, Err(Fault::Panicked("sensor offline".to_string())));
    }

    #[test]
    fn hook_panic_is_caught_by_dispatch_wrapper() {
        let mut builder = TreeBuilder::<u32, u32>::new(1);
        let idle = builder.state("Idle").unwrap();
        let busy = builder.state("Busy").unwrap();
        builder.entry(busy, || panic!("cannot enter"));
        builder
            .transition(idle, FLIP, TransitionBuilder::new().target(busy))
            .unwrap();
        let tree = builder.build().unwrap();
        let mut histories = tree.histories();

        let result = dispatch_caught(&tree, &mut histories, idle, FLIP, &0);

        assert_eq!(result, Err(Fault::Panicked("cannot enter".to_string())));
    }

    #[test]
    fn path_and_contains_follow_parents() {
        let s = switch(HistoryType::None);

        assert_eq!(s.tree.path(s.bright), vec![s.on, s.bright]);
        assert!(s.tree.contains(s.on, s.bright));
        assert!(s.tree.contains(s.on, s.on));
        assert!(!s.tree.contains(s.off, s.bright));
        assert_eq!(s.tree.find("Bright"), Some(s.bright));
        assert_eq!(s.tree.level(s.bright), 2);
    }

    #[test]
    fn leaf_self_transition_runs_exit_action_entry_in_order() {
        let trace: Trace = Arc::new(Mutex::new(Vec::new()));
        let mut builder = TreeBuilder::<u32, u32>::new(1);
        let idle = builder.state("Idle").unwrap();
        hooks(&mut builder, idle, "Idle", &trace);
        let action_trace = Arc::clone(&trace);
        builder
            .transition(
                idle,
                FLIP,
                TransitionBuilder::new().target(idle).action(move |_: &u32| {
                    action_trace.lock().push("action".to_string());
                    Ok(None)
                }),
            )
            .unwrap();
        let tree = builder.build().unwrap();
        let mut histories = tree.histories();
        let active = tree.initialize(&mut histories, idle);
        trace.lock().clear();

        let active = next(tree.dispatch(&mut histories, active, FLIP, &0));

        assert_eq!(active, idle);
        assert_eq!(*trace.lock(), vec!["exit Idle", "action", "enter Idle"]);
    }

    #[test]
    fn equal_depth_cousins_leave_parents_untouched() {
        let trace: Trace = Arc::new(Mutex::new(Vec::new()));
        let mut builder = TreeBuilder::<u32, u32>::new(1);
        let top = builder.state("Top").unwrap();
        let a = builder.state("A").unwrap();
        let a1 = builder.state("A1").unwrap();
        let b = builder.state("B").unwrap();
        let b1 = builder.state("B1").unwrap();
        for (state, name) in [(top, "Top"), (a, "A"), (a1, "A1"), (b, "B"), (b1, "B1")] {
            hooks(&mut builder, state, name, &trace);
        }
        builder.substate(top, a).unwrap().substate(top, b).unwrap();
        builder.substate(a, a1).unwrap().substate(b, b1).unwrap();
        builder.initial(top, a).unwrap().initial(a, a1).unwrap().initial(b, b1).unwrap();
        builder
            .transition(a1, FLIP, TransitionBuilder::new().target(b1))
            .unwrap();
        let tree = builder.build().unwrap();
        let mut histories = tree.histories();
        let active = tree.initialize(&mut histories, top);
        trace.lock().clear();

        let active = next(tree.dispatch(&mut histories, active, FLIP, &0));

        assert_eq!(active, b1);
        assert_eq!(*trace.lock(), vec!["exit A1", "enter B1"]);
    }

    #[test]
    fn foreign_ids_are_rejected_by_get() {
        let mut builder = TreeBuilder::<u32, u32>::new(1);
        let only = builder.state("Only").unwrap();
        let tree = builder.build().unwrap();
        let foreign = StateId::new(7);

        assert_eq!(tree.get(only).map(|s| s.name()), Some("Only"));
        assert!(tree.get(foreign).is_none());
    }

    #[test]
    #[should_panic]
    fn name_of_foreign_id_panics() {
        let mut builder = TreeBuilder::<u32, u32>::new(1);
        builder.state("Only").unwrap();
        let tree = builder.build().unwrap();

        tree.name(StateId::new(7));
    }
}
