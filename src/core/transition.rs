//! Transitions and the exit/entry unwinding algorithm.
//!
//! Firing a transition is split in two: [`Transition::plan`] is a pure
//! computation of which states to exit and which to enter, and
//! [`Transition::fire`] executes that plan against the tree (exit hooks,
//! the action, entry hooks, history resolution).

use super::fault::{catch, Fault};
use super::guard::Guard;
use super::state::StateId;
use super::tree::{Histories, StateTree};
use std::fmt;

/// Outcome of a transition action: an optional result value or a fault.
pub type ActionResult<R> = Result<Option<R>, Fault>;

/// Side effect run while a transition fires.
pub type Action<A, R> = Box<dyn Fn(&A) -> ActionResult<R> + Send + Sync>;

/// An edge of the state tree, keyed by event in its source state's table.
///
/// A transition without a target is internal: only its action runs, no state
/// is exited or entered and the active state does not change.
pub struct Transition<A, R> {
    pub(crate) guard: Option<Guard<A>>,
    pub(crate) action: Option<Action<A, R>>,
    pub(crate) target: Option<StateId>,
}

/// States to exit (bottom-up, in order) and to enter (top-down) when a
/// transition fires. The last entry is the target, which is entered by its
/// history; every other entry is entered plainly.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnwindPlan {
    pub exits: Vec<StateId>,
    pub entries: Vec<StateId>,
}

impl<A, R> Transition<A, R> {
    pub fn target(&self) -> Option<StateId> {
        self.target
    }

    pub fn is_internal(&self) -> bool {
        self.target.is_none()
    }

    pub fn has_guard(&self) -> bool {
        self.guard.is_some()
    }

    pub fn has_action(&self) -> bool {
        self.action.is_some()
    }

    /// Evaluate the guard; a transition without a guard always fires.
    pub(crate) fn should_fire(&self, args: &A) -> Result<bool, Fault> {
        match &self.guard {
            Some(guard) => catch(|| guard.check(args)),
            None => Ok(true),
        }
    }

    /// Compute the exit and entry sequences for this transition.
    ///
    /// `source` is the state that received the event and `handler` the state
    /// (source or one of its ancestors) whose table matched.
    pub fn plan(&self, tree: &StateTree<A, R>, source: StateId, handler: StateId) -> UnwindPlan {
        let mut plan = UnwindPlan::default();
        let Some(target) = self.target else {
            return plan;
        };

        // Entries are collected deepest first and reversed at the end.
        let mut entries = Vec::new();
        let target_found = unwind_to_handler(tree, source, handler, target, &mut plan.exits, &mut entries);

        if !target_found {
            let target_level = tree.level(target);
            let handler_level = tree.level(handler);

            if target_level == handler_level {
                // Covers self-transitions as well.
                plan.exits.push(handler);
                entries.push(target);
            } else if target_level > handler_level {
                let mut t = target;
                while tree.level(t) > handler_level {
                    entries.push(t);
                    match tree.superstate(t) {
                        Some(parent) => t = parent,
                        None => break,
                    }
                }
                unwind_to_common_ancestor(tree, handler, t, &mut plan.exits, &mut entries);
            } else {
                let mut h = handler;
                while tree.level(h) > target_level {
                    plan.exits.push(h);
                    match tree.superstate(h) {
                        Some(parent) => h = parent,
                        None => break,
                    }
                }

                if h == target {
                    // The handler lives inside the target: leave and re-enter it.
                    plan.exits.push(target);
                    entries.push(target);
                } else {
                    unwind_to_common_ancestor(tree, h, target, &mut plan.exits, &mut entries);
                }
            }
        }

        entries.reverse();
        plan.entries = entries;
        plan
    }

    /// Fire the transition, returning the new active state and the action's
    /// outcome.
    ///
    /// A failing action does not stop the transition: the exits have already
    /// happened and the entries still run, so the state change commits and
    /// the fault travels with the outcome.
    pub(crate) fn fire(
        &self,
        tree: &StateTree<A, R>,
        histories: &mut Histories,
        source: StateId,
        handler: StateId,
        args: &A,
    ) -> (StateId, ActionResult<R>) {
        let plan = self.plan(tree, source, handler);

        for &state in &plan.exits {
            tree.exit_state(histories, state);
        }

        let outcome = match &self.action {
            Some(action) => catch(|| action(args)).and_then(|result| result),
            None => Ok(None),
        };

        let next = match plan.entries.split_last() {
            Some((&target, ancestors)) => {
                for &state in ancestors {
                    tree.state(state).run_entry();
                }
                tree.enter_by_history(histories, target)
            }
            None => source,
        };

        (next, outcome)
    }
}

impl<A, R> fmt::Debug for Transition<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("guard", &self.guard.is_some())
            .field("action", &self.action.is_some())
            .field("target", &self.target)
            .finish()
    }
}

/// Walk from `source` up to (not including) `handler`, queueing exits.
///
/// If `target` lies on that path it and every state above it on the path
/// are queued for re-entry. Returns whether the target was found.
fn unwind_to_handler<A, R>(
    tree: &StateTree<A, R>,
    source: StateId,
    handler: StateId,
    target: StateId,
    exits: &mut Vec<StateId>,
    entries: &mut Vec<StateId>,
) -> bool {
    let mut found = false;
    let mut s = source;

    while s != handler {
        exits.push(s);
        if s == target {
            found = true;
        }
        if found {
            entries.push(s);
        }
        match tree.superstate(s) {
            Some(parent) => s = parent,
            None => break,
        }
    }

    found
}

/// Ascend two same-level states in lockstep until they meet.
///
/// Top-level states have no common ancestor; both walks then run off the top
/// of the tree together.
fn unwind_to_common_ancestor<A, R>(
    tree: &StateTree<A, R>,
    exiting: StateId,
    entering: StateId,
    exits: &mut Vec<StateId>,
    entries: &mut Vec<StateId>,
) {
    let mut a = Some(exiting);
    let mut b = Some(entering);

    while a != b {
        if let Some(state) = a {
            exits.push(state);
            a = tree.superstate(state);
        }
        if let Some(state) = b {
            entries.push(state);
            b = tree.superstate(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{TransitionBuilder, TreeBuilder};

    // Top ─┬─ A ─┬─ A1
    //      │     └─ A2 ── A2a
    //      └─ B ─── B1
    // Other
    struct Fixture {
        tree: StateTree<(), ()>,
        top: StateId,
        a: StateId,
        a1: StateId,
        a2: StateId,
        a2a: StateId,
        b: StateId,
        b1: StateId,
        other: StateId,
    }

    fn fixture() -> Fixture {
        let mut builder = TreeBuilder::<(), ()>::new(1);
        let top = builder.state("Top").unwrap();
        let a = builder.state("A").unwrap();
        let a1 = builder.state("A1").unwrap();
        let a2 = builder.state("A2").unwrap();
        let a2a = builder.state("A2a").unwrap();
        let b = builder.state("B").unwrap();
        let b1 = builder.state("B1").unwrap();
        let other = builder.state("Other").unwrap();

        builder.substate(top, a).unwrap();
        builder.substate(top, b).unwrap();
        builder.substate(a, a1).unwrap();
        builder.substate(a, a2).unwrap();
        builder.substate(a2, a2a).unwrap();
        builder.substate(b, b1).unwrap();
        builder.initial(top, a).unwrap();
        builder.initial(a, a1).unwrap();
        builder.initial(a2, a2a).unwrap();
        builder.initial(b, b1).unwrap();

        Fixture {
            tree: builder.build().unwrap(),
            top,
            a,
            a1,
            a2,
            a2a,
            b,
            b1,
            other,
        }
    }

    fn to(target: StateId) -> Transition<(), ()> {
        TransitionBuilder::new().target(target).build()
    }

    #[test]
    fn internal_transition_plans_nothing() {
        let f = fixture();
        let internal: Transition<(), ()> = TransitionBuilder::new().build();

        assert!(internal.is_internal());
        assert_eq!(internal.plan(&f.tree, f.a1, f.a1), UnwindPlan::default());
    }

    #[test]
    fn sibling_transition_exits_handler_and_enters_target() {
        let f = fixture();
        let plan = to(f.a2).plan(&f.tree, f.a1, f.a1);

        assert_eq!(plan.exits, vec![f.a1]);
        assert_eq!(plan.entries, vec![f.a2]);
    }

    #[test]
    fn self_transition_exits_and_reenters() {
        let f = fixture();
        let plan = to(f.a1).plan(&f.tree, f.a1, f.a1);

        assert_eq!(plan.exits, vec![f.a1]);
        assert_eq!(plan.entries, vec![f.a1]);
    }

    #[test]
    fn transition_handled_by_ancestor_exits_from_source() {
        let f = fixture();
        // A handles the event while A2a is active and targets B.
        let plan = to(f.b).plan(&f.tree, f.a2a, f.a);

        assert_eq!(plan.exits, vec![f.a2a, f.a2, f.a]);
        assert_eq!(plan.entries, vec![f.b]);
    }

    #[test]
    fn deeper_target_below_handler_keeps_handler_active() {
        let f = fixture();
        // A handles the event while A1 is active and targets A2a.
        let plan = to(f.a2a).plan(&f.tree, f.a1, f.a);

        assert_eq!(plan.exits, vec![f.a1]);
        assert_eq!(plan.entries, vec![f.a2, f.a2a]);
    }

    #[test]
    fn shallower_unrelated_target_climbs_to_common_ancestor() {
        let f = fixture();
        let plan = to(f.b).plan(&f.tree, f.a2a, f.a2a);

        assert_eq!(plan.exits, vec![f.a2a, f.a2, f.a]);
        assert_eq!(plan.entries, vec![f.b]);
    }

    #[test]
    fn ascent_landing_on_target_exits_and_reenters_it() {
        let f = fixture();
        let plan = to(f.a).plan(&f.tree, f.a2a, f.a2a);

        assert_eq!(plan.exits, vec![f.a2a, f.a2, f.a]);
        assert_eq!(plan.entries, vec![f.a]);
    }

    #[test]
    fn target_on_path_to_handler_is_reentered_without_leaving_handler() {
        let f = fixture();
        // Top handles the event while A2a is active and targets A2.
        let plan = to(f.a2).plan(&f.tree, f.a2a, f.top);

        assert_eq!(plan.exits, vec![f.a2a, f.a2, f.a]);
        assert_eq!(plan.entries, vec![f.a, f.a2]);
    }

    #[test]
    fn top_level_states_have_no_common_ancestor() {
        let f = fixture();
        let plan = to(f.other).plan(&f.tree, f.a1, f.a1);

        assert_eq!(plan.exits, vec![f.a1, f.a, f.top]);
        assert_eq!(plan.entries, vec![f.other]);
    }

    #[test]
    fn cousins_at_equal_depth_exit_handler_and_enter_target() {
        let f = fixture();
        let plan = to(f.b1).plan(&f.tree, f.a1, f.a1);

        assert_eq!(plan.exits, vec![f.a1]);
        assert_eq!(plan.entries, vec![f.b1]);
    }
}
