//! Tabular machine definitions and their compilation into a state tree.
//!
//! A [`MachineDefinition`] is the plain-data description of a machine: state
//! rows with substates, initial states, history types and transition rows
//! that name their guards, actions and hooks. It is usually produced once,
//! offline, and loaded with serde. [`compile`] resolves the names against a
//! [`HandlerRegistry`] and builds the tree, reporting every problem in the
//! definition at once.
//!
//! # Example
//!
//! ```rust
//! use hierarch::builder::{compile, HandlerRegistry, MachineDefinition, StateRow, TransitionRow};
//! use hierarch::core::HistoryType;
//!
//! let definition = MachineDefinition::new("Off")
//!     .state(StateRow::new("Off").transition(TransitionRow::new("turn_on").target("On")))
//!     .state(
//!         StateRow::new("On")
//!             .substates(["Red", "Green"])
//!             .initial("Red")
//!             .history(HistoryType::Shallow)
//!             .transition(TransitionRow::new("turn_off").target("Off")),
//!     )
//!     .state(StateRow::new("Red").transition(TransitionRow::new("timer").target("Green")))
//!     .state(StateRow::new("Green").transition(TransitionRow::new("timer").target("Red")));
//!
//! let compiled = compile::<(), ()>(&definition, &HandlerRegistry::new()).unwrap();
//! assert_eq!(compiled.events.names(), &["turn_on", "turn_off", "timer"]);
//! assert_eq!(compiled.tree.name(compiled.initial), "Off");
//! ```

use crate::builder::error::{BuildError, BuildErrors, HandlerKind};
use crate::builder::transition::TransitionBuilder;
use crate::builder::tree::TreeBuilder;
use crate::core::{ActionResult, EventId, HistoryType, StateId, StateTree};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;
use tracing::debug;

type Check = Validation<(), NonEmptyVec<BuildError>>;

type GuardFn<A> = Arc<dyn Fn(&A) -> bool + Send + Sync>;
type ActionFn<A, R> = Arc<dyn Fn(&A) -> ActionResult<R> + Send + Sync>;
type HookFn = Arc<dyn Fn() + Send + Sync>;

/// Declarative description of a machine.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineDefinition {
    /// Top-level state the machine is initialized into
    pub initial: String,
    /// Every state of the machine, in declaration order
    #[serde(default)]
    pub states: Vec<StateRow>,
}

/// One state of a [`MachineDefinition`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRow {
    pub name: String,
    /// Name of the entry hook in the handler registry
    pub entry: Option<String>,
    /// Name of the exit hook in the handler registry
    pub exit: Option<String>,
    #[serde(default)]
    pub history: HistoryType,
    /// Direct child entered when the state has no history
    pub initial: Option<String>,
    #[serde(default)]
    pub substates: Vec<String>,
    #[serde(default)]
    pub transitions: Vec<TransitionRow>,
}

/// One transition of a [`StateRow`], tried in declaration order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRow {
    pub event: String,
    pub guard: Option<String>,
    pub action: Option<String>,
    /// Destination state; internal transition when absent
    pub target: Option<String>,
}

impl MachineDefinition {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            initial: initial.into(),
            states: Vec::new(),
        }
    }

    pub fn state(mut self, row: StateRow) -> Self {
        self.states.push(row);
        self
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Event names in order of first appearance.
    pub fn events(&self) -> EventTable {
        let mut names: Vec<String> = Vec::new();
        for row in &self.states {
            for transition in &row.transitions {
                if !names.contains(&transition.event) {
                    names.push(transition.event.clone());
                }
            }
        }
        EventTable { names }
    }
}

impl StateRow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn entry(mut self, hook: impl Into<String>) -> Self {
        self.entry = Some(hook.into());
        self
    }

    pub fn exit(mut self, hook: impl Into<String>) -> Self {
        self.exit = Some(hook.into());
        self
    }

    pub fn history(mut self, history: HistoryType) -> Self {
        self.history = history;
        self
    }

    pub fn initial(mut self, state: impl Into<String>) -> Self {
        self.initial = Some(state.into());
        self
    }

    pub fn substates<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.substates.extend(states.into_iter().map(Into::into));
        self
    }

    pub fn transition(mut self, row: TransitionRow) -> Self {
        self.transitions.push(row);
        self
    }
}

impl TransitionRow {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            ..Self::default()
        }
    }

    pub fn guard(mut self, name: impl Into<String>) -> Self {
        self.guard = Some(name.into());
        self
    }

    pub fn action(mut self, name: impl Into<String>) -> Self {
        self.action = Some(name.into());
        self
    }

    pub fn target(mut self, state: impl Into<String>) -> Self {
        self.target = Some(state.into());
        self
    }
}

/// Mapping between event names and the [`EventId`]s they compile to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTable {
    names: Vec<String>,
}

impl EventTable {
    pub fn id(&self, name: &str) -> Option<EventId> {
        self.names.iter().position(|n| n == name).map(EventId::new)
    }

    pub fn name(&self, event: EventId) -> Option<&str> {
        self.names.get(event.index()).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Named guards, actions and state hooks a definition can refer to.
///
/// Entry and exit hooks share one namespace.
pub struct HandlerRegistry<A, R> {
    guards: HashMap<String, GuardFn<A>>,
    actions: HashMap<String, ActionFn<A, R>>,
    hooks: HashMap<String, HookFn>,
}

impl<A, R> HandlerRegistry<A, R> {
    pub fn new() -> Self {
        Self {
            guards: HashMap::new(),
            actions: HashMap::new(),
            hooks: HashMap::new(),
        }
    }

    pub fn guard<F>(mut self, name: impl Into<String>, guard: F) -> Self
    where
        F: Fn(&A) -> bool + Send + Sync + 'static,
    {
        self.guards.insert(name.into(), Arc::new(guard));
        self
    }

    pub fn action<F>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(&A) -> ActionResult<R> + Send + Sync + 'static,
    {
        self.actions.insert(name.into(), Arc::new(action));
        self
    }

    pub fn hook<F>(mut self, name: impl Into<String>, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks.insert(name.into(), Arc::new(hook));
        self
    }

    fn has(&self, kind: HandlerKind, name: &str) -> bool {
        match kind {
            HandlerKind::Guard => self.guards.contains_key(name),
            HandlerKind::Action => self.actions.contains_key(name),
            HandlerKind::Entry | HandlerKind::Exit => self.hooks.contains_key(name),
        }
    }
}

impl<A, R> Default for HandlerRegistry<A, R> {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of compiling a [`MachineDefinition`].
#[derive(Debug)]
pub struct CompiledDefinition<A, R> {
    pub tree: StateTree<A, R>,
    /// The definition's top-level initial state
    pub initial: StateId,
    pub events: EventTable,
}

/// Validate `definition` and build its state tree.
///
/// Every problem in the definition is reported, not just the first one.
pub fn compile<A, R>(
    definition: &MachineDefinition,
    registry: &HandlerRegistry<A, R>,
) -> Result<CompiledDefinition<A, R>, BuildErrors>
where
    A: 'static,
    R: 'static,
{
    if let Validation::Failure(errors) = validate(definition, registry) {
        return Err(BuildErrors::new(errors.iter().cloned().collect()));
    }

    let events = definition.events();
    let mut builder = TreeBuilder::new(events.len());
    let mut ids: HashMap<&str, StateId> = HashMap::new();

    for row in &definition.states {
        let id = builder.state(row.name.as_str())?;
        ids.insert(row.name.as_str(), id);
        builder.history(id, row.history);
        if let Some(name) = &row.entry {
            if let Some(hook) = registry.hooks.get(name) {
                let hook = Arc::clone(hook);
                builder.entry(id, move || hook());
            }
        }
        if let Some(name) = &row.exit {
            if let Some(hook) = registry.hooks.get(name) {
                let hook = Arc::clone(hook);
                builder.exit(id, move || hook());
            }
        }
    }

    for row in &definition.states {
        let id = resolve(&ids, &row.name, || BuildError::DuplicateState(row.name.clone()))?;
        for substate in &row.substates {
            let child = resolve(&ids, substate, || BuildError::UnknownSubstate {
                state: row.name.clone(),
                substate: substate.clone(),
            })?;
            builder.substate(id, child)?;
        }
    }

    for row in &definition.states {
        let id = resolve(&ids, &row.name, || BuildError::DuplicateState(row.name.clone()))?;
        if let Some(initial) = &row.initial {
            let child = resolve(&ids, initial, || BuildError::InitialNotSubstate {
                state: row.name.clone(),
                initial: initial.clone(),
            })?;
            builder.initial(id, child)?;
        }

        for transition in &row.transitions {
            let event = events.id(&transition.event).ok_or_else(|| {
                BuildError::EmptyEventName {
                    state: row.name.clone(),
                }
            })?;
            let compiled = transition_from_row(row, transition, registry, &ids)?;
            builder.transition(id, event, compiled)?;
        }
    }

    let initial = resolve(&ids, &definition.initial, || {
        BuildError::InvalidTopInitial(definition.initial.clone())
    })?;
    let tree = builder.build()?;
    debug!(
        states = tree.len(),
        events = events.len(),
        initial = %definition.initial,
        "compiled machine definition"
    );

    Ok(CompiledDefinition {
        tree,
        initial,
        events,
    })
}

fn resolve(
    ids: &HashMap<&str, StateId>,
    name: &str,
    error: impl FnOnce() -> BuildError,
) -> Result<StateId, BuildError> {
    ids.get(name).copied().ok_or_else(error)
}

fn transition_from_row<A, R>(
    row: &StateRow,
    transition: &TransitionRow,
    registry: &HandlerRegistry<A, R>,
    ids: &HashMap<&str, StateId>,
) -> Result<TransitionBuilder<A, R>, BuildError>
where
    A: 'static,
    R: 'static,
{
    let mut builder = TransitionBuilder::new();

    if let Some(name) = &transition.guard {
        let guard = registry
            .guards
            .get(name)
            .cloned()
            .ok_or_else(|| unknown_handler(row, HandlerKind::Guard, name))?;
        builder = builder.guard(move |args: &A| guard(args));
    }
    if let Some(name) = &transition.action {
        let action = registry
            .actions
            .get(name)
            .cloned()
            .ok_or_else(|| unknown_handler(row, HandlerKind::Action, name))?;
        builder = builder.action(move |args: &A| action(args));
    }
    if let Some(target) = &transition.target {
        let id = resolve(ids, target, || BuildError::UnknownTarget {
            state: row.name.clone(),
            target: target.clone(),
        })?;
        builder = builder.target(id);
    }

    Ok(builder)
}

fn unknown_handler(row: &StateRow, kind: HandlerKind, name: &str) -> BuildError {
    BuildError::UnknownHandler {
        state: row.name.clone(),
        kind,
        name: name.to_string(),
    }
}

fn check(ok: bool, error: impl FnOnce() -> BuildError) -> Check {
    if ok {
        Validation::success(())
    } else {
        Validation::fail(error())
    }
}

/// Collect every problem in `definition` without building anything.
fn validate<A, R>(definition: &MachineDefinition, registry: &HandlerRegistry<A, R>) -> Check {
    let mut checks: Vec<Check> = Vec::new();

    let mut seen: HashSet<&str> = HashSet::new();
    for row in &definition.states {
        checks.push(check(!row.name.trim().is_empty(), || {
            BuildError::EmptyStateName
        }));
        checks.push(check(row.name.trim().is_empty() || seen.insert(row.name.as_str()), || {
            BuildError::DuplicateState(row.name.clone())
        }));
    }

    let contained: HashSet<&str> = definition
        .states
        .iter()
        .flat_map(|row| row.substates.iter().map(String::as_str))
        .collect();

    checks.push(if definition.initial.trim().is_empty() {
        Validation::fail(BuildError::MissingTopInitial)
    } else {
        check(
            seen.contains(definition.initial.as_str())
                && !contained.contains(definition.initial.as_str()),
            || BuildError::InvalidTopInitial(definition.initial.clone()),
        )
    });

    for row in &definition.states {
        for substate in &row.substates {
            checks.push(check(seen.contains(substate.as_str()), || {
                BuildError::UnknownSubstate {
                    state: row.name.clone(),
                    substate: substate.clone(),
                }
            }));
        }

        checks.push(match &row.initial {
            Some(initial) => check(row.substates.contains(initial), || {
                BuildError::InitialNotSubstate {
                    state: row.name.clone(),
                    initial: initial.clone(),
                }
            }),
            None => check(row.substates.is_empty(), || {
                BuildError::MissingInitialState(row.name.clone())
            }),
        });

        for (kind, hook) in [(HandlerKind::Entry, &row.entry), (HandlerKind::Exit, &row.exit)] {
            if let Some(name) = hook {
                checks.push(check(registry.has(kind, name), || {
                    unknown_handler(row, kind, name)
                }));
            }
        }

        for transition in &row.transitions {
            checks.push(check(!transition.event.trim().is_empty(), || {
                BuildError::EmptyEventName {
                    state: row.name.clone(),
                }
            }));
            if let Some(target) = &transition.target {
                checks.push(check(seen.contains(target.as_str()), || {
                    BuildError::UnknownTarget {
                        state: row.name.clone(),
                        target: target.clone(),
                    }
                }));
            }
            for (kind, handler) in [
                (HandlerKind::Guard, &transition.guard),
                (HandlerKind::Action, &transition.action),
            ] {
                if let Some(name) = handler {
                    checks.push(check(registry.has(kind, name), || {
                        unknown_handler(row, kind, name)
                    }));
                }
            }
        }
    }

    Validation::all_vec(checks).map(|_| ())
}
