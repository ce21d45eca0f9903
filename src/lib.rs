//! Hierarch: hierarchical state machines with queued dispatch
//!
//! A machine is a tree of states. Events are resolved against the active
//! leaf and bubble towards the root until a state with a matching, enabled
//! transition is found. Firing a transition exits up to the least common
//! ancestor of source and target, runs the action, and enters down to the
//! target, resuming composite states by their history policy.
//!
//! # Core Concepts
//!
//! - **Tree**: an immutable arena of [`State`]s built with
//!   [`TreeBuilder`](builder::TreeBuilder) or compiled from a
//!   [`MachineDefinition`](builder::MachineDefinition)
//! - **Machine**: a [`StateMachine`] owns the active state and dispatches every
//!   event on a single worker thread, its own or one shared with other machines
//! - **Handles**: every send returns a [`Handle`] that can be dropped, waited
//!   on, or awaited as a future
//! - **Scheduler**: a [`Scheduler`] feeds delayed and repeating work, such as
//!   timer events, into a machine's queue
//!
//! # Example
//!
//! ```rust
//! use hierarch::builder::{compile, HandlerRegistry, MachineDefinition, StateRow, TransitionRow};
//! use hierarch::config::MachineConfig;
//! use hierarch::core::HistoryType;
//! use hierarch::StateMachine;
//!
//! let definition = MachineDefinition::new("Off")
//!     .state(StateRow::new("Off").transition(TransitionRow::new("turn_on").target("On")))
//!     .state(
//!         StateRow::new("On")
//!             .substates(["Red", "Green", "Yellow"])
//!             .initial("Red")
//!             .history(HistoryType::Shallow)
//!             .transition(TransitionRow::new("turn_off").target("Off")),
//!     )
//!     .state(StateRow::new("Red").transition(TransitionRow::new("timer").target("Green")))
//!     .state(StateRow::new("Green").transition(TransitionRow::new("timer").target("Yellow")))
//!     .state(StateRow::new("Yellow").transition(TransitionRow::new("timer").target("Red")));
//!
//! let compiled = compile::<(), ()>(&definition, &HandlerRegistry::new()).unwrap();
//! let turn_on = compiled.events.id("turn_on").unwrap();
//! let turn_off = compiled.events.id("turn_off").unwrap();
//! let timer = compiled.events.id("timer").unwrap();
//!
//! let machine = StateMachine::new(compiled.tree, MachineConfig::default()).unwrap();
//! machine.initialize(compiled.initial).unwrap();
//!
//! for event in [turn_on, timer, turn_off, turn_on] {
//!     machine.send_blocking(event, ()).unwrap();
//! }
//! assert_eq!(machine.current_state_name().as_deref(), Some("Green"));
//! ```

pub mod builder;
pub mod config;
pub mod core;
pub mod runtime;
pub mod scheduler;
pub mod snapshot;

// Re-export commonly used types
pub use core::{EventId, Fault, Guard, HistoryType, State, StateId, StateTree};
pub use runtime::{DelegateQueue, Handle, StateMachine};
pub use scheduler::{Repeat, Scheduler};
pub use snapshot::MachineSnapshot;
