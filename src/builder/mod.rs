//! Builder API for state tree construction.
//!
//! Trees can be built imperatively with [`TreeBuilder`] and
//! [`TransitionBuilder`], or compiled from a declarative
//! [`MachineDefinition`] whose guards, actions and hooks are looked up by
//! name in a [`HandlerRegistry`].

pub mod definition;
pub mod error;
pub mod macros;
pub mod transition;
pub mod tree;

pub use definition::{
    compile, CompiledDefinition, EventTable, HandlerRegistry, MachineDefinition, StateRow,
    TransitionRow,
};
pub use error::{BuildError, BuildErrors, HandlerKind};
pub use transition::TransitionBuilder;
pub use tree::TreeBuilder;
