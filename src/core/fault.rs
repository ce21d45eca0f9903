//! Faults captured while running guards, actions and state hooks.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;

/// A fault raised by user code during a dispatch or a scheduled invocation.
///
/// Faults are values: they are captured per invocation, cloned to every
/// interested party (an awaiting caller, fault listeners, the transition log)
/// and never unwind through a worker thread.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum Fault {
    /// An action or task returned an error.
    #[error("Action failed: {0}")]
    Action(String),

    /// User code panicked; the panic was caught at the invocation boundary.
    #[error("Panicked: {0}")]
    Panicked(String),
}

impl Fault {
    /// Shorthand for `Fault::Action`.
    pub fn action(message: impl Into<String>) -> Self {
        Fault::Action(message.into())
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Fault::Panicked(message)
    }
}

/// Run `f`, turning a panic into a [`Fault::Panicked`].
pub(crate) fn catch<T>(f: impl FnOnce() -> T) -> Result<T, Fault> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(Fault::from_panic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catch_passes_through_values() {
        assert_eq!(catch(|| 41 + 1), Ok(42));
    }

    #[test]
    fn catch_converts_str_panics() {
        let result: Result<(), Fault> = catch(|| panic!("lamp burnt out"));
        assert_eq!(result, Err(Fault::Panicked("lamp burnt out".to_string())));
    }

    #[test]
    fn catch_converts_formatted_panics() {
        let bulb = 3;
        let result: Result<(), Fault> = catch(|| panic!("bulb {bulb} failed"));
        assert_eq!(result, Err(Fault::Panicked("bulb 3 failed".to_string())));
    }

    #[test]
    fn fault_display_includes_message() {
        assert_eq!(Fault::action("no power").to_string(), "Action failed: no power");
    }
}
