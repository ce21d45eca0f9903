//! Guard predicates for controlling transitions.
//!
//! Guards are pure boolean functions over an event's payload that decide
//! whether a transition may fire. They must not have side effects: a guard
//! may be evaluated and rejected without any trace in the machine.

/// Pure predicate that determines if a transition can fire for a payload.
///
/// # Example
///
/// ```rust
/// use hierarch::core::Guard;
///
/// struct Tick {
///     count: u32,
/// }
///
/// let every_fourth = Guard::new(|tick: &Tick| tick.count % 4 == 0);
///
/// assert!(every_fourth.check(&Tick { count: 8 }));
/// assert!(!every_fourth.check(&Tick { count: 3 }));
/// ```
pub struct Guard<A> {
    predicate: Box<dyn Fn(&A) -> bool + Send + Sync>,
}

impl<A> Guard<A> {
    /// Create a guard from a pure predicate function.
    ///
    /// The predicate must be deterministic and thread-safe (Send + Sync).
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&A) -> bool + Send + Sync + 'static,
    {
        Guard {
            predicate: Box::new(predicate),
        }
    }

    /// Evaluate the predicate against an event payload.
    pub fn check(&self, args: &A) -> bool {
        (self.predicate)(args)
    }
}

impl<A> std::fmt::Debug for Guard<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Guard")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn guard_allows_matching_payloads() {
        let guard = Guard::new(|n: &i32| *n > 0);

        assert!(guard.check(&1));
        assert!(!guard.check(&0));
        assert!(!guard.check(&-4));
    }

    #[test]
    fn guard_is_deterministic() {
        let guard = Guard::new(|s: &String| s.starts_with("go"));

        let first = guard.check(&"go left".to_string());
        let second = guard.check(&"go left".to_string());

        assert_eq!(first, second);
    }

    #[test]
    fn guard_can_read_shared_state() {
        let counter = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&counter);
        let guard = Guard::new(move |_: &()| observed.load(Ordering::SeqCst) == 2);

        assert!(!guard.check(&()));
        counter.store(2, Ordering::SeqCst);
        assert!(guard.check(&()));
    }

    #[test]
    fn guard_can_use_complex_predicates() {
        let guard = Guard::new(|pair: &(u8, u8)| matches!(pair, (0, _) | (_, 0)));

        assert!(guard.check(&(0, 3)));
        assert!(guard.check(&(7, 0)));
        assert!(!guard.check(&(1, 1)));
    }
}
