//! Scheduler error types.

use thiserror::Error;

/// Errors returned when scheduling work.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("Scheduler is disposed")]
    Disposed,

    #[error("Repeat count must be at least 1")]
    ZeroCount,

    #[error("Failed to spawn scheduler thread: {0}")]
    Spawn(String),
}
