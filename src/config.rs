//! Runtime configuration.
//!
//! Every field has a default, so a partial JSON document (or `{}`) is a
//! valid configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of dispatch records a machine retains.
pub const DEFAULT_RECORD_CAPACITY: usize = 64;

/// Default scheduler polling interval in milliseconds.
pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 10;

/// Configuration of a [`DelegateQueue`](crate::runtime::DelegateQueue).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Name given to the worker thread
    #[serde(default = "default_queue_name")]
    pub name: String,
}

/// Configuration of a [`Scheduler`](crate::scheduler::Scheduler).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the polling clock checks for due tasks
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,

    /// Name given to the polling thread; task workers get a numbered suffix
    #[serde(default = "default_scheduler_name")]
    pub name: String,
}

/// Configuration of a [`StateMachine`](crate::runtime::StateMachine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Number of recent dispatches kept in the transition log
    #[serde(default = "default_record_capacity")]
    pub record_capacity: usize,

    /// Configuration of the machine's private queue
    #[serde(default)]
    pub queue: QueueConfig,
}

fn default_queue_name() -> String {
    "hierarch-queue".to_string()
}

fn default_polling_interval_ms() -> u64 {
    DEFAULT_POLLING_INTERVAL_MS
}

fn default_scheduler_name() -> String {
    "hierarch-scheduler".to_string()
}

fn default_record_capacity() -> usize {
    DEFAULT_RECORD_CAPACITY
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: default_queue_name(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            polling_interval_ms: default_polling_interval_ms(),
            name: default_scheduler_name(),
        }
    }
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            record_capacity: default_record_capacity(),
            queue: QueueConfig::default(),
        }
    }
}

impl QueueConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl SchedulerConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }
}

impl MachineConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
