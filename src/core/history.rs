//! Bounded log of dispatched events.
//!
//! Every dispatch, whether it fired a transition or was dropped, leaves a
//! [`TransitionRecord`]. The machine keeps the most recent ones in a
//! [`TransitionLog`] for inspection and snapshots.

use super::fault::Fault;
use super::state::{EventId, StateId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Record of a single dispatch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// Active state before the dispatch
    pub from: StateId,
    /// Active state after the dispatch
    pub to: StateId,
    /// The dispatched event
    pub event: EventId,
    /// Whether a transition fired (internal transitions included)
    pub fired: bool,
    /// Fault captured during the dispatch, if any
    pub fault: Option<Fault>,
    /// When the dispatch completed
    pub timestamp: DateTime<Utc>,
}

/// Most recent dispatch records, oldest first.
///
/// Once `capacity` records are held, recording a new one evicts the oldest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransitionLog {
    records: VecDeque<TransitionRecord>,
    capacity: usize,
}

impl Default for TransitionLog {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_RECORD_CAPACITY)
    }
}

impl TransitionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a record, evicting the oldest one when full.
    pub fn record(&mut self, record: TransitionRecord) {
        if self.capacity == 0 {
            return;
        }
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn records(&self) -> impl Iterator<Item = &TransitionRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// States visited by fired transitions: the first record's source, then
    /// the resulting state of each fired transition.
    pub fn states(&self) -> Vec<StateId> {
        let mut fired = self.records.iter().filter(|r| r.fired).peekable();
        let mut path = Vec::new();
        if let Some(first) = fired.peek() {
            path.push(first.from);
        }
        path.extend(fired.map(|r| r.to));
        path
    }

    /// Time between the oldest and the newest retained record.
    pub fn duration(&self) -> Option<Duration> {
        let first = self.records.front()?;
        let last = self.records.back()?;
        last.timestamp
            .signed_duration_since(first.timestamp)
            .to_std()
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(from: usize, to: usize, fired: bool) -> TransitionRecord {
        TransitionRecord {
            from: StateId::new(from),
            to: StateId::new(to),
            event: EventId::new(0),
            fired,
            fault: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn new_log_is_empty() {
        let log = TransitionLog::new(4);
        assert!(log.is_empty());
        assert!(log.states().is_empty());
        assert!(log.duration().is_none());
    }

    #[test]
    fn record_evicts_oldest_when_full() {
        let mut log = TransitionLog::new(2);
        log.record(record(0, 1, true));
        log.record(record(1, 2, true));
        log.record(record(2, 0, true));

        assert_eq!(log.len(), 2);
        assert_eq!(log.records().next().unwrap().from, StateId::new(1));
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut log = TransitionLog::new(0);
        log.record(record(0, 1, true));
        assert!(log.is_empty());
    }

    #[test]
    fn states_skip_dropped_events() {
        let mut log = TransitionLog::new(8);
        log.record(record(0, 1, true));
        log.record(record(1, 1, false));
        log.record(record(1, 2, true));

        assert_eq!(
            log.states(),
            vec![StateId::new(0), StateId::new(1), StateId::new(2)]
        );
    }

    #[test]
    fn duration_calculates_elapsed_time() {
        let mut log = TransitionLog::new(8);
        log.record(record(0, 1, true));
        std::thread::sleep(Duration::from_millis(10));
        log.record(record(1, 2, true));

        assert!(log.duration().unwrap() >= Duration::from_millis(10));
    }

    #[test]
    fn log_serializes_correctly() {
        let mut log = TransitionLog::new(8);
        let mut faulted = record(0, 1, true);
        faulted.fault = Some(Fault::action("boom"));
        log.record(faulted);

        let json = serde_json::to_string(&log).unwrap();
        let deserialized: TransitionLog = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.len(), 1);
        assert_eq!(
            deserialized.records().next().unwrap().fault,
            Some(Fault::action("boom"))
        );
    }
}
