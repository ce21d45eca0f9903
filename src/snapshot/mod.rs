//! Point-in-time snapshots of a running state machine.
//!
//! A snapshot captures what a machine looks like from the outside: the
//! active state and its path, the remembered child of every composite state
//! and the recent dispatch log. Snapshots are plain data and can be written
//! as JSON for inspection or as compact bincode for storage.

use crate::core::{StateId, TransitionLog};
use crate::runtime::MachineId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod error;

pub use error::SnapshotError;

/// Version identifier for the snapshot format
pub const SNAPSHOT_VERSION: u32 = 1;

/// A composite state and the child it will resume into.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub state: String,
    pub last_active: String,
}

/// Serializable view of a machine at one point in time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MachineSnapshot {
    /// Snapshot format version
    pub version: u32,

    pub machine: MachineId,

    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,

    /// Active leaf state, if the machine has been initialized
    pub current: Option<StateId>,

    /// Names of the active states from the top of the tree down
    pub active_path: Vec<String>,

    /// Remembered child of every composite state
    pub history: Vec<HistoryEntry>,

    /// Recent dispatches, oldest first
    pub records: TransitionLog,
}

impl MachineSnapshot {
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        serde_json::to_string_pretty(self).map_err(|e| SnapshotError::SerializationFailed(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        let snapshot: Self = serde_json::from_str(json)
            .map_err(|e| SnapshotError::DeserializationFailed(e.to_string()))?;
        snapshot.check_version()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        bincode::serialize(self).map_err(|e| SnapshotError::SerializationFailed(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let snapshot: Self = bincode::deserialize(bytes)
            .map_err(|e| SnapshotError::DeserializationFailed(e.to_string()))?;
        snapshot.check_version()
    }

    /// Name of the active leaf state.
    pub fn current_name(&self) -> Option<&str> {
        self.active_path.last().map(String::as_str)
    }

    fn check_version(self) -> Result<Self, SnapshotError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: self.version,
                supported: SNAPSHOT_VERSION,
            });
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EventId, Fault, TransitionRecord};

    fn snapshot() -> MachineSnapshot {
        let mut records = TransitionLog::new(4);
        records.record(TransitionRecord {
            from: StateId::new(0),
            to: StateId::new(2),
            event: EventId::new(1),
            fired: true,
            fault: Some(Fault::action("bulb flickered")),
            timestamp: Utc::now(),
        });

        MachineSnapshot {
            version: SNAPSHOT_VERSION,
            machine: MachineId::new(),
            timestamp: Utc::now(),
            current: Some(StateId::new(2)),
            active_path: vec!["On".to_string(), "Green".to_string()],
            history: vec![HistoryEntry {
                state: "On".to_string(),
                last_active: "Green".to_string(),
            }],
            records,
        }
    }

    #[test]
    fn json_round_trip_preserves_snapshot() {
        let original = snapshot();

        let restored = MachineSnapshot::from_json(&original.to_json().unwrap()).unwrap();

        assert_eq!(restored.machine, original.machine);
        assert_eq!(restored.current_name(), Some("Green"));
        assert_eq!(restored.history, original.history);
        assert_eq!(restored.records.len(), 1);
    }

    #[test]
    fn binary_round_trip_preserves_snapshot() {
        let original = snapshot();

        let restored = MachineSnapshot::from_bytes(&original.to_bytes().unwrap()).unwrap();

        assert_eq!(restored, original);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut future = snapshot();
        future.version = SNAPSHOT_VERSION + 1;
        let json = serde_json::to_string(&future).unwrap();

        let result = MachineSnapshot::from_json(&json);

        assert!(matches!(
            result,
            Err(SnapshotError::UnsupportedVersion { found: 2, supported: 1 })
        ));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let result = MachineSnapshot::from_bytes(&[0xff, 0x01]);
        assert!(matches!(result, Err(SnapshotError::DeserializationFailed(_))));
    }
}
