//! Last-known drive state, used for change detection
//!
//! The poller owns the single `DriveRegistry` writer. Everyone else gets a
//! `DriveRegistryReader` and only ever sees copies.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::model::DriveState;

type Table = Arc<RwLock<BTreeMap<u16, DriveState>>>;

/// Writer half, owned by the poll loop
#[derive(Debug, Default)]
pub struct DriveRegistry {
    table: Table,
}

/// Read-only snapshot handle
#[derive(Debug, Clone)]
pub struct DriveRegistryReader {
    table: Table,
}

impl DriveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reader(&self) -> DriveRegistryReader {
        DriveRegistryReader {
            table: Arc::clone(&self.table),
        }
    }

    pub fn get(&self, id: u16) -> Option<DriveState> {
        self.table.read().get(&id).cloned()
    }

    pub fn snapshot_all(&self) -> Vec<DriveState> {
        self.table.read().values().cloned().collect()
    }

    /// Store `candidate` when any observable field differs (or the drive is new)
    ///
    /// The stored value is replaced wholesale. `last_update` never moves
    /// backwards: an older candidate timestamp is clamped to the stored one.
    pub fn upsert_if_changed(&mut self, id: u16, mut candidate: DriveState) -> bool {
        let mut table = self.table.write();
        match table.get(&id) {
            Some(current) if current.same_observables(&candidate) => false,
            Some(current) => {
                if candidate.last_update < current.last_update {
                    candidate.last_update = current.last_update;
                }
                table.insert(id, candidate);
                true
            },
            None => {
                table.insert(id, candidate);
                true
            },
        }
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }
}

impl DriveRegistryReader {
    pub fn get(&self, id: u16) -> Option<DriveState> {
        self.table.read().get(&id).cloned()
    }

    /// Point-in-time copy ordered by drive id
    pub fn snapshot_all(&self) -> Vec<DriveState> {
        self.table.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::core::model::{DriveCapabilities, DriveRecord};
    use chrono::{Duration, Utc};

    fn state(id: u16, speed: i16) -> DriveState {
        let record = DriveRecord {
            speed,
            ..Default::default()
        };
        DriveState::from_record(
            id,
            format!("Drive {id}"),
            &record,
            DriveCapabilities::default(),
            Utc::now(),
        )
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let mut registry = DriveRegistry::new();
        assert!(registry.upsert_if_changed(1, state(1, 100)));
        assert!(!registry.upsert_if_changed(1, state(1, 100)));
        assert!(registry.upsert_if_changed(1, state(1, 101)));
        assert_eq!(registry.get(1).unwrap().speed, 101);
    }

    #[test]
    fn test_capabilities_not_compared() {
        let mut registry = DriveRegistry::new();
        registry.upsert_if_changed(2, state(2, 0));

        let mut candidate = state(2, 0);
        candidate.capabilities.has_setpoint = false;
        assert!(!registry.upsert_if_changed(2, candidate));
        assert!(registry.get(2).unwrap().capabilities.has_setpoint);
    }

    #[test]
    fn test_last_update_never_regresses() {
        let mut registry = DriveRegistry::new();
        let first = state(1, 1);
        let stamp = first.last_update;
        registry.upsert_if_changed(1, first);

        let mut older = state(1, 2);
        older.last_update = stamp - Duration::seconds(10);
        assert!(registry.upsert_if_changed(1, older));

        let stored = registry.get(1).unwrap();
        assert_eq!(stored.speed, 2);
        assert_eq!(stored.last_update, stamp);
    }

    #[test]
    fn test_reader_sees_copies_in_id_order() {
        let mut registry = DriveRegistry::new();
        let reader = registry.reader();
        assert!(reader.is_empty());
        assert!(reader.get(3).is_none());

        registry.upsert_if_changed(3, state(3, 30));
        registry.upsert_if_changed(1, state(1, 10));

        let mut snapshot = reader.snapshot_all();
        assert_eq!(snapshot.iter().map(|s| s.id).collect::<Vec<_>>(), vec![1, 3]);

        snapshot[0].speed = 999;
        assert_eq!(reader.get(1).unwrap().speed, 10);
        assert_eq!(registry.len(), 2);
    }
}
