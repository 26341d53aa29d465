//! In-memory fakes for the collaborator traits (§4.14), shared across unit
//! tests in this crate. Not compiled into non-test builds.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::collab::{EditLog, EditLogError, LogEntry, ReplicaCatalog, ReplicaState, TabletCatalog, TabletHandle};

#[derive(Default)]
pub struct FakeTabletCatalog {
    tablets: Mutex<HashMap<u64, TabletHandle>>,
    table_index: Mutex<HashMap<u64, Vec<u64>>>,
    dropped_bitmaps: Mutex<Vec<(u64, u64)>>,
}

impl FakeTabletCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, table_id: u64, tablet: TabletHandle) {
        self.tablets.lock().unwrap().insert(tablet.tablet_id, tablet);
        self.table_index.lock().unwrap().entry(table_id).or_default().push(tablet.tablet_id);
    }

    pub fn remove(&self, tablet_id: u64) {
        self.tablets.lock().unwrap().remove(&tablet_id);
    }

    pub fn dropped_bitmaps(&self) -> Vec<(u64, u64)> {
        self.dropped_bitmaps.lock().unwrap().clone()
    }
}

impl TabletCatalog for FakeTabletCatalog {
    fn get_tablet(&self, tablet_id: u64) -> Option<TabletHandle> {
        self.tablets.lock().unwrap().get(&tablet_id).copied()
    }

    fn get_tablet_inverted_index(&self, table_id: u64) -> Vec<u64> {
        self.table_index.lock().unwrap().get(&table_id).cloned().unwrap_or_default()
    }

    fn drop_delete_bitmap_for_rowset(&self, tablet_id: u64, rowset_seq: u64) {
        self.dropped_bitmaps.lock().unwrap().push((tablet_id, rowset_seq));
    }
}

#[derive(Default)]
pub struct VecEditLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl VecEditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }
}

impl EditLog for VecEditLog {
    fn append(&self, entry: LogEntry) -> Result<(), EditLogError> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeReplicaCatalog {
    replicas: Mutex<HashMap<(u64, u64), ReplicaState>>,
}

impl FakeReplicaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tablet_id: u64, replica: ReplicaState) {
        self.replicas.lock().unwrap().insert((tablet_id, replica.backend_id), replica);
    }
}

impl ReplicaCatalog for FakeReplicaCatalog {
    fn replica(&self, tablet_id: u64, backend_id: u64) -> Option<ReplicaState> {
        self.replicas.lock().unwrap().get(&(tablet_id, backend_id)).copied()
    }

    fn replicas_of_tablet(&self, tablet_id: u64) -> Vec<ReplicaState> {
        self.replicas
            .lock()
            .unwrap()
            .iter()
            .filter(|((t, _), _)| *t == tablet_id)
            .map(|(_, r)| *r)
            .collect()
    }

    fn update_replica(
        &self,
        tablet_id: u64,
        replica_id: u64,
        new_version: u64,
        last_failed_version: i64,
        last_success_version: u64,
    ) {
        let mut replicas = self.replicas.lock().unwrap();
        if let Some(r) = replicas.values_mut().find(|r| r.replica_id == replica_id) {
            r.version = new_version;
            r.last_failed_version = last_failed_version;
            r.last_success_version = last_success_version;
        }
        let _ = tablet_id;
    }
}
