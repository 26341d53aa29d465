//! Rowsets pinned by an open query snapshot. GC must never delete a rowset
//! present here (§3, §4.4).
//!
//! A pin holds a clone of the rowset's [`SharedRowset`] handle, not just its
//! id: this is what makes the unused-rowset sweeper's strong-reference check
//! (§4.4 step a) actually observe an open snapshot.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::handle::SharedRowset;
use super::RowsetId;

struct Pin {
    handle: SharedRowset,
    count: usize,
}

#[derive(Default)]
pub struct QueryingRowsetRegistry {
    pins: Mutex<HashMap<RowsetId, Pin>>,
}

impl QueryingRowsetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called when a query opens a snapshot that contains `rowset`.
    pub fn pin(&self, rowset: SharedRowset) {
        let mut pins = self.pins.lock();
        pins.entry(rowset.id())
            .and_modify(|p| p.count += 1)
            .or_insert(Pin { handle: rowset, count: 1 });
    }

    /// Called when a snapshot referencing `id` closes. Idempotent-safe: an
    /// unmatched unpin is a no-op.
    pub fn unpin(&self, id: RowsetId) {
        let mut pins = self.pins.lock();
        if let std::collections::hash_map::Entry::Occupied(mut entry) = pins.entry(id) {
            entry.get_mut().count = entry.get().count.saturating_sub(1);
            if entry.get().count == 0 {
                entry.remove();
            }
        }
    }

    pub fn is_pinned(&self, id: RowsetId) -> bool {
        self.pins.lock().contains_key(&id)
    }

    /// Forcibly drops any pin on `id`. Used by the unused-rowset sweeper to
    /// clean up a stale entry for a rowset it has already decided to delete
    /// (§4.4) — defensive, not the mechanism that protects a live pin.
    pub fn evict(&self, id: RowsetId) {
        self.pins.lock().remove(&id);
    }
}
