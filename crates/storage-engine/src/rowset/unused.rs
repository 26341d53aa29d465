//! The unused-rowset registry and its GC sweeper (§4.4).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::handle::SharedRowset;
use super::querying::QueryingRowsetRegistry;
use super::RowsetId;
use crate::collab::TabletCatalog;

struct UnusedEntry {
    handle: SharedRowset,
    tablet_id: u64,
    delayed_expired_at: Instant,
    is_local: bool,
    need_delete_file: bool,
}

/// Map of rowsets eligible for deletion, plus their delay timers (§3, §4.4).
#[derive(Default)]
pub struct UnusedRowsetRegistry {
    entries: Mutex<HashMap<RowsetId, UnusedEntry>>,
}

impl UnusedRowsetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flags `rowset` for deletion once `delay` has elapsed. Idempotent: a
    /// duplicate insert for an id already tracked is a no-op (§4.4).
    pub fn add_unused_rowset(&self, rowset: SharedRowset, tablet_id: u64, delay: Duration, is_local: bool) {
        rowset.close();
        let mut entries = self.entries.lock();
        entries.entry(rowset.id()).or_insert_with(|| UnusedEntry {
            delayed_expired_at: Instant::now() + delay,
            handle: rowset,
            tablet_id,
            is_local,
            need_delete_file: true,
        });
    }

    pub fn contains(&self, id: RowsetId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// One sweep pass. Returns the ids actually removed from disk, for
    /// observability and tests. `now` is injected so callers (and tests)
    /// control the clock explicitly rather than relying on wall time.
    pub fn sweep(&self, now: Instant, querying: &QueryingRowsetRegistry, tablets: &dyn TabletCatalog) -> Vec<RowsetId> {
        let removal_batch: Vec<(RowsetId, u64, SharedRowset)> = {
            let mut entries = self.entries.lock();
            let selected: Vec<RowsetId> = entries
                .iter()
                .filter(|(_, e)| {
                    Arc::strong_count(&e.handle) <= 1 && e.need_delete_file && e.delayed_expired_at <= now
                })
                .map(|(id, _)| *id)
                .collect();

            let mut batch = Vec::with_capacity(selected.len());
            for id in selected {
                querying.evict(id);
                let Some(entry) = entries.remove(&id) else { continue };
                if entry.is_local {
                    batch.push((id, entry.tablet_id, entry.handle));
                }
                // Remote rowsets are left to the remote-GC path (§4.4).
            }
            batch
        };

        let mut removed = Vec::with_capacity(removal_batch.len());
        for (id, tablet_id, handle) in removal_batch {
            if let Some(tablet) = tablets.get_tablet(tablet_id).filter(|t| t.uses_merge_on_write) {
                tablets.drop_delete_bitmap_for_rowset(tablet.tablet_id, id.seq());
            }
            match handle.remove() {
                Ok(()) => {
                    debug!(rowset = %id, "deleted unused rowset");
                    removed.push(id);
                }
                Err(err) => warn!(rowset = %id, error = %err, "failed to remove unused rowset files"),
            }
        }
        removed
    }
}
