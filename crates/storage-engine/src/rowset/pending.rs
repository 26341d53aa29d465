//! The pending-rowset set: reserved ids whose files may still be being
//! written. A rowset id in this set is invisible to GC (§4.3).

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use super::RowsetId;

/// Whether a pending rowset's files are being written to this backend's
/// local disks or are expected to arrive from a remote source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingRowsetContext {
    Local,
    Remote,
}

#[derive(Default)]
struct Buckets {
    local: HashSet<RowsetId>,
    remote: HashSet<RowsetId>,
}

impl Buckets {
    fn bucket_mut(&mut self, ctx: PendingRowsetContext) -> &mut HashSet<RowsetId> {
        match ctx {
            PendingRowsetContext::Local => &mut self.local,
            PendingRowsetContext::Remote => &mut self.remote,
        }
    }
}

/// Two-bucket set (`local`/`remote`) of in-flight rowset writes, keyed by
/// [`RowsetId`]. The only way to remove an entry is to drop the
/// [`PendingRowsetGuard`] returned by [`PendingRowsetSet::add`].
#[derive(Default)]
pub struct PendingRowsetSet {
    buckets: Arc<Mutex<Buckets>>,
}

impl PendingRowsetSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `id` as pending and returns a guard. The guard removes the
    /// id from the set exactly once, on drop.
    pub fn add(&self, id: RowsetId, ctx: PendingRowsetContext) -> PendingRowsetGuard {
        self.buckets.lock().bucket_mut(ctx).insert(id);
        PendingRowsetGuard {
            buckets: self.buckets.clone(),
            id,
            ctx,
        }
    }

    pub fn contains(&self, id: RowsetId) -> bool {
        let buckets = self.buckets.lock();
        buckets.local.contains(&id) || buckets.remote.contains(&id)
    }

    pub fn len(&self) -> usize {
        let buckets = self.buckets.lock();
        buckets.local.len() + buckets.remote.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// RAII guard for a reservation in the [`PendingRowsetSet`]. Dropping it is
/// the sole removal path (§4.3, §9 "Scoped resources").
pub struct PendingRowsetGuard {
    buckets: Arc<Mutex<Buckets>>,
    id: RowsetId,
    ctx: PendingRowsetContext,
}

impl PendingRowsetGuard {
    pub fn id(&self) -> RowsetId {
        self.id
    }
}

impl Drop for PendingRowsetGuard {
    fn drop(&mut self) {
        self.buckets.lock().bucket_mut(self.ctx).remove(&self.id);
    }
}
