//! Tablet placement across disks (§4.2).

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::datadir::{DataDir, StorageMedium};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum AvailabilityLevel {
    Low,
    Mid,
    High,
}

fn level_for(usage_fraction: f64) -> AvailabilityLevel {
    if usage_fraction < 0.70 {
        AvailabilityLevel::Low
    } else if usage_fraction < 0.85 {
        AvailabilityLevel::Mid
    } else {
        AvailabilityLevel::High
    }
}

/// Tracks the round-robin cursor used by [`stores_for_create_tablet`].
///
/// Two structures are maintained, and both advance on every cache miss for a
/// `(partition_id, medium)` pair: a bounded LRU of per-partition cursors, and
/// an unbounded per-medium "last used" cursor. Preserving this double-advance
/// on miss reproduces the reference placement sequence exactly (§9 open
/// question iii) — it is not a bug to be "optimized" away.
pub struct DiskIndexCursor {
    lru: Mutex<IndexMap<(u64, StorageMedium), u32>>,
    last_used_by_medium: Mutex<HashMap<StorageMedium, u32>>,
    capacity: usize,
}

impl DiskIndexCursor {
    pub fn new(capacity: usize) -> Self {
        Self {
            lru: Mutex::new(IndexMap::new()),
            last_used_by_medium: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Returns the `curr_index` to round-robin from, then advances both
    /// structures to `curr_index + 1` (§4.2 step 1).
    fn next(&self, partition_id: u64, medium: StorageMedium) -> u32 {
        let key = (partition_id, medium);
        let mut lru = self.lru.lock();
        let mut last_used = self.last_used_by_medium.lock();

        let curr_index = match lru.shift_remove(&key) {
            Some(idx) => idx,
            None => last_used.get(&medium).map(|&i| i + 1).unwrap_or(0),
        };

        lru.insert(key, curr_index + 1);
        if lru.len() > self.capacity {
            lru.shift_remove_index(0);
        }
        last_used.insert(medium, curr_index + 1);

        curr_index
    }
}

impl Default for DiskIndexCursor {
    fn default() -> Self {
        Self::new(4096)
    }
}

/// Ordered list of candidate [`DataDir`]s for a new tablet (§4.2).
pub fn stores_for_create_tablet(
    cursor: &DiskIndexCursor,
    partition_id: u64,
    medium: StorageMedium,
    all_dirs: &[Arc<DataDir>],
) -> Vec<Arc<DataDir>> {
    let curr_index = cursor.next(partition_id, medium) as usize;

    let distinct_mediums = all_dirs.iter().filter(|d| d.is_used()).map(|d| d.medium()).collect::<std::collections::HashSet<_>>().len();
    let medium_matters = distinct_mediums > 1;

    let candidates: Vec<Arc<DataDir>> = all_dirs
        .iter()
        .filter(|d| d.is_used() && d.usage_fraction() < 1.0)
        .filter(|d| !medium_matters || d.medium() == medium)
        .cloned()
        .collect();

    let mut by_level: HashMap<AvailabilityLevel, Vec<Arc<DataDir>>> = HashMap::new();
    for dir in candidates {
        by_level.entry(level_for(dir.usage_fraction())).or_default().push(dir);
    }

    let mut levels: Vec<AvailabilityLevel> = by_level.keys().copied().collect();
    levels.sort();

    let mut result = Vec::new();
    for level in levels {
        let group = by_level.remove(&level).unwrap_or_default();
        let len = group.len();
        if len == 0 {
            continue;
        }
        let offset = curr_index % len;
        result.extend(group.into_iter().cycle().skip(offset).take(len));
    }
    result
}
