//! Rowset metadata: the owning tablet, version range, and lifecycle state.

use super::RowsetId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowsetState {
    Pending,
    Committed,
    Visible,
}

/// The half-open `[start_version, end_version]` range covered by a rowset.
/// A rowset produced by a single load covers one version; one produced by
/// compaction may span several.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VersionRange {
    pub start_version: u64,
    pub end_version: u64,
}

impl VersionRange {
    pub fn single(version: u64) -> Self {
        Self {
            start_version: version,
            end_version: version,
        }
    }

    pub fn overlaps(&self, other: &VersionRange) -> bool {
        self.start_version <= other.end_version && other.start_version <= self.end_version
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowsetMeta {
    pub id: RowsetId,
    pub tablet_id: u64,
    pub tablet_uid: u64,
    pub version: VersionRange,
    pub state: RowsetState,
}

impl RowsetMeta {
    pub fn new(id: RowsetId, tablet_id: u64, tablet_uid: u64, version: VersionRange, state: RowsetState) -> Self {
        Self {
            id,
            tablet_id,
            tablet_uid,
            version,
            state,
        }
    }

    /// A rowset is useful to its tablet iff it is VISIBLE and its version
    /// range overlaps the tablet's valid visible history (§3).
    pub fn is_useful_to(&self, tablet_visible_history: &VersionRange) -> bool {
        self.state == RowsetState::Visible && self.version.overlaps(tablet_visible_history)
    }
}
