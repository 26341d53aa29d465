//! The live, shareable handle to a rowset's on-disk representation.
//!
//! Segment/file formats are out of scope (§1); this trait is the minimal
//! seam the lifecycle registries need: an id to key on, and a way to delete
//! the backing files once nothing else holds a reference.

use std::fmt;
use std::sync::Arc;

use super::RowsetId;
use crate::error::RowsetError;

pub trait RowsetHandle: Send + Sync + fmt::Debug {
    fn id(&self) -> RowsetId;

    /// Closes any open file descriptors without deleting data. Called when a
    /// rowset is flagged unused, before the delay elapses.
    fn close(&self) {}

    /// Deletes the rowset's backing files. Only ever called once, after the
    /// GC sweeper has determined no registry or tablet still holds a
    /// reference (§4.4).
    fn remove(&self) -> Result<(), RowsetError>;
}

pub type SharedRowset = Arc<dyn RowsetHandle>;

/// An in-memory [`RowsetHandle`] used by tests and by callers that do not
/// yet have real segment files to back a rowset with.
#[derive(Debug)]
pub struct FakeRowset {
    id: RowsetId,
    fail_remove: bool,
}

impl FakeRowset {
    pub fn new(id: RowsetId) -> SharedRowset {
        Arc::new(Self {
            id,
            fail_remove: false,
        })
    }

    pub fn new_failing(id: RowsetId) -> SharedRowset {
        Arc::new(Self {
            id,
            fail_remove: true,
        })
    }
}

impl RowsetHandle for FakeRowset {
    fn id(&self) -> RowsetId {
        self.id
    }

    fn remove(&self) -> Result<(), RowsetError> {
        if self.fail_remove {
            return Err(RowsetError::RemoveFailed(self.id, "simulated failure".into()));
        }
        Ok(())
    }
}
