//! Rowset identity and lifecycle: pending reservations, the live handle
//! trait, query pins, and unused-rowset GC (§3, §4.3, §4.4).

mod handle;
mod id;
mod meta;
mod pending;
mod querying;
mod unused;

pub use handle::{FakeRowset, RowsetHandle, SharedRowset};
pub use id::{RowsetId, RowsetIdGenerator};
pub use meta::{RowsetMeta, RowsetState, VersionRange};
pub use pending::{PendingRowsetContext, PendingRowsetGuard, PendingRowsetSet};
pub use querying::QueryingRowsetRegistry;
pub use unused::UnusedRowsetRegistry;
