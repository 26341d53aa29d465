//! Collaborator interfaces standing in for subsystems explicitly out of
//! scope (§1, §4.14): the live tablet catalog, the durable edit log, and the
//! replica catalog used by commit/publish quorum checks.
//!
//! Per §9's design note, the controller and transaction manager depend on
//! these narrow traits rather than closing over a monolithic engine object,
//! which also makes them trivial to fake in unit tests.

use std::fmt;

use thiserror::Error;

/// A live tablet's identity, as far as the controller/GC paths need to know.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TabletHandle {
    pub tablet_id: u64,
    pub tablet_uid: u64,
    pub uses_merge_on_write: bool,
}

/// Read-only view onto the set of tablets this node currently hosts.
/// Backed in production by the out-of-scope `TabletManager`.
pub trait TabletCatalog: Send + Sync {
    fn get_tablet(&self, tablet_id: u64) -> Option<TabletHandle>;

    fn tablet_exists(&self, tablet_id: u64) -> bool {
        self.get_tablet(tablet_id).is_some()
    }

    /// Tablets belonging to `table_id`, across all materialized indices.
    fn get_tablet_inverted_index(&self, table_id: u64) -> Vec<u64>;

    /// Drops the delete-bitmap slice recorded against `rowset_id` for
    /// `tablet_id`. A no-op for tablets that do not use merge-on-write.
    fn drop_delete_bitmap_for_rowset(&self, tablet_id: u64, rowset_seq: u64);

    /// The tablet's currently valid visible version range, used by rowset
    /// meta cleanup (§4.6) to decide whether a VISIBLE rowset is still
    /// useful. `None` when the catalog cannot answer (e.g. a minimal fake):
    /// callers treat that as "don't know, don't delete on this basis alone".
    fn visible_version_range(&self, _tablet_id: u64) -> Option<crate::rowset::VersionRange> {
        None
    }
}

/// Placeholder [`TabletCatalog`] reporting no tablets at all. Used by the CLI
/// entry point until a real tablet manager is wired in (§1: the live tablet
/// catalog is an out-of-scope collaborator).
#[derive(Default)]
pub struct NoopTabletCatalog;

impl TabletCatalog for NoopTabletCatalog {
    fn get_tablet(&self, _tablet_id: u64) -> Option<TabletHandle> {
        None
    }

    fn get_tablet_inverted_index(&self, _table_id: u64) -> Vec<u64> {
        Vec::new()
    }

    fn drop_delete_bitmap_for_rowset(&self, _tablet_id: u64, _rowset_seq: u64) {}
}

/// Database-level data-size quota, consulted by Begin before the database's
/// transaction index lock is even taken (§4.9 "Begin": "checks database data
/// quota" is a distinct pre-lock step from the in-lock running-txn-count
/// check). Backed in production by the out-of-scope catalog that tracks
/// per-database data size against its configured quota.
pub trait DatabaseQuotaCatalog: Send + Sync {
    fn is_over_data_quota(&self, db_id: u64) -> bool;
}

/// Placeholder [`DatabaseQuotaCatalog`] that never reports over-quota. Used
/// by the CLI entry point and by tests that don't exercise quota rejection.
#[derive(Default)]
pub struct NullQuotaCatalog;

impl DatabaseQuotaCatalog for NullQuotaCatalog {
    fn is_over_data_quota(&self, _db_id: u64) -> bool {
        false
    }
}

#[derive(Debug, Error)]
pub enum EditLogError {
    #[error("failed to append edit log entry: {0}")]
    Append(String),
}

/// One durable record of a transaction-state transition (§4.9, §4.14).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogEntry {
    TxnBegin { txn_id: u64, db_id: u64, label: String },
    TxnPreCommit { txn_id: u64 },
    TxnCommit { txn_id: u64 },
    TxnVisible { txn_id: u64 },
    TxnAbort { txn_id: u64, reason: String },
    ClusterIdReconciled { path: String, cluster_id: i32 },
}

/// Durable append-only log of transaction-state transitions. Segment/frame
/// format is out of scope (§1); this is the narrow append contract the
/// transaction manager needs.
pub trait EditLog: Send + Sync {
    fn append(&self, entry: LogEntry) -> Result<(), EditLogError>;
}

/// Discards every entry. Used for source types whose PREPARE is intentionally
/// not logged (§4.9 "Begin") and for tests.
#[derive(Default)]
pub struct NullEditLog;

impl EditLog for NullEditLog {
    fn append(&self, _entry: LogEntry) -> Result<(), EditLogError> {
        Ok(())
    }
}

/// A replica's durability state as tracked by the transaction manager's
/// commit/publish quorum checks (§4.10–§4.12).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplicaState {
    pub replica_id: u64,
    pub backend_id: u64,
    pub version: u64,
    pub last_failed_version: i64,
    pub last_success_version: u64,
    pub is_alter: bool,
}

pub trait ReplicaCatalog: Send + Sync {
    fn replica(&self, tablet_id: u64, backend_id: u64) -> Option<ReplicaState>;

    /// All replicas of `tablet_id`, regardless of backend.
    fn replicas_of_tablet(&self, tablet_id: u64) -> Vec<ReplicaState>;

    fn update_replica(&self, tablet_id: u64, replica_id: u64, new_version: u64, last_failed_version: i64, last_success_version: u64);
}

impl fmt::Debug for dyn TabletCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<TabletCatalog>")
    }
}

impl fmt::Debug for dyn EditLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<EditLog>")
    }
}

impl fmt::Debug for dyn ReplicaCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<ReplicaCatalog>")
    }
}
