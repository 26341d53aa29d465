//! Error taxonomy for the storage engine.
//!
//! Each subsystem gets its own [`thiserror`]-derived enum; [`EngineError`] is
//! the umbrella type returned from public entry points, composed from the
//! subsystem enums via `#[from]` — the same nesting the teacher uses for
//! `DatastoreError` over `TableError`/`IndexError`/`SequenceError`.

use thiserror::Error;

use crate::rowset::RowsetId;
use crate::txn::TxnId;

#[derive(Error, Debug)]
pub enum DataDirError {
    #[error("I/O error on data dir: {0}")]
    Io(#[from] std::io::Error),
    #[error("root path `{0}` is invalid")]
    InvalidRootPath(String),
    #[error("data dirs disagree on cluster id: {0}")]
    ClusterIdCorruption(String),
    #[error("process file descriptor soft limit {actual} is below the configured minimum {required}")]
    FileDescriptorLimitTooLow { actual: u64, required: u64 },
    #[error("too many disks are broken: {broken}/{total} exceeds max_percentage_of_error_disk={max_percentage}%")]
    TooManyBrokenDisks {
        broken: usize,
        total: usize,
        max_percentage: u32,
    },
}

#[derive(Error, Debug)]
pub enum RowsetError {
    #[error("rowset {0:?} not found")]
    NotFound(RowsetId),
    #[error("failed to remove rowset {0:?}: {1}")]
    RemoveFailed(RowsetId, String),
}

#[derive(Error, Debug)]
pub enum TxnError {
    #[error("label `{label}` is already in use by transaction {txn_id}")]
    LabelAlreadyUsed { label: String, txn_id: TxnId },
    #[error("duplicated request, already tracked as transaction {0}")]
    DuplicatedRequest(TxnId),
    #[error("transaction {0} not found")]
    TransactionNotFound(TxnId),
    #[error("transaction commit failed: {0}")]
    TransactionCommitFailed(String),
    #[error("tablet quorum failed: {0}")]
    TabletQuorumFailed(String),
    #[error("database transaction quota exceeded")]
    QuotaExceeded,
    #[error("begin-transaction limit exceeded")]
    BeginTxnLimitExceeded,
    #[error("invalid transition: transaction {txn_id} is {status}, cannot {action}")]
    InvalidTransition {
        txn_id: TxnId,
        status: &'static str,
        action: &'static str,
    },
    #[error("internal transaction manager error: {0}")]
    Internal(String),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    DataDir(#[from] DataDirError),
    #[error(transparent)]
    Rowset(#[from] RowsetError),
    #[error(transparent)]
    Txn(#[from] TxnError),
    #[error("{0}")]
    CeCmdParamsError(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
