//! Transaction data model (§3, §4.8, §4.9).

use std::collections::{HashMap, HashSet};
use std::fmt;

/// Monotonic, globally-unique transaction identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxnId(pub u64);

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Origin of a load transaction; affects label-retention class and edit-log
/// policy (§4.9 "Begin").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceType {
    Frontend,
    Backend,
    RoutineLoadTask,
}

impl SourceType {
    /// Routine-load streaming transactions keep labels for a shorter window
    /// than batch loads (§4.8 `final_short`/`final_long`).
    pub fn is_streaming(&self) -> bool {
        matches!(self, SourceType::RoutineLoadTask)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnStatus {
    Prepare,
    Precommitted,
    Committed,
    Visible,
    Aborted,
}

impl TxnStatus {
    pub fn is_final(&self) -> bool {
        matches!(self, TxnStatus::Visible | TxnStatus::Aborted)
    }

    pub fn is_running(&self) -> bool {
        !self.is_final()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxnStatus::Prepare => "PREPARE",
            TxnStatus::Precommitted => "PRECOMMITTED",
            TxnStatus::Committed => "COMMITTED",
            TxnStatus::Visible => "VISIBLE",
            TxnStatus::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for TxnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sentinel partition-version value used while a 2PC transaction is
/// PRECOMMITTED; the true version is assigned at `commit2pc` (§4.9).
pub const PRECOMMIT_VERSION_SENTINEL: i64 = -1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionCommitInfo {
    pub partition_id: u64,
    pub range_summary: String,
    pub version: i64,
    pub version_time: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableCommitInfo {
    pub table_id: u64,
    pub partition_commit_infos: HashMap<u64, PartitionCommitInfo>,
}

/// Per-replica publish-version task outcome, as reported by a backend RPC
/// response (§4.11). `None` in the registry means the task has not
/// completed yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublishTaskResult {
    Pending,
    /// Backend reports an explicit per-tablet success set.
    Succeeded { succeeded_tablets: HashSet<u64> },
    /// Legacy backends report only the tablets that failed.
    FailedTablets { failed_tablets: HashSet<u64> },
}

#[derive(Clone, Debug)]
pub struct Transaction {
    pub transaction_id: TxnId,
    pub label: String,
    pub db_id: u64,
    pub table_id_list: Vec<u64>,
    pub coordinator: String,
    pub source_type: SourceType,
    pub status: TxnStatus,
    pub request_id: Option<String>,
    pub prepare_time_ms: i64,
    pub pre_commit_time_ms: Option<i64>,
    pub commit_time_ms: Option<i64>,
    pub first_publish_time_ms: Option<i64>,
    pub last_publish_time_ms: Option<i64>,
    pub finish_time_ms: Option<i64>,
    pub timeout_ms: i64,
    pub reason: Option<String>,
    pub error_replicas: HashSet<u64>,
    pub table_commit_infos: HashMap<u64, TableCommitInfo>,
    pub publish_version_tasks: HashMap<u64, PublishTaskResult>,
    pub callback_id: Option<u64>,
}

impl Transaction {
    pub fn new(transaction_id: TxnId, db_id: u64, label: String, table_id_list: Vec<u64>, coordinator: String, source_type: SourceType, request_id: Option<String>, timeout_ms: i64, prepare_time_ms: i64) -> Self {
        Self {
            transaction_id,
            label,
            db_id,
            table_id_list,
            coordinator,
            source_type,
            status: TxnStatus::Prepare,
            request_id,
            prepare_time_ms,
            pre_commit_time_ms: None,
            commit_time_ms: None,
            first_publish_time_ms: None,
            last_publish_time_ms: None,
            finish_time_ms: None,
            timeout_ms,
            reason: None,
            error_replicas: HashSet::new(),
            table_commit_infos: HashMap::new(),
            publish_version_tasks: HashMap::new(),
            callback_id: None,
        }
    }

    pub fn is_timeout(&self, now_ms: i64) -> bool {
        self.status.is_running() && now_ms >= self.prepare_time_ms + self.timeout_ms
    }

    /// Label-retention class used to choose `final_short` vs `final_long`
    /// (§4.8).
    pub fn is_streaming_retention(&self) -> bool {
        self.source_type.is_streaming()
    }

    /// Extends the publish deadline for ROLLUP/SCHEMA_CHANGE tables (§4.10
    /// step 4).
    pub fn prolong_publish_timeout(&mut self, extra_ms: i64) {
        self.timeout_ms += extra_ms;
    }
}
