//! Transaction manager: load-job state machine, commit/publish quorum
//! checks, and expiry sweeping (§4.7–§4.13).

mod commit;
mod expiry;
mod manager;
mod publish;
mod types;

pub use commit::{check_commit_status, CommitStatusOutcome, PartitionCatalog};
pub use expiry::{run_expiry_tick, ExpiryDaemonParams};
pub use manager::{DatabaseTransactionManager, DbTxnLimits, ExpiryReport, TransactionManager, MAX_REMOVE_TXN_PER_ROUND};
pub use publish::{classify_replica_publish, finish_check_partition_version, finish_check_quorum_replicas, update_catalog_after_visible, PartitionVersionCatalog, QuorumVerdict, ReplicaPublishVerdict};
pub use types::{PartitionCommitInfo, PublishTaskResult, SourceType, TableCommitInfo, Transaction, TxnId, TxnStatus, PRECOMMIT_VERSION_SENTINEL};
