//! Publish ("Finish") logic: partition-version preflight (§4.9 step 2),
//! per-replica classification (§4.11), and catalog update after visible
//! (§4.12).

use std::collections::HashMap;

use super::commit::PartitionCatalog;
use super::types::{PublishTaskResult, TableCommitInfo};
use crate::collab::{ReplicaCatalog, ReplicaState};

/// View onto partition visible-version state needed by the publish
/// preflight check. A structural expansion of §4.14's collaborator set.
pub trait PartitionVersionCatalog: Send + Sync {
    fn partition_exists(&self, table_id: u64, partition_id: u64) -> bool;
    fn visible_version(&self, partition_id: u64) -> i64;
}

/// §4.9 "Finish" step 2: requires every surviving partition's
/// `visible_version + 1 == commit_info.version`. Entries for dropped
/// tables/partitions are silently skipped, not failed.
pub fn finish_check_partition_version(table_commit_infos: &HashMap<u64, TableCommitInfo>, catalog: &dyn PartitionVersionCatalog) -> Result<(), String> {
    for (table_id, info) in table_commit_infos {
        for (partition_id, commit_info) in &info.partition_commit_infos {
            if !catalog.partition_exists(*table_id, *partition_id) {
                continue;
            }
            let visible = catalog.visible_version(*partition_id);
            if visible + 1 != commit_info.version {
                return Err(format!("wait for publishing partition {partition_id}: visible={visible}, commit={}", commit_info.version));
            }
        }
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplicaPublishVerdict {
    Success,
    VersionFailed,
    WriteFailed,
}

/// §4.11. `alter_tolerant` folds together the two conditions the
/// specification allows for clearing an ALTER-state replica's error: the
/// transaction predates the alter job's watermark, or
/// `publish_version_check_alter_replica` is disabled. Watermark tracking
/// lives in the out-of-scope alter-job subsystem, so callers precompute this.
pub fn classify_replica_publish(replica: &ReplicaState, tablet_id: u64, target_version: u64, task: &PublishTaskResult, alter_tolerant: bool) -> ReplicaPublishVerdict {
    let mut errored = match task {
        PublishTaskResult::Pending => true,
        PublishTaskResult::Succeeded { succeeded_tablets } => !succeeded_tablets.contains(&tablet_id),
        PublishTaskResult::FailedTablets { failed_tablets } => failed_tablets.contains(&tablet_id),
    };

    if replica.is_alter && alter_tolerant {
        errored = false;
    }

    if !errored {
        if replica.version + 1 == target_version {
            ReplicaPublishVerdict::Success
        } else {
            ReplicaPublishVerdict::VersionFailed
        }
    } else if replica.version >= target_version {
        ReplicaPublishVerdict::Success
    } else {
        ReplicaPublishVerdict::WriteFailed
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuorumVerdict {
    Succ,
    /// Promoted forward despite missing quorum: publish tasks hold an
    /// already-assigned version, so indefinite rollback would stall the
    /// partition (§4.9 step 3).
    TimeoutSucc,
    Failed,
}

/// §4.9 step 3 `finishCheckQuorumReplicas`, restricted to one partition. The
/// caller aggregates across partitions; any `Failed` partition keeps the
/// whole transaction COMMITTED for retry.
#[allow(clippy::too_many_arguments)]
pub fn finish_check_quorum_replicas(table_id: u64, partition_id: u64, target_version: u64, publish_tasks: &HashMap<u64, PublishTaskResult>, partitions: &dyn PartitionCatalog, replicas: &dyn ReplicaCatalog, alter_tolerant: bool, elapsed_since_first_publish_ms: i64, publish_wait_time_ms: i64) -> QuorumVerdict {
    let required = partitions.load_required_replica_num(partition_id);
    let tablets = partitions.tablets_of_partition(table_id, partition_id);

    let mut worst_succ = usize::MAX;
    for tablet_id in tablets {
        let mut succ = 0usize;
        for backend_id in partitions.backends_of_tablet(tablet_id) {
            let Some(replica) = replicas.replica(tablet_id, backend_id) else {
                continue;
            };
            let task = publish_tasks.get(&backend_id).cloned().unwrap_or(PublishTaskResult::Pending);
            if classify_replica_publish(&replica, tablet_id, target_version, &task, alter_tolerant) == ReplicaPublishVerdict::Success {
                succ += 1;
            }
        }
        worst_succ = worst_succ.min(succ);
    }
    let worst_succ = if worst_succ == usize::MAX { 0 } else { worst_succ };

    if worst_succ >= required {
        QuorumVerdict::Succ
    } else if elapsed_since_first_publish_ms >= publish_wait_time_ms && worst_succ > 0 {
        QuorumVerdict::TimeoutSucc
    } else {
        QuorumVerdict::Failed
    }
}

/// §4.12: after a transaction becomes VISIBLE, advances one replica's
/// version bookkeeping.
pub fn update_catalog_after_visible(tablet_id: u64, backend_id: u64, commit_version: u64, current_visible_version: i64, errored: bool, replicas: &dyn ReplicaCatalog) {
    let Some(replica) = replicas.replica(tablet_id, backend_id) else {
        return;
    };

    let (new_version, last_failed_version, last_success_version) = if !errored {
        if (replica.version as i64) < current_visible_version {
            (replica.version, current_visible_version, commit_version)
        } else {
            (commit_version, replica.last_failed_version, commit_version)
        }
    } else {
        (replica.version, replica.last_failed_version.max(commit_version as i64), replica.last_success_version)
    };

    replicas.update_replica(tablet_id, replica.replica_id, new_version, last_failed_version, last_success_version);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeReplicaCatalog;
    use std::collections::HashSet;

    fn replica(backend_id: u64, version: u64, last_failed: i64, is_alter: bool) -> ReplicaState {
        ReplicaState {
            replica_id: backend_id * 10,
            backend_id,
            version,
            last_failed_version: last_failed,
            last_success_version: version,
            is_alter,
        }
    }

    #[test]
    fn version_continuous_success_task_is_success() {
        let r = replica(1, 4, -1, false);
        let task = PublishTaskResult::Succeeded { succeeded_tablets: HashSet::from([10]) };
        assert_eq!(classify_replica_publish(&r, 10, 5, &task, false), ReplicaPublishVerdict::Success);
    }

    #[test]
    fn missing_task_is_write_failed_when_behind() {
        let r = replica(1, 3, -1, false);
        assert_eq!(classify_replica_publish(&r, 10, 5, &PublishTaskResult::Pending, false), ReplicaPublishVerdict::WriteFailed);
    }

    #[test]
    fn already_advanced_replica_counts_as_success_despite_error() {
        let r = replica(1, 5, -1, false);
        assert_eq!(classify_replica_publish(&r, 10, 5, &PublishTaskResult::Pending, false), ReplicaPublishVerdict::Success);
    }

    #[test]
    fn alter_tolerant_clears_error_for_alter_replica() {
        let r = replica(1, 3, -1, true);
        assert_eq!(classify_replica_publish(&r, 10, 4, &PublishTaskResult::Pending, true), ReplicaPublishVerdict::Success);
    }

    #[test]
    fn no_error_but_lagging_is_version_failed() {
        let r = replica(1, 2, -1, false);
        let task = PublishTaskResult::Succeeded { succeeded_tablets: HashSet::from([10]) };
        assert_eq!(classify_replica_publish(&r, 10, 5, &task, false), ReplicaPublishVerdict::VersionFailed);
    }

    #[test]
    fn catalog_update_advances_success_replica_to_commit_version() {
        let replicas = FakeReplicaCatalog::new();
        replicas.insert(10, replica(1, 4, -1, false));
        update_catalog_after_visible(10, 1, 5, 4, false, &replicas);
        let updated = replicas.replica(10, 1).unwrap();
        assert_eq!(updated.version, 5);
        assert_eq!(updated.last_success_version, 5);
    }

    #[test]
    fn catalog_update_raises_last_failed_version_for_errored_replica() {
        let replicas = FakeReplicaCatalog::new();
        replicas.insert(10, replica(1, 2, -1, false));
        update_catalog_after_visible(10, 1, 5, 4, true, &replicas);
        let updated = replicas.replica(10, 1).unwrap();
        assert_eq!(updated.version, 2, "errored replica's version is left as-is");
        assert_eq!(updated.last_failed_version, 5);
    }
}
