//! `checkCommitStatus` (§4.10): classifies reported tablet commits into a
//! quorum verdict per partition.

use std::collections::{HashMap, HashSet};

use crate::collab::ReplicaCatalog;
use crate::error::TxnError;

/// Narrow view onto table/partition/tablet topology needed by the commit and
/// publish quorum checks. Backed in production by the out-of-scope catalog
/// service; a structural expansion of §4.14's collaborator set, carrying no
/// behavior beyond what §4.10–§4.12 already specify.
pub trait PartitionCatalog: Send + Sync {
    fn is_table_in_restore(&self, table_id: u64) -> bool;
    fn is_table_rollup_or_schema_change(&self, table_id: u64) -> bool;
    /// All tablets of all materialized indices for `(table_id, partition_id)`.
    fn tablets_of_partition(&self, table_id: u64, partition_id: u64) -> Vec<u64>;
    fn load_required_replica_num(&self, partition_id: u64) -> usize;
    /// Backend ids hosting a replica of `tablet_id`.
    fn backends_of_tablet(&self, tablet_id: u64) -> Vec<u64>;
    /// `(table_id, partition_id)` owning `tablet_id`, if the tablet's meta
    /// still exists and its table/partition have not been dropped.
    fn partition_of_tablet(&self, tablet_id: u64) -> Option<(u64, u64)>;
}

pub struct CommitStatusOutcome {
    pub error_replica_ids: HashSet<u64>,
    /// Tables whose publish deadline should be prolonged (§4.10 step 4).
    pub prolong_tables: Vec<u64>,
}

/// Implements §4.10. `reported` is the set of `(tablet_id, backend_id)`
/// commit acknowledgements the coordinator received. `loaded_indexes`
/// restricts the tablets considered per table to a declared subset, when the
/// transaction named one; `None` means "all materialized indices".
pub fn check_commit_status(reported: &[(u64, u64)], loaded_indexes: Option<&HashMap<u64, HashSet<u64>>>, partitions: &dyn PartitionCatalog, replicas: &dyn ReplicaCatalog) -> Result<CommitStatusOutcome, TxnError> {
    let mut table_to_partitions: HashMap<u64, HashSet<u64>> = HashMap::new();
    let mut tablet_to_backends: HashMap<u64, HashSet<u64>> = HashMap::new();

    for &(tablet_id, backend_id) in reported {
        let Some((table_id, partition_id)) = partitions.partition_of_tablet(tablet_id) else {
            continue;
        };
        if partitions.is_table_in_restore(table_id) {
            return Err(TxnError::TransactionCommitFailed(format!("table {table_id} is in RESTORE state")));
        }
        table_to_partitions.entry(table_id).or_default().insert(partition_id);
        tablet_to_backends.entry(tablet_id).or_default().insert(backend_id);
    }

    let mut error_replica_ids = HashSet::new();
    let mut prolong_tables = Vec::new();

    for (&table_id, partition_ids) in &table_to_partitions {
        for &partition_id in partition_ids {
            let tablets = match loaded_indexes.and_then(|m| m.get(&table_id)) {
                Some(subset) => partitions.tablets_of_partition(table_id, partition_id).into_iter().filter(|t| subset.contains(t)).collect(),
                None => partitions.tablets_of_partition(table_id, partition_id),
            };

            let required = partitions.load_required_replica_num(partition_id);
            for tablet_id in tablets {
                let commit_backends = tablet_to_backends.get(&tablet_id).cloned().unwrap_or_default();
                let mut succ = 0usize;

                for backend_id in partitions.backends_of_tablet(tablet_id) {
                    let Some(replica) = replicas.replica(tablet_id, backend_id) else {
                        return Err(TxnError::TransactionCommitFailed(format!("no replica record for tablet {tablet_id} on backend {backend_id}")));
                    };

                    if commit_backends.contains(&backend_id) {
                        if replica.last_failed_version < 0 {
                            succ += 1;
                        }
                        // else: version-failed replica, counted in neither bucket.
                    } else {
                        error_replica_ids.insert(replica.replica_id);
                    }
                }

                if succ < required {
                    return Err(TxnError::TabletQuorumFailed(format!("tablet {tablet_id}: {succ}/{required} replicas succeeded")));
                }
            }

            if partitions.is_table_rollup_or_schema_change(table_id) {
                prolong_tables.push(table_id);
            }
        }
    }

    Ok(CommitStatusOutcome { error_replica_ids, prolong_tables })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::ReplicaState;
    use crate::testutil::FakeReplicaCatalog;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakePartitionCatalog {
        restore: Mutex<HashSet<u64>>,
        rollup: Mutex<HashSet<u64>>,
        tablets: Mutex<HashMap<(u64, u64), Vec<u64>>>,
        required: Mutex<HashMap<u64, usize>>,
        backends: Mutex<HashMap<u64, Vec<u64>>>,
        tablet_partition: Mutex<HashMap<u64, (u64, u64)>>,
    }

    impl PartitionCatalog for FakePartitionCatalog {
        fn is_table_in_restore(&self, table_id: u64) -> bool {
            self.restore.lock().contains(&table_id)
        }
        fn is_table_rollup_or_schema_change(&self, table_id: u64) -> bool {
            self.rollup.lock().contains(&table_id)
        }
        fn tablets_of_partition(&self, table_id: u64, partition_id: u64) -> Vec<u64> {
            self.tablets.lock().get(&(table_id, partition_id)).cloned().unwrap_or_default()
        }
        fn load_required_replica_num(&self, partition_id: u64) -> usize {
            *self.required.lock().get(&partition_id).unwrap_or(&1)
        }
        fn backends_of_tablet(&self, tablet_id: u64) -> Vec<u64> {
            self.backends.lock().get(&tablet_id).cloned().unwrap_or_default()
        }
        fn partition_of_tablet(&self, tablet_id: u64) -> Option<(u64, u64)> {
            self.tablet_partition.lock().get(&tablet_id).copied()
        }
    }

    fn replica(backend_id: u64, last_failed_version: i64) -> ReplicaState {
        ReplicaState {
            replica_id: backend_id * 100,
            backend_id,
            version: 5,
            last_failed_version,
            last_success_version: 5,
            is_alter: false,
        }
    }

    #[test]
    fn quorum_met_with_two_of_three_succeeding() {
        let partitions = FakePartitionCatalog::default();
        partitions.tablet_partition.lock().insert(10, (1, 1));
        partitions.tablets.lock().insert((1, 1), vec![10]);
        partitions.required.lock().insert(1, 2);
        partitions.backends.lock().insert(10, vec![1, 2, 3]);

        let replicas = FakeReplicaCatalog::new();
        replicas.insert(10, replica(1, -1));
        replicas.insert(10, replica(2, -1));
        replicas.insert(10, replica(3, -1));

        let outcome = check_commit_status(&[(10, 1), (10, 2)], None, &partitions, &replicas).unwrap();
        assert_eq!(outcome.error_replica_ids, HashSet::from([300]));
    }

    #[test]
    fn quorum_failure_when_too_few_succeed() {
        let partitions = FakePartitionCatalog::default();
        partitions.tablet_partition.lock().insert(10, (1, 1));
        partitions.tablets.lock().insert((1, 1), vec![10]);
        partitions.required.lock().insert(1, 2);
        partitions.backends.lock().insert(10, vec![1, 2, 3]);

        let replicas = FakeReplicaCatalog::new();
        replicas.insert(10, replica(1, -1));
        replicas.insert(10, replica(2, -1));
        replicas.insert(10, replica(3, -1));

        let err = check_commit_status(&[(10, 1)], None, &partitions, &replicas).unwrap_err();
        assert!(matches!(err, TxnError::TabletQuorumFailed(_)));
    }

    #[test]
    fn restore_state_table_refuses_commit() {
        let partitions = FakePartitionCatalog::default();
        partitions.tablet_partition.lock().insert(10, (1, 1));
        partitions.restore.lock().insert(1);

        let replicas = FakeReplicaCatalog::new();
        let err = check_commit_status(&[(10, 1)], None, &partitions, &replicas).unwrap_err();
        assert!(matches!(err, TxnError::TransactionCommitFailed(_)));
    }

    #[test]
    fn rollup_table_is_flagged_for_publish_prolongation() {
        let partitions = FakePartitionCatalog::default();
        partitions.tablet_partition.lock().insert(10, (1, 1));
        partitions.tablets.lock().insert((1, 1), vec![10]);
        partitions.required.lock().insert(1, 1);
        partitions.backends.lock().insert(10, vec![1]);
        partitions.rollup.lock().insert(1);

        let replicas = FakeReplicaCatalog::new();
        replicas.insert(10, replica(1, -1));

        let outcome = check_commit_status(&[(10, 1)], None, &partitions, &replicas).unwrap();
        assert_eq!(outcome.prolong_tables, vec![1]);
    }

    #[test]
    fn tablets_not_reported_at_all_still_require_quorum() {
        let partitions = FakePartitionCatalog::default();
        partitions.tablet_partition.lock().insert(10, (1, 1));
        partitions.tablets.lock().insert((1, 1), vec![10, 20]);
        partitions.required.lock().insert(1, 1);
        partitions.backends.lock().insert(20, vec![1]);

        let replicas = FakeReplicaCatalog::new();
        replicas.insert(20, replica(1, -1));

        let err = check_commit_status(&[(10, 1)], None, &partitions, &replicas).unwrap_err();
        assert!(matches!(err, TxnError::TabletQuorumFailed(_)));
    }
}
