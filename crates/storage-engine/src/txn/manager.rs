//! Per-database transaction state machine and indexes (§4.7–§4.9, §4.13).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use tracing::warn;

use super::types::{SourceType, TableCommitInfo, Transaction, TxnId, TxnStatus};
use crate::collab::{DatabaseQuotaCatalog, EditLog, LogEntry};
use crate::error::TxnError;

/// Upper bound on finals drained per expiry sweep (§4.13).
pub const MAX_REMOVE_TXN_PER_ROUND: usize = 10_000;

#[derive(Clone, Copy, Debug)]
pub struct DbTxnLimits {
    pub max_running_txn_num: usize,
    pub label_keep_max_second: i64,
    pub streaming_label_keep_max_second: i64,
}

struct Indexes {
    running: HashMap<TxnId, Transaction>,
    final_map: HashMap<TxnId, Transaction>,
    final_short: VecDeque<TxnId>,
    final_long: VecDeque<TxnId>,
    label_to_txn_ids: HashMap<String, HashSet<TxnId>>,
    running_routine_load_txn_nums: usize,
}

impl Indexes {
    fn new() -> Self {
        Self {
            running: HashMap::new(),
            final_map: HashMap::new(),
            final_short: VecDeque::new(),
            final_long: VecDeque::new(),
            label_to_txn_ids: HashMap::new(),
            running_routine_load_txn_nums: 0,
        }
    }

    fn unlink_label(&mut self, label: &str, txn_id: TxnId) {
        if let Some(ids) = self.label_to_txn_ids.get_mut(label) {
            ids.remove(&txn_id);
            if ids.is_empty() {
                self.label_to_txn_ids.remove(label);
            }
        }
    }
}

/// One database's load transactions: a single fair read/write lock protects
/// every index (§4.7). No other lock may be acquired while holding it.
pub struct DatabaseTransactionManager {
    db_id: u64,
    indexes: RwLock<Indexes>,
    next_txn_id: AtomicU64,
    limits: DbTxnLimits,
    lock_reporting_threshold_ms: i64,
}

#[derive(Debug, Default)]
pub struct ExpiryReport {
    pub finals_removed: usize,
    pub timeouts_aborted: usize,
    pub latest_removed_short: Option<TxnId>,
    pub latest_removed_long: Option<TxnId>,
}

impl DatabaseTransactionManager {
    pub fn new(db_id: u64, limits: DbTxnLimits, lock_reporting_threshold_ms: i64) -> Self {
        Self {
            db_id,
            indexes: RwLock::new(Indexes::new()),
            next_txn_id: AtomicU64::new(1),
            limits,
            lock_reporting_threshold_ms,
        }
    }

    fn with_write_lock<R>(&self, op: &'static str, f: impl FnOnce(&mut Indexes) -> R) -> R {
        let start = Instant::now();
        let mut guard = self.indexes.write();
        let result = f(&mut guard);
        drop(guard);

        let elapsed_ms = start.elapsed().as_millis() as i64;
        if elapsed_ms > self.lock_reporting_threshold_ms {
            warn!(db_id = self.db_id, op, elapsed_ms, "database transaction write lock held past threshold");
        }
        result
    }

    pub fn running_txn_num(&self) -> usize {
        self.indexes.read().running.len()
    }

    pub fn transaction(&self, txn_id: TxnId) -> Option<Transaction> {
        let idx = self.indexes.read();
        idx.running.get(&txn_id).or_else(|| idx.final_map.get(&txn_id)).cloned()
    }

    /// §4.9 "Begin".
    pub fn begin(
        &self,
        label: String,
        table_id_list: Vec<u64>,
        coordinator: String,
        source_type: SourceType,
        request_id: Option<String>,
        timeout_ms: i64,
        now_ms: i64,
        quota: &dyn DatabaseQuotaCatalog,
        edit_log: &dyn EditLog,
    ) -> Result<TxnId, TxnError> {
        if label.trim().is_empty() {
            return Err(TxnError::Internal("label must not be empty".into()));
        }
        if quota.is_over_data_quota(self.db_id) {
            return Err(TxnError::QuotaExceeded);
        }

        self.with_write_lock("begin", |idx| {
            // A label stays "in use" for every non-ABORTED transaction that
            // ever held it, whether it's still running (including COMMITTED,
            // which lives on in `idx.running` until `mark_visible`) or has
            // already moved to `idx.final_map` as VISIBLE. Only ABORTED frees
            // it immediately; a final VISIBLE txn frees it only once the
            // expiry sweep actually drops it from `final_map` (§4.13).
            if let Some(ids) = idx.label_to_txn_ids.get(&label) {
                for &existing_id in ids {
                    let found = idx.running.get(&existing_id).or_else(|| idx.final_map.get(&existing_id));
                    if let Some(txn) = found {
                        if txn.status != TxnStatus::Aborted {
                            if matches!(txn.status, TxnStatus::Prepare | TxnStatus::Precommitted) && request_id.is_some() && txn.request_id == request_id {
                                return Err(TxnError::DuplicatedRequest(existing_id));
                            }
                            return Err(TxnError::LabelAlreadyUsed { label, txn_id: existing_id });
                        }
                    }
                }
            }

            let non_routine_running = idx.running.len() - idx.running_routine_load_txn_nums;
            if !matches!(source_type, SourceType::RoutineLoadTask) && non_routine_running >= self.limits.max_running_txn_num {
                return Err(TxnError::BeginTxnLimitExceeded);
            }

            let txn_id = TxnId(self.next_txn_id.fetch_add(1, Ordering::Relaxed));
            let txn = Transaction::new(txn_id, self.db_id, label.clone(), table_id_list, coordinator, source_type, request_id, timeout_ms, now_ms);

            if matches!(source_type, SourceType::Frontend) {
                let _ = edit_log.append(LogEntry::TxnBegin { txn_id: txn_id.0, db_id: self.db_id, label: label.clone() });
            }

            if matches!(source_type, SourceType::RoutineLoadTask) {
                idx.running_routine_load_txn_nums += 1;
            }
            idx.label_to_txn_ids.entry(label).or_default().insert(txn_id);
            idx.running.insert(txn_id, txn);
            Ok(txn_id)
        })
    }

    fn transition_running<F>(&self, op: &'static str, txn_id: TxnId, expected: &[TxnStatus], f: F) -> Result<(), TxnError>
    where
        F: FnOnce(&mut Transaction),
    {
        self.with_write_lock(op, |idx| {
            let txn = idx.running.get_mut(&txn_id).ok_or(TxnError::TransactionNotFound(txn_id))?;
            if !expected.contains(&txn.status) {
                return Err(TxnError::InvalidTransition {
                    txn_id,
                    status: txn.status.as_str(),
                    action: op,
                });
            }
            f(txn);
            Ok(())
        })
    }

    /// §4.9 "Commit (1-phase)": PREPARE → COMMITTED.
    pub fn commit(&self, txn_id: TxnId, table_commit_infos: HashMap<u64, TableCommitInfo>, error_replicas: HashSet<u64>, now_ms: i64, edit_log: &dyn EditLog) -> Result<(), TxnError> {
        self.transition_running("commit", txn_id, &[TxnStatus::Prepare], |txn| {
            txn.status = TxnStatus::Committed;
            txn.commit_time_ms = Some(now_ms);
            txn.table_commit_infos = table_commit_infos;
            txn.error_replicas = error_replicas;
        })?;
        let _ = edit_log.append(LogEntry::TxnCommit { txn_id: txn_id.0 });
        Ok(())
    }

    /// §4.9 "Pre-commit (2PC)": PREPARE → PRECOMMITTED. Partition versions in
    /// `table_commit_infos` must carry the sentinel, assigned by the caller.
    pub fn precommit(&self, txn_id: TxnId, table_commit_infos: HashMap<u64, TableCommitInfo>, now_ms: i64, edit_log: &dyn EditLog) -> Result<(), TxnError> {
        self.transition_running("precommit", txn_id, &[TxnStatus::Prepare], |txn| {
            txn.status = TxnStatus::Precommitted;
            txn.pre_commit_time_ms = Some(now_ms);
            txn.table_commit_infos = table_commit_infos;
        })?;
        let _ = edit_log.append(LogEntry::TxnPreCommit { txn_id: txn_id.0 });
        Ok(())
    }

    /// §4.9 "Commit 2PC": PRECOMMITTED → COMMITTED, assigning real versions.
    pub fn commit2pc(&self, txn_id: TxnId, table_commit_infos: HashMap<u64, TableCommitInfo>, now_ms: i64, edit_log: &dyn EditLog) -> Result<(), TxnError> {
        self.transition_running("commit2pc", txn_id, &[TxnStatus::Precommitted], |txn| {
            txn.status = TxnStatus::Committed;
            txn.commit_time_ms = Some(now_ms);
            txn.table_commit_infos = table_commit_infos;
        })?;
        let _ = edit_log.append(LogEntry::TxnCommit { txn_id: txn_id.0 });
        Ok(())
    }

    /// §4.9 "Finish": COMMITTED → VISIBLE.
    pub fn mark_visible(&self, txn_id: TxnId, now_ms: i64, edit_log: &dyn EditLog) -> Result<(), TxnError> {
        self.with_write_lock("mark_visible", |idx| {
            let mut txn = idx.running.remove(&txn_id).ok_or(TxnError::TransactionNotFound(txn_id))?;
            if txn.status != TxnStatus::Committed {
                let status = txn.status.as_str();
                idx.running.insert(txn_id, txn);
                return Err(TxnError::InvalidTransition { txn_id, status, action: "mark_visible" });
            }
            txn.status = TxnStatus::Visible;
            txn.finish_time_ms = Some(now_ms);
            txn.reason = None;
            push_final(idx, txn);
            Ok(())
        })?;
        let _ = edit_log.append(LogEntry::TxnVisible { txn_id: txn_id.0 });
        Ok(())
    }

    /// §4.9 "Abort": only valid from PREPARE or PRECOMMITTED.
    pub fn abort(&self, txn_id: TxnId, reason: String, now_ms: i64, edit_log: &dyn EditLog) -> Result<(), TxnError> {
        self.with_write_lock("abort", |idx| {
            let mut txn = idx.running.remove(&txn_id).ok_or(TxnError::TransactionNotFound(txn_id))?;
            if !matches!(txn.status, TxnStatus::Prepare | TxnStatus::Precommitted) {
                let status = txn.status.as_str();
                idx.running.insert(txn_id, txn);
                return Err(TxnError::InvalidTransition { txn_id, status, action: "abort" });
            }
            if matches!(txn.source_type, SourceType::RoutineLoadTask) {
                idx.running_routine_load_txn_nums = idx.running_routine_load_txn_nums.saturating_sub(1);
            }
            txn.status = TxnStatus::Aborted;
            txn.finish_time_ms = Some(now_ms);
            txn.reason = Some(reason.clone());
            push_final(idx, txn);
            Ok(())
        })?;
        let _ = edit_log.append(LogEntry::TxnAbort { txn_id: txn_id.0, reason });
        Ok(())
    }

    /// §4.13 `removeExpiredAndTimeoutTxns`.
    pub fn remove_expired_and_timeout_txns(&self, now_ms: i64, edit_log: &dyn EditLog) -> ExpiryReport {
        let mut report = ExpiryReport::default();

        self.with_write_lock("expiry_drain", |idx| {
            let short_ttl_ms = self.limits.streaming_label_keep_max_second * 1000;
            drain_expired(&mut idx.final_short, &mut idx.final_map, &mut idx.label_to_txn_ids, now_ms, short_ttl_ms, &mut report.finals_removed, &mut report.latest_removed_short);

            let long_ttl_ms = self.limits.label_keep_max_second * 1000;
            drain_expired(&mut idx.final_long, &mut idx.final_map, &mut idx.label_to_txn_ids, now_ms, long_ttl_ms, &mut report.finals_removed, &mut report.latest_removed_long);
        });

        let timed_out: Vec<TxnId> = self.indexes.read().running.values().filter(|t| t.is_timeout(now_ms)).map(|t| t.transaction_id).collect();
        for txn_id in timed_out {
            match self.abort(txn_id, "timeout by txn manager".to_string(), now_ms, edit_log) {
                Ok(()) => report.timeouts_aborted += 1,
                Err(err) => warn!(db_id = self.db_id, %txn_id, error = %err, "failed to abort timed-out transaction"),
            }
        }

        report
    }
}

fn push_final(idx: &mut Indexes, txn: Transaction) {
    let txn_id = txn.transaction_id;
    let streaming = txn.is_streaming_retention();
    idx.final_map.insert(txn_id, txn);
    if streaming {
        idx.final_short.push_back(txn_id);
    } else {
        idx.final_long.push_back(txn_id);
    }
}

fn drain_expired(deque: &mut VecDeque<TxnId>, final_map: &mut HashMap<TxnId, Transaction>, label_to_txn_ids: &mut HashMap<String, HashSet<TxnId>>, now_ms: i64, ttl_ms: i64, removed_count: &mut usize, latest_removed: &mut Option<TxnId>) {
    while let Some(&front) = deque.front() {
        if *removed_count >= MAX_REMOVE_TXN_PER_ROUND {
            break;
        }
        let Some(txn) = final_map.get(&front) else {
            deque.pop_front();
            continue;
        };
        let finish = txn.finish_time_ms.unwrap_or(txn.prepare_time_ms);
        if now_ms < finish + ttl_ms {
            break;
        }
        let label = txn.label.clone();
        deque.pop_front();
        final_map.remove(&front);
        if let Some(ids) = label_to_txn_ids.get_mut(&label) {
            ids.remove(&front);
            if ids.is_empty() {
                label_to_txn_ids.remove(&label);
            }
        }
        *removed_count += 1;
        *latest_removed = Some(front);
    }
}

/// Process-wide dispatcher mapping `db_id` to its [`DatabaseTransactionManager`]
/// (§4.7).
pub struct TransactionManager {
    limits: DbTxnLimits,
    lock_reporting_threshold_ms: i64,
    databases: RwLock<HashMap<u64, std::sync::Arc<DatabaseTransactionManager>>>,
}

impl TransactionManager {
    pub fn new(limits: DbTxnLimits, lock_reporting_threshold_ms: i64) -> Self {
        Self {
            limits,
            lock_reporting_threshold_ms,
            databases: RwLock::new(HashMap::new()),
        }
    }

    pub fn database(&self, db_id: u64) -> std::sync::Arc<DatabaseTransactionManager> {
        if let Some(existing) = self.databases.read().get(&db_id) {
            return existing.clone();
        }
        let mut write = self.databases.write();
        write
            .entry(db_id)
            .or_insert_with(|| std::sync::Arc::new(DatabaseTransactionManager::new(db_id, self.limits, self.lock_reporting_threshold_ms)))
            .clone()
    }

    pub fn all_databases(&self) -> Vec<std::sync::Arc<DatabaseTransactionManager>> {
        self.databases.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{DatabaseQuotaCatalog, NullEditLog, NullQuotaCatalog};

    struct AlwaysOverQuota;

    impl DatabaseQuotaCatalog for AlwaysOverQuota {
        fn is_over_data_quota(&self, _db_id: u64) -> bool {
            true
        }
    }

    fn limits() -> DbTxnLimits {
        DbTxnLimits {
            max_running_txn_num: 10,
            label_keep_max_second: 3600,
            streaming_label_keep_max_second: 300,
        }
    }

    #[test]
    fn begin_retry_with_same_request_id_reports_duplicated_request() {
        let mgr = DatabaseTransactionManager::new(1, limits(), 1_000);
        let first = mgr.begin("L1".into(), vec![1], "coord".into(), SourceType::Frontend, Some("R".into()), 10_000, 0, &NullQuotaCatalog, &NullEditLog).unwrap();
        let err = mgr.begin("L1".into(), vec![1], "coord".into(), SourceType::Frontend, Some("R".into()), 10_000, 0, &NullQuotaCatalog, &NullEditLog).unwrap_err();
        assert!(matches!(err, TxnError::DuplicatedRequest(id) if id == first));
    }

    #[test]
    fn begin_with_same_label_after_commit_still_fails_label_already_used() {
        // COMMITTED transactions live on in `idx.running` (not yet moved to
        // `final_map` by `mark_visible`), so the label must still be guarded.
        let mgr = DatabaseTransactionManager::new(1, limits(), 1_000);
        let id = mgr.begin("L1".into(), vec![1], "coord".into(), SourceType::Frontend, None, 10_000, 0, &NullQuotaCatalog, &NullEditLog).unwrap();
        mgr.commit(id, HashMap::new(), HashSet::new(), 1, &NullEditLog).unwrap();
        let err = mgr.begin("L1".into(), vec![1], "coord".into(), SourceType::Frontend, None, 10_000, 2, &NullQuotaCatalog, &NullEditLog).unwrap_err();
        assert!(matches!(err, TxnError::LabelAlreadyUsed { txn_id, .. } if txn_id == id));
    }

    #[test]
    fn begin_with_same_label_after_visible_still_fails_label_already_used() {
        // VISIBLE transactions move into `final_map`; the label index must
        // still be consulted there until the expiry sweep actually drops it.
        let mgr = DatabaseTransactionManager::new(1, limits(), 1_000);
        let id = mgr.begin("L1".into(), vec![1], "coord".into(), SourceType::Frontend, None, 10_000, 0, &NullQuotaCatalog, &NullEditLog).unwrap();
        mgr.commit(id, HashMap::new(), HashSet::new(), 1, &NullEditLog).unwrap();
        mgr.mark_visible(id, 2, &NullEditLog).unwrap();
        let err = mgr.begin("L1".into(), vec![1], "coord".into(), SourceType::Frontend, None, 10_000, 3, &NullQuotaCatalog, &NullEditLog).unwrap_err();
        assert!(matches!(err, TxnError::LabelAlreadyUsed { txn_id, .. } if txn_id == id));
    }

    #[test]
    fn begin_rejects_over_data_quota() {
        let mgr = DatabaseTransactionManager::new(1, limits(), 1_000);
        let err = mgr.begin("L1".into(), vec![1], "coord".into(), SourceType::Frontend, None, 10_000, 0, &AlwaysOverQuota, &NullEditLog).unwrap_err();
        assert!(matches!(err, TxnError::QuotaExceeded));
    }

    #[test]
    fn begin_with_different_request_id_fails_label_already_used() {
        let mgr = DatabaseTransactionManager::new(1, limits(), 1_000);
        mgr.begin("L1".into(), vec![1], "coord".into(), SourceType::Frontend, Some("R".into()), 10_000, 0, &NullQuotaCatalog, &NullEditLog).unwrap();
        let err = mgr.begin("L1".into(), vec![1], "coord".into(), SourceType::Frontend, Some("R2".into()), 10_000, 0, &NullQuotaCatalog, &NullEditLog).unwrap_err();
        assert!(matches!(err, TxnError::LabelAlreadyUsed { .. }));
    }

    #[test]
    fn begin_rejects_empty_label() {
        let mgr = DatabaseTransactionManager::new(1, limits(), 1_000);
        assert!(mgr.begin("".into(), vec![1], "coord".into(), SourceType::Frontend, None, 10_000, 0, &NullQuotaCatalog, &NullEditLog).is_err());
    }

    #[test]
    fn begin_rejects_over_quota() {
        let mut tight = limits();
        tight.max_running_txn_num = 1;
        let mgr = DatabaseTransactionManager::new(1, tight, 1_000);
        mgr.begin("L1".into(), vec![1], "coord".into(), SourceType::Frontend, None, 10_000, 0, &NullQuotaCatalog, &NullEditLog).unwrap();
        let err = mgr.begin("L2".into(), vec![1], "coord".into(), SourceType::Frontend, None, 10_000, 0, &NullQuotaCatalog, &NullEditLog).unwrap_err();
        assert!(matches!(err, TxnError::BeginTxnLimitExceeded));
    }

    #[test]
    fn full_lifecycle_commit_then_visible() {
        let mgr = DatabaseTransactionManager::new(1, limits(), 1_000);
        let id = mgr.begin("L1".into(), vec![1], "coord".into(), SourceType::Frontend, None, 10_000, 0, &NullQuotaCatalog, &NullEditLog).unwrap();
        mgr.commit(id, HashMap::new(), HashSet::new(), 1, &NullEditLog).unwrap();
        assert_eq!(mgr.transaction(id).unwrap().status, TxnStatus::Committed);
        mgr.mark_visible(id, 2, &NullEditLog).unwrap();
        assert_eq!(mgr.transaction(id).unwrap().status, TxnStatus::Visible);
        assert_eq!(mgr.running_txn_num(), 0);
    }

    #[test]
    fn two_phase_commit_lifecycle() {
        let mgr = DatabaseTransactionManager::new(1, limits(), 1_000);
        let id = mgr.begin("L1".into(), vec![1], "coord".into(), SourceType::Frontend, None, 10_000, 0, &NullQuotaCatalog, &NullEditLog).unwrap();
        mgr.precommit(id, HashMap::new(), 1, &NullEditLog).unwrap();
        assert_eq!(mgr.transaction(id).unwrap().status, TxnStatus::Precommitted);
        mgr.commit2pc(id, HashMap::new(), 2, &NullEditLog).unwrap();
        assert_eq!(mgr.transaction(id).unwrap().status, TxnStatus::Committed);
    }

    #[test]
    fn abort_from_committed_is_rejected() {
        let mgr = DatabaseTransactionManager::new(1, limits(), 1_000);
        let id = mgr.begin("L1".into(), vec![1], "coord".into(), SourceType::Frontend, None, 10_000, 0, &NullQuotaCatalog, &NullEditLog).unwrap();
        mgr.commit(id, HashMap::new(), HashSet::new(), 1, &NullEditLog).unwrap();
        let err = mgr.abort(id, "too late".into(), 2, &NullEditLog).unwrap_err();
        assert!(matches!(err, TxnError::InvalidTransition { .. }));
    }

    #[test]
    fn aborted_label_frees_up_for_reuse() {
        let mgr = DatabaseTransactionManager::new(1, limits(), 1_000);
        let id = mgr.begin("L1".into(), vec![1], "coord".into(), SourceType::Frontend, None, 10_000, 0, &NullQuotaCatalog, &NullEditLog).unwrap();
        mgr.abort(id, "cancelled".into(), 1, &NullEditLog).unwrap();
        let second = mgr.begin("L1".into(), vec![1], "coord".into(), SourceType::Frontend, None, 10_000, 2, &NullQuotaCatalog, &NullEditLog).unwrap();
        assert_ne!(id, second);
    }

    #[test]
    fn expiry_sweep_drains_old_finals_and_aborts_timeouts() {
        let mgr = DatabaseTransactionManager::new(1, limits(), 1_000);
        let done = mgr.begin("L1".into(), vec![1], "coord".into(), SourceType::Frontend, None, 10_000, 0, &NullQuotaCatalog, &NullEditLog).unwrap();
        mgr.commit(done, HashMap::new(), HashSet::new(), 1, &NullEditLog).unwrap();
        mgr.mark_visible(done, 2, &NullEditLog).unwrap();

        let stuck = mgr.begin("L2".into(), vec![1], "coord".into(), SourceType::Frontend, None, 5_000, 0, &NullQuotaCatalog, &NullEditLog).unwrap();

        let report = mgr.remove_expired_and_timeout_txns(10_000_000, &NullEditLog);
        assert_eq!(report.finals_removed, 1);
        assert_eq!(report.timeouts_aborted, 1);
        assert!(mgr.transaction(stuck).is_none() || mgr.transaction(stuck).unwrap().status == TxnStatus::Aborted);
    }

    #[test]
    fn dispatcher_returns_the_same_manager_for_a_db_id() {
        let dispatcher = TransactionManager::new(limits(), 1_000);
        let a = dispatcher.database(1);
        let b = dispatcher.database(1);
        assert!(std::sync::Arc::ptr_eq(&a, &b));
    }
}
