//! §4.13 `removeExpiredAndTimeoutTxns`, driven periodically by the
//! controller's background daemon loop.

use tracing::info;

use super::manager::{ExpiryReport, TransactionManager};
use crate::collab::EditLog;

#[derive(Clone, Copy, Debug)]
pub struct ExpiryDaemonParams {
    pub tick_interval_ms: u64,
}

impl Default for ExpiryDaemonParams {
    fn default() -> Self {
        Self { tick_interval_ms: 10_000 }
    }
}

/// Runs one expiry sweep across every database the process has seen,
/// draining `MAX_REMOVE_TXN_PER_ROUND` finals per database and aborting any
/// transaction past its timeout deadline.
pub fn run_expiry_tick(manager: &TransactionManager, now_ms: i64, edit_log: &dyn EditLog) -> Vec<(u64, ExpiryReport)> {
    let mut reports = Vec::new();
    for db in manager.all_databases() {
        let report = db.remove_expired_and_timeout_txns(now_ms, edit_log);
        if report.finals_removed > 0 || report.timeouts_aborted > 0 {
            info!(finals_removed = report.finals_removed, timeouts_aborted = report.timeouts_aborted, "transaction expiry sweep");
        }
        reports.push((db.running_txn_num() as u64, report));
    }
    reports
}
