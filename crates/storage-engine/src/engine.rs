//! Top-level coordinator: disk registry, placement, rowset lifecycle
//! registries, the transaction manager, and the background daemon set
//! (§4.1–§4.13, §5 "Scheduling model").

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::collab::{EditLog, TabletCatalog};
use crate::config::EngineConfig;
use crate::datadir::DataDirRegistry;
use crate::error::{DataDirError, EngineError};
use crate::placement::{self, DiskIndexCursor};
use crate::rowset::{PendingRowsetSet, QueryingRowsetRegistry, RowsetIdGenerator, UnusedRowsetRegistry};
use crate::sweep::{start_trash_sweep, TrashSweepGuard, TrashSweepParams};
use crate::txn::{DbTxnLimits, TransactionManager};

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

/// One daemon's stop-aware sleep loop. Returns when the shared stop channel
/// is closed (controller shutdown) instead of on a fixed tick count, so
/// `JoinHandle::join` at shutdown always terminates (§5 "Cancellation").
fn run_daemon<F: FnMut()>(name: &'static str, interval: Duration, stop_rx: Receiver<()>, mut tick: F) {
    info!(daemon = name, "daemon starting");
    loop {
        match stop_rx.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => tick(),
        }
    }
    info!(daemon = name, "daemon stopped");
}

/// Coordinates every subsystem this node owns. Collaborators it does not own
/// (tablet catalog, edit log, replica catalog) are injected per §4.14.
pub struct StorageEngineController {
    config: EngineConfig,
    datadirs: Arc<DataDirRegistry>,
    disk_cursor: Arc<DiskIndexCursor>,
    rowset_ids: Arc<RowsetIdGenerator>,
    pending_rowsets: Arc<PendingRowsetSet>,
    querying_rowsets: Arc<QueryingRowsetRegistry>,
    unused_rowsets: Arc<UnusedRowsetRegistry>,
    txn_manager: Arc<TransactionManager>,
    trash_guards: Vec<Arc<TrashSweepGuard>>,
    edit_log: Arc<dyn EditLog>,
    stop_tx: Mutex<Option<Sender<()>>>,
    daemons: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl StorageEngineController {
    /// Bootstraps the disk registry from already-resolved `(root, capacity,
    /// medium)` triples — parsing a config-file path spec into those triples
    /// is the CLI entry point's job, not the controller's (§6.1).
    pub fn bootstrap(config: EngineConfig, roots: Vec<(storage_engine_paths::DataDirRoot, u64, crate::datadir::StorageMedium)>, backend_uid: u64, edit_log: Arc<dyn EditLog>) -> Result<Self, EngineError> {
        let datadirs = DataDirRegistry::bootstrap(roots, config.min_file_descriptor_number).map_err(EngineError::DataDir)?;

        let limits = DbTxnLimits {
            max_running_txn_num: config.label_num_threshold,
            label_keep_max_second: config.label_keep_max_second as i64,
            streaming_label_keep_max_second: config.streaming_label_keep_max_second as i64,
        };

        let trash_guards = datadirs.dirs().iter().map(|_| Arc::new(TrashSweepGuard::default())).collect();

        Ok(Self {
            disk_cursor: Arc::new(DiskIndexCursor::new(config.partition_disk_index_lru_size)),
            rowset_ids: Arc::new(RowsetIdGenerator::new(backend_uid)),
            pending_rowsets: Arc::new(PendingRowsetSet::new()),
            querying_rowsets: Arc::new(QueryingRowsetRegistry::new()),
            unused_rowsets: Arc::new(UnusedRowsetRegistry::new()),
            txn_manager: Arc::new(TransactionManager::new(limits, config.lock_reporting_threshold_ms as i64)),
            trash_guards,
            datadirs: Arc::new(datadirs),
            edit_log,
            config,
            stop_tx: Mutex::new(None),
            daemons: Mutex::new(Vec::new()),
        })
    }

    pub fn datadirs(&self) -> &Arc<DataDirRegistry> {
        &self.datadirs
    }

    pub fn disk_cursor(&self) -> &Arc<DiskIndexCursor> {
        &self.disk_cursor
    }

    pub fn rowset_ids(&self) -> &Arc<RowsetIdGenerator> {
        &self.rowset_ids
    }

    pub fn pending_rowsets(&self) -> &Arc<PendingRowsetSet> {
        &self.pending_rowsets
    }

    pub fn querying_rowsets(&self) -> &Arc<QueryingRowsetRegistry> {
        &self.querying_rowsets
    }

    pub fn unused_rowsets(&self) -> &Arc<UnusedRowsetRegistry> {
        &self.unused_rowsets
    }

    pub fn txn_manager(&self) -> &Arc<TransactionManager> {
        &self.txn_manager
    }

    pub fn stores_for_create_tablet(&self, partition_id: u64, medium: crate::datadir::StorageMedium) -> Vec<Arc<crate::datadir::DataDir>> {
        placement::stores_for_create_tablet(&self.disk_cursor, partition_id, medium, self.datadirs.dirs())
    }

    /// Starts every long-lived background daemon (§5 "Scheduling model").
    /// Idempotent-unsafe: calling twice leaks the first daemon set's stop
    /// channel, so callers must pair this with exactly one `shutdown()`.
    pub fn spawn_background_daemons(&self, tablets: Arc<dyn TabletCatalog>) {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        *self.stop_tx.lock() = Some(stop_tx);

        let mut handles = Vec::new();
        handles.push(self.spawn_disk_stat_monitor(stop_rx.clone()));
        handles.push(self.spawn_unused_rowset_sweeper(stop_rx.clone(), tablets));
        handles.push(self.spawn_trash_sweeper(stop_rx.clone()));
        handles.push(self.spawn_txn_expiry(stop_rx));
        *self.daemons.lock() = handles;
    }

    fn spawn_disk_stat_monitor(&self, stop_rx: Receiver<()>) -> std::thread::JoinHandle<()> {
        let datadirs = self.datadirs.clone();
        let max_pct = self.config.max_percentage_of_error_disk;
        std::thread::spawn(move || {
            run_daemon("disk_stat_monitor", Duration::from_secs(10), stop_rx, || {
                datadirs.disk_stat_monitor_tick(max_pct);
            });
        })
    }

    fn spawn_unused_rowset_sweeper(&self, stop_rx: Receiver<()>, tablets: Arc<dyn TabletCatalog>) -> std::thread::JoinHandle<()> {
        let unused = self.unused_rowsets.clone();
        let querying = self.querying_rowsets.clone();
        std::thread::spawn(move || {
            run_daemon("unused_rowset_sweeper", Duration::from_secs(30), stop_rx, || {
                let removed = unused.sweep(Instant::now(), &querying, tablets.as_ref());
                if !removed.is_empty() {
                    info!(count = removed.len(), "unused rowset sweep removed rowsets");
                }
            });
        })
    }

    fn spawn_trash_sweeper(&self, stop_rx: Receiver<()>) -> std::thread::JoinHandle<()> {
        let datadirs = self.datadirs.clone();
        let guards = self.trash_guards.clone();
        let params = TrashSweepParams {
            snapshot_expire_time_sec: self.config.snapshot_expire_time_sec,
            trash_file_expire_time_sec: self.config.trash_file_expire_time_sec,
            storage_flood_stage_usage_percent: self.config.storage_flood_stage_usage_percent as u32,
            garbage_sweep_batch_size: self.config.garbage_sweep_batch_size as u32,
        };
        std::thread::spawn(move || {
            run_daemon("trash_sweeper", Duration::from_secs(60), stop_rx, || {
                for (dir, guard) in datadirs.dirs().iter().zip(guards.iter()) {
                    if !dir.is_used() {
                        continue;
                    }
                    match start_trash_sweep(guard, dir.root(), &params, dir.usage_fraction(), Utc::now(), false) {
                        Some(deleted) if deleted > 0 => info!(dir = %dir.root(), deleted, "trash sweep reclaimed entries"),
                        _ => {}
                    }
                }
            });
        })
    }

    fn spawn_txn_expiry(&self, stop_rx: Receiver<()>) -> std::thread::JoinHandle<()> {
        let txn_manager = self.txn_manager.clone();
        let edit_log = self.edit_log.clone();
        let interval = Duration::from_millis(crate::txn::ExpiryDaemonParams::default().tick_interval_ms);
        std::thread::spawn(move || {
            run_daemon("txn_expiry", interval, stop_rx, || {
                crate::txn::run_expiry_tick(&txn_manager, now_ms(), edit_log.as_ref());
            });
        })
    }

    /// Closes the shutdown latch and joins every daemon thread (§5
    /// "Cancellation / timeouts"). Safe to call at most once.
    pub fn shutdown(&self) {
        self.stop_tx.lock().take();
        let handles = std::mem::take(&mut *self.daemons.lock());
        for handle in handles {
            if handle.join().is_err() {
                warn!("a background daemon thread panicked during shutdown");
            }
        }
    }
}

/// Backfills every dir still reporting [`CLUSTER_ID_UNSET`](crate::datadir::CLUSTER_ID_UNSET)
/// once a cluster id becomes known, e.g. after the first successful
/// heartbeat from the frontend (§4.1).
pub fn reconcile_cluster_id(datadirs: &DataDirRegistry, configured_id: Option<i32>, edit_log: &dyn EditLog) -> Result<(), DataDirError> {
    datadirs.reconcile_cluster_id(configured_id, edit_log)
}
