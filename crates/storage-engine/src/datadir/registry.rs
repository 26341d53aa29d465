//! The disk registry: parallel startup init, cluster-id reconciliation, and
//! the periodic broken-path monitor (§4.1).

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, info, warn};

use super::dir::{DataDir, DataDirHealth, StorageMedium, CLUSTER_ID_UNSET};
use crate::collab::{EditLog, LogEntry};
use crate::error::DataDirError;

/// Owns every [`DataDir`] this node was configured with. Mutated only at
/// startup and teardown; steady-state readers take the store lock without
/// blocking each other (§5 "Shared-resource policy").
pub struct DataDirRegistry {
    dirs: Vec<Arc<DataDir>>,
    broken_paths: RwLock<HashSet<String>>,
}

impl DataDirRegistry {
    /// Constructs one [`DataDir`] per `(root, capacity, medium)` triple and
    /// initializes them in parallel, one worker thread per path (§4.1).
    /// Startup fails iff at least one path fails to initialize.
    pub fn bootstrap(roots: Vec<(storage_engine_paths::DataDirRoot, u64, StorageMedium)>, min_fd_soft_limit: u64) -> Result<Self, DataDirError> {
        check_file_descriptor_limit(min_fd_soft_limit)?;

        let dirs: Vec<Arc<DataDir>> = roots
            .into_iter()
            .map(|(root, capacity, medium)| Arc::new(DataDir::new(root, capacity, medium)))
            .collect();

        let results: Vec<Result<(), DataDirError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = dirs
                .iter()
                .map(|dir| {
                    let dir = Arc::clone(dir);
                    scope.spawn(move || dir.init())
                })
                .collect();
            handles.into_iter().map(|h| h.join().expect("data dir init thread panicked")).collect()
        });

        for result in results {
            result?;
        }

        Ok(Self {
            dirs,
            broken_paths: RwLock::new(HashSet::new()),
        })
    }

    pub fn dirs(&self) -> &[Arc<DataDir>] {
        &self.dirs
    }

    pub fn used_dirs(&self) -> impl Iterator<Item = &Arc<DataDir>> {
        self.dirs.iter().filter(|d| d.is_used())
    }

    /// The number of distinct storage mediums present among healthy dirs;
    /// recomputed on every health-check cycle (§4.1).
    pub fn available_storage_medium_type_count(&self) -> usize {
        self.used_dirs().map(|d| d.medium()).collect::<HashSet<_>>().len()
    }

    /// Reconciles the cluster id across all dirs (§4.1). All present ids must
    /// agree; dirs missing an id are backfilled from the consensus, via
    /// configuration, or from another dir. Disagreement is a fatal corruption
    /// error. If no id is available anywhere, this is a no-op: the caller is
    /// expected to retry after a heartbeat supplies one.
    pub fn reconcile_cluster_id(&self, configured_id: Option<i32>, edit_log: &dyn EditLog) -> Result<(), DataDirError> {
        let present: Vec<i32> = self.dirs.iter().map(|d| d.cluster_id()).filter(|id| *id != CLUSTER_ID_UNSET).collect();

        let mut distinct: HashSet<i32> = present.iter().copied().collect();
        if let Some(id) = configured_id {
            distinct.insert(id);
        }

        if distinct.len() > 1 {
            return Err(DataDirError::ClusterIdCorruption(format!("data dirs disagree on cluster id: {distinct:?}")));
        }

        let Some(&consensus) = distinct.iter().next() else {
            info!("no cluster id available yet; deferring reconciliation");
            return Ok(());
        };

        for dir in &self.dirs {
            if dir.cluster_id() == CLUSTER_ID_UNSET {
                dir.write_cluster_id(consensus)?;
                let _ = edit_log.append(LogEntry::ClusterIdReconciled {
                    path: dir.root().to_string(),
                    cluster_id: consensus,
                });
            }
        }
        Ok(())
    }

    /// One tick of the broken-path monitor (§4.1 "Broken path policy").
    /// Health-checks every dir, then aborts the process if the broken
    /// fraction exceeds `max_percentage_of_error_disk`. This is a
    /// deliberate, operator-coordinated exit with code 0 (§9 open question i).
    pub fn disk_stat_monitor_tick(&self, max_percentage_of_error_disk: u32) {
        for dir in &self.dirs {
            dir.health_check();
        }

        let total = self.dirs.len();
        let broken = self.dirs.iter().filter(|d| d.health() == DataDirHealth::Broken).count();
        if total == 0 {
            return;
        }
        let broken_fraction = broken * 100 / total;
        if broken_fraction as u32 > max_percentage_of_error_disk {
            let err = DataDirError::TooManyBrokenDisks {
                broken,
                total,
                max_percentage: max_percentage_of_error_disk,
            };
            error!(%err, "exiting");
            std::process::exit(0);
        } else if broken > 0 {
            warn!(broken, total, "some data dirs are broken");
        }
    }
}

fn check_file_descriptor_limit(required: u64) -> Result<(), DataDirError> {
    #[cfg(unix)]
    {
        let (soft, _hard) = nix::sys::resource::getrlimit(nix::sys::resource::Resource::RLIMIT_NOFILE)
            .map_err(|e| DataDirError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        if soft < required {
            return Err(DataDirError::FileDescriptorLimitTooLow { actual: soft, required });
        }
    }
    #[cfg(not(unix))]
    {
        let _ = required;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::NullEditLog;
    use storage_engine_paths::DataDirRoot;

    fn temp_roots(n: usize) -> (Vec<tempfile::TempDir>, Vec<(DataDirRoot, u64, StorageMedium)>) {
        let tmps: Vec<_> = (0..n).map(|_| tempfile::tempdir().unwrap()).collect();
        let roots = tmps.iter().map(|t| (DataDirRoot::new(t.path()), 1_000_000, StorageMedium::Ssd)).collect();
        (tmps, roots)
    }

    #[test]
    fn bootstrap_initializes_every_dir() {
        let (_tmps, roots) = temp_roots(3);
        let registry = DataDirRegistry::bootstrap(roots, 0).unwrap();
        assert_eq!(registry.dirs().len(), 3);
        assert_eq!(registry.available_storage_medium_type_count(), 1);
    }

    #[test]
    fn reconciliation_backfills_missing_ids_from_consensus() {
        let (_tmps, roots) = temp_roots(2);
        let registry = DataDirRegistry::bootstrap(roots, 0).unwrap();
        registry.dirs()[0].write_cluster_id(7).unwrap();

        registry.reconcile_cluster_id(None, &NullEditLog).unwrap();
        assert_eq!(registry.dirs()[1].cluster_id(), 7);
    }

    #[test]
    fn reconciliation_fails_on_disagreement() {
        let (_tmps, roots) = temp_roots(2);
        let registry = DataDirRegistry::bootstrap(roots, 0).unwrap();
        registry.dirs()[0].write_cluster_id(1).unwrap();
        registry.dirs()[1].write_cluster_id(2).unwrap();

        assert!(matches!(
            registry.reconcile_cluster_id(None, &NullEditLog),
            Err(DataDirError::ClusterIdCorruption(_))
        ));
    }

    #[test]
    fn reconciliation_defers_when_no_id_is_available() {
        let (_tmps, roots) = temp_roots(2);
        let registry = DataDirRegistry::bootstrap(roots, 0).unwrap();
        registry.reconcile_cluster_id(None, &NullEditLog).unwrap();
        assert_eq!(registry.dirs()[0].cluster_id(), CLUSTER_ID_UNSET);
    }

    #[test]
    fn bootstrap_rejects_too_low_fd_limit() {
        let (_tmps, roots) = temp_roots(1);
        let err = DataDirRegistry::bootstrap(roots, u64::MAX).unwrap_err();
        assert!(matches!(err, DataDirError::FileDescriptorLimitTooLow { .. }));
    }
}
