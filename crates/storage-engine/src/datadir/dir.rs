//! A single physical storage root (§3 "DataDir").

use std::fmt;
use std::fs;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::RwLock;
use storage_engine_paths::DataDirRoot;

use crate::error::DataDirError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageMedium {
    Hdd,
    Ssd,
    Remote,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataDirHealth {
    Used,
    Broken,
}

/// `-1` in the on-disk file means "unset" (§3).
pub const CLUSTER_ID_UNSET: i32 = -1;

pub struct DataDir {
    root: DataDirRoot,
    capacity_bytes: u64,
    medium: StorageMedium,
    cluster_id: RwLock<i32>,
    health: RwLock<DataDirHealth>,
    usage_bytes: AtomicU64,
    next_shard: AtomicU32,
}

impl DataDir {
    pub fn new(root: DataDirRoot, capacity_bytes: u64, medium: StorageMedium) -> Self {
        Self {
            root,
            capacity_bytes,
            medium,
            cluster_id: RwLock::new(CLUSTER_ID_UNSET),
            health: RwLock::new(DataDirHealth::Used),
            usage_bytes: AtomicU64::new(0),
            next_shard: AtomicU32::new(0),
        }
    }

    pub fn root(&self) -> &DataDirRoot {
        &self.root
    }

    pub fn medium(&self) -> StorageMedium {
        self.medium
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    pub fn cluster_id(&self) -> i32 {
        *self.cluster_id.read()
    }

    pub fn health(&self) -> DataDirHealth {
        *self.health.read()
    }

    pub fn is_used(&self) -> bool {
        self.health() == DataDirHealth::Used
    }

    /// Opens the root, creating the sweep directories, and reads an existing
    /// cluster-id file if one is present (§3, §4.1).
    pub fn init(&self) -> Result<(), DataDirError> {
        if !self.root.as_path().is_absolute() {
            return Err(DataDirError::InvalidRootPath(self.root.to_string()));
        }

        fs::create_dir_all(self.root.as_path())?;
        fs::create_dir_all(self.root.snapshot_dir().as_path())?;
        fs::create_dir_all(self.root.trash_dir().as_path())?;

        let path = self.root.cluster_id_file();
        if path.as_path().exists() {
            let raw = fs::read_to_string(path.as_path())?;
            let id: i32 = raw
                .trim()
                .parse()
                .map_err(|_| DataDirError::ClusterIdCorruption(format!("{}: not an integer", self.root)))?;
            *self.cluster_id.write() = id;
        }
        Ok(())
    }

    /// Writes `id` to the cluster-id file and records it in memory (§4.1).
    pub fn write_cluster_id(&self, id: i32) -> Result<(), DataDirError> {
        fs::write(self.root.cluster_id_file().as_path(), id.to_string())?;
        *self.cluster_id.write() = id;
        Ok(())
    }

    /// Usage fraction in `[0.0, 1.0+]`; caller clamps for display if needed.
    pub fn usage_fraction(&self) -> f64 {
        if self.capacity_bytes == 0 {
            return 0.0;
        }
        self.usage_bytes.load(Ordering::Relaxed) as f64 / self.capacity_bytes as f64
    }

    pub fn set_usage_bytes(&self, bytes: u64) {
        self.usage_bytes.store(bytes, Ordering::Relaxed);
    }

    /// Allocates the next shard id for tablet creation under this root.
    pub fn next_shard(&self) -> u32 {
        self.next_shard.fetch_add(1, Ordering::Relaxed)
    }

    /// Probes the root's health. A missing or unreadable root marks the dir
    /// BROKEN; callers invoke this periodically from `disk_stat_monitor`
    /// (§4.1 "Broken path policy").
    pub fn health_check(&self) {
        let healthy = fs::metadata(self.root.as_path()).map(|m| m.is_dir()).unwrap_or(false);
        *self.health.write() = if healthy { DataDirHealth::Used } else { DataDirHealth::Broken };
    }

    pub fn mark_broken(&self) {
        *self.health.write() = DataDirHealth::Broken;
    }
}

impl fmt::Debug for DataDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataDir")
            .field("root", &self.root)
            .field("medium", &self.medium)
            .field("cluster_id", &self.cluster_id())
            .field("health", &self.health())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_sweep_dirs_and_leaves_cluster_id_unset() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DataDir::new(DataDirRoot::new(tmp.path()), 1_000_000, StorageMedium::Ssd);
        dir.init().unwrap();
        assert!(tmp.path().join("snapshot").is_dir());
        assert!(tmp.path().join("trash").is_dir());
        assert_eq!(dir.cluster_id(), CLUSTER_ID_UNSET);
    }

    #[test]
    fn init_rejects_relative_root_path() {
        let dir = DataDir::new(DataDirRoot::new("relative/path"), 1_000_000, StorageMedium::Ssd);
        assert!(matches!(dir.init(), Err(DataDirError::InvalidRootPath(_))));
    }

    #[test]
    fn write_then_init_recovers_cluster_id() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DataDir::new(DataDirRoot::new(tmp.path()), 1_000_000, StorageMedium::Ssd);
        dir.init().unwrap();
        dir.write_cluster_id(42).unwrap();

        let reopened = DataDir::new(DataDirRoot::new(tmp.path()), 1_000_000, StorageMedium::Ssd);
        reopened.init().unwrap();
        assert_eq!(reopened.cluster_id(), 42);
    }

    #[test]
    fn corrupt_cluster_id_file_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("cluster_id"), "not-a-number").unwrap();
        let dir = DataDir::new(DataDirRoot::new(tmp.path()), 1_000_000, StorageMedium::Ssd);
        assert!(matches!(dir.init(), Err(DataDirError::ClusterIdCorruption(_))));
    }

    #[test]
    fn health_check_marks_missing_root_broken() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("gone");
        let dir = DataDir::new(DataDirRoot::new(&missing), 1_000_000, StorageMedium::Ssd);
        dir.health_check();
        assert_eq!(dir.health(), DataDirHealth::Broken);
    }
}
