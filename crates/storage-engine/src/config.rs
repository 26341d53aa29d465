//! Layered engine configuration: compiled-in defaults, overridden by an
//! optional TOML file, overridden by `STORAGE_ENGINE_*` environment
//! variables. Mirrors the split the teacher draws in `crates/core/src/config.rs`
//! between a `serde`-deserializable config struct and OS-appropriate
//! default paths.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The rowset file format written for newly created rowsets. `Alpha` is
/// retained only for config-file compatibility; this engine always treats
/// it the same as `Beta`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RowsetType {
    Alpha,
    Beta,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub data_dirs: Vec<PathBuf>,

    pub tablet_map_shard_size: u32,
    pub txn_map_shard_size: u32,
    pub txn_shard_size: u32,
    pub partition_disk_index_lru_size: usize,

    pub min_file_descriptor_number: u64,
    pub max_percentage_of_error_disk: u32,

    pub snapshot_expire_time_sec: u64,
    pub trash_file_expire_time_sec: u64,
    pub storage_flood_stage_usage_percent: f64,
    pub garbage_sweep_batch_size: usize,

    pub default_rowset_type: RowsetType,

    pub enable_compaction_priority_scheduling: bool,
    pub low_priority_compaction_task_num_per_disk: usize,

    pub label_num_threshold: usize,
    pub label_keep_max_second: u64,
    pub streaming_label_keep_max_second: u64,

    pub lock_reporting_threshold_ms: u64,

    pub publish_wait_time_second: u64,
    pub publish_version_check_alter_replica: bool,
    pub publish_fail_log_interval_second: u64,

    /// Persisted set of data dir paths observed BROKEN on a previous run.
    /// Loaded at startup so a restart does not silently retry a disk that
    /// was already failed out; written back whenever a dir transitions.
    pub broken_storage_path: Vec<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dirs: Vec::new(),
            tablet_map_shard_size: 4096,
            txn_map_shard_size: 128,
            txn_shard_size: 128,
            partition_disk_index_lru_size: 10_000,
            min_file_descriptor_number: 60_000,
            max_percentage_of_error_disk: 0,
            snapshot_expire_time_sec: 172_800,
            trash_file_expire_time_sec: 259_200,
            storage_flood_stage_usage_percent: 95.0,
            garbage_sweep_batch_size: 10,
            default_rowset_type: RowsetType::Beta,
            enable_compaction_priority_scheduling: true,
            low_priority_compaction_task_num_per_disk: 1,
            label_num_threshold: 2000,
            label_keep_max_second: 259_200,
            streaming_label_keep_max_second: 3_600,
            lock_reporting_threshold_ms: 500,
            publish_wait_time_second: 300,
            publish_version_check_alter_replica: true,
            publish_fail_log_interval_second: 60,
            broken_storage_path: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Loads defaults, then a TOML file (if given and present), then
    /// `STORAGE_ENGINE_*` environment overrides for the scalar fields.
    pub fn load(toml_path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(path) = toml_path {
            if path.exists() {
                let contents = std::fs::read_to_string(path)?;
                config = toml::from_str(&contents)?;
            }
        }

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        macro_rules! env_override {
            ($field:ident) => {
                if let Ok(value) = std::env::var(concat!("STORAGE_ENGINE_", stringify!($field))) {
                    if let Ok(parsed) = value.trim().parse() {
                        self.$field = parsed;
                    } else {
                        tracing::warn!(
                            field = stringify!($field),
                            value = %value,
                            "ignoring unparsable STORAGE_ENGINE_* override"
                        );
                    }
                }
            };
        }

        env_override!(tablet_map_shard_size);
        env_override!(txn_map_shard_size);
        env_override!(txn_shard_size);
        env_override!(partition_disk_index_lru_size);
        env_override!(min_file_descriptor_number);
        env_override!(max_percentage_of_error_disk);
        env_override!(snapshot_expire_time_sec);
        env_override!(trash_file_expire_time_sec);
        env_override!(storage_flood_stage_usage_percent);
        env_override!(garbage_sweep_batch_size);
        env_override!(label_num_threshold);
        env_override!(label_keep_max_second);
        env_override!(streaming_label_keep_max_second);
        env_override!(lock_reporting_threshold_ms);
        env_override!(publish_wait_time_second);
        env_override!(publish_fail_log_interval_second);
    }
}

/// OS-appropriate default location for the engine's own config file, mirroring
/// `crates/core/src/config.rs`'s per-platform `config_path()`.
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub fn default_config_path() -> PathBuf {
    PathBuf::from("/etc/storage-engine/engine.toml")
}

#[cfg(target_os = "macos")]
pub fn default_config_path() -> PathBuf {
    PathBuf::from("/usr/local/etc/storage-engine/engine.toml")
}

#[cfg(target_os = "windows")]
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join("storage-engine").join("engine.toml"))
        .unwrap_or_else(|| PathBuf::from("storage-engine.toml"))
}
