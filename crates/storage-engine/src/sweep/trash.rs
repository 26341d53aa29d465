//! Trash and snapshot sweeping (§4.5).

use std::fs;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use storage_engine_paths::{DataDirRoot, SweepEntryName};
use tracing::{debug, warn};

/// Guarantees a single concurrent sweep per [`DataDir`](crate::datadir::DataDir)
/// via a non-blocking try-lock (§4.5, §5 "Suspension / blocking").
#[derive(Default)]
pub struct TrashSweepGuard {
    running: Mutex<()>,
}

pub struct TrashSweepParams {
    pub snapshot_expire_time_sec: u64,
    pub trash_file_expire_time_sec: u64,
    pub storage_flood_stage_usage_percent: u32,
    pub garbage_sweep_batch_size: u32,
}

/// Runs one trash+snapshot sweep pass over `root` if no other sweep is
/// already in flight. Returns `None` if a sweep was already running and
/// `ignore_guard` is false; with `ignore_guard` true the caller should post a
/// "clean again" retry signal instead of blocking (§4.5).
pub fn start_trash_sweep(guard: &TrashSweepGuard, root: &DataDirRoot, params: &TrashSweepParams, usage_fraction: f64, now: DateTime<Utc>, ignore_guard: bool) -> Option<usize> {
    let Some(_lock) = guard.running.try_lock() else {
        if ignore_guard {
            debug!("trash sweep already running; caller should retry");
        }
        return None;
    };

    let flood_stage = params.storage_flood_stage_usage_percent as f64 / 100.0;
    let force_immediate_reclaim = usage_fraction > flood_stage * 0.9;

    let mut deleted = 0usize;
    deleted += sweep_dir(root.trash_dir().as_path(), params.trash_file_expire_time_sec, force_immediate_reclaim, now, params.garbage_sweep_batch_size);
    deleted += sweep_dir(root.snapshot_dir().as_path(), params.snapshot_expire_time_sec, force_immediate_reclaim, now, params.garbage_sweep_batch_size);
    Some(deleted)
}

fn sweep_dir(dir: &std::path::Path, default_ttl_sec: u64, force_immediate: bool, now: DateTime<Utc>, batch_size: u32) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };

    let mut deleted = 0usize;
    for entry in entries.flatten() {
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        let parsed = match SweepEntryName::parse(&name) {
            Ok(p) => p,
            Err(err) => {
                warn!(entry = %name, error = %err, "skipping unparseable sweep entry");
                continue;
            }
        };

        let effective_ttl = if force_immediate { 0 } else { parsed.ttl_seconds.unwrap_or(default_ttl_sec) };
        let age = (now - parsed.create_time_utc()).num_seconds().max(0) as u64;
        if age >= effective_ttl {
            match remove_entry(&entry.path()) {
                Ok(()) => {
                    deleted += 1;
                    debug!(entry = %name, age, effective_ttl, "removed expired sweep entry");
                }
                Err(err) => warn!(entry = %name, error = %err, "failed to remove sweep entry"),
            }
            if batch_size > 0 && deleted % batch_size as usize == 0 {
                thread::sleep(Duration::from_millis(1));
            }
        }
    }
    deleted
}

fn remove_entry(path: &std::path::Path) -> std::io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}
