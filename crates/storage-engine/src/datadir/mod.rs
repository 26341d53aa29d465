//! Physical disk roots: per-disk state and the startup registry (§3, §4.1).

mod dir;
mod registry;

pub use dir::{DataDir, DataDirHealth, StorageMedium, CLUSTER_ID_UNSET};
pub use registry::DataDirRegistry;
