//! `storage-engine-node`: process entry point (§6.1).

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use storage_engine::collab::NullEditLog;
use storage_engine::config::EngineConfig;
use storage_engine::datadir::StorageMedium;
use storage_engine::logging::init_tracing;
use storage_engine::StorageEngineController;

#[derive(Parser, Debug)]
#[command(name = "storage-engine-node", about = "Local storage engine node for an OLAP columnar database")]
struct Cli {
    /// Path to a TOML configuration file. Missing defaults are filled in,
    /// missing file is fine.
    #[arg(long)]
    config: Option<PathBuf>,

    /// A data directory root. Repeatable; appended to the config file's
    /// `data_dirs`. At least one is required across both sources.
    #[arg(long = "data-dir")]
    data_dirs: Vec<PathBuf>,

    #[arg(long, default_value = "info")]
    log_level: String,

    /// Backend UID embedded in every rowset id this process mints (§3).
    #[arg(long, default_value_t = 1)]
    backend_uid: u64,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let mut config = EngineConfig::load(cli.config.as_deref())?;
    config.data_dirs.extend(cli.data_dirs);
    if config.data_dirs.is_empty() {
        anyhow::bail!("no data directories configured: pass --data-dir or set `data_dirs` in the config file");
    }

    let roots = config
        .data_dirs
        .iter()
        .map(|path| (storage_engine_paths::DataDirRoot::new(path.clone()), u64::MAX, StorageMedium::Hdd))
        .collect();

    let controller = StorageEngineController::bootstrap(config, roots, cli.backend_uid, Arc::new(NullEditLog))?;

    tracing::info!(dirs = controller.datadirs().dirs().len(), "storage engine node bootstrapped");

    // No tablet catalog backend exists outside of tests yet (§1); an empty
    // catalog is the correct placeholder until that collaborator is wired in.
    controller.spawn_background_daemons(Arc::new(storage_engine::collab::NoopTabletCatalog));

    // A real deployment wires this node into an RPC server; standing up that
    // transport is out of scope (§1). Block until stdin closes, then drain
    // background daemons.
    let mut discard = String::new();
    let _ = std::io::stdin().read_line(&mut discard);
    controller.shutdown();
    Ok(())
}
