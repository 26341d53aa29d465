//! Structured logging bring-up, modeled on
//! `crates/core/src/startup.rs::configure_tracing` but trimmed to what a
//! storage-engine node needs: a compact stdout formatter driven by
//! `RUST_LOG`, no profiling layers.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs the process-wide `tracing` subscriber. Idempotent-safe to call
/// once at process start; panics if a global subscriber is already set,
/// mirroring the teacher's "configure once at startup" contract.
pub fn init_tracing(default_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let format = fmt::format()
        .with_timer(fmt::time())
        .with_line_number(true)
        .with_file(true)
        .with_target(false)
        .compact();

    tracing_subscriber::fmt()
        .event_format(format)
        .with_env_filter(env_filter)
        .init();
}
