//! Tracing initialization shared by every binary in the workspace.

use tracing_subscriber::EnvFilter;

/// Install a `tracing_subscriber` formatter driven by `RUST_LOG`, defaulting
/// to `info` when unset. Writes to stderr so stdout stays free for a
/// binary's own output.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
