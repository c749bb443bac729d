//! Structured logging setup for binaries embedding the clients.

use tracing_subscriber::EnvFilter;

/// Install a formatted subscriber reading its filter from `RUST_LOG`,
/// defaulting to `info`. Calling this a second time is a no-op.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
