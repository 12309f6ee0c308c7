use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Installs the global `fmt` subscriber on stderr, filtered by `RUST_LOG`
/// (default `info`). Stdout stays free for command output.
///
/// Fails when a subscriber is already installed, so callers that may run more
/// than once (tests, multiple binaries in one process) use `init().ok()`.
pub fn init() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("init tracing subscriber: {e}"))
}
