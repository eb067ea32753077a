//! Tracing subscriber setup for embedders and tools.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber on stderr.
///
/// `RUST_LOG` wins when set; otherwise `info`, or `debug` when `verbose`.
/// Safe to call more than once: later calls are ignored.
pub fn init(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
