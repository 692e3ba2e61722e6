use std::io::{self, IsTerminal};

use tracing_subscriber::EnvFilter;

/// Installs the stderr subscriber. `--quiet` wins over everything, then
/// `RUST_LOG`, then `--verbose`.
pub fn init(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("off")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(if verbose { "warn,toolpipe=debug" } else { "warn" })
        })
    };

    // A second init (tests, repeated runs in one process) is harmless.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_target(false)
        .try_init();
}
