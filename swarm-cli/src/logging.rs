//! Logging setup

use tracing_subscriber::EnvFilter;

/// Filter directive for a `-v` level
pub fn level_for_verbosity(verbose: u8) -> &'static str {
    match verbose {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber; `RUST_LOG` overrides the verbosity
///
/// Logs go to stderr so stdin and stdout stay free for commands.
pub fn init_logging(verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_for_verbosity(verbose)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
