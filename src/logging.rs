//! Logging init: stderr subscriber with env-filter control.

use tracing_subscriber::EnvFilter;

/// Initialize structured logging to stderr. Quiet by default; raise with
/// `RUST_LOG` (e.g. `RUST_LOG=activityinfo_export_cli=debug`).
pub fn init() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}
