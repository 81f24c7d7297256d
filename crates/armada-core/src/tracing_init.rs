//! Logging setup for the armada binaries.

use tracing_subscriber::EnvFilter;

/// Filter from `RUST_LOG`, or `default_filter` when it is unset or invalid.
pub fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Install the global subscriber. Logs go to stderr so command output on
/// stdout stays machine-readable; `log_json` switches to one JSON object per
/// line. A second call is a no-op.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_filter))
        .with_writer(std::io::stderr);

    let installed = if log_json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
