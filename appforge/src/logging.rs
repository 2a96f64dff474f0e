//! Diagnostic tracing for the engine.
//!
//! - **Tracing (this module)**: diagnostics via `RUST_LOG`, written to stderr.
//!   Not persisted.
//! - **Transcripts (`io/transcript`)**: per-iteration JSON artifacts, written
//!   only when `transcript_dir` is configured. Unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// Reads `RUST_LOG`, falling back to `default_filter` when unset. Output goes
/// to stderr in compact format so stdout stays machine-readable.
///
/// # Example
/// ```bash
/// RUST_LOG=appforge=debug appforge run "build a counter app"
/// ```
pub fn init(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // A second init (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
