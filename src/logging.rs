//! Diagnostic tracing on stderr.
//!
//! Tracing is for debugging the loop itself and is filtered by `RUST_LOG`.
//! User-facing progress goes through [`crate::console`], and the per-task
//! record of agent interactions goes to the audit log.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initializes the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `warn`, or `fixloop=debug` when `verbose`.
pub fn init(verbose: bool) {
    let default = if verbose { "warn,fixloop=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
