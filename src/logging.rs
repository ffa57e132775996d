//! Diagnostics via `tracing`, written to stderr.
//!
//! Task progress for users goes through [`crate::events`]; this is for
//! operators and is controlled by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global subscriber. Defaults to `info` if `RUST_LOG` is
/// unset.
///
/// ```bash
/// RUST_LOG=browser_agent=debug agent --workers 2
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
