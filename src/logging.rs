//! Diagnostic tracing for debugging the runner.
//!
//! Run progress goes through the reporters; this is developer output only,
//! controlled by `RUST_LOG` (default `warn`) and written to stderr.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber.
///
/// # Example
/// ```bash
/// RUST_LOG=altwalker=debug altwalker online tests -m models/login.json "random(never)"
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
