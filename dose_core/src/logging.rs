//! Logging infrastructure for Dosewatch.
//!
//! Centralized tracing setup shared by the CLI and any other binaries.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize logging at the default INFO level
///
/// RUST_LOG overrides the default when set.
pub fn init() {
    init_with_level("info")
}

/// Initialize logging with a specific default level
///
/// # Arguments
/// * `default_level` - Default log level (debug, info, warn, error)
///
/// RUST_LOG still takes precedence when set, so a deployed binary can be
/// turned up to debug without a rebuild.
pub fn init_with_level(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}
