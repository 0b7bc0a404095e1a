pub mod capture;
pub mod collector;
pub mod config;
pub mod error;
pub mod handlers;
pub mod server;
pub mod signals;
pub mod snapshot;
pub mod stopwatch;
pub mod store;
pub mod timeline;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing/logging
///
/// Note: This function can only be called once per process.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}
