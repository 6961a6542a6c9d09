//! Tandem Tools
//!
//! CLI tools and the demonstration heating/cooling model.

use tracing_subscriber::{EnvFilter, fmt};

pub mod demo;

/// Initialize logging with a default filter.
///
/// Use `RUST_LOG` environment variable to override the default filter.
/// Default is `info`, with `debug` for the runtime and tools crates.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tandem_runtime=debug,tandem_tools=debug"));

    fmt().with_env_filter(filter).with_target(false).init();
}
