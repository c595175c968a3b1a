//! Subscriber setup for the command line.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber, logging to stderr.
///
/// `RUST_LOG` overrides the default level (`debug` when `verbose`, else `info`).
pub fn init(verbose: bool, json_format: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);
    if json_format {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}
