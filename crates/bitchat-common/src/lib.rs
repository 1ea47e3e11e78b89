//! Shared utilities for BitChat.

pub mod error;

use tracing_subscriber::EnvFilter;

/// Installs a `tracing` subscriber reading its filter from `RUST_LOG`.
///
/// Defaults to `info` when `RUST_LOG` is unset. Applications own this call;
/// library crates only ever emit spans/events.
pub fn init_tracing() {
    init_tracing_with_default("info");
}

/// Same as [`init_tracing`] but with a caller-chosen default filter.
pub fn init_tracing_with_default(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter.to_string()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
