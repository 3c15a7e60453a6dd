//! Tracing setup for umfs.
//!
//! The storage library only emits `tracing` events; hosts decide where they
//! go. This crate wires the usual subscriber stack (registry, env filter,
//! fmt layer on stderr) so every host and test suite configures it the same
//! way.
//!
//! # Filtering
//!
//! ```bash
//! # umfs-specific filter wins
//! UMFS_LOG=umfs=debug cargo test -p umfs
//!
//! # falls back to the standard variable
//! RUST_LOG=info my-host
//! ```

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "UMFS_LOG";

/// Build the filter from `UMFS_LOG`, then `RUST_LOG`, then `default`.
pub fn env_filter(default: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV) {
        return filter;
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber.
///
/// Returns an error (rather than panicking) when a subscriber is already
/// installed, so hosts embedding umfs next to their own tracing setup can
/// ignore it.
pub fn init(default: &str) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter(default))
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
}

/// Subscriber for test binaries: output is captured per test and the call
/// is a no-op after the first one.
pub fn init_for_tests() {
    let _ = tracing_subscriber::registry()
        .with(env_filter("warn"))
        .with(fmt::layer().with_test_writer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_for_tests_is_idempotent() {
        init_for_tests();
        init_for_tests();
        tracing::info!(target: "umfs_telemetry", "still alive");
    }

    #[test]
    fn test_second_init_reports_error() {
        init_for_tests();
        assert!(init("info").is_err());
    }

    #[test]
    fn test_env_filter_default() {
        // Neither variable is set by the test harness; the default applies.
        let filter = env_filter("debug");
        let rendered = filter.to_string();
        assert!(!rendered.is_empty());
    }
}
