//! Process-wide tracing/logging setup.

use tracing_subscriber::EnvFilter;

/// Initialize JSON tracing for a kernel process.
///
/// Filtering is driven by `RUST_LOG`, defaulting to `info`. Safe to call
/// multiple times; subsequent calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

/// Compact human-readable tracing for tests.
///
/// Kept separate from [`init`] so test output stays greppable while
/// production logs stay structured.
pub fn init_for_tests() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .with_test_writer()
        .try_init();
}
