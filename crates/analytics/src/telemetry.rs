//! Tracing setup for binaries and tests

/// Install a formatting subscriber filtered by `RUST_LOG`, defaulting to
/// `info` with crate-level debug.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,analytics=debug".into());

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init();
}
