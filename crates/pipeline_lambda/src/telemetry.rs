use tracing_subscriber::EnvFilter;

/// JSON logs on stderr, filtered by `RUST_LOG` (default `info`).
///
/// Timestamps are left to CloudWatch. Safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .try_init();
}
