use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` wins when set; the
/// default keeps this crate at debug and everything else at info.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ingestion_service=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
