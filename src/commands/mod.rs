pub mod ingest;
pub mod symbols;

/// Initialize tracing once per command entry, `RUST_LOG` overriding the
/// default `info` filter
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}
