use tracing_subscriber::{fmt, EnvFilter};

/// Console subscriber for the binaries. `RUST_LOG` wins; otherwise `info`.
pub fn init() {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // a second call (tests, embedding) keeps the first subscriber
    let _ = fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .with_target(false)
        .try_init();
}
