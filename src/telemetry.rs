use tracing::Span;
use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber. `RUST_LOG` takes precedence over
/// `default_level`; an unparsable level falls back to `info`.
pub fn init(default_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_file(true)
        .with_line_number(true)
        .try_init();
}

/// Span that tags every event a component emits with its name.
pub fn component(name: &'static str) -> Span {
    tracing::info_span!("component", identifier = name)
}
