use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the JSON log subscriber. Logs go to stderr; stdout carries the
/// status text shown to the user.
pub fn init() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mainserver_gate=info,mainserver_api=info")),
        )
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .init();
}
