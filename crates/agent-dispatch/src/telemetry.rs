// agent-dispatch/crates/agent-dispatch/src/telemetry.rs

use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset. HTTP client internals are noisy at info.
pub const DEFAULT_FILTER: &str = "info,hyper=warn,reqwest=warn,h2=warn";

pub fn init_tracing() {
    init_tracing_with(DEFAULT_FILTER);
}

/// Install the global fmt subscriber. `RUST_LOG` takes precedence over `fallback`.
pub fn init_tracing_with(fallback: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_target(true)
        .with_level(true)
        .compact()
        .finish();

    // A second call keeps the first subscriber.
    let _ = tracing::subscriber::set_global_default(subscriber);
}
