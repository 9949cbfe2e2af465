use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "info,motorchat=debug";

/// Installs the global subscriber: JSON lines in production, compact text
/// otherwise. `RUST_LOG` overrides the default filter.
pub fn init_tracing(production: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    if production {
        fmt()
            .with_env_filter(filter)
            .json()
            .with_target(false)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }
}
