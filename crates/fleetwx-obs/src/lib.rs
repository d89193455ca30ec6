use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const DEFAULT_FILTER: &str = "info,fleetwx=debug";

/// Initialize logging for a fleetwx process.
/// - JSON logs, one object per line
/// - RUST_LOG respected; default to "info,fleetwx=debug"
pub fn init(service_name: &str) {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.to_string());

    // a second init (e.g. from tests) keeps the first subscriber
    let installed = tracing_subscriber::registry()
        .with(EnvFilter::new(env_filter))
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(service = %service_name, "Observability initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_harmless() {
        init("fleetwx-test");
        init("fleetwx-test");
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }
}
